use anyhow::Context as _;
use podshell_core::{
    paths, ActionLogs, Config, FileStore, ObservableStore, WorkspaceStore, WorkspacesClient,
};
use podshell_launcher::{LaunchConfig, WorkspaceCommands};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Everything a command needs, resolved once from flags, env and config.
///
/// Data directory priority:
/// 1. `--home` flag / `PODSHELL_HOME` env var
/// 2. `$HOME/.podshell`
///
/// Binary priority:
/// 1. `--binary` flag / `PODSHELL_BINARY` env var
/// 2. `binary` in config.yaml
/// 3. `devpod` on `PATH`
pub struct Context {
    pub data_dir: PathBuf,
    pub config: Config,
    pub logs: ActionLogs,
    pub store: WorkspaceStore,
    binary: Option<PathBuf>,
}

impl Context {
    pub fn load(home: Option<&Path>, binary: Option<PathBuf>, debug: bool) -> anyhow::Result<Self> {
        let data_dir = paths::data_dir(home)?;
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        let mut config = Config::load(&data_dir).context("failed to load config")?;
        if debug {
            config.debug = true;
        }

        let logs = ActionLogs::new(paths::action_logs_dir(&data_dir));
        if let Err(e) = logs.setup(config.log_retention()) {
            tracing::warn!(error = %e, "failed to prepare action log directory");
        }

        let backend = FileStore::new(&data_dir, paths::STORE_NAME);
        let store = WorkspaceStore::new(ObservableStore::new(Arc::new(backend)), None);

        Ok(Self {
            data_dir,
            config,
            logs,
            store,
            binary,
        })
    }

    /// Resolve the workspace CLI and build a client for it. Only commands
    /// that talk to the CLI call this.
    pub fn client(&self) -> anyhow::Result<WorkspacesClient> {
        let name = self.config.binary_or(self.binary.as_deref());
        let binary = LaunchConfig::resolve_binary(name)
            .with_context(|| format!("cannot find workspace CLI '{}'", name.display()))?;
        tracing::debug!(binary = %binary.display(), "using workspace CLI");

        let commands = WorkspaceCommands::new(self.config.launch_config(binary))
            .with_additional_flags(self.config.additional_flags.clone());
        Ok(WorkspacesClient::new(commands, self.logs.clone()))
    }
}
