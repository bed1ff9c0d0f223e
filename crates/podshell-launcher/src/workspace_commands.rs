use std::collections::BTreeMap;
use std::sync::Arc;

use crate::command::{CliCommand, LaunchConfig, DEBUG_FLAG};

pub const COMMAND_UP: &str = "up";
pub const COMMAND_STOP: &str = "stop";
pub const COMMAND_DELETE: &str = "delete";
pub const COMMAND_STATUS: &str = "status";
pub const COMMAND_LIST: &str = "list";

pub const FLAG_JSON_LOG_OUTPUT: &str = "--log-output=json";
pub const FLAG_JSON_OUTPUT: &str = "--output=json";
pub const FLAG_RECREATE: &str = "--recreate";
pub const FLAG_RESET: &str = "--reset";
pub const FLAG_FORCE: &str = "--force";
pub const FLAG_SKIP_PRO: &str = "--skip-pro";
pub const FLAG_ID: &str = "--id";
pub const FLAG_SOURCE: &str = "--source";
pub const FLAG_IDE: &str = "--ide";
pub const FLAG_PROVIDER: &str = "--provider";
pub const FLAG_PROVIDER_OPTION: &str = "--provider-option";
pub const FLAG_DEVCONTAINER_PATH: &str = "--devcontainer-path";

fn flag(name: &str, value: &str) -> String {
    format!("{name}={value}")
}

/// Where a new workspace comes from, e.g. `git:https://github.com/org/repo`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceConfig {
    pub kind: String,
    pub source: String,
}

/// Options for `up`.
#[derive(Debug, Clone, Default)]
pub struct StartConfig {
    pub source: Option<SourceConfig>,
    pub ide: Option<String>,
    pub provider: Option<String>,
    pub provider_options: BTreeMap<String, String>,
    pub devcontainer_path: Option<String>,
}

/// Builds the [`CliCommand`] for every workspace operation.
#[derive(Debug, Clone)]
pub struct WorkspaceCommands {
    config: Arc<LaunchConfig>,
    additional_flags: Vec<String>,
}

impl WorkspaceCommands {
    pub fn new(config: LaunchConfig) -> Self {
        Self {
            config: Arc::new(config),
            additional_flags: Vec::new(),
        }
    }

    /// Extra flags passed verbatim to `up`, e.g. dotfiles or signing keys.
    pub fn with_additional_flags(mut self, flags: Vec<String>) -> Self {
        self.additional_flags = flags;
        self
    }

    pub fn config(&self) -> &Arc<LaunchConfig> {
        &self.config
    }

    /// Queries produce machine-readable stdout and never get `--debug`.
    fn query(&self, args: Vec<String>) -> CliCommand {
        CliCommand::new(Arc::clone(&self.config), args)
    }

    fn action(&self, mut args: Vec<String>) -> CliCommand {
        if self.config.debug {
            args.push(DEBUG_FLAG.to_string());
        }
        CliCommand::new(Arc::clone(&self.config), args)
    }

    pub fn list(&self, skip_pro: bool) -> CliCommand {
        let mut args = vec![COMMAND_LIST.to_string(), FLAG_JSON_OUTPUT.to_string()];
        if skip_pro {
            args.push(FLAG_SKIP_PRO.to_string());
        }
        self.query(args)
    }

    pub fn status(&self, id: &str) -> CliCommand {
        self.query(vec![
            COMMAND_STATUS.to_string(),
            id.to_string(),
            FLAG_JSON_OUTPUT.to_string(),
        ])
    }

    /// `status` with streamed logs, used by the check-status action.
    pub fn status_logs(&self, id: &str) -> CliCommand {
        self.action(vec![
            COMMAND_STATUS.to_string(),
            id.to_string(),
            FLAG_JSON_LOG_OUTPUT.to_string(),
        ])
    }

    pub fn start(&self, id: &str, config: &StartConfig) -> CliCommand {
        // A new workspace is addressed by its source and named with --id.
        let identifier = config
            .source
            .as_ref()
            .map(|s| s.source.as_str())
            .unwrap_or(id);

        let mut args = vec![COMMAND_UP.to_string(), identifier.to_string()];
        if let Some(source) = &config.source {
            args.push(flag(FLAG_ID, id));
            args.push(flag(
                FLAG_SOURCE,
                &format!("{}:{}", source.kind, source.source),
            ));
        }
        if let Some(ide) = &config.ide {
            args.push(flag(FLAG_IDE, ide));
        }
        if let Some(provider) = &config.provider {
            args.push(flag(FLAG_PROVIDER, provider));
        }
        if let Some(path) = &config.devcontainer_path {
            args.push(flag(FLAG_DEVCONTAINER_PATH, path));
        }
        args.extend(self.additional_flags.iter().cloned());
        for (key, value) in &config.provider_options {
            args.push(format!("{FLAG_PROVIDER_OPTION}={key}={value}"));
        }
        args.push(FLAG_JSON_LOG_OUTPUT.to_string());
        self.action(args)
    }

    pub fn stop(&self, id: &str) -> CliCommand {
        self.action(vec![
            COMMAND_STOP.to_string(),
            id.to_string(),
            FLAG_JSON_LOG_OUTPUT.to_string(),
        ])
    }

    pub fn rebuild(&self, id: &str) -> CliCommand {
        self.action(vec![
            COMMAND_UP.to_string(),
            id.to_string(),
            FLAG_JSON_LOG_OUTPUT.to_string(),
            FLAG_RECREATE.to_string(),
        ])
    }

    pub fn reset(&self, id: &str) -> CliCommand {
        self.action(vec![
            COMMAND_UP.to_string(),
            id.to_string(),
            FLAG_JSON_LOG_OUTPUT.to_string(),
            FLAG_RESET.to_string(),
        ])
    }

    pub fn remove(&self, id: &str, force: bool) -> CliCommand {
        let mut args = vec![
            COMMAND_DELETE.to_string(),
            id.to_string(),
            FLAG_JSON_LOG_OUTPUT.to_string(),
        ];
        if force {
            args.push(FLAG_FORCE.to_string());
        }
        self.action(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commands(debug: bool) -> WorkspaceCommands {
        let mut config = LaunchConfig::new("devpod");
        config.debug = debug;
        WorkspaceCommands::new(config)
    }

    #[test]
    fn start_existing_workspace_uses_id() {
        let cmd = commands(false).start("w1", &StartConfig::default());
        assert_eq!(cmd.args(), ["up", "w1", "--log-output=json"]);
    }

    #[test]
    fn start_new_workspace_uses_source_and_flags() {
        let mut config = StartConfig {
            source: Some(SourceConfig {
                kind: "git".into(),
                source: "github.com/org/repo".into(),
            }),
            ide: Some("vscode".into()),
            provider: Some("docker".into()),
            ..Default::default()
        };
        config
            .provider_options
            .insert("DOCKER_HOST".into(), "unix:///var/run/docker.sock".into());

        let cmd = commands(false)
            .with_additional_flags(vec!["--dotfiles=github.com/me/dots".into()])
            .start("repo", &config);
        assert_eq!(
            cmd.args(),
            [
                "up",
                "github.com/org/repo",
                "--id=repo",
                "--source=git:github.com/org/repo",
                "--ide=vscode",
                "--provider=docker",
                "--dotfiles=github.com/me/dots",
                "--provider-option=DOCKER_HOST=unix:///var/run/docker.sock",
                "--log-output=json",
            ]
        );
    }

    #[test]
    fn action_commands_append_debug_flag() {
        let cmd = commands(true).stop("w1");
        assert_eq!(cmd.args(), ["stop", "w1", "--log-output=json", "--debug"]);
    }

    #[test]
    fn queries_never_get_debug_flag() {
        let cmd = commands(true).list(true);
        assert_eq!(cmd.args(), ["list", "--output=json", "--skip-pro"]);
        let cmd = commands(true).status("w1");
        assert_eq!(cmd.args(), ["status", "w1", "--output=json"]);
    }

    #[test]
    fn rebuild_reset_and_remove() {
        let c = commands(false);
        assert_eq!(
            c.rebuild("w1").args(),
            ["up", "w1", "--log-output=json", "--recreate"]
        );
        assert_eq!(
            c.reset("w1").args(),
            ["up", "w1", "--log-output=json", "--reset"]
        );
        assert_eq!(
            c.remove("w1", true).args(),
            ["delete", "w1", "--log-output=json", "--force"]
        );
        assert_eq!(
            c.status_logs("w1").args(),
            ["status", "w1", "--log-output=json"]
        );
    }
}
