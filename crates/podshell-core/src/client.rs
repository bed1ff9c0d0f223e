//! Workspace operations on top of the launcher, the single-flight command
//! cache and the action logs.
//!
//! Every lifecycle operation goes through one single-flight path:
//! a caller either starts the command for `(workspace, action)` or joins the
//! one already running, attaches its handler under its own stream id, and
//! awaits the shared settlement. Each event delivered to a caller is also
//! appended to that caller's action log.

use std::path::PathBuf;
use std::sync::Arc;

use futures::FutureExt;
use podshell_launcher::{
    CliCommand, Failure, FailureKind, Operation, StartConfig, StreamEvent, WorkspaceCommands,
};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::action::{ActionContext, ActionFn, ActionId, ActionName, ActionSnapshot};
use crate::action_log::ActionLogs;
use crate::command_cache::{CacheKey, CommandCache};
use crate::error::Result;
use crate::hub::{Handler, HandlerId, Subscription};
use crate::store::WorkspaceStore;
use crate::workspace::{Workspace, WorkspaceId, WorkspaceStatus};

pub type StreamListener = Arc<dyn Fn(&StreamEvent) + Send + Sync>;

type OpResult<T> = std::result::Result<T, Failure>;

/// Who is asking: the workspace, the action on whose behalf the command
/// runs, and the stream id the caller's handler is registered under.
#[derive(Debug, Clone)]
pub struct ClientContext {
    pub id: WorkspaceId,
    pub action_id: ActionId,
    pub stream_id: HandlerId,
}

/// A lifecycle operation together with its arguments.
#[derive(Debug, Clone)]
pub enum WorkspaceAction {
    Start(StartConfig),
    Stop,
    Rebuild,
    Reset,
    Remove { force: bool },
    CheckStatus,
}

impl WorkspaceAction {
    pub fn name(&self) -> ActionName {
        match self {
            WorkspaceAction::Start(_) => ActionName::Start,
            WorkspaceAction::Stop => ActionName::Stop,
            WorkspaceAction::Rebuild => ActionName::Rebuild,
            WorkspaceAction::Reset => ActionName::Reset,
            WorkspaceAction::Remove { .. } => ActionName::Remove,
            WorkspaceAction::CheckStatus => ActionName::CheckStatus,
        }
    }
}

#[derive(Debug, Deserialize)]
struct StatusOutput {
    #[serde(default)]
    state: Option<WorkspaceStatus>,
}

struct ClientInner {
    commands: WorkspaceCommands,
    cache: CommandCache<WorkspaceId>,
    logs: ActionLogs,
}

#[derive(Clone)]
pub struct WorkspacesClient {
    inner: Arc<ClientInner>,
}

impl WorkspacesClient {
    pub fn new(commands: WorkspaceCommands, logs: ActionLogs) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                commands,
                cache: CommandCache::new(),
                logs,
            }),
        }
    }

    pub fn commands(&self) -> &WorkspaceCommands {
        &self.inner.commands
    }

    pub fn cache(&self) -> &CommandCache<WorkspaceId> {
        &self.inner.cache
    }

    pub fn logs(&self) -> &ActionLogs {
        &self.inner.logs
    }

    // ─── Queries ──────────────────────────────────────────────────────────

    /// Every workspace the CLI knows about. Entries without an id are
    /// dropped.
    pub async fn list_all(&self, skip_pro: bool) -> OpResult<Vec<Workspace>> {
        let output = self.inner.commands.list(skip_pro).run().await?;
        if !output.is_ok() {
            return Err(exit_failure("failed to list workspaces", output.code, &output.stderr));
        }

        let entries: Vec<serde_json::Value> = serde_json::from_str(output.stdout.trim())
            .map_err(|e| parse_failure("workspace list", e))?;
        let mut workspaces = Vec::with_capacity(entries.len());
        for entry in entries {
            if !entry.get("id").is_some_and(serde_json::Value::is_string) {
                debug!(entry = %entry, "skipping workspace without id");
                continue;
            }
            match serde_json::from_value::<Workspace>(entry) {
                Ok(ws) => workspaces.push(ws),
                Err(e) => warn!(error = %e, "skipping unreadable workspace entry"),
            }
        }
        Ok(workspaces)
    }

    pub async fn get_status(&self, id: &WorkspaceId) -> OpResult<Option<WorkspaceStatus>> {
        let output = self.inner.commands.status(id.as_str()).run().await?;
        if !output.is_ok() {
            return Err(exit_failure(
                &format!("failed to get status of {id}"),
                output.code,
                &output.stderr,
            ));
        }
        let parsed: StatusOutput = serde_json::from_str(output.stdout.trim())
            .map_err(|e| parse_failure("workspace status", e))?;
        Ok(parsed.state)
    }

    // ─── Lifecycle ────────────────────────────────────────────────────────

    pub async fn start(
        &self,
        config: &StartConfig,
        listener: Option<StreamListener>,
        ctx: &ClientContext,
    ) -> OpResult<Option<WorkspaceStatus>> {
        let cmd = self.inner.commands.start(ctx.id.as_str(), config);
        self.exec_action_cmd(ActionName::Start, cmd, listener, ctx).await?;
        self.get_status(&ctx.id).await
    }

    pub async fn stop(
        &self,
        listener: Option<StreamListener>,
        ctx: &ClientContext,
    ) -> OpResult<Option<WorkspaceStatus>> {
        let cmd = self.inner.commands.stop(ctx.id.as_str());
        self.exec_action_cmd(ActionName::Stop, cmd, listener, ctx).await?;
        self.get_status(&ctx.id).await
    }

    pub async fn rebuild(
        &self,
        listener: Option<StreamListener>,
        ctx: &ClientContext,
    ) -> OpResult<Option<WorkspaceStatus>> {
        let cmd = self.inner.commands.rebuild(ctx.id.as_str());
        self.exec_action_cmd(ActionName::Rebuild, cmd, listener, ctx).await?;
        self.get_status(&ctx.id).await
    }

    pub async fn reset(
        &self,
        listener: Option<StreamListener>,
        ctx: &ClientContext,
    ) -> OpResult<Option<WorkspaceStatus>> {
        let cmd = self.inner.commands.reset(ctx.id.as_str());
        self.exec_action_cmd(ActionName::Reset, cmd, listener, ctx).await?;
        self.get_status(&ctx.id).await
    }

    pub async fn remove(
        &self,
        force: bool,
        listener: Option<StreamListener>,
        ctx: &ClientContext,
    ) -> OpResult<()> {
        let cmd = self.inner.commands.remove(ctx.id.as_str(), force);
        self.exec_action_cmd(ActionName::Remove, cmd, listener, ctx).await
    }

    pub async fn check_status(
        &self,
        listener: Option<StreamListener>,
        ctx: &ClientContext,
    ) -> OpResult<()> {
        let cmd = self.inner.commands.status_logs(ctx.id.as_str());
        self.exec_action_cmd(ActionName::CheckStatus, cmd, listener, ctx).await
    }

    async fn exec_action_cmd(
        &self,
        name: ActionName,
        cmd: CliCommand,
        listener: Option<StreamListener>,
        ctx: &ClientContext,
    ) -> OpResult<()> {
        let key = CacheKey::new(ctx.id.clone(), name);
        let logs = self.inner.logs.clone();
        let action_id = ctx.action_id.clone();
        let handler = Handler::with_id(ctx.stream_id.clone(), move |event: &StreamEvent| {
            if let Err(e) = logs.write(&action_id, event) {
                warn!(action_id = %action_id, error = %e, "failed to write action log");
            }
            if let Some(listener) = &listener {
                listener(event);
            }
        });

        let (entry, joined) =
            self.inner
                .cache
                .get_or_connect(key.clone(), Some(ctx.action_id.clone()), move || {
                    Arc::new(cmd) as Arc<dyn Operation>
                });
        if joined {
            info!(workspace = %ctx.id, action = %name, action_id = %ctx.action_id, "joined running command");
        }
        entry.stream.stream(Some(handler));

        let result = entry.operation.clone().await;
        if !joined {
            self.inner.cache.clear(&key);
        }
        result
    }

    // ─── Streams and logs ─────────────────────────────────────────────────

    /// Attach `listener` to the live run behind `action`, replaying what it
    /// produced so far. No-op when nothing is running for it.
    pub fn subscribe(
        &self,
        action: &ActionSnapshot<WorkspaceId>,
        stream_id: HandlerId,
        listener: StreamListener,
    ) -> Subscription {
        let key = CacheKey::new(action.target_id.clone(), action.name);
        match self.inner.cache.get(&key) {
            Some(entry) => entry.stream.stream(Some(Handler::with_id(
                stream_id,
                move |event: &StreamEvent| listener(event),
            ))),
            None => Subscription::noop(),
        }
    }

    /// Feed the persisted log of `action_id` to `listener`. Returns the
    /// number of events replayed.
    pub fn replay_action(
        &self,
        action_id: &ActionId,
        mut listener: impl FnMut(&StreamEvent),
    ) -> Result<usize> {
        let events = self.inner.logs.read(action_id)?;
        for event in &events {
            listener(event);
        }
        Ok(events.len())
    }

    /// Kill the external process started on behalf of `action_id`, if it is
    /// still running.
    pub async fn cancel_action(&self, action_id: &ActionId) -> OpResult<()> {
        match self.inner.cache.find_by_action(action_id) {
            Some(entry) => {
                info!(action_id = %action_id, "cancelling running command");
                entry.cancel().await
            }
            None => {
                debug!(action_id = %action_id, "no running command to cancel");
                Ok(())
            }
        }
    }

    pub fn action_log_file(&self, action_id: &ActionId) -> PathBuf {
        self.inner.logs.path(action_id)
    }

    // ─── Store integration ────────────────────────────────────────────────

    /// The operation function for `store.start_action`: runs `action` for
    /// `id` and records the outcome in `store`.
    pub fn action_fn(
        &self,
        store: WorkspaceStore,
        id: WorkspaceId,
        action: WorkspaceAction,
        stream_id: HandlerId,
        listener: Option<StreamListener>,
    ) -> ActionFn {
        let client = self.clone();
        Box::new(move |action_ctx: ActionContext| {
            async move {
                let ctx = ClientContext {
                    id: id.clone(),
                    action_id: action_ctx.id,
                    stream_id,
                };
                match action {
                    WorkspaceAction::Start(config) => {
                        let status = client.start(&config, listener, &ctx).await?;
                        store.set_status(&id, status);
                    }
                    WorkspaceAction::Stop => {
                        let status = client.stop(listener, &ctx).await?;
                        store.set_status(&id, status);
                    }
                    WorkspaceAction::Rebuild => {
                        let status = client.rebuild(listener, &ctx).await?;
                        store.set_status(&id, status);
                    }
                    WorkspaceAction::Reset => {
                        let status = client.reset(listener, &ctx).await?;
                        store.set_status(&id, status);
                    }
                    WorkspaceAction::Remove { force } => {
                        client.remove(force, listener, &ctx).await?;
                        store.remove_workspace(&id);
                    }
                    WorkspaceAction::CheckStatus => {
                        client.check_status(listener, &ctx).await?;
                        let status = client.get_status(&id).await?;
                        store.set_status(&id, status);
                    }
                }
                Ok(())
            }
            .boxed()
        })
    }
}

fn exit_failure(context: &str, code: Option<i32>, stderr: &str) -> Failure {
    let reason = match code {
        Some(code) => format!("exit code: {code}"),
        None => "terminated by signal".to_string(),
    };
    let stderr = stderr.trim();
    let message = if stderr.is_empty() {
        format!("{context}: {reason}")
    } else {
        format!("{context}: {stderr}")
    };
    Failure::new(message)
        .with_kind(FailureKind::Exit)
        .with_reason(reason)
}

fn parse_failure(what: &str, e: serde_json::Error) -> Failure {
    Failure::new(format!("failed to parse {what}: {e}")).with_kind(FailureKind::Parse)
}
