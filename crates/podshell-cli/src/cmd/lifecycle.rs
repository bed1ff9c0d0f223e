use crate::context::Context;
use crate::output::{print_event, print_json};
use podshell_core::{
    ActionStatus, HandlerId, StartAction, StreamListener, Workspace, WorkspaceAction, WorkspaceId,
};
use podshell_launcher::{SourceConfig, StartConfig, StreamEvent};
use std::sync::Arc;
use tokio_stream::StreamExt;

const SOURCE_KINDS: &[&str] = &["git", "local", "image"];
const CLI_STREAM_ID: &str = "podshell-cli";

pub fn start_config(
    source: Option<&str>,
    ide: Option<String>,
    provider: Option<String>,
) -> anyhow::Result<StartConfig> {
    let source = source.map(parse_source).transpose()?;
    Ok(StartConfig {
        source,
        ide,
        provider,
        ..Default::default()
    })
}

/// `<kind>:<source>`, e.g. `git:https://github.com/org/repo`.
fn parse_source(raw: &str) -> anyhow::Result<SourceConfig> {
    match raw.split_once(':') {
        Some((kind, source)) if SOURCE_KINDS.contains(&kind) && !source.is_empty() => {
            Ok(SourceConfig {
                kind: kind.to_string(),
                source: source.to_string(),
            })
        }
        _ => anyhow::bail!(
            "invalid source '{raw}': expected <{}>:<source>",
            SOURCE_KINDS.join("|")
        ),
    }
}

/// Run one lifecycle action through the store, streaming its log lines,
/// and wait until it has been archived. Ctrl-C kills the external process.
pub fn run(ctx: &Context, id: &str, action: WorkspaceAction, json: bool) -> anyhow::Result<()> {
    let client = ctx.client()?;
    let rt = super::runtime()?;
    let id = WorkspaceId::new(id);
    let name = action.name();
    let store = ctx.store.clone();
    if store.get(&id).is_none() {
        store.set_workspace(&id, Workspace::new(id.clone()));
    }

    let finished = rt.block_on(async {
        let mut changes = store.changes();
        let listener: StreamListener = Arc::new(move |event: &StreamEvent| print_event(event, json));
        let action_fn = client.action_fn(
            store.clone(),
            id.clone(),
            action,
            HandlerId::new(CLI_STREAM_ID),
            Some(listener),
        );
        let action_id = store.start_action(StartAction::new(name, id.clone(), action_fn));

        let mut interrupted = false;
        while store.get_current_action(&id).is_some() {
            tokio::select! {
                change = changes.next() => {
                    if change.is_none() {
                        break;
                    }
                }
                _ = tokio::signal::ctrl_c(), if !interrupted => {
                    interrupted = true;
                    eprintln!("interrupted, stopping {name} of {id}");
                    if let Err(e) = client.cancel_action(&action_id).await {
                        tracing::warn!(error = %e, "failed to cancel running command");
                    }
                }
            }
        }

        store
            .get_workspace_actions(&id)
            .into_iter()
            .find(|a| a.id == action_id)
    });

    let Some(done) = finished else {
        anyhow::bail!("{name} of {id} was not recorded");
    };

    if json {
        print_json(&done)?;
    } else if done.status == ActionStatus::Success {
        println!("{name} {id}: done");
    }

    match done.status {
        ActionStatus::Success => Ok(()),
        ActionStatus::Error => {
            let message = done.error.map(|e| e.message).unwrap_or_default();
            anyhow::bail!("{name} {id} failed: {message}")
        }
        ActionStatus::Cancelled => anyhow::bail!("{name} {id} was cancelled"),
        ActionStatus::Pending => anyhow::bail!("{name} {id} did not finish"),
    }
}
