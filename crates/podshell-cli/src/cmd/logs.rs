use crate::context::Context;
use crate::output::print_event;
use anyhow::Context as _;
use podshell_core::ActionId;

pub fn run(ctx: &Context, action_id: &str, json: bool) -> anyhow::Result<()> {
    let action_id = ActionId::parse(action_id)?;
    let client = ctx.client()?;
    let replayed = client
        .replay_action(&action_id, |event| print_event(event, json))
        .with_context(|| format!("failed to read log of action {action_id}"))?;
    if replayed == 0 {
        anyhow::bail!("no log recorded for action {action_id}");
    }
    tracing::debug!(action_id = %action_id, events = replayed, "replayed action log");
    Ok(())
}
