use crate::context::Context;
use crate::output::print_json;
use podshell_core::WorkspaceId;

pub fn run(ctx: &Context, id: &str, json: bool) -> anyhow::Result<()> {
    let client = ctx.client()?;
    let rt = super::runtime()?;
    let id = WorkspaceId::new(id);
    let status = rt.block_on(client.get_status(&id))?;

    if json {
        print_json(&serde_json::json!({ "id": id, "state": status }))?;
    } else {
        match status {
            Some(status) => println!("{id}: {status}"),
            None => println!("{id}: unknown"),
        }
    }
    Ok(())
}
