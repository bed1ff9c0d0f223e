use crate::context::Context;
use crate::output::{print_json, print_table};
use podshell_core::WorkspaceStatus;

pub fn run(ctx: &Context, json: bool) -> anyhow::Result<()> {
    let client = ctx.client()?;
    let rt = super::runtime()?;
    let workspaces = rt.block_on(client.list_all(ctx.config.skip_pro))?;
    ctx.store.set_workspaces(workspaces);
    let workspaces = ctx.store.get_all();

    if json {
        return print_json(&workspaces);
    }
    if workspaces.is_empty() {
        println!("No workspaces.");
        return Ok(());
    }

    let rows = workspaces
        .iter()
        .map(|ws| {
            vec![
                ws.id.to_string(),
                ws.provider
                    .as_ref()
                    .and_then(|p| p.name.clone())
                    .unwrap_or_else(|| "-".into()),
                ws.ide
                    .as_ref()
                    .and_then(|i| i.name.clone())
                    .unwrap_or_else(|| "-".into()),
                ws.source
                    .as_ref()
                    .and_then(|s| s.label())
                    .unwrap_or("-")
                    .to_string(),
                ws.status
                    .map(|s: WorkspaceStatus| s.to_string())
                    .unwrap_or_else(|| "-".into()),
                ws.last_used.clone().unwrap_or_else(|| "-".into()),
            ]
        })
        .collect();
    print_table(
        &["ID", "PROVIDER", "IDE", "SOURCE", "STATUS", "LAST USED"],
        rows,
    );
    Ok(())
}
