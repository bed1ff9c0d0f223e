use crate::context::Context;
use crate::output::{print_json, print_table, timestamp};
use podshell_core::{ActionSnapshot, WorkspaceId};

pub fn run(ctx: &Context, id: Option<&str>, json: bool) -> anyhow::Result<()> {
    // Newest first, whether filtered or not.
    let actions: Vec<ActionSnapshot<WorkspaceId>> = match id {
        Some(id) => ctx.store.get_workspace_actions(&WorkspaceId::new(id)),
        None => {
            let view = ctx.store.get_all_actions();
            view.active
                .into_iter()
                .chain(view.history.into_iter().rev())
                .collect()
        }
    };

    if json {
        return print_json(&actions);
    }
    if actions.is_empty() {
        println!("No recorded actions.");
        return Ok(());
    }

    let rows = actions
        .iter()
        .map(|a| {
            vec![
                a.id.to_string(),
                a.target_id.to_string(),
                a.name.to_string(),
                a.status.to_string(),
                timestamp(Some(a.created_at)),
                timestamp(a.finished_at),
                a.error
                    .as_ref()
                    .map(|e| e.message.lines().next().unwrap_or_default().to_string())
                    .unwrap_or_default(),
            ]
        })
        .collect();
    print_table(
        &["ID", "WORKSPACE", "ACTION", "STATUS", "STARTED", "FINISHED", "ERROR"],
        rows,
    );
    Ok(())
}
