use crate::context::Context;
use crate::output::print_json;
use clap::Subcommand;
use podshell_core::config::WarnLevel;
use podshell_core::paths;

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Show the effective configuration
    Show,

    /// Validate the config for common mistakes
    Validate,
}

pub fn run(ctx: &Context, subcmd: ConfigSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        ConfigSubcommand::Show => show(ctx, json),
        ConfigSubcommand::Validate => validate(ctx, json),
    }
}

fn show(ctx: &Context, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(&ctx.config);
    }
    println!("# {}", paths::config_path(&ctx.data_dir).display());
    print!("{}", serde_yaml::to_string(&ctx.config)?);
    Ok(())
}

fn validate(ctx: &Context, json: bool) -> anyhow::Result<()> {
    let warnings = ctx.config.validate();

    if json {
        let value = serde_json::json!({
            "warnings": warnings,
        });
        print_json(&value)?;
    } else if warnings.is_empty() {
        println!("Config is valid. No warnings.");
    } else {
        for w in &warnings {
            let prefix = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            println!("[{prefix}] {}", w.message);
        }
    }

    if warnings.iter().any(|w| w.level == WarnLevel::Error) {
        anyhow::bail!("config validation found errors");
    }
    Ok(())
}
