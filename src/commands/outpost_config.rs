use anyhow::Result;

use crate::Context;
use crate::cli::OutpostConfigArgs;
use crate::engine::outpost::update_outpost_config;
use crate::ui;

pub fn run(ctx: &Context, args: OutpostConfigArgs) -> Result<bool> {
    let settings = ctx.settings()?;
    let (catalog, _) = ctx.catalog()?;
    let client = ctx.client(&settings);

    let name = args
        .outpost_name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| catalog.outpost.name.clone());

    let outpost = update_outpost_config(&client, &catalog, &name)?;

    ui::success(&format!("Updated outpost {}", outpost.name));
    if !ctx.quiet {
        ui::kv("ID", &outpost.pk);
        for key in catalog.outpost.config.keys() {
            let value = outpost
                .config
                .get(key)
                .map(ToString::to_string)
                .unwrap_or_default();
            ui::kv(key, &value);
        }
    }
    Ok(true)
}
