use anyhow::{Context as _, Result};
use colored::Colorize;

use crate::Context;
use crate::engine::outpost::OutpostSummary;
use crate::ui;

pub fn run(ctx: &Context, json: bool) -> Result<bool> {
    let settings = ctx.settings()?;
    let client = ctx.client(&settings);

    if json {
        let records = client.list_outposts_raw().context("Failed to list outposts")?;
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(true);
    }

    let outposts = client.list_outposts().context("Failed to list outposts")?;
    ui::header(&format!("{} Outposts", outposts.len()));

    for summary in outposts.iter().map(OutpostSummary::from) {
        println!();
        println!("  {} {}", summary.name.bold(), format!("[{}]", summary.outpost_type).dimmed());
        ui::kv("ID", &summary.id);
        let providers: Vec<String> = summary.providers.iter().map(u64::to_string).collect();
        ui::kv(
            "Providers",
            &if providers.is_empty() {
                "none".to_string()
            } else {
                providers.join(", ")
            },
        );
        ui::kv("Host", summary.authentik_host.as_deref().unwrap_or("-"));
        ui::kv(
            "Browser host",
            summary.authentik_host_browser.as_deref().unwrap_or("-"),
        );
    }

    if outposts.is_empty() {
        ui::info("No outposts found");
    }
    Ok(true)
}
