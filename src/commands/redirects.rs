use anyhow::Result;

use crate::Context;
use crate::commands::reconcile::print_resource;
use crate::engine::redirects::RedirectFixer;
use crate::ui;

pub fn run(ctx: &Context) -> Result<bool> {
    let settings = ctx.settings()?;
    let (catalog, _) = ctx.catalog()?;
    let client = ctx.client(&settings);

    let report = RedirectFixer::new(&client, &catalog).run()?;

    if !ctx.quiet {
        ui::header("Redirect Fixes");
        for resource in &report.resources {
            print_resource(resource);
        }
        println!();
        ui::kv("Summary", &ui::summary_line(&report.summary));
    }

    if report.is_success() {
        ui::success("Redirects are correct");
    } else {
        ui::error(&format!("{} resource(s) could not be fixed", report.summary.failed));
    }
    Ok(report.is_success())
}
