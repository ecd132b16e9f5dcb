use anyhow::Result;
use colored::Colorize;
use declarative::{MembershipCheck, StepStatus};

use crate::Context;
use crate::cli::ReconcileArgs;
use crate::engine::{ReconcileOptions, Reconciler, ResourceOutcome, RunReport};
use crate::ui;

pub fn run(ctx: &Context, args: ReconcileArgs) -> Result<bool> {
    let settings = ctx.settings()?;
    let (catalog, source) = ctx.catalog()?;
    log::info!("Using catalog {source} ({} services)", catalog.services.len());

    let mut options = ReconcileOptions::from_catalog(&catalog);
    options.mode = args.mode;
    if let Some(detach) = args.detach_override() {
        options.detach_conflicts = detach;
    }
    options.outpost_id = args.outpost_id.filter(|id| !id.trim().is_empty());
    if let Some(name) = args.outpost_name.filter(|n| !n.trim().is_empty()) {
        options.outpost_name = name;
    }
    options.update_outpost_config = args.outpost_config;
    options.verify = args.verify;
    options.verify_attempts = args.verify_attempts.max(1);

    let client = ctx.client(&settings);
    let report = Reconciler::new(&client, &catalog, options).run();

    if !ctx.quiet {
        print_report(&report);
    }

    if !report.is_success() {
        let step = report.pipeline.aborted_at.as_deref().unwrap_or("unknown step");
        ui::error(&format!("Reconciliation aborted at: {step}"));
    } else if args.strict && !report.is_complete() {
        ui::error("Reconciliation finished with failures (--strict)");
    }
    Ok(exit_ok(&report, args.strict))
}

/// Whether a finished run exits 0. An aborted run always fails; failed
/// resources and optional steps fail the run only under `strict`.
pub fn exit_ok(report: &RunReport, strict: bool) -> bool {
    report.is_success() && (!strict || report.is_complete())
}

fn print_report(report: &RunReport) {
    ui::header("Reconciliation Report");

    for resource in &report.resources {
        print_resource(resource);
    }

    println!();
    if let (Some(id), Some(name)) = (&report.outpost_id, &report.outpost_name) {
        ui::kv("Outpost", &format!("{name} ({id})"));
    }
    if !report.assigned.is_empty() {
        let ids: Vec<String> = report.assigned.iter().map(u64::to_string).collect();
        ui::kv("Assigned", &ids.join(", "));
    }
    if let Some(check) = &report.membership {
        let text = match check {
            MembershipCheck::Exact => "exact".green(),
            MembershipCheck::Reordered => "reordered".green(),
            MembershipCheck::Mismatch { .. } => "mismatch".yellow(),
        };
        ui::kv("Echo", &text.to_string());
    }
    if let Some(verified) = report.verified {
        let text = if verified { "converged".green() } else { "not converged".red() };
        ui::kv("Verify", &text.to_string());
    }
    ui::kv("Summary", &ui::summary_line(&report.summary));

    for step in report.pipeline.failures() {
        if let StepStatus::Failed { error } = &step.status {
            ui::dim(&format!("{} ({}): {error}", step.name, step.outcome));
        }
    }

    println!();
    if report.is_complete() {
        ui::success("Reconciliation complete");
    } else if report.is_success() {
        ui::warn("Reconciliation finished with failures");
    }
}

/// One table row: result, kind, name, id or reason
pub fn print_resource(resource: &ResourceOutcome) {
    let detail = match &resource.result {
        declarative::ApplyResult::Failed { error } => error.red().to_string(),
        declarative::ApplyResult::Skipped { reason } => reason.dimmed().to_string(),
        _ => resource.id.clone().unwrap_or_default().dimmed().to_string(),
    };
    println!(
        "  {} {} {} {}",
        ui::result_label(&resource.result),
        ui::fit(resource.kind.label(), 15).dimmed(),
        ui::fit(&resource.name, 24),
        detail
    );
}
