use colored::{ColoredString, Colorize};
use declarative::{ApplyResult, ApplySummary};

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

/// Colored label for a per-resource result
pub fn result_label(result: &ApplyResult) -> ColoredString {
    let label = format!("{:<9}", result.label());
    match result {
        ApplyResult::Created => label.green(),
        ApplyResult::Updated => label.cyan(),
        ApplyResult::NoChange => label.dimmed(),
        ApplyResult::Skipped { .. } => label.yellow(),
        ApplyResult::Failed { .. } => label.red(),
    }
}

/// One-line summary such as `3 created, 1 updated, 1 failed`
pub fn summary_line(summary: &ApplySummary) -> String {
    let parts: Vec<String> = [
        (summary.created, "created"),
        (summary.updated, "updated"),
        (summary.no_change, "unchanged"),
        (summary.skipped, "skipped"),
        (summary.failed, "failed"),
    ]
    .into_iter()
    .filter(|(n, _)| *n > 0)
    .map(|(n, label)| format!("{n} {label}"))
    .collect();

    if parts.is_empty() {
        "nothing to do".to_string()
    } else {
        parts.join(", ")
    }
}

/// Pad or cut `s` to exactly `width` characters
pub fn fit(s: &str, width: usize) -> String {
    let count = s.chars().count();
    if count <= width {
        format!("{s:<width$}")
    } else if width <= 3 {
        ".".repeat(width)
    } else {
        let head: String = s.chars().take(width - 3).collect();
        format!("{head}...")
    }
}

// ============================================================================
// Tests
// ============================================================================
