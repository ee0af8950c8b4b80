//! Format cache statistics, the category tree, and query results as text.

use crate::cache::{ActivityPeriod, ActivityTarget, CacheSection, FileStatsView};
use crate::coordinator::{CacheStats, InvariantViolation};
use crate::service::WarmupReport;
use chrono::{DateTime, Utc};
use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::Table;
use owo_colors::OwoColorize;

/// Format a section heading with bold/underline.
pub fn format_section_heading(title: &str) -> String {
    format!("{}", title.bold().underline())
}

fn format_timestamp(ts: Option<DateTime<Utc>>) -> String {
    ts.map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "-".to_string())
}

fn section_row(name: &str, section: &CacheSection) -> Vec<String> {
    vec![
        name.to_string(),
        if section.enabled { "yes" } else { "no" }.to_string(),
        section.records.to_string(),
        format_timestamp(section.last_update),
    ]
}

/// Format cache introspection, with the warm-up outcome when known.
pub fn format_cache_stats_text(stats: &CacheStats, warmup: Option<&WarmupReport>) -> String {
    let mut out = String::new();
    out.push_str(&format!("{}\n\n", format_section_heading("Hierarchy")));
    out.push_str(&format!("  Nodes: {}\n", stats.hierarchy.nodes));
    out.push_str(&format!("  Max depth: {}\n", stats.hierarchy.max_depth));
    out.push_str(&format!(
        "  Last update: {}\n\n",
        format_timestamp(stats.hierarchy.last_update)
    ));

    out.push_str(&format!("{}\n\n", format_section_heading("Caches")));
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Cache", "Enabled", "Records", "Last update"]);
    table.add_row(section_row("post_counts", &stats.post_counts));
    table.add_row(section_row("activity", &stats.activity));
    table.add_row(section_row("file_stats", &stats.file_stats));
    out.push_str(&format!("{}\n", table));

    if let Some(report) = warmup {
        if !report.is_clean() {
            out.push_str(&format!("\n{}\n\n", format_section_heading("Warm-up failures")));
            for failure in &report.failures {
                out.push_str(&format!("  {}: {}\n", failure.metric, failure.reason));
            }
        }
    }
    out
}

/// One row of the tree view
#[derive(Debug, Clone)]
pub struct TreeRow {
    pub depth: u32,
    pub id: i64,
    pub name: String,
    pub direct_posts: u64,
    pub recursive_posts: u64,
    pub recursive_files: Option<u64>,
    pub recursive_bytes: Option<u64>,
}

pub fn format_tree_text(rows: &[TreeRow]) -> String {
    if rows.is_empty() {
        return "No categories.".to_string();
    }
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Category", "ID", "Posts", "Posts (tree)", "Files (tree)", "Bytes (tree)"]);
    let optional = |v: Option<u64>| v.map(|n| n.to_string()).unwrap_or_else(|| "-".to_string());
    for row in rows {
        table.add_row(vec![
            format!("{}{}", "  ".repeat(row.depth as usize), row.name),
            row.id.to_string(),
            row.direct_posts.to_string(),
            row.recursive_posts.to_string(),
            optional(row.recursive_files),
            optional(row.recursive_bytes),
        ]);
    }
    table.to_string()
}

pub fn format_activity_text(period: &ActivityPeriod) -> String {
    let target = match period.target {
        ActivityTarget::Category(id) if period.recursive => format!("Category {} (with subcategories)", id),
        ActivityTarget::Category(id) => format!("Category {}", id),
        ActivityTarget::AllCategories => "All categories".to_string(),
    };
    let mut out = String::new();
    out.push_str(&format!("{}\n\n", format_section_heading(&format!("Activity: {}", target))));
    out.push_str(&format!(
        "  Window: {} .. {}\n",
        period.period_start, period.period_end
    ));
    out.push_str(&format!("  Posts: {}\n", period.stats.total_posts));
    out.push_str(&format!("  Active days: {}\n", period.stats.active_days));
    out.push_str(&format!("  Busiest day: {}\n\n", period.stats.max_day_activity));

    if period.days.is_empty() {
        out.push_str("  No activity in this window.\n");
        return out;
    }
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Date", "Posts"]);
    for day in &period.days {
        table.add_row(vec![day.date.to_string(), day.count.to_string()]);
    }
    out.push_str(&format!("{}\n", table));
    out
}

pub fn format_file_stats_text(view: &FileStatsView) -> String {
    let scope = if view.recursive { " (with subcategories)" } else { "" };
    let mut out = String::new();
    out.push_str(&format!(
        "{}\n\n",
        format_section_heading(&format!("Files: category {}{}", view.category_id, scope))
    ));
    out.push_str(&format!("  Files: {}\n", view.file_count));
    out.push_str(&format!("  Total size: {} bytes\n", view.total_size));
    out
}

pub fn format_violations_text(violations: &[InvariantViolation]) -> String {
    if violations.is_empty() {
        return "All aggregates consistent.".to_string();
    }
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Metric", "Category", "Detail"]);
    for violation in violations {
        table.add_row(vec![
            violation.metric.to_string(),
            violation.node_id.to_string(),
            violation.detail.clone(),
        ]);
    }
    format!(
        "{}\n\n{}",
        format_section_heading(&format!("{} inconsistent aggregates", violations.len())),
        table
    )
}
