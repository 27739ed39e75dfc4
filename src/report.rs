//! Result rendering: plain-text tables for the terminal and a markdown
//! export.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;

use crate::model::TrialRecord;
use crate::pricing;

struct Row<'a> {
    record: &'a TrialRecord,
    primary: f64,
    cost: f64,
    efficiency: f64,
}

fn rows<'a>(records: &'a [TrialRecord], primary: &str) -> Vec<Row<'a>> {
    let mut rows: Vec<Row<'a>> = records
        .iter()
        .filter(|r| r.error.is_none())
        .map(|record| {
            let primary = record.metrics.get(primary).copied().unwrap_or(0.0);
            // Recomputed from the infra spec so records persisted before a
            // price change still render.
            let cost = pricing::infra_cost(&record.cloud, &record.infra);
            let efficiency = if cost > 0.0 { primary / cost } else { 0.0 };
            Row {
                record,
                primary,
                cost,
                efficiency,
            }
        })
        .collect();
    rows.sort_by(|a, b| b.primary.total_cmp(&a.primary));
    rows
}

fn config_summary(record: &TrialRecord) -> String {
    record
        .config
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Print the results table and best-configuration summary to stdout.
pub fn show_results(records: &[TrialRecord], primary: &str, title: &str) {
    let rows = rows(records, primary);
    if rows.is_empty() {
        println!("No results for {title}");
        return;
    }

    println!("{}", "=".repeat(100));
    println!("{title}");
    println!("{}", "=".repeat(100));
    println!(
        "{:>3} {:<28} {:>12} {:>10} {:>8}  config",
        "#", "infra", primary, "cost/mo", "eff"
    );
    println!("{}", "-".repeat(100));
    for (i, row) in rows.iter().enumerate() {
        println!(
            "{:>3} {:<28} {:>12.0} {:>10.0} {:>8.2}  {}",
            i + 1,
            row.record.infra.summary(),
            row.primary,
            row.cost,
            row.efficiency,
            config_summary(row.record),
        );
    }
    println!("{}", "-".repeat(100));
    println!("Total: {} results", rows.len());

    if let Some(best) = rows.first() {
        println!(
            "\nBest by {primary}:        {:>12.0} [{} | {}]",
            best.primary,
            best.record.infra.summary(),
            config_summary(best.record)
        );
    }
    if let Some(best) = rows
        .iter()
        .max_by(|a, b| a.efficiency.total_cmp(&b.efficiency))
    {
        println!(
            "Best by cost efficiency: {:>12.2} [{} | {}]",
            best.efficiency,
            best.record.infra.summary(),
            config_summary(best.record)
        );
    }
}

/// Render the markdown report and write it to `path`.
pub fn write_markdown(records: &[TrialRecord], primary: &str, path: &Path) -> Result<()> {
    let rows = rows(records, primary);
    if rows.is_empty() {
        return Ok(());
    }

    let title = rows
        .first()
        .map(|r| format!("{} on {}", r.record.service, r.record.cloud))
        .unwrap_or_default();

    let mut lines = vec![
        format!("# Benchmark results — {title}"),
        String::new(),
        format!("Generated: {}", Utc::now().format("%Y-%m-%d %H:%M:%S UTC")),
        String::new(),
        "## Results".to_string(),
        String::new(),
        format!("| # | Infra | {primary} | Cost ₽/mo | Efficiency | Config |"),
        "|--:|-------|----------:|----------:|-----------:|--------|".to_string(),
    ];
    for (i, row) in rows.iter().enumerate() {
        lines.push(format!(
            "| {} | {} | {:.0} | {:.0} | {:.2} | `{}` |",
            i + 1,
            row.record.infra.summary(),
            row.primary,
            row.cost,
            row.efficiency,
            config_summary(row.record),
        ));
    }

    lines.push(String::new());
    lines.push("## Best configurations".to_string());
    lines.push(String::new());
    if let Some(best) = rows.first() {
        lines.push(format!(
            "- **Best by {primary}:** {:.0} — `{} | {}`",
            best.primary,
            best.record.infra.summary(),
            config_summary(best.record)
        ));
    }
    if let Some(best) = rows
        .iter()
        .max_by(|a, b| a.efficiency.total_cmp(&b.efficiency))
    {
        lines.push(format!(
            "- **Best by cost efficiency:** {:.2} — `{} | {}`",
            best.efficiency,
            best.record.infra.summary(),
            config_summary(best.record)
        ));
    }
    lines.push(String::new());

    std::fs::write(path, lines.join("\n"))
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}
