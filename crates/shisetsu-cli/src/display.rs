//! Terminal output: preset listing, batch previews and load summaries.

use arrow::record_batch::RecordBatch;
use arrow::util::pretty::pretty_format_batches;
use shisetsu_core::{LoadBatch, Status, WardConfig};

use crate::pipeline::LoadReport;

/// One line per preset: name, code, merge mode, scope and columns.
pub fn print_wards(wards: &[WardConfig]) {
    for ward in wards {
        let columns = ward
            .columns
            .iter()
            .map(|c| c.name())
            .collect::<Vec<_>>()
            .join(",");
        println!(
            "{:<10} {:<22} {:<12} {:<6} {}",
            ward.name,
            ward.code,
            format!("{:?}", ward.merge),
            format!("{:?}", ward.scope),
            columns
        );
    }
}

/// Pretty-print Arrow batches as a table.
pub fn print_batches(batches: &[RecordBatch]) -> anyhow::Result<()> {
    if batches.iter().all(|b| b.num_rows() == 0) {
        println!("(no rows)");
        return Ok(());
    }
    println!("{}", pretty_format_batches(batches)?);
    Ok(())
}

/// Counters of a finalized batch, for `--dry-run`.
pub fn print_batch_summary(batch: &LoadBatch) {
    let s = &batch.stats;
    println!("=== {} ===", batch.ward);
    println!("  {:<20} {}", "records", batch.len());
    println!("  {:<20} {}", "rows seen", s.rows_seen);
    println!("  {:<20} {}", "rows rejected", s.rows_rejected);
    println!("  {:<20} {}", "invalid divisions", s.invalid_divisions);
    println!("  {:<20} {}", "invalid statuses", s.invalid_statuses);
    println!("  {:<20} {}", "duplicate divisions", s.duplicate_divisions);
    println!("  {:<20} {}", "partitions", s.partitions);
    if batch.partial {
        println!("  (partial: collection stopped early)");
    }

    let cells_invalid = batch
        .records
        .iter()
        .flat_map(|r| r.reservation.values())
        .filter(|s| **s == Status::Invalid)
        .count();
    if cells_invalid > 0 {
        println!(
            "  {cells_invalid} cells hold {}; check the ward's status labels",
            Status::Invalid
        );
    }
    println!();
}

pub fn print_report(report: &LoadReport) {
    eprintln!(
        "  {}: {} records, {} removed, {} inserted in {:.2}s{}",
        report.ward,
        report.records,
        report.removed,
        report.inserted,
        report.elapsed_secs,
        if report.partial { " (partial)" } else { "" }
    );
    if report.stats.rows_rejected > 0 {
        eprintln!(
            "  {}: {} rows rejected (unparseable dates)",
            report.ward, report.stats.rows_rejected
        );
    }
}
