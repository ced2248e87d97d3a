//! Ward pipeline: collect pages, aggregate them into one batch, load it.

use std::time::Instant;

use anyhow::Context;
use shisetsu_core::{Aggregator, AggregateStats, Collector, LoadBatch, MergeMode, WardConfig};
use shisetsu_store::LoadSink;
use tracing::{info, warn};

#[derive(Debug)]
pub struct LoadReport {
    pub ward: String,
    pub records: usize,
    pub removed: usize,
    pub inserted: usize,
    pub partial: bool,
    pub stats: AggregateStats,
    pub elapsed_secs: f64,
}

/// Drain `collector` into a finalized batch.
///
/// A collector failure stops collection but not the batch: what was gathered
/// so far is finalized and flagged `partial`.
pub fn collect_batch(
    config: &WardConfig,
    collector: &mut dyn Collector,
    year: i32,
) -> anyhow::Result<LoadBatch> {
    let mut aggregator = Aggregator::new(config, year);
    let mut pages = 0usize;
    let mut partial = false;

    loop {
        let page = match collector.next_page() {
            Ok(Some(page)) => page,
            Ok(None) => break,
            Err(e) => {
                warn!(ward = %config.name, pages, error = %e, "collection stopped early; loading partial batch");
                partial = true;
                break;
            }
        };
        pages += 1;
        match (config.merge, page.partition) {
            (MergeMode::Partitioned, Some(label)) => {
                aggregator.accumulate_partitioned(&label, page.rows);
            }
            _ => {
                aggregator.accumulate(page.rows);
            }
        }
    }

    let mut batch = aggregator
        .finalize()
        .with_context(|| format!("aggregating ward {} ({pages} pages)", config.name))?;
    batch.partial = partial;
    Ok(batch)
}

/// Replace the ward's scope in `sink` with `batch`.
pub fn load_batch(
    config: &WardConfig,
    batch: &LoadBatch,
    sink: &mut dyn LoadSink,
) -> anyhow::Result<(usize, usize)> {
    let scope = config.load_scope();
    let transactional = sink.is_transactional();
    let outcome = sink
        .replace_all(&scope, batch, &config.columns)
        .with_context(|| {
            let state = if transactional {
                "rolled back, previous rows kept"
            } else {
                "scope may be left empty, rerun the load"
            };
            format!(
                "loading {} {} batch of ward {} into scope {scope}: {state}",
                batch.len(),
                if batch.partial { "partial" } else { "full" },
                config.name,
            )
        })?;
    Ok((outcome.removed, outcome.inserted))
}

/// Collect, aggregate and load one ward end to end.
pub fn run_ward(
    config: &WardConfig,
    collector: &mut dyn Collector,
    year: i32,
    sink: &mut dyn LoadSink,
) -> anyhow::Result<LoadReport> {
    let start = Instant::now();

    let batch = collect_batch(config, collector, year)?;
    let (removed, inserted) = load_batch(config, &batch, sink)?;

    let report = LoadReport {
        ward: config.name.clone(),
        records: batch.len(),
        removed,
        inserted,
        partial: batch.partial,
        stats: batch.stats,
        elapsed_secs: start.elapsed().as_secs_f64(),
    };
    if report.partial {
        warn!(ward = %report.ward, inserted, "partial batch loaded");
    }
    info!(
        ward = %report.ward,
        removed,
        inserted,
        elapsed_secs = report.elapsed_secs,
        "ward loaded"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shisetsu_core::{CollectError, Division, Page, ScrapedRow, Status};
    use shisetsu_store::FlatFileSink;

    fn row(institution: &str, date: &str, division: &str, status: &str) -> ScrapedRow {
        ScrapedRow {
            building: "区民センター".into(),
            institution: institution.into(),
            date: date.into(),
            day_of_week: "月".into(),
            division: division.into(),
            status: status.into(),
            institution_id: None,
        }
    }

    fn page(partition: Option<&str>, rows: Vec<ScrapedRow>) -> Page {
        Page {
            partition: partition.map(str::to_string),
            rows,
        }
    }

    struct Failing {
        pages: std::vec::IntoIter<Page>,
    }

    impl Collector for Failing {
        fn next_page(&mut self) -> Result<Option<Page>, CollectError> {
            match self.pages.next() {
                Some(page) => Ok(Some(page)),
                None => Err(CollectError::Timeout("calendar table".into())),
            }
        }
    }

    #[test]
    fn toshima_passes_are_zipped_and_loaded() {
        let config = WardConfig::preset("toshima").unwrap();
        let mut collector = vec![
            page(Some("午前"), vec![row("音楽室", "5/1", "午前", "○"), row("音楽室", "5/2", "午前", "×")]),
            page(Some("午後"), vec![row("音楽室", "5/1", "午後", "×"), row("音楽室", "5/2", "午後", "○")]),
        ]
        .into_iter();
        let tmp = tempfile::TempDir::new().unwrap();
        let mut sink = FlatFileSink::new(tmp.path().join("toshima.tsv"));

        let report = run_ward(&config, &mut collector, 2023, &mut sink).unwrap();
        assert_eq!(report.records, 2);
        assert_eq!(report.inserted, 2);
        assert!(!report.partial);

        let rows = sink.read_rows().unwrap();
        assert_eq!(rows[0].record.reservation.len(), 2);
        assert_eq!(
            rows[0].record.reservation.get(&Division::Morning),
            Some(&Status::Vacant)
        );
    }

    #[test]
    fn collector_failure_loads_a_partial_batch() {
        let config = WardConfig::preset("edogawa").unwrap();
        let mut collector = Failing {
            pages: vec![page(None, vec![row("体育室", "4/1", "午前", "")])].into_iter(),
        };
        let tmp = tempfile::TempDir::new().unwrap();
        let mut sink = FlatFileSink::new(tmp.path().join("edogawa.tsv"));

        let report = run_ward(&config, &mut collector, 2023, &mut sink).unwrap();
        assert!(report.partial);
        assert_eq!(report.inserted, 1);
        assert_eq!(sink.read_rows().unwrap().len(), 1);
    }

    #[test]
    fn misaligned_passes_load_nothing() {
        let config = WardConfig::preset("toshima").unwrap();
        let mut collector = vec![
            page(Some("午前"), vec![row("音楽室", "5/1", "午前", "○"), row("音楽室", "5/2", "午前", "○")]),
            page(Some("午後"), vec![row("音楽室", "5/1", "午後", "○")]),
        ]
        .into_iter();
        let tmp = tempfile::TempDir::new().unwrap();
        let mut sink = FlatFileSink::new(tmp.path().join("toshima.tsv"));

        let err = run_ward(&config, &mut collector, 2023, &mut sink).unwrap_err();
        assert!(format!("{err:#}").contains("toshima"));
        assert!(!sink.path().exists());
    }

    #[test]
    fn sink_failure_names_the_ward_and_batch_state() {
        let config = WardConfig::preset("edogawa").unwrap();
        let tmp = tempfile::TempDir::new().unwrap();
        // A directory where the file should be makes every write fail.
        let path = tmp.path().join("taken");
        std::fs::create_dir(&path).unwrap();
        let mut sink = FlatFileSink::new(&path);
        let batch = collect_batch(
            &config,
            &mut vec![page(None, vec![row("体育室", "4/1", "午前", "")])].into_iter(),
            2023,
        )
        .unwrap();

        let msg = format!("{:#}", load_batch(&config, &batch, &mut sink).unwrap_err());
        assert!(msg.contains("edogawa"));
        assert!(msg.contains("full"));
        assert!(msg.contains("rerun"));
    }
}
