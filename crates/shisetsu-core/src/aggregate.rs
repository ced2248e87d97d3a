//! Merging scraped rows into one reservation record per key.
//!
//! Rows arrive either with every division of a date on one page
//! ([`Aggregator::accumulate`]) or as one full pass per division
//! ([`Aggregator::accumulate_partitioned`]). Partitioned passes are zipped row
//! by row at [`Aggregator::finalize`], which is why they must enumerate the same
//! `(building, institution, date)` sequence.

use std::collections::HashMap;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::date::DateResolver;
use crate::labels::Normalizer;
use crate::model::{
    AggregateStats, DayOfWeek, Division, LoadBatch, RawRow, RecordKey, ReservationRecord,
    ScrapedRow, Status, UNIDENTIFIED_INSTITUTION,
};
use crate::ward::WardConfig;

#[derive(Debug, Error)]
pub enum AggregateError {
    #[error(
        "ward {ward}: division passes enumerate different row counts ({}); batch aborted, nothing loaded",
        format_lengths(.lengths)
    )]
    PartitionLengthMismatch {
        ward: String,
        lengths: Vec<(String, usize)>,
    },

    #[error(
        "ward {ward}: pass {partition:?} row {index} is {found}, expected {expected}; batch aborted, nothing loaded"
    )]
    PartitionOrderMismatch {
        ward: String,
        partition: String,
        index: usize,
        expected: String,
        found: String,
    },
}

fn format_lengths(lengths: &[(String, usize)]) -> String {
    lengths
        .iter()
        .map(|(label, n)| format!("{label}: {n}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Date resolution is per enumeration: one pass over one facility.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct StreamKey {
    partition: Option<String>,
    building: String,
    institution: String,
}

/// Builds one [`LoadBatch`] for one ward.
///
/// A duplicate `(key, division)` pair overwrites the earlier status (last
/// write wins); each occurrence is logged and counted in
/// [`AggregateStats::duplicate_divisions`].
pub struct Aggregator {
    ward: String,
    normalizer: Normalizer,
    initial_year: i32,
    resolvers: HashMap<StreamKey, DateResolver>,
    index: HashMap<RecordKey, usize>,
    records: Vec<ReservationRecord>,
    partitions: Vec<(String, Vec<RawRow>)>,
    stats: AggregateStats,
}

impl Aggregator {
    /// `initial_year` seeds every month/day date stream.
    pub fn new(config: &WardConfig, initial_year: i32) -> Self {
        Self {
            ward: config.code.clone(),
            normalizer: config.normalizer.clone(),
            initial_year,
            resolvers: HashMap::new(),
            index: HashMap::new(),
            records: Vec::new(),
            partitions: Vec::new(),
            stats: AggregateStats::default(),
        }
    }

    pub fn stats(&self) -> &AggregateStats {
        &self.stats
    }

    /// Normalise scraped rows and merge them by key.
    ///
    /// Returns the number of rows merged.
    pub fn accumulate<I>(&mut self, rows: I) -> usize
    where
        I: IntoIterator<Item = ScrapedRow>,
    {
        let mut merged = 0;
        for scraped in rows {
            if let Some(row) = self.normalize(None, &scraped) {
                self.merge(row);
                merged += 1;
            }
        }
        debug!(ward = %self.ward, merged, "accumulated page");
        merged
    }

    /// Merge rows a collector already normalised.
    pub fn accumulate_rows<I>(&mut self, rows: I) -> usize
    where
        I: IntoIterator<Item = RawRow>,
    {
        let mut merged = 0;
        for row in rows {
            self.stats.rows_seen += 1;
            self.count_invalid(&row);
            self.merge(row);
            merged += 1;
        }
        merged
    }

    /// Queue one page of a single-division pass.
    ///
    /// Pages sharing a label extend that pass in arrival order.
    pub fn accumulate_partitioned<I>(&mut self, label: &str, rows: I) -> usize
    where
        I: IntoIterator<Item = ScrapedRow>,
    {
        let normalized: Vec<RawRow> = rows
            .into_iter()
            .filter_map(|scraped| self.normalize(Some(label), &scraped))
            .collect();
        let queued = normalized.len();

        match self.partitions.iter_mut().find(|(l, _)| l == label) {
            Some((_, pass)) => pass.extend(normalized),
            None => {
                self.stats.partitions += 1;
                self.partitions.push((label.to_string(), normalized));
            }
        }
        debug!(ward = %self.ward, partition = label, queued, "queued partition page");
        queued
    }

    /// Zip queued passes, then hand over every record in first-seen order.
    ///
    /// Consumes the aggregator; a new batch needs a new one.
    pub fn finalize(mut self) -> Result<LoadBatch, AggregateError> {
        let partitions = std::mem::take(&mut self.partitions);
        if let Some(((_, first), rest)) = partitions.split_first() {
            if rest.iter().any(|(_, pass)| pass.len() != first.len()) {
                return Err(AggregateError::PartitionLengthMismatch {
                    ward: self.ward,
                    lengths: partitions
                        .iter()
                        .map(|(label, pass)| (label.clone(), pass.len()))
                        .collect(),
                });
            }

            for (index, anchor) in first.iter().enumerate() {
                for (label, pass) in rest {
                    let row = &pass[index];
                    if anchor.key() != row.key() {
                        return Err(AggregateError::PartitionOrderMismatch {
                            ward: self.ward,
                            partition: label.clone(),
                            index,
                            expected: anchor.key().to_string(),
                            found: row.key().to_string(),
                        });
                    }
                }
            }

            for (index, anchor) in first.iter().enumerate() {
                self.merge(anchor.clone());
                for (_, pass) in rest {
                    self.merge(pass[index].clone());
                }
            }
        }

        info!(
            ward = %self.ward,
            records = self.records.len(),
            rows = self.stats.rows_seen,
            rejected = self.stats.rows_rejected,
            duplicates = self.stats.duplicate_divisions,
            partitions = self.stats.partitions,
            "batch finalized"
        );

        Ok(LoadBatch {
            ward: self.ward,
            records: self.records,
            partial: false,
            stats: self.stats,
        })
    }

    fn normalize(&mut self, partition: Option<&str>, scraped: &ScrapedRow) -> Option<RawRow> {
        self.stats.rows_seen += 1;

        let stream = StreamKey {
            partition: partition.map(str::to_string),
            building: scraped.building.clone(),
            institution: scraped.institution.clone(),
        };
        let initial_year = self.initial_year;
        let resolver = self
            .resolvers
            .entry(stream)
            .or_insert_with(|| DateResolver::new(initial_year));

        let date = match resolver.resolve_token(&scraped.date) {
            Ok(date) => date,
            Err(e) => {
                warn!(
                    ward = %self.ward,
                    building = %scraped.building,
                    institution = %scraped.institution,
                    error = %e,
                    "row skipped: date cannot be resolved"
                );
                self.stats.rows_rejected += 1;
                return None;
            }
        };

        let row = RawRow {
            building: scraped.building.clone(),
            institution: scraped.institution.clone(),
            date,
            day_of_week: self.normalizer.day_of_week(&scraped.day_of_week),
            division: self.normalizer.division(&scraped.division),
            status: self.normalizer.status(&scraped.status),
            institution_id: scraped.institution_id.unwrap_or(UNIDENTIFIED_INSTITUTION),
        };
        self.count_invalid(&row);
        Some(row)
    }

    fn count_invalid(&mut self, row: &RawRow) {
        if row.division == Division::Invalid {
            self.stats.invalid_divisions += 1;
        }
        if row.status == Status::Invalid {
            self.stats.invalid_statuses += 1;
        }
    }

    fn merge(&mut self, row: RawRow) {
        let key = row.key();
        match self.index.get(&key) {
            Some(&i) => {
                let record = &mut self.records[i];
                if record.day_of_week == DayOfWeek::Invalid {
                    record.day_of_week = row.day_of_week;
                }
                if let Some(previous) = record.reservation.insert(row.division, row.status) {
                    self.stats.duplicate_divisions += 1;
                    warn!(
                        ward = %self.ward,
                        key = %key,
                        division = %row.division,
                        previous = %previous,
                        status = %row.status,
                        "division observed twice; keeping the later status"
                    );
                }
            }
            None => {
                self.index.insert(key.clone(), self.records.len());
                self.records.push(ReservationRecord {
                    key,
                    day_of_week: row.day_of_week,
                    reservation: [(row.division, row.status)].into_iter().collect(),
                });
            }
        }
    }
}
