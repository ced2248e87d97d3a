//! Flat-file sink: one tab-delimited file with a header row.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use shisetsu_core::codec;
use shisetsu_core::schema::{parse_row, render_row};
use shisetsu_core::{Column, LoadBatch, Scope, StoredRow};
use tempfile::NamedTempFile;
use tracing::info;

use crate::{LoadSink, StoreError};

/// A tab-delimited reservation file.
///
/// Not transactional: scoped replacement rewrites the file atomically, but a
/// failed insert after it leaves the scope empty.
pub struct FlatFileSink {
    path: PathBuf,
}

struct Contents {
    columns: Vec<Column>,
    rows: Vec<Vec<String>>,
}

fn join_names(columns: &[Column]) -> String {
    columns
        .iter()
        .map(|c| c.name())
        .collect::<Vec<_>>()
        .join(", ")
}

impl FlatFileSink {
    /// The file is created on first insert.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored column layout, or `None` for a missing or empty file.
    pub fn columns(&self) -> Result<Option<Vec<Column>>, StoreError> {
        Ok(self.read_contents()?.map(|c| c.columns))
    }

    /// Parse every stored row back into records.
    pub fn read_rows(&self) -> Result<Vec<StoredRow>, StoreError> {
        let Some(contents) = self.read_contents()? else {
            return Ok(Vec::new());
        };
        contents
            .rows
            .iter()
            .enumerate()
            .map(|(i, fields)| {
                parse_row(&contents.columns, fields)
                    .map_err(|source| StoreError::Field { row: i + 1, source })
            })
            .collect()
    }

    fn read_contents(&self) -> Result<Option<Contents>, StoreError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut columns = None;
        let mut rows = Vec::new();
        for (i, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let fields = codec::split_row(&line)
                .map_err(|source| StoreError::Codec { line: i + 1, source })?;
            match columns {
                None => {
                    columns = Some(
                        fields
                            .iter()
                            .map(|name| name.parse::<Column>())
                            .collect::<Result<Vec<_>, _>>()
                            .map_err(|source| StoreError::Field { row: 0, source })?,
                    );
                }
                Some(_) => rows.push(fields),
            }
        }
        Ok(columns.map(|columns| Contents { columns, rows }))
    }

    /// Replace the file's contents atomically: write a sibling temp file, then
    /// rename it over the original. The original's permissions carry over.
    fn rewrite(&self, columns: &[Column], rows: &[Vec<String>]) -> Result<(), StoreError> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir)?;
        {
            let mut w = BufWriter::new(tmp.as_file_mut());
            codec::write_row(&mut w, &columns.iter().map(|c| c.name()).collect::<Vec<_>>())?;
            for row in rows {
                codec::write_row(&mut w, row)?;
            }
            w.flush()?;
        }
        if let Ok(meta) = fs::metadata(&self.path) {
            tmp.as_file().set_permissions(meta.permissions())?;
        }
        tmp.persist(&self.path).map_err(|e| StoreError::Io(e.error))?;
        Ok(())
    }
}

impl LoadSink for FlatFileSink {
    fn replace_scope(&mut self, scope: &Scope) -> Result<usize, StoreError> {
        let Some(contents) = self.read_contents()? else {
            return Ok(0);
        };
        let before = contents.rows.len();
        let kept: Vec<Vec<String>> = match scope {
            Scope::All => Vec::new(),
            Scope::Column { column, value } => {
                let idx = contents
                    .columns
                    .iter()
                    .position(|c| c == column)
                    .ok_or(StoreError::ScopeColumnMissing(*column))?;
                contents
                    .rows
                    .into_iter()
                    .filter(|row| row.get(idx) != Some(value))
                    .collect()
            }
        };
        self.rewrite(&contents.columns, &kept)?;
        Ok(before - kept.len())
    }

    fn bulk_insert(&mut self, batch: &LoadBatch, columns: &[Column]) -> Result<usize, StoreError> {
        let existing = self.columns()?;
        if let Some(stored) = &existing
            && stored.as_slice() != columns
        {
            return Err(StoreError::ColumnMismatch {
                expected: join_names(columns),
                found: join_names(stored),
            });
        }

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut w = BufWriter::new(file);
        if existing.is_none() {
            codec::write_row(&mut w, &columns.iter().map(|c| c.name()).collect::<Vec<_>>())?;
        }
        for record in &batch.records {
            codec::write_row(&mut w, &render_row(record, &batch.ward, columns))?;
        }
        w.flush()?;

        info!(path = %self.path.display(), rows = batch.len(), "rows appended");
        Ok(batch.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use chrono::NaiveDate;
    use shisetsu_core::{
        AggregateStats, DayOfWeek, Division, RecordKey, ReservationRecord, Status,
        DEFAULT_COLUMNS, UNIDENTIFIED_INSTITUTION,
    };

    fn record(institution: &str, day: u32, morning: Status) -> ReservationRecord {
        let mut reservation = BTreeMap::new();
        reservation.insert(Division::Morning, morning);
        reservation.insert(Division::Evening, Status::Closed);
        ReservationRecord {
            key: RecordKey {
                building: "区民センター".into(),
                institution: institution.into(),
                date: NaiveDate::from_ymd_opt(2023, 5, day).unwrap(),
                institution_id: UNIDENTIFIED_INSTITUTION,
            },
            day_of_week: DayOfWeek::Monday,
            reservation,
        }
    }

    fn batch(ward: &str, records: Vec<ReservationRecord>) -> LoadBatch {
        LoadBatch {
            ward: ward.into(),
            records,
            partial: false,
            stats: AggregateStats::default(),
        }
    }

    const WARD_COLUMNS: &[Column] = &[
        Column::TokyoWard,
        Column::Building,
        Column::Institution,
        Column::Date,
        Column::DayOfWeek,
        Column::Reservation,
    ];

    #[test]
    fn round_trip_recovers_keys_and_reservations() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut sink = FlatFileSink::new(tmp.path().join("out").join("reservation.tsv"));
        let records = vec![
            record("音楽室", 1, Status::Vacant),
            record("和室\t(2)", 1, Status::Occupied),
            record("音楽室", 2, Status::Invalid),
        ];
        sink.replace_all(&Scope::All, &batch("X", records.clone()), DEFAULT_COLUMNS)
            .unwrap();

        let back: Vec<ReservationRecord> =
            sink.read_rows().unwrap().into_iter().map(|r| r.record).collect();
        assert_eq!(back, records);
    }

    #[test]
    fn loading_twice_equals_loading_once() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut sink = FlatFileSink::new(tmp.path().join("reservation.tsv"));
        let b = batch("X", vec![record("音楽室", 1, Status::Vacant)]);

        let first = sink.replace_all(&Scope::All, &b, DEFAULT_COLUMNS).unwrap();
        let once = fs::read_to_string(sink.path()).unwrap();
        let second = sink.replace_all(&Scope::All, &b, DEFAULT_COLUMNS).unwrap();
        let twice = fs::read_to_string(sink.path()).unwrap();

        assert_eq!(once, twice);
        assert_eq!(first.removed, 0);
        assert_eq!(second.removed, 1);
        assert_eq!(second.inserted, 1);
    }

    #[test]
    fn ward_scope_keeps_other_wards() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut sink = FlatFileSink::new(tmp.path().join("reservation.tsv"));
        let kita = Scope::Column {
            column: Column::TokyoWard,
            value: "TOKYO_WARD_KITA".into(),
        };
        sink.bulk_insert(
            &batch("TOKYO_WARD_BUNKYO", vec![record("A", 1, Status::Vacant)]),
            WARD_COLUMNS,
        )
        .unwrap();
        sink.replace_all(
            &kita,
            &batch("TOKYO_WARD_KITA", vec![record("B", 1, Status::Vacant)]),
            WARD_COLUMNS,
        )
        .unwrap();
        let outcome = sink
            .replace_all(
                &kita,
                &batch(
                    "TOKYO_WARD_KITA",
                    vec![record("B", 1, Status::Occupied), record("B", 2, Status::Vacant)],
                ),
                WARD_COLUMNS,
            )
            .unwrap();
        assert_eq!(outcome.removed, 1);

        let wards: Vec<String> = sink
            .read_rows()
            .unwrap()
            .into_iter()
            .map(|r| r.ward.unwrap())
            .collect();
        assert_eq!(
            wards,
            vec!["TOKYO_WARD_BUNKYO", "TOKYO_WARD_KITA", "TOKYO_WARD_KITA"]
        );
    }

    #[test]
    fn scope_on_unstored_column_fails() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut sink = FlatFileSink::new(tmp.path().join("reservation.tsv"));
        sink.bulk_insert(&batch("X", vec![record("A", 1, Status::Vacant)]), DEFAULT_COLUMNS)
            .unwrap();
        let err = sink
            .replace_scope(&Scope::Column {
                column: Column::TokyoWard,
                value: "X".into(),
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::ScopeColumnMissing(Column::TokyoWard)));
    }

    #[test]
    fn appending_with_another_layout_fails() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut sink = FlatFileSink::new(tmp.path().join("reservation.tsv"));
        let b = batch("X", vec![record("A", 1, Status::Vacant)]);
        sink.bulk_insert(&b, DEFAULT_COLUMNS).unwrap();
        assert!(matches!(
            sink.bulk_insert(&b, WARD_COLUMNS),
            Err(StoreError::ColumnMismatch { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn rewrite_keeps_file_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::TempDir::new().unwrap();
        let mut sink = FlatFileSink::new(tmp.path().join("reservation.tsv"));
        let b = batch("X", vec![record("A", 1, Status::Vacant)]);
        sink.bulk_insert(&b, DEFAULT_COLUMNS).unwrap();
        fs::set_permissions(sink.path(), fs::Permissions::from_mode(0o644)).unwrap();

        sink.replace_all(&Scope::All, &b, DEFAULT_COLUMNS).unwrap();
        let mode = fs::metadata(sink.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
    }

    #[test]
    fn replacing_a_missing_file_is_a_noop() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut sink = FlatFileSink::new(tmp.path().join("absent.tsv"));
        assert_eq!(sink.replace_scope(&Scope::All).unwrap(), 0);
        assert!(!sink.path().exists());
        assert!(sink.read_rows().unwrap().is_empty());
    }
}
