//! Persisted column layout and its Arrow schema.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use arrow::array::{ArrayRef, Date32Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::model::{
    DayOfWeek, Division, LoadBatch, RecordKey, ReservationRecord, Status,
    UNIDENTIFIED_INSTITUTION,
};

/// A persisted field. Column order is chosen per ward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Column {
    Building,
    Institution,
    Date,
    DayOfWeek,
    Reservation,
    InstitutionId,
    TokyoWard,
}

/// `building, institution, date, day_of_week, reservation, institution_id`
pub const DEFAULT_COLUMNS: &[Column] = &[
    Column::Building,
    Column::Institution,
    Column::Date,
    Column::DayOfWeek,
    Column::Reservation,
    Column::InstitutionId,
];

impl Column {
    pub const ALL: &'static [Column] = &[
        Column::Building,
        Column::Institution,
        Column::Date,
        Column::DayOfWeek,
        Column::Reservation,
        Column::InstitutionId,
        Column::TokyoWard,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Column::Building => "building",
            Column::Institution => "institution",
            Column::Date => "date",
            Column::DayOfWeek => "day_of_week",
            Column::Reservation => "reservation",
            Column::InstitutionId => "institution_id",
            Column::TokyoWard => "tokyo_ward",
        }
    }

    /// Textual rendering of this column for one record.
    pub fn render(self, record: &ReservationRecord, ward: &str) -> String {
        match self {
            Column::Building => record.key.building.clone(),
            Column::Institution => record.key.institution.clone(),
            Column::Date => record.key.date.format("%Y-%m-%d").to_string(),
            Column::DayOfWeek => record.day_of_week.to_string(),
            Column::Reservation => record.reservation_json(),
            Column::InstitutionId => record.key.institution_id.hyphenated().to_string(),
            Column::TokyoWard => ward.to_string(),
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Column {
    type Err = FieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Column::ALL
            .iter()
            .copied()
            .find(|c| c.name() == s)
            .ok_or_else(|| FieldError::UnknownColumn(s.to_string()))
    }
}

/// Render every column of a record, in order.
pub fn render_row(record: &ReservationRecord, ward: &str, columns: &[Column]) -> Vec<String> {
    columns.iter().map(|c| c.render(record, ward)).collect()
}

/// Which persisted rows a load is responsible for replacing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    All,
    Column { column: Column, value: String },
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::All => f.write_str("all rows"),
            Scope::Column { column, value } => write!(f, "{column} = {value}"),
        }
    }
}

// ── Reading rows back ──

#[derive(Debug, Error)]
pub enum FieldError {
    #[error("unknown column {0:?}")]
    UnknownColumn(String),

    #[error("expected {expected} fields, found {found}")]
    Arity { expected: usize, found: usize },

    #[error("missing required column {0}")]
    Missing(Column),

    #[error("column {column}: {reason}")]
    Invalid { column: Column, reason: String },
}

/// A record as read back from storage, with its ward code when persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRow {
    pub record: ReservationRecord,
    pub ward: Option<String>,
}

/// Rebuild a record from its rendered fields.
///
/// `building`, `institution` and `date` are required; a missing
/// `institution_id` reads as the unidentified sentinel.
pub fn parse_row(columns: &[Column], fields: &[String]) -> Result<StoredRow, FieldError> {
    if columns.len() != fields.len() {
        return Err(FieldError::Arity {
            expected: columns.len(),
            found: fields.len(),
        });
    }

    let mut building = None;
    let mut institution = None;
    let mut date = None;
    let mut day_of_week = DayOfWeek::Invalid;
    let mut reservation = BTreeMap::new();
    let mut institution_id = UNIDENTIFIED_INSTITUTION;
    let mut ward = None;

    for (&column, field) in columns.iter().zip(fields) {
        let invalid = |reason: String| FieldError::Invalid { column, reason };
        match column {
            Column::Building => building = Some(field.clone()),
            Column::Institution => institution = Some(field.clone()),
            Column::Date => {
                date = Some(
                    NaiveDate::parse_from_str(field, "%Y-%m-%d")
                        .map_err(|e| invalid(e.to_string()))?,
                )
            }
            Column::DayOfWeek => {
                day_of_week = field.parse().map_err(|e: crate::model::UnknownCanonical| {
                    invalid(e.to_string())
                })?
            }
            Column::Reservation => {
                reservation = serde_json::from_str::<BTreeMap<Division, Status>>(field)
                    .map_err(|e| invalid(e.to_string()))?
            }
            Column::InstitutionId => {
                institution_id = Uuid::parse_str(field).map_err(|e| invalid(e.to_string()))?
            }
            Column::TokyoWard => ward = Some(field.clone()),
        }
    }

    Ok(StoredRow {
        record: ReservationRecord {
            key: RecordKey {
                building: building.ok_or(FieldError::Missing(Column::Building))?,
                institution: institution.ok_or(FieldError::Missing(Column::Institution))?,
                date: date.ok_or(FieldError::Missing(Column::Date))?,
                institution_id,
            },
            day_of_week,
            reservation,
        },
        ward,
    })
}

// ── Arrow ──

/// Arrow schema for a column layout: `date` is `Date32`, everything else `Utf8`.
pub fn reservation_schema(columns: &[Column]) -> Schema {
    Schema::new(
        columns
            .iter()
            .map(|&c| match c {
                Column::Date => Field::new(c.name(), DataType::Date32, false),
                _ => Field::new(c.name(), DataType::Utf8, false),
            })
            .collect::<Vec<_>>(),
    )
}

fn days_since_epoch(date: NaiveDate) -> i32 {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default();
    (date - epoch).num_days() as i32
}

impl LoadBatch {
    /// The batch as one Arrow `RecordBatch` in the given column order.
    pub fn to_record_batch(&self, columns: &[Column]) -> Result<RecordBatch, ArrowError> {
        let schema = Arc::new(reservation_schema(columns));
        let arrays: Vec<ArrayRef> = columns
            .iter()
            .map(|&c| -> ArrayRef {
                match c {
                    Column::Date => Arc::new(Date32Array::from(
                        self.records
                            .iter()
                            .map(|r| days_since_epoch(r.key.date))
                            .collect::<Vec<_>>(),
                    )),
                    _ => Arc::new(StringArray::from(
                        self.records
                            .iter()
                            .map(|r| c.render(r, &self.ward))
                            .collect::<Vec<_>>(),
                    )),
                }
            })
            .collect();
        RecordBatch::try_new(schema, arrays)
    }
}
