//! Canonical reservation types shared by every ward.
//!
//! Scraped cells arrive as free text ([`ScrapedRow`]), are normalised into
//! [`RawRow`]s with closed enum values, and are merged by the aggregator into
//! one [`ReservationRecord`] per `(building, institution, date, institution_id)`.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use uuid::Uuid;

/// Institution id used when the source ward exposes no stable identifier.
pub const UNIDENTIFIED_INSTITUTION: Uuid = Uuid::nil();

/// A closed set of canonical values with an `INVALID` fallback member.
///
/// Implemented by [`Division`], [`Status`] and [`DayOfWeek`]. The canonical
/// string (e.g. `RESERVATION_STATUS_VACANT`) is what gets persisted.
pub trait Canonical: Copy + Eq + Ord + fmt::Debug + 'static {
    /// Member returned for any token that no table maps.
    const INVALID: Self;

    /// Every member, in declaration order.
    const ALL: &'static [Self];

    /// Persisted representation.
    fn as_str(&self) -> &'static str;

    /// Parse a persisted representation back into a member.
    fn from_canonical(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|v| v.as_str() == s)
    }
}

#[derive(Debug, Error)]
#[error("unknown canonical value {value:?} for {kind}")]
pub struct UnknownCanonical {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! canonical_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $kind:literal {
            $( $variant:ident => $text:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum $name {
            $( $variant ),+
        }

        impl Canonical for $name {
            const INVALID: Self = $name::Invalid;
            const ALL: &'static [Self] = &[ $( $name::$variant ),+ ];

            fn as_str(&self) -> &'static str {
                match self {
                    $( $name::$variant => $text ),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownCanonical;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                <$name as Canonical>::from_canonical(s).ok_or_else(|| UnknownCanonical {
                    kind: $kind,
                    value: s.to_string(),
                })
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

canonical_enum! {
    /// A reservable time-slot bucket within a day.
    Division, "division" {
        Morning => "RESERVATION_DIVISION_MORNING",
        Afternoon => "RESERVATION_DIVISION_AFTERNOON",
        AfternoonOne => "RESERVATION_DIVISION_AFTERNOON_ONE",
        AfternoonTwo => "RESERVATION_DIVISION_AFTERNOON_TWO",
        Evening => "RESERVATION_DIVISION_EVENING",
        EveningOne => "RESERVATION_DIVISION_EVENING_ONE",
        EveningTwo => "RESERVATION_DIVISION_EVENING_TWO",
        One => "RESERVATION_DIVISION_ONE",
        Two => "RESERVATION_DIVISION_TWO",
        Three => "RESERVATION_DIVISION_THREE",
        Four => "RESERVATION_DIVISION_FOUR",
        Five => "RESERVATION_DIVISION_FIVE",
        Six => "RESERVATION_DIVISION_SIX",
        Invalid => "RESERVATION_DIVISION_INVALID",
    }
}

canonical_enum! {
    /// Observed reservability of one division on one date.
    Status, "status" {
        Vacant => "RESERVATION_STATUS_VACANT",
        PartiallyVacant => "RESERVATION_STATUS_PARTIALLY_VACANT",
        Occupied => "RESERVATION_STATUS_OCCUPIED",
        Closed => "RESERVATION_STATUS_CLOSED",
        Keep => "RESERVATION_STATUS_KEEP",
        Kikangai => "RESERVATION_STATUS_KIKANGAI",
        Open => "RESERVATION_STATUS_OPEN",
        Sound => "RESERVATION_STATUS_SOUND",
        Question => "RESERVATION_STATUS_QUESTION",
        OutOfTarget => "RESERVATION_STATUS_OUT_OF_TARGET",
        Appliable => "RESERVATION_STATUS_APPLIABLE",
        Unknown => "RESERVATION_STATUS_UNKNOWN",
        Invalid => "RESERVATION_STATUS_INVALID",
    }
}

canonical_enum! {
    DayOfWeek, "day of week" {
        Sunday => "DAY_OF_WEEK_SUNDAY",
        Monday => "DAY_OF_WEEK_MONDAY",
        Tuesday => "DAY_OF_WEEK_TUESDAY",
        Wednesday => "DAY_OF_WEEK_WEDNESDAY",
        Thursday => "DAY_OF_WEEK_THURSDAY",
        Friday => "DAY_OF_WEEK_FRIDAY",
        Saturday => "DAY_OF_WEEK_SATURDAY",
        Invalid => "DAY_OF_WEEK_INVALID",
    }
}

impl Division {
    /// Positional division sets for tables that only expose a slot count.
    ///
    /// Three slots are morning/afternoon/evening; five or six are numbered.
    pub fn for_slot_count(count: usize) -> Option<&'static [Division]> {
        use Division::*;
        match count {
            3 => Some(&[Morning, Afternoon, Evening]),
            5 => Some(&[One, Two, Three, Four, Five]),
            6 => Some(&[One, Two, Three, Four, Five, Six]),
            _ => None,
        }
    }
}

/// One table cell exactly as a collector read it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapedRow {
    pub building: String,
    pub institution: String,
    /// `YYYY-MM-DD`, `YYYY/M/D`, `M/D`, `M月D日`, ...
    pub date: String,
    pub day_of_week: String,
    pub division: String,
    /// A label, glyph, icon filename or icon URL.
    pub status: String,
    pub institution_id: Option<Uuid>,
}

/// A normalised row: every field canonical, date fully resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRow {
    pub building: String,
    pub institution: String,
    pub date: NaiveDate,
    pub day_of_week: DayOfWeek,
    pub division: Division,
    pub status: Status,
    pub institution_id: Uuid,
}

impl RawRow {
    pub fn key(&self) -> RecordKey {
        RecordKey {
            building: self.building.clone(),
            institution: self.institution.clone(),
            date: self.date,
            institution_id: self.institution_id,
        }
    }
}

/// Identity of a [`ReservationRecord`] within one load batch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    pub building: String,
    pub institution: String,
    pub date: NaiveDate,
    pub institution_id: Uuid,
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} / {} @ {}",
            self.building,
            self.institution,
            self.date.format("%Y-%m-%d")
        )?;
        if self.institution_id != UNIDENTIFIED_INSTITUTION {
            write!(f, " ({})", self.institution_id)?;
        }
        Ok(())
    }
}

/// The canonical persisted unit: every division seen for one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationRecord {
    pub key: RecordKey,
    pub day_of_week: DayOfWeek,
    pub reservation: BTreeMap<Division, Status>,
}

impl ReservationRecord {
    /// Compact JSON object, keys in division order.
    pub fn reservation_json(&self) -> String {
        // A map of unit enums to unit enums always serialises.
        serde_json::to_string(&self.reservation).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Counters collected while building a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregateStats {
    /// Rows handed to the aggregator, including partitioned ones.
    pub rows_seen: usize,
    /// Rows dropped because their date could not be resolved.
    pub rows_rejected: usize,
    pub invalid_divisions: usize,
    pub invalid_statuses: usize,
    /// `(key, division)` pairs observed more than once; last write wins.
    pub duplicate_divisions: usize,
    pub partitions: usize,
}

/// Records handed to a sink in one call.
#[derive(Debug, Clone)]
pub struct LoadBatch {
    /// Ward code, written to the `tokyo_ward` column when present.
    pub ward: String,
    /// First-seen key order.
    pub records: Vec<ReservationRecord>,
    /// Set when collection stopped early.
    pub partial: bool,
    pub stats: AggregateStats,
}

impl LoadBatch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
