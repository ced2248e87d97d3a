//! Token → canonical lookup tables.
//!
//! Every ward supplies only declarative tables; all matching logic lives here.
//! Lookups are total: an unmapped token yields the enum's `INVALID` member.

use serde::{Deserialize, Serialize};

use crate::model::{Canonical, DayOfWeek, Division, Status};

/// How a table entry's token is compared with the scraped text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// Whole token equality (localized labels).
    #[default]
    Exact,
    /// Entry token appears anywhere (glyphs inside longer cell text, icon paths).
    Contains,
    /// Entry token ends the scraped text (icon filename at the end of a URL).
    Suffix,
}

impl MatchMode {
    fn matches(self, entry: &str, token: &str) -> bool {
        match self {
            MatchMode::Exact => token == entry,
            MatchMode::Contains => token.contains(entry),
            MatchMode::Suffix => token.ends_with(entry),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelEntry<T> {
    pub token: String,
    pub value: T,
}

/// Ordered `(token, canonical)` entries; the first match wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelTable<T> {
    #[serde(default)]
    pub mode: MatchMode,
    pub entries: Vec<LabelEntry<T>>,
}

impl<T: Canonical> LabelTable<T> {
    pub fn new(mode: MatchMode, entries: &[(&str, T)]) -> Self {
        Self {
            mode,
            entries: entries
                .iter()
                .map(|(token, value)| LabelEntry {
                    token: (*token).to_string(),
                    value: *value,
                })
                .collect(),
        }
    }

    /// Map a scraped token to its canonical value, or `T::INVALID`.
    pub fn lookup(&self, token: &str) -> T {
        let token = token.trim();
        if token.is_empty() {
            return T::INVALID;
        }
        self.entries
            .iter()
            .find(|e| !e.token.is_empty() && self.mode.matches(&e.token, token))
            .map(|e| e.value)
            .unwrap_or(T::INVALID)
    }
}

/// What an empty status cell means for a ward.
///
/// Wards disagree: some render a vacant slot as a blank cell, others leave
/// cells blank when the page failed to load them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyCell {
    Vacant,
    Unknown,
    Invalid,
}

impl EmptyCell {
    pub fn status(self) -> Status {
        match self {
            EmptyCell::Vacant => Status::Vacant,
            EmptyCell::Unknown => Status::Unknown,
            EmptyCell::Invalid => Status::Invalid,
        }
    }
}

/// A ward's complete set of normalisation tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Normalizer {
    pub divisions: LabelTable<Division>,
    pub statuses: LabelTable<Status>,
    pub days_of_week: LabelTable<DayOfWeek>,
    pub empty_cell: EmptyCell,
}

impl Normalizer {
    pub fn division(&self, token: &str) -> Division {
        self.divisions.lookup(token)
    }

    pub fn status(&self, token: &str) -> Status {
        if token.trim().is_empty() {
            return self.empty_cell.status();
        }
        self.statuses.lookup(token)
    }

    /// Brackets around the glyph (`(日)`, `（土）`) are ignored.
    pub fn day_of_week(&self, token: &str) -> DayOfWeek {
        let stripped = token
            .trim()
            .trim_start_matches(['(', '（'])
            .trim_end_matches([')', '）']);
        self.days_of_week.lookup(stripped)
    }
}

/// Japanese weekday glyphs, short and long forms.
pub fn japanese_days_of_week() -> LabelTable<DayOfWeek> {
    use DayOfWeek::*;
    LabelTable::new(
        MatchMode::Exact,
        &[
            ("日", Sunday),
            ("月", Monday),
            ("火", Tuesday),
            ("水", Wednesday),
            ("木", Thursday),
            ("金", Friday),
            ("土", Saturday),
            ("日曜日", Sunday),
            ("月曜日", Monday),
            ("火曜日", Tuesday),
            ("水曜日", Wednesday),
            ("木曜日", Thursday),
            ("金曜日", Friday),
            ("土曜日", Saturday),
        ],
    )
}
