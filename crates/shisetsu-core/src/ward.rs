//! Per-ward configuration and the built-in ward presets.
//!
//! Everything that differs between wards is data: the persisted column list,
//! the label tables, the empty-cell policy, how passes are merged and which
//! rows a load replaces.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::labels::{japanese_days_of_week, EmptyCell, LabelTable, MatchMode, Normalizer};
use crate::model::{Division, Status};
use crate::schema::{Column, Scope, DEFAULT_COLUMNS};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown ward {0:?} (try `shisetsu wards`)")]
    UnknownWard(String),

    #[error("reading ward config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing ward config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("ward {ward}: column list is empty")]
    NoColumns { ward: String },

    #[error("ward {ward}: column {column} listed twice")]
    DuplicateColumn { ward: String, column: Column },

    #[error("ward {ward}: scope is per ward but column `tokyo_ward` is not persisted")]
    ScopeWithoutWardColumn { ward: String },
}

/// How a ward's collector delivers divisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeMode {
    /// Each page carries every division for its dates; merge by key.
    ByKey,
    /// One full pass per division; passes are zipped row by row.
    Partitioned,
}

/// Which stored rows a load replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadScope {
    /// The whole table or file.
    All,
    /// Rows whose `tokyo_ward` equals this ward's code.
    Ward,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WardConfig {
    /// Short name used on the command line, e.g. `kita`.
    pub name: String,
    /// Persisted ward code, e.g. `TOKYO_WARD_KITA`.
    pub code: String,
    pub columns: Vec<Column>,
    pub normalizer: Normalizer,
    pub merge: MergeMode,
    pub scope: LoadScope,
}

impl WardConfig {
    /// Check the invariants serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.columns.is_empty() {
            return Err(ConfigError::NoColumns {
                ward: self.name.clone(),
            });
        }
        for (i, column) in self.columns.iter().enumerate() {
            if self.columns[..i].contains(column) {
                return Err(ConfigError::DuplicateColumn {
                    ward: self.name.clone(),
                    column: *column,
                });
            }
        }
        if self.scope == LoadScope::Ward && !self.columns.contains(&Column::TokyoWard) {
            return Err(ConfigError::ScopeWithoutWardColumn {
                ward: self.name.clone(),
            });
        }
        Ok(())
    }

    /// The concrete scope a load of this ward replaces.
    pub fn load_scope(&self) -> Scope {
        match self.scope {
            LoadScope::All => Scope::All,
            LoadScope::Ward => Scope::Column {
                column: Column::TokyoWard,
                value: self.code.clone(),
            },
        }
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: WardConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Look up a built-in preset by short name.
    pub fn preset(name: &str) -> Result<Self, ConfigError> {
        presets()
            .into_iter()
            .find(|w| w.name == name)
            .ok_or_else(|| ConfigError::UnknownWard(name.to_string()))
    }
}

// ── Presets ──

fn time_of_day_divisions() -> LabelTable<Division> {
    LabelTable::new(
        MatchMode::Exact,
        &[
            ("午前", Division::Morning),
            ("午後", Division::Afternoon),
            ("夜間", Division::Evening),
        ],
    )
}

/// Every ward this repository knows how to load.
pub fn presets() -> Vec<WardConfig> {
    vec![bunkyo(), kita(), toshima(), koutou(), edogawa()]
}

fn bunkyo() -> WardConfig {
    use Division::*;
    WardConfig {
        name: "bunkyo".into(),
        code: "TOKYO_WARD_BUNKYO".into(),
        columns: DEFAULT_COLUMNS.to_vec(),
        normalizer: Normalizer {
            divisions: LabelTable::new(
                MatchMode::Exact,
                &[
                    ("午前", Morning),
                    ("午後", Afternoon),
                    ("夜間", Evening),
                    ("１コマ", One),
                    ("２コマ", Two),
                    ("３コマ", Three),
                    ("４コマ", Four),
                    ("５コマ", Five),
                ],
            ),
            statuses: LabelTable::new(
                MatchMode::Contains,
                &[
                    ("kimg_ptnw_ok.gif", Status::Vacant),
                    ("kimg_ptnw_ng.gif", Status::Occupied),
                    ("kimg_ptnw_de.gif", Status::Kikangai),
                    ("kimg_ptnw_open.gif", Status::Open),
                ],
            ),
            days_of_week: japanese_days_of_week(),
            empty_cell: EmptyCell::Unknown,
        },
        merge: MergeMode::ByKey,
        scope: LoadScope::All,
    }
}

fn kita() -> WardConfig {
    use Division::*;
    WardConfig {
        name: "kita".into(),
        code: "TOKYO_WARD_KITA".into(),
        columns: vec![
            Column::InstitutionId,
            Column::TokyoWard,
            Column::Building,
            Column::Institution,
            Column::Date,
            Column::DayOfWeek,
            Column::Reservation,
        ],
        normalizer: Normalizer {
            divisions: LabelTable::new(
                MatchMode::Exact,
                &[
                    ("午前", Morning),
                    ("午後", Afternoon),
                    ("夜間", Evening),
                    ("1", One),
                    ("2", Two),
                    ("3", Three),
                    ("4", Four),
                    ("5", Five),
                ],
            ),
            statuses: LabelTable::new(
                MatchMode::Contains,
                &[
                    ("icon_timetable_O.gif", Status::Vacant),
                    ("icon_timetable_X.gif", Status::Occupied),
                    ("icon_timetable_mainte.gif", Status::Keep),
                    ("icon_timetable_close.gif", Status::Closed),
                    ("icon_timetable_question.gif", Status::Question),
                ],
            ),
            days_of_week: japanese_days_of_week(),
            empty_cell: EmptyCell::Unknown,
        },
        merge: MergeMode::ByKey,
        scope: LoadScope::Ward,
    }
}

fn toshima() -> WardConfig {
    WardConfig {
        name: "toshima".into(),
        code: "TOKYO_WARD_TOSHIMA".into(),
        columns: DEFAULT_COLUMNS.to_vec(),
        normalizer: Normalizer {
            divisions: time_of_day_divisions(),
            statuses: LabelTable::new(
                MatchMode::Contains,
                &[
                    ("○", Status::Vacant),
                    ("△", Status::PartiallyVacant),
                    ("×", Status::Occupied),
                    ("－", Status::Kikangai),
                    ("休館", Status::Closed),
                    ("なし", Status::Closed),
                    ("＊", Status::OutOfTarget),
                    ("抽選", Status::Appliable),
                ],
            ),
            days_of_week: japanese_days_of_week(),
            empty_cell: EmptyCell::Unknown,
        },
        merge: MergeMode::Partitioned,
        scope: LoadScope::All,
    }
}

fn koutou() -> WardConfig {
    WardConfig {
        name: "koutou".into(),
        code: "TOKYO_WARD_KOUTOU".into(),
        columns: DEFAULT_COLUMNS.to_vec(),
        normalizer: Normalizer {
            divisions: time_of_day_divisions(),
            statuses: LabelTable::new(
                MatchMode::Suffix,
                &[
                    ("image/lw_emptybs.gif", Status::Vacant),
                    ("image/lw_finishs.gif", Status::Occupied),
                    ("image/lw_closes.gif", Status::Closed),
                    ("image/lw_keeps.gif", Status::Keep),
                    ("image/lw_kikangais.gif", Status::Kikangai),
                    ("image/lw_sound.gif", Status::Sound),
                ],
            ),
            days_of_week: japanese_days_of_week(),
            empty_cell: EmptyCell::Invalid,
        },
        merge: MergeMode::ByKey,
        scope: LoadScope::All,
    }
}

fn edogawa() -> WardConfig {
    WardConfig {
        name: "edogawa".into(),
        code: "TOKYO_WARD_EDOGAWA".into(),
        columns: DEFAULT_COLUMNS.to_vec(),
        normalizer: Normalizer {
            divisions: time_of_day_divisions(),
            statuses: LabelTable::new(
                MatchMode::Contains,
                &[
                    ("○", Status::Vacant),
                    ("×", Status::Occupied),
                    ("休館", Status::Closed),
                    ("－", Status::Kikangai),
                ],
            ),
            days_of_week: japanese_days_of_week(),
            // The week view leaves free slots blank.
            empty_cell: EmptyCell::Vacant,
        },
        merge: MergeMode::ByKey,
        scope: LoadScope::All,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_are_valid_and_uniquely_named() {
        let all = presets();
        for (i, ward) in all.iter().enumerate() {
            ward.validate().unwrap();
            assert!(all[..i].iter().all(|w| w.name != ward.name));
        }
    }

    #[test]
    fn unknown_ward() {
        assert!(matches!(
            WardConfig::preset("shibuya"),
            Err(ConfigError::UnknownWard(_))
        ));
    }

    #[test]
    fn kita_scope_is_its_ward_code() {
        let kita = WardConfig::preset("kita").unwrap();
        assert_eq!(
            kita.load_scope(),
            Scope::Column {
                column: Column::TokyoWard,
                value: "TOKYO_WARD_KITA".into()
            }
        );
    }

    #[test]
    fn preset_survives_json() {
        let toshima = WardConfig::preset("toshima").unwrap();
        let json = serde_json::to_string_pretty(&toshima).unwrap();
        assert!(json.contains("\"merge\": \"partitioned\""));
        assert_eq!(WardConfig::from_json(&json).unwrap(), toshima);
    }

    #[test]
    fn json_config_must_name_empty_cell_policy() {
        let json = r#"{
            "name": "arakawa",
            "code": "TOKYO_WARD_ARAKAWA",
            "columns": ["building", "institution", "date", "day_of_week", "reservation"],
            "normalizer": {
                "divisions": { "entries": [{ "token": "午前", "value": "RESERVATION_DIVISION_MORNING" }] },
                "statuses": { "mode": "contains", "entries": [{ "token": "○", "value": "RESERVATION_STATUS_VACANT" }] },
                "days_of_week": { "entries": [] }
            },
            "merge": "by_key",
            "scope": "all"
        }"#;
        assert!(matches!(
            WardConfig::from_json(json),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn ward_scope_needs_ward_column() {
        let mut bunkyo = WardConfig::preset("bunkyo").unwrap();
        bunkyo.scope = LoadScope::Ward;
        assert!(matches!(
            bunkyo.validate(),
            Err(ConfigError::ScopeWithoutWardColumn { .. })
        ));
    }
}
