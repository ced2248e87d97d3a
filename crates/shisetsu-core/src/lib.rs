pub mod aggregate;
pub mod codec;
pub mod collect;
pub mod date;
pub mod labels;
pub mod model;
pub mod schema;
pub mod ward;

pub use aggregate::{AggregateError, Aggregator};
pub use collect::{CollectError, Collector, Page, TsvCollector};
pub use date::{DateError, DateResolver, DateToken};
pub use labels::{EmptyCell, LabelTable, MatchMode, Normalizer};
pub use model::{
    AggregateStats, Canonical, DayOfWeek, Division, LoadBatch, RawRow, RecordKey,
    ReservationRecord, ScrapedRow, Status, UNIDENTIFIED_INSTITUTION,
};
pub use schema::{Column, FieldError, Scope, StoredRow, DEFAULT_COLUMNS};
pub use ward::{ConfigError, LoadScope, MergeMode, WardConfig};
