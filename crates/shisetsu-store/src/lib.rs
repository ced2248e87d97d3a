//! Storage layer: load sinks for reservation batches (flat TSV file, DuckDB).

mod error;
pub use error::StoreError;

mod sink;
pub use sink::{LoadOutcome, LoadSink};

mod flat;
pub use flat::FlatFileSink;

#[cfg(feature = "duckdb")]
mod duck;
#[cfg(feature = "duckdb")]
pub use duck::DuckStore;
