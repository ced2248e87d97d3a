//! DuckDB sink: scoped replace and bulk insert in a single transaction.

use std::path::Path;

use arrow::array::{Array, LargeStringArray, StringArray, StringViewArray};
use arrow::record_batch::RecordBatch;
use duckdb::{params_from_iter, Connection};
use shisetsu_core::schema::{parse_row, render_row};
use shisetsu_core::{Column, LoadBatch, Scope, StoredRow};
use tracing::info;

use crate::{LoadOutcome, LoadSink, StoreError};

const DEFAULT_TABLE: &str = "reservation";

/// DuckDB-backed reservation table.
///
/// Every column is stored as `VARCHAR` in its rendered form, so the table can
/// be copied verbatim into any other SQL store. The table is created on the
/// first load with the column order of that load.
///
/// Supports both in-memory (ephemeral) and persistent (file-backed) modes.
pub struct DuckStore {
    conn: Connection,
    table: String,
}

impl DuckStore {
    /// Open an in-memory DuckDB database.
    pub fn open() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn,
            table: DEFAULT_TABLE.to_string(),
        })
    }

    /// Open or create a persistent DuckDB database at the given path.
    pub fn open_persistent(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Ok(Self {
            conn,
            table: DEFAULT_TABLE.to_string(),
        })
    }

    /// Target another table. Names are restricted to `[A-Za-z_][A-Za-z0-9_]*`
    /// because they are spliced into SQL.
    pub fn with_table(mut self, table: &str) -> Result<Self, StoreError> {
        let mut chars = table.chars();
        let valid = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(StoreError::Other(format!("invalid table name {table:?}")));
        }
        self.table = table.to_string();
        Ok(self)
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Stored column layout, or `None` when the table does not exist yet.
    pub fn columns(&self) -> Result<Option<Vec<Column>>, StoreError> {
        table_columns(&self.conn, &self.table)
    }

    /// Number of rows in the table (0 when it does not exist).
    pub fn count(&self) -> Result<usize, StoreError> {
        if self.columns()?.is_none() {
            return Ok(0);
        }
        let sql = format!("SELECT count(*)::BIGINT AS cnt FROM {}", self.table);
        let mut stmt = self.conn.prepare(&sql)?;
        let batches: Vec<RecordBatch> = stmt.query_arrow([])?.collect();
        let batch = batches.first().ok_or(StoreError::NoResults)?;
        let col = batch
            .column(0)
            .as_any()
            .downcast_ref::<arrow::array::Int64Array>()
            .ok_or_else(|| StoreError::Other("count column not i64".into()))?;
        Ok(col.value(0) as usize)
    }

    /// Every stored row, in insertion order.
    pub fn read_rows(&self) -> Result<Vec<StoredRow>, StoreError> {
        let Some(columns) = self.columns()? else {
            return Ok(Vec::new());
        };
        let names = columns
            .iter()
            .map(|c| c.name())
            .collect::<Vec<_>>()
            .join(", ");
        let batches = self.query_arrow(&format!(
            "SELECT {names} FROM {} ORDER BY rowid",
            self.table
        ))?;

        let mut rows = Vec::new();
        for batch in &batches {
            let cols = (0..batch.num_columns())
                .map(|i| strings(batch, i))
                .collect::<Result<Vec<_>, _>>()?;
            for r in 0..batch.num_rows() {
                let fields: Vec<String> = cols.iter().map(|col| col[r].clone()).collect();
                let stored = parse_row(&columns, &fields).map_err(|source| StoreError::Field {
                    row: rows.len() + 1,
                    source,
                })?;
                rows.push(stored);
            }
        }
        Ok(rows)
    }

    // ── Escape hatch ──

    /// Execute arbitrary SQL and return Arrow RecordBatches.
    pub fn query_arrow(&self, sql: &str) -> Result<Vec<RecordBatch>, StoreError> {
        let mut stmt = self.conn.prepare(sql)?;
        let batches: Vec<RecordBatch> = stmt.query_arrow([])?.collect();
        Ok(batches)
    }

    /// Access the underlying DuckDB connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl LoadSink for DuckStore {
    fn replace_scope(&mut self, scope: &Scope) -> Result<usize, StoreError> {
        delete_scope(&self.conn, &self.table, scope)
    }

    fn bulk_insert(&mut self, batch: &LoadBatch, columns: &[Column]) -> Result<usize, StoreError> {
        ensure_table(&self.conn, &self.table, columns)?;
        insert_batch(&self.conn, &self.table, batch, columns)
    }

    fn is_transactional(&self) -> bool {
        true
    }

    /// Runs the delete and the insert in one transaction; on failure the
    /// previous rows of the scope survive.
    fn replace_all(
        &mut self,
        scope: &Scope,
        batch: &LoadBatch,
        columns: &[Column],
    ) -> Result<LoadOutcome, StoreError> {
        let tx = self.conn.transaction()?;
        ensure_table(&tx, &self.table, columns)?;
        let removed = delete_scope(&tx, &self.table, scope)?;
        let inserted = insert_batch(&tx, &self.table, batch, columns)?;
        tx.commit()?;
        info!(table = %self.table, scope = %scope, removed, inserted, "batch committed");
        Ok(LoadOutcome { removed, inserted })
    }
}

// ── Statements (shared by plain connections and transactions) ──

fn table_columns(conn: &Connection, table: &str) -> Result<Option<Vec<Column>>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT column_name FROM information_schema.columns \
         WHERE table_name = ? ORDER BY ordinal_position",
    )?;
    let batches: Vec<RecordBatch> = stmt.query_arrow([table])?.collect();
    let mut columns = Vec::new();
    for batch in &batches {
        for name in strings(batch, 0)? {
            columns.push(
                name.parse::<Column>()
                    .map_err(|source| StoreError::Field { row: 0, source })?,
            );
        }
    }
    Ok((!columns.is_empty()).then_some(columns))
}

fn ensure_table(conn: &Connection, table: &str, columns: &[Column]) -> Result<(), StoreError> {
    match table_columns(conn, table)? {
        Some(stored) if stored.as_slice() == columns => Ok(()),
        Some(stored) => Err(StoreError::ColumnMismatch {
            expected: join_names(columns),
            found: join_names(&stored),
        }),
        None => {
            let defs = columns
                .iter()
                .map(|c| format!("{} VARCHAR NOT NULL", c.name()))
                .collect::<Vec<_>>()
                .join(", ");
            conn.execute_batch(&format!("CREATE TABLE {table} ({defs})"))?;
            info!(table, columns = %join_names(columns), "created table");
            Ok(())
        }
    }
}

fn delete_scope(conn: &Connection, table: &str, scope: &Scope) -> Result<usize, StoreError> {
    let Some(stored) = table_columns(conn, table)? else {
        return Ok(0);
    };
    let removed = match scope {
        Scope::All => conn.execute(&format!("DELETE FROM {table}"), [])?,
        Scope::Column { column, value } => {
            if !stored.contains(column) {
                return Err(StoreError::ScopeColumnMissing(*column));
            }
            conn.execute(
                &format!("DELETE FROM {table} WHERE {} = ?", column.name()),
                [value.as_str()],
            )?
        }
    };
    Ok(removed)
}

fn insert_batch(
    conn: &Connection,
    table: &str,
    batch: &LoadBatch,
    columns: &[Column],
) -> Result<usize, StoreError> {
    let placeholders = vec!["?"; columns.len()].join(", ");
    let sql = format!(
        "INSERT INTO {table} ({}) VALUES ({placeholders})",
        join_names(columns)
    );
    let mut stmt = conn.prepare(&sql)?;
    for record in &batch.records {
        let fields = render_row(record, &batch.ward, columns);
        stmt.execute(params_from_iter(fields.iter().map(String::as_str)))?;
    }
    Ok(batch.len())
}

fn join_names(columns: &[Column]) -> String {
    columns
        .iter()
        .map(|c| c.name())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Extract a string column, whichever string layout DuckDB exported.
fn strings(batch: &RecordBatch, idx: usize) -> Result<Vec<String>, StoreError> {
    let col = batch.column(idx);
    let any = col.as_any();
    let get = |i: usize| -> Option<String> {
        if col.is_null(i) {
            return None;
        }
        if let Some(a) = any.downcast_ref::<StringArray>() {
            Some(a.value(i).to_string())
        } else if let Some(a) = any.downcast_ref::<LargeStringArray>() {
            Some(a.value(i).to_string())
        } else {
            any.downcast_ref::<StringViewArray>()
                .map(|a| a.value(i).to_string())
        }
    };
    (0..batch.num_rows())
        .map(|i| {
            get(i).ok_or_else(|| {
                StoreError::Other(format!(
                    "column {} row {i}: expected non-null string, got {}",
                    batch.schema().field(idx).name(),
                    col.data_type()
                ))
            })
        })
        .collect()
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

    fn record(institution: &str, day: u32) -> ReservationRecord {
        let mut reservation = BTreeMap::new();
        reservation.insert(Division::Morning, Status::Vacant);
        reservation.insert(Division::Afternoon, Status::Occupied);
        ReservationRecord {
            key: RecordKey {
                building: "北とぴあ".into(),
                institution: institution.into(),
                date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
                institution_id: UNIDENTIFIED_INSTITUTION,
            },
            day_of_week: DayOfWeek::Wednesday,
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

    const KITA_COLUMNS: &[Column] = &[
        Column::InstitutionId,
        Column::TokyoWard,
        Column::Building,
        Column::Institution,
        Column::Date,
        Column::DayOfWeek,
        Column::Reservation,
    ];

    fn kita_scope() -> Scope {
        Scope::Column {
            column: Column::TokyoWard,
            value: "TOKYO_WARD_KITA".into(),
        }
    }

    #[test]
    fn empty_store_has_no_table() {
        let store = DuckStore::open().unwrap();
        assert!(store.columns().unwrap().is_none());
        assert_eq!(store.count().unwrap(), 0);
        assert!(store.read_rows().unwrap().is_empty());
    }

    #[test]
    fn replace_all_twice_is_idempotent() {
        let mut store = DuckStore::open().unwrap();
        let b = batch("TOKYO_WARD_KITA", vec![record("A", 1), record("A", 2)]);

        store.replace_all(&Scope::All, &b, DEFAULT_COLUMNS).unwrap();
        let once = store.read_rows().unwrap();
        let outcome = store.replace_all(&Scope::All, &b, DEFAULT_COLUMNS).unwrap();
        let twice = store.read_rows().unwrap();

        assert_eq!(outcome, LoadOutcome { removed: 2, inserted: 2 });
        assert_eq!(once, twice);
        assert_eq!(store.count().unwrap(), 2);
        assert_eq!(twice[1].record, record("A", 2));
    }

    #[test]
    fn ward_scope_only_replaces_that_ward() {
        let mut store = DuckStore::open().unwrap();
        store
            .bulk_insert(&batch("TOKYO_WARD_BUNKYO", vec![record("X", 3)]), KITA_COLUMNS)
            .unwrap();
        store
            .replace_all(&kita_scope(), &batch("TOKYO_WARD_KITA", vec![record("A", 1)]), KITA_COLUMNS)
            .unwrap();
        let outcome = store
            .replace_all(
                &kita_scope(),
                &batch("TOKYO_WARD_KITA", vec![record("A", 1), record("B", 1)]),
                KITA_COLUMNS,
            )
            .unwrap();
        assert_eq!(outcome.removed, 1);
        assert_eq!(store.count().unwrap(), 3);

        let bunkyo: Vec<StoredRow> = store
            .read_rows()
            .unwrap()
            .into_iter()
            .filter(|r| r.ward.as_deref() == Some("TOKYO_WARD_BUNKYO"))
            .collect();
        assert_eq!(bunkyo.len(), 1);
    }

    #[test]
    fn failed_insert_rolls_back_the_delete() {
        let mut store = DuckStore::open().unwrap();
        store
            .connection()
            .execute_batch(
                "CREATE TABLE reservation (
                    building VARCHAR NOT NULL,
                    institution VARCHAR NOT NULL CHECK (institution <> 'broken'),
                    date VARCHAR NOT NULL,
                    day_of_week VARCHAR NOT NULL,
                    reservation VARCHAR NOT NULL,
                    institution_id VARCHAR NOT NULL
                )",
            )
            .unwrap();
        store
            .replace_all(&Scope::All, &batch("W", vec![record("A", 1)]), DEFAULT_COLUMNS)
            .unwrap();

        let bad = batch("W", vec![record("B", 1), record("broken", 1)]);
        assert!(store.replace_all(&Scope::All, &bad, DEFAULT_COLUMNS).is_err());

        let rows = store.read_rows().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].record.key.institution, "A");
    }

    #[test]
    fn mismatched_layout_is_rejected() {
        let mut store = DuckStore::open().unwrap();
        let b = batch("W", vec![record("A", 1)]);
        store.bulk_insert(&b, DEFAULT_COLUMNS).unwrap();
        assert!(matches!(
            store.replace_all(&Scope::All, &b, KITA_COLUMNS),
            Err(StoreError::ColumnMismatch { .. })
        ));
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn ward_scope_needs_ward_column() {
        let mut store = DuckStore::open().unwrap();
        store
            .bulk_insert(&batch("W", vec![record("A", 1)]), DEFAULT_COLUMNS)
            .unwrap();
        assert!(matches!(
            store.replace_scope(&kita_scope()),
            Err(StoreError::ScopeColumnMissing(Column::TokyoWard))
        ));
    }

    #[test]
    fn table_names_are_checked() {
        assert!(DuckStore::open().unwrap().with_table("kita_2024").is_ok());
        assert!(DuckStore::open().unwrap().with_table("x; DROP TABLE y").is_err());
        assert!(DuckStore::open().unwrap().with_table("1abc").is_err());
    }

    #[test]
    fn persistent_rows_survive_reopen() {
        let tmp = tempfile::TempDir::new().unwrap();
        let db_path = tmp.path().join("reservation.duckdb");

        let mut store = DuckStore::open_persistent(&db_path).unwrap();
        store
            .replace_all(&Scope::All, &batch("W", vec![record("A", 1)]), DEFAULT_COLUMNS)
            .unwrap();
        drop(store);

        let store = DuckStore::open_persistent(&db_path).unwrap();
        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(store.read_rows().unwrap()[0].record, record("A", 1));
    }
}
