use shisetsu_core::{Column, LoadBatch, Scope};
use tracing::info;

use crate::StoreError;

/// Rows removed and inserted by one [`LoadSink::replace_all`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadOutcome {
    pub removed: usize,
    pub inserted: usize,
}

/// A persistence target with replace-by-scope semantics.
///
/// Loading the same batch into the same scope twice leaves the same rows as
/// loading it once. Callers must not run two loads against one scope at the
/// same time.
pub trait LoadSink {
    /// Delete every stored row inside `scope`. Returns the number removed.
    fn replace_scope(&mut self, scope: &Scope) -> Result<usize, StoreError>;

    /// Append every record of `batch`, fields in `columns` order.
    fn bulk_insert(&mut self, batch: &LoadBatch, columns: &[Column]) -> Result<usize, StoreError>;

    /// Whether [`replace_all`](Self::replace_all) is atomic.
    ///
    /// When it is not, a failed insert leaves `scope` empty; retrying the
    /// whole batch is safe.
    fn is_transactional(&self) -> bool {
        false
    }

    /// Clear `scope`, then insert `batch`.
    fn replace_all(
        &mut self,
        scope: &Scope,
        batch: &LoadBatch,
        columns: &[Column],
    ) -> Result<LoadOutcome, StoreError> {
        let removed = self.replace_scope(scope)?;
        info!(scope = %scope, removed, "scope cleared");
        let inserted = self.bulk_insert(batch, columns)?;
        Ok(LoadOutcome { removed, inserted })
    }
}
