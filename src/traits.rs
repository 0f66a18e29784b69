/// Seams between the generic pipeline and per-log-type knowledge
///
/// The preprocessor and the timestamp handling are written against
/// `PatternCatalog`, so a new device family only needs a new catalog
/// registered in `pattern_catalog::catalog_for`.
use crate::pattern_catalog::CatalogPatterns;

/// Channel status tables that get reflowed into one event per row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Downstream,
    Upstream,
}

// ============================================================================
// Pattern Catalog Trait
// ============================================================================

/// Compiled pattern sets and table knowledge for one log type
///
/// Implementations are pure data plus row reformatting; all control flow
/// lives in the preprocessor.
pub trait PatternCatalog: Send + Sync {
    /// Name used in configuration (`log_type`)
    fn log_type(&self) -> &str;

    /// The compiled regex bundle
    fn patterns(&self) -> &CatalogPatterns;

    /// Reformat one table data row into a canonical primary line
    ///
    /// # Returns
    /// - `Some(line)` without a line terminator
    /// - `None` if the row is truncated or garbled and must be dropped
    ///
    /// Default implementation knows no tables and drops every row
    fn reflow_row(&self, table: TableKind, row: &str) -> Option<String> {
        let _ = (table, row);
        None
    }
}
