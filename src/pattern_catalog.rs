/// Compiled regex bundles per log type and the compile-time registry
use crate::docsis_catalog::DOCSIS;
use crate::error::{AnalyzerError, Result};
use crate::traits::PatternCatalog;
use regex::Regex;

/// Log types known to `catalog_for`
pub const REGISTERED_LOG_TYPES: &[&str] = &["cm"];

/// Every pattern the preprocessor consults
///
/// Optional entries are rules a log type simply does not have.
#[derive(Debug, Clone)]
pub struct CatalogPatterns {
    /// Canonical timestamp at line start, with named groups `ts`, `seg` and `abn`
    pub main_ts: Regex,
    /// The same timestamp anywhere in a line (two logs glued together)
    pub inline_ts: Regex,
    /// Prompts, thread tags and stray characters, replaced with nothing
    pub clean_char: Option<Regex>,
    pub line_rm: Option<Regex>,
    pub table_title: Option<Regex>,
    pub nested_line: Regex,
    pub nested_line_exception: Option<Regex>,
    pub pri_to_nested: Option<Regex>,
    pub nested_to_pri: Option<Regex>,
    pub block_rm_start: Option<Regex>,
    pub block_rm_end: Option<Regex>,
    pub block_rm_pri: Option<Regex>,
    pub block_indent: Option<Regex>,
    pub block_indent2: Option<Regex>,
    pub block_indent2_end: Option<Regex>,
    pub ds_table_start: Option<Regex>,
    pub ds_table_end: Option<Regex>,
    pub us_table_start: Option<Regex>,
    pub us_table_end: Option<Regex>,
    pub table_title_common: Option<Regex>,
    /// A space is inserted after every match
    pub split_left: Vec<Regex>,
    /// A space is inserted before every match
    pub split_right: Vec<Regex>,
    /// Markers that open a new session segment
    pub session: Option<Regex>,
}

/// True if the optional rule exists and matches
#[inline]
pub fn hit(pattern: &Option<Regex>, text: &str) -> bool {
    pattern.as_ref().map_or(false, |re| re.is_match(text))
}

/// Look up the catalog registered for a log type
pub fn catalog_for(log_type: &str) -> Result<&'static dyn PatternCatalog> {
    match log_type {
        "cm" | "docsis" => Ok(&*DOCSIS),
        other => Err(AnalyzerError::UnknownLogType(other.to_string())),
    }
}
