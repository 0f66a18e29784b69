//! Line-oriented console log cleaner
//!
//! Turns raw console output into one cleaned line per input line (or none):
//! 1. Main timestamp extraction and segment-label hand-over
//! 2. Heading purge until the first primary line
//! 3. Repair of two logs concatenated on one line
//! 4. Character clean (prompts, thread tags, escape codes)
//! 5. Block removal, table reflow, indent and flatten rules
//! 6. Empty-line compaction
//! 7. Token split
//! 8. Session labeling
//!
//! Lines with leading whitespace are *nested* (continuations), the others
//! are *primary*. The merger later folds nested lines into their primary.

use crate::config::Config;
use crate::log_format_detector::{extract_prefix, TimestampPrefix};
use crate::line_ingest::RawLine;
use crate::pattern_catalog::{hit, CatalogPatterns};
use crate::token_splitter::split_tokens;
use crate::traits::{PatternCatalog, TableKind};
use tracing::{debug, info};

/// Label inserted in front of a line that opens a new session
pub const SESSION_LABEL: &str = "segsign: ";

/// A cleaned line; `body` has no terminator and keeps its leading indent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanedLine {
    /// Source line number, unknown when reloaded from an intermediate file
    pub raw_line_no: Option<usize>,
    pub prefix: Option<TimestampPrefix>,
    pub body: String,
}

impl CleanedLine {
    pub fn is_nested(&self, patterns: &CatalogPatterns) -> bool {
        patterns.nested_line.is_match(&self.body)
    }

    pub fn render(&self) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}{}\n", prefix.render(), self.body),
            None => format!("{}\n", self.body),
        }
    }

    /// Parse a line of a `new` intermediate file back
    pub fn parse(patterns: &CatalogPatterns, line: &str) -> Self {
        let line = line.trim_end_matches(['\n', '\r']);
        match extract_prefix(&patterns.main_ts, line) {
            Some((prefix, rest)) => Self {
                raw_line_no: None,
                prefix: Some(prefix),
                body: rest.to_string(),
            },
            None => Self {
                raw_line_no: None,
                prefix: None,
                body: line.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockState {
    Reset,
    /// Removing until `block_rm_end`
    Block,
    /// Removing until the next primary line
    Block2,
    /// Indenting until an empty line
    BlockIndent,
    /// Indenting until `block_indent2_end`, inclusive
    BlockIndent2,
    /// Removing a common table until an empty line
    BlockTitle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TableState {
    Reset,
    Table(TableKind),
}

/// What the rules decided for one line
#[derive(Debug, PartialEq, Eq)]
enum LineFate {
    Keep(String),
    Remove,
    Empty,
}

#[derive(Debug, Clone, Copy)]
pub struct PreprocessOptions {
    /// Keep the main timestamp (and labels) as a prefix
    pub reserve_ts: bool,
    /// Lines of this log type carry a leading timestamp
    pub has_timestamp: bool,
    /// Carry segment labels of removed lines to the next surviving line
    pub hand_over_labels: bool,
    /// Insert `segsign: ` on session start markers
    pub label_sessions: bool,
}

impl Default for PreprocessOptions {
    fn default() -> Self {
        Self {
            reserve_ts: true,
            has_timestamp: true,
            hand_over_labels: false,
            label_sessions: false,
        }
    }
}

impl PreprocessOptions {
    pub fn from_config(config: &Config, head_offset: i32) -> Self {
        Self {
            reserve_ts: config.reserve_ts,
            has_timestamp: head_offset != 0,
            hand_over_labels: config.hands_over_labels(),
            label_sessions: config.labels_sessions(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PreprocessStats {
    pub seen: usize,
    pub emitted: usize,
    pub removed: usize,
    pub empty: usize,
    pub table_rows: usize,
}

pub struct Preprocessor<'a, C: PatternCatalog + ?Sized> {
    catalog: &'a C,
    options: PreprocessOptions,
    in_log_blk: BlockState,
    in_stat_tbl: TableState,
    tbl_hdr_done: bool,
    heading: bool,
    consecutive_empty_count: usize,
    last_label: Option<String>,
    stats: PreprocessStats,
}

impl<'a, C: PatternCatalog + ?Sized> Preprocessor<'a, C> {
    pub fn new(catalog: &'a C, options: PreprocessOptions) -> Self {
        Self {
            catalog,
            options,
            in_log_blk: BlockState::Reset,
            in_stat_tbl: TableState::Reset,
            tbl_hdr_done: false,
            heading: true,
            consecutive_empty_count: 0,
            last_label: None,
            stats: PreprocessStats::default(),
        }
    }

    pub fn stats(&self) -> PreprocessStats {
        self.stats
    }

    fn patterns(&self) -> &'a CatalogPatterns {
        self.catalog.patterns()
    }

    /// Remember the segment label of a line that will not be emitted
    fn hand_over(&mut self, prefix: &Option<TimestampPrefix>) {
        if !self.options.hand_over_labels {
            return;
        }
        if let Some(seg) = prefix.as_ref().and_then(|p| p.segment.as_ref()) {
            debug!("Handing segment label '{}' to the next line", seg.trim_end());
            self.last_label = Some(seg.clone());
        }
    }

    fn is_nested(&self, text: &str) -> bool {
        self.patterns().nested_line.is_match(text)
    }

    fn is_table_row(text: &str) -> bool {
        text.trim_start()
            .chars()
            .next()
            .map_or(false, |c| c.is_ascii_digit())
    }

    /// Process one raw line
    ///
    /// # Returns
    /// - `Some(line)` for a line that survives cleaning
    /// - `None` for removed, empty and heading lines
    pub fn process_line(&mut self, raw: &RawLine) -> Option<CleanedLine> {
        self.stats.seen += 1;
        let p = self.patterns();
        let content = raw.content();

        // 1. Timestamp extraction
        let (mut prefix, mut work) = if self.options.has_timestamp {
            match extract_prefix(&p.main_ts, content) {
                Some((prefix, rest)) => (Some(prefix), rest.to_string()),
                None if self.options.reserve_ts && self.heading => {
                    debug!("Line {} has no timestamp in heading, dropped", raw.line_no);
                    self.stats.removed += 1;
                    return None;
                }
                None => (None, content.to_string()),
            }
        } else {
            (None, content.to_string())
        };

        // 2. Heading purge
        if self.heading {
            if work.trim().is_empty() || self.is_nested(&work) {
                self.hand_over(&prefix);
                self.stats.removed += 1;
                return None;
            }
            self.heading = false;
        }

        // 3. Two logs on one line: keep the last one
        if self.options.has_timestamp {
            let last = p.inline_ts.find_iter(&work).filter(|m| m.start() >= 2).last();
            if let Some(m) = last {
                debug!("Line {} holds concatenated logs, keeping the tail", raw.line_no);
                let tail = work[m.start()..].to_string();
                match extract_prefix(&p.main_ts, &tail) {
                    Some((inner, rest)) => {
                        prefix = Some(inner);
                        work = rest.to_string();
                    }
                    None => work = tail,
                }
            }
        }

        // 4. Character clean
        if let Some(clean) = &p.clean_char {
            if clean.is_match(&work) {
                work = clean.replace_all(&work, "").into_owned();
            }
        }

        // 5./6. Domain rules and empty lines
        let line = match self.apply_rules(work) {
            LineFate::Keep(line) => line,
            LineFate::Remove => {
                self.hand_over(&prefix);
                self.stats.removed += 1;
                return None;
            }
            LineFate::Empty => {
                self.consecutive_empty_count += 1;
                self.hand_over(&prefix);
                self.stats.empty += 1;
                return None;
            }
        };
        self.consecutive_empty_count = 0;

        // 7. Token split, trailing whitespace dropped with the terminator
        let mut body = split_tokens(p, line.trim_end());

        // 8. Session labeling and inherited labels
        let nested = self.is_nested(&body);
        if self.options.label_sessions && !nested && hit(&p.session, &body) {
            set_segment(&mut prefix, SESSION_LABEL);
        }
        // A nested line is folded away by the merger, the label waits for a primary
        if !nested {
            if let Some(label) = self.last_label.take() {
                set_segment(&mut prefix, &label);
            }
        }

        // 9. Emit
        let prefix = if self.options.reserve_ts {
            prefix
        } else {
            // Labels still have to reach the consumer without the timestamp
            if let Some(labels) = prefix.as_ref().map(TimestampPrefix::labels) {
                if !labels.is_empty() && !nested {
                    body = format!("{}{}", labels, body);
                }
            }
            None
        };

        self.stats.emitted += 1;
        Some(CleanedLine {
            raw_line_no: Some(raw.line_no),
            prefix,
            body,
        })
    }

    fn apply_rules(&mut self, work: String) -> LineFate {
        let p = self.patterns();
        let empty = work.trim().is_empty();
        let nested = !empty && self.is_nested(&work);

        match self.in_log_blk {
            BlockState::Reset => {}
            BlockState::Block => {
                if hit(&p.block_rm_end, &work) {
                    self.in_log_blk = BlockState::Reset;
                }
                return LineFate::Remove;
            }
            BlockState::Block2 => {
                if empty || nested {
                    return LineFate::Remove;
                }
                self.in_log_blk = BlockState::Reset;
            }
            BlockState::BlockTitle => {
                if empty {
                    self.in_log_blk = BlockState::Reset;
                    return LineFate::Empty;
                }
                return LineFate::Remove;
            }
            BlockState::BlockIndent => {
                if empty {
                    self.in_log_blk = BlockState::Reset;
                    return LineFate::Empty;
                }
                return LineFate::Keep(indent(&work));
            }
            BlockState::BlockIndent2 => {
                if empty {
                    return LineFate::Empty;
                }
                if hit(&p.block_indent2_end, &work) {
                    self.in_log_blk = BlockState::Reset;
                }
                return LineFate::Keep(indent(&work));
            }
        }

        if let TableState::Table(kind) = self.in_stat_tbl {
            let end = match kind {
                TableKind::Downstream => &p.ds_table_end,
                TableKind::Upstream => &p.us_table_end,
            };
            // The end of a table only counts once a data row was seen
            if self.tbl_hdr_done && hit(end, &work) {
                self.in_stat_tbl = TableState::Reset;
                self.tbl_hdr_done = false;
                return if empty { LineFate::Empty } else { LineFate::Remove };
            }
            if empty {
                return LineFate::Empty;
            }
            if nested {
                if !Self::is_table_row(&work) {
                    // Column headers and separators
                    return LineFate::Remove;
                }
                return match self.catalog.reflow_row(kind, &work) {
                    Some(line) => {
                        self.tbl_hdr_done = true;
                        self.stats.table_rows += 1;
                        LineFate::Keep(line)
                    }
                    None => LineFate::Remove,
                };
            }
            // A primary line inside a table is another thread's output; keep it
            debug!("Primary line interleaved with a {:?} table", kind);
        }

        if empty {
            return LineFate::Empty;
        }

        if hit(&p.block_rm_start, &work) {
            self.in_log_blk = BlockState::Block;
            return LineFate::Remove;
        }
        if hit(&p.block_rm_pri, &work) {
            self.in_log_blk = BlockState::Block2;
            return LineFate::Remove;
        }
        if hit(&p.line_rm, &work) {
            return LineFate::Remove;
        }
        if hit(&p.block_indent, &work) {
            self.in_log_blk = BlockState::BlockIndent;
            return LineFate::Keep(work);
        }
        if hit(&p.block_indent2, &work) {
            self.in_log_blk = BlockState::BlockIndent2;
            return LineFate::Keep(work);
        }
        if hit(&p.pri_to_nested, &work) {
            return LineFate::Keep(indent(&work));
        }
        if hit(&p.ds_table_start, &work) {
            self.in_stat_tbl = TableState::Table(TableKind::Downstream);
            self.tbl_hdr_done = false;
            return LineFate::Remove;
        }
        if hit(&p.us_table_start, &work) {
            self.in_stat_tbl = TableState::Table(TableKind::Upstream);
            self.tbl_hdr_done = false;
            return LineFate::Remove;
        }
        if hit(&p.table_title_common, &work) {
            self.in_log_blk = BlockState::BlockTitle;
            return LineFate::Remove;
        }
        if hit(&p.table_title, &work) {
            return LineFate::Remove;
        }
        if hit(&p.nested_to_pri, &work) {
            return LineFate::Keep(work.trim_start().to_string());
        }
        if nested
            && self.consecutive_empty_count >= 2
            && !hit(&p.nested_line_exception, &work)
        {
            return LineFate::Keep(work.trim_start().to_string());
        }

        LineFate::Keep(work)
    }

    /// Clean a whole file
    pub fn run<'r>(&mut self, lines: impl IntoIterator<Item = &'r RawLine>) -> Vec<CleanedLine> {
        let cleaned: Vec<CleanedLine> = lines
            .into_iter()
            .filter_map(|line| self.process_line(line))
            .collect();

        let stats = self.stats;
        info!(
            "Preprocessed {} lines: {} kept, {} removed, {} empty, {} table rows",
            stats.seen, stats.emitted, stats.removed, stats.empty, stats.table_rows
        );
        cleaned
    }
}

fn indent(line: &str) -> String {
    format!(" {}", line)
}

/// Set the segment label unless the line already carries one
fn set_segment(prefix: &mut Option<TimestampPrefix>, label: &str) {
    match prefix {
        Some(p) if p.segment.is_none() => p.segment = Some(label.to_string()),
        Some(_) => {}
        None => *prefix = Some(TimestampPrefix::labels_only(label)),
    }
}
