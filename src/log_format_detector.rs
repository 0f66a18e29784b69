/// Timestamp prefix handling and timestamp-width learning
///
/// The width is the byte offset from the start of a raw line to its first
/// content character:
/// - `-1`: the input is not a log of the configured type
/// - `0`: lines carry no timestamp
/// - `>0`: width of the timestamp (plus inline labels) in bytes
use crate::hard_params::{parameterize, template_text};
use crate::line_ingest::RawLine;
use crate::pattern_catalog::CatalogPatterns;
use crate::template_library::event_id_of;
use crate::token_splitter::split_tokens;
use regex::Regex;
use rustc_hash::FxHashSet;
use tracing::debug;

pub const NOT_THIS_LOG_TYPE: i32 = -1;
pub const NO_TIMESTAMP: i32 = 0;

/// Number of leading non-empty lines tried when learning the width
const SAMPLE_LOGS: usize = 10;
/// Number of token cuts tried per line
const MAX_CUTS: usize = 50;

/// Main timestamp of a line plus the inline labels that follow it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimestampPrefix {
    /// e.g. `[20190719-08:58:23.738] `, empty when only labels are carried
    pub stamp: String,
    /// Segment or class label, e.g. `segsign: ` or `c012 `
    pub segment: Option<String>,
    /// Anomaly label `abn: `
    pub anomaly: Option<String>,
}

impl TimestampPrefix {
    pub fn labels_only(segment: &str) -> Self {
        Self {
            stamp: String::new(),
            segment: Some(segment.to_string()),
            anomaly: None,
        }
    }

    /// Labels in the order they appear on the line
    pub fn labels(&self) -> String {
        let mut out = String::new();
        if let Some(seg) = &self.segment {
            out.push_str(seg);
        }
        if let Some(abn) = &self.anomaly {
            out.push_str(abn);
        }
        out
    }

    pub fn render(&self) -> String {
        format!("{}{}", self.stamp, self.labels())
    }

    /// Timestamp without its trailing separator
    pub fn time(&self) -> &str {
        self.stamp.trim_end()
    }
}

/// Split a line into its main timestamp prefix and the remaining content
pub fn extract_prefix<'t>(main_ts: &Regex, line: &'t str) -> Option<(TimestampPrefix, &'t str)> {
    let caps = main_ts.captures(line)?;
    let whole = caps.get(0)?;
    let prefix = TimestampPrefix {
        stamp: caps
            .name("ts")
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| whole.as_str().to_string()),
        segment: caps.name("seg").map(|m| m.as_str().to_string()),
        anomaly: caps.name("abn").map(|m| m.as_str().to_string()),
    };
    Some((prefix, &line[whole.end()..]))
}

/// Learns the timestamp width by matching line tails against a template library
pub struct LogFormatDetector<'a> {
    patterns: &'a CatalogPatterns,
}

impl<'a> LogFormatDetector<'a> {
    pub fn new(patterns: &'a CatalogPatterns) -> Self {
        Self { patterns }
    }

    /// Byte offsets where each whitespace-separated token starts
    fn token_starts(content: &str) -> Vec<usize> {
        let mut starts = Vec::new();
        let mut in_token = false;
        for (i, c) in content.char_indices() {
            if c.is_whitespace() {
                in_token = false;
            } else if !in_token {
                starts.push(i);
                in_token = true;
            }
        }
        starts
    }

    /// Width of the first tail of `content` whose template is in the library
    fn width_of(&self, content: &str, known_ids: &FxHashSet<String>) -> Option<i32> {
        for (cut, start) in Self::token_starts(content)
            .into_iter()
            .take(MAX_CUTS)
            .enumerate()
        {
            let tail = split_tokens(self.patterns, &content[start..]);
            let tokens = parameterize(&tail);
            if tokens.is_empty() {
                continue;
            }
            let id = event_id_of(&template_text(&tokens));
            if known_ids.contains(&id) {
                debug!("Tail at cut {} (byte {}) matches template {}", cut, start, id);
                return Some(if cut == 0 { NO_TIMESTAMP } else { start as i32 });
            }
        }
        None
    }

    /// Learn the width from the first few non-empty lines
    ///
    /// # Returns
    /// The width of the first line with a matching tail, or `NOT_THIS_LOG_TYPE`
    pub fn detect_width(&self, lines: &[RawLine], known_ids: &FxHashSet<String>) -> i32 {
        if known_ids.is_empty() {
            return NOT_THIS_LOG_TYPE;
        }

        lines
            .iter()
            .map(RawLine::content)
            .filter(|content| !content.trim().is_empty())
            .take(SAMPLE_LOGS)
            .find_map(|content| self.width_of(content, known_ids))
            .unwrap_or(NOT_THIS_LOG_TYPE)
    }

    /// Width of the main timestamp pattern on the first sample line it matches
    ///
    /// Used when the library cannot tell (first training run). Returns
    /// `NO_TIMESTAMP` when none of the sample lines carries a timestamp.
    pub fn probe_width(&self, lines: &[RawLine]) -> i32 {
        lines
            .iter()
            .map(RawLine::content)
            .filter(|content| !content.trim().is_empty())
            .take(SAMPLE_LOGS)
            .find_map(|content| extract_prefix(&self.patterns.main_ts, content))
            .map_or(NO_TIMESTAMP, |(prefix, _)| prefix.stamp.len() as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docsis_catalog::DOCSIS;
    use crate::traits::PatternCatalog;

    fn ids(templates: &[&str]) -> FxHashSet<String> {
        templates.iter().map(|t| event_id_of(t)).collect()
    }

    #[test]
    fn test_extract_prefix() {
        let p = DOCSIS.patterns();
        let (prefix, rest) =
            extract_prefix(&p.main_ts, "[20190719-08:58:23.738] abn: link down").unwrap();
        assert_eq!(prefix.stamp, "[20190719-08:58:23.738] ");
        assert_eq!(prefix.segment, None);
        assert_eq!(prefix.anomaly.as_deref(), Some("abn: "));
        assert_eq!(prefix.time(), "[20190719-08:58:23.738]");
        assert_eq!(rest, "link down");
        assert!(extract_prefix(&p.main_ts, "no stamp here").is_none());
    }

    #[test]
    fn test_render_with_labels() {
        let prefix = TimestampPrefix {
            stamp: "[20190719-08:58:23.739] ".to_string(),
            segment: Some("segsign: ".to_string()),
            anomaly: None,
        };
        assert_eq!(prefix.render(), "[20190719-08:58:23.739] segsign: ");
        assert_eq!(TimestampPrefix::labels_only("segsign: ").render(), "segsign: ");
    }

    #[test]
    fn test_detect_width_bracketed() {
        let detector = LogFormatDetector::new(DOCSIS.patterns());
        let lines = vec![RawLine::new(
            1,
            "[20190719-08:58:23.738] BcmCmDsChan:: DsLockFail ...\n",
        )];
        let width = detector.detect_width(&lines, &ids(&["BcmCmDsChan:: DsLockFail ..."]));
        assert_eq!(width, 24);
    }

    #[test]
    fn test_detect_width_no_timestamp() {
        let detector = LogFormatDetector::new(DOCSIS.patterns());
        let lines = vec![RawLine::new(1, "BcmCmDsChan:: DsLockFail ...\n")];
        let width = detector.detect_width(&lines, &ids(&["BcmCmDsChan:: DsLockFail ..."]));
        assert_eq!(width, NO_TIMESTAMP);
    }

    #[test]
    fn test_detect_width_parameters_and_later_lines() {
        let detector = LogFormatDetector::new(DOCSIS.patterns());
        let lines = vec![
            RawLine::new(1, "\n"),
            RawLine::new(2, "garbage that matches nothing\n"),
            RawLine::new(3, "[20190719-08:58:24.001] Lock on CH12 snr=35\n"),
        ];
        let width = detector.detect_width(&lines, &ids(&["Lock on <*> snr= <*>"]));
        assert_eq!(width, 24);
    }

    #[test]
    fn test_probe_width() {
        let detector = LogFormatDetector::new(DOCSIS.patterns());
        let lines = vec![
            RawLine::new(1, "boot noise\n"),
            RawLine::new(2, "[20190719-08:58:23.738] segsign: anything\n"),
        ];
        assert_eq!(detector.probe_width(&lines), 24);
        assert_eq!(detector.probe_width(&lines[..1]), NO_TIMESTAMP);
    }

    #[test]
    fn test_detect_width_unknown() {
        let detector = LogFormatDetector::new(DOCSIS.patterns());
        let lines = vec![RawLine::new(1, "something else entirely\n")];
        assert_eq!(
            detector.detect_width(&lines, &ids(&["BcmCmDsChan:: DsLockFail ..."])),
            NOT_THIS_LOG_TYPE
        );
        assert_eq!(detector.detect_width(&lines, &FxHashSet::default()), NOT_THIS_LOG_TYPE);
    }
}
