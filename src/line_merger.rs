/// Folds nested continuation lines into their primary line
use crate::log_format_detector::{extract_prefix, TimestampPrefix};
use crate::pattern_catalog::CatalogPatterns;
use crate::preprocessor::CleanedLine;
use tracing::{debug, info};

/// Joiner between a primary line and each continuation
pub const NESTED_JOINER: &str = ", ";

/// One logical event on one line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormLine {
    /// 1-based position among norm lines
    pub line_no: usize,
    /// Raw line the event started on
    pub raw_line_no: Option<usize>,
    pub prefix: Option<TimestampPrefix>,
    pub content: String,
}

impl NormLine {
    pub fn render(&self) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}{}\n", prefix.render(), self.content),
            None => format!("{}\n", self.content),
        }
    }

    /// Content with its inline labels, as shown in the structured table
    pub fn labeled_content(&self) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}{}", prefix.labels(), self.content),
            None => self.content.clone(),
        }
    }

    pub fn time(&self) -> &str {
        self.prefix.as_ref().map_or("", TimestampPrefix::time)
    }

    /// Parse a line of a `norm` intermediate file back
    pub fn parse(patterns: &CatalogPatterns, line_no: usize, text: &str) -> Self {
        let text = text.trim_end_matches(['\n', '\r']);
        let (prefix, content) = match extract_prefix(&patterns.main_ts, text) {
            Some((prefix, rest)) => (Some(prefix), rest),
            None => (None, text),
        };
        Self {
            line_no,
            raw_line_no: None,
            prefix,
            content: content.to_string(),
        }
    }
}

pub struct LineMerger<'a> {
    patterns: &'a CatalogPatterns,
    current: Option<NormLine>,
    emitted: usize,
    continuations: usize,
}

impl<'a> LineMerger<'a> {
    pub fn new(patterns: &'a CatalogPatterns) -> Self {
        Self {
            patterns,
            current: None,
            emitted: 0,
            continuations: 0,
        }
    }

    /// Feed one cleaned line; returns the previous event once it is complete
    pub fn push(&mut self, line: CleanedLine) -> Option<NormLine> {
        if line.is_nested(self.patterns) {
            if let Some(current) = self.current.as_mut() {
                current.content.push_str(NESTED_JOINER);
                current.content.push_str(line.body.trim());
                self.continuations += 1;
                return None;
            }
            debug!("Continuation without a primary line, promoted");
        }

        let finished = self.current.take();
        self.current = Some(NormLine {
            line_no: 0,
            raw_line_no: line.raw_line_no,
            prefix: line.prefix,
            content: line.body.trim().to_string(),
        });
        finished.map(|norm| self.number(norm))
    }

    fn number(&mut self, mut norm: NormLine) -> NormLine {
        self.emitted += 1;
        norm.line_no = self.emitted;
        norm
    }

    /// Flush the last event
    pub fn finish(&mut self) -> Option<NormLine> {
        let last = self.current.take()?;
        Some(self.number(last))
    }

    pub fn merge(mut self, lines: impl IntoIterator<Item = CleanedLine>) -> Vec<NormLine> {
        let mut out: Vec<NormLine> = lines
            .into_iter()
            .filter_map(|line| self.push(line))
            .collect();
        out.extend(self.finish());

        info!(
            "Merged {} continuation lines into {} events",
            self.continuations,
            out.len()
        );
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docsis_catalog::DOCSIS;
    use crate::traits::PatternCatalog;

    fn cleaned(raw_line_no: usize, text: &str) -> CleanedLine {
        let mut line = CleanedLine::parse(DOCSIS.patterns(), text);
        line.raw_line_no = Some(raw_line_no);
        line
    }

    #[test]
    fn test_merge_with_timestamp() {
        let norm = LineMerger::new(DOCSIS.patterns()).merge(vec![
            cleaned(1, "[20190719-08:58:23.738] primary msg\n"),
            cleaned(2, "    continued\n"),
        ]);

        assert_eq!(norm.len(), 1);
        assert_eq!(norm[0].render(), "[20190719-08:58:23.738] primary msg, continued\n");
        assert_eq!(norm[0].raw_line_no, Some(1));
        assert_eq!(norm[0].time(), "[20190719-08:58:23.738]");
    }

    #[test]
    fn test_line_numbers_and_mapping() {
        let norm = LineMerger::new(DOCSIS.patterns()).merge(vec![
            cleaned(3, "first\n"),
            cleaned(4, "  a\n"),
            cleaned(5, "\tb\n"),
            cleaned(9, "second\n"),
        ]);

        assert_eq!(norm.len(), 2);
        assert_eq!(norm[0].content, "first, a, b");
        assert_eq!((norm[0].line_no, norm[0].raw_line_no), (1, Some(3)));
        assert_eq!((norm[1].line_no, norm[1].raw_line_no), (2, Some(9)));
    }

    #[test]
    fn test_leading_continuation_promoted() {
        let norm = LineMerger::new(DOCSIS.patterns())
            .merge(vec![cleaned(1, "   orphan\n"), cleaned(2, "next\n")]);
        let contents: Vec<&str> = norm.iter().map(|n| n.content.as_str()).collect();
        assert_eq!(contents, vec!["orphan", "next"]);
    }

    #[test]
    fn test_labeled_content() {
        let norm = NormLine::parse(
            DOCSIS.patterns(),
            1,
            "[20190719-08:58:23.739] segsign: real primary\n",
        );
        assert_eq!(norm.content, "real primary");
        assert_eq!(norm.labeled_content(), "segsign: real primary");
        assert_eq!(norm.render(), "[20190719-08:58:23.739] segsign: real primary\n");
    }

    #[test]
    fn test_nested_rule_comes_from_catalog() {
        let mut patterns = DOCSIS.patterns().clone();
        patterns.nested_line = regex::Regex::new(r"^\|\s").unwrap();

        let norm = LineMerger::new(&patterns).merge(vec![
            cleaned(1, "first\n"),
            cleaned(2, "| piped detail\n"),
            cleaned(3, "  indented but primary here\n"),
        ]);
        let contents: Vec<&str> = norm.iter().map(|n| n.content.as_str()).collect();
        assert_eq!(contents, vec!["first, | piped detail", "indented but primary here"]);
    }

    #[test]
    fn test_empty_input() {
        assert!(LineMerger::new(DOCSIS.patterns()).merge(Vec::new()).is_empty());
    }
}
