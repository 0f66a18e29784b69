/// Pattern catalog for cable modem (DOCSIS) console logs
///
/// Console lines look like:
/// `[20190719-08:58:23.738] BcmCmDsChan:: DsLockFail ...`
/// with an optional segment label (`segsign: ` or `cNNN `) and an optional
/// anomaly label (`abn: `) right after the timestamp.
use crate::pattern_catalog::CatalogPatterns;
use crate::table_reflow::{reflow_ds_row, reflow_us_row};
use crate::traits::{PatternCatalog, TableKind};
use once_cell::sync::Lazy;
use regex::Regex;

pub static DOCSIS: Lazy<DocsisCatalog> = Lazy::new(DocsisCatalog::new);

pub struct DocsisCatalog {
    patterns: CatalogPatterns,
}

fn re(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap()
}

fn opt(pattern: &str) -> Option<Regex> {
    Some(re(pattern))
}

impl DocsisCatalog {
    fn new() -> Self {
        let patterns = CatalogPatterns {
            main_ts: re(
                r"^(?P<ts>\[\d{8}-\d{2}:\d{2}:\d{2}\.\d{3}\] ?)(?P<seg>segsign: |c\d{3} )?(?P<abn>abn: )?",
            ),
            inline_ts: re(r"\[\d{8}-\d{2}:\d{2}:\d{2}\.\d{3}\] ?"),
            clean_char: opt(
                r"CM(?:/\w+)?> |\[t[A-Z]\w*\] |\{\w+Instance\d*\} |\x1b\[[0-9;]*m|[\x00\x07]",
            ),
            line_rm: opt(
                r"^(?:BCM\d{4,5}\b|\*{4,}|={4,}|-{4,}\s*$|Press any key|Type 'help')",
            ),
            table_title: opt(r"(?i)^\s*(?:index\s+type\s+value|event log table:?)\s*$"),
            nested_line: re(r"^[ \t]+\S"),
            nested_line_exception: opt(r"^\s+(?:at |\||->)"),
            pri_to_nested: opt(r"^(?:Sub-TLV \d+\b|\}\s*$)"),
            nested_to_pri: opt(r"^\s+(?:Logging event:|BcmCm\w+::)"),
            block_rm_start: opt(r"^(?:Memory pool statistics|MAC address table dump)\b"),
            block_rm_end: opt(r"^(?:End of memory pool statistics|End of MAC address table)\b"),
            block_rm_pri: opt(r"^(?:Call stack|Backtrace|Task list):"),
            block_indent: opt(r"^(?:Config file TLVs|REG-RSP TLVs):"),
            block_indent2: opt(r"^Begin (?:TLV|event) dump\b"),
            block_indent2_end: opt(r"^\s*End (?:TLV|event) dump\b"),
            ds_table_start: opt(r"(?i)^\s*(?:active\s+)?downstream\s+channel\s+status:?\s*$"),
            ds_table_end: opt(r"^\s*$"),
            us_table_start: opt(r"(?i)^\s*(?:active\s+)?upstream\s+channel\s+status:?\s*$"),
            us_table_end: opt(r"^\s*$"),
            table_title_common: opt(r"(?i)^\s*(?:service flow|classifier) table:?\s*$"),
            split_left: vec![re(r"\w="), re(r"[A-Za-z_]::"), re(r"\(")],
            split_right: vec![re(r"\("), re(r"\)")],
            session: opt(
                r"^(?:Booting the cable modem|Resetting the cable modem|CM reboot requested)\b",
            ),
        };

        Self { patterns }
    }
}

impl PatternCatalog for DocsisCatalog {
    fn log_type(&self) -> &str {
        "cm"
    }

    fn patterns(&self) -> &CatalogPatterns {
        &self.patterns
    }

    fn reflow_row(&self, table: TableKind, row: &str) -> Option<String> {
        match table {
            TableKind::Downstream => reflow_ds_row(row),
            TableKind::Upstream => reflow_us_row(row),
        }
    }
}
