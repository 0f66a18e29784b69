/// Template clusters and the similarity function used for fast matching
use crate::hard_params::{template_text, PARAM};
use crate::template_library::{event_id_of, NEW_EVENT_ID};
use once_cell::sync::Lazy;
use regex::Regex;

/// Index of a cluster in the miner's arena
pub type ClusterId = usize;

/// Tokens that carry structure; a mismatch on them means a different event
static SPECIAL_TOKENS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [r"^\w+::?$", r"^\w+=$", r"^\($", r"^\)$"]
        .iter()
        .map(|p| Regex::new(p).unwrap())
        .collect()
});

fn is_param(token: &str) -> bool {
    token == PARAM
}

fn starts_with_digit(token: &str) -> bool {
    token.bytes().next().map_or(false, |b| b.is_ascii_digit())
}

/// Numbers reach the miner either raw or already replaced by `<*>`
fn is_numeric_slot(token: &str) -> bool {
    is_param(token) || starts_with_digit(token)
}

fn special_mismatch(a: &str, b: &str) -> bool {
    SPECIAL_TOKENS.iter().any(|re| {
        let (ma, mb) = (re.is_match(a), re.is_match(b));
        ma != mb || (ma && a != b)
    })
}

/// Similarity of a raw token sequence to a template of the same length
///
/// # Returns
/// `(sim, param_count)`; `sim` is 0 when the pair is rejected outright
pub fn similarity(template: &[String], tokens: &[String]) -> (f64, usize) {
    let param_count = template.iter().filter(|t| is_param(t)).count();
    if template.len() != tokens.len() || template.is_empty() {
        return (0.0, param_count);
    }

    if template.len() == 1 && is_numeric_slot(&tokens[0]) && is_numeric_slot(&template[0]) {
        return (1.0, param_count);
    }

    let mut sim_tokens = 0usize;
    let mut last_differs = false;

    for (i, (t, r)) in template.iter().zip(tokens).enumerate() {
        let differs = t != r && !is_param(t);

        if i == 0 && t != r {
            return (0.0, param_count);
        }
        if differs && last_differs {
            return (0.0, param_count);
        }
        if t != r && special_mismatch(t, r) {
            return (0.0, param_count);
        }

        if t == r && !is_param(t) {
            sim_tokens += 1;
        }
        last_differs = differs;
    }

    let denominator = template.len() - param_count;
    if denominator == 0 {
        return (0.0, param_count);
    }
    (sim_tokens as f64 / denominator as f64, param_count)
}

/// Replace every differing position with `<*>`
///
/// # Returns
/// The merged template and the number of positions that became `<*>` now
pub fn merge_template(template: &[String], tokens: &[String]) -> (Vec<String>, usize) {
    let mut updated = 0;
    let merged = template
        .iter()
        .zip(tokens)
        .map(|(t, r)| {
            if t == r || is_param(t) {
                t.clone()
            } else {
                updated += 1;
                PARAM.to_string()
            }
        })
        .collect();
    (merged, updated)
}

/// Longest common subsequence length divided by the shorter length
pub fn lcs_ratio(a: &[String], b: &[String]) -> f64 {
    let shorter = a.len().min(b.len());
    if shorter == 0 {
        return 0.0;
    }

    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];
    for x in a {
        for (j, y) in b.iter().enumerate() {
            curr[j + 1] = if x == y {
                prev[j] + 1
            } else {
                prev[j + 1].max(curr[j])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()] as f64 / shorter as f64
}

#[derive(Debug, Clone)]
pub struct Cluster {
    pub template: Vec<String>,
    /// Current similarity threshold
    pub st: f64,
    pub init_st: f64,
    /// Log base of the threshold growth
    pub base: f64,
    /// Tokens turned into `<*>` across all updates
    pub update_count: usize,
    pub template_update_count: usize,
    /// Not loaded from the library
    pub is_new: bool,
    /// Event id before this run, `"0"` for new clusters
    pub old_event_id: String,
    /// Norm line numbers in emission order
    pub member_line_ids: Vec<usize>,
    /// Set when merged into another cluster
    pub absorbed_into: Option<ClusterId>,
}

impl Cluster {
    /// A fresh cluster seeded by its first line
    pub fn new(tokens: Vec<String>, line_no: usize) -> Self {
        let mut cluster = Self::with_template(tokens, NEW_EVENT_ID.to_string(), true);
        cluster.member_line_ids.push(line_no);
        cluster
    }

    /// A cluster preloaded from the template library
    pub fn preloaded(tokens: Vec<String>, event_id: String) -> Self {
        Self::with_template(tokens, event_id, false)
    }

    fn with_template(template: Vec<String>, old_event_id: String, is_new: bool) -> Self {
        let placeholders = template.iter().filter(|t| is_param(t)).count();
        let len = template.len().max(1);
        let init_st = 0.6 * (len - placeholders.min(len)) as f64 / len as f64;
        let base = (placeholders + 1).max(2) as f64;

        Self {
            template,
            st: init_st,
            init_st,
            base,
            update_count: 0,
            template_update_count: 0,
            is_new,
            old_event_id,
            member_line_ids: Vec::new(),
            absorbed_into: None,
        }
    }

    pub fn len(&self) -> usize {
        self.template.len()
    }

    pub fn is_empty(&self) -> bool {
        self.template.is_empty()
    }

    pub fn is_live(&self) -> bool {
        self.absorbed_into.is_none()
    }

    pub fn occurrences(&self) -> usize {
        self.member_line_ids.len()
    }

    pub fn template_text(&self) -> String {
        template_text(&self.template)
    }

    pub fn event_id(&self) -> String {
        event_id_of(&self.template_text())
    }

    /// Template differs from what the library held
    pub fn is_updated(&self) -> bool {
        !self.is_new && self.old_event_id != self.event_id()
    }

    fn raise_threshold(&mut self) {
        let grown = self.init_st + 0.5 * ((self.update_count + 1) as f64).ln() / self.base.ln();
        self.st = grown.min(1.0).max(self.st);
    }

    /// Assign a line and generalize the template
    ///
    /// # Returns
    /// `true` if the template changed
    pub fn update(&mut self, tokens: &[String], line_no: usize) -> bool {
        self.member_line_ids.push(line_no);

        let (merged, updated) = merge_template(&self.template, tokens);
        if merged == self.template {
            return false;
        }

        self.template = merged;
        self.template_update_count += 1;
        self.update_count += updated;
        self.raise_threshold();
        true
    }

    /// Take over another cluster of the same length
    ///
    /// # Returns
    /// `true` if the template changed
    pub fn absorb(&mut self, other: &mut Cluster, self_id: ClusterId) -> bool {
        let (merged, updated) = merge_template(&self.template, &other.template);

        let mut members = std::mem::take(&mut self.member_line_ids);
        members.append(&mut other.member_line_ids);
        members.sort_unstable();
        self.member_line_ids = members;
        other.absorbed_into = Some(self_id);

        // A library id outlives the merge
        if self.is_new && !other.is_new {
            self.is_new = false;
            self.old_event_id = other.old_event_id.clone();
        }

        if merged == self.template {
            return false;
        }
        self.template = merged;
        self.template_update_count += 1;
        self.update_count += updated;
        self.raise_threshold();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(s: &str) -> Vec<String> {
        s.split_whitespace().map(String::from).collect()
    }

    #[test]
    fn test_similarity_basic() {
        let (sim, params) = similarity(&toks("a b c d"), &toks("a b x d"));
        assert_eq!(params, 0);
        assert!((sim - 0.75).abs() < 1e-9);

        let (sim, params) = similarity(&toks("a <*> c"), &toks("a 7 c"));
        assert_eq!(params, 1);
        assert!((sim - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_similarity_rejects() {
        // first pair differs
        assert_eq!(similarity(&toks("a b c"), &toks("x b c")).0, 0.0);
        // two successive differences
        assert_eq!(similarity(&toks("a b c d"), &toks("a x y d")).0, 0.0);
        // special token on one side only
        assert_eq!(similarity(&toks("a key= c"), &toks("a key c")).0, 0.0);
        // both special but different
        assert_eq!(similarity(&toks("a Foo:: c"), &toks("a Bar:: c")).0, 0.0);
        // length mismatch
        assert_eq!(similarity(&toks("a b"), &toks("a b c")).0, 0.0);
    }

    #[test]
    fn test_similarity_params_do_not_count_as_differences() {
        let (sim, _) = similarity(&toks("a <*> <*> d"), &toks("a x y d"));
        assert!((sim - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_similarity_all_params_refused() {
        assert_eq!(similarity(&toks("<*> <*>"), &toks("<*> <*>")).0, 0.0);
        assert_eq!(similarity(&toks("<*> <*>"), &toks("5 6")).0, 0.0);
    }

    #[test]
    fn test_single_digit_token() {
        assert_eq!(similarity(&toks("3"), &toks("4")).0, 1.0);
        assert_eq!(similarity(&toks("<*>"), &toks("<*>")).0, 1.0);
        assert_eq!(similarity(&toks("a"), &toks("b")).0, 0.0);
        // a number never folds into a word
        assert_eq!(similarity(&toks("reboot"), &toks("<*>")).0, 0.0);
    }

    #[test]
    fn test_merge_template() {
        let (merged, updated) = merge_template(&toks("a <*> c d"), &toks("a x c e"));
        assert_eq!(merged, toks("a <*> c <*>"));
        assert_eq!(updated, 1);
    }

    #[test]
    fn test_lcs_ratio() {
        assert_eq!(lcs_ratio(&toks("a b c d"), &toks("a b c d")), 1.0);
        assert_eq!(lcs_ratio(&toks("a b c d"), &toks("a x c y")), 0.5);
        assert_eq!(lcs_ratio(&toks("a b"), &[]), 0.0);
    }

    #[test]
    fn test_new_cluster_thresholds() {
        let cluster = Cluster::new(toks("a b <*> <*> c"), 1);
        assert!((cluster.init_st - 0.36).abs() < 1e-9);
        assert_eq!(cluster.base, 3.0);
        assert_eq!(cluster.member_line_ids, vec![1]);
        assert_eq!(cluster.old_event_id, "0");

        let cluster = Cluster::new(toks("a b c"), 1);
        assert_eq!(cluster.base, 2.0);
        assert!((cluster.st - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_threshold_is_monotonic_and_bounded() {
        let mut cluster = Cluster::new(toks("a b c d e f"), 1);
        let mut last = cluster.st;
        let lines = ["a x c d e f", "a x c y e f", "a x c y e z", "a q c y e z"];
        for (i, line) in lines.iter().enumerate() {
            cluster.update(&toks(line), i + 2);
            assert!(cluster.st >= last);
            assert!(cluster.st <= 1.0);
            last = cluster.st;
        }
        assert_eq!(cluster.template_text(), "a <*> c <*> e <*>");
        assert_eq!(cluster.update_count, 3);
        assert_eq!(cluster.template_update_count, 3);
        assert_eq!(cluster.occurrences(), 5);
    }

    #[test]
    fn test_update_without_change() {
        let mut cluster = Cluster::new(toks("a b <*>"), 1);
        assert!(!cluster.update(&toks("a b <*>"), 2));
        assert_eq!(cluster.template_update_count, 0);
        assert_eq!(cluster.member_line_ids, vec![1, 2]);
    }

    #[test]
    fn test_absorb_keeps_library_id() {
        let mut survivor = Cluster::new(toks("link a down now"), 4);
        let mut victim = Cluster::preloaded(toks("link b down now"), "1234abcd".to_string());
        victim.member_line_ids = vec![1, 7];

        assert!(survivor.absorb(&mut victim, 0));
        assert_eq!(survivor.template_text(), "link <*> down now");
        assert_eq!(survivor.member_line_ids, vec![1, 4, 7]);
        assert_eq!(survivor.old_event_id, "1234abcd");
        assert!(!survivor.is_new);
        assert_eq!(victim.absorbed_into, Some(0));
        assert!(victim.member_line_ids.is_empty());
    }
}
