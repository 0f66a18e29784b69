/// Split rules that separate glued tokens so they align across templates
///
/// A left rule inserts a space after its match, a right rule inserts one
/// before. A space is only inserted next to a non-whitespace character, so
/// a second pass over already split text changes nothing.
use crate::pattern_catalog::CatalogPatterns;
use regex::Regex;

#[derive(Clone, Copy)]
enum Side {
    After,
    Before,
}

fn apply_rule(text: &str, rule: &Regex, side: Side) -> Option<String> {
    let mut cuts = Vec::new();

    for m in rule.find_iter(text) {
        let (at, neighbour) = match side {
            Side::After => (m.end(), text[m.end()..].chars().next()),
            Side::Before => (m.start(), text[..m.start()].chars().next_back()),
        };
        if neighbour.map_or(false, |c| !c.is_whitespace()) && cuts.last() != Some(&at) {
            cuts.push(at);
        }
    }

    if cuts.is_empty() {
        return None;
    }

    let mut out = String::with_capacity(text.len() + cuts.len());
    let mut last = 0;
    for at in cuts {
        out.push_str(&text[last..at]);
        out.push(' ');
        last = at;
    }
    out.push_str(&text[last..]);
    Some(out)
}

/// Apply every left rule, then every right rule, in catalog order
pub fn split_tokens(patterns: &CatalogPatterns, text: &str) -> String {
    let mut current = text.to_string();

    for rule in &patterns.split_left {
        if let Some(next) = apply_rule(&current, rule, Side::After) {
            current = next;
        }
    }
    for rule in &patterns.split_right {
        if let Some(next) = apply_rule(&current, rule, Side::Before) {
            current = next;
        }
    }

    current
}
