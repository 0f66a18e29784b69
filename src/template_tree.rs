/// Parse tree routing token sequences to candidate clusters
///
/// Three layers: token count, then an anchor token, then the cluster list.
/// Clusters live in the miner's arena; the tree only stores their ids.
use crate::cluster::ClusterId;
use crate::hard_params::PARAM;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::collections::BTreeMap;
use std::fmt::Write;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Anchor {
    First(String),
    Last(String),
    Wild,
}

impl std::fmt::Display for Anchor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Anchor::First(token) => write!(f, "FIRST:{}", token),
            Anchor::Last(token) => write!(f, "LAST:{}", token),
            Anchor::Wild => write!(f, "WILD"),
        }
    }
}

/// Numbers and placeholders never anchor a route on their own
fn is_variable(token: &str) -> bool {
    token == PARAM || token.bytes().next().map_or(false, |b| b.is_ascii_digit())
}

type ClusterList = SmallVec<[ClusterId; 4]>;

#[derive(Debug, Default)]
struct LengthNode {
    /// Children in creation order
    children: Vec<(Anchor, ClusterList)>,
    index: FxHashMap<Anchor, usize>,
    /// Some anchored template was parked under WILD because the node was full
    overflowed: bool,
}

impl LengthNode {
    fn get(&self, anchor: &Anchor) -> Option<&ClusterList> {
        self.index.get(anchor).map(|&i| &self.children[i].1)
    }

    fn anchored_count(&self) -> usize {
        self.children
            .iter()
            .filter(|(anchor, _)| *anchor != Anchor::Wild)
            .count()
    }

    fn push(&mut self, anchor: Anchor, id: ClusterId) {
        match self.index.get(&anchor) {
            Some(&i) => self.children[i].1.push(id),
            None => {
                self.index.insert(anchor.clone(), self.children.len());
                let mut list = ClusterList::new();
                list.push(id);
                self.children.push((anchor, list));
            }
        }
    }

    fn remove(&mut self, id: ClusterId) -> bool {
        let Some(pos) = self
            .children
            .iter()
            .position(|(_, list)| list.contains(&id))
        else {
            return false;
        };

        let list = &mut self.children[pos].1;
        list.retain(|c| *c != id);
        if list.is_empty() {
            self.children.remove(pos);
            self.index = self
                .children
                .iter()
                .enumerate()
                .map(|(i, (anchor, _))| (anchor.clone(), i))
                .collect();
        }
        true
    }
}

pub struct TemplateTree {
    lengths: FxHashMap<usize, LengthNode>,
    max_child: usize,
}

impl TemplateTree {
    pub fn new(max_child: usize) -> Self {
        Self {
            lengths: FxHashMap::default(),
            max_child: max_child.max(1),
        }
    }

    /// Anchor a new template would get, before the fan-out cap applies
    pub fn anchor_for(tokens: &[String]) -> Anchor {
        let (Some(first), Some(last)) = (tokens.first(), tokens.last()) else {
            return Anchor::Wild;
        };
        match (is_variable(first), is_variable(last)) {
            (true, true) => Anchor::Wild,
            (true, false) => Anchor::Last(last.clone()),
            _ => Anchor::First(first.clone()),
        }
    }

    /// Candidate clusters for a token sequence
    pub fn search(&self, tokens: &[String]) -> Option<&[ClusterId]> {
        let node = self.lengths.get(&tokens.len())?;
        let first = tokens.first()?;
        let last = tokens.last()?;

        if let Some(list) = node.get(&Anchor::First(first.clone())) {
            return Some(list.as_slice());
        }
        if is_variable(first) {
            if let Some(list) = node.get(&Anchor::Last(last.clone())) {
                return Some(list.as_slice());
            }
            if is_variable(last) {
                if let Some(list) = node.get(&Anchor::Wild) {
                    return Some(list.as_slice());
                }
            }
        }
        // Overflowed templates were parked under the wildcard, and stay
        // there after anchored children are merged away
        if node.overflowed {
            if let Some(list) = node.get(&Anchor::Wild) {
                return Some(list.as_slice());
            }
        }
        None
    }

    /// Attach a cluster; returns the anchor it ended up under
    pub fn insert(&mut self, tokens: &[String], id: ClusterId) -> Anchor {
        let max_child = self.max_child;
        let node = self.lengths.entry(tokens.len()).or_default();

        let mut anchor = Self::anchor_for(tokens);
        if anchor != Anchor::Wild
            && node.get(&anchor).is_none()
            && node.anchored_count() + 1 >= max_child
        {
            debug!(
                "Length node {} is full ({} children), routing {} to WILD",
                tokens.len(),
                max_child,
                anchor
            );
            anchor = Anchor::Wild;
            node.overflowed = true;
        }

        node.push(anchor.clone(), id);
        anchor
    }

    /// Detach a cluster from the length node it was filed under
    pub fn remove(&mut self, len: usize, id: ClusterId) -> bool {
        let Some(node) = self.lengths.get_mut(&len) else {
            return false;
        };
        let removed = node.remove(id);
        if node.children.is_empty() {
            self.lengths.remove(&len);
        }
        removed
    }

    /// Every cluster filed under a length node
    pub fn clusters_of_length(&self, len: usize) -> Vec<ClusterId> {
        self.lengths
            .get(&len)
            .map(|node| {
                node.children
                    .iter()
                    .flat_map(|(_, list)| list.iter().copied())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of anchor children under a length node
    pub fn fan_out(&self, len: usize) -> usize {
        self.lengths.get(&len).map_or(0, |node| node.children.len())
    }

    pub fn lengths(&self) -> Vec<usize> {
        let mut lengths: Vec<usize> = self.lengths.keys().copied().collect();
        lengths.sort_unstable();
        lengths
    }

    /// Depth-indented text dump, one template per leaf line
    pub fn dump<F>(&self, mut template_of: F) -> String
    where
        F: FnMut(ClusterId) -> String,
    {
        let sorted: BTreeMap<usize, &LengthNode> =
            self.lengths.iter().map(|(len, node)| (*len, node)).collect();
        let mut out = String::new();

        for (len, node) in sorted {
            let _ = writeln!(out, "{}", len);
            for (anchor, list) in &node.children {
                let _ = writeln!(out, "\t{}", anchor);
                for id in list {
                    let _ = writeln!(out, "\t\t{}", template_of(*id));
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(s: &str) -> Vec<String> {
        s.split_whitespace().map(String::from).collect()
    }

    #[test]
    fn test_anchor_decision_table() {
        assert_eq!(TemplateTree::anchor_for(&toks("1 a 2")), Anchor::Wild);
        assert_eq!(
            TemplateTree::anchor_for(&toks("1 a b")),
            Anchor::Last("b".to_string())
        );
        assert_eq!(
            TemplateTree::anchor_for(&toks("a b 2")),
            Anchor::First("a".to_string())
        );
        assert_eq!(
            TemplateTree::anchor_for(&toks("a b c")),
            Anchor::First("a".to_string())
        );
        assert_eq!(
            TemplateTree::anchor_for(&toks("<*> b c")),
            Anchor::Last("c".to_string())
        );
    }

    #[test]
    fn test_search_routes() {
        let mut tree = TemplateTree::new(120);
        tree.insert(&toks("link up now"), 0);
        tree.insert(&toks("5 lines done"), 1);
        tree.insert(&toks("7 x 9"), 2);

        assert_eq!(tree.search(&toks("link down now")), Some(&[0][..]));
        assert_eq!(tree.search(&toks("6 lines done")), Some(&[1][..]));
        assert_eq!(tree.search(&toks("8 y 1")), Some(&[2][..]));
        assert_eq!(tree.search(&toks("link up")), None);
        assert_eq!(tree.search(&toks("other up now")), None);
        // last anchor only applies when the first token is numeric
        assert_eq!(tree.search(&toks("many lines done")), None);
    }

    #[test]
    fn test_fan_out_cap() {
        let mut tree = TemplateTree::new(3);
        for (i, first) in ["a", "b", "c", "d", "e"].iter().enumerate() {
            tree.insert(&toks(&format!("{} x y", first)), i);
        }

        assert!(tree.fan_out(3) <= 3);
        assert_eq!(tree.search(&toks("a x y")), Some(&[0][..]));
        // overflow went to WILD and is still reachable
        assert_eq!(tree.search(&toks("d x y")), Some(&[2, 3, 4][..]));
    }

    #[test]
    fn test_overflow_reachable_after_remove() {
        let mut tree = TemplateTree::new(3);
        tree.insert(&toks("a x y"), 0);
        tree.insert(&toks("b x y"), 1);
        tree.insert(&toks("d x y"), 2);
        assert_eq!(tree.fan_out(3), 3);

        // an anchored child goes away, the parked cluster must still be found
        assert!(tree.remove(3, 0));
        assert_eq!(tree.search(&toks("d x y")), Some(&[2][..]));
        assert_eq!(tree.search(&toks("b x z")), Some(&[1][..]));
    }

    #[test]
    fn test_remove() {
        let mut tree = TemplateTree::new(120);
        tree.insert(&toks("a b"), 0);
        tree.insert(&toks("a c"), 1);

        assert!(tree.remove(2, 0));
        assert_eq!(tree.search(&toks("a b")), Some(&[1][..]));
        assert!(tree.remove(2, 1));
        assert!(tree.lengths().is_empty());
        assert!(!tree.remove(2, 1));
    }

    #[test]
    fn test_dump() {
        let mut tree = TemplateTree::new(120);
        tree.insert(&toks("a b <*>"), 0);
        tree.insert(&toks("1 b c"), 1);
        tree.insert(&toks("x"), 2);

        let dump = tree.dump(|id| format!("template-{}", id));
        assert_eq!(
            dump,
            "1\n\tFIRST:x\n\t\ttemplate-2\n3\n\tFIRST:a\n\t\ttemplate-0\n\tLAST:c\n\t\ttemplate-1\n"
        );
    }
}
