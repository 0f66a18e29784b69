/// Online template miner
///
/// Each norm line is parameterized, routed through the tree to a handful of
/// candidate clusters and either merged into the best one or seeds a new
/// cluster. Clusters live in an arena (`Vec<Cluster>`); the tree and the
/// merge bookkeeping refer to them by index.
use crate::cluster::{lcs_ratio, similarity, Cluster, ClusterId};
use crate::hard_params::{parameterize, template_text};
use crate::template_library::{merge_duplicates, LibraryEntry, TemplateLibrary, TemplateRow};
use crate::template_tree::TemplateTree;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, info, warn};

/// Template assigned to one norm line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineEvent {
    pub event_id_old: String,
    pub event_id: String,
    pub template: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MinerSummary {
    pub lines: usize,
    pub clusters: usize,
    pub new_templates: usize,
    pub updated_templates: usize,
    pub merged_clusters: usize,
}

pub struct TemplateMiner {
    clusters: Vec<Cluster>,
    tree: TemplateTree,
    sim_t_m: f64,
    lines: usize,
    merged_clusters: usize,
}

/// Two distinct clusters of the arena, mutably
fn pair_mut(clusters: &mut [Cluster], a: ClusterId, b: ClusterId) -> (&mut Cluster, &mut Cluster) {
    if a < b {
        let (left, right) = clusters.split_at_mut(b);
        (&mut left[a], &mut right[0])
    } else {
        let (left, right) = clusters.split_at_mut(a);
        (&mut right[0], &mut left[b])
    }
}

impl TemplateMiner {
    pub fn new(max_child: usize, sim_t_m: f64) -> Self {
        Self {
            clusters: Vec::new(),
            tree: TemplateTree::new(max_child),
            sim_t_m,
            lines: 0,
            merged_clusters: 0,
        }
    }

    /// Seed the tree with the templates of a library
    pub fn preload(&mut self, library: &TemplateLibrary) {
        let mut seen: FxHashSet<&str> = FxHashSet::default();

        for entry in library.entries() {
            if !seen.insert(entry.event_id.as_str()) {
                warn!("Library lists template {} twice, skipping", entry.event_id);
                continue;
            }
            let tokens: Vec<String> = entry.template.split_whitespace().map(String::from).collect();
            if tokens.is_empty() {
                continue;
            }
            let id = self.clusters.len();
            self.tree.insert(&tokens, id);
            self.clusters
                .push(Cluster::preloaded(tokens, entry.event_id.clone()));
        }

        info!("Preloaded {} templates into the tree", self.clusters.len());
    }

    /// Best accepting cluster among the tree candidates
    fn fast_match(&self, tokens: &[String]) -> Option<ClusterId> {
        let candidates = self.tree.search(tokens)?;

        let mut best: Option<(ClusterId, f64, usize)> = None;
        for &id in candidates {
            let cluster = &self.clusters[id];
            let (sim, params) = similarity(&cluster.template, tokens);
            let better = match best {
                None => true,
                Some((_, best_sim, best_params)) => {
                    sim > best_sim || (sim == best_sim && params > best_params)
                }
            };
            if better {
                best = Some((id, sim, params));
            }
        }

        let (id, sim, _) = best?;
        if sim > 0.0 && sim >= self.clusters[id].st {
            Some(id)
        } else {
            None
        }
    }

    /// Mine one norm line
    ///
    /// # Returns
    /// The cluster the line was assigned to, `None` for lines without tokens
    pub fn process_line(&mut self, line_no: usize, content: &str) -> Option<ClusterId> {
        let tokens = parameterize(content);
        if tokens.is_empty() {
            debug!("Line {} has no tokens, skipped", line_no);
            return None;
        }
        self.lines += 1;

        if let Some(id) = self.fast_match(&tokens) {
            let changed = self.clusters[id].update(&tokens, line_no);
            if changed {
                debug!(
                    "Cluster {} generalized to '{}'",
                    id,
                    self.clusters[id].template_text()
                );
                if self.sim_t_m < 1.0 {
                    self.merge_similar(id);
                }
            }
            return Some(id);
        }

        let id = self.clusters.len();
        let anchor = self.tree.insert(&tokens, id);
        debug!("New cluster {} under {}: '{}'", id, anchor, template_text(&tokens));
        self.clusters.push(Cluster::new(tokens, line_no));
        Some(id)
    }

    /// Absorb every other cluster of the same length that became too similar
    fn merge_similar(&mut self, id: ClusterId) {
        let len = self.clusters[id].len();

        for other in self.tree.clusters_of_length(len) {
            if other == id || !self.clusters[other].is_live() {
                continue;
            }
            let ratio = lcs_ratio(&self.clusters[id].template, &self.clusters[other].template);
            if ratio <= self.sim_t_m {
                continue;
            }

            let (survivor, victim) = pair_mut(&mut self.clusters, id, other);
            if !survivor.is_new && !victim.is_new {
                warn!(
                    "Merging library templates {} and {}, {} is retired",
                    survivor.old_event_id, victim.old_event_id, victim.old_event_id
                );
            }
            survivor.absorb(victim, id);
            self.tree.remove(len, other);
            self.merged_clusters += 1;
            info!(
                "Merged cluster {} into {} (similarity {:.2}): '{}'",
                other,
                id,
                ratio,
                self.clusters[id].template_text()
            );
        }
    }

    /// Follow merge forwarding to the live cluster
    pub fn resolve(&self, mut id: ClusterId) -> ClusterId {
        while let Some(next) = self.clusters[id].absorbed_into {
            id = next;
        }
        id
    }

    pub fn cluster(&self, id: ClusterId) -> &Cluster {
        &self.clusters[self.resolve(id)]
    }

    pub fn live_clusters(&self) -> impl Iterator<Item = (ClusterId, &Cluster)> + '_ {
        self.clusters
            .iter()
            .enumerate()
            .filter(|(_, cluster)| cluster.is_live())
    }

    /// The library should be rewritten
    pub fn has_changes(&self) -> bool {
        self.live_clusters()
            .any(|(_, c)| (c.is_new && c.occurrences() > 0) || c.is_updated())
    }

    /// Library rows for every live cluster, duplicates merged
    pub fn library_entries(&self) -> Vec<LibraryEntry> {
        let entries = self
            .live_clusters()
            .map(|(_, c)| LibraryEntry::new(&c.old_event_id, &c.template_text(), c.occurrences()))
            .collect();
        merge_duplicates(entries)
    }

    /// Templates seen in this run
    pub fn template_rows(&self) -> Vec<TemplateRow> {
        self.library_entries()
            .into_iter()
            .filter(|e| e.occurrences > 0)
            .map(|e| TemplateRow {
                event_id: e.event_id,
                template: e.template,
                occurrences: e.occurrences,
            })
            .collect()
    }

    /// Template of every mined line, keyed by norm line number
    pub fn line_events(&self) -> FxHashMap<usize, LineEvent> {
        let old_ids: FxHashMap<String, String> = self
            .library_entries()
            .into_iter()
            .map(|e| (e.event_id, e.event_id_old))
            .collect();

        let mut events = FxHashMap::default();
        for (_, cluster) in self.live_clusters() {
            let template = cluster.template_text();
            let event_id = cluster.event_id();
            let event = LineEvent {
                event_id_old: old_ids
                    .get(&event_id)
                    .cloned()
                    .unwrap_or_else(|| cluster.old_event_id.clone()),
                event_id,
                template,
            };
            for &line_no in &cluster.member_line_ids {
                events.insert(line_no, event.clone());
            }
        }
        events
    }

    pub fn summary(&self) -> MinerSummary {
        let entries = self.library_entries();
        MinerSummary {
            lines: self.lines,
            clusters: self.live_clusters().count(),
            new_templates: entries.iter().filter(|e| e.is_new()).count(),
            updated_templates: entries.iter().filter(|e| e.is_changed()).count(),
            merged_clusters: self.merged_clusters,
        }
    }

    pub fn tree_dump(&self) -> String {
        self.tree.dump(|id| self.clusters[id].template_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template_library::event_id_of;

    fn mine(lines: &[&str]) -> TemplateMiner {
        let mut miner = TemplateMiner::new(120, 1.0);
        for (i, line) in lines.iter().enumerate() {
            miner.process_line(i + 1, line);
        }
        miner
    }

    #[test]
    fn test_simple_template_mining() {
        let miner = mine(&["a b 1", "a b 2", "a b 3"]);
        let rows = miner.template_rows();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].template, "a b <*>");
        assert_eq!(rows[0].occurrences, 3);
        assert_eq!(rows[0].event_id, event_id_of("a b <*>"));
    }

    #[test]
    fn test_generalization() {
        let miner = mine(&[
            "DsLockFail on tuner alpha now",
            "DsLockFail on tuner beta now",
            "DsLockFail on tuner gamma now",
        ]);
        let rows = miner.template_rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].template, "DsLockFail on tuner <*> now");
        assert_eq!(miner.summary().new_templates, 1);
    }

    #[test]
    fn test_distinct_events_stay_apart() {
        let miner = mine(&["link up", "reset requested", "link up"]);
        let rows = miner.template_rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(miner.summary().clusters, 2);
    }

    #[test]
    fn test_every_line_assigned_once() {
        let lines = [
            "a b 1",
            "reset cause 3",
            "a b 2",
            "x y z",
            "reset cause 9",
            "5",
        ];
        let miner = mine(&lines);

        let mut members: Vec<usize> = miner
            .live_clusters()
            .flat_map(|(_, c)| c.member_line_ids.iter().copied())
            .collect();
        members.sort_unstable();
        assert_eq!(members, (1..=lines.len()).collect::<Vec<_>>());
        assert_eq!(miner.line_events().len(), lines.len());
    }

    #[test]
    fn test_numeric_only_lines_share_one_cluster() {
        let miner = mine(&["42", "43", "44"]);
        let rows = miner.template_rows();

        assert_eq!(miner.summary().clusters, 1);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].template, "<*>");
        assert_eq!(rows[0].occurrences, 3);
    }

    #[test]
    fn test_empty_line_skipped() {
        let mut miner = TemplateMiner::new(120, 1.0);
        assert_eq!(miner.process_line(1, "   "), None);
        assert!(miner.template_rows().is_empty());
        assert!(!miner.has_changes());
    }

    #[test]
    fn test_preloaded_template_keeps_id() {
        let id = event_id_of("a b <*>");
        let library = TemplateLibrary::new(vec![LibraryEntry::new("0", "a b <*>", 1)]);
        let mut miner = TemplateMiner::new(120, 1.0);
        miner.preload(&library);

        miner.process_line(1, "a b 7");

        let entries = miner.library_entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].event_id_old, id);
        assert_eq!(entries[0].event_id, id);
        assert!(!miner.has_changes());
    }

    #[test]
    fn test_preloaded_template_updated() {
        let old = event_id_of("set mode alpha on");
        let library = TemplateLibrary::new(vec![LibraryEntry::new("0", "set mode alpha on", 0)]);
        let mut miner = TemplateMiner::new(120, 1.0);
        miner.preload(&library);

        miner.process_line(1, "set mode beta on");

        let entries = miner.library_entries();
        assert_eq!(entries[0].template, "set mode <*> on");
        assert_eq!(entries[0].event_id_old, old);
        assert!(entries[0].is_changed());
        assert!(miner.has_changes());
        assert_eq!(miner.summary().updated_templates, 1);
    }

    #[test]
    fn test_cluster_merge_below_one() {
        let mut miner = TemplateMiner::new(120, 0.6);
        miner.process_line(1, "cfg a b c d e");
        miner.process_line(2, "cfg a x y d e");
        // two adjacent differences make these distinct clusters
        assert_eq!(miner.summary().clusters, 2);

        // cluster 0 becomes `cfg a <*> c d e`, sharing 4 of 6 tokens with cluster 1
        miner.process_line(3, "cfg a q c d e");

        let summary = miner.summary();
        assert_eq!(summary.merged_clusters, 1);
        assert_eq!(summary.clusters, 1);
        assert_eq!(miner.cluster(1).member_line_ids, vec![1, 2, 3]);
        assert_eq!(miner.resolve(1), 0);
    }

    #[test]
    fn test_tree_dump_lists_templates() {
        let miner = mine(&["a b 1", "link up"]);
        let dump = miner.tree_dump();
        assert!(dump.contains("\t\ta b <*>\n"));
        assert!(dump.contains("\tFIRST:link\n"));
    }
}
