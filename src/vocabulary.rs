/// STIDLE: shuffled template id list, expanded to a fixed size
///
/// Downstream models use the slot of an event id as its feature index, so
/// a slot never changes once assigned. Empty slots hold `"0"` and the last
/// slot is reserved for events unknown at predict time.
use crate::error::{AnalyzerError, Result};
use crate::output::{backup_existing, with_suffix, write_atomic, write_lines};
use crate::template_library::{LibraryEntry, NEW_EVENT_ID};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rustc_hash::{FxHashMap, FxHashSet};
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::{info, warn};

pub const UNKNOWN_EVENT_ID: &str = "ffffffff";
pub const EMPTY_SLOT: &str = NEW_EVENT_ID;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VocabularyUpdate {
    pub inserted: usize,
    pub replaced: usize,
    pub refused: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vocabulary {
    ids: Vec<String>,
    index: FxHashMap<String, usize>,
}

fn index_of_ids(ids: &[String]) -> FxHashMap<String, usize> {
    ids.iter()
        .enumerate()
        .filter(|(_, id)| id.as_str() != EMPTY_SLOT)
        .map(|(i, id)| (id.clone(), i))
        .collect()
}

impl Vocabulary {
    fn from_ids(ids: Vec<String>) -> Self {
        let index = index_of_ids(&ids);
        Self { ids, index }
    }

    /// First build from the templates of a training run
    pub fn build(event_ids: &[String], size: usize, seed: u64) -> Result<Self> {
        let mut seen = FxHashSet::default();
        let mut ids: Vec<String> = event_ids
            .iter()
            .filter(|id| id.as_str() != EMPTY_SLOT && seen.insert(id.as_str()))
            .cloned()
            .collect();

        if size == 0 || ids.len() > size - 1 {
            return Err(AnalyzerError::VocabularyFull {
                templates: ids.len(),
                capacity: size.saturating_sub(1),
            });
        }

        ids.resize(size - 1, EMPTY_SLOT.to_string());
        let mut rng = StdRng::seed_from_u64(seed);
        ids.shuffle(&mut rng);
        ids.push(UNKNOWN_EVENT_ID.to_string());

        let vocab = Self::from_ids(ids);
        vocab.check_invariants(size)?;
        info!(
            "Built vocabulary of {} slots with {} templates",
            size,
            vocab.template_count()
        );
        Ok(vocab)
    }

    /// Apply the library changes of a training run
    ///
    /// New ids fill shuffled empty slots; changed ids take over the slot of
    /// their old id. A single refused insertion does not stop the others.
    pub fn update(&mut self, entries: &[LibraryEntry], seed: u64) -> Result<VocabularyUpdate> {
        let size = self.ids.len();
        let mut stats = VocabularyUpdate::default();
        let mut fresh: Vec<&str> = Vec::new();

        for entry in entries.iter().filter(|e| e.is_new()) {
            fresh.push(&entry.event_id);
        }

        for entry in entries.iter().filter(|e| e.is_changed()) {
            let Some(slot) = self.position(&entry.event_id_old) else {
                warn!(
                    "Changed template {} has no slot for old id {}, inserting as new",
                    entry.event_id, entry.event_id_old
                );
                fresh.push(&entry.event_id);
                continue;
            };
            if let Some(existing) = self.position(&entry.event_id) {
                warn!(
                    "Refusing to move {} into slot {}, it already holds slot {}",
                    entry.event_id, slot, existing
                );
                stats.refused += 1;
                continue;
            }
            self.index.remove(&entry.event_id_old);
            self.ids[slot] = entry.event_id.clone();
            self.index.insert(entry.event_id.clone(), slot);
            stats.replaced += 1;
        }

        let mut free: Vec<usize> = self.ids[..size.saturating_sub(1)]
            .iter()
            .enumerate()
            .filter(|(_, id)| id.as_str() == EMPTY_SLOT)
            .map(|(i, _)| i)
            .collect();
        let mut rng = StdRng::seed_from_u64(seed);
        free.shuffle(&mut rng);
        let mut free = free.into_iter();

        for id in fresh {
            if self.index.contains_key(id) {
                warn!("Refusing duplicate vocabulary insertion of {}", id);
                stats.refused += 1;
                continue;
            }
            let Some(slot) = free.next() else {
                warn!("No empty vocabulary slot left for {}", id);
                stats.refused += 1;
                continue;
            };
            self.ids[slot] = id.to_string();
            self.index.insert(id.to_string(), slot);
            stats.inserted += 1;
        }

        self.check_invariants(size)?;
        info!(
            "Vocabulary update: {} inserted, {} replaced, {} refused",
            stats.inserted, stats.replaced, stats.refused
        );
        Ok(stats)
    }

    pub fn check_invariants(&self, size: usize) -> Result<()> {
        if self.ids.len() != size {
            return Err(AnalyzerError::VocabularyInvariant(format!(
                "length {} != {}",
                self.ids.len(),
                size
            )));
        }
        if self.ids.last().map(String::as_str) != Some(UNKNOWN_EVENT_ID) {
            return Err(AnalyzerError::VocabularyInvariant(format!(
                "last slot must be {}",
                UNKNOWN_EVENT_ID
            )));
        }
        let mut seen = FxHashSet::default();
        for id in self.ids.iter().filter(|id| id.as_str() != EMPTY_SLOT) {
            if !seen.insert(id.as_str()) {
                return Err(AnalyzerError::VocabularyInvariant(format!(
                    "duplicate id {}",
                    id
                )));
            }
        }
        Ok(())
    }

    pub fn position(&self, event_id: &str) -> Option<usize> {
        self.index.get(event_id).copied()
    }

    /// Feature index of an event; unknown events map to the last slot
    pub fn index_of(&self, event_id: &str) -> usize {
        match self.position(event_id) {
            Some(slot) => slot,
            None => {
                warn!("Event {} is not in the vocabulary", event_id);
                self.ids.len().saturating_sub(1)
            }
        }
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Slots holding a real template id
    pub fn template_count(&self) -> usize {
        self.index.len().saturating_sub(1)
    }

    /// Load `<base>.bin`, falling back to `<base>.txt`
    pub fn load(base: &Path) -> Result<Option<Self>> {
        let bin = with_suffix(base, ".bin");
        let txt = with_suffix(base, ".txt");

        let ids: Vec<String> = if bin.exists() {
            let bytes = fs::read(&bin)
                .map_err(|e| AnalyzerError::io(e, format!("reading {}", bin.display())))?;
            bincode::deserialize(&bytes)?
        } else if txt.exists() {
            fs::read_to_string(&txt)
                .map_err(|e| AnalyzerError::io(e, format!("reading {}", txt.display())))?
                .lines()
                .map(|line| line.trim().to_string())
                .filter(|line| !line.is_empty())
                .collect()
        } else {
            return Ok(None);
        };

        info!("Loaded vocabulary of {} slots from {}", ids.len(), base.display());
        Ok(Some(Self::from_ids(ids)))
    }

    /// Write `<base>.bin` and `<base>.txt`, keeping the previous text as `.old`
    pub fn save(&self, base: &Path) -> Result<()> {
        self.check_invariants(self.ids.len())?;

        let bin = with_suffix(base, ".bin");
        let txt = with_suffix(base, ".txt");
        let bytes = bincode::serialize(&self.ids)?;

        write_atomic(&bin, |w| {
            w.write_all(&bytes)
                .map_err(|e| AnalyzerError::io(e, format!("writing {}", bin.display())))
        })?;
        backup_existing(&txt)?;
        write_lines(&txt, self.ids.iter().map(|id| format!("{}\n", id)))?;

        info!("💾 Saved vocabulary to {}", base.display());
        Ok(())
    }
}
