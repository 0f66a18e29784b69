/// Template library persistence
///
/// CSV with the columns `EventIdOld,EventId,EventTemplate,Occurrences`
/// (the last column is optional on read). The library survives between
/// training runs; prediction runs only read it.
use crate::error::{AnalyzerError, Result};
use crate::output::{backup_existing, write_atomic};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// `EventIdOld` of a template that did not exist before this run
pub const NEW_EVENT_ID: &str = "0";

/// First 8 lowercase hex digits of the MD5 of the template text
pub fn event_id_of(template: &str) -> String {
    let digest = format!("{:x}", md5::compute(template.as_bytes()));
    digest[..8].to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryEntry {
    #[serde(rename = "EventIdOld")]
    pub event_id_old: String,
    #[serde(rename = "EventId")]
    pub event_id: String,
    #[serde(rename = "EventTemplate")]
    pub template: String,
    #[serde(rename = "Occurrences", default)]
    pub occurrences: usize,
}

impl LibraryEntry {
    pub fn new(event_id_old: &str, template: &str, occurrences: usize) -> Self {
        Self {
            event_id_old: event_id_old.to_string(),
            event_id: event_id_of(template),
            template: template.to_string(),
            occurrences,
        }
    }

    pub fn is_new(&self) -> bool {
        self.event_id_old == NEW_EVENT_ID && self.event_id != NEW_EVENT_ID
    }

    pub fn is_changed(&self) -> bool {
        self.event_id_old != NEW_EVENT_ID && self.event_id_old != self.event_id
    }
}

/// Collapse rows that share an event id into one
///
/// Occurrences are summed. When the rows disagree on `EventIdOld`, the one
/// equal to the event id wins, then the first one that is not new.
pub fn merge_duplicates(entries: Vec<LibraryEntry>) -> Vec<LibraryEntry> {
    let mut merged: Vec<LibraryEntry> = Vec::with_capacity(entries.len());
    let mut position: FxHashMap<String, usize> = FxHashMap::default();

    for entry in entries {
        let Some(&idx) = position.get(&entry.event_id) else {
            position.insert(entry.event_id.clone(), merged.len());
            merged.push(entry);
            continue;
        };

        let kept = &mut merged[idx];
        warn!(
            "Duplicate template {} '{}' after merge, combining rows",
            entry.event_id, entry.template
        );
        kept.occurrences += entry.occurrences;

        if kept.event_id_old != entry.event_id_old {
            let replace = kept.event_id_old != kept.event_id
                && (entry.event_id_old == entry.event_id || kept.event_id_old == NEW_EVENT_ID);
            warn!(
                "Template {} had old ids {} and {}",
                kept.event_id, kept.event_id_old, entry.event_id_old
            );
            if replace {
                kept.event_id_old = entry.event_id_old;
            }
        }
    }

    merged
}

#[derive(Debug, Clone, Default)]
pub struct TemplateLibrary {
    entries: Vec<LibraryEntry>,
}

impl TemplateLibrary {
    pub fn new(entries: Vec<LibraryEntry>) -> Self {
        Self { entries }
    }

    /// Load a library; a missing file is an empty library
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No template library at {}, starting empty", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .map_err(|e| AnalyzerError::io(e, format!("reading library {}", path.display())))?;
        let mut reader = csv::Reader::from_reader(content.as_bytes());
        let mut entries = Vec::new();

        for result in reader.deserialize() {
            let mut entry: LibraryEntry = result?;
            let expected = event_id_of(&entry.template);
            if entry.event_id != expected {
                warn!(
                    "Library id {} does not hash '{}', using {}",
                    entry.event_id, entry.template, expected
                );
                entry.event_id = expected;
            }
            entries.push(entry);
        }

        info!("Loaded {} templates from {}", entries.len(), path.display());
        Ok(Self { entries })
    }

    /// Write the library, moving an existing file to `<name>.old` first
    pub fn save(&self, path: &Path, keep_backup: bool) -> Result<()> {
        if keep_backup {
            backup_existing(path)?;
        }
        write_atomic(path, |w| {
            let mut writer = csv::Writer::from_writer(w);
            for entry in &self.entries {
                writer.serialize(entry)?;
            }
            writer
                .flush()
                .map_err(|e| AnalyzerError::io(e, format!("writing {}", path.display())))
        })?;

        info!("💾 Saved {} templates to {}", self.entries.len(), path.display());
        Ok(())
    }

    pub fn entries(&self) -> &[LibraryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> FxHashSet<String> {
        self.entries.iter().map(|e| e.event_id.clone()).collect()
    }

    pub fn new_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_new()).count()
    }

    pub fn changed_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_changed()).count()
    }
}

/// Row of the per-run templates table
#[derive(Debug, Clone, Serialize)]
pub struct TemplateRow {
    #[serde(rename = "EventId")]
    pub event_id: String,
    #[serde(rename = "EventTemplate")]
    pub template: String,
    #[serde(rename = "Occurrences")]
    pub occurrences: usize,
}

pub fn save_templates_table(path: &Path, rows: &[TemplateRow]) -> Result<()> {
    write_atomic(path, |w| {
        let mut writer = csv::Writer::from_writer(w);
        for row in rows {
            writer.serialize(row)?;
        }
        writer
            .flush()
            .map_err(|e| AnalyzerError::io(e, format!("writing {}", path.display())))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_event_id_of() {
        let id = event_id_of("a b <*>");
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(id, format!("{:x}", md5::compute("a b <*>"))[..8]);
        assert_ne!(id, event_id_of("a b c"));
    }

    #[test]
    fn test_missing_library_is_empty() {
        let dir = TempDir::new().unwrap();
        let lib = TemplateLibrary::load(&dir.path().join("none.csv")).unwrap();
        assert!(lib.is_empty());
    }

    #[test]
    fn test_save_and_reload_with_backup() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("template_lib.csv");

        let first = TemplateLibrary::new(vec![LibraryEntry::new("0", "a b <*>", 3)]);
        first.save(&path, true).unwrap();
        let second = TemplateLibrary::new(vec![
            LibraryEntry::new(&event_id_of("a b <*>"), "a b <*>", 5),
            LibraryEntry::new("0", "link <*> down", 1),
        ]);
        second.save(&path, true).unwrap();

        let reloaded = TemplateLibrary::load(&path).unwrap();
        assert_eq!(reloaded.entries(), second.entries());
        assert_eq!(reloaded.new_count(), 1);

        let backup = TemplateLibrary::load(&dir.path().join("template_lib.csv.old")).unwrap();
        assert_eq!(backup.entries(), first.entries());
    }

    #[test]
    fn test_load_without_occurrences_column() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lib.csv");
        let id = event_id_of("reset <*>");
        fs::write(
            &path,
            format!("EventIdOld,EventId,EventTemplate\n0,{},reset <*>\n", id),
        )
        .unwrap();

        let lib = TemplateLibrary::load(&path).unwrap();
        assert_eq!(lib.entries()[0].occurrences, 0);
        assert!(lib.ids().contains(&id));
    }

    #[test]
    fn test_load_repairs_bad_id() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lib.csv");
        fs::write(&path, "EventIdOld,EventId,EventTemplate\n0,deadbeef,reset <*>\n").unwrap();

        let lib = TemplateLibrary::load(&path).unwrap();
        assert_eq!(lib.entries()[0].event_id, event_id_of("reset <*>"));
    }

    #[test]
    fn test_merge_duplicates() {
        let id = event_id_of("a <*> c");
        let merged = merge_duplicates(vec![
            LibraryEntry::new("0", "a <*> c", 2),
            LibraryEntry::new("0", "x y", 1),
            LibraryEntry::new(&id, "a <*> c", 4),
        ]);

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].occurrences, 6);
        assert_eq!(merged[0].event_id_old, id);
        assert_eq!(merged[1].template, "x y");
    }

    #[test]
    fn test_merge_duplicates_agreeing_old_id() {
        let merged = merge_duplicates(vec![
            LibraryEntry::new("12345678", "a <*>", 1),
            LibraryEntry::new("12345678", "a <*>", 1),
        ]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].event_id_old, "12345678");
        assert!(merged[0].is_changed());
    }
}
