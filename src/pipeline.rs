/// End-to-end driver
///
/// raw file -> preprocessor -> merger -> miner -> structured table,
/// templates table, and (training only) template library + vocabulary.
///
/// Each input file is processed with its own in-memory state. Training runs
/// go one file at a time since the library and the vocabulary have a single
/// writer; other runs fan out over files with rayon.
use crate::config::Config;
use crate::error::{AnalyzerError, Result};
use crate::line_ingest::{self, RawLine};
use crate::line_merger::{LineMerger, NormLine};
use crate::log_format_detector::{LogFormatDetector, NOT_THIS_LOG_TYPE, NO_TIMESTAMP};
use crate::output::{with_suffix, write_atomic, write_lines};
use crate::pattern_catalog::catalog_for;
use crate::preprocessor::{CleanedLine, PreprocessOptions, PreprocessStats, Preprocessor};
use crate::template_library::{save_templates_table, LibraryEntry, TemplateLibrary, TemplateRow};
use crate::template_miner::{MinerSummary, TemplateMiner};
use crate::traits::PatternCatalog;
use crate::vocabulary::{Vocabulary, VocabularyUpdate};
use rayon::prelude::*;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// One row of the structured table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuredRow {
    pub line_no: usize,
    pub time: Option<String>,
    pub content: String,
    pub event_id_old: String,
    pub event_id: String,
    pub template: String,
    pub raw_line_no: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub file: String,
    pub head_offset: i32,
    pub raw_lines: usize,
    pub cleaned_lines: usize,
    pub norm_lines: usize,
    pub removed_lines: usize,
    pub table_rows: usize,
    pub clusters: usize,
    pub new_templates: usize,
    pub updated_templates: usize,
    pub merged_clusters: usize,
    pub library_written: bool,
    pub vocabulary_inserted: usize,
    pub vocabulary_replaced: usize,
    pub vocabulary_refused: usize,
    /// Events outside the vocabulary (prediction runs)
    pub unknown_events: usize,
}

/// Everything a run produced, before anything is written
pub struct RunOutput {
    pub norm_lines: Vec<NormLine>,
    pub structured: Vec<StructuredRow>,
    pub templates: Vec<TemplateRow>,
    pub library: Vec<LibraryEntry>,
    pub library_changed: bool,
    pub tree: Option<String>,
    pub report: RunReport,
}

pub struct Pipeline {
    config: Config,
    catalog: &'static dyn PatternCatalog,
}

impl Pipeline {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let catalog = catalog_for(&config.log_type)?;
        Ok(Self { config, catalog })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Timestamp width of the input, from config or learned from the library
    pub fn learn_head_offset(&self, raw: &[RawLine], library: &TemplateLibrary) -> Result<i32> {
        if let Some(offset) = self.config.head_offset {
            debug!("Head offset {} from configuration", offset);
            return Ok(offset);
        }
        if raw.iter().all(|line| line.content().trim().is_empty()) {
            return Ok(NO_TIMESTAMP);
        }

        let detector = LogFormatDetector::new(self.catalog.patterns());
        let width = detector.detect_width(raw, &library.ids());
        if width == NOT_THIS_LOG_TYPE {
            if !self.config.training && self.config.context.requires_log_type() {
                return Err(AnalyzerError::NotRecognizedAsLogType {
                    log_type: self.config.log_type.clone(),
                });
            }
            let probed = detector.probe_width(raw);
            info!("Timestamp width not learned from the library, probed {}", probed);
            return Ok(probed);
        }
        info!("Learned timestamp width {}", width);
        Ok(width)
    }

    pub fn preprocess(&self, raw: &[RawLine], head_offset: i32) -> (Vec<CleanedLine>, PreprocessStats) {
        let options = PreprocessOptions::from_config(&self.config, head_offset);
        let mut preprocessor = Preprocessor::new(self.catalog, options);
        let cleaned = preprocessor.run(raw);
        (cleaned, preprocessor.stats())
    }

    pub fn merge(&self, cleaned: Vec<CleanedLine>) -> Vec<NormLine> {
        LineMerger::new(self.catalog.patterns()).merge(cleaned)
    }

    pub fn mine(&self, norm_lines: &[NormLine], library: &TemplateLibrary) -> TemplateMiner {
        let mut miner = TemplateMiner::new(self.config.max_child, self.config.sim_t_m);
        miner.preload(library);
        for norm in norm_lines {
            miner.process_line(norm.line_no, &norm.content);
        }

        let summary = miner.summary();
        info!(
            "Mined {} lines into {} clusters ({} new, {} updated templates)",
            summary.lines, summary.clusters, summary.new_templates, summary.updated_templates
        );
        miner
    }

    fn structured_rows(&self, norm_lines: &[NormLine], miner: &TemplateMiner) -> Vec<StructuredRow> {
        let events = miner.line_events();
        norm_lines
            .iter()
            .filter_map(|norm| {
                let Some(event) = events.get(&norm.line_no) else {
                    debug!("Norm line {} has no template", norm.line_no);
                    return None;
                };
                Some(StructuredRow {
                    line_no: norm.line_no,
                    time: self.config.reserve_ts.then(|| norm.time().to_string()),
                    content: norm.labeled_content(),
                    event_id_old: event.event_id_old.clone(),
                    event_id: event.event_id.clone(),
                    template: event.template.clone(),
                    raw_line_no: norm.raw_line_no,
                })
            })
            .collect()
    }

    /// Write the cleaned lines and read them back when stages go through disk
    fn stage_cleaned(&self, cleaned: Vec<CleanedLine>, stem: Option<&Path>) -> Result<Vec<CleanedLine>> {
        let Some(stem) = stem else {
            return Ok(cleaned);
        };
        let path = with_suffix(stem, ".new");
        if self.config.intmdt || !self.config.aim {
            write_lines(&path, cleaned.iter().map(CleanedLine::render))?;
        }
        if self.config.aim {
            return Ok(cleaned);
        }

        let patterns = self.catalog.patterns();
        let text = fs::read_to_string(&path)
            .map_err(|e| AnalyzerError::io(e, format!("reading {}", path.display())))?;
        Ok(text.lines().map(|line| CleanedLine::parse(patterns, line)).collect())
    }

    fn stage_norm(&self, norm_lines: Vec<NormLine>, stem: Option<&Path>) -> Result<Vec<NormLine>> {
        let Some(stem) = stem else {
            return Ok(norm_lines);
        };
        let path = with_suffix(stem, ".norm");
        if self.config.intmdt || !self.config.aim {
            write_lines(&path, norm_lines.iter().map(NormLine::render))?;
        }
        if self.config.aim {
            return Ok(norm_lines);
        }

        let patterns = self.catalog.patterns();
        let text = fs::read_to_string(&path)
            .map_err(|e| AnalyzerError::io(e, format!("reading {}", path.display())))?;
        Ok(text
            .lines()
            .enumerate()
            .map(|(i, line)| NormLine::parse(patterns, i + 1, line))
            .collect())
    }

    /// Run every stage over one decoded input
    ///
    /// `stem` is the path prefix of the intermediate files; without it
    /// every stage stays in memory.
    pub fn process(
        &self,
        raw: &[RawLine],
        library: &TemplateLibrary,
        stem: Option<&Path>,
    ) -> Result<RunOutput> {
        let head_offset = self.learn_head_offset(raw, library)?;

        let (cleaned, stats) = self.preprocess(raw, head_offset);
        let cleaned = self.stage_cleaned(cleaned, stem)?;
        let cleaned_lines = cleaned.len();

        let norm_lines = self.merge(cleaned);
        let norm_lines = self.stage_norm(norm_lines, stem)?;

        let miner = self.mine(&norm_lines, library);
        let summary: MinerSummary = miner.summary();

        let report = RunReport {
            head_offset,
            raw_lines: raw.len(),
            cleaned_lines,
            norm_lines: norm_lines.len(),
            removed_lines: stats.removed + stats.empty,
            table_rows: stats.table_rows,
            clusters: summary.clusters,
            new_templates: summary.new_templates,
            updated_templates: summary.updated_templates,
            merged_clusters: summary.merged_clusters,
            ..Default::default()
        };

        Ok(RunOutput {
            structured: self.structured_rows(&norm_lines, &miner),
            templates: miner.template_rows(),
            library: miner.library_entries(),
            library_changed: miner.has_changes(),
            tree: self.config.tree_dump.then(|| miner.tree_dump()),
            norm_lines,
            report,
        })
    }

    fn write_structured(&self, path: &Path, rows: &[StructuredRow]) -> Result<()> {
        let with_time = self.config.reserve_ts;
        let with_raw = !self.config.training;

        write_atomic(path, |w| {
            let mut writer = csv::Writer::from_writer(w);
            let mut header = vec!["LineId"];
            if with_time {
                header.push("Time");
            }
            header.extend(["Content", "EventIdOld", "EventId", "EventTemplate"]);
            if with_raw {
                header.push("LineIdInRaw");
            }
            writer.write_record(&header)?;

            for row in rows {
                let mut record = vec![row.line_no.to_string()];
                if with_time {
                    record.push(row.time.clone().unwrap_or_default());
                }
                record.extend([
                    row.content.clone(),
                    row.event_id_old.clone(),
                    row.event_id.clone(),
                    row.template.clone(),
                ]);
                if with_raw {
                    record.push(row.raw_line_no.map(|n| n.to_string()).unwrap_or_default());
                }
                writer.write_record(&record)?;
            }
            writer
                .flush()
                .map_err(|e| AnalyzerError::io(e, format!("writing {}", path.display())))
        })
    }

    /// Persist the library and the vocabulary after a training run
    ///
    /// The vocabulary is computed and validated before anything is written,
    /// so a refused update leaves the library and its backup untouched.
    fn persist_training(&self, output: &RunOutput, report: &mut RunReport) -> Result<()> {
        let base = self.config.vocab_base_path();
        let size = self.config.template.size;
        let existing = Vocabulary::load(&base)?;

        if output.library_changed && !self.config.overwrite_library {
            warn!("Library has changes but overwrite_library is off, not saving");
            return Ok(());
        }
        if !output.library_changed {
            if existing.is_some() || output.library.is_empty() {
                info!("No new or updated templates, library left as is");
                return Ok(());
            }
            info!("No vocabulary at {}, building it from the library", base.display());
        }

        let vocab = match existing {
            Some(mut vocab) => {
                vocab.check_invariants(size)?;
                let update: VocabularyUpdate = vocab.update(&output.library, self.config.seed)?;
                report.vocabulary_inserted = update.inserted;
                report.vocabulary_replaced = update.replaced;
                report.vocabulary_refused = update.refused;
                vocab
            }
            None => {
                let ids: Vec<String> = output.library.iter().map(|e| e.event_id.clone()).collect();
                let vocab = Vocabulary::build(&ids, size, self.config.seed)?;
                report.vocabulary_inserted = vocab.template_count();
                vocab
            }
        };

        if output.library_changed {
            let library = TemplateLibrary::new(output.library.clone());
            library.save(&self.config.library_path(), true)?;
            report.library_written = true;
            info!(
                "Library now holds {} templates ({} new, {} updated)",
                library.len(),
                library.new_count(),
                library.changed_count()
            );
        }
        vocab.save(&base)
    }

    /// Count events a downstream model would see as unknown
    fn count_unknown(&self, output: &RunOutput) -> Result<usize> {
        let Some(vocab) = Vocabulary::load(&self.config.vocab_base_path())? else {
            return Ok(0);
        };
        let unknown_slot = vocab.len().saturating_sub(1);
        Ok(output
            .structured
            .iter()
            .filter(|row| vocab.index_of(&row.event_id) == unknown_slot)
            .count())
    }

    /// Process one file and write its outputs under `data_dir`
    pub fn run_file(&self, path: &Path) -> Result<RunReport> {
        if !path.exists() {
            return Err(AnalyzerError::NotFound {
                path: path.to_path_buf(),
            });
        }
        info!("📂 Processing {}", path.display());

        let raw = line_ingest::load_file(path)?;
        let library = TemplateLibrary::load(&self.config.library_path())?;

        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "input".to_string());
        let out_dir = &self.config.data_dir;
        let stem = out_dir.join(&name);

        let output = self.process(&raw, &library, Some(&stem))?;
        let mut report = output.report.clone();
        report.file = path.display().to_string();

        self.write_structured(&out_dir.join(format!("{}_structured.csv", name)), &output.structured)?;
        save_templates_table(&out_dir.join(format!("{}_templates.csv", name)), &output.templates)?;
        if let Some(tree) = &output.tree {
            write_lines(&out_dir.join(format!("{}_tree.txt", name)), [tree])?;
        }

        if self.config.training {
            self.persist_training(&output, &mut report)?;
        } else {
            report.unknown_events = self.count_unknown(&output)?;
        }

        info!(
            "✅ {}: {} raw lines, {} events, {} templates",
            name,
            report.raw_lines,
            report.norm_lines,
            output.templates.len()
        );
        Ok(report)
    }

    /// Process several files; a failing file does not stop the others
    pub fn run_files(&self, paths: &[PathBuf]) -> Vec<(PathBuf, Result<RunReport>)> {
        let run = |path: &PathBuf| {
            let result = self.run_file(path);
            if let Err(e) = &result {
                warn!("❌ {} failed: {}", path.display(), e);
            }
            (path.clone(), result)
        };

        if self.config.training {
            paths.iter().map(run).collect()
        } else {
            paths.par_iter().map(run).collect()
        }
    }
}
