use crate::error::{AnalyzerError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

/// Which downstream consumer the run prepares data for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Context {
    /// Template library update only
    TempUpdt,
    /// Count-vector classifier
    LogLab,
    /// Sequence model
    DeepLog,
    /// Rule-based knowledge base
    OldSchool,
    /// Classic ML detectors
    Loglizer,
}

impl Context {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "TEMPUPDT" => Some(Context::TempUpdt),
            "LOGLAB" => Some(Context::LogLab),
            "DEEPLOG" => Some(Context::DeepLog),
            "OLDSCHOOL" => Some(Context::OldSchool),
            "LOGLIZER" => Some(Context::Loglizer),
            _ => None,
        }
    }

    /// Session segment labels are only meaningful to the sequence model
    pub fn labels_sessions(&self) -> bool {
        matches!(self, Context::DeepLog)
    }

    /// Prediction in these contexts needs a log of the configured type
    pub fn requires_log_type(&self) -> bool {
        matches!(self, Context::LogLab | Context::DeepLog | Context::OldSchool)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateConfig {
    /// Vocabulary (STIDLE) length
    pub size: usize,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self { size: 2000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_type: String,
    pub training: bool,
    pub metrics: bool,
    pub context: Context,

    /// Timestamp width; `None` learns it from the template library
    pub head_offset: Option<i32>,
    /// Keep the main timestamp as a prefix of every line
    pub reserve_ts: bool,

    pub template: TemplateConfig,
    pub max_child: usize,
    pub sim_t_m: f64,

    /// Persist the `new` and `norm` intermediates
    pub intmdt: bool,
    /// Always in memory; when false the stages reload intermediates from disk
    pub aim: bool,

    /// Seed for the vocabulary shuffle
    pub seed: u64,

    pub data_dir: PathBuf,
    pub library_file: String,
    pub vocab_file: String,
    pub overwrite_library: bool,
    pub tree_dump: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_type: "cm".to_string(),
            training: false,
            metrics: false,
            context: Context::TempUpdt,
            head_offset: None,
            reserve_ts: true,
            template: TemplateConfig::default(),
            max_child: 120,
            sim_t_m: 1.0,
            intmdt: false,
            aim: true,
            seed: 42,
            data_dir: PathBuf::from("data"),
            library_file: "template_lib.csv".to_string(),
            vocab_file: "stidle".to_string(),
            overwrite_library: true,
            tree_dump: false,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a JSON file; absent keys keep their defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(AnalyzerError::NotFound {
                path: path.to_path_buf(),
            });
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| AnalyzerError::io(e, format!("reading config {}", path.display())))?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Override keys from environment variables
    pub fn apply_env(mut self) -> Result<Self> {
        if let Ok(v) = env::var("LOG_TYPE") {
            self.log_type = v;
        }
        if let Ok(v) = env::var("TRAINING") {
            self.training = parse_bool("TRAINING", &v)?;
        }
        if let Ok(v) = env::var("METRICS") {
            self.metrics = parse_bool("METRICS", &v)?;
        }
        if let Ok(v) = env::var("CONTEXT") {
            self.context = Context::parse(&v)
                .ok_or_else(|| AnalyzerError::Config(format!("CONTEXT: unknown value '{}'", v)))?;
        }
        if let Ok(v) = env::var("HEAD_OFFSET") {
            self.head_offset = Some(parse_num("HEAD_OFFSET", &v)?);
        }
        if let Ok(v) = env::var("RESERVE_TS") {
            self.reserve_ts = parse_bool("RESERVE_TS", &v)?;
        }
        if let Ok(v) = env::var("LIB_SIZE") {
            self.template.size = parse_num("LIB_SIZE", &v)?;
        }
        if let Ok(v) = env::var("MAX_CHILD") {
            self.max_child = parse_num("MAX_CHILD", &v)?;
        }
        if let Ok(v) = env::var("SIM_T_M") {
            self.sim_t_m = parse_num("SIM_T_M", &v)?;
        }
        if let Ok(v) = env::var("INTMDT") {
            self.intmdt = parse_bool("INTMDT", &v)?;
        }
        if let Ok(v) = env::var("AIM") {
            self.aim = parse_bool("AIM", &v)?;
        }
        if let Ok(v) = env::var("SEED") {
            self.seed = parse_num("SEED", &v)?;
        }
        if let Ok(v) = env::var("DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.template.size < 2 {
            return Err(AnalyzerError::Config(
                "template.size must leave room for the unknown-event slot".to_string(),
            ));
        }
        if self.max_child == 0 {
            return Err(AnalyzerError::Config("max_child must be positive".to_string()));
        }
        if !(0.0..=1.0).contains(&self.sim_t_m) {
            return Err(AnalyzerError::Config(format!(
                "sim_t_m must be within [0, 1], got {}",
                self.sim_t_m
            )));
        }
        Ok(())
    }

    pub fn with_log_type(mut self, log_type: &str) -> Self {
        self.log_type = log_type.to_string();
        self
    }

    pub fn with_training(mut self, training: bool) -> Self {
        self.training = training;
        self
    }

    pub fn with_metrics(mut self, metrics: bool) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    pub fn with_head_offset(mut self, offset: i32) -> Self {
        self.head_offset = Some(offset);
        self
    }

    pub fn with_reserve_ts(mut self, reserve: bool) -> Self {
        self.reserve_ts = reserve;
        self
    }

    pub fn with_lib_size(mut self, size: usize) -> Self {
        self.template.size = size;
        self
    }

    pub fn with_max_child(mut self, max_child: usize) -> Self {
        self.max_child = max_child.max(1);
        self
    }

    pub fn with_sim_t_m(mut self, threshold: f64) -> Self {
        self.sim_t_m = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn with_intermediates(mut self, enabled: bool) -> Self {
        self.intmdt = enabled;
        self
    }

    pub fn with_always_in_memory(mut self, aim: bool) -> Self {
        self.aim = aim;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    pub fn with_tree_dump(mut self, enabled: bool) -> Self {
        self.tree_dump = enabled;
        self
    }

    /// Labels are carried across removed lines when they feed training or scoring
    pub fn hands_over_labels(&self) -> bool {
        self.training || self.metrics
    }

    /// Session segment labels are inserted for sequence-model training and scoring
    pub fn labels_sessions(&self) -> bool {
        self.hands_over_labels() && self.context.labels_sessions()
    }

    pub fn library_path(&self) -> PathBuf {
        self.data_dir.join(&self.library_file)
    }

    pub fn vocab_base_path(&self) -> PathBuf {
        self.data_dir.join(&self.vocab_file)
    }

    pub fn log_config(&self) {
        tracing::info!("📋 Configuration:");
        tracing::info!("   Log type: {}", self.log_type);
        tracing::info!("   Context: {:?}", self.context);
        tracing::info!("   Training: {}  Metrics: {}", self.training, self.metrics);
        match self.head_offset {
            Some(offset) => tracing::info!("   Head offset: {}", offset),
            None => tracing::info!("   Head offset: learned"),
        }
        tracing::info!("   Reserve timestamp: {}", self.reserve_ts);
        tracing::info!("   Vocabulary size: {}", self.template.size);
        tracing::info!("   Max child: {}  Merge threshold: {}", self.max_child, self.sim_t_m);
        tracing::info!("   Data dir: {}", self.data_dir.display());
        tracing::info!("   Intermediates: {}  Always in memory: {}", self.intmdt, self.aim);
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(AnalyzerError::Config(format!(
            "{}: expected a boolean, got '{}'",
            key, other
        ))),
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| AnalyzerError::Config(format!("{}: invalid number '{}'", key, value)))
}
