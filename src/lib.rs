// Core modules
pub mod config;
pub mod error;
pub mod traits;

// Per-log-type knowledge
pub mod docsis_catalog;
pub mod pattern_catalog;
pub mod table_reflow; // DS/US channel table rows -> one line each

// Cleaning stages
pub mod line_ingest;
pub mod line_merger;
pub mod log_format_detector;
pub mod preprocessor;
pub mod token_splitter;

// Template mining
pub mod cluster;
pub mod hard_params;
pub mod template_miner;
pub mod template_tree; // Arena-indexed length/anchor tree

// Persistence and driver
pub mod output;
pub mod pipeline;
pub mod template_library;
pub mod vocabulary; // STIDLE

pub use config::{Config, Context};
pub use error::{AnalyzerError, Result};
pub use pipeline::{Pipeline, RunReport};
