//! repolens analyzes a repository's commit history into a queryable
//! knowledge graph: classified commits, developer scorecards, monthly
//! business summaries, milestones, and context-grounded Q&A on top.

pub mod aggregate;
pub mod analyzer;
pub mod classifier;
pub mod completion;
pub mod config;
pub mod error;
pub mod expertise;
pub mod git;
pub mod graph;
pub mod job;
pub mod milestones;
pub mod models;
pub mod retrieve;

pub use analyzer::{AnalysisOutcome, Analyzer, BusinessTimeline};
pub use config::{load_config, Config};
pub use error::PipelineError;
