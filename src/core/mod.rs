pub mod analyzer;
pub mod chunker;
pub mod engine;
pub mod pipeline;
pub mod technical;

pub use crate::domain::ports::{Ingestor, Pipeline, Storage};
pub use crate::utils::error::Result;
pub use engine::AnalysisEngine;
pub use pipeline::AnalysisPipeline;
