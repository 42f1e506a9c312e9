//! Task extraction: oracle, batch orchestrator and background processor.

pub mod oracle;
pub mod orchestrator;
pub mod processor;

pub use oracle::{CandidateTask, ExtractionOracle, ExtractionResult, LlmOracle};
pub use orchestrator::{ExtractionOrchestrator, ExtractionRun};
pub use processor::spawn_extraction_processor;
