pub mod output_manager;
pub mod problem_writer;

pub use output_manager::{ConfigSnapshot, ExtractionReport, InputSummary, OutputManager};
pub use problem_writer::{ExtractionProgress, PlannedProblem, ProblemWriter, WrittenProblem};
