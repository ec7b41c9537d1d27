pub mod course_structure;
pub mod ungraded;

pub use course_structure::{short_block_id, ContentNode, CourseStructure};
pub use ungraded::{
    Section, SectionFilter, TraversalStatistics, UngradedFinder, UngradedProblem,
    UngradedProblems,
};
