pub mod answers;
pub mod student_module;

pub use answers::{extract_student_answers, unescape, STUDENT_ANSWERS_KEY};
pub use student_module::{
    StudentModuleReader, StudentModuleRecord, StudentModuleTable, STUDENT_MODULE_COLUMNS,
};
