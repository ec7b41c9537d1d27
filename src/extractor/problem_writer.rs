use crate::error::{Result, UngradedError};
use crate::records::{extract_student_answers, StudentModuleRecord, StudentModuleTable, STUDENT_MODULE_COLUMNS};
use crate::structure::{short_block_id, UngradedProblems};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const OUTPUT_DELIMITER: char = '\t';
const ANSWERS_COLUMN: &str = "student_answers";
/// Cap on a sanitized name in UTF-8 bytes, disambiguation suffix included.
/// Leaves room for `.tsv` under the common 255-byte component limit.
const MAX_NAME_BYTES: usize = 200;
const MAX_QUALIFIER_BYTES: usize = 64;

#[derive(Debug, Clone)]
pub struct ExtractionProgress {
    pub problems_written: usize,
    pub total_problems: usize,
    pub rows_written: usize,
    pub current_problem: Option<String>,
    pub start_time: Instant,
    pub warnings: Vec<String>,
}

impl ExtractionProgress {
    pub fn new(total_problems: usize) -> Self {
        Self {
            problems_written: 0,
            total_problems,
            rows_written: 0,
            current_problem: None,
            start_time: Instant::now(),
            warnings: Vec::new(),
        }
    }

    pub fn update_problem(&mut self, name: String, rows: usize) {
        self.problems_written += 1;
        self.rows_written += rows;
        self.current_problem = Some(name);
    }

    pub fn add_warning<S: Into<String>>(&mut self, warning: S) {
        self.warnings.push(warning.into());
    }

    pub fn percentage(&self) -> f64 {
        if self.total_problems == 0 {
            0.0
        } else {
            (self.problems_written as f64 / self.total_problems as f64) * 100.0
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn estimated_remaining(&self) -> Duration {
        if self.problems_written == 0 {
            return Duration::from_secs(0);
        }

        let rate = self.problems_written as f64 / self.elapsed().as_secs_f64();
        let remaining = self.total_problems.saturating_sub(self.problems_written);

        if rate > 0.0 {
            Duration::from_secs_f64(remaining as f64 / rate)
        } else {
            Duration::from_secs(0)
        }
    }
}

/// Where one problem's rows will land, relative to the output root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedProblem {
    pub section: String,
    pub name: String,
    pub id: String,
    pub relative_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WrittenProblem {
    pub section: String,
    pub name: String,
    pub id: String,
    pub relative_path: String,
    pub rows: usize,
}

/// Writes each ungraded problem's student rows to `<section>/<problem>.tsv`.
pub struct ProblemWriter {
    buffer_size: usize,
}

impl ProblemWriter {
    pub fn new() -> Self {
        Self {
            buffer_size: 64 * 1024,
        }
    }

    /// Resolve file names for every problem. Section directories and file
    /// names are sanitized and made unique.
    pub fn plan(&self, problems: &UngradedProblems) -> Vec<PlannedProblem> {
        let mut planned = Vec::with_capacity(problems.problem_count());
        let mut used_dirs = HashSet::new();

        for section in problems.sections() {
            let dir = unique_name(sanitize_filename(&section.name), &mut used_dirs, None);
            let mut used_files = HashSet::new();

            for problem in &section.problems {
                let stem = unique_name(
                    sanitize_filename(&problem.name),
                    &mut used_files,
                    Some(short_block_id(&problem.id)),
                );

                planned.push(PlannedProblem {
                    section: section.name.clone(),
                    name: problem.name.clone(),
                    id: problem.id.clone(),
                    relative_path: Path::new(&dir).join(format!("{}.tsv", stem)),
                });
            }
        }

        planned
    }

    /// Write every planned problem. The callback runs before each file and
    /// aborts the run when it returns an error.
    pub fn write_all(
        &self,
        planned: &[PlannedProblem],
        table: &StudentModuleTable,
        output_root: &Path,
        progress_callback: Option<&dyn Fn(&ExtractionProgress) -> Result<()>>,
    ) -> Result<(Vec<WrittenProblem>, ExtractionProgress)> {
        let mut progress = ExtractionProgress::new(planned.len());
        let mut written = Vec::with_capacity(planned.len());

        for problem in planned {
            if let Some(callback) = progress_callback {
                callback(&progress)?;
            }

            let rows = self.write_problem(problem, table.records_for(&problem.id), output_root, &mut progress)?;
            tracing::debug!(problem = %problem.id, rows, path = %problem.relative_path.display(), "problem written");

            progress.update_problem(problem.name.clone(), rows);
            written.push(WrittenProblem {
                section: problem.section.clone(),
                name: problem.name.clone(),
                id: problem.id.clone(),
                relative_path: problem.relative_path.to_string_lossy().replace('\\', "/"),
                rows,
            });
        }

        if let Some(callback) = progress_callback {
            callback(&progress)?;
        }

        Ok((written, progress))
    }

    fn write_problem(
        &self,
        problem: &PlannedProblem,
        records: &[StudentModuleRecord],
        output_root: &Path,
        progress: &mut ExtractionProgress,
    ) -> Result<usize> {
        let dest = output_root.join(&problem.relative_path);
        check_path_length(&dest)?;

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = fs::File::create(&dest)?;
        let mut writer = BufWriter::with_capacity(self.buffer_size, file);

        write_header(&mut writer)?;
        for record in records {
            let answers = match record.state.as_deref() {
                None => Some("{}".to_string()),
                Some(state) => match extract_student_answers(state) {
                    Ok(value) => Some(value.to_string()),
                    Err(e) => {
                        progress.add_warning(format!(
                            "Row {} ({}): state could not be decoded: {}",
                            record.row_index, problem.id, e
                        ));
                        None
                    }
                },
            };
            write_record(&mut writer, record, answers.as_deref())?;
        }

        writer.flush()?;
        Ok(records.len())
    }

    pub fn create_index_file(&self, written: &[WrittenProblem], course: &str, output_dir: &Path) -> Result<()> {
        let index_path = output_dir.join("_index.md");
        let mut index_file = BufWriter::new(fs::File::create(&index_path)?);

        writeln!(index_file, "# Ungraded Problems: {}", course)?;
        writeln!(index_file)?;
        writeln!(
            index_file,
            "Generated on {}",
            chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
        )?;
        writeln!(index_file)?;

        let mut current_section: Option<&str> = None;
        for problem in written {
            if current_section != Some(problem.section.as_str()) {
                if current_section.is_some() {
                    writeln!(index_file)?;
                }
                writeln!(index_file, "## {}", problem.section)?;
                writeln!(index_file)?;
                current_section = Some(problem.section.as_str());
            }

            writeln!(
                index_file,
                "- [{}]({}) ({} rows)",
                link_text(&problem.name),
                link_target(&problem.relative_path),
                problem.rows
            )?;
        }
        if current_section.is_some() {
            writeln!(index_file)?;
        }

        writeln!(index_file, "---")?;
        writeln!(index_file, "Total problems: {}", written.len())?;
        writeln!(
            index_file,
            "Total rows: {}",
            written.iter().map(|p| p.rows).sum::<usize>()
        )?;
        index_file.flush()?;

        Ok(())
    }
}

impl Default for ProblemWriter {
    fn default() -> Self {
        Self::new()
    }
}

fn write_header<W: Write>(writer: &mut W) -> Result<()> {
    for column in STUDENT_MODULE_COLUMNS.iter().chain(std::iter::once(&ANSWERS_COLUMN)) {
        write!(writer, "{}{}", OUTPUT_DELIMITER, column)?;
    }
    writeln!(writer)?;
    Ok(())
}

fn write_record<W: Write>(writer: &mut W, record: &StudentModuleRecord, answers: Option<&str>) -> Result<()> {
    write!(writer, "{}", record.row_index)?;
    for field in record.fields().into_iter().chain(std::iter::once(answers)) {
        write!(writer, "{}{}", OUTPUT_DELIMITER, quote_field(field.unwrap_or("")))?;
    }
    writeln!(writer)?;
    Ok(())
}

/// Quote a field only when it holds the delimiter, a quote, or a line break.
pub fn quote_field(value: &str) -> std::borrow::Cow<'_, str> {
    if value.contains([OUTPUT_DELIMITER, '"', '\r', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\"")).into()
    } else {
        value.into()
    }
}

/// Percent-encode the characters that end or break a markdown link target.
fn link_target(path: &str) -> String {
    let mut encoded = String::with_capacity(path.len());
    for ch in path.chars() {
        match ch {
            ' ' | '%' | '(' | ')' | '#' | '<' | '>' | '[' | ']' | '\\' => {
                encoded.push_str(&format!("%{:02X}", ch as u32));
            }
            c => encoded.push(c),
        }
    }
    encoded
}

fn link_text(name: &str) -> String {
    name.replace('[', "\\[").replace(']', "\\]")
}

fn unique_name(candidate: String, used: &mut HashSet<String>, qualifier: Option<&str>) -> String {
    let mut name = candidate;
    if used.contains(&name) {
        if let Some(qualifier) = qualifier {
            let qualifier = sanitize_filename(qualifier);
            name = with_suffix(&name, &format!("_{}", truncate_bytes(&qualifier, MAX_QUALIFIER_BYTES)));
        }
    }

    let base = name.clone();
    let mut counter = 2;
    while used.contains(&name) {
        name = with_suffix(&base, &format!("_{}", counter));
        counter += 1;
    }

    used.insert(name.clone());
    name
}

/// Append `suffix`, shortening `base` so the result stays within the cap.
fn with_suffix(base: &str, suffix: &str) -> String {
    let room = MAX_NAME_BYTES.saturating_sub(suffix.len());
    format!("{}{}", truncate_bytes(base, room), suffix)
}

/// Longest prefix of `s` that fits in `max` bytes without splitting a char.
fn truncate_bytes(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Make a display name safe to use as a single path component.
pub fn sanitize_filename(name: &str) -> String {
    let mut sanitized = String::new();

    for ch in name.chars() {
        match ch {
            '<' | '>' | ':' | '"' | '|' | '?' | '*' => sanitized.push('_'),
            '/' | '\\' => sanitized.push('_'),
            c if c.is_control() => sanitized.push('_'),
            c => sanitized.push(c),
        }
    }

    // leading dots would hide the entry or climb out of the output root
    let sanitized = truncate_bytes(sanitized.trim_matches(&['.', ' '][..]), MAX_NAME_BYTES)
        .trim_end_matches(&['.', ' '][..]);

    if sanitized.is_empty() {
        "unnamed".to_string()
    } else {
        sanitized.to_string()
    }
}

pub fn check_path_length(path: &Path) -> Result<()> {
    let path_str = path.to_string_lossy();

    #[cfg(windows)]
    const MAX_PATH: usize = 260;

    #[cfg(not(windows))]
    const MAX_PATH: usize = 4096;

    if path_str.len() > MAX_PATH {
        Err(UngradedError::InvalidPath {
            path: format!("Path too long: {} characters (max: {})", path_str.len(), MAX_PATH),
        })
    } else {
        Ok(())
    }
}
