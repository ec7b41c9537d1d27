use crate::config::Config;
use crate::error::{Result, UngradedError};
use crate::extractor::{ExtractionProgress, WrittenProblem};
use crate::structure::TraversalStatistics;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const METADATA_DIR: &str = ".ungraded";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionReport {
    pub course: String,
    pub inputs: InputSummary,
    pub extraction_summary: ExtractionSummary,
    pub sections: Vec<SectionSummary>,
    pub extraction_time: DateTime<Utc>,
    pub warnings: Vec<String>,
    pub config_used: ConfigSnapshot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputSummary {
    pub structure_file: String,
    pub student_module_file: String,
    pub structure_bytes: u64,
    pub student_module_bytes: u64,
    pub blocks: usize,
    pub table_rows: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionSummary {
    pub sections: usize,
    pub problems: usize,
    pub rows_written: usize,
    pub empty_problems: usize,
    pub containers: usize,
    pub graded_containers: usize,
    pub excluded_problems: usize,
    pub extraction_duration: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionSummary {
    pub name: String,
    pub problems: Vec<WrittenProblem>,
    pub rows: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    pub decrypt_command: Option<String>,
    pub container_category: String,
    pub problem_category: String,
    pub graded_marker: String,
    pub exclude_sections: Vec<String>,
}

impl From<&Config> for ConfigSnapshot {
    fn from(config: &Config) -> Self {
        let decrypt_command = config.decrypt.enabled.then(|| {
            std::iter::once(config.decrypt.program.as_str())
                .chain(config.decrypt.args.iter().map(String::as_str))
                .collect::<Vec<_>>()
                .join(" ")
        });

        Self {
            decrypt_command,
            container_category: config.filter.container_category.clone(),
            problem_category: config.filter.problem_category.clone(),
            graded_marker: config.filter.graded_marker.clone(),
            exclude_sections: config.filter.exclude_sections.clone(),
        }
    }
}

impl ExtractionReport {
    pub fn total_rows(&self) -> usize {
        self.extraction_summary.rows_written
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// Groups written problems back into sections, keeping write order.
pub fn summarize_sections(written: &[WrittenProblem]) -> Vec<SectionSummary> {
    let mut sections: Vec<SectionSummary> = Vec::new();

    for problem in written {
        match sections.iter_mut().find(|s| s.name == problem.section) {
            Some(section) => {
                section.rows += problem.rows;
                section.problems.push(problem.clone());
            }
            None => sections.push(SectionSummary {
                name: problem.section.clone(),
                problems: vec![problem.clone()],
                rows: problem.rows,
            }),
        }
    }

    sections
}

pub struct OutputManager {
    output_directory: PathBuf,
    force_overwrite: bool,
    protected_paths: Vec<PathBuf>,
}

impl OutputManager {
    pub fn new(output_directory: PathBuf) -> Result<Self> {
        let manager = Self::unchecked(output_directory);
        manager.validate_paths()?;
        Ok(manager)
    }

    /// Checks write access from filesystem metadata only; creates nothing.
    pub fn for_inspection(output_directory: PathBuf) -> Result<Self> {
        let manager = Self::unchecked(output_directory);
        let base = manager.base_directory();

        if let Ok(metadata) = fs::metadata(&base) {
            if metadata.permissions().readonly() {
                return Err(UngradedError::Permission {
                    path: format!("No write permission for directory {}", base.display()),
                });
            }
        }
        Ok(manager)
    }

    fn unchecked(output_directory: PathBuf) -> Self {
        Self {
            output_directory,
            force_overwrite: false,
            protected_paths: Vec::new(),
        }
    }

    pub fn with_force_overwrite(mut self, force: bool) -> Self {
        self.force_overwrite = force;
        self
    }

    /// Files that clearing the output directory must never remove.
    pub fn with_protected_paths<I>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = PathBuf>,
    {
        self.protected_paths.extend(paths);
        self
    }

    /// Fails when the output directory holds files and overwriting is not
    /// allowed. Returns whether existing contents would be replaced.
    pub fn check_available(&self) -> Result<bool> {
        if !self.output_directory.exists() || is_empty_dir(&self.output_directory)? {
            return Ok(false);
        }

        if !self.force_overwrite {
            return Err(UngradedError::OutputDirectoryExists {
                path: self.output_directory.display().to_string(),
            });
        }

        self.check_protected_paths()?;
        Ok(true)
    }

    fn check_protected_paths(&self) -> Result<()> {
        let output = fs::canonicalize(&self.output_directory)?;

        for path in &self.protected_paths {
            // a missing input is reported when it is read
            let Ok(input) = fs::canonicalize(path) else {
                continue;
            };
            if input.starts_with(&output) {
                return Err(UngradedError::OutputContainsInput {
                    output: self.output_directory.display().to_string(),
                    input: path.display().to_string(),
                });
            }
        }
        Ok(())
    }

    /// Prepare an empty output directory. An existing non-empty directory is
    /// only cleared when overwriting is allowed.
    pub fn initialize(&self) -> Result<()> {
        if self.check_available()? {
            tracing::info!(path = %self.output_directory.display(), "clearing existing output directory");
            fs::remove_dir_all(&self.output_directory)?;
        }

        fs::create_dir_all(&self.output_directory)?;
        fs::create_dir_all(self.get_metadata_dir())?;

        Ok(())
    }

    pub fn get_output_directory(&self) -> &Path {
        &self.output_directory
    }

    pub fn get_metadata_dir(&self) -> PathBuf {
        self.output_directory.join(METADATA_DIR)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create_extraction_report(
        &self,
        course: &str,
        inputs: InputSummary,
        written: &[WrittenProblem],
        statistics: &TraversalStatistics,
        progress: &ExtractionProgress,
        warnings: Vec<String>,
        config: ConfigSnapshot,
    ) -> ExtractionReport {
        let sections = summarize_sections(written);

        let extraction_summary = ExtractionSummary {
            sections: sections.len(),
            problems: written.len(),
            rows_written: progress.rows_written,
            empty_problems: written.iter().filter(|p| p.rows == 0).count(),
            containers: statistics.containers,
            graded_containers: statistics.graded_containers,
            excluded_problems: statistics.excluded_problems,
            extraction_duration: progress.elapsed(),
        };

        ExtractionReport {
            course: course.to_string(),
            inputs,
            extraction_summary,
            sections,
            extraction_time: Utc::now(),
            warnings,
            config_used: config,
        }
    }

    pub fn save_report_json(&self, report: &ExtractionReport) -> Result<PathBuf> {
        let report_path = self.get_metadata_dir().join("extraction_report.json");
        let json_content = serde_json::to_string_pretty(report).map_err(|e| UngradedError::Config {
            message: format!("Failed to serialize report to JSON: {}", e),
        })?;

        fs::write(&report_path, json_content)?;
        Ok(report_path)
    }

    fn base_directory(&self) -> PathBuf {
        match self.output_directory.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    fn validate_paths(&self) -> Result<()> {
        let base = self.base_directory();

        if !base.exists() {
            fs::create_dir_all(&base).map_err(|e| UngradedError::Permission {
                path: format!("Cannot create base directory {}: {}", base.display(), e),
            })?;
        }

        let test_file = base.join(".ungraded_write_test");
        match fs::File::create(&test_file) {
            Ok(_) => {
                let _ = fs::remove_file(&test_file);
            }
            Err(e) => {
                return Err(UngradedError::Permission {
                    path: format!("No write permission for directory {}: {}", base.display(), e),
                });
            }
        }

        Ok(())
    }
}

fn is_empty_dir(path: &Path) -> Result<bool> {
    if !path.is_dir() {
        return Err(UngradedError::InvalidPath {
            path: format!("Output path is not a directory: {}", path.display()),
        });
    }
    Ok(fs::read_dir(path)?.next().is_none())
}

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn written(section: &str, name: &str, rows: usize) -> WrittenProblem {
        WrittenProblem {
            section: section.to_string(),
            name: name.to_string(),
            id: format!("i4x://X/C/problem/{}", name),
            relative_path: format!("{}/{}.tsv", section, name),
            rows,
        }
    }

    fn inputs() -> InputSummary {
        InputSummary {
            structure_file: "course.json".to_string(),
            student_module_file: "studentmodule.sql".to_string(),
            structure_bytes: 2048,
            student_module_bytes: 4096,
            blocks: 10,
            table_rows: 25,
        }
    }

    #[test]
    fn test_output_directory_initialization() {
        let temp_dir = TempDir::new().unwrap();
        let manager = OutputManager::new(temp_dir.path().join("out")).unwrap();

        manager.initialize().unwrap();

        assert!(manager.get_output_directory().exists());
        assert!(manager.get_metadata_dir().ends_with(".ungraded"));
        assert!(manager.get_metadata_dir().exists());
    }

    #[test]
    fn test_existing_empty_directory_is_reused() {
        let temp_dir = TempDir::new().unwrap();
        let out = temp_dir.path().join("out");
        fs::create_dir(&out).unwrap();

        OutputManager::new(out.clone()).unwrap().initialize().unwrap();
        assert!(out.join(".ungraded").exists());
    }

    #[test]
    fn test_force_overwrite() {
        let temp_dir = TempDir::new().unwrap();
        let manager = OutputManager::new(temp_dir.path().join("out")).unwrap();

        manager.initialize().unwrap();
        fs::write(manager.get_output_directory().join("stale.tsv"), "old").unwrap();

        match manager.initialize() {
            Err(UngradedError::OutputDirectoryExists { .. }) => {}
            other => panic!("expected OutputDirectoryExists, got {:?}", other),
        }

        let manager = manager.with_force_overwrite(true);
        manager.initialize().unwrap();
        assert!(manager.get_output_directory().exists());
        assert!(!manager.get_output_directory().join("stale.tsv").exists());
    }

    #[test]
    fn test_force_never_clears_a_directory_holding_inputs() {
        let temp_dir = TempDir::new().unwrap();
        let dumps = temp_dir.path().join("dumps");
        fs::create_dir(&dumps).unwrap();
        let structure = dumps.join("course.json");
        fs::write(&structure, "{}").unwrap();

        let manager = OutputManager::new(dumps.clone())
            .unwrap()
            .with_force_overwrite(true)
            .with_protected_paths([structure.clone()]);

        assert!(matches!(
            manager.initialize(),
            Err(UngradedError::OutputContainsInput { .. })
        ));
        assert!(structure.exists());

        // the parent of the dumps directory is just as dangerous
        let manager = OutputManager::new(temp_dir.path().to_path_buf())
            .unwrap()
            .with_force_overwrite(true)
            .with_protected_paths([structure.clone()]);
        assert!(matches!(
            manager.check_available(),
            Err(UngradedError::OutputContainsInput { .. })
        ));
        assert!(structure.exists());
    }

    #[test]
    fn test_force_clears_when_inputs_live_elsewhere() {
        let temp_dir = TempDir::new().unwrap();
        let structure = temp_dir.path().join("course.json");
        fs::write(&structure, "{}").unwrap();
        let out = temp_dir.path().join("out");
        fs::create_dir(&out).unwrap();
        fs::write(out.join("stale.tsv"), "old").unwrap();

        OutputManager::new(out.clone())
            .unwrap()
            .with_force_overwrite(true)
            .with_protected_paths([structure.clone(), temp_dir.path().join("missing.sql")])
            .initialize()
            .unwrap();

        assert!(!out.join("stale.tsv").exists());
        assert!(structure.exists());
    }

    #[test]
    fn test_inspection_writes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let manager = OutputManager::for_inspection(temp_dir.path().join("out")).unwrap();

        assert!(!manager.check_available().unwrap());
        assert_eq!(fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_output_path_is_a_file() {
        let temp_dir = TempDir::new().unwrap();
        let out = temp_dir.path().join("out");
        fs::write(&out, "not a directory").unwrap();

        let result = OutputManager::new(out).unwrap().initialize();
        assert!(matches!(result, Err(UngradedError::InvalidPath { .. })));
    }

    #[test]
    fn test_summarize_sections() {
        let problems = vec![
            written("Intro", "Q1", 3),
            written("Intro", "Q2", 0),
            written("Check", "Q3", 5),
        ];

        let sections = summarize_sections(&problems);
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].name, "Intro");
        assert_eq!(sections[0].rows, 3);
        assert_eq!(sections[0].problems.len(), 2);
        assert_eq!(sections[1].rows, 5);
    }

    #[test]
    fn test_extraction_report_creation() {
        let temp_dir = TempDir::new().unwrap();
        let manager = OutputManager::new(temp_dir.path().join("out")).unwrap();
        manager.initialize().unwrap();

        let problems = vec![written("Intro", "Q1", 3), written("Intro", "Q2", 0)];
        let mut progress = ExtractionProgress::new(2);
        progress.update_problem("Q1".to_string(), 3);
        progress.update_problem("Q2".to_string(), 0);

        let statistics = TraversalStatistics {
            containers: 4,
            graded_containers: 3,
            verticals_visited: 1,
            problems_found: 2,
            excluded_problems: 0,
        };

        let report = manager.create_extraction_report(
            "BerkeleyX-GG101x-1T2014",
            inputs(),
            &problems,
            &statistics,
            &progress,
            vec!["Row 7: expected 6 fields, found 8; row skipped".to_string()],
            ConfigSnapshot::from(&Config::default()),
        );

        assert_eq!(report.extraction_summary.problems, 2);
        assert_eq!(report.extraction_summary.empty_problems, 1);
        assert_eq!(report.total_rows(), 3);
        assert!(report.has_warnings());
        assert_eq!(
            report.config_used.decrypt_command.as_deref(),
            Some("gpg --quiet --output -")
        );

        let path = manager.save_report_json(&report).unwrap();
        let saved: ExtractionReport =
            serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(saved.course, "BerkeleyX-GG101x-1T2014");
        assert_eq!(saved.sections[0].problems.len(), 2);
    }

    #[test]
    fn test_snapshot_without_decryption() {
        let mut config = Config::default();
        config.decrypt.enabled = false;
        assert!(ConfigSnapshot::from(&config).decrypt_command.is_none());
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(1024), "1.0 KB");
        assert_eq!(format_bytes(1048576), "1.0 MB");
    }
}
