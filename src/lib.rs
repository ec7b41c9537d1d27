pub mod cli;
pub mod config;
pub mod decrypt;
pub mod error;
pub mod extractor;
pub mod logging;
pub mod records;
pub mod structure;
pub mod ui;

pub use cli::{Cli, OutputFormat};
pub use config::{CliOverrides, Config, DecryptConfig, FilterConfig, InputConfig, OutputConfig, TableConfig};
pub use error::{Result, UngradedError, UserFriendlyError};

pub use decrypt::{DecryptedInput, Decryptor};
pub use extractor::{ConfigSnapshot, ExtractionProgress, ExtractionReport, InputSummary, OutputManager, ProblemWriter};
pub use records::{StudentModuleReader, StudentModuleRecord, StudentModuleTable};
pub use structure::{CourseStructure, TraversalStatistics, UngradedFinder, UngradedProblems};
pub use ui::{GracefulShutdown, OutputFormatter, OutputMode, ProgressManager};

use std::path::{Path, PathBuf};

/// What a run would read, run and write, without touching anything.
#[derive(Debug, Clone)]
pub struct ExtractionPlan {
    pub course: String,
    pub structure_file: PathBuf,
    pub student_module_file: PathBuf,
    pub structure_command: String,
    pub student_module_command: String,
    pub output_directory: PathBuf,
}

impl ExtractionPlan {
    pub fn input_files(&self) -> [PathBuf; 2] {
        [self.structure_file.clone(), self.student_module_file.clone()]
    }

    pub fn missing_inputs(&self) -> Vec<&Path> {
        [&self.structure_file, &self.student_module_file]
            .into_iter()
            .filter(|path| !path.is_file())
            .map(PathBuf::as_path)
            .collect()
    }
}

/// Main library interface: decrypt, find ungraded problems, join, write.
pub struct UngradedExtractor {
    config: Config,
    output_formatter: OutputFormatter,
    progress_manager: ProgressManager,
    shutdown: GracefulShutdown,
    force: bool,
}

impl UngradedExtractor {
    /// Registers the Ctrl-C handler; only one instance per process.
    pub fn new(config: Config, output_mode: OutputMode, verbose: u8, quiet: bool) -> Result<Self> {
        Ok(Self {
            config,
            output_formatter: OutputFormatter::new(output_mode, verbose, quiet),
            progress_manager: ProgressManager::new(!quiet),
            shutdown: GracefulShutdown::new()?,
            force: false,
        })
    }

    /// No signal handler, no progress bars, no console chatter.
    pub fn headless(config: Config) -> Self {
        Self {
            config,
            output_formatter: OutputFormatter::new(OutputMode::Plain, 0, true),
            progress_manager: ProgressManager::new(false),
            shutdown: GracefulShutdown::new_for_test(),
            force: false,
        }
    }

    pub fn from_cli(cli_args: &Cli) -> Result<Self> {
        let config = cli_args.load_config()?;

        let mut extractor = Self::new(
            config,
            cli_args.output_mode(),
            cli_args.verbose,
            cli_args.quiet,
        )?;
        extractor.progress_manager = ProgressManager::new(cli_args.show_progress());
        Ok(extractor.with_force(cli_args.force))
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn plan(&self, course: &str) -> ExtractionPlan {
        let decryptor = Decryptor::from_config(&self.config.decrypt);
        let structure_file = self.config.structure_path(course);
        let student_module_file = self.config.student_module_path(course);

        ExtractionPlan {
            course: course.to_string(),
            structure_command: decryptor.describe_command(&structure_file),
            student_module_command: decryptor.describe_command(&student_module_file),
            structure_file,
            student_module_file,
            output_directory: self.config.output.base_directory.clone(),
        }
    }

    pub async fn extract(&self, course: &str) -> Result<ExtractionReport> {
        self.shutdown.check_shutdown()?;
        validate_course(course)?;
        self.output_formatter
            .start_operation(&format!("Extracting ungraded answers for {}", course));

        let plan = self.plan(course);
        let output_manager = OutputManager::new(plan.output_directory.clone())?
            .with_force_overwrite(self.force)
            .with_protected_paths(plan.input_files());
        output_manager.check_available()?;

        let decryptor = Decryptor::from_config(&self.config.decrypt);

        // Step 1: course structure
        let structure_input = self.decrypt_input(&decryptor, &plan.structure_file, "course structure").await?;
        self.shutdown.check_shutdown()?;

        let structure = CourseStructure::from_slice(&structure_input.bytes)?;
        self.output_formatter
            .debug(&format!("Course structure has {} blocks", structure.len()));

        // Step 2: ungraded problems
        let (problems, statistics) = self.find_ungraded(&structure)?;
        self.shutdown.check_shutdown()?;

        // Step 3: student module table, restricted to those problems
        let table_input = self.decrypt_input(&decryptor, &plan.student_module_file, "student module table").await?;
        self.shutdown.check_shutdown()?;

        let table = StudentModuleReader::new(&self.config.table)
            .read_filtered(&table_input.bytes, &problems.problem_ids())?;
        for warning in &table.warnings {
            tracing::warn!("{}", warning);
        }
        self.output_formatter.info(&format!(
            "Kept {} of {} student module rows",
            table.retained_rows, table.total_rows
        ));

        let inputs = InputSummary {
            structure_file: plan.structure_file.display().to_string(),
            student_module_file: plan.student_module_file.display().to_string(),
            structure_bytes: structure_input.len() as u64,
            student_module_bytes: table_input.len() as u64,
            blocks: structure.len(),
            table_rows: table.total_rows,
        };
        drop(table_input);
        drop(structure_input);

        // Step 4: output directory
        output_manager.initialize()?;
        self.output_formatter.success(&format!(
            "Initialized output directory: {}",
            output_manager.get_output_directory().display()
        ));
        self.shutdown.check_shutdown()?;

        // Step 5: one file per problem
        let writer = ProblemWriter::new();
        let planned = writer.plan(&problems);
        let (written, progress) = self.write_problems(&writer, &planned, &table, output_manager.get_output_directory())?;

        // Step 6: report and index
        let mut warnings = table.warnings.clone();
        warnings.extend(progress.warnings.iter().cloned());

        let report = output_manager.create_extraction_report(
            course,
            inputs,
            &written,
            &statistics,
            &progress,
            warnings,
            ConfigSnapshot::from(&self.config),
        );

        if self.config.output.generate_report {
            let path = output_manager.save_report_json(&report)?;
            self.output_formatter
                .debug(&format!("Report written to {}", path.display()));
        }

        if self.config.output.create_index {
            writer.create_index_file(&written, course, output_manager.get_output_directory())?;
        }

        tracing::info!(
            course,
            problems = written.len(),
            rows = progress.rows_written,
            warnings = report.warnings.len(),
            "extraction finished"
        );

        Ok(report)
    }

    async fn decrypt_input(&self, decryptor: &Decryptor, path: &Path, label: &str) -> Result<DecryptedInput> {
        self.output_formatter.start_operation(&format!("Reading {}", label));
        self.output_formatter
            .debug(&format!("Running: {}", decryptor.describe_command(path)));

        let spinner = self
            .progress_manager
            .create_spinner(&format!("Decrypting {}", path.display()));

        match decryptor.decrypt(path).await {
            Ok(input) => {
                ui::progress::finish_progress_with_summary(
                    &spinner,
                    &format!(
                        "Read {} ({})",
                        label,
                        extractor::output_manager::format_bytes(input.len() as u64)
                    ),
                    input.elapsed,
                );
                Ok(input)
            }
            Err(e) => {
                spinner.abandon();
                Err(self.shutdown.map_error(e))
            }
        }
    }

    fn find_ungraded(&self, structure: &CourseStructure) -> Result<(UngradedProblems, TraversalStatistics)> {
        self.output_formatter.start_operation("Finding ungraded problems");

        let finder = UngradedFinder::new(&self.config.filter)?;
        let (problems, statistics) = finder.find_with_statistics(structure)?;
        self.output_formatter.debug(&statistics.display_summary());

        if problems.is_empty() {
            return Err(UngradedError::NoUngradedProblems {
                container_category: self.config.filter.container_category.clone(),
            });
        }

        self.output_formatter.info(&format!(
            "Found {} ungraded problems in {} sections",
            problems.problem_count(),
            problems.sections().len()
        ));

        Ok((problems, statistics))
    }

    fn write_problems(
        &self,
        writer: &ProblemWriter,
        planned: &[extractor::PlannedProblem],
        table: &StudentModuleTable,
        output_dir: &Path,
    ) -> Result<(Vec<extractor::WrittenProblem>, ExtractionProgress)> {
        self.output_formatter.start_operation("Writing student answers");

        let problem_progress = self.progress_manager.create_problem_progress(planned.len() as u64);
        let progress_callback = |progress: &ExtractionProgress| -> Result<()> {
            ui::progress::update_problem_progress(&problem_progress, progress);
            self.shutdown.check_shutdown()
        };

        match writer.write_all(planned, table, output_dir, Some(&progress_callback)) {
            Ok((written, progress)) => {
                ui::progress::finish_progress_with_summary(
                    &problem_progress,
                    &format!("Wrote {} problems", progress.problems_written),
                    progress.elapsed(),
                );
                let output = ui::ProgressAwareOutput::new(&self.output_formatter, Some(&self.progress_manager));
                for warning in &progress.warnings {
                    tracing::warn!("{}", warning);
                    output.warning(warning);
                }
                Ok((written, progress))
            }
            Err(e) => {
                problem_progress.abandon();
                Err(self.shutdown.map_error(e))
            }
        }
    }

    pub fn generate_sample_config<P: AsRef<Path>>(output_path: P) -> Result<()> {
        Config::default().save_to_file(output_path)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn output_formatter(&self) -> &OutputFormatter {
        &self.output_formatter
    }

    pub fn progress_manager(&self) -> &ProgressManager {
        &self.progress_manager
    }

    pub fn is_running(&self) -> bool {
        self.shutdown.is_running()
    }

    pub fn request_shutdown(&self) {
        self.shutdown.request_shutdown();
    }

    pub fn handle_error(&self, error: &UngradedError) {
        self.progress_manager.clear();
        self.output_formatter.print_user_friendly_error(error);
    }
}

/// Run a full extraction with no console output.
pub async fn extract_course(course: &str, config: Config) -> Result<ExtractionReport> {
    config.validate()?;
    UngradedExtractor::headless(config).extract(course).await
}

pub fn validate_course(course: &str) -> Result<String> {
    cli::validate_course_name(course).map_err(|_| UngradedError::InvalidCourseName {
        name: course.to_string(),
    })
}

pub fn version_info() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const STRUCTURE: &str = r#"{
        "seq-1": {"category": "sequential", "children": ["vert-1"], "metadata": {"display_name": "Practice"}},
        "vert-1": {"category": "vertical", "children": ["prob-1"], "metadata": {"display_name": "Warm Up"}},
        "prob-1": {"category": "problem", "children": [], "metadata": {"display_name": "First Question"}}
    }"#;

    const TABLE: &str = "module_id\tstudent_id\tstate\tcreated\tmodified\tdone\n\
                         prob-1\t7\t{\"student_answers\": {\"prob-1_2_1\": \"42\"}}\t2014-02-01\t2014-02-01\tna\n";

    fn config_for(dir: &Path) -> Config {
        let structure = dir.join("course.json");
        let table = dir.join("studentmodule.sql");
        fs::write(&structure, STRUCTURE).unwrap();
        fs::write(&table, TABLE).unwrap();

        let mut config = Config::default();
        config.decrypt.enabled = false;
        config.input.structure_file = Some(structure);
        config.input.student_module_file = Some(table);
        config.output.base_directory = dir.join("out");
        config
    }

    #[tokio::test]
    async fn test_headless_extraction() {
        let dir = TempDir::new().unwrap();
        let extractor = UngradedExtractor::headless(config_for(dir.path()));

        let report = extractor.extract("Course").await.unwrap();
        assert_eq!(report.extraction_summary.problems, 1);
        assert_eq!(report.total_rows(), 1);
        assert!(!report.has_warnings());

        let out = dir.path().join("out");
        assert!(out.join("Warm Up").join("First Question.tsv").exists());
        assert!(out.join("_index.md").exists());
        assert!(out.join(".ungraded").join("extraction_report.json").exists());
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let dir = TempDir::new().unwrap();
        let extractor = UngradedExtractor::headless(config_for(dir.path()));
        extractor.request_shutdown();

        let result = extractor.extract("Course").await;
        assert!(matches!(result, Err(UngradedError::Cancelled)));
        assert!(!dir.path().join("out").exists());
    }

    #[tokio::test]
    async fn test_existing_output_is_checked_before_reading_inputs() {
        let dir = TempDir::new().unwrap();
        let mut config = config_for(dir.path());
        config.input.structure_file = Some(dir.path().join("missing.json"));
        fs::create_dir(dir.path().join("out")).unwrap();
        fs::write(dir.path().join("out").join("keep.tsv"), "x").unwrap();

        let result = UngradedExtractor::headless(config).extract("Course").await;
        assert!(matches!(result, Err(UngradedError::OutputDirectoryExists { .. })));
        assert!(dir.path().join("out").join("keep.tsv").exists());
    }

    #[tokio::test]
    async fn test_force_never_deletes_the_inputs() {
        let dir = TempDir::new().unwrap();
        let mut config = config_for(dir.path());
        config.output.base_directory = dir.path().to_path_buf();

        let result = UngradedExtractor::headless(config)
            .with_force(true)
            .extract("Course")
            .await;

        assert!(matches!(result, Err(UngradedError::OutputContainsInput { .. })));
        assert!(dir.path().join("course.json").exists());
        assert!(dir.path().join("studentmodule.sql").exists());
    }

    #[test]
    fn test_plan_composes_paths_and_commands() {
        let mut config = Config::default();
        config.input.database_prefix = PathBuf::from("/data/dumps");
        let extractor = UngradedExtractor::headless(config);

        let plan = extractor.plan("BerkeleyX-GG101x-1T2014");
        assert_eq!(
            plan.structure_file,
            PathBuf::from("/data/dumps/BerkeleyX-GG101x-1T2014-course_structure-prod-analytics.json.gpg")
        );
        assert!(plan.structure_command.starts_with("gpg --quiet --output - /data/dumps/"));
        assert_eq!(plan.missing_inputs().len(), 2);
        assert_eq!(plan.output_directory, PathBuf::from("ungraded_problems"));
    }

    #[test]
    fn test_sample_config_generation() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("sample.toml");

        UngradedExtractor::generate_sample_config(&config_path).unwrap();

        let content = fs::read_to_string(&config_path).unwrap();
        assert!(content.contains("[input]"));
        assert!(content.contains("[decrypt]"));
        assert!(content.contains("[filter]"));
        assert!(content.contains("[output]"));
        assert!(Config::load_from_file(&config_path).is_ok());
    }

    #[test]
    fn test_course_validation() {
        assert!(validate_course("BerkeleyX-GG101x-1T2014").is_ok());
        assert!(matches!(
            validate_course("../secrets"),
            Err(UngradedError::InvalidCourseName { .. })
        ));
    }

    #[test]
    fn test_version_info() {
        assert!(!version_info().is_empty());
    }
}
