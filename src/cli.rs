use crate::config::{CliOverrides, Config};
use crate::error::Result;
use crate::logging::LoggingOptions;
use crate::ui::OutputMode;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

const MAX_COURSE_NAME_LEN: usize = 200;

#[derive(Parser, Debug)]
#[command(name = "ungraded")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Extract student answers to ungraded problems from course data dumps")]
#[command(
    long_about = "ungraded decrypts a course-structure export and a courseware_studentmodule dump, \
                  finds every problem that sits outside a graded subsection, and writes the \
                  students' answers to one tab-separated file per problem, grouped by unit."
)]
#[command(after_help = "EXAMPLES:\n  \
    ungraded BerkeleyX-GG101x-1T2014 -d ../database/berkeleyx-2015-02-01\n  \
    ungraded BerkeleyX-GG101x-1T2014 --output gg101x-answers --force\n  \
    ungraded MyCourse --no-decrypt --structure-file course.json --student-module-file sm.sql\n  \
    ungraded BerkeleyX-GG101x-1T2014 --dry-run\n  \
    ungraded --generate-config")]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Course name used to locate the dump files (e.g. BerkeleyX-GG101x-1T2014)
    #[arg(value_parser = validate_course_name, required_unless_present = "generate_config")]
    pub course: Option<String>,

    /// Directory holding the encrypted dump files
    #[arg(short, long)]
    pub database_prefix: Option<PathBuf>,

    /// Course structure file (overrides the name derived from the course)
    #[arg(long)]
    pub structure_file: Option<PathBuf>,

    /// Student module table (overrides the name derived from the course)
    #[arg(long)]
    pub student_module_file: Option<PathBuf>,

    /// Output directory
    #[arg(short, long, help = "Output directory (default: ungraded_problems)")]
    pub output: Option<PathBuf>,

    /// Configuration file path
    #[arg(short, long, help = "Path to TOML configuration file")]
    pub config: Option<PathBuf>,

    /// Program used to decrypt the inputs
    #[arg(long, help = "Decryption program (default: gpg)")]
    pub decrypt_program: Option<String>,

    /// Treat the inputs as plaintext
    #[arg(long, conflicts_with = "decrypt_program")]
    pub no_decrypt: bool,

    /// Decryption timeout in seconds
    #[arg(long, help = "Timeout for each decryption (seconds)")]
    pub timeout: Option<u64>,

    /// Section names to skip (comma-separated regular expressions; replaces the config file's list)
    #[arg(long, value_delimiter = ',')]
    pub exclude_sections: Option<Vec<String>>,

    /// Output format for results
    #[arg(long, value_enum, default_value_t = OutputFormat::Human)]
    pub output_format: OutputFormat,

    /// Verbose output level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (suppress non-essential output)
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log level for diagnostics on stderr
    #[arg(long, help = "Log level (trace, debug, info, warn, error)")]
    pub log_level: Option<String>,

    /// Force overwrite of existing output directory
    #[arg(long, help = "Overwrite existing output directory")]
    pub force: bool,

    /// Dry run (show what would be done without executing)
    #[arg(long, help = "Show the commands and paths that would be used, without running them")]
    pub dry_run: bool,

    /// Generate sample configuration file
    #[arg(long, help = "Generate a sample configuration file")]
    pub generate_config: bool,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable colored output
    Human,
    /// JSON formatted output
    Json,
    /// Plain text output
    Plain,
}

impl From<&OutputFormat> for OutputMode {
    fn from(format: &OutputFormat) -> Self {
        match format {
            OutputFormat::Human => OutputMode::Human,
            OutputFormat::Json => OutputMode::Json,
            OutputFormat::Plain => OutputMode::Plain,
        }
    }
}

impl Cli {
    pub fn load_config(&self) -> Result<Config> {
        let mut config = Config::load_with_defaults(self.config.as_ref())?;

        let overrides = self.create_cli_overrides();
        config.merge_with_cli_args(&overrides);
        config.validate()?;

        Ok(config)
    }

    pub fn create_cli_overrides(&self) -> CliOverrides {
        CliOverrides::new()
            .with_database_prefix(self.database_prefix.clone())
            .with_structure_file(self.structure_file.clone())
            .with_student_module_file(self.student_module_file.clone())
            .with_decrypt_program(self.decrypt_program.clone())
            .with_decrypt_enabled(self.no_decrypt.then_some(false))
            .with_timeout(self.timeout)
            .with_exclude_sections(self.exclude_sections.clone())
            .with_output_dir(self.output.clone())
    }

    pub fn course_name(&self) -> &str {
        self.course.as_deref().unwrap_or_default()
    }

    pub fn output_mode(&self) -> OutputMode {
        OutputMode::from(&self.output_format)
    }

    pub fn logging_options(&self) -> LoggingOptions {
        LoggingOptions {
            log_level: self.log_level.clone(),
            verbose: self.verbose,
            quiet: self.quiet,
        }
    }

    /// Progress bars only make sense for interactive human output.
    pub fn show_progress(&self) -> bool {
        !self.quiet
            && matches!(self.output_format, OutputFormat::Human)
            && console::Term::stderr().is_term()
    }
}

pub fn validate_course_name(s: &str) -> std::result::Result<String, String> {
    if s.is_empty() {
        return Err("Course name must not be empty".to_string());
    }

    if s.chars().count() > MAX_COURSE_NAME_LEN {
        return Err(format!(
            "Course name must be {} characters or less",
            MAX_COURSE_NAME_LEN
        ));
    }

    if s.starts_with('.') {
        return Err("Course name cannot start with a dot".to_string());
    }

    let valid = s
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | '+'));
    if !valid {
        return Err(
            "Course name contains invalid characters. Only alphanumerics, '-', '_', '.', and '+' are allowed."
                .to_string(),
        );
    }

    Ok(s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("ungraded").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_valid_course_names() {
        for name in [
            "BerkeleyX-GG101x-1T2014",
            "course-v1_MITx+6.00x+2T2017",
            "Stat2.1x",
        ] {
            assert!(validate_course_name(name).is_ok(), "Should accept: {}", name);
        }
    }

    #[test]
    fn test_invalid_course_names() {
        let too_long = "a".repeat(201);
        for name in ["", ".hidden", "../etc", "a/b", "name with spaces", too_long.as_str()] {
            assert!(validate_course_name(name).is_err(), "Should reject: {}", name);
        }
    }

    #[test]
    fn test_cli_overrides() {
        let cli = parse(&[
            "BerkeleyX-GG101x-1T2014",
            "-d",
            "/data/dumps",
            "--no-decrypt",
            "--exclude-sections",
            "^Survey,Intro$",
            "-o",
            "answers",
        ]);

        let overrides = cli.create_cli_overrides();
        assert_eq!(overrides.database_prefix, Some(PathBuf::from("/data/dumps")));
        assert_eq!(overrides.decrypt_enabled, Some(false));
        assert_eq!(
            overrides.exclude_sections,
            Some(vec!["^Survey".to_string(), "Intro$".to_string()])
        );
        assert_eq!(overrides.output_dir, Some(PathBuf::from("answers")));
        assert_eq!(cli.course_name(), "BerkeleyX-GG101x-1T2014");
    }

    #[test]
    fn test_decryption_stays_enabled_by_default() {
        let cli = parse(&["Course"]);
        assert_eq!(cli.create_cli_overrides().decrypt_enabled, None);
    }

    #[test]
    fn test_generate_config_needs_no_course() {
        let cli = parse(&["--generate-config"]);
        assert!(cli.generate_config);
        assert!(cli.course.is_none());
    }

    #[test]
    fn test_conflicting_flags() {
        assert!(Cli::try_parse_from(["ungraded", "Course", "-v", "-q"]).is_err());
        assert!(Cli::try_parse_from(["ungraded", "Course", "--no-decrypt", "--decrypt-program", "cat"]).is_err());
    }

    #[test]
    fn test_output_mode_and_verbosity() {
        let cli = parse(&["Course", "--output-format", "json", "-vv"]);
        assert_eq!(cli.output_mode(), OutputMode::Json);
        assert!(!cli.show_progress());
        assert_eq!(cli.logging_options().verbose, 2);
    }
}
