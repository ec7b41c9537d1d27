use crate::error::{Result, UngradedError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub input: InputConfig,
    pub decrypt: DecryptConfig,
    pub filter: FilterConfig,
    pub table: TableConfig,
    pub output: OutputConfig,
}

/// Where the two course dumps live.
///
/// Unless an explicit file is given, each path is composed as
/// `database_prefix/<course><suffix>`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct InputConfig {
    pub database_prefix: PathBuf,
    pub structure_suffix: String,
    pub student_module_suffix: String,
    pub structure_file: Option<PathBuf>,
    pub student_module_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DecryptConfig {
    pub enabled: bool,
    pub program: String,
    /// Arguments placed before the input path.
    pub args: Vec<String>,
    pub timeout: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FilterConfig {
    pub container_category: String,
    pub problem_category: String,
    pub graded_marker: String,
    pub exclude_sections: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TableConfig {
    pub delimiter: char,
    pub null_markers: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OutputConfig {
    pub base_directory: PathBuf,
    pub create_index: bool,
    pub generate_report: bool,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            database_prefix: PathBuf::from("."),
            structure_suffix: "-course_structure-prod-analytics.json.gpg".to_string(),
            student_module_suffix: "-courseware_studentmodule-prod-analytics.sql.gpg".to_string(),
            structure_file: None,
            student_module_file: None,
        }
    }
}

impl Default for DecryptConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            program: "gpg".to_string(),
            args: vec![
                "--quiet".to_string(),
                "--output".to_string(),
                "-".to_string(),
            ],
            timeout: 600, // 10 minutes
        }
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            container_category: "sequential".to_string(),
            problem_category: "problem".to_string(),
            graded_marker: "graded".to_string(),
            exclude_sections: Vec::new(),
        }
    }
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            delimiter: '\t',
            null_markers: vec![
                String::new(),
                "na".to_string(),
                "NULL".to_string(),
                "\\N".to_string(),
            ],
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            base_directory: PathBuf::from("ungraded_problems"),
            create_index: true,
            generate_report: true,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(UngradedError::Config {
                message: format!("Configuration file not found: {}", path.display()),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| UngradedError::Config {
            message: format!("Failed to read config file {}: {}", path.display(), e),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| UngradedError::Config {
            message: format!("Failed to parse config file {}: {}", path.display(), e),
        })?;

        Ok(config)
    }

    pub fn load_with_defaults<P: AsRef<Path>>(config_path: Option<P>) -> Result<Self> {
        match config_path {
            Some(path) => Self::load_from_file(path),
            None => {
                let default_paths = ["ungraded.toml", ".ungraded.toml"];

                for default_path in &default_paths {
                    if Path::new(default_path).exists() {
                        tracing::debug!(path = default_path, "using configuration file");
                        return Self::load_from_file(default_path);
                    }
                }

                Ok(Self::default())
            }
        }
    }

    pub fn merge_with_cli_args(&mut self, cli_args: &CliOverrides) {
        if let Some(ref prefix) = cli_args.database_prefix {
            self.input.database_prefix = prefix.clone();
        }

        if let Some(ref file) = cli_args.structure_file {
            self.input.structure_file = Some(file.clone());
        }

        if let Some(ref file) = cli_args.student_module_file {
            self.input.student_module_file = Some(file.clone());
        }

        if let Some(ref program) = cli_args.decrypt_program {
            self.decrypt.program = program.clone();
        }

        if let Some(enabled) = cli_args.decrypt_enabled {
            self.decrypt.enabled = enabled;
        }

        if let Some(timeout) = cli_args.timeout {
            self.decrypt.timeout = timeout;
        }

        if let Some(ref patterns) = cli_args.exclude_sections {
            self.filter.exclude_sections = patterns.clone();
        }

        if let Some(ref output_dir) = cli_args.output_dir {
            self.output.base_directory = output_dir.clone();
        }
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self).map_err(|e| UngradedError::Config {
            message: format!("Failed to serialize config: {}", e),
        })?;

        std::fs::write(path, content).map_err(|e| UngradedError::Config {
            message: format!("Failed to write config file {}: {}", path.display(), e),
        })?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.filter.container_category.trim().is_empty()
            || self.filter.problem_category.trim().is_empty()
        {
            return Err(UngradedError::Config {
                message: "Container and problem categories must not be empty".to_string(),
            });
        }

        if self.filter.graded_marker.trim().is_empty() {
            return Err(UngradedError::Config {
                message: "Graded marker must not be empty".to_string(),
            });
        }

        for pattern in &self.filter.exclude_sections {
            Regex::new(pattern)?;
        }

        if self.decrypt.enabled && self.decrypt.program.trim().is_empty() {
            return Err(UngradedError::Config {
                message: "Decryption program must be set when decryption is enabled".to_string(),
            });
        }

        if self.decrypt.timeout == 0 {
            return Err(UngradedError::Config {
                message: "Decryption timeout must be greater than 0".to_string(),
            });
        }

        if self.table.delimiter == '\n' || self.table.delimiter == '\r' {
            return Err(UngradedError::Config {
                message: "Table delimiter cannot be a line break".to_string(),
            });
        }

        if let Some(parent) = self.output.base_directory.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                return Err(UngradedError::Config {
                    message: format!("Parent directory does not exist: {}", parent.display()),
                });
            }
        }

        Ok(())
    }

    pub fn structure_path(&self, course: &str) -> PathBuf {
        self.input.structure_file.clone().unwrap_or_else(|| {
            self.input
                .database_prefix
                .join(format!("{}{}", course, self.input.structure_suffix))
        })
    }

    pub fn student_module_path(&self, course: &str) -> PathBuf {
        self.input.student_module_file.clone().unwrap_or_else(|| {
            self.input
                .database_prefix
                .join(format!("{}{}", course, self.input.student_module_suffix))
        })
    }
}

#[derive(Debug, Default)]
pub struct CliOverrides {
    pub database_prefix: Option<PathBuf>,
    pub structure_file: Option<PathBuf>,
    pub student_module_file: Option<PathBuf>,
    pub decrypt_program: Option<String>,
    pub decrypt_enabled: Option<bool>,
    pub timeout: Option<u64>,
    pub exclude_sections: Option<Vec<String>>,
    pub output_dir: Option<PathBuf>,
}

impl CliOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_database_prefix(mut self, prefix: Option<PathBuf>) -> Self {
        self.database_prefix = prefix;
        self
    }

    pub fn with_structure_file(mut self, file: Option<PathBuf>) -> Self {
        self.structure_file = file;
        self
    }

    pub fn with_student_module_file(mut self, file: Option<PathBuf>) -> Self {
        self.student_module_file = file;
        self
    }

    pub fn with_decrypt_program(mut self, program: Option<String>) -> Self {
        self.decrypt_program = program;
        self
    }

    pub fn with_decrypt_enabled(mut self, enabled: Option<bool>) -> Self {
        self.decrypt_enabled = enabled;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<u64>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_exclude_sections(mut self, patterns: Option<Vec<String>>) -> Self {
        self.exclude_sections = patterns;
        self
    }

    pub fn with_output_dir(mut self, output_dir: Option<PathBuf>) -> Self {
        self.output_dir = output_dir;
        self
    }
}
