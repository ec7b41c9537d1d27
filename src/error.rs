use thiserror::Error;

#[derive(Error, Debug)]
pub enum UngradedError {
    #[error("IO operation failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Input file not found: {path}")]
    InputNotFound { path: String },

    #[error("Decryption tool not found: {program}")]
    DecryptorNotFound { program: String },

    #[error("Decryption of {path} failed: {message}")]
    Decryption { path: String, message: String },

    #[error("Decryption timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("Malformed course structure: {message}")]
    StructureParse { message: String },

    #[error("Block {parent} references missing block {id}")]
    DanglingReference { id: String, parent: String },

    #[error("Student module table is missing column: {column}")]
    MissingColumn { column: String },

    #[error("Student module table is empty")]
    EmptyTable,

    #[error("No ungraded problems found in course structure")]
    NoUngradedProblems { container_category: String },

    #[error("Invalid course name: {name}")]
    InvalidCourseName { name: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Permission denied: {path}")]
    Permission { path: String },

    #[error("Operation was cancelled by user")]
    Cancelled,

    #[error("Path validation failed: {path}")]
    InvalidPath { path: String },

    #[error("Output directory already exists: {path}")]
    OutputDirectoryExists { path: String },

    #[error("Output directory {output} contains input file {input}")]
    OutputContainsInput { output: String, input: String },
}

pub trait UserFriendlyError {
    fn user_message(&self) -> String;
    fn suggestion(&self) -> Option<String>;
}

impl UserFriendlyError for UngradedError {
    fn user_message(&self) -> String {
        match self {
            UngradedError::InputNotFound { path } => {
                format!("Input file does not exist: {}", path)
            }
            UngradedError::DecryptorNotFound { program } => {
                format!("Could not find '{}' on PATH", program)
            }
            UngradedError::Decryption { path, message } => {
                format!("Could not decrypt {}: {}", path, message.trim())
            }
            UngradedError::Timeout { seconds } => {
                format!("Decryption did not finish within {} seconds", seconds)
            }
            UngradedError::StructureParse { message } => {
                format!("Course structure could not be read: {}", message)
            }
            UngradedError::DanglingReference { id, parent } => {
                format!("Block {} lists child {} which is not in the course structure", parent, id)
            }
            UngradedError::MissingColumn { column } => {
                format!("Student module table has no '{}' column", column)
            }
            UngradedError::NoUngradedProblems { container_category } => {
                format!(
                    "Every '{}' container is graded, or contains no problems",
                    container_category
                )
            }
            UngradedError::InvalidCourseName { name } => {
                format!("Invalid course name: {}", name)
            }
            UngradedError::Config { message } => {
                format!("Configuration error: {}", message)
            }
            UngradedError::Permission { path } => {
                format!("Permission denied accessing: {}", path)
            }
            UngradedError::InvalidPath { path } => {
                format!("Invalid file path: {}", path)
            }
            UngradedError::OutputDirectoryExists { path } => {
                format!("Output directory already exists: {}", path)
            }
            UngradedError::OutputContainsInput { output, input } => {
                format!("Refusing to clear {}: it contains the input {}", output, input)
            }
            _ => self.to_string(),
        }
    }

    fn suggestion(&self) -> Option<String> {
        match self {
            UngradedError::InputNotFound { .. } => Some(
                "Check --database-prefix and the course name, or pass --structure-file / --student-module-file explicitly.".to_string()
            ),
            UngradedError::DecryptorNotFound { .. } => Some(
                "Install GnuPG, point --decrypt-program at your decryption tool, or use --no-decrypt for plaintext dumps.".to_string()
            ),
            UngradedError::Decryption { .. } => Some(
                "Make sure the private key for this dump is in your keyring and gpg-agent can prompt for its passphrase.".to_string()
            ),
            UngradedError::Timeout { .. } => Some(
                "Large dumps take a while to decrypt. Increase the limit with --timeout.".to_string()
            ),
            UngradedError::StructureParse { .. } | UngradedError::DanglingReference { .. } => Some(
                "Verify the course structure file is a complete, unmodified export.".to_string()
            ),
            UngradedError::MissingColumn { .. } | UngradedError::EmptyTable => Some(
                "The student module file must be a tab-separated dump with a header row.".to_string()
            ),
            UngradedError::NoUngradedProblems { .. } => Some(
                "Check [filter] in your configuration if this course uses different category names.".to_string()
            ),
            UngradedError::InvalidCourseName { .. } => Some(
                "Course names may contain letters, digits, '-', '_', '.', and '+' (e.g. BerkeleyX-GG101x-1T2014).".to_string()
            ),
            UngradedError::Config { .. } => Some(
                "Check your configuration file syntax and ensure all required fields are present.".to_string()
            ),
            UngradedError::Permission { .. } => Some(
                "Ensure you have the necessary read/write permissions for the target directory.".to_string()
            ),
            UngradedError::OutputDirectoryExists { .. } => Some(
                "Remove the existing directory, choose a different one with --output, or use --force to overwrite.".to_string()
            ),
            UngradedError::OutputContainsInput { .. } => Some(
                "Pick an --output directory that does not hold the course dumps.".to_string()
            ),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for UngradedError {
    fn from(error: serde_json::Error) -> Self {
        UngradedError::StructureParse {
            message: error.to_string(),
        }
    }
}

impl From<toml::de::Error> for UngradedError {
    fn from(error: toml::de::Error) -> Self {
        UngradedError::Config {
            message: error.to_string(),
        }
    }
}

impl From<regex::Error> for UngradedError {
    fn from(error: regex::Error) -> Self {
        UngradedError::Config {
            message: format!("Invalid section pattern: {}", error),
        }
    }
}

pub type Result<T> = std::result::Result<T, UngradedError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_friendly_messages() {
        let error = UngradedError::InputNotFound {
            path: "/data/course.json.gpg".to_string(),
        };
        assert!(error.user_message().contains("/data/course.json.gpg"));
        assert!(error.suggestion().is_some());

        let error = UngradedError::Decryption {
            path: "x.gpg".to_string(),
            message: "gpg: decryption failed: No secret key\n".to_string(),
        };
        assert!(error.user_message().ends_with("No secret key"));
    }

    #[test]
    fn test_cancelled_has_no_suggestion() {
        assert!(UngradedError::Cancelled.suggestion().is_none());
        assert_eq!(
            UngradedError::Cancelled.user_message(),
            "Operation was cancelled by user"
        );
    }

    #[test]
    fn test_json_error_conversion() {
        let json_error = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let error = UngradedError::from(json_error);
        assert!(matches!(error, UngradedError::StructureParse { .. }));
    }

    #[test]
    fn test_regex_error_conversion() {
        let regex_error = regex::Regex::new("(unclosed").unwrap_err();
        let error = UngradedError::from(regex_error);
        assert!(matches!(error, UngradedError::Config { .. }));
    }
}
