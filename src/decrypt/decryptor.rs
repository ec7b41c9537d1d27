use crate::config::DecryptConfig;
use crate::error::{Result, UngradedError};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;

/// Bytes produced by decrypting (or plainly reading) one input file.
#[derive(Debug, Clone)]
pub struct DecryptedInput {
    pub source: PathBuf,
    pub bytes: Vec<u8>,
    pub elapsed: Duration,
}

impl DecryptedInput {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Runs an external tool that writes the decrypted contents of a file to
/// stdout. The input path is appended after the configured arguments.
pub struct Decryptor {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    enabled: bool,
}

impl Decryptor {
    pub fn new() -> Self {
        Self::from_config(&DecryptConfig::default())
    }

    pub fn from_config(config: &DecryptConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            timeout: Duration::from_secs(config.timeout),
            enabled: config.enabled,
        }
    }

    pub fn with_program<S: Into<String>>(mut self, program: S) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Read inputs as-is instead of running the decryption tool.
    pub fn plaintext(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn describe_command(&self, path: &Path) -> String {
        if !self.enabled {
            return format!("read {}", path.display());
        }

        let mut parts = vec![self.program.clone()];
        parts.extend(self.args.iter().cloned());
        parts.push(path.display().to_string());
        parts.join(" ")
    }

    pub async fn decrypt(&self, path: &Path) -> Result<DecryptedInput> {
        if !path.is_file() {
            return Err(UngradedError::InputNotFound {
                path: path.display().to_string(),
            });
        }

        let start = Instant::now();
        let bytes = if self.enabled {
            self.run_program(path).await?
        } else {
            tokio::fs::read(path).await?
        };

        tracing::debug!(
            path = %path.display(),
            bytes = bytes.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "input decrypted"
        );

        Ok(DecryptedInput {
            source: path.to_path_buf(),
            bytes,
            elapsed: start.elapsed(),
        })
    }

    fn resolve_program(&self) -> Result<PathBuf> {
        which::which(&self.program).map_err(|_| UngradedError::DecryptorNotFound {
            program: self.program.clone(),
        })
    }

    async fn run_program(&self, path: &Path) -> Result<Vec<u8>> {
        let program = self.resolve_program()?;
        tracing::debug!(command = %self.describe_command(path), "spawning decryption tool");

        let mut cmd = Command::new(program);
        cmd.args(&self.args)
            .arg(path)
            // gpg-agent may need the terminal to ask for a passphrase
            .stdin(Stdio::inherit())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(result) => result.map_err(|e| UngradedError::Decryption {
                path: path.display().to_string(),
                message: format!("failed to run {}: {}", self.program, e),
            })?,
            Err(_) => {
                return Err(UngradedError::Timeout {
                    seconds: self.timeout.as_secs(),
                })
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = if stderr.is_empty() {
                format!("{} exited with {}", self.program, output.status)
            } else {
                stderr
            };
            return Err(UngradedError::Decryption {
                path: path.display().to_string(),
                message,
            });
        }

        Ok(output.stdout)
    }
}

impl Default for Decryptor {
    fn default() -> Self {
        Self::new()
    }
}
