use crate::error::{Result, UngradedError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Ctrl-C handling. The first interrupt lets the current pipeline step
/// finish and stops before the next one; a second one exits immediately.
pub struct GracefulShutdown {
    interrupts: Arc<AtomicUsize>,
}

impl GracefulShutdown {
    pub fn new() -> Result<Self> {
        let interrupts = Arc::new(AtomicUsize::new(0));
        let handler_interrupts = Arc::clone(&interrupts);

        ctrlc::set_handler(move || {
            if handler_interrupts.fetch_add(1, Ordering::SeqCst) == 0 {
                eprintln!("\nInterrupted, stopping after the current step (press Ctrl+C again to abort)");
            } else {
                eprintln!("\nAborted");
                std::process::exit(130);
            }
        })
        .map_err(|e| UngradedError::Config {
            message: format!("Could not install the Ctrl-C handler: {}", e),
        })?;

        Ok(Self { interrupts })
    }

    /// No signal handler is registered.
    pub fn new_for_test() -> Self {
        Self {
            interrupts: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.interrupts.load(Ordering::SeqCst) == 0
    }

    pub fn check_shutdown(&self) -> Result<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(UngradedError::Cancelled)
        }
    }

    pub fn request_shutdown(&self) {
        self.interrupts.fetch_add(1, Ordering::SeqCst);
    }

    /// A failure that happens after Ctrl-C (e.g. the decryptor dying from the
    /// same signal) is reported as a cancellation.
    pub fn map_error(&self, error: UngradedError) -> UngradedError {
        if self.is_running() {
            error
        } else {
            UngradedError::Cancelled
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_shutdown_cancels() {
        let shutdown = GracefulShutdown::new_for_test();
        assert!(shutdown.is_running());
        assert!(shutdown.check_shutdown().is_ok());

        shutdown.request_shutdown();
        assert!(!shutdown.is_running());
        assert!(matches!(shutdown.check_shutdown(), Err(UngradedError::Cancelled)));

        // repeated requests stay cancelled
        shutdown.request_shutdown();
        assert!(!shutdown.is_running());
    }

    #[test]
    fn test_errors_after_shutdown_become_cancellation() {
        let shutdown = GracefulShutdown::new_for_test();
        let failure = || UngradedError::Decryption {
            path: "course.json.gpg".to_string(),
            message: "killed".to_string(),
        };

        assert!(matches!(shutdown.map_error(failure()), UngradedError::Decryption { .. }));

        shutdown.request_shutdown();
        assert!(matches!(shutdown.map_error(failure()), UngradedError::Cancelled));
    }
}
