//! `tracing` subscriber setup.
//!
//! Diagnostics go to stderr so that stdout stays clean for `--output-format
//! json`. `RUST_LOG`, when set, replaces the level chosen here entirely.

use std::env;
use std::sync::Once;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

pub const LOG_LEVEL_ENV: &str = "UNGRADED_LOG";

#[derive(Debug, Clone, Default)]
pub struct LoggingOptions {
    pub log_level: Option<String>,
    pub verbose: u8,
    pub quiet: bool,
}

impl LoggingOptions {
    /// Explicit `--log-level` first, then `-q`/`-v`, then `UNGRADED_LOG`.
    pub fn resolve_level(&self) -> Level {
        if let Some(level_str) = &self.log_level {
            parse_level(level_str)
        } else if self.quiet {
            Level::ERROR
        } else if self.verbose >= 2 {
            Level::DEBUG
        } else if self.verbose == 1 {
            Level::INFO
        } else {
            env::var(LOG_LEVEL_ENV)
                .map(|level_str| parse_level(&level_str))
                .unwrap_or(Level::WARN)
        }
    }
}

pub fn init_logging(options: &LoggingOptions) {
    INIT.call_once(|| {
        let level = options.resolve_level();
        let mut filter = EnvFilter::from_default_env();

        if env::var("RUST_LOG").is_err() {
            if let Ok(directive) = format!("ungraded={}", level).parse() {
                filter = filter.add_directive(directive);
            }
        }

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    });
}

pub fn parse_level(level_str: &str) -> Level {
    match level_str.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => {
            eprintln!(
                "Invalid log level '{}', defaulting to WARN. Valid levels: trace, debug, info, warn, error",
                level_str
            );
            Level::WARN
        }
    }
}
