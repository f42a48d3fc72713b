//! Structured logging for Confab sessions
//!
//! # Features
//!
//! - **JSONL Output**: structured JSON lines for log aggregation (default)
//! - **Pretty Console**: human-readable output for development
//! - **Peer Context**: spans tagged with the local peer they belong to
//! - **File Rotation**: daily/hourly log rotation via tracing-appender
//!
//! # Quick Start
//!
//! ```ignore
//! use confab_logging::{ConfabSubscriberBuilder, LogConfig};
//!
//! // JSONL to console
//! ConfabSubscriberBuilder::new().init();
//!
//! // Pretty console output while developing
//! ConfabSubscriberBuilder::new()
//!     .with_config(LogConfig::development())
//!     .init();
//! ```
//!
//! # Peer Context
//!
//! ```ignore
//! use confab_logging::PeerContextGuard;
//!
//! let _guard = PeerContextGuard::new(session.local_identity());
//! let span = tracing::info_span!("session");
//! ```

pub mod config;
pub mod context;
pub mod layers;

pub use config::{ConsoleConfig, FileConfig, FilterConfig, JsonlConfig, LogConfig, RotationStrategy};
pub use context::{PeerContextData, PeerContextGuard};
pub use layers::{PeerContextLayer, event_peer_context};
pub use tracing_appender::non_blocking::WorkerGuard;

use std::fs::{self, File};

use thiserror::Error;
use tracing_appender::non_blocking::NonBlocking;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::Layered;
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

/// Errors setting up logging
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("log file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("log appender error: {0}")]
    Appender(String),

    #[error("log config format error: {0}")]
    Format(#[from] serde_json::Error),

    #[error("invalid filter: {0}")]
    Filter(String),

    #[error("subscriber already set: {0}")]
    AlreadyInitialized(String),
}

/// Subscriber stack the output layers sit on
type BaseSubscriber = Layered<PeerContextLayer, Layered<EnvFilter, Registry>>;

/// Builder for configuring and initializing the Confab logging subscriber
///
/// Console output is JSONL by default; `LogConfig::development()` switches
/// to pretty output. File output is always JSONL.
pub struct ConfabSubscriberBuilder {
    config: LogConfig,
}

impl ConfabSubscriberBuilder {
    /// Create a builder with the default configuration
    pub fn new() -> Self {
        Self {
            config: LogConfig::default(),
        }
    }

    /// Use a specific configuration
    pub fn with_config(mut self, config: LogConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the default log level
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.config.default_level = level.into();
        self
    }

    /// Enable or disable console output
    pub fn with_console(mut self, enabled: bool) -> Self {
        self.config.console.enabled = enabled;
        self
    }

    /// Configure file output
    pub fn with_file_output(mut self, config: FileConfig) -> Self {
        self.config.file = Some(config);
        self
    }

    /// The configuration that will be applied
    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// Install the subscriber globally
    ///
    /// Returns the file writer guard when file output is enabled; keep it
    /// alive for the life of the program so buffered lines are flushed.
    pub fn try_init(self) -> Result<Option<WorkerGuard>, LoggingError> {
        let env_filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => EnvFilter::try_new(self.config.filter_directives())
                .map_err(|e| LoggingError::Filter(e.to_string()))?,
        };

        let mut outputs: Vec<layers::BoxedLayer<BaseSubscriber>> = Vec::new();
        let mut guard = None;

        if self.config.console.enabled {
            outputs.push(layers::console_layer(
                &self.config.console,
                &self.config.jsonl,
            ));
        }

        if let Some(file_config) = &self.config.file {
            let (writer, file_guard) = file_writer(file_config)?;
            outputs.push(layers::jsonl_layer(writer, &self.config.jsonl));
            guard = Some(file_guard);
        }

        Registry::default()
            .with(env_filter)
            .with(PeerContextLayer::new())
            .with(outputs)
            .try_init()
            .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;

        Ok(guard)
    }

    /// Install the subscriber globally, reporting failures on stderr
    pub fn init(self) -> Option<WorkerGuard> {
        match self.try_init() {
            Ok(guard) => guard,
            Err(e) => {
                eprintln!("Warning: logging not initialized: {}", e);
                None
            }
        }
    }
}

impl Default for ConfabSubscriberBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Non-blocking writer for file output
fn file_writer(config: &FileConfig) -> Result<(NonBlocking, WorkerGuard), LoggingError> {
    fs::create_dir_all(&config.directory)?;

    let rotation = match config.rotation {
        RotationStrategy::Never => {
            let path = config.directory.join(format!("{}.log", config.prefix));
            return Ok(tracing_appender::non_blocking(File::create(path)?));
        }
        RotationStrategy::Daily => Rotation::DAILY,
        RotationStrategy::Hourly => Rotation::HOURLY,
    };

    let mut builder = RollingFileAppender::builder()
        .rotation(rotation)
        .filename_prefix(&config.prefix)
        .filename_suffix("log");
    if let Some(max_files) = config.max_files {
        builder = builder.max_log_files(max_files);
    }
    let appender = builder
        .build(&config.directory)
        .map_err(|e| LoggingError::Appender(e.to_string()))?;

    Ok(tracing_appender::non_blocking(appender))
}

/// Initialize logging with default settings (JSONL to console)
pub fn init_default() -> Option<WorkerGuard> {
    ConfabSubscriberBuilder::new().init()
}

/// Initialize logging for development (verbose, pretty console output)
pub fn init_development() -> Option<WorkerGuard> {
    ConfabSubscriberBuilder::new()
        .with_config(LogConfig::development())
        .init()
}

/// Initialize logging for tests
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_testing() {
    let _ = ConfabSubscriberBuilder::new()
        .with_config(LogConfig::testing())
        .try_init();
}
