//! aUSD Command Line Interface.
//!
//! Operator tooling around the state machine: configuration, the persisted
//! session, decimal amount handling and output formatting. The `ausd` binary
//! maps its subcommands onto these pieces.

pub mod config;
pub mod output;
pub mod session;
pub mod units;

pub use config::*;
pub use output::*;
pub use session::*;
pub use units::*;

use thiserror::Error;

// ═══════════════════════════════════════════════════════════════════════════════
// CLI APPLICATION
// ═══════════════════════════════════════════════════════════════════════════════

/// CLI Application state
#[derive(Debug)]
pub struct CliApp {
    /// Configuration
    config: CliConfig,
    /// Output formatter
    output: OutputFormatter,
    /// Verbose mode
    verbose: bool,
}

impl CliApp {
    /// Create new CLI application
    pub fn new(config: CliConfig) -> Self {
        let output = OutputFormatter::new(config.output);
        Self {
            config,
            output,
            verbose: false,
        }
    }

    /// Enable verbose output
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Set output format
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.output = OutputFormatter::new(format);
        self
    }

    /// Get configuration
    pub fn config(&self) -> &CliConfig {
        &self.config
    }

    /// Get output formatter
    pub fn output(&self) -> &OutputFormatter {
        &self.output
    }

    /// Check if verbose
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Initialize the protocol in the configured data directory
    pub fn init(&self, force: bool) -> CliResult<Session> {
        Session::create(&self.config, force)
    }

    /// Open the protocol in the configured data directory
    pub fn session(&self) -> CliResult<Session> {
        Session::open(&self.config.data_dir)
    }
}

impl Default for CliApp {
    fn default() -> Self {
        Self::new(CliConfig::default())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CLI RESULT
// ═══════════════════════════════════════════════════════════════════════════════

/// CLI Error types
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
    /// Invalid argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    /// Not found
    #[error("Not found: {0}")]
    NotFound(String),
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Protocol rejected the operation
    #[error(transparent)]
    Protocol(#[from] crate::error::Error),
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::Config(e.to_string())
    }
}

/// CLI Result type
pub type CliResult<T> = std::result::Result<T, CliError>;

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
