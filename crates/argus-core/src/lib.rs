//! Argus Core -- analysis orchestration, configuration, result caching and
//! tracing setup.
//!
//! Most callers only need [`Analyzer`] (or the [`analyze`] shortcut that uses
//! the embedded catalog):
//!
//! ```
//! let result = argus_core::analyze("eval(request.args.get('x'))", "python");
//! assert!(result.vulnerable);
//! ```

pub mod cache;
pub mod config;
pub mod engine;

pub use cache::AnalysisCache;
pub use config::{load_config, ArgusConfig, CacheConfig, CatalogConfig};
pub use engine::{analyze, Analyzer};

pub use argus_analysis::{AnalysisResult, DetectionMethod, Finding, SimilarityProvider};
pub use argus_rules::{Language, PatternCategory, Severity};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Top-level error type for the argus-core crate.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// A configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// The pattern catalog failed to load or compile.
    #[error("catalog error: {0}")]
    Catalog(#[from] argus_rules::RuleError),

    /// Tracing/logging initialization failed.
    #[error("tracing initialization error: {0}")]
    TracingInit(String),
}

/// Convenience alias for `Result<T, CoreError>`.
pub type CoreResult<T> = Result<T, CoreError>;

// ---------------------------------------------------------------------------
// Tracing / Logging
// ---------------------------------------------------------------------------

/// Initialize structured tracing with the given verbosity level.
///
/// | `verbose` | `quiet` | `json_output` | Effect                           |
/// |-----------|---------|---------------|----------------------------------|
/// | `true`    | _       | _             | TRACE level                      |
/// | _         | `true`  | _             | ERROR level only                 |
/// | `false`   | `false` | _             | INFO level (default)             |
/// | _         | _       | `true`        | JSON-formatted log lines         |
/// | _         | _       | `false`       | Human-readable, compact lines    |
///
/// `RUST_LOG`, when set, takes precedence over the level chosen here.
///
/// # Errors
///
/// Returns [`CoreError::TracingInit`] if a global subscriber is already set.
pub fn init_tracing(verbose: bool, quiet: bool, json_output: bool) -> Result<(), CoreError> {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_level = if verbose {
        "trace"
    } else if quiet {
        "error"
    } else {
        "info"
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if json_output {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .try_init()
            .map_err(|e| CoreError::TracingInit(e.to_string()))
    } else {
        fmt()
            .compact()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .try_init()
            .map_err(|e| CoreError::TracingInit(e.to_string()))
    }
}
