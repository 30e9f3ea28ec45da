//! Crate-wide error taxonomy for the reconnaissance engine.
//!
//! One variant per kind in the error taxonomy; callers that need to branch on
//! kind match on `EngineError` directly, everyone else just propagates it
//! with `?` behind `anyhow::Result`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Missing option, missing API key, or an unparseable rule document.
    #[error("config error in module '{module}': {message}")]
    Config { module: String, message: String },

    /// Type/range/emptiness violation on event fields, rule vocabulary, or hash format.
    #[error("validation error: {0}")]
    Validation(String),

    /// Upstream HTTP/DNS/TCP failure surfaced by a module.
    #[error("network error: {0}")]
    Network(String),

    /// Provider 429 / quota / throttle.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Sandbox wall-clock limit exceeded.
    #[error("timeout after {elapsed_secs:.3}s (limit {limit_secs:.3}s)")]
    Timeout { elapsed_secs: f64, limit_secs: f64 },

    /// An event/error/HTTP counter exceeded its configured limit.
    #[error("resource limit exceeded: {0}")]
    ResourceExceeded(String),

    /// Lower-level datastore failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// The dependency resolver detected a cycle; the scan refuses to start.
    #[error("circular dependency among modules: {0:?}")]
    CircularDependency(Vec<String>),

    /// Export registry miss.
    #[error("unknown export format: {0}")]
    UnknownFormat(String),

    /// Catch-all for unexpected failures bubbling up through component boundaries.
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
