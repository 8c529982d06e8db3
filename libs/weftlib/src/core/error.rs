//! Error types for weftlib
//!
//! Defines the core error types used throughout weftlib. Synthesis
//! failures carry a human-readable message and, where possible, the
//! hierarchical path of the offending object.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SynthError {
    /// A synthesis failure attributed to a specific object in the design
    /// hierarchy. This is the workhorse variant: routing failures, field
    /// mismatches, backpressure incompatibilities, missing clocks and
    /// resets all surface here.
    #[error("{path}: {msg}")]
    Synth { path: String, msg: String },

    /// A synthesis failure with no single offending object.
    #[error("{0}")]
    General(String),

    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The latency solver was asked to solve but no MILP backend was
    /// compiled in (the `coin_cbc` feature is disabled).
    #[error("no MILP solver backend available")]
    NoSolverBackend,

    #[error("MILP solve failed: {0}")]
    SolverFailure(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SynthError {
    /// Failure attributed to the object at `path`.
    pub fn synth(path: impl Into<String>, msg: impl Into<String>) -> Self {
        SynthError::Synth {
            path: path.into(),
            msg: msg.into(),
        }
    }

    pub fn general(msg: impl Into<String>) -> Self {
        SynthError::General(msg.into())
    }
}

/// Result type that uses SynthError
pub type Result<T> = std::result::Result<T, SynthError>;
