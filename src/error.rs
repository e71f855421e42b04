//! Error types for bottleneck surveys
//!
//! Every variant is a programming error: nothing here is retried or swallowed
//! by the engine itself. The one exception is implicit disposal from `Drop`,
//! which logs and moves on because a destructor cannot report failure.

use thiserror::Error;

/// Errors raised by bottleneck definitions, accessors and surveyors
#[derive(Error, Debug)]
pub enum SurveyError {
    /// Two access records of different bottlenecks were combined
    #[error("cannot combine accesses of different bottlenecks: expected '{expected}', found '{found}'")]
    BottleneckMismatch { expected: String, found: String },

    /// An allow or block pattern failed to compile
    #[error("invalid filter pattern for {key}: {source}")]
    InvalidPattern {
        key: String,
        #[source]
        source: regex::Error,
    },

    /// A time window surveyor was given a zero-length period
    #[error("time window period must be greater than zero")]
    InvalidWindowPeriod,

    /// Bottleneck limit was negative or not a number
    #[error("bottleneck limit must be a non-negative number, got {0}")]
    LimitOutOfRange(f64),

    /// Usage was reported on an access that has already been disposed
    #[error("access to bottleneck '{bottleneck}' is already closed")]
    AccessClosed { bottleneck: String },

    /// A call-context surveyor was disposed while a newer one was still active
    #[error("call context surveyor '{scope}' disposed out of order: '{top}' is still active")]
    OutOfOrderDisposal { scope: String, top: String },

    /// Settings file could not be read or parsed
    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type for survey operations
pub type Result<T> = std::result::Result<T, SurveyError>;
