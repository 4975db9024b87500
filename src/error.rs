//! Crate-wide structured errors.
//!
//! Construction-time preconditions (malformed IR requested by a caller) are
//! programmer bugs and are enforced by `assert!`/`debug_assert!` in
//! [`crate::builder`], never surfaced here. `MidError` covers the handful of
//! genuinely recoverable boundaries: textual IR round-tripping and pass
//! execution reporting an unrecoverable inconsistency.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MidError {
    #[error("pass {pass} reported an unrecoverable inconsistency: {reason}")]
    PassFailed { pass: &'static str, reason: String },

    #[error("malformed IR text at line {line}: {reason}")]
    ParseError { line: usize, reason: String },

    #[error("unknown pass name: {0}")]
    UnknownPass(String),
}

pub type MidResult<T> = Result<T, MidError>;
