// Copyright (c) AlphaVelocity.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use thiserror::Error;

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Domain error taxonomy for the ledger engine. Command handlers convert
/// these into user-facing messages; `Invariant` deliberately carries only an
/// opaque reference, the real cause goes to the log.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    StaleHandle(String),

    #[error("internal inconsistency detected [ref: {reference}]; the operation was rolled back")]
    Invariant { reference: String },

    #[error(transparent)]
    Db(#[from] rusqlite::Error),
}

impl LedgerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        LedgerError::Validation(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        LedgerError::NotFound(what.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        LedgerError::Conflict(msg.into())
    }

    pub fn stale(msg: impl Into<String>) -> Self {
        LedgerError::StaleHandle(msg.into())
    }

    /// Records the real cause in the log and hands the caller a short
    /// reference token instead of internal detail.
    pub fn invariant(context: &str, cause: impl std::fmt::Display) -> Self {
        let reference = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
        tracing::error!(context, cause = %cause, reference = %reference, "invariant violation");
        LedgerError::Invariant { reference }
    }

    /// Translates a unique-constraint failure into the given domain conflict;
    /// every other storage error passes through untouched.
    pub fn on_unique(err: rusqlite::Error, conflict: &str) -> Self {
        if is_unique_violation(&err) {
            LedgerError::Conflict(conflict.to_string())
        } else {
            LedgerError::Db(err)
        }
    }
}

pub fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}
