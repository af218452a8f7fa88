//! Error taxonomy for issue store operations.
//!
//! # Invariants
//! - Validation errors are raised before any transaction opens.
//! - Storage and cancellation errors report whether a transaction was
//!   started and rolled back; persisted state is unchanged either way.

use crate::db::DbError;
use crate::model::event::PayloadError;
use crate::model::issue::{IssueId, IssueValidationError};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type StoreResult<T> = Result<T, StoreError>;

/// Where a failed operation stood relative to its transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    /// Failed before a transaction was opened (or the call was read-only).
    NotStarted,
    /// A transaction was opened and has been rolled back.
    RolledBack,
}

impl TxState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::RolledBack => "rolled_back",
        }
    }
}

#[derive(Debug)]
pub enum StoreError {
    Validation(IssueValidationError),
    /// Update/close target does not exist. Point lookups return `None`.
    NotFound(IssueId),
    Storage {
        state: TxState,
        source: rusqlite::Error,
    },
    /// Caller's context was cancelled or its deadline passed.
    Cancelled { state: TxState },
    /// Opening, migrating or adopting the database failed.
    Initialization(DbError),
    InvalidConfig(String),
    /// Persisted row or payload cannot be decoded.
    InvalidData(String),
    Serialization(serde_json::Error),
    LockPoisoned(&'static str),
}

impl StoreError {
    pub fn tx_state(&self) -> TxState {
        match self {
            Self::Storage { state, .. } | Self::Cancelled { state } => *state,
            _ => TxState::NotStarted,
        }
    }

    /// Short stable code used in log lines.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_failed",
            Self::NotFound(_) => "issue_not_found",
            Self::Storage { .. } => "storage_failed",
            Self::Cancelled { .. } => "cancelled",
            Self::Initialization(_) => "init_failed",
            Self::InvalidConfig(_) => "invalid_config",
            Self::InvalidData(_) => "invalid_data",
            Self::Serialization(_) => "serialization_failed",
            Self::LockPoisoned(_) => "lock_poisoned",
        }
    }

    /// Marks a storage/cancellation failure as having rolled back.
    pub(crate) fn rolled_back(self) -> Self {
        match self {
            Self::Storage { source, .. } => Self::Storage {
                state: TxState::RolledBack,
                source,
            },
            Self::Cancelled { .. } => Self::Cancelled {
                state: TxState::RolledBack,
            },
            other => other,
        }
    }
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "validation failed: {err}"),
            Self::NotFound(id) => write!(f, "issue {id} not found"),
            Self::Storage { state, source } => {
                write!(f, "storage failure ({}): {source}", state.as_str())
            }
            Self::Cancelled { state } => write!(f, "operation cancelled ({})", state.as_str()),
            Self::Initialization(err) => write!(f, "failed to initialize issue store: {err}"),
            Self::InvalidConfig(message) => write!(f, "invalid store options: {message}"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
            Self::Serialization(err) => write!(f, "failed to encode audit payload: {err}"),
            Self::LockPoisoned(what) => write!(f, "{what} lock poisoned by a panicked caller"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Storage { source, .. } => Some(source),
            Self::Initialization(err) => Some(err),
            Self::Serialization(err) => Some(err),
            _ => None,
        }
    }
}

impl From<IssueValidationError> for StoreError {
    fn from(value: IssueValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        if is_interrupt(&value) {
            return Self::Cancelled {
                state: TxState::NotStarted,
            };
        }
        Self::Storage {
            state: TxState::NotStarted,
            source: value,
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value)
    }
}

impl From<PayloadError> for StoreError {
    fn from(value: PayloadError) -> Self {
        Self::InvalidData(value.to_string())
    }
}

fn is_interrupt(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(inner, _)
            if inner.code == rusqlite::ErrorCode::OperationInterrupted
    )
}
