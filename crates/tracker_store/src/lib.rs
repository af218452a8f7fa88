//! Storage engine for the issue tracker.
//!
//! Issues live in SQLite next to an append-only audit trail. Every
//! mutation and its audit event commit together or not at all.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod search;

pub use config::StoreOptions;
pub use logging::{default_log_level, init_logging, logging_status, LoggingConfig, LoggingError};
pub use model::event::{
    decode_payload, AuditPayload, Event, EventType, PayloadError, PAYLOAD_VERSION,
};
pub use model::issue::{Issue, IssueId, IssueType, IssueValidationError, Status};
pub use model::update::{parse_updates, IssueUpdate, UPDATABLE_FIELDS};
pub use repo::context::OpContext;
pub use repo::error::{StoreError, StoreResult, TxState};
pub use repo::issue_repo::{IssueStore, SqliteIssueStore};
pub use search::filter::{search_issues, IssueFilter};
