//! Audit event model and payload serialization contract.
//!
//! # Responsibility
//! - Define the append-only event record written beside every mutation.
//! - Own the versioned JSON envelope stored in `old_value`/`new_value`.
//!
//! # Invariants
//! - Payloads always carry a `version`; readers reject versions they do
//!   not know instead of guessing.
//! - Encoding never changes shape without bumping [`PAYLOAD_VERSION`].

use crate::model::issue::{Issue, IssueId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Current audit payload format version.
pub const PAYLOAD_VERSION: u32 = 1;

/// Kind of mutation an event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Created,
    Updated,
    StatusChanged,
    Closed,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::StatusChanged => "status_changed",
            Self::Closed => "closed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "created" => Some(Self::Created),
            "updated" => Some(Self::Updated),
            "status_changed" => Some(Self::StatusChanged),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

/// One immutable audit record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Surrogate row id; increases with insertion order.
    pub id: i64,
    pub issue_id: IssueId,
    pub event_type: EventType,
    pub actor: String,
    /// Encoded [`AuditPayload`], see [`decode_payload`].
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub comment: Option<String>,
    /// Insertion time in Unix epoch milliseconds.
    pub created_at: i64,
}

impl Event {
    pub fn decode_old_value(&self) -> Result<Option<AuditPayload>, PayloadError> {
        self.old_value.as_deref().map(decode_payload).transpose()
    }

    pub fn decode_new_value(&self) -> Result<Option<AuditPayload>, PayloadError> {
        self.new_value.as_deref().map(decode_payload).transpose()
    }
}

/// Body of an audit payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditPayload {
    /// Full issue state at one point in time.
    Snapshot { issue: Issue },
    /// Raw change set keyed by field name.
    Changes { changes: BTreeMap<String, Value> },
}

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    version: u32,
    #[serde(flatten)]
    payload: &'a AuditPayload,
}

/// Failure decoding a stored payload.
#[derive(Debug)]
pub enum PayloadError {
    UnsupportedVersion { found: u64, supported: u32 },
    Malformed(serde_json::Error),
}

impl Display for PayloadError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnsupportedVersion { found, supported } => write!(
                f,
                "audit payload version {found} is not supported (latest {supported})"
            ),
            Self::Malformed(err) => write!(f, "malformed audit payload: {err}"),
        }
    }
}

impl Error for PayloadError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Malformed(err) => Some(err),
            Self::UnsupportedVersion { .. } => None,
        }
    }
}

impl From<serde_json::Error> for PayloadError {
    fn from(value: serde_json::Error) -> Self {
        Self::Malformed(value)
    }
}

/// Encodes a payload inside the current version envelope.
pub fn encode_payload(payload: &AuditPayload) -> Result<String, serde_json::Error> {
    serde_json::to_string(&EnvelopeRef {
        version: PAYLOAD_VERSION,
        payload,
    })
}

/// Decodes a stored payload, rejecting missing or unknown versions.
pub fn decode_payload(text: &str) -> Result<AuditPayload, PayloadError> {
    let raw: Value = serde_json::from_str(text)?;
    let found = raw.get("version").and_then(Value::as_u64).unwrap_or(0);
    if found == 0 || found > u64::from(PAYLOAD_VERSION) {
        return Err(PayloadError::UnsupportedVersion {
            found,
            supported: PAYLOAD_VERSION,
        });
    }

    // Unknown kinds from a future version must report the version.
    Ok(serde_json::from_value(raw)?)
}
