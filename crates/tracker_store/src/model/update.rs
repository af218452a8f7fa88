//! Typed partial updates for existing issues.
//!
//! # Responsibility
//! - Represent each updatable field as its own variant so illegal field
//!   names cannot be constructed in code.
//! - Parse string-keyed updates from upstream layers through the allow-list.
//! - Validate update values before any storage work.
//!
//! # Invariants
//! - Only fields listed in [`UPDATABLE_FIELDS`] can be changed; `id`,
//!   timestamps and `closed_at` are owned by the store.
//! - A validated update set names each field at most once.

use crate::model::event::EventType;
use crate::model::issue::{
    validate_estimate, validate_priority, validate_title, IssueType, IssueValidationError, Status,
};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};

/// Field names accepted by [`IssueUpdate::from_field`].
pub const UPDATABLE_FIELDS: &[&str] = &[
    "title",
    "description",
    "design",
    "acceptance_criteria",
    "notes",
    "status",
    "priority",
    "issue_type",
    "assignee",
    "estimated_minutes",
    "approved_at",
    "approved_by",
];

/// One field change applied by `update_issue`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssueUpdate {
    Title(String),
    Description(String),
    Design(String),
    AcceptanceCriteria(String),
    Notes(String),
    Status(Status),
    Priority(i32),
    IssueType(IssueType),
    /// `None` clears the assignee.
    Assignee(Option<String>),
    EstimatedMinutes(Option<i64>),
    ApprovedAt(Option<i64>),
    ApprovedBy(Option<String>),
}

impl IssueUpdate {
    /// Storage/wire name of the changed field.
    pub fn field(&self) -> &'static str {
        match self {
            Self::Title(_) => "title",
            Self::Description(_) => "description",
            Self::Design(_) => "design",
            Self::AcceptanceCriteria(_) => "acceptance_criteria",
            Self::Notes(_) => "notes",
            Self::Status(_) => "status",
            Self::Priority(_) => "priority",
            Self::IssueType(_) => "issue_type",
            Self::Assignee(_) => "assignee",
            Self::EstimatedMinutes(_) => "estimated_minutes",
            Self::ApprovedAt(_) => "approved_at",
            Self::ApprovedBy(_) => "approved_by",
        }
    }

    /// Builds an update from a field name and JSON value.
    ///
    /// # Errors
    /// - `UnknownField` when `name` is outside the allow-list.
    /// - `InvalidStatus`/`InvalidIssueType` for unknown enum values.
    /// - `InvalidFieldValue` when the JSON shape does not fit the field.
    pub fn from_field(name: &str, value: &Value) -> Result<Self, IssueValidationError> {
        let update = match name {
            "title" => Self::Title(expect_string("title", value)?),
            "description" => Self::Description(expect_string("description", value)?),
            "design" => Self::Design(expect_string("design", value)?),
            "acceptance_criteria" => {
                Self::AcceptanceCriteria(expect_string("acceptance_criteria", value)?)
            }
            "notes" => Self::Notes(expect_string("notes", value)?),
            "status" => {
                let raw = expect_string("status", value)?;
                Self::Status(Status::parse(&raw).ok_or(IssueValidationError::InvalidStatus(raw))?)
            }
            "priority" => {
                let raw = expect_integer("priority", value)?;
                let priority = i32::try_from(raw)
                    .map_err(|_| IssueValidationError::PriorityOutOfRange(raw))?;
                Self::Priority(priority)
            }
            "issue_type" => {
                let raw = expect_string("issue_type", value)?;
                Self::IssueType(
                    IssueType::parse(&raw).ok_or(IssueValidationError::InvalidIssueType(raw))?,
                )
            }
            "assignee" => Self::Assignee(expect_optional_string("assignee", value)?),
            "estimated_minutes" => {
                Self::EstimatedMinutes(expect_optional_integer("estimated_minutes", value)?)
            }
            "approved_at" => Self::ApprovedAt(expect_optional_integer("approved_at", value)?),
            "approved_by" => Self::ApprovedBy(expect_optional_string("approved_by", value)?),
            other => return Err(IssueValidationError::UnknownField(other.to_string())),
        };
        Ok(update)
    }

    /// Checks the value against the field's rule.
    pub fn validate(&self) -> Result<(), IssueValidationError> {
        match self {
            Self::Title(title) => validate_title(title),
            Self::Priority(priority) => validate_priority(i64::from(*priority)),
            Self::EstimatedMinutes(Some(minutes)) => validate_estimate(*minutes),
            _ => Ok(()),
        }
    }

    /// JSON form recorded in the audit change set.
    pub fn json_value(&self) -> Value {
        match self {
            Self::Title(value)
            | Self::Description(value)
            | Self::Design(value)
            | Self::AcceptanceCriteria(value)
            | Self::Notes(value) => Value::from(value.as_str()),
            Self::Status(status) => Value::from(status.as_str()),
            Self::Priority(priority) => Value::from(*priority),
            Self::IssueType(kind) => Value::from(kind.as_str()),
            Self::Assignee(value) | Self::ApprovedBy(value) => {
                value.as_deref().map_or(Value::Null, Value::from)
            }
            Self::EstimatedMinutes(value) | Self::ApprovedAt(value) => {
                value.map_or(Value::Null, Value::from)
            }
        }
    }
}

/// Parses a string-keyed update map through the allow-list.
///
/// Fails on the first unknown field or malformed value; nothing is applied.
pub fn parse_updates(
    fields: &Map<String, Value>,
) -> Result<Vec<IssueUpdate>, IssueValidationError> {
    fields
        .iter()
        .map(|(name, value)| IssueUpdate::from_field(name, value))
        .collect()
}

/// Validates every update and rejects repeated fields.
pub fn validate_updates(updates: &[IssueUpdate]) -> Result<(), IssueValidationError> {
    let mut seen = HashSet::new();
    for update in updates {
        if !seen.insert(update.field()) {
            return Err(IssueValidationError::DuplicateField(update.field()));
        }
        update.validate()?;
    }
    Ok(())
}

/// Raw change set recorded as the event's `new_value`.
pub fn change_set(updates: &[IssueUpdate]) -> BTreeMap<String, Value> {
    updates
        .iter()
        .map(|update| (update.field().to_string(), update.json_value()))
        .collect()
}

/// Event type implied by the update content.
///
/// Closing via status wins over a plain status change, which wins over
/// any other field edit.
pub fn event_type_for(updates: &[IssueUpdate]) -> EventType {
    let status = updates.iter().find_map(|update| match update {
        IssueUpdate::Status(status) => Some(*status),
        _ => None,
    });
    match status {
        Some(Status::Closed) => EventType::Closed,
        Some(_) => EventType::StatusChanged,
        None => EventType::Updated,
    }
}

fn expect_string(field: &'static str, value: &Value) -> Result<String, IssueValidationError> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or(IssueValidationError::InvalidFieldValue {
            field,
            expected: "a string",
        })
}

fn expect_optional_string(
    field: &'static str,
    value: &Value,
) -> Result<Option<String>, IssueValidationError> {
    match value {
        Value::Null => Ok(None),
        Value::String(text) => Ok(Some(text.clone())),
        _ => Err(IssueValidationError::InvalidFieldValue {
            field,
            expected: "a string or null",
        }),
    }
}

fn expect_integer(field: &'static str, value: &Value) -> Result<i64, IssueValidationError> {
    value.as_i64().ok_or(IssueValidationError::InvalidFieldValue {
        field,
        expected: "an integer",
    })
}

fn expect_optional_integer(
    field: &'static str,
    value: &Value,
) -> Result<Option<i64>, IssueValidationError> {
    match value {
        Value::Null => Ok(None),
        other => other
            .as_i64()
            .map(Some)
            .ok_or(IssueValidationError::InvalidFieldValue {
                field,
                expected: "an integer or null",
            }),
    }
}
