//! Issue domain model.
//!
//! # Responsibility
//! - Define the current-state issue record and its status/type enums.
//! - Provide whole-issue validation run before any write.
//! - Parse `<prefix>-<number>` identifiers.
//!
//! # Invariants
//! - `id` is empty only before the store assigns one.
//! - `title` is 1..=500 characters; `priority` is 0..=4.
//! - `estimated_minutes`, when set, is non-negative.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Issue identifier in `<prefix>-<positive integer>` form.
pub type IssueId = String;

pub const TITLE_MAX_CHARS: usize = 500;
pub const PRIORITY_MIN: i32 = 0;
pub const PRIORITY_MAX: i32 = 4;
pub const DEFAULT_PRIORITY: i32 = 2;

static ISSUE_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z0-9_]+)-([1-9][0-9]*)$").expect("valid issue id regex"));
static ID_PREFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("valid id prefix regex"));

/// Workflow state of an issue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    Open,
    InProgress,
    Blocked,
    Closed,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::Blocked => "blocked",
            Self::Closed => "closed",
        }
    }

    /// Parses the storage/wire form. Returns `None` for unknown values.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "open" => Some(Self::Open),
            "in_progress" => Some(Self::InProgress),
            "blocked" => Some(Self::Blocked),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }

    pub fn is_valid(value: &str) -> bool {
        Self::parse(value).is_some()
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of work an issue tracks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    Bug,
    Feature,
    #[default]
    Task,
    Epic,
    Chore,
}

impl IssueType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bug => "bug",
            Self::Feature => "feature",
            Self::Task => "task",
            Self::Epic => "epic",
            Self::Chore => "chore",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "bug" => Some(Self::Bug),
            "feature" => Some(Self::Feature),
            "task" => Some(Self::Task),
            "epic" => Some(Self::Epic),
            "chore" => Some(Self::Chore),
            _ => None,
        }
    }

    pub fn is_valid(value: &str) -> bool {
        Self::parse(value).is_some()
    }
}

impl Display for IssueType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validation failure for issue data or a partial update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssueValidationError {
    /// Identifier does not match `<prefix>-<positive integer>`.
    InvalidId(String),
    /// Title is empty or longer than [`TITLE_MAX_CHARS`].
    TitleLength { chars: usize },
    PriorityOutOfRange(i64),
    NegativeEstimate(i64),
    InvalidStatus(String),
    InvalidIssueType(String),
    /// Field name is not in the update allow-list.
    UnknownField(String),
    /// Field value has the wrong JSON shape.
    InvalidFieldValue {
        field: &'static str,
        expected: &'static str,
    },
    /// Same field given twice in one update set.
    DuplicateField(&'static str),
}

impl Display for IssueValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidId(id) => write!(
                f,
                "invalid issue id `{id}`: expected `<prefix>-<positive integer>`"
            ),
            Self::TitleLength { chars } => write!(
                f,
                "title must be 1-{TITLE_MAX_CHARS} characters (got {chars})"
            ),
            Self::PriorityOutOfRange(value) => write!(
                f,
                "priority must be between {PRIORITY_MIN} and {PRIORITY_MAX} (got {value})"
            ),
            Self::NegativeEstimate(value) => {
                write!(f, "estimated_minutes cannot be negative (got {value})")
            }
            Self::InvalidStatus(value) => write!(f, "invalid status: {value}"),
            Self::InvalidIssueType(value) => write!(f, "invalid issue type: {value}"),
            Self::UnknownField(name) => write!(f, "invalid field for update: {name}"),
            Self::InvalidFieldValue { field, expected } => {
                write!(f, "field `{field}` expects {expected}")
            }
            Self::DuplicateField(name) => write!(f, "field `{name}` updated more than once"),
        }
    }
}

impl Error for IssueValidationError {}

/// Current-state issue record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    /// Empty until assigned by the store on create.
    pub id: IssueId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub design: String,
    #[serde(default)]
    pub acceptance_criteria: String,
    #[serde(default)]
    pub notes: String,
    pub status: Status,
    pub priority: i32,
    pub issue_type: IssueType,
    #[serde(default)]
    pub assignee: Option<String>,
    #[serde(default)]
    pub estimated_minutes: Option<i64>,
    /// Unix epoch milliseconds, assigned by the store.
    pub created_at: i64,
    /// Unix epoch milliseconds, refreshed on every mutation.
    pub updated_at: i64,
    #[serde(default)]
    pub closed_at: Option<i64>,
    #[serde(default)]
    pub approved_at: Option<i64>,
    #[serde(default)]
    pub approved_by: Option<String>,
}

impl Issue {
    /// Creates an open task with default priority and no id yet.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: IssueId::new(),
            title: title.into(),
            description: String::new(),
            design: String::new(),
            acceptance_criteria: String::new(),
            notes: String::new(),
            status: Status::Open,
            priority: DEFAULT_PRIORITY,
            issue_type: IssueType::Task,
            assignee: None,
            estimated_minutes: None,
            created_at: 0,
            updated_at: 0,
            closed_at: None,
            approved_at: None,
            approved_by: None,
        }
    }

    /// Creates an issue with a caller-chosen identifier.
    ///
    /// Used by import paths where the id already exists elsewhere.
    pub fn with_id(
        id: impl Into<IssueId>,
        title: impl Into<String>,
    ) -> Result<Self, IssueValidationError> {
        let id = id.into();
        if parse_issue_id(&id).is_none() {
            return Err(IssueValidationError::InvalidId(id));
        }
        let mut issue = Self::new(title);
        issue.id = id;
        Ok(issue)
    }

    pub fn has_id(&self) -> bool {
        !self.id.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.status == Status::Closed
    }

    /// Checks every field rule that does not depend on stored state.
    pub fn validate(&self) -> Result<(), IssueValidationError> {
        if self.has_id() && parse_issue_id(&self.id).is_none() {
            return Err(IssueValidationError::InvalidId(self.id.clone()));
        }
        validate_title(&self.title)?;
        validate_priority(i64::from(self.priority))?;
        if let Some(minutes) = self.estimated_minutes {
            validate_estimate(minutes)?;
        }
        Ok(())
    }
}

/// Splits `<prefix>-<number>` into its parts.
///
/// Returns `None` when the value is malformed or the number overflows `u64`.
pub fn parse_issue_id(id: &str) -> Option<(&str, u64)> {
    let captures = ISSUE_ID_RE.captures(id)?;
    let prefix = captures.get(1)?.as_str();
    let number = captures.get(2)?.as_str().parse::<u64>().ok()?;
    Some((prefix, number))
}

/// Returns whether `prefix` may be used in front of issue numbers.
pub fn is_valid_id_prefix(prefix: &str) -> bool {
    ID_PREFIX_RE.is_match(prefix)
}

pub(crate) fn validate_title(title: &str) -> Result<(), IssueValidationError> {
    let chars = title.chars().count();
    if chars == 0 || chars > TITLE_MAX_CHARS {
        return Err(IssueValidationError::TitleLength { chars });
    }
    Ok(())
}

pub(crate) fn validate_priority(priority: i64) -> Result<(), IssueValidationError> {
    if priority < i64::from(PRIORITY_MIN) || priority > i64::from(PRIORITY_MAX) {
        return Err(IssueValidationError::PriorityOutOfRange(priority));
    }
    Ok(())
}

pub(crate) fn validate_estimate(minutes: i64) -> Result<(), IssueValidationError> {
    if minutes < 0 {
        return Err(IssueValidationError::NegativeEstimate(minutes));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{is_valid_id_prefix, parse_issue_id, Issue, IssueValidationError, Status};

    #[test]
    fn parse_issue_id_splits_prefix_and_number() {
        assert_eq!(parse_issue_id("bd-42"), Some(("bd", 42)));
        assert_eq!(parse_issue_id("vc_core-7"), Some(("vc_core", 7)));
    }

    #[test]
    fn parse_issue_id_rejects_malformed_values() {
        for value in ["", "bd", "bd-", "bd-0", "bd-01", "-3", "bd-x1", "a-b-3", "bd-99999999999999999999999"] {
            assert_eq!(parse_issue_id(value), None, "{value} should not parse");
        }
    }

    #[test]
    fn prefix_validation_rejects_separator() {
        assert!(is_valid_id_prefix("bd"));
        assert!(!is_valid_id_prefix("bd-x"));
        assert!(!is_valid_id_prefix(""));
    }

    #[test]
    fn title_length_counts_characters_not_bytes() {
        let issue = Issue::new("é".repeat(500));
        assert!(issue.validate().is_ok());

        let issue = Issue::new("é".repeat(501));
        assert_eq!(
            issue.validate(),
            Err(IssueValidationError::TitleLength { chars: 501 })
        );
    }

    #[test]
    fn status_parse_matches_wire_form() {
        for status in [Status::Open, Status::InProgress, Status::Blocked, Status::Closed] {
            assert_eq!(Status::parse(status.as_str()), Some(status));
        }
        assert!(!Status::is_valid("done"));
    }
}
