//! Audit trail recorder.
//!
//! # Responsibility
//! - Append one event row per successful mutation, on the caller's
//!   transaction so the event commits or rolls back with the mutation.
//! - Read the trail back for one issue.
//!
//! # Invariants
//! - Events are insert-only; the schema rejects UPDATE and DELETE.
//! - Events for one issue are returned in insertion order.

use crate::model::event::{Event, EventType};
use crate::repo::error::{StoreError, StoreResult};
use rusqlite::{params, Connection, Row};

/// Event fields supplied by the writer; id and timestamp come from SQLite.
#[derive(Debug, Clone, Copy)]
pub(crate) struct NewEvent<'a> {
    pub issue_id: &'a str,
    pub event_type: EventType,
    pub actor: &'a str,
    pub old_value: Option<&'a str>,
    pub new_value: Option<&'a str>,
    pub comment: Option<&'a str>,
}

/// Appends an event and returns its row id.
///
/// Must be called with the connection borrowed from an open transaction.
pub(crate) fn record_event(conn: &Connection, event: &NewEvent<'_>) -> StoreResult<i64> {
    conn.execute(
        "INSERT INTO events (issue_id, event_type, actor, old_value, new_value, comment)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
        params![
            event.issue_id,
            event.event_type.as_str(),
            event.actor,
            event.old_value,
            event.new_value,
            event.comment,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub(crate) fn list_events(conn: &Connection, issue_id: &str) -> StoreResult<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT id, issue_id, event_type, actor, old_value, new_value, comment, created_at
         FROM events
         WHERE issue_id = ?1
         ORDER BY id ASC;",
    )?;
    let mut rows = stmt.query([issue_id])?;
    let mut events = Vec::new();
    while let Some(row) = rows.next()? {
        events.push(parse_event_row(row)?);
    }
    Ok(events)
}

fn parse_event_row(row: &Row<'_>) -> StoreResult<Event> {
    let type_text: String = row.get("event_type")?;
    let event_type = EventType::parse(&type_text).ok_or_else(|| {
        StoreError::InvalidData(format!("invalid event type `{type_text}` in events.event_type"))
    })?;

    Ok(Event {
        id: row.get("id")?,
        issue_id: row.get("issue_id")?,
        event_type,
        actor: row.get("actor")?,
        old_value: row.get("old_value")?,
        new_value: row.get("new_value")?,
        comment: row.get("comment")?,
        created_at: row.get("created_at")?,
    })
}
