//! Issue store contract and SQLite implementation.
//!
//! # Responsibility
//! - Provide create/get/update/close/search over the `issues` table.
//! - Pair every mutation with exactly one audit event in one transaction.
//! - Allocate ids for issues created without one.
//!
//! # Invariants
//! - Validation runs before any transaction opens.
//! - A failed mutation leaves `issues` and `events` exactly as before.
//! - Issues are never deleted.
//! - Column names in generated SQL come from code, never from callers.

use crate::config::StoreOptions;
use crate::db::{ensure_schema_ready, open_db, open_db_in_memory};
use crate::model::event::{encode_payload, AuditPayload, Event, EventType};
use crate::model::issue::{Issue, IssueType, Status};
use crate::model::update::{
    change_set, event_type_for, parse_updates, validate_updates, IssueUpdate,
};
use crate::repo::audit::{list_events, record_event, NewEvent};
use crate::repo::context::{InterruptScope, OpContext};
use crate::repo::error::{StoreError, StoreResult, TxState};
use crate::repo::id_alloc::IdAllocator;
use crate::search::filter::{search_issues, IssueFilter};
use log::{error, info, warn};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row, Transaction, TransactionBehavior};
use serde_json::Map;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

pub(crate) const ISSUE_SELECT_SQL: &str = "SELECT
    id,
    title,
    description,
    design,
    acceptance_criteria,
    notes,
    status,
    priority,
    issue_type,
    assignee,
    estimated_minutes,
    created_at,
    updated_at,
    closed_at,
    approved_at,
    approved_by
FROM issues";

/// Capability surface consumed by the layer above storage.
pub trait IssueStore {
    /// Validates and inserts an issue, returning the stored record with
    /// its id and timestamps filled in.
    fn create_issue(&self, issue: &Issue, actor: &str) -> StoreResult<Issue>;
    /// Absent issues are `Ok(None)`, not an error.
    fn get_issue(&self, id: &str) -> StoreResult<Option<Issue>>;
    fn update_issue(&self, id: &str, updates: &[IssueUpdate], actor: &str) -> StoreResult<()>;
    fn close_issue(&self, id: &str, reason: &str, actor: &str) -> StoreResult<()>;
    fn search_issues(&self, query: &str, filter: &IssueFilter) -> StoreResult<Vec<Issue>>;

    /// String-keyed update for callers holding a field-name map.
    ///
    /// Every name must be in the update allow-list; otherwise nothing is
    /// written.
    fn update_issue_fields(
        &self,
        id: &str,
        fields: &Map<String, serde_json::Value>,
        actor: &str,
    ) -> StoreResult<()> {
        let updates = parse_updates(fields)?;
        self.update_issue(id, &updates, actor)
    }
}

/// SQLite-backed issue store, safe to share across threads.
pub struct SqliteIssueStore {
    conn: Mutex<Connection>,
    ids: IdAllocator,
}

impl SqliteIssueStore {
    /// Opens (or creates) the database file at `path`.
    ///
    /// Never returns a partially initialized store.
    pub fn open(path: impl AsRef<Path>, options: &StoreOptions) -> StoreResult<Self> {
        options.validate().map_err(StoreError::InvalidConfig)?;
        let conn = open_db(path, options.busy_timeout).map_err(StoreError::Initialization)?;
        Self::from_ready_connection(conn, options)
    }

    pub fn open_in_memory(options: &StoreOptions) -> StoreResult<Self> {
        options.validate().map_err(StoreError::InvalidConfig)?;
        let conn = open_db_in_memory().map_err(StoreError::Initialization)?;
        Self::from_ready_connection(conn, options)
    }

    /// Adopts a connection migrated elsewhere after checking its schema.
    pub fn from_connection(conn: Connection, options: &StoreOptions) -> StoreResult<Self> {
        options.validate().map_err(StoreError::InvalidConfig)?;
        ensure_schema_ready(&conn).map_err(StoreError::Initialization)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|err| StoreError::Initialization(err.into()))?;
        conn.busy_timeout(options.busy_timeout)
            .map_err(|err| StoreError::Initialization(err.into()))?;
        Self::from_ready_connection(conn, options)
    }

    fn from_ready_connection(conn: Connection, options: &StoreOptions) -> StoreResult<Self> {
        let ids = IdAllocator::load(&conn, &options.id_prefix).map_err(StoreError::Initialization)?;
        Ok(Self {
            conn: Mutex::new(conn),
            ids,
        })
    }

    pub fn id_prefix(&self) -> &str {
        self.ids.prefix()
    }

    /// [`IssueStore::create_issue`] honoring `ctx`.
    pub fn create_issue_with(
        &self,
        ctx: &OpContext,
        issue: &Issue,
        actor: &str,
    ) -> StoreResult<Issue> {
        let started_at = Instant::now();
        let mut assigned_id = None;
        let result = self.create_issue_inner(ctx, issue, actor, &mut assigned_id);
        let issue_id = assigned_id.as_deref().unwrap_or("-");
        log_outcome("issue_create", issue_id, started_at, &result);
        result
    }

    fn create_issue_inner(
        &self,
        ctx: &OpContext,
        issue: &Issue,
        actor: &str,
        assigned_id: &mut Option<String>,
    ) -> StoreResult<Issue> {
        issue.validate()?;
        ctx.check(TxState::NotStarted)?;

        let mut record = issue.clone();
        if record.has_id() {
            self.ids.observe(&record.id)?;
        } else {
            record.id = self.ids.allocate()?;
        }
        *assigned_id = Some(record.id.clone());

        let now = now_epoch_ms();
        record.created_at = now;
        record.updated_at = now;
        if record.is_closed() && record.closed_at.is_none() {
            record.closed_at = Some(now);
        }
        let snapshot = encode_payload(&AuditPayload::Snapshot {
            issue: record.clone(),
        })?;

        self.run_in_transaction(ctx, |tx| {
            insert_issue_row(tx, &record)?;
            record_event(
                tx,
                &NewEvent {
                    issue_id: &record.id,
                    event_type: EventType::Created,
                    actor,
                    old_value: None,
                    new_value: Some(&snapshot),
                    comment: None,
                },
            )?;
            Ok(())
        })?;

        Ok(record)
    }

    pub fn get_issue_with(&self, ctx: &OpContext, id: &str) -> StoreResult<Option<Issue>> {
        self.run_read(ctx, |conn| load_issue(conn, id))
    }

    /// [`IssueStore::update_issue`] honoring `ctx`.
    pub fn update_issue_with(
        &self,
        ctx: &OpContext,
        id: &str,
        updates: &[IssueUpdate],
        actor: &str,
    ) -> StoreResult<()> {
        let started_at = Instant::now();
        let result = self.update_issue_inner(ctx, id, updates, actor);
        log_outcome("issue_update", id, started_at, &result);
        result
    }

    fn update_issue_inner(
        &self,
        ctx: &OpContext,
        id: &str,
        updates: &[IssueUpdate],
        actor: &str,
    ) -> StoreResult<()> {
        validate_updates(updates)?;
        let new_value = encode_payload(&AuditPayload::Changes {
            changes: change_set(updates),
        })?;
        let event_type = event_type_for(updates);
        let (sql, values) = build_update_statement(id, updates, now_epoch_ms());

        self.run_in_transaction(ctx, |tx| {
            let previous = load_issue(tx, id)?.ok_or_else(|| StoreError::NotFound(id.to_string()))?;
            let old_value = encode_payload(&AuditPayload::Snapshot { issue: previous })?;

            tx.execute(&sql, params_from_iter(values))?;
            record_event(
                tx,
                &NewEvent {
                    issue_id: id,
                    event_type,
                    actor,
                    old_value: Some(&old_value),
                    new_value: Some(&new_value),
                    comment: None,
                },
            )?;
            Ok(())
        })
    }

    /// [`IssueStore::close_issue`] honoring `ctx`.
    pub fn close_issue_with(
        &self,
        ctx: &OpContext,
        id: &str,
        reason: &str,
        actor: &str,
    ) -> StoreResult<()> {
        let started_at = Instant::now();
        let now = now_epoch_ms();
        let result = self.run_in_transaction(ctx, |tx| {
            let changed = tx.execute(
                "UPDATE issues
                 SET status = ?1, closed_at = ?2, updated_at = ?2
                 WHERE id = ?3;",
                params![Status::Closed.as_str(), now, id],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(id.to_string()));
            }

            record_event(
                tx,
                &NewEvent {
                    issue_id: id,
                    event_type: EventType::Closed,
                    actor,
                    old_value: None,
                    new_value: None,
                    comment: Some(reason),
                },
            )?;
            Ok(())
        });
        log_outcome("issue_close", id, started_at, &result);
        result
    }

    pub fn search_issues_with(
        &self,
        ctx: &OpContext,
        query: &str,
        filter: &IssueFilter,
    ) -> StoreResult<Vec<Issue>> {
        self.run_read(ctx, |conn| search_issues(conn, query, filter))
    }

    /// Audit trail of one issue, oldest first.
    pub fn events_for_issue(&self, id: &str) -> StoreResult<Vec<Event>> {
        self.run_read(&OpContext::new(), |conn| list_events(conn, id))
    }

    /// Releases the database connection.
    ///
    /// Consumes the store, so no call can follow.
    pub fn close(self) -> StoreResult<()> {
        let conn = self
            .conn
            .into_inner()
            .map_err(|_| StoreError::LockPoisoned("connection"))?;
        match conn.close() {
            Ok(()) => {
                info!("event=store_close module=store status=ok");
                Ok(())
            }
            Err((_, err)) => {
                error!(
                    "event=store_close module=store status=error error_code=close_failed error={}",
                    err
                );
                Err(err.into())
            }
        }
    }

    fn lock_conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::LockPoisoned("connection"))
    }

    /// Runs `apply` inside an IMMEDIATE transaction and commits it.
    ///
    /// Any error from `apply`, or a context that finishes before commit,
    /// rolls the transaction back.
    fn run_in_transaction<T>(
        &self,
        ctx: &OpContext,
        apply: impl FnOnce(&Transaction<'_>) -> StoreResult<T>,
    ) -> StoreResult<T> {
        ctx.check(TxState::NotStarted)?;
        let conn = self.lock_conn()?;
        let interrupts = InterruptScope::install(&conn, ctx);
        let tx = Transaction::new_unchecked(&conn, TransactionBehavior::Immediate)?;

        let outcome =
            apply(&tx).and_then(|value| ctx.check(TxState::RolledBack).map(|()| value));
        // Rollback must not be interrupted by the same context.
        drop(interrupts);

        match outcome {
            Ok(value) => {
                tx.commit()
                    .map_err(|err| StoreError::from(err).rolled_back())?;
                Ok(value)
            }
            Err(err) => {
                drop(tx);
                Err(err.rolled_back())
            }
        }
    }

    fn run_read<T>(
        &self,
        ctx: &OpContext,
        read: impl FnOnce(&Connection) -> StoreResult<T>,
    ) -> StoreResult<T> {
        ctx.check(TxState::NotStarted)?;
        let conn = self.lock_conn()?;
        let _interrupts = InterruptScope::install(&conn, ctx);
        read(&conn)
    }
}

impl IssueStore for SqliteIssueStore {
    fn create_issue(&self, issue: &Issue, actor: &str) -> StoreResult<Issue> {
        self.create_issue_with(&OpContext::new(), issue, actor)
    }

    fn get_issue(&self, id: &str) -> StoreResult<Option<Issue>> {
        self.get_issue_with(&OpContext::new(), id)
    }

    fn update_issue(&self, id: &str, updates: &[IssueUpdate], actor: &str) -> StoreResult<()> {
        self.update_issue_with(&OpContext::new(), id, updates, actor)
    }

    fn close_issue(&self, id: &str, reason: &str, actor: &str) -> StoreResult<()> {
        self.close_issue_with(&OpContext::new(), id, reason, actor)
    }

    fn search_issues(&self, query: &str, filter: &IssueFilter) -> StoreResult<Vec<Issue>> {
        self.search_issues_with(&OpContext::new(), query, filter)
    }
}

fn insert_issue_row(conn: &Connection, issue: &Issue) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO issues (
            id,
            title,
            description,
            design,
            acceptance_criteria,
            notes,
            status,
            priority,
            issue_type,
            assignee,
            estimated_minutes,
            created_at,
            updated_at,
            closed_at,
            approved_at,
            approved_by
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16);",
        params![
            issue.id.as_str(),
            issue.title.as_str(),
            issue.description.as_str(),
            issue.design.as_str(),
            issue.acceptance_criteria.as_str(),
            issue.notes.as_str(),
            issue.status.as_str(),
            issue.priority,
            issue.issue_type.as_str(),
            issue.assignee.as_deref(),
            issue.estimated_minutes,
            issue.created_at,
            issue.updated_at,
            issue.closed_at,
            issue.approved_at,
            issue.approved_by.as_deref(),
        ],
    )?;
    Ok(())
}

pub(crate) fn load_issue(conn: &Connection, id: &str) -> StoreResult<Option<Issue>> {
    let mut stmt = conn.prepare(&format!("{ISSUE_SELECT_SQL} WHERE id = ?1;"))?;
    let mut rows = stmt.query([id])?;
    if let Some(row) = rows.next()? {
        return Ok(Some(parse_issue_row(row)?));
    }
    Ok(None)
}

pub(crate) fn parse_issue_row(row: &Row<'_>) -> StoreResult<Issue> {
    let status_text: String = row.get("status")?;
    let status = Status::parse(&status_text).ok_or_else(|| {
        StoreError::InvalidData(format!("invalid status `{status_text}` in issues.status"))
    })?;

    let type_text: String = row.get("issue_type")?;
    let issue_type = IssueType::parse(&type_text).ok_or_else(|| {
        StoreError::InvalidData(format!(
            "invalid issue type `{type_text}` in issues.issue_type"
        ))
    })?;

    Ok(Issue {
        id: row.get("id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        design: row.get("design")?,
        acceptance_criteria: row.get("acceptance_criteria")?,
        notes: row.get("notes")?,
        status,
        priority: row.get("priority")?,
        issue_type,
        assignee: row.get("assignee")?,
        estimated_minutes: row.get("estimated_minutes")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        closed_at: row.get("closed_at")?,
        approved_at: row.get("approved_at")?,
        approved_by: row.get("approved_by")?,
    })
}

/// Builds `UPDATE issues SET ... WHERE id = ?` for a validated update set.
///
/// `updated_at` is always refreshed. A status change also maintains
/// `closed_at`: set when closing, cleared when moving away from closed.
fn build_update_statement(id: &str, updates: &[IssueUpdate], now: i64) -> (String, Vec<Value>) {
    let mut assignments = vec!["updated_at = ?".to_string()];
    let mut values = vec![Value::Integer(now)];

    for update in updates {
        let (column, value) = update_binding(update);
        assignments.push(format!("{column} = ?"));
        values.push(value);

        if let IssueUpdate::Status(status) = update {
            if *status == Status::Closed {
                assignments.push("closed_at = ?".to_string());
                values.push(Value::Integer(now));
            } else {
                assignments.push("closed_at = NULL".to_string());
            }
        }
    }

    values.push(Value::Text(id.to_string()));
    let sql = format!("UPDATE issues SET {} WHERE id = ?;", assignments.join(", "));
    (sql, values)
}

fn update_binding(update: &IssueUpdate) -> (&'static str, Value) {
    match update {
        IssueUpdate::Title(value) => ("title", Value::Text(value.clone())),
        IssueUpdate::Description(value) => ("description", Value::Text(value.clone())),
        IssueUpdate::Design(value) => ("design", Value::Text(value.clone())),
        IssueUpdate::AcceptanceCriteria(value) => {
            ("acceptance_criteria", Value::Text(value.clone()))
        }
        IssueUpdate::Notes(value) => ("notes", Value::Text(value.clone())),
        IssueUpdate::Status(status) => ("status", Value::Text(status.as_str().to_string())),
        IssueUpdate::Priority(priority) => ("priority", Value::Integer(i64::from(*priority))),
        IssueUpdate::IssueType(kind) => ("issue_type", Value::Text(kind.as_str().to_string())),
        IssueUpdate::Assignee(value) => ("assignee", optional_text(value)),
        IssueUpdate::EstimatedMinutes(value) => ("estimated_minutes", optional_integer(*value)),
        IssueUpdate::ApprovedAt(value) => ("approved_at", optional_integer(*value)),
        IssueUpdate::ApprovedBy(value) => ("approved_by", optional_text(value)),
    }
}

fn optional_text(value: &Option<String>) -> Value {
    value.clone().map_or(Value::Null, Value::Text)
}

fn optional_integer(value: Option<i64>) -> Value {
    value.map_or(Value::Null, Value::Integer)
}

fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

fn log_outcome<T>(event: &str, issue_id: &str, started_at: Instant, result: &StoreResult<T>) {
    let duration_ms = started_at.elapsed().as_millis();
    match result {
        Ok(_) => info!(
            "event={} module=store status=ok issue_id={} duration_ms={}",
            event, issue_id, duration_ms
        ),
        Err(err @ (StoreError::Validation(_) | StoreError::NotFound(_))) => warn!(
            "event={} module=store status=error issue_id={} duration_ms={} error_code={} error={}",
            event,
            issue_id,
            duration_ms,
            err.code(),
            err
        ),
        Err(err) => error!(
            "event={} module=store status=error issue_id={} duration_ms={} error_code={} tx_state={} error={}",
            event,
            issue_id,
            duration_ms,
            err.code(),
            err.tx_state().as_str(),
            err
        ),
    }
}
