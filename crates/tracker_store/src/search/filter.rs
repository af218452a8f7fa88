//! Filtered issue search over the `issues` table.
//!
//! # Invariants
//! - Filters are AND-combined; absent filters do not constrain.
//! - Ordering is `priority ASC, created_at DESC`, then newest insert first.
//! - No match is an empty list, never an error.

use crate::model::issue::{Issue, IssueType, Status};
use crate::repo::error::StoreResult;
use crate::repo::issue_repo::{parse_issue_row, ISSUE_SELECT_SQL};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};

/// Exact-match filters and result cap for [`search_issues`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IssueFilter {
    pub status: Option<Status>,
    pub priority: Option<i32>,
    pub issue_type: Option<IssueType>,
    pub assignee: Option<String>,
    /// `None` or `Some(0)` returns every match.
    pub limit: Option<u32>,
}

/// Searches issues by free text and filters.
///
/// `query` matches as a substring of `title`, `description` or `id`
/// (ASCII case-insensitive, `%`/`_` taken literally). A blank query does
/// not filter.
pub fn search_issues(
    conn: &Connection,
    query: &str,
    filter: &IssueFilter,
) -> StoreResult<Vec<Issue>> {
    let (sql, bind_values) = build_search_sql(query, filter);

    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params_from_iter(bind_values))?;
    let mut issues = Vec::new();
    while let Some(row) = rows.next()? {
        issues.push(parse_issue_row(row)?);
    }
    Ok(issues)
}

/// Escapes `LIKE` wildcards for use with `ESCAPE '\\'`.
pub(crate) fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

fn build_search_sql(query: &str, filter: &IssueFilter) -> (String, Vec<Value>) {
    let mut sql = format!("{ISSUE_SELECT_SQL} WHERE 1 = 1");
    let mut bind_values: Vec<Value> = Vec::new();

    let text = query.trim();
    if !text.is_empty() {
        sql.push_str(
            " AND (title LIKE ? ESCAPE '\\'
                OR description LIKE ? ESCAPE '\\'
                OR id LIKE ? ESCAPE '\\')",
        );
        let pattern = format!("%{}%", escape_like(text));
        for _ in 0..3 {
            bind_values.push(Value::Text(pattern.clone()));
        }
    }

    if let Some(status) = filter.status {
        sql.push_str(" AND status = ?");
        bind_values.push(Value::Text(status.as_str().to_string()));
    }

    if let Some(priority) = filter.priority {
        sql.push_str(" AND priority = ?");
        bind_values.push(Value::Integer(i64::from(priority)));
    }

    if let Some(kind) = filter.issue_type {
        sql.push_str(" AND issue_type = ?");
        bind_values.push(Value::Text(kind.as_str().to_string()));
    }

    if let Some(assignee) = filter.assignee.as_ref() {
        sql.push_str(" AND assignee = ?");
        bind_values.push(Value::Text(assignee.clone()));
    }

    sql.push_str(" ORDER BY priority ASC, created_at DESC, rowid DESC");

    if let Some(limit) = filter.limit.filter(|limit| *limit > 0) {
        sql.push_str(" LIMIT ?");
        bind_values.push(Value::Integer(i64::from(limit)));
    }

    (sql, bind_values)
}
