//! Issue identifier allocation.
//!
//! # Responsibility
//! - Seed an in-memory counter from the highest stored id for one prefix.
//! - Hand out `<prefix>-<n>` ids under a lock independent of any
//!   database transaction.
//!
//! # Invariants
//! - Ids from one allocator are unique and strictly increasing.
//! - A handed-out id is never handed out again, even if the write that
//!   requested it fails; gaps are expected.
//! - Each allocator belongs to one store instance; nothing is global.

use crate::db::DbResult;
use crate::model::issue::{parse_issue_id, IssueId};
use crate::repo::error::{StoreError, StoreResult};
use crate::search::filter::escape_like;
use log::info;
use rusqlite::Connection;
use std::sync::Mutex;

#[derive(Debug)]
pub struct IdAllocator {
    prefix: String,
    next: Mutex<u64>,
}

impl IdAllocator {
    pub fn new(prefix: impl Into<String>, next: u64) -> Self {
        Self {
            prefix: prefix.into(),
            next: Mutex::new(next.max(1)),
        }
    }

    /// Scans `issues` for the highest number under `prefix`.
    ///
    /// Ids with other prefixes or unparsable numbers are ignored; an empty
    /// table starts the counter at 1.
    pub fn load(conn: &Connection, prefix: &str) -> DbResult<Self> {
        let pattern = format!("{}-%", escape_like(prefix));
        let mut stmt = conn.prepare("SELECT id FROM issues WHERE id LIKE ?1 ESCAPE '\\';")?;
        let mut rows = stmt.query([pattern.as_str()])?;

        let mut highest = 0_u64;
        while let Some(row) = rows.next()? {
            let id: String = row.get(0)?;
            if let Some((found_prefix, number)) = parse_issue_id(&id) {
                if found_prefix == prefix {
                    highest = highest.max(number);
                }
            }
        }

        let next = highest.saturating_add(1);
        info!(
            "event=id_allocator_init module=store status=ok prefix={} next={}",
            prefix, next
        );
        Ok(Self::new(prefix, next))
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Number the next [`allocate`](Self::allocate) call will use.
    pub fn peek_next(&self) -> StoreResult<u64> {
        Ok(*self.lock()?)
    }

    pub fn allocate(&self) -> StoreResult<IssueId> {
        let mut next = self.lock()?;
        let number = *next;
        *next = number.checked_add(1).ok_or_else(|| {
            StoreError::InvalidData(format!("identifier space for `{}` exhausted", self.prefix))
        })?;
        Ok(format!("{}-{number}", self.prefix))
    }

    /// Moves the counter past an explicitly supplied id with this prefix.
    pub fn observe(&self, id: &str) -> StoreResult<()> {
        let Some((prefix, number)) = parse_issue_id(id) else {
            return Ok(());
        };
        if prefix != self.prefix {
            return Ok(());
        }
        let mut next = self.lock()?;
        if number >= *next {
            *next = number.saturating_add(1);
        }
        Ok(())
    }

    fn lock(&self) -> StoreResult<std::sync::MutexGuard<'_, u64>> {
        self.next
            .lock()
            .map_err(|_| StoreError::LockPoisoned("identifier allocator"))
    }
}
