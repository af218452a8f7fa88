//! Caller-owned cancellation and deadline for store operations.
//!
//! # Invariants
//! - A context that is done never lets a transaction commit.
//! - The SQLite progress handler is removed when the operation ends.

use crate::repo::error::{StoreError, StoreResult, TxState};
use rusqlite::Connection;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// VM instructions between cancellation checks inside one statement.
const PROGRESS_CHECK_INTERVAL_OPS: i32 = 1_000;

/// Cancellation flag plus optional deadline.
///
/// Clones share the flag, so a clone handed to another thread can cancel
/// an operation in flight.
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl OpContext {
    /// Context that is never done unless cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            cancelled: Arc::default(),
            deadline: Some(deadline),
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            cancelled: Arc::default(),
            deadline: Instant::now().checked_add(timeout),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_done(&self) -> bool {
        is_done(&self.cancelled, self.deadline)
    }

    pub(crate) fn check(&self, state: TxState) -> StoreResult<()> {
        if self.is_done() {
            return Err(StoreError::Cancelled { state });
        }
        Ok(())
    }
}

fn is_done(cancelled: &AtomicBool, deadline: Option<Instant>) -> bool {
    cancelled.load(Ordering::Acquire) || deadline.is_some_and(|at| Instant::now() >= at)
}

/// Interrupts statements on `conn` once the context is done.
pub(crate) struct InterruptScope<'conn> {
    conn: &'conn Connection,
}

impl<'conn> InterruptScope<'conn> {
    pub(crate) fn install(conn: &'conn Connection, ctx: &OpContext) -> Self {
        let cancelled = Arc::clone(&ctx.cancelled);
        let deadline = ctx.deadline;
        conn.progress_handler(
            PROGRESS_CHECK_INTERVAL_OPS,
            Some(move || is_done(&cancelled, deadline)),
        );
        Self { conn }
    }
}

impl Drop for InterruptScope<'_> {
    fn drop(&mut self) {
        self.conn.progress_handler(0, None::<fn() -> bool>);
    }
}

#[cfg(test)]
mod tests {
    use super::OpContext;
    use std::time::{Duration, Instant};

    #[test]
    fn clones_share_cancellation() {
        let ctx = OpContext::new();
        let handle = ctx.clone();
        assert!(!ctx.is_done());
        handle.cancel();
        assert!(ctx.is_done());
    }

    #[test]
    fn past_deadline_is_done() {
        let ctx = OpContext::with_deadline(Instant::now() - Duration::from_millis(1));
        assert!(ctx.is_done());
        assert!(!OpContext::with_timeout(Duration::from_secs(60)).is_done());
    }
}
