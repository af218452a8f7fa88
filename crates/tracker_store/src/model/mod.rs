//! Domain model for tracked issues and their audit trail.
//!
//! # Responsibility
//! - Define canonical issue, event and update shapes used by the store.
//! - Own field-level validation rules so storage code only sees checked data.
//!
//! # Invariants
//! - Every issue is identified by a `<prefix>-<positive integer>` id.
//! - Issues are never deleted; events are never mutated.

pub mod event;
pub mod issue;
pub mod update;
