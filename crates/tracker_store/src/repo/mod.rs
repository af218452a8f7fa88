//! Issue persistence: CRUD engine, audit recorder and id allocation.
//!
//! # Responsibility
//! - Define the issue store contract consumed by upper layers.
//! - Keep SQL and transaction handling inside the storage boundary.
//!
//! # Invariants
//! - Every successful mutation writes exactly one audit event in the same
//!   transaction.
//! - Absence on point lookup is `Ok(None)`; absence on update/close is
//!   `StoreError::NotFound`.

pub mod audit;
pub mod context;
pub mod error;
pub mod id_alloc;
pub mod issue_repo;
