//! Read-only issue search.
//!
//! # Responsibility
//! - Compose filtered, ordered queries over current issue state.
//! - Keep column names fixed in code; caller input is only ever bound.

pub mod filter;
