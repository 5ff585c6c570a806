//! Operator-facing operations. Each function takes the shared [`AppState`],
//! does its work through the engine, resolver or integration store, and
//! writes an audit entry for anything that changes data.
//!
//! [`AppState`]: crate::state::AppState

pub mod entities;
pub mod integrations;
pub mod sync;
