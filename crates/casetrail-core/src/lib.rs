//! # Casetrail Core
//!
//! Core types for the casetrail domain event history.
//!
//! This crate defines the immutable audit-event model shared by every
//! storage backend:
//!
//! - [`EventRecord`]: one append-only audit-log entry for an application
//! - [`NewEvent`]: caller-facing input for an append, before id assignment
//! - [`EventType`]: the fixed enumeration of auditable actions
//! - [`EventData`]: inline payload or a reference to an offloaded blob
//!
//! Records are created exactly once when a business action occurs and are
//! never mutated or deleted afterwards. Ordering across one application's
//! history is total: ascending `created_at`, ties broken by event id.

pub mod error;
pub mod event;
pub mod ids;

// Re-export main types
pub use error::*;
pub use event::*;
pub use ids::*;
