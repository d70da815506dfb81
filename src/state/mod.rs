//! Engine state
//!
//! Durable records owned by the change-detection loop:
//! - Session pointer (which checkpoint the workspace reflects)
//! - Audit log (every restoration attempt and its outcome)

pub mod audit;
pub mod pointer;

pub use audit::{AuditLog, AuditRecord};
pub use pointer::{SessionPointer, SessionStore};
