use rusqlite::ErrorCode;
use serde_json::json;
use thiserror::Error;

use crate::model::{AttendanceSession, Permission, PermissionKind};

/// Engine-level failure taxonomy. Business-rule violations (`Validation`,
/// `PermissionOverlap`, `ScheduleConflict`) are always surfaced to the
/// caller; only transient store failures are eligible for offline deferral.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0}")]
    Validation(String),

    #[error("{kind} permission overlaps an existing grant for student {student_id}")]
    PermissionOverlap {
        student_id: String,
        kind: PermissionKind,
        conflicting: Box<Permission>,
    },

    #[error("responder already has a session on {date} slot {slot_id}")]
    ScheduleConflict {
        date: String,
        slot_id: String,
        session: Box<AttendanceSession>,
    },

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Internal(String),

    #[error(transparent)]
    Db(#[from] rusqlite::Error),
}

impl EngineError {
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation",
            EngineError::PermissionOverlap { .. } => "conflict",
            EngineError::ScheduleConflict { .. } => "schedule_conflict",
            EngineError::NotFound(_) => "not_found",
            EngineError::Forbidden(_) => "forbidden",
            EngineError::Internal(_) => "unknown",
            EngineError::Db(e) if is_transient(e) => "store_unavailable",
            EngineError::Db(_) => "db_failed",
        }
    }

    /// Transient failures keep a queued action in the outbox; everything
    /// else drops it after logging.
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::Db(e) if is_transient(e))
    }

    /// Conflicting-record payload for the UI's override prompt.
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            EngineError::PermissionOverlap { conflicting, .. } => serde_json::to_value(
                conflicting.as_ref(),
            )
            .ok()
            .map(|p| json!({ "conflicting": p })),
            EngineError::ScheduleConflict { session, .. } => serde_json::to_value(session.as_ref())
                .ok()
                .map(|s| json!({ "session": s })),
            _ => None,
        }
    }
}

fn is_transient(e: &rusqlite::Error) -> bool {
    matches!(
        e.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}
