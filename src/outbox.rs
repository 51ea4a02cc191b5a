use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EngineError;
use crate::notify;
use crate::permissions::{self, PermissionDraft, PermissionPatch};
use crate::requests::{self, RequestDraft, RespondAction, RespondOutcome};
use crate::visibility;

/// A replayable command. Replay goes through the same manager code paths as
/// a direct call, so conflict checks and idempotence guards apply either way.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum ActionPayload {
    GrantPermission {
        draft: PermissionDraft,
    },
    UpdatePermission {
        id: String,
        patch: PermissionPatch,
    },
    RevokePermission {
        id: String,
    },
    CreateRequest {
        draft: RequestDraft,
    },
    RespondRequest {
        request_id: String,
        responder_id: String,
        action: RespondAction,
        #[serde(default)]
        override_conflict: bool,
    },
    CancelRequest {
        request_id: String,
        sender_id: String,
    },
    HideItem {
        user_id: String,
        item_id: String,
        item_type: String,
    },
    DeleteNotification {
        user_id: String,
        notification_id: String,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedAction {
    pub id: String,
    pub description: String,
    pub payload: ActionPayload,
    pub enqueued_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedAction {
    pub id: String,
    pub description: String,
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlushReport {
    pub applied: usize,
    pub failed: Vec<FailedAction>,
    pub remaining: usize,
}

struct OutboxRow {
    seq: i64,
    id: String,
    description: String,
    payload_json: String,
    enqueued_at: String,
}

/// Appends to the tail of the durable queue. Never rejects for capacity;
/// actions are small and user-issued.
pub fn enqueue(
    local: &Connection,
    description: &str,
    payload: &ActionPayload,
) -> Result<QueuedAction, EngineError> {
    let payload_json = serde_json::to_string(payload)
        .map_err(|e| EngineError::Internal(format!("unserializable action: {e}")))?;
    let action = QueuedAction {
        id: Uuid::new_v4().to_string(),
        description: description.to_string(),
        payload: payload.clone(),
        enqueued_at: Utc::now().to_rfc3339(),
    };
    local.execute(
        "INSERT INTO outbox_actions(id, description, payload, enqueued_at)
         VALUES(?, ?, ?, ?)",
        (
            &action.id,
            &action.description,
            &payload_json,
            &action.enqueued_at,
        ),
    )?;
    tracing::info!(action = %action.description, "queued offline action");
    Ok(action)
}

pub fn pending_count(local: &Connection) -> Result<usize, EngineError> {
    let n: i64 = local.query_row("SELECT COUNT(*) FROM outbox_actions", [], |r| r.get(0))?;
    Ok(n as usize)
}

pub fn list(local: &Connection) -> Result<Vec<QueuedAction>, EngineError> {
    let mut stmt = local.prepare(
        "SELECT seq, id, description, payload, enqueued_at
         FROM outbox_actions
         ORDER BY seq",
    )?;
    let rows = stmt
        .query_map([], row_to_outbox_row)?
        .collect::<Result<Vec<_>, _>>()?;

    let mut actions = Vec::with_capacity(rows.len());
    for row in rows {
        match serde_json::from_str::<ActionPayload>(&row.payload_json) {
            Ok(payload) => actions.push(QueuedAction {
                id: row.id,
                description: row.description,
                payload,
                enqueued_at: row.enqueued_at,
            }),
            Err(e) => {
                tracing::warn!(action = %row.description, error = %e, "skipping undecodable queued action");
            }
        }
    }
    Ok(actions)
}

/// Replays the queue strictly in enqueue order, one action at a time.
///
/// A business-rule failure drops the action and moves on, so one bad action
/// cannot wedge the queue. A transient store failure keeps the action and
/// stops: the tail replays on the next flush, still in order.
pub fn flush(store: &Connection, local: &Connection) -> Result<FlushReport, EngineError> {
    let mut applied = 0usize;
    let mut failed: Vec<FailedAction> = Vec::new();

    loop {
        let Some(row) = next_row(local)? else {
            break;
        };

        let payload = match serde_json::from_str::<ActionPayload>(&row.payload_json) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(action = %row.description, error = %e, "dropping undecodable queued action");
                failed.push(FailedAction {
                    id: row.id,
                    description: row.description,
                    code: "unknown",
                    message: e.to_string(),
                });
                remove(local, row.seq)?;
                continue;
            }
        };

        match replay(store, &payload) {
            Ok(()) => {
                remove(local, row.seq)?;
                applied += 1;
            }
            Err(e) if e.is_transient() => {
                tracing::warn!(action = %row.description, error = %e, "store unavailable, leaving action queued");
                break;
            }
            Err(e) => {
                tracing::warn!(action = %row.description, code = e.code(), error = %e, "queued action failed, not requeued");
                failed.push(FailedAction {
                    id: row.id,
                    description: row.description,
                    code: e.code(),
                    message: e.to_string(),
                });
                remove(local, row.seq)?;
            }
        }
    }

    let remaining = pending_count(local)?;
    tracing::info!(applied, failed = failed.len(), remaining, "outbox flush complete");
    Ok(FlushReport {
        applied,
        failed,
        remaining,
    })
}

fn replay(store: &Connection, payload: &ActionPayload) -> Result<(), EngineError> {
    match payload {
        ActionPayload::GrantPermission { draft } => {
            permissions::grant(store, draft)?;
            Ok(())
        }
        ActionPayload::UpdatePermission { id, patch } => {
            permissions::update(store, id, patch)?;
            Ok(())
        }
        ActionPayload::RevokePermission { id } => {
            permissions::revoke(store, id)?;
            Ok(())
        }
        ActionPayload::CreateRequest { draft } => {
            requests::create(store, draft)?;
            Ok(())
        }
        ActionPayload::RespondRequest {
            request_id,
            responder_id,
            action,
            override_conflict,
        } => {
            match requests::respond(store, request_id, responder_id, *action, *override_conflict)? {
                RespondOutcome::ScheduleConflict { session, .. } => {
                    Err(EngineError::ScheduleConflict {
                        date: session.date.clone(),
                        slot_id: session.slot_id.clone(),
                        session: Box::new(session),
                    })
                }
                _ => Ok(()),
            }
        }
        ActionPayload::CancelRequest {
            request_id,
            sender_id,
        } => {
            requests::cancel(store, request_id, sender_id)?;
            Ok(())
        }
        ActionPayload::HideItem {
            user_id,
            item_id,
            item_type,
        } => {
            visibility::hide(store, user_id, item_id, item_type)?;
            Ok(())
        }
        ActionPayload::DeleteNotification {
            user_id,
            notification_id,
        } => {
            notify::delete_own(store, user_id, notification_id)?;
            Ok(())
        }
    }
}

fn next_row(local: &Connection) -> Result<Option<OutboxRow>, EngineError> {
    let row = local
        .query_row(
            "SELECT seq, id, description, payload, enqueued_at
             FROM outbox_actions
             ORDER BY seq
             LIMIT 1",
            [],
            row_to_outbox_row,
        )
        .optional()?;
    Ok(row)
}

fn remove(local: &Connection, seq: i64) -> Result<(), EngineError> {
    local.execute("DELETE FROM outbox_actions WHERE seq = ?", [seq])?;
    Ok(())
}

fn row_to_outbox_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<OutboxRow> {
    Ok(OutboxRow {
        seq: row.get(0)?,
        id: row.get(1)?,
        description: row.get(2)?,
        payload_json: row.get(3)?,
        enqueued_at: row.get(4)?,
    })
}
