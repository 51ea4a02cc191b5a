use chrono::Utc;
use rusqlite::Connection;
use uuid::Uuid;

use crate::error::EngineError;
use crate::model::Notification;

/// Fire-and-forget delivery. A failed insert is logged and swallowed: the
/// business transaction it announces must not fail with it.
pub fn dispatch(conn: &Connection, recipient_id: &str, kind: &str, body: serde_json::Value) {
    if let Err(e) = insert(conn, recipient_id, kind, &body) {
        tracing::warn!(
            recipient = recipient_id,
            kind,
            error = %e,
            "notification dispatch failed"
        );
    }
}

fn insert(
    conn: &Connection,
    recipient_id: &str,
    kind: &str,
    body: &serde_json::Value,
) -> Result<(), EngineError> {
    conn.execute(
        "INSERT INTO notifications(id, recipient_id, kind, body, created_at)
         VALUES(?, ?, ?, ?, ?)",
        (
            Uuid::new_v4().to_string(),
            recipient_id,
            kind,
            body.to_string(),
            Utc::now().to_rfc3339(),
        ),
    )?;
    Ok(())
}

pub fn list_for_user(conn: &Connection, user_id: &str) -> Result<Vec<Notification>, EngineError> {
    let mut stmt = conn.prepare(
        "SELECT id, recipient_id, kind, body, created_at
         FROM notifications
         WHERE recipient_id = ?
         ORDER BY created_at DESC",
    )?;
    let rows = stmt
        .query_map([user_id], |r| {
            let raw_body: String = r.get(3)?;
            Ok(Notification {
                id: r.get(0)?,
                recipient_id: r.get(1)?,
                kind: r.get(2)?,
                body: serde_json::from_str(&raw_body)
                    .unwrap_or(serde_json::Value::String(raw_body)),
                created_at: r.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Hard delete, valid only for the recipient's own rows. Personal
/// notifications are wholly owned, so a real remove is safe here; shared
/// items go through tombstones instead. Idempotent: a missing or foreign row
/// removes nothing.
pub fn delete_own(
    conn: &Connection,
    user_id: &str,
    notification_id: &str,
) -> Result<bool, EngineError> {
    let n = conn.execute(
        "DELETE FROM notifications WHERE id = ? AND recipient_id = ?",
        (notification_id, user_id),
    )?;
    Ok(n > 0)
}
