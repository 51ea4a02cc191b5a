use std::collections::HashSet;

use chrono::Utc;
use rusqlite::{params_from_iter, Connection, OptionalExtension};

use crate::error::EngineError;
use crate::model::Tombstone;

pub const ITEM_TYPE_REQUEST: &str = "request";
pub const ITEM_TYPE_NOTIFICATION: &str = "notification";

/// Upserts a tombstone for `(user_id, item_id)`. Idempotent, and never
/// touches the hidden record itself: the counterparty keeps seeing it.
pub fn hide(
    conn: &Connection,
    user_id: &str,
    item_id: &str,
    item_type: &str,
) -> Result<Tombstone, EngineError> {
    if user_id.trim().is_empty() {
        return Err(EngineError::Validation("userId must not be empty".into()));
    }
    if item_id.trim().is_empty() {
        return Err(EngineError::Validation("itemId must not be empty".into()));
    }
    if item_type != ITEM_TYPE_REQUEST && item_type != ITEM_TYPE_NOTIFICATION {
        return Err(EngineError::Validation(format!(
            "itemType must be {:?} or {:?}",
            ITEM_TYPE_REQUEST, ITEM_TYPE_NOTIFICATION
        )));
    }

    conn.execute(
        "INSERT INTO tombstones(user_id, item_id, item_type, hidden_at)
         VALUES(?, ?, ?, ?)
         ON CONFLICT(user_id, item_id) DO NOTHING",
        (user_id, item_id, item_type, Utc::now().to_rfc3339()),
    )?;

    // Read back so a repeated hide reports the original stamp.
    let tombstone = conn
        .query_row(
            "SELECT user_id, item_id, item_type, hidden_at
             FROM tombstones
             WHERE user_id = ? AND item_id = ?",
            (user_id, item_id),
            |r| {
                Ok(Tombstone {
                    user_id: r.get(0)?,
                    item_id: r.get(1)?,
                    item_type: r.get(2)?,
                    hidden_at: r.get(3)?,
                })
            },
        )
        .optional()?
        .ok_or_else(|| EngineError::Internal("tombstone upsert left no row".into()))?;
    Ok(tombstone)
}

pub fn is_visible(conn: &Connection, user_id: &str, item_id: &str) -> Result<bool, EngineError> {
    let hidden = conn
        .query_row(
            "SELECT 1 FROM tombstones WHERE user_id = ? AND item_id = ?",
            (user_id, item_id),
            |r| r.get::<_, i64>(0),
        )
        .optional()?
        .is_some();
    Ok(!hidden)
}

/// One-pass batch filter: drops every item the user has hidden, preserving
/// the input order of the rest.
pub fn filter_visible<T, F>(
    conn: &Connection,
    user_id: &str,
    items: Vec<T>,
    id_of: F,
) -> Result<Vec<T>, EngineError>
where
    F: Fn(&T) -> &str,
{
    let ids: Vec<String> = items.iter().map(|it| id_of(it).to_string()).collect();
    let hidden = hidden_among(conn, user_id, &ids)?;
    Ok(items
        .into_iter()
        .filter(|it| !hidden.contains(id_of(it)))
        .collect())
}

fn hidden_among(
    conn: &Connection,
    user_id: &str,
    ids: &[String],
) -> Result<HashSet<String>, EngineError> {
    if ids.is_empty() {
        return Ok(HashSet::new());
    }
    let placeholders = vec!["?"; ids.len()].join(", ");
    let sql = format!(
        "SELECT item_id FROM tombstones WHERE user_id = ? AND item_id IN ({})",
        placeholders
    );
    let mut stmt = conn.prepare(&sql)?;
    let params = params_from_iter(std::iter::once(user_id.to_string()).chain(ids.iter().cloned()));
    let hidden = stmt
        .query_map(params, |r| r.get::<_, String>(0))?
        .collect::<Result<HashSet<_>, _>>()?;
    Ok(hidden)
}
