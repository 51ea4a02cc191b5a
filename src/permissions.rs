use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::error::EngineError;
use crate::model::{Permission, PermissionKind};
use crate::notify;
use crate::overlap;

const PERMISSION_COLUMNS: &str = "id, student_id, kind, category, reason, start_date, end_date, \
                                  start_time, end_time, granted_by, is_active, created_at";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionDraft {
    pub student_id: String,
    pub kind: PermissionKind,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    pub start_date: String,
    pub end_date: String,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    pub granted_by: String,
}

/// Field-wise patch; None leaves the stored value unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionPatch {
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
}

/// Pure precondition checks; safe to run before an offline enqueue.
pub fn validate_draft(draft: &PermissionDraft) -> Result<(), EngineError> {
    if draft.student_id.trim().is_empty() {
        return Err(EngineError::Validation("studentId must not be empty".into()));
    }
    if draft.granted_by.trim().is_empty() {
        return Err(EngineError::Validation("grantedBy must not be empty".into()));
    }
    let start = overlap::parse_day(&draft.start_date)?;
    let end = overlap::parse_day(&draft.end_date)?;
    if start > end {
        return Err(EngineError::Validation(
            "start date must not be after end date".into(),
        ));
    }
    if draft.kind == PermissionKind::Leave {
        if draft.category.is_some() {
            return Err(EngineError::Validation(
                "category applies only to od permissions".into(),
            ));
        }
        if draft.start_time.is_some() || draft.end_time.is_some() {
            return Err(EngineError::Validation(
                "times apply only to od permissions".into(),
            ));
        }
    }
    if let Some(category) = &draft.category {
        if category == "other" && draft.reason.as_deref().map(str::trim).unwrap_or("").is_empty() {
            return Err(EngineError::Validation(
                "reason is required when category is \"other\"".into(),
            ));
        }
    }
    for time in [&draft.start_time, &draft.end_time].into_iter().flatten() {
        overlap::parse_clock(time)?;
    }
    Ok(())
}

/// The patch checks that can run without the stored record (offline path);
/// the merged record is fully re-validated at apply time.
pub fn validate_patch(patch: &PermissionPatch) -> Result<(), EngineError> {
    if let Some(d) = &patch.start_date {
        overlap::parse_day(d)?;
    }
    if let Some(d) = &patch.end_date {
        overlap::parse_day(d)?;
    }
    if let (Some(start), Some(end)) = (&patch.start_date, &patch.end_date) {
        if overlap::parse_day(start)? > overlap::parse_day(end)? {
            return Err(EngineError::Validation(
                "start date must not be after end date".into(),
            ));
        }
    }
    for time in [&patch.start_time, &patch.end_time].into_iter().flatten() {
        overlap::parse_clock(time)?;
    }
    Ok(())
}

/// Scans the student's active permissions of the same kind and returns the
/// first one whose date range intersects the proposed range. Always reads
/// current rows, never a cached view.
pub fn check_overlap(
    conn: &Connection,
    student_id: &str,
    kind: PermissionKind,
    start_date: &str,
    end_date: &str,
    exclude_id: Option<&str>,
) -> Result<Option<Permission>, EngineError> {
    let start = overlap::parse_day(start_date)?;
    let end = overlap::parse_day(end_date)?;

    let sql = format!(
        "SELECT {PERMISSION_COLUMNS} FROM permissions
         WHERE student_id = ? AND kind = ? AND is_active = 1"
    );
    let mut stmt = conn.prepare(&sql)?;
    let existing = stmt
        .query_map((student_id, kind.as_str()), row_to_permission)?
        .collect::<Result<Vec<_>, _>>()?;

    for p in existing {
        if exclude_id == Some(p.id.as_str()) {
            continue;
        }
        let p_start = overlap::parse_day(&p.start_date)?;
        let p_end = overlap::parse_day(&p.end_date)?;
        if overlap::overlaps(start, end, p_start, p_end) {
            return Ok(Some(p));
        }
    }
    Ok(None)
}

/// Inserts a new active permission. The overlap check and the insert share
/// one transaction, so a conflicting grant can never land partially.
pub fn grant(conn: &Connection, draft: &PermissionDraft) -> Result<Permission, EngineError> {
    validate_draft(draft)?;

    let tx = conn.unchecked_transaction()?;
    if let Some(conflicting) = check_overlap(
        &tx,
        &draft.student_id,
        draft.kind,
        &draft.start_date,
        &draft.end_date,
        None,
    )? {
        return Err(EngineError::PermissionOverlap {
            student_id: draft.student_id.clone(),
            kind: draft.kind,
            conflicting: Box::new(conflicting),
        });
    }

    let permission = Permission {
        id: Uuid::new_v4().to_string(),
        student_id: draft.student_id.clone(),
        kind: draft.kind,
        category: draft.category.clone(),
        reason: draft.reason.clone(),
        start_date: draft.start_date.clone(),
        end_date: draft.end_date.clone(),
        start_time: draft.start_time.clone(),
        end_time: draft.end_time.clone(),
        granted_by: draft.granted_by.clone(),
        is_active: true,
        created_at: Utc::now().to_rfc3339(),
    };
    tx.execute(
        "INSERT INTO permissions(id, student_id, kind, category, reason, start_date, end_date,
                                 start_time, end_time, granted_by, is_active, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?)",
        (
            &permission.id,
            &permission.student_id,
            permission.kind.as_str(),
            &permission.category,
            &permission.reason,
            &permission.start_date,
            &permission.end_date,
            &permission.start_time,
            &permission.end_time,
            &permission.granted_by,
            &permission.created_at,
        ),
    )?;
    tx.commit()?;

    notify::dispatch(
        conn,
        &permission.student_id,
        "permission.granted",
        json!({
            "permissionId": permission.id,
            "kind": permission.kind.as_str(),
            "startDate": permission.start_date,
            "endDate": permission.end_date,
            "grantedBy": permission.granted_by,
        }),
    );
    Ok(permission)
}

/// Applies a patch to an active permission. Date changes re-run the overlap
/// check (excluding the record itself) inside the update's transaction; a
/// conflict aborts with no partial write.
pub fn update(
    conn: &Connection,
    id: &str,
    patch: &PermissionPatch,
) -> Result<Permission, EngineError> {
    validate_patch(patch)?;

    let tx = conn.unchecked_transaction()?;
    let Some(existing) = get(&tx, id)? else {
        return Err(EngineError::NotFound("permission"));
    };
    if !existing.is_active {
        return Err(EngineError::Validation(
            "permission is no longer active".into(),
        ));
    }

    let mut next = existing.clone();
    if let Some(v) = &patch.start_date {
        next.start_date = v.clone();
    }
    if let Some(v) = &patch.end_date {
        next.end_date = v.clone();
    }
    if let Some(v) = &patch.reason {
        next.reason = Some(v.clone());
    }
    if let Some(v) = &patch.category {
        next.category = Some(v.clone());
    }
    if let Some(v) = &patch.start_time {
        next.start_time = Some(v.clone());
    }
    if let Some(v) = &patch.end_time {
        next.end_time = Some(v.clone());
    }

    validate_draft(&PermissionDraft {
        student_id: next.student_id.clone(),
        kind: next.kind,
        category: next.category.clone(),
        reason: next.reason.clone(),
        start_date: next.start_date.clone(),
        end_date: next.end_date.clone(),
        start_time: next.start_time.clone(),
        end_time: next.end_time.clone(),
        granted_by: next.granted_by.clone(),
    })?;

    let dates_changed = patch.start_date.is_some() || patch.end_date.is_some();
    if dates_changed {
        if let Some(conflicting) = check_overlap(
            &tx,
            &next.student_id,
            next.kind,
            &next.start_date,
            &next.end_date,
            Some(id),
        )? {
            return Err(EngineError::PermissionOverlap {
                student_id: next.student_id.clone(),
                kind: next.kind,
                conflicting: Box::new(conflicting),
            });
        }
    }

    tx.execute(
        "UPDATE permissions
         SET category = ?, reason = ?, start_date = ?, end_date = ?, start_time = ?, end_time = ?
         WHERE id = ?",
        (
            &next.category,
            &next.reason,
            &next.start_date,
            &next.end_date,
            &next.start_time,
            &next.end_time,
            id,
        ),
    )?;
    tx.commit()?;
    Ok(next)
}

/// Hard delete. Revoking a missing id is a successful no-op so retries and
/// duplicate taps stay harmless.
pub fn revoke(conn: &Connection, id: &str) -> Result<bool, EngineError> {
    let n = conn.execute("DELETE FROM permissions WHERE id = ?", [id])?;
    Ok(n > 0)
}

pub fn get(conn: &Connection, id: &str) -> Result<Option<Permission>, EngineError> {
    let sql = format!("SELECT {PERMISSION_COLUMNS} FROM permissions WHERE id = ?");
    let p = conn.query_row(&sql, [id], row_to_permission).optional()?;
    Ok(p)
}

pub fn list_for_student(
    conn: &Connection,
    student_id: &str,
    active_only: bool,
) -> Result<Vec<Permission>, EngineError> {
    let sql = if active_only {
        format!(
            "SELECT {PERMISSION_COLUMNS} FROM permissions
             WHERE student_id = ? AND is_active = 1
             ORDER BY start_date"
        )
    } else {
        format!(
            "SELECT {PERMISSION_COLUMNS} FROM permissions
             WHERE student_id = ?
             ORDER BY start_date"
        )
    };
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([student_id], row_to_permission)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn row_to_permission(row: &rusqlite::Row<'_>) -> rusqlite::Result<Permission> {
    let kind_raw: String = row.get(2)?;
    let kind = PermissionKind::parse(&kind_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown permission kind {kind_raw:?}").into(),
        )
    })?;
    Ok(Permission {
        id: row.get(0)?,
        student_id: row.get(1)?,
        kind,
        category: row.get(3)?,
        reason: row.get(4)?,
        start_date: row.get(5)?,
        end_date: row.get(6)?,
        start_time: row.get(7)?,
        end_time: row.get(8)?,
        granted_by: row.get(9)?,
        is_active: row.get::<_, i64>(10)? != 0,
        created_at: row.get(11)?,
    })
}
