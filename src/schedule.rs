use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EngineError;
use crate::model::AttendanceSession;
use crate::overlap;

const SESSION_COLUMNS: &str = "id, faculty_id, date, slot_id, class_id, subject";

/// A timetable row synced down from the backend. The engine never mutates
/// sessions on its own behalf; they exist as the double-booking substrate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDraft {
    pub faculty_id: String,
    pub date: String,
    pub slot_id: String,
    #[serde(default)]
    pub class_id: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
}

pub fn put(conn: &Connection, draft: &SessionDraft) -> Result<AttendanceSession, EngineError> {
    if draft.faculty_id.trim().is_empty() {
        return Err(EngineError::Validation("facultyId must not be empty".into()));
    }
    if draft.slot_id.trim().is_empty() {
        return Err(EngineError::Validation("slotId must not be empty".into()));
    }
    overlap::parse_day(&draft.date)?;

    conn.execute(
        "INSERT INTO attendance_sessions(id, faculty_id, date, slot_id, class_id, subject)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(faculty_id, date, slot_id) DO UPDATE SET
           class_id = excluded.class_id,
           subject = excluded.subject",
        (
            Uuid::new_v4().to_string(),
            &draft.faculty_id,
            &draft.date,
            &draft.slot_id,
            &draft.class_id,
            &draft.subject,
        ),
    )?;

    session_at(conn, &draft.faculty_id, &draft.date, &draft.slot_id)?
        .ok_or_else(|| EngineError::Internal("session upsert left no row".into()))
}

pub fn session_at(
    conn: &Connection,
    faculty_id: &str,
    date: &str,
    slot_id: &str,
) -> Result<Option<AttendanceSession>, EngineError> {
    let sql = format!(
        "SELECT {SESSION_COLUMNS} FROM attendance_sessions
         WHERE faculty_id = ? AND date = ? AND slot_id = ?"
    );
    let session = conn
        .query_row(&sql, (faculty_id, date, slot_id), row_to_session)
        .optional()?;
    Ok(session)
}

pub fn list_for_faculty(
    conn: &Connection,
    faculty_id: &str,
    date: Option<&str>,
) -> Result<Vec<AttendanceSession>, EngineError> {
    let rows = match date {
        Some(date) => {
            let sql = format!(
                "SELECT {SESSION_COLUMNS} FROM attendance_sessions
                 WHERE faculty_id = ? AND date = ?
                 ORDER BY slot_id"
            );
            let mut stmt = conn.prepare(&sql)?;
            let out = stmt
                .query_map((faculty_id, date), row_to_session)?
                .collect::<Result<Vec<_>, _>>()?;
            out
        }
        None => {
            let sql = format!(
                "SELECT {SESSION_COLUMNS} FROM attendance_sessions
                 WHERE faculty_id = ?
                 ORDER BY date, slot_id"
            );
            let mut stmt = conn.prepare(&sql)?;
            let out = stmt
                .query_map([faculty_id], row_to_session)?
                .collect::<Result<Vec<_>, _>>()?;
            out
        }
    };
    Ok(rows)
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<AttendanceSession> {
    Ok(AttendanceSession {
        id: row.get(0)?,
        faculty_id: row.get(1)?,
        date: row.get(2)?,
        slot_id: row.get(3)?,
        class_id: row.get(4)?,
        subject: row.get(5)?,
    })
}
