use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const STORE_FILE: &str = "attend.sqlite3";
pub const OUTBOX_FILE: &str = "outbox.sqlite3";

/// Opens the workspace's relational store. The engine treats these tables as
/// the backend's: it only ever point-reads, range-scans, conditionally
/// updates, and upserts them.
pub fn open_store(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let conn = Connection::open(workspace.join(STORE_FILE))?;
    init_store_schema(&conn)?;
    Ok(conn)
}

pub fn init_store_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS permissions(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            category TEXT,
            reason TEXT,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            start_time TEXT,
            end_time TEXT,
            granted_by TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_permissions_student_kind
         ON permissions(student_id, kind)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS requests(
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            sender_id TEXT NOT NULL,
            receiver_id TEXT NOT NULL,
            date TEXT NOT NULL,
            slot_id TEXT,
            slot_a_id TEXT,
            slot_b_id TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            requested_at TEXT NOT NULL,
            responded_at TEXT
        )",
        [],
    )?;
    // Early workspaces predate the responded_at stamp. Add it if missing.
    ensure_requests_responded_at(conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_requests_sender ON requests(sender_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_requests_receiver ON requests(receiver_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_sessions(
            id TEXT PRIMARY KEY,
            faculty_id TEXT NOT NULL,
            date TEXT NOT NULL,
            slot_id TEXT NOT NULL,
            class_id TEXT,
            subject TEXT,
            UNIQUE(faculty_id, date, slot_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_sessions_faculty_date
         ON attendance_sessions(faculty_id, date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS tombstones(
            user_id TEXT NOT NULL,
            item_id TEXT NOT NULL,
            item_type TEXT NOT NULL,
            hidden_at TEXT NOT NULL,
            PRIMARY KEY(user_id, item_id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS notifications(
            id TEXT PRIMARY KEY,
            recipient_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            body TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_notifications_recipient
         ON notifications(recipient_id)",
        [],
    )?;

    Ok(())
}

/// Opens the workspace's local durable store: the offline outbox plus a
/// small JSON key-value cache. Survives process restarts.
pub fn open_outbox(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let conn = Connection::open(workspace.join(OUTBOX_FILE))?;
    init_outbox_schema(&conn)?;
    Ok(conn)
}

pub fn init_outbox_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS outbox_actions(
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            description TEXT NOT NULL,
            payload TEXT NOT NULL,
            enqueued_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS kv(
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;
    Ok(())
}

pub fn kv_set_json(conn: &Connection, key: &str, value: &serde_json::Value) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO kv(key, value, updated_at)
         VALUES(?, ?, ?)
         ON CONFLICT(key) DO UPDATE SET
           value = excluded.value,
           updated_at = excluded.updated_at",
        (key, value.to_string(), Utc::now().to_rfc3339()),
    )?;
    Ok(())
}

/// Returns the stored value and its update stamp, or None if the key is
/// absent.
pub fn kv_get_json(
    conn: &Connection,
    key: &str,
) -> anyhow::Result<Option<(serde_json::Value, String)>> {
    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT value, updated_at FROM kv WHERE key = ?",
            [key],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    let Some((raw, updated_at)) = row else {
        return Ok(None);
    };
    let value: serde_json::Value = serde_json::from_str(&raw)?;
    Ok(Some((value, updated_at)))
}

fn ensure_requests_responded_at(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "requests", "responded_at")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE requests ADD COLUMN responded_at TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
