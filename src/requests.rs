use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::error::EngineError;
use crate::model::{AttendanceSession, Request, RequestKind, RequestStatus};
use crate::notify;
use crate::overlap;
use crate::schedule;

const REQUEST_COLUMNS: &str = "id, kind, sender_id, receiver_id, date, slot_id, slot_a_id, \
                               slot_b_id, status, requested_at, responded_at";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestDraft {
    pub kind: RequestKind,
    pub sender_id: String,
    pub receiver_id: String,
    pub date: String,
    #[serde(default)]
    pub slot_id: Option<String>,
    #[serde(default)]
    pub slot_a_id: Option<String>,
    #[serde(default)]
    pub slot_b_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RespondAction {
    Accept,
    Decline,
}

impl RespondAction {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "accept" => Some(RespondAction::Accept),
            "decline" => Some(RespondAction::Decline),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub enum RespondOutcome {
    /// This call performed the transition.
    Applied { request: Request },
    /// The request was already terminal; reported as success so duplicate
    /// taps and network retries stay harmless.
    AlreadyResolved { request: Request },
    /// The responder is double-booked at the target slot. No write happened;
    /// the caller may retry with the override flag after confirming.
    ScheduleConflict {
        request: Request,
        session: AttendanceSession,
    },
}

/// Pure precondition checks; safe to run before an offline enqueue.
pub fn validate_draft(draft: &RequestDraft) -> Result<(), EngineError> {
    if draft.sender_id.trim().is_empty() {
        return Err(EngineError::Validation("senderId must not be empty".into()));
    }
    if draft.receiver_id.trim().is_empty() {
        return Err(EngineError::Validation(
            "receiverId must not be empty".into(),
        ));
    }
    if draft.sender_id == draft.receiver_id {
        return Err(EngineError::Validation(
            "sender and receiver must differ".into(),
        ));
    }
    overlap::parse_day(&draft.date)?;
    match draft.kind {
        RequestKind::Substitution => {
            if draft.slot_id.as_deref().map(str::trim).unwrap_or("").is_empty() {
                return Err(EngineError::Validation(
                    "substitution requests need slotId".into(),
                ));
            }
            if draft.slot_a_id.is_some() || draft.slot_b_id.is_some() {
                return Err(EngineError::Validation(
                    "slotAId/slotBId apply only to swap requests".into(),
                ));
            }
        }
        RequestKind::Swap => {
            let a = draft.slot_a_id.as_deref().map(str::trim).unwrap_or("");
            let b = draft.slot_b_id.as_deref().map(str::trim).unwrap_or("");
            if a.is_empty() || b.is_empty() {
                return Err(EngineError::Validation(
                    "swap requests need slotAId and slotBId".into(),
                ));
            }
            if draft.slot_id.is_some() {
                return Err(EngineError::Validation(
                    "slotId applies only to substitution requests".into(),
                ));
            }
        }
    }
    Ok(())
}

/// Inserts a pending request. Conflicts are not checked here: the schedule
/// may change between request and response, so only acceptance checks.
pub fn create(conn: &Connection, draft: &RequestDraft) -> Result<Request, EngineError> {
    validate_draft(draft)?;

    let request = Request {
        id: Uuid::new_v4().to_string(),
        kind: draft.kind,
        sender_id: draft.sender_id.clone(),
        receiver_id: draft.receiver_id.clone(),
        date: draft.date.clone(),
        slot_id: draft.slot_id.clone(),
        slot_a_id: draft.slot_a_id.clone(),
        slot_b_id: draft.slot_b_id.clone(),
        status: RequestStatus::Pending,
        requested_at: Utc::now().to_rfc3339(),
        responded_at: None,
    };
    conn.execute(
        "INSERT INTO requests(id, kind, sender_id, receiver_id, date, slot_id, slot_a_id,
                              slot_b_id, status, requested_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, 'pending', ?)",
        (
            &request.id,
            request.kind.as_str(),
            &request.sender_id,
            &request.receiver_id,
            &request.date,
            &request.slot_id,
            &request.slot_a_id,
            &request.slot_b_id,
            &request.requested_at,
        ),
    )?;

    notify::dispatch(
        conn,
        &request.receiver_id,
        "request.created",
        json!({
            "requestId": request.id,
            "kind": request.kind.as_str(),
            "date": request.date,
            "senderId": request.sender_id,
        }),
    );
    Ok(request)
}

/// Receiver-side transition. Accepting re-reads the responder's timetable
/// for the target slot immediately before writing; the write itself is
/// guarded on `status = 'pending'` so concurrent responders cannot
/// double-apply.
pub fn respond(
    conn: &Connection,
    request_id: &str,
    responder_id: &str,
    action: RespondAction,
    override_conflict: bool,
) -> Result<RespondOutcome, EngineError> {
    let Some(request) = get(conn, request_id)? else {
        return Err(EngineError::NotFound("request"));
    };
    if request.receiver_id != responder_id {
        return Err(EngineError::Forbidden(
            "only the receiver can respond to this request".into(),
        ));
    }
    if request.status.is_terminal() {
        return Ok(RespondOutcome::AlreadyResolved { request });
    }

    if action == RespondAction::Accept && !override_conflict {
        let (date, slot_id) = conflict_target(&request)?;
        if let Some(session) = schedule::session_at(conn, responder_id, &date, &slot_id)? {
            return Ok(RespondOutcome::ScheduleConflict { request, session });
        }
    }

    let new_status = match action {
        RespondAction::Accept => RequestStatus::Accepted,
        RespondAction::Decline => RequestStatus::Declined,
    };
    let outcome = transition(conn, request_id, new_status)?;

    if let RespondOutcome::Applied { request } = &outcome {
        let kind = match request.status {
            RequestStatus::Accepted => "request.accepted",
            _ => "request.declined",
        };
        notify::dispatch(
            conn,
            &request.sender_id,
            kind,
            json!({ "requestId": request.id, "status": request.status.as_str() }),
        );
    }
    Ok(outcome)
}

/// Sender-side withdrawal; an implicit decline. No-op success once the
/// request is terminal.
pub fn cancel(
    conn: &Connection,
    request_id: &str,
    sender_id: &str,
) -> Result<RespondOutcome, EngineError> {
    let Some(request) = get(conn, request_id)? else {
        return Err(EngineError::NotFound("request"));
    };
    if request.sender_id != sender_id {
        return Err(EngineError::Forbidden(
            "only the sender can cancel this request".into(),
        ));
    }
    if request.status.is_terminal() {
        return Ok(RespondOutcome::AlreadyResolved { request });
    }

    let outcome = transition(conn, request_id, RequestStatus::Declined)?;
    if let RespondOutcome::Applied { request } = &outcome {
        notify::dispatch(
            conn,
            &request.receiver_id,
            "request.cancelled",
            json!({ "requestId": request.id }),
        );
    }
    Ok(outcome)
}

pub fn get(conn: &Connection, id: &str) -> Result<Option<Request>, EngineError> {
    let sql = format!("SELECT {REQUEST_COLUMNS} FROM requests WHERE id = ?");
    let request = conn.query_row(&sql, [id], row_to_request).optional()?;
    Ok(request)
}

/// Every request the user is a party to, newest first. Visibility
/// tombstones are applied by the caller, not here.
pub fn list_for_user(conn: &Connection, user_id: &str) -> Result<Vec<Request>, EngineError> {
    let sql = format!(
        "SELECT {REQUEST_COLUMNS} FROM requests
         WHERE sender_id = ?1 OR receiver_id = ?1
         ORDER BY requested_at DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([user_id], row_to_request)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// The slot the responder would take over by accepting. For substitutions
/// that is the advertised slot; for swaps it is the sender's offered slot.
fn conflict_target(request: &Request) -> Result<(String, String), EngineError> {
    let slot = match request.kind {
        RequestKind::Substitution => request.slot_id.clone(),
        RequestKind::Swap => request.slot_a_id.clone(),
    };
    let slot = slot.ok_or_else(|| {
        EngineError::Internal(format!("request {} is missing its slot", request.id))
    })?;
    Ok((request.date.clone(), slot))
}

fn transition(
    conn: &Connection,
    request_id: &str,
    new_status: RequestStatus,
) -> Result<RespondOutcome, EngineError> {
    let n = conn.execute(
        "UPDATE requests SET status = ?, responded_at = ? WHERE id = ? AND status = 'pending'",
        (new_status.as_str(), Utc::now().to_rfc3339(), request_id),
    )?;
    let Some(request) = get(conn, request_id)? else {
        return Err(EngineError::NotFound("request"));
    };
    if n == 0 {
        // A concurrent responder won the conditional write; report the
        // terminal state they produced.
        Ok(RespondOutcome::AlreadyResolved { request })
    } else {
        Ok(RespondOutcome::Applied { request })
    }
}

fn row_to_request(row: &rusqlite::Row<'_>) -> rusqlite::Result<Request> {
    let kind_raw: String = row.get(1)?;
    let kind = RequestKind::parse(&kind_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            format!("unknown request kind {kind_raw:?}").into(),
        )
    })?;
    let status_raw: String = row.get(8)?;
    let status = RequestStatus::parse(&status_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            8,
            rusqlite::types::Type::Text,
            format!("unknown request status {status_raw:?}").into(),
        )
    })?;
    Ok(Request {
        id: row.get(0)?,
        kind,
        sender_id: row.get(2)?,
        receiver_id: row.get(3)?,
        date: row.get(4)?,
        slot_id: row.get(5)?,
        slot_a_id: row.get(6)?,
        slot_b_id: row.get(7)?,
        status,
        requested_at: row.get(9)?,
        responded_at: row.get(10)?,
    })
}
