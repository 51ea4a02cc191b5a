use serde_json::{json, Value};

use crate::ipc::helpers::{self, optional_str, require_str, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::schedule::{self, SessionDraft};

fn put(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let draft = SessionDraft {
        faculty_id: require_str(params, "facultyId")?,
        date: require_str(params, "date")?,
        slot_id: require_str(params, "slotId")?,
        class_id: optional_str(params, "classId")?,
        subject: optional_str(params, "subject")?,
    };
    let store = helpers::store(state)?;
    let session = schedule::put(store, &draft)?;
    Ok(json!({ "session": session }))
}

fn list(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let faculty_id = require_str(params, "facultyId")?;
    let date = optional_str(params, "date")?;
    let store = helpers::store(state)?;
    let sessions = schedule::list_for_faculty(store, &faculty_id, date.as_deref())?;
    Ok(json!({ "sessions": sessions }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "schedule.put" => Some(respond(req, put(state, &req.params))),
        "schedule.list" => Some(respond(req, list(state, &req.params))),
        _ => None,
    }
}
