use serde_json::{json, Value};

use crate::db;
use crate::ipc::helpers::{self, require_str, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};

fn cache_key(class_id: &str) -> String {
    format!("watchlist.{}", class_id)
}

/// Caches the incharge's last-known critical-student list so the watchlist
/// screen can render offline. Local-only; works regardless of connectivity.
fn save(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = require_str(params, "classId")?;
    let students = params
        .get("students")
        .cloned()
        .ok_or_else(|| HandlerErr::new("bad_params", "missing students"))?;
    if !students.is_array() {
        return Err(HandlerErr::new("bad_params", "students must be an array"));
    }

    let local = helpers::local(state)?;
    db::kv_set_json(local, &cache_key(&class_id), &students)
        .map_err(|e| HandlerErr::new("db_failed", format!("{e:?}")))?;
    Ok(json!({ "saved": true }))
}

fn get(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = require_str(params, "classId")?;
    let local = helpers::local(state)?;
    let cached = db::kv_get_json(local, &cache_key(&class_id))
        .map_err(|e| HandlerErr::new("db_failed", format!("{e:?}")))?;
    match cached {
        Some((students, updated_at)) => Ok(json!({
            "classId": class_id,
            "students": students,
            "updatedAt": updated_at,
        })),
        None => Ok(json!({
            "classId": class_id,
            "students": Value::Null,
            "updatedAt": Value::Null,
        })),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "watchlist.save" => Some(respond(req, save(state, &req.params))),
        "watchlist.get" => Some(respond(req, get(state, &req.params))),
        _ => None,
    }
}
