use serde_json::{json, Value};
use std::path::PathBuf;

use crate::db;
use crate::ipc::helpers::{self, require_bool, require_str, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::outbox;

fn health(state: &mut AppState, _params: &Value) -> Result<Value, HandlerErr> {
    Ok(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
        "online": state.online,
    }))
}

fn workspace_select(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let path = PathBuf::from(require_str(params, "path")?);

    let store = db::open_store(&path)
        .map_err(|e| HandlerErr::new("db_open_failed", format!("{e:?}")))?;
    let local = db::open_outbox(&path)
        .map_err(|e| HandlerErr::new("db_open_failed", format!("{e:?}")))?;

    state.workspace = Some(path.clone());
    state.store = Some(store);
    state.local = Some(local);
    Ok(json!({ "workspacePath": path.to_string_lossy() }))
}

/// `connectivity.set` is the online/offline signal. The outbox flushes on
/// each offline→online edge, exactly once; a repeated `online: true` is not
/// an edge and does not flush.
fn connectivity_set(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let online = require_bool(params, "online")?;
    let was_online = state.online;
    state.online = online;

    if !online || was_online {
        return Ok(json!({ "online": online, "flush": Value::Null }));
    }
    if state.flushing {
        return Ok(json!({ "online": true, "flush": "inProgress" }));
    }

    state.flushing = true;
    let outcome = run_flush(state);
    state.flushing = false;
    let report = outcome?;
    Ok(json!({ "online": true, "flush": report }))
}

fn run_flush(state: &mut AppState) -> Result<Value, HandlerErr> {
    let store = helpers::store(state)?;
    let local = helpers::local(state)?;
    let report = outbox::flush(store, local)?;
    serde_json::to_value(&report).map_err(|e| HandlerErr::new("unknown", e.to_string()))
}

fn connectivity_status(state: &mut AppState, _params: &Value) -> Result<Value, HandlerErr> {
    let queued = match state.local.as_ref() {
        Some(local) => Some(outbox::pending_count(local)?),
        None => None,
    };
    Ok(json!({ "online": state.online, "queuedActions": queued }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(respond(req, health(state, &req.params))),
        "workspace.select" => Some(respond(req, workspace_select(state, &req.params))),
        "connectivity.set" => Some(respond(req, connectivity_set(state, &req.params))),
        "connectivity.status" => Some(respond(req, connectivity_status(state, &req.params))),
        _ => None,
    }
}
