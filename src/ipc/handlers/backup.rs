use serde_json::{json, Value};
use std::path::PathBuf;

use crate::backup;
use crate::db;
use crate::ipc::helpers::{require_str, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};

fn export_bundle(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let out_path = PathBuf::from(require_str(params, "outPath")?);
    let workspace = state
        .workspace
        .clone()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))?;

    let summary = backup::export_workspace_bundle(&workspace, &out_path)
        .map_err(|e| HandlerErr::new("backup_failed", format!("{e:?}")))?;
    Ok(json!({
        "bundleFormat": summary.bundle_format,
        "entryCount": summary.entry_count,
        "outPath": out_path.to_string_lossy(),
    }))
}

/// Replaces the selected workspace's databases with the bundle's contents
/// and reopens them.
fn import_bundle(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let in_path = PathBuf::from(require_str(params, "inPath")?);
    let workspace = state
        .workspace
        .clone()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))?;

    // Close open handles before swapping the files underneath them.
    state.store = None;
    state.local = None;

    let summary = backup::import_workspace_bundle(&in_path, &workspace)
        .map_err(|e| HandlerErr::new("backup_failed", format!("{e:?}")))?;

    let store = db::open_store(&workspace)
        .map_err(|e| HandlerErr::new("db_open_failed", format!("{e:?}")))?;
    let local = db::open_outbox(&workspace)
        .map_err(|e| HandlerErr::new("db_open_failed", format!("{e:?}")))?;
    state.store = Some(store);
    state.local = Some(local);

    Ok(json!({ "bundleFormatDetected": summary.bundle_format_detected }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "workspace.exportBundle" => Some(respond(req, export_bundle(state, &req.params))),
        "workspace.importBundle" => Some(respond(req, import_bundle(state, &req.params))),
        _ => None,
    }
}
