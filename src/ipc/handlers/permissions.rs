use serde_json::{json, Value};

use crate::ipc::helpers::{
    self, optional_bool, optional_str, require_str, respond, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::model::PermissionKind;
use crate::outbox::{self, ActionPayload};
use crate::permissions::{self, PermissionDraft, PermissionPatch};

fn parse_kind(params: &Value) -> Result<PermissionKind, HandlerErr> {
    let raw = require_str(params, "kind")?;
    PermissionKind::parse(&raw)
        .ok_or_else(|| HandlerErr::new("bad_params", format!("kind must be leave or od, got {raw:?}")))
}

fn draft_from_params(params: &Value) -> Result<PermissionDraft, HandlerErr> {
    Ok(PermissionDraft {
        student_id: require_str(params, "studentId")?,
        kind: parse_kind(params)?,
        category: optional_str(params, "category")?,
        reason: optional_str(params, "reason")?,
        start_date: require_str(params, "startDate")?,
        end_date: require_str(params, "endDate")?,
        start_time: optional_str(params, "startTime")?,
        end_time: optional_str(params, "endTime")?,
        granted_by: require_str(params, "grantedBy")?,
    })
}

fn patch_from_params(params: &Value) -> Result<PermissionPatch, HandlerErr> {
    Ok(PermissionPatch {
        start_date: optional_str(params, "startDate")?,
        end_date: optional_str(params, "endDate")?,
        reason: optional_str(params, "reason")?,
        category: optional_str(params, "category")?,
        start_time: optional_str(params, "startTime")?,
        end_time: optional_str(params, "endTime")?,
    })
}

fn grant(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let draft = draft_from_params(params)?;
    // Validation never defers to the queue; a bad draft fails even offline.
    permissions::validate_draft(&draft)?;

    if !state.online {
        let local = helpers::local(state)?;
        let description = format!("grant {} permission to {}", draft.kind, draft.student_id);
        let action = outbox::enqueue(local, &description, &ActionPayload::GrantPermission { draft })?;
        return Ok(json!({ "queued": true, "action": action }));
    }

    let store = helpers::store(state)?;
    let permission = permissions::grant(store, &draft)?;
    Ok(json!({ "queued": false, "permission": permission }))
}

fn update(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let id = require_str(params, "id")?;
    let patch = patch_from_params(params)?;
    permissions::validate_patch(&patch)?;

    if !state.online {
        let local = helpers::local(state)?;
        let description = format!("update permission {}", id);
        let action =
            outbox::enqueue(local, &description, &ActionPayload::UpdatePermission { id, patch })?;
        return Ok(json!({ "queued": true, "action": action }));
    }

    let store = helpers::store(state)?;
    let permission = permissions::update(store, &id, &patch)?;
    Ok(json!({ "queued": false, "permission": permission }))
}

fn revoke(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let id = require_str(params, "id")?;

    if !state.online {
        let local = helpers::local(state)?;
        let description = format!("revoke permission {}", id);
        let action = outbox::enqueue(local, &description, &ActionPayload::RevokePermission { id })?;
        return Ok(json!({ "queued": true, "action": action }));
    }

    let store = helpers::store(state)?;
    let removed = permissions::revoke(store, &id)?;
    Ok(json!({ "queued": false, "removed": removed }))
}

fn list(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = require_str(params, "studentId")?;
    let active_only = optional_bool(params, "activeOnly")?.unwrap_or(true);
    let store = helpers::store(state)?;
    let rows = permissions::list_for_student(store, &student_id, active_only)?;
    Ok(json!({ "permissions": rows }))
}

fn check_overlap(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = require_str(params, "studentId")?;
    let kind = parse_kind(params)?;
    let start_date = require_str(params, "startDate")?;
    let end_date = require_str(params, "endDate")?;
    let exclude_id = optional_str(params, "excludeId")?;

    let store = helpers::store(state)?;
    let conflicting = permissions::check_overlap(
        store,
        &student_id,
        kind,
        &start_date,
        &end_date,
        exclude_id.as_deref(),
    )?;
    Ok(json!({ "overlap": conflicting.is_some(), "conflicting": conflicting }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "permissions.grant" => Some(respond(req, grant(state, &req.params))),
        "permissions.update" => Some(respond(req, update(state, &req.params))),
        "permissions.revoke" => Some(respond(req, revoke(state, &req.params))),
        "permissions.list" => Some(respond(req, list(state, &req.params))),
        "permissions.checkOverlap" => Some(respond(req, check_overlap(state, &req.params))),
        _ => None,
    }
}
