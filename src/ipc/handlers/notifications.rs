use serde_json::{json, Value};

use crate::ipc::helpers::{self, require_str, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::notify;
use crate::outbox::{self, ActionPayload};
use crate::visibility;

fn list(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let user_id = require_str(params, "userId")?;
    let store = helpers::store(state)?;
    let rows = notify::list_for_user(store, &user_id)?;
    // Broadcast rows may have been dismissed via tombstone.
    let visible = visibility::filter_visible(store, &user_id, rows, |n| n.id.as_str())?;
    Ok(json!({ "notifications": visible }))
}

fn delete(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let user_id = require_str(params, "userId")?;
    let notification_id = require_str(params, "notificationId")?;

    if !state.online {
        let local = helpers::local(state)?;
        let description = format!("delete notification {}", notification_id);
        let action = outbox::enqueue(
            local,
            &description,
            &ActionPayload::DeleteNotification {
                user_id,
                notification_id,
            },
        )?;
        return Ok(json!({ "queued": true, "action": action }));
    }

    let store = helpers::store(state)?;
    let removed = notify::delete_own(store, &user_id, &notification_id)?;
    Ok(json!({ "queued": false, "removed": removed }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "notifications.list" => Some(respond(req, list(state, &req.params))),
        "notifications.delete" => Some(respond(req, delete(state, &req.params))),
        _ => None,
    }
}
