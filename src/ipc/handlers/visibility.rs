use serde_json::{json, Value};

use crate::ipc::helpers::{self, require_str, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::outbox::{self, ActionPayload};
use crate::visibility;

fn hide(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let user_id = require_str(params, "userId")?;
    let item_id = require_str(params, "itemId")?;
    let item_type = require_str(params, "itemType")?;
    if item_type != visibility::ITEM_TYPE_REQUEST
        && item_type != visibility::ITEM_TYPE_NOTIFICATION
    {
        return Err(HandlerErr::new(
            "bad_params",
            format!("unknown itemType {item_type:?}"),
        ));
    }

    if !state.online {
        let local = helpers::local(state)?;
        let description = format!("hide {} {} for {}", item_type, item_id, user_id);
        let action = outbox::enqueue(
            local,
            &description,
            &ActionPayload::HideItem {
                user_id,
                item_id,
                item_type,
            },
        )?;
        return Ok(json!({ "queued": true, "action": action }));
    }

    let store = helpers::store(state)?;
    let tombstone = visibility::hide(store, &user_id, &item_id, &item_type)?;
    Ok(json!({ "queued": false, "tombstone": tombstone }))
}

fn visible(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let user_id = require_str(params, "userId")?;
    let item_id = require_str(params, "itemId")?;
    let store = helpers::store(state)?;
    let visible = visibility::is_visible(store, &user_id, &item_id)?;
    Ok(json!({ "visible": visible }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "items.hide" => Some(respond(req, hide(state, &req.params))),
        "items.visible" => Some(respond(req, visible(state, &req.params))),
        _ => None,
    }
}
