use serde_json::{json, Value};

use crate::ipc::helpers::{self, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::outbox;

fn list(state: &mut AppState, _params: &Value) -> Result<Value, HandlerErr> {
    let local = helpers::local(state)?;
    let actions = outbox::list(local)?;
    Ok(json!({ "actions": actions }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "outbox.list" => Some(respond(req, list(state, &req.params))),
        _ => None,
    }
}
