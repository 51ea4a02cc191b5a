use serde_json::{json, Value};

use crate::ipc::helpers::{
    self, optional_bool, optional_str, require_str, respond, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::model::RequestKind;
use crate::outbox::{self, ActionPayload};
use crate::requests::{self, RequestDraft, RespondAction, RespondOutcome};
use crate::visibility;

fn draft_from_params(params: &Value) -> Result<RequestDraft, HandlerErr> {
    let raw_kind = require_str(params, "kind")?;
    let kind = RequestKind::parse(&raw_kind).ok_or_else(|| {
        HandlerErr::new(
            "bad_params",
            format!("kind must be substitution or swap, got {raw_kind:?}"),
        )
    })?;
    Ok(RequestDraft {
        kind,
        sender_id: require_str(params, "senderId")?,
        receiver_id: require_str(params, "receiverId")?,
        date: require_str(params, "date")?,
        slot_id: optional_str(params, "slotId")?,
        slot_a_id: optional_str(params, "slotAId")?,
        slot_b_id: optional_str(params, "slotBId")?,
    })
}

fn parse_action(params: &Value) -> Result<RespondAction, HandlerErr> {
    let raw = require_str(params, "action")?;
    RespondAction::parse(&raw).ok_or_else(|| {
        HandlerErr::new(
            "bad_params",
            format!("action must be accept or decline, got {raw:?}"),
        )
    })
}

fn outcome_to_result(outcome: RespondOutcome) -> Result<Value, HandlerErr> {
    match outcome {
        RespondOutcome::Applied { request } => Ok(json!({
            "queued": false,
            "applied": true,
            "status": request.status.as_str(),
            "request": request,
        })),
        RespondOutcome::AlreadyResolved { request } => Ok(json!({
            "queued": false,
            "applied": false,
            "status": request.status.as_str(),
            "request": request,
        })),
        RespondOutcome::ScheduleConflict { request, session } => Err(HandlerErr::with_details(
            "schedule_conflict",
            format!(
                "already scheduled on {} slot {}; retry with override to accept anyway",
                session.date, session.slot_id
            ),
            json!({ "session": session, "request": request }),
        )),
    }
}

fn create(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let draft = draft_from_params(params)?;
    requests::validate_draft(&draft)?;

    if !state.online {
        let local = helpers::local(state)?;
        let description = format!(
            "create {} request to {}",
            draft.kind, draft.receiver_id
        );
        let action = outbox::enqueue(local, &description, &ActionPayload::CreateRequest { draft })?;
        return Ok(json!({ "queued": true, "action": action }));
    }

    let store = helpers::store(state)?;
    let request = requests::create(store, &draft)?;
    Ok(json!({ "queued": false, "request": request }))
}

fn respond_to_request(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let request_id = require_str(params, "requestId")?;
    let responder_id = require_str(params, "responderId")?;
    let action = parse_action(params)?;
    let override_conflict = optional_bool(params, "override")?.unwrap_or(false);

    if !state.online {
        let local = helpers::local(state)?;
        let description = format!(
            "respond {} to request {}",
            match action {
                RespondAction::Accept => "accept",
                RespondAction::Decline => "decline",
            },
            request_id
        );
        let action = outbox::enqueue(
            local,
            &description,
            &ActionPayload::RespondRequest {
                request_id,
                responder_id,
                action,
                override_conflict,
            },
        )?;
        return Ok(json!({ "queued": true, "action": action }));
    }

    let store = helpers::store(state)?;
    let outcome = requests::respond(store, &request_id, &responder_id, action, override_conflict)?;
    outcome_to_result(outcome)
}

fn cancel(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let request_id = require_str(params, "requestId")?;
    let sender_id = require_str(params, "senderId")?;

    if !state.online {
        let local = helpers::local(state)?;
        let description = format!("cancel request {}", request_id);
        let action = outbox::enqueue(
            local,
            &description,
            &ActionPayload::CancelRequest {
                request_id,
                sender_id,
            },
        )?;
        return Ok(json!({ "queued": true, "action": action }));
    }

    let store = helpers::store(state)?;
    let outcome = requests::cancel(store, &request_id, &sender_id)?;
    outcome_to_result(outcome)
}

fn list(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let user_id = require_str(params, "userId")?;
    let store = helpers::store(state)?;
    let rows = requests::list_for_user(store, &user_id)?;
    let visible = visibility::filter_visible(store, &user_id, rows, |r| r.id.as_str())?;
    Ok(json!({ "requests": visible }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "requests.create" => Some(respond(req, create(state, &req.params))),
        "requests.respond" => Some(respond(req, respond_to_request(state, &req.params))),
        "requests.cancel" => Some(respond(req, cancel(state, &req.params))),
        "requests.list" => Some(respond(req, list(state, &req.params))),
        _ => None,
    }
}
