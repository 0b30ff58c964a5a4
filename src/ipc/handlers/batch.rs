use crate::ipc::error::{err, fail, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_batch_validate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(session) = state.session.as_ref() else {
        return err(&req.id, "no_session", "open a session first", None);
    };
    match session.validate() {
        Ok(()) => ok(&req.id, json!({ "ok": true })),
        Err(e) => fail(&req.id, &e),
    }
}

fn handle_batch_submit(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (Some(session), Some(transport)) = (state.session.as_mut(), state.transport.clone()) else {
        return err(&req.id, "no_session", "open a session first", None);
    };
    match session.submit(transport.as_ref()) {
        Ok(receipt) => ok(
            &req.id,
            json!({
                "status": "success",
                "total": receipt.total,
                "navigateTo": receipt.navigate_to,
                "previouslyAccepted": receipt.previously_accepted,
            }),
        ),
        Err(e) => fail(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "batch.validate" => Some(handle_batch_validate(state, req)),
        "batch.submit" => Some(handle_batch_submit(state, req)),
        _ => None,
    }
}
