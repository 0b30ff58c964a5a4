use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::preview::PreviewTicket;
use serde_json::json;
use tracing::debug;

fn handle_preview_refresh(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(session) = state.session.as_mut() else {
        return err(&req.id, "no_session", "open a session first", None);
    };
    let ticket = session.refresh_previews();
    state.dispatch_preview(ticket);
    match ticket {
        Some(t) => ok(&req.id, json!({ "requested": t.quantity, "epoch": t.epoch })),
        None => ok(&req.id, json!({ "requested": 0 })),
    }
}

/// Feeds a finished preview request back into the session it was issued for.
pub fn complete(
    state: &mut AppState,
    session: u64,
    ticket: PreviewTicket,
    reply: anyhow::Result<Vec<String>>,
) {
    if session != state.session_serial {
        debug!(session, current = state.session_serial, "preview reply for a closed session");
        return;
    }
    let Some(composer) = state.session.as_mut() else {
        return;
    };
    let reissue = composer.complete_preview(ticket, reply);
    state.dispatch_preview(reissue);
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "preview.refresh" => Some(handle_preview_refresh(state, req)),
        _ => None,
    }
}
