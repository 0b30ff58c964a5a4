use crate::config::SessionConfig;
use crate::ipc::error::{fail, ok};
use crate::ipc::types::{AppState, Request};
use crate::session::{ChangeEvent, Composer};
use crate::transport::HttpTransport;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "sessionOpen": state.session.as_ref().map(|s| !s.is_finished()).unwrap_or(false)
        }),
    )
}

fn handle_session_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let config = match SessionConfig::from_params(&req.params) {
        Ok(c) => c,
        Err(e) => return fail(&req.id, &e),
    };
    let mut composer = match Composer::open(&config) {
        Ok(c) => c,
        Err(e) => return fail(&req.id, &e),
    };

    state.session_serial += 1;
    state.transport = Some(Arc::new(HttpTransport::new(&config)));
    let ticket = composer.refresh_previews();
    let mut result = composer.describe();
    let view = composer.view();
    result["records"] = view["records"].clone();
    state.session = Some(composer);
    state.dispatch_preview(ticket);
    info!(serial = state.session_serial, base_url = %config.base_url, "session ready");

    ok(&req.id, result)
}

fn handle_session_close(state: &mut AppState, req: &Request) -> serde_json::Value {
    if state.session.take().is_some() {
        state.transport = None;
        state
            .outbox
            .push(ChangeEvent::SessionClosed.to_notification());
    }
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "session.open" => Some(handle_session_open(state, req)),
        "session.close" => Some(handle_session_close(state, req)),
        _ => None,
    }
}
