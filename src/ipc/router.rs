use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::err;
use crate::preview::PreviewTicket;

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    if let Some(resp) = handlers::core::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::records::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::preview::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::batch::try_handle(state, &req) {
        return resp;
    }

    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}

pub fn handle_preview_done(
    state: &mut AppState,
    session: u64,
    ticket: PreviewTicket,
    reply: anyhow::Result<Vec<String>>,
) {
    handlers::preview::complete(state, session, ticket, reply);
}
