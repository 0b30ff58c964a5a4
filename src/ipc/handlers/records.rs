use crate::codec;
use crate::error::ComposerError;
use crate::ipc::error::{err, fail, ok};
use crate::ipc::helpers::{get_required_index, get_required_str, get_section};
use crate::ipc::types::{AppState, Request};
use crate::session::Composer;
use serde_json::json;

fn no_session(req: &Request) -> serde_json::Value {
    err(&req.id, "no_session", "open a session first", None)
}

fn handle_records_list(session: &mut Composer, req: &Request) -> serde_json::Value {
    ok(&req.id, session.view())
}

fn handle_records_add(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(session) = state.session.as_mut() else {
        return no_session(req);
    };
    let (index, ticket) = match session.add() {
        Ok(v) => v,
        Err(e) => return fail(&req.id, &e),
    };
    let count = session.records().count();
    let record = session.records().view(index);
    state.dispatch_preview(ticket);
    ok(
        &req.id,
        json!({ "index": index, "count": count, "record": record }),
    )
}

fn handle_records_remove(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(session) = state.session.as_mut() else {
        return no_session(req);
    };
    let index = match get_required_index(&req.params, "index") {
        Ok(v) => v,
        Err(e) => return fail(&req.id, &e),
    };
    let ticket = match session.remove(index) {
        Ok(t) => t,
        Err(e) => return fail(&req.id, &e),
    };
    let count = session.records().count();
    state.dispatch_preview(ticket);
    ok(&req.id, json!({ "removedIndex": index, "count": count }))
}

fn handle_records_set_field(session: &mut Composer, req: &Request) -> serde_json::Value {
    let parsed = (|| -> Result<_, ComposerError> {
        let section = get_section(&req.params)?;
        // A form key addresses the field the way the page names its inputs.
        if let Some(key) = req.params.get("key").and_then(|v| v.as_str()) {
            let (index, field) = codec::parse_field_key(key.trim())
                .ok_or_else(|| ComposerError::BadParams(format!("malformed field key {}", key)))?;
            return Ok((index, section, field.to_string()));
        }
        Ok((
            get_required_index(&req.params, "index")?,
            section,
            get_required_str(&req.params, "field")?.trim().to_string(),
        ))
    })();
    let (index, section, field) = match parsed {
        Ok(v) => v,
        Err(e) => return fail(&req.id, &e),
    };
    let Some(raw) = req.params.get("value") else {
        return err(&req.id, "bad_params", "missing value", None);
    };

    match session.set_field(index, section, &field, raw) {
        Ok(value) => ok(
            &req.id,
            json!({
                "index": index,
                "section": section.as_str(),
                "field": field,
                "value": value,
                "label": session.records().label(index),
            }),
        ),
        Err(e) => fail(&req.id, &e),
    }
}

fn handle_records_reindex(session: &mut Composer, req: &Request) -> serde_json::Value {
    match session.reindex() {
        Ok(changed) => ok(&req.id, json!({ "changed": changed })),
        Err(e) => fail(&req.id, &e),
    }
}

fn handle_records_encode(session: &mut Composer, req: &Request) -> serde_json::Value {
    let fields: Vec<serde_json::Value> = codec::encode_form(session.records())
        .into_iter()
        .map(|(k, v)| json!([k, v]))
        .collect();
    ok(&req.id, json!({ "fields": fields }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let with_session = |state: &mut AppState, f: fn(&mut Composer, &Request) -> serde_json::Value| {
        match state.session.as_mut() {
            Some(session) => f(session, req),
            None => no_session(req),
        }
    };
    match req.method.as_str() {
        "records.list" => Some(with_session(state, handle_records_list)),
        "records.add" => Some(handle_records_add(state, req)),
        "records.remove" => Some(handle_records_remove(state, req)),
        "records.setField" => Some(with_session(state, handle_records_set_field)),
        "records.reindex" => Some(with_session(state, handle_records_reindex)),
        "records.encode" => Some(with_session(state, handle_records_encode)),
        _ => None,
    }
}
