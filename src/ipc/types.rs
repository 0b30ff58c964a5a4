use serde::Deserialize;
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread;
use tracing::debug;

use crate::preview::PreviewTicket;
use crate::session::Composer;
use crate::transport::Transport;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Everything the main loop reacts to, in arrival order.
pub enum LoopEvent {
    Line(String),
    PreviewDone {
        session: u64,
        ticket: PreviewTicket,
        reply: anyhow::Result<Vec<String>>,
    },
    InputClosed,
}

pub struct AppState {
    pub session: Option<Composer>,
    /// Bumped on every `session.open`; late preview replies from an earlier
    /// session are dropped.
    pub session_serial: u64,
    pub transport: Option<Arc<dyn Transport>>,
    pub outbox: Vec<serde_json::Value>,
    events: Option<Sender<LoopEvent>>,
}

impl AppState {
    pub fn new(events: Option<Sender<LoopEvent>>) -> Self {
        Self {
            session: None,
            session_serial: 0,
            transport: None,
            outbox: Vec::new(),
            events,
        }
    }

    /// Runs the preview request off the main loop; the reply comes back as a
    /// `LoopEvent::PreviewDone`.
    pub fn dispatch_preview(&self, ticket: Option<PreviewTicket>) {
        let (Some(ticket), Some(transport), Some(tx)) =
            (ticket, self.transport.clone(), self.events.clone())
        else {
            return;
        };
        let session = self.session_serial;
        debug!(session, epoch = ticket.epoch, quantity = ticket.quantity, "dispatching preview");
        thread::spawn(move || {
            let reply = transport.fetch_previews(ticket.quantity);
            let _ = tx.send(LoopEvent::PreviewDone {
                session,
                ticket,
                reply,
            });
        });
    }

    /// Notifications produced since the last call, session events first.
    pub fn drain_notifications(&mut self) -> Vec<serde_json::Value> {
        let mut out: Vec<serde_json::Value> = self
            .session
            .as_mut()
            .map(|s| s.drain_events())
            .unwrap_or_default()
            .iter()
            .map(|e| e.to_notification())
            .collect();
        out.append(&mut self.outbox);
        out
    }
}
