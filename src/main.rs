mod codec;
mod config;
mod error;
mod ipc;
mod preview;
mod records;
mod schema;
mod session;
mod submit;
mod title;
mod transport;
mod validate;

use std::io::{self, BufRead, Write};
use std::sync::mpsc;
use std::thread;

use tracing_subscriber::EnvFilter;

fn init_tracing() {
    // stdout carries the IPC stream.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("enrollbatchd=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(false)
        .try_init();
}

fn write_line(stdout: &mut io::Stdout, value: &serde_json::Value) {
    let _ = writeln!(
        stdout,
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{\"ok\":false}".to_string())
    );
    let _ = stdout.flush();
}

fn main() {
    init_tracing();

    let (tx, rx) = mpsc::channel::<ipc::LoopEvent>();
    let reader_tx = tx.clone();
    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if reader_tx.send(ipc::LoopEvent::Line(line)).is_err() {
                return;
            }
        }
        let _ = reader_tx.send(ipc::LoopEvent::InputClosed);
    });

    let mut state = ipc::AppState::new(Some(tx));
    let mut stdout = io::stdout();
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "enrollbatchd started");

    for event in rx {
        match event {
            ipc::LoopEvent::Line(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                let req: ipc::Request = match serde_json::from_str(&line) {
                    Ok(v) => v,
                    Err(e) => {
                        // Can't reply without id.
                        write_line(
                            &mut stdout,
                            &serde_json::json!({
                                "ok": false,
                                "error": { "code": "bad_json", "message": e.to_string() }
                            }),
                        );
                        continue;
                    }
                };
                let resp = ipc::handle_request(&mut state, req);
                write_line(&mut stdout, &resp);
            }
            ipc::LoopEvent::PreviewDone {
                session,
                ticket,
                reply,
            } => ipc::handle_preview_done(&mut state, session, ticket, reply),
            ipc::LoopEvent::InputClosed => break,
        }
        for note in state.drain_notifications() {
            write_line(&mut stdout, &note);
        }
    }
    tracing::info!("stdin closed, exiting");
}
