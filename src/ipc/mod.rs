mod error;
mod handlers;
mod helpers;
mod router;
mod types;

pub use router::{handle_preview_done, handle_request};
pub use types::{AppState, LoopEvent, Request};
