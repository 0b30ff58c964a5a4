use anyhow::{anyhow, Context};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::SessionConfig;

pub const CSRF_HEADER: &str = "X-CSRFToken";

/// The remote allocator/persistence service.
pub trait Transport: Send + Sync {
    /// `GET <preview>?quantidade=<n>`; identifiers in record order.
    fn fetch_previews(&self, quantity: usize) -> anyhow::Result<Vec<String>>;

    /// `POST <submit>` with the anti-forgery header; returns the decoded reply.
    fn post_batch(&self, body: &Value, csrf_token: &str) -> anyhow::Result<Value>;
}

pub struct HttpTransport {
    agent: ureq::Agent,
    preview_url: String,
    submit_url: String,
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// `{ "matriculas": [..] }`; a reply without the list is an error, not an
/// empty assignment.
fn parse_preview_reply(reply: &Value) -> anyhow::Result<Vec<String>> {
    let ids = reply
        .get("matriculas")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow!("preview reply has no matriculas list"))?;
    Ok(ids
        .iter()
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect())
}

impl HttpTransport {
    pub fn new(config: &SessionConfig) -> Self {
        let timeout = Duration::from_millis(config.timeout_ms);
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .timeout_write(timeout)
            .build();
        Self {
            agent,
            preview_url: join_url(&config.base_url, &config.preview_path),
            submit_url: join_url(&config.base_url, &config.submit_path),
        }
    }
}

impl Transport for HttpTransport {
    fn fetch_previews(&self, quantity: usize) -> anyhow::Result<Vec<String>> {
        debug!(quantity, url = %self.preview_url, "requesting preview identifiers");
        let reply: Value = match self
            .agent
            .get(&self.preview_url)
            .query("quantidade", &quantity.to_string())
            .call()
        {
            Ok(resp) => resp.into_json().context("preview reply is not JSON")?,
            Err(ureq::Error::Status(code, _)) => {
                return Err(anyhow!("preview failed with http status {}", code))
            }
            Err(ureq::Error::Transport(err)) => {
                return Err(anyhow!("preview transport error: {}", err))
            }
        };
        parse_preview_reply(&reply)
    }

    fn post_batch(&self, body: &Value, csrf_token: &str) -> anyhow::Result<Value> {
        if csrf_token.is_empty() {
            warn!("submitting batch without an anti-forgery token");
        }
        let result = self
            .agent
            .post(&self.submit_url)
            .set(CSRF_HEADER, csrf_token)
            .send_json(body);
        match result {
            Ok(resp) => resp.into_json().context("batch reply is not JSON"),
            // The service answers rejected batches with an error status and a
            // regular `{status, mensagem}` body.
            Err(ureq::Error::Status(code, resp)) => {
                let raw = resp.into_string().unwrap_or_default();
                match serde_json::from_str::<Value>(&raw) {
                    Ok(v) if v.get("status").is_some() => Ok(v),
                    _ => Err(anyhow!("batch failed with http status {}", code)),
                }
            }
            Err(ureq::Error::Transport(err)) => Err(anyhow!("batch transport error: {}", err)),
        }
    }
}
