use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use tracing::{info, warn};

use crate::codec;
use crate::error::{ComposerError, RecordFailure};
use crate::records::RecordSet;
use crate::schema::FieldMap;
use crate::transport::Transport;
use crate::validate::{validate_for_submit, SubmitRules};

/// The service's three-way answer, keyed by its `status` discriminant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchReply {
    Success { total: usize },
    Partial { failures: Vec<RecordFailure> },
    Failure { message: Option<String> },
}

pub fn interpret_reply(reply: &Value) -> BatchReply {
    match reply.get("status").and_then(Value::as_str) {
        Some("sucesso") => BatchReply::Success {
            total: reply
                .get("total")
                .and_then(Value::as_u64)
                .unwrap_or_default() as usize,
        },
        Some("parcial") => {
            let failures = reply
                .get("erros")
                .and_then(Value::as_array)
                .map(|errs| {
                    errs.iter()
                        .map(|e| RecordFailure {
                            record: text_of(e.get("aluno")),
                            reason: text_of(e.get("erro")),
                        })
                        .collect()
                })
                .unwrap_or_default();
            BatchReply::Partial { failures }
        }
        _ => BatchReply::Failure {
            message: reply
                .get("mensagem")
                .and_then(Value::as_str)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
        },
    }
}

fn text_of(v: Option<&Value>) -> String {
    match v {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitReceipt {
    pub total: usize,
    pub navigate_to: String,
    /// 1-based positions whose content was already accepted by an earlier
    /// partially failed submit.
    pub previously_accepted: Vec<usize>,
}

#[derive(Debug)]
pub struct BatchSubmitter {
    rules: SubmitRules,
    csrf_token: String,
    success_redirect: String,
    fallback_message: String,
    /// Fields left out of content fingerprints.
    volatile_fields: Vec<String>,
    accepted: HashSet<[u8; 32]>,
}

impl BatchSubmitter {
    pub fn new(
        rules: SubmitRules,
        csrf_token: String,
        success_redirect: String,
        fallback_message: String,
        volatile_fields: Vec<String>,
    ) -> Self {
        Self {
            rules,
            csrf_token,
            success_redirect,
            fallback_message,
            volatile_fields,
            accepted: HashSet::new(),
        }
    }

    pub fn validate(&self, set: &RecordSet) -> Result<(), ComposerError> {
        validate_for_submit(&set.flatten(), &self.rules)
    }

    /// Validates, posts once and interprets the reply. Nothing is retried and
    /// the record set is never modified here.
    pub fn submit(
        &mut self,
        set: &RecordSet,
        transport: &dyn Transport,
    ) -> Result<SubmitReceipt, ComposerError> {
        let records = set.flatten();
        validate_for_submit(&records, &self.rules)?;

        let previously_accepted: Vec<usize> = records
            .iter()
            .enumerate()
            .filter(|(_, r)| self.accepted.contains(&self.fingerprint(r)))
            .map(|(i, _)| i + 1)
            .collect();
        if !previously_accepted.is_empty() {
            warn!(?previously_accepted, "resubmitting records the service already accepted");
        }

        let body = codec::batch_payload(set);
        let reply = transport
            .post_batch(&body, &self.csrf_token)
            .map_err(|e| ComposerError::NetworkFailure(format!("{e:#}")))?;

        match interpret_reply(&reply) {
            BatchReply::Success { total } => {
                info!(total, "batch accepted");
                Ok(SubmitReceipt {
                    total,
                    navigate_to: self.success_redirect.clone(),
                    previously_accepted,
                })
            }
            BatchReply::Partial { failures } => {
                let rejected: HashSet<&str> =
                    failures.iter().map(|f| f.record.trim()).collect();
                let name_field = set.titles().name_field();
                for (i, record) in records.iter().enumerate() {
                    let name = record.get(name_field).and_then(Value::as_str).unwrap_or("");
                    let label = set.label(i).unwrap_or("");
                    if rejected.contains(name) || rejected.contains(label) {
                        continue;
                    }
                    let fp = self.fingerprint(record);
                    self.accepted.insert(fp);
                }
                warn!(rejected = failures.len(), "batch partially rejected");
                Err(ComposerError::PartialBatchFailure {
                    failures,
                    previously_accepted,
                })
            }
            BatchReply::Failure { message } => {
                warn!(?message, "batch rejected");
                Err(ComposerError::TotalBatchFailure {
                    message: message.unwrap_or_else(|| self.fallback_message.clone()),
                    previously_accepted,
                })
            }
        }
    }

    fn fingerprint(&self, record: &FieldMap) -> [u8; 32] {
        let mut hasher = Sha256::new();
        for (k, v) in record {
            if self.volatile_fields.iter().any(|f| f == k) {
                continue;
            }
            hasher.update(k.as_bytes());
            hasher.update([0u8]);
            hasher.update(v.to_string().as_bytes());
            hasher.update([0u8]);
        }
        hasher.finalize().into()
    }
}
