use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

/// One rejected record from a `parcial` batch reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordFailure {
    pub record: String,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum ComposerError {
    #[error("register at least {min} records (have {have})")]
    InsufficientRecords { min: usize, have: usize },

    #[error("duplicate {field} at record {position}")]
    DuplicateKey { field: String, position: usize },

    #[error("network failure: {0}")]
    NetworkFailure(String),

    /// `previously_accepted` lists 1-based positions an earlier partial batch
    /// already saved.
    #[error("{} record(s) were not saved", .failures.len())]
    PartialBatchFailure {
        failures: Vec<RecordFailure>,
        previously_accepted: Vec<usize>,
    },

    #[error("{message}")]
    TotalBatchFailure {
        message: String,
        previously_accepted: Vec<usize>,
    },

    #[error("the first record cannot be removed")]
    AnchorLocked,

    #[error("no record at index {0}")]
    NoSuchRecord(usize),

    #[error("unknown field {section}.{field}")]
    UnknownField { section: String, field: String },

    #[error("field {0} is read-only")]
    ReadOnlyField(String),

    #[error("{0}")]
    BadParams(String),

    #[error("the batch was already submitted; open a new session")]
    SessionClosed,
}

impl ComposerError {
    pub fn code(&self) -> &'static str {
        match self {
            ComposerError::InsufficientRecords { .. } => "insufficient_records",
            ComposerError::DuplicateKey { .. } => "duplicate_key",
            ComposerError::NetworkFailure(_) => "network_failure",
            ComposerError::PartialBatchFailure { .. } => "partial_batch_failure",
            ComposerError::TotalBatchFailure { .. } => "total_batch_failure",
            ComposerError::AnchorLocked => "anchor_locked",
            ComposerError::NoSuchRecord(_) => "not_found",
            ComposerError::UnknownField { .. } => "unknown_field",
            ComposerError::ReadOnlyField(_) => "read_only_field",
            ComposerError::BadParams(_) => "bad_params",
            ComposerError::SessionClosed => "session_closed",
        }
    }

    pub fn details(&self) -> Option<Value> {
        match self {
            ComposerError::InsufficientRecords { min, have } => {
                Some(json!({ "min": min, "have": have }))
            }
            ComposerError::DuplicateKey { field, position } => {
                Some(json!({ "field": field, "position": position }))
            }
            ComposerError::PartialBatchFailure {
                failures,
                previously_accepted,
            } => Some(json!({
                "errors": failures,
                "previouslyAccepted": previously_accepted,
            })),
            ComposerError::TotalBatchFailure {
                previously_accepted,
                ..
            } => Some(json!({ "previouslyAccepted": previously_accepted })),
            ComposerError::NoSuchRecord(index) => Some(json!({ "index": index })),
            ComposerError::UnknownField { section, field } => {
                Some(json!({ "section": section, "field": field }))
            }
            ComposerError::ReadOnlyField(field) => Some(json!({ "field": field })),
            _ => None,
        }
    }
}
