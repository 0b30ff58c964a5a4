use serde_json::Value;

use crate::error::ComposerError;
use crate::schema::SectionKind;

pub fn get_required_str<'a>(params: &'a Value, key: &str) -> Result<&'a str, ComposerError> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ComposerError::BadParams(format!("missing {}", key)))
}

pub fn get_required_index(params: &Value, key: &str) -> Result<usize, ComposerError> {
    params
        .get(key)
        .and_then(|v| v.as_u64())
        .map(|v| v as usize)
        .ok_or_else(|| ComposerError::BadParams(format!("{} must be a non-negative integer", key)))
}

pub fn get_section(params: &Value) -> Result<SectionKind, ComposerError> {
    match params.get("section") {
        None | Some(Value::Null) => Ok(SectionKind::Core),
        Some(v) => v
            .as_str()
            .and_then(SectionKind::parse)
            .ok_or_else(|| ComposerError::BadParams(format!("unknown section {}", v))),
    }
}
