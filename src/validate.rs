use serde_json::Value;
use std::collections::HashSet;

use crate::error::ComposerError;
use crate::schema::FieldMap;

#[derive(Debug, Clone)]
pub struct SubmitRules {
    pub min_records: usize,
    pub dedup_field: String,
}

/// Digits only; `"123.456.789-00"` and `"12345678900"` share a key.
pub fn normalize_key(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Pure pre-submit gate: minimum count, then duplicate dedup keys. Blank keys
/// never collide. A duplicate reports the 1-based position of its second
/// occurrence.
pub fn validate_for_submit(records: &[FieldMap], rules: &SubmitRules) -> Result<(), ComposerError> {
    if records.len() < rules.min_records {
        return Err(ComposerError::InsufficientRecords {
            min: rules.min_records,
            have: records.len(),
        });
    }

    let mut seen: HashSet<String> = HashSet::new();
    for (i, record) in records.iter().enumerate() {
        let key = record
            .get(&rules.dedup_field)
            .and_then(Value::as_str)
            .map(normalize_key)
            .unwrap_or_default();
        if key.is_empty() {
            continue;
        }
        if !seen.insert(key) {
            return Err(ComposerError::DuplicateKey {
                field: rules.dedup_field.clone(),
                position: i + 1,
            });
        }
    }
    Ok(())
}
