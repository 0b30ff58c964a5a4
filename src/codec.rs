use serde_json::{json, Value};

use crate::records::RecordSet;
use crate::schema::FieldMap;

pub const COLLECTION: &str = "alunos";

/// `alunos[<index>][<field>]`
pub fn field_key(index: usize, field: &str) -> String {
    format!("{}[{}][{}]", COLLECTION, index, field)
}

pub fn parse_field_key(key: &str) -> Option<(usize, &str)> {
    let rest = key.strip_prefix(COLLECTION)?.strip_prefix('[')?;
    let (index, rest) = rest.split_once(']')?;
    if index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let field = rest.strip_prefix('[')?.strip_suffix(']')?;
    if field.is_empty() || !field.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return None;
    }
    Some((index.parse().ok()?, field))
}

/// Form-key encoding of every field of every record, each key namespaced by
/// the block's current index.
pub fn encode_form(set: &RecordSet) -> Vec<(String, Value)> {
    let mut out = Vec::new();
    for i in 0..set.count() {
        for (_, block) in set.blocks_at(i) {
            for (field, value) in &block.values {
                out.push((field_key(block.index, field), value.clone()));
            }
        }
    }
    out
}

/// Request body for the batch endpoint: `{ "alunos": [ {..}, .. ] }` in index order.
pub fn batch_payload(set: &RecordSet) -> Value {
    let mut body = serde_json::Map::new();
    body.insert(COLLECTION.to_string(), json!(set.flatten()));
    Value::Object(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ComposerError;
    use crate::schema::{FormSchema, SectionKind};
    use crate::title::TitleBinder;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    fn decode_form(pairs: &[(String, Value)]) -> Result<BTreeMap<usize, FieldMap>, ComposerError> {
        let mut out: BTreeMap<usize, FieldMap> = BTreeMap::new();
        for (key, value) in pairs {
            let (index, field) = parse_field_key(key)
                .ok_or_else(|| ComposerError::BadParams(format!("malformed field key {}", key)))?;
            out.entry(index)
                .or_default()
                .insert(field.to_string(), value.clone());
        }
        Ok(out)
    }

    fn decode_payload(body: &Value) -> Result<Vec<FieldMap>, ComposerError> {
        let records = body
            .get(COLLECTION)
            .and_then(Value::as_array)
            .ok_or_else(|| ComposerError::BadParams(format!("missing {}", COLLECTION)))?;
        records
            .iter()
            .map(|r| {
                r.as_object()
                    .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                    .ok_or_else(|| ComposerError::BadParams("record must be an object".into()))
            })
            .collect()
    }

    fn filled_set(names: &[&str]) -> RecordSet {
        let mut set = RecordSet::new(
            FormSchema::enrollment(Vec::new()).expect("schema"),
            &SectionKind::SATELLITES,
            TitleBinder::new("Aluno", "nome"),
        );
        for (i, name) in names.iter().enumerate() {
            if i > 0 {
                set.add();
            }
            set.set_field(i, SectionKind::Core, "nome", &json!(name)).expect("name");
            set.set_field(i, SectionKind::Core, "cpf", &json!(format!("{:03}", i)))
                .expect("cpf");
            set.set_field(i, SectionKind::Health, "possui_alergia", &json!(i % 2 == 0))
                .expect("flag");
        }
        set
    }

    #[test]
    fn parses_well_formed_keys_only() {
        assert_eq!(parse_field_key("alunos[12][data_nascimento]"), Some((12, "data_nascimento")));
        assert_eq!(parse_field_key("alunos[][nome]"), None);
        assert_eq!(parse_field_key("alunos[1][nome"), None);
        assert_eq!(parse_field_key("alunos[x][nome]"), None);
        assert_eq!(parse_field_key("outros[1][nome]"), None);
        assert_eq!(parse_field_key("alunos[1][nome][extra]"), None);
    }

    #[test]
    fn form_encoding_round_trips_every_section() {
        let set = filled_set(&["Ana", "Bia", "Caio"]);
        let decoded = decode_form(&encode_form(&set)).expect("decode");
        let flat = set.flatten();
        assert_eq!(decoded.len(), 3);
        for (i, record) in flat.iter().enumerate() {
            assert_eq!(decoded.get(&i), Some(record));
        }
    }

    #[test]
    fn keys_follow_renumbering() {
        let mut set = filled_set(&["Ana", "Bia", "Caio"]);
        set.remove(1).expect("remove");
        let pairs = encode_form(&set);
        assert!(pairs
            .iter()
            .any(|(k, v)| k == "alunos[1][nome]" && v == &json!("Caio")));
        assert!(pairs.iter().all(|(k, _)| !k.starts_with("alunos[2]")));
    }

    #[test]
    fn payload_is_an_ordered_sequence() {
        let set = filled_set(&["Ana", "Bia"]);
        let body = batch_payload(&set);
        let records = decode_payload(&body).expect("decode");
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].get("nome"), Some(&json!("Bia")));
        assert_eq!(records, set.flatten());
    }

    proptest! {
        #[test]
        fn decode_recovers_encoded_pairs(
            records in prop::collection::vec(
                prop::collection::btree_map("[a-z_]{1,12}", "[ -~]{0,16}", 0..6),
                1..6,
            )
        ) {
            let mut pairs = Vec::new();
            for (i, fields) in records.iter().enumerate() {
                for (k, v) in fields {
                    pairs.push((field_key(i, k), json!(v)));
                }
            }
            let decoded = decode_form(&pairs).expect("decode");
            for (i, fields) in records.iter().enumerate() {
                let expected: FieldMap = fields.iter().map(|(k, v)| (k.clone(), json!(v))).collect();
                if expected.is_empty() {
                    prop_assert!(decoded.get(&i).is_none());
                } else {
                    prop_assert_eq!(decoded.get(&i), Some(&expected));
                }
            }
        }
    }
}
