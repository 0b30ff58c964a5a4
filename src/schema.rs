use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};

use crate::error::ComposerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SectionKind {
    Core,
    Health,
    Transport,
    Authorizations,
}

impl SectionKind {
    pub const SATELLITES: [SectionKind; 3] = [
        SectionKind::Health,
        SectionKind::Transport,
        SectionKind::Authorizations,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SectionKind::Core => "core",
            SectionKind::Health => "health",
            SectionKind::Transport => "transport",
            SectionKind::Authorizations => "authorizations",
        }
    }

    pub fn parse(raw: &str) -> Option<SectionKind> {
        match raw.trim() {
            "core" => Some(SectionKind::Core),
            "health" => Some(SectionKind::Health),
            "transport" => Some(SectionKind::Transport),
            "authorizations" => Some(SectionKind::Authorizations),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceOption {
    pub value: String,
    #[serde(default)]
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    /// ISO `YYYY-MM-DD`.
    Date,
    Choice(Vec<ChoiceOption>),
    Flag,
    /// Brazilian phone number, stored masked.
    Phone,
    /// Server-issued, never user-editable.
    Preview,
}

impl FieldKind {
    pub fn blank(&self) -> Value {
        match self {
            FieldKind::Flag => Value::Bool(false),
            _ => Value::String(String::new()),
        }
    }

    fn tag(&self) -> &'static str {
        match self {
            FieldKind::Text => "text",
            FieldKind::Date => "date",
            FieldKind::Choice(_) => "choice",
            FieldKind::Flag => "flag",
            FieldKind::Phone => "phone",
            FieldKind::Preview => "preview",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub id: &'static str,
    pub kind: FieldKind,
}

impl FieldSpec {
    fn new(id: &'static str, kind: FieldKind) -> Self {
        Self { id, kind }
    }
}

pub type FieldMap = BTreeMap<String, Value>;

#[derive(Debug, Clone)]
pub struct FormSchema {
    sections: BTreeMap<SectionKind, Vec<FieldSpec>>,
}

fn options(values: &[&str]) -> Vec<ChoiceOption> {
    values
        .iter()
        .map(|v| ChoiceOption {
            value: v.to_string(),
            label: v.to_string(),
        })
        .collect()
}

impl FormSchema {
    /// Enrollment form: core identity plus the three satellite sections.
    pub fn enrollment(class_options: Vec<ChoiceOption>) -> Result<Self, ComposerError> {
        let mut sections = BTreeMap::new();
        sections.insert(
            SectionKind::Core,
            vec![
                FieldSpec::new("matricula", FieldKind::Preview),
                FieldSpec::new("nome", FieldKind::Text),
                FieldSpec::new("data_nascimento", FieldKind::Date),
                FieldSpec::new("cpf", FieldKind::Text),
                FieldSpec::new("rg", FieldKind::Text),
                FieldSpec::new("sexo", FieldKind::Choice(options(&["Masculino", "Feminino"]))),
                FieldSpec::new("telefone", FieldKind::Phone),
                FieldSpec::new("serie_ano", FieldKind::Text),
                FieldSpec::new(
                    "turno_aluno",
                    FieldKind::Choice(options(&["Matutino", "Vespertino", "Integral"])),
                ),
                FieldSpec::new("turma_principal_id", FieldKind::Choice(class_options)),
            ],
        );
        sections.insert(
            SectionKind::Health,
            vec![
                FieldSpec::new("possui_necessidade_especial", FieldKind::Flag),
                FieldSpec::new("descricao_necessidade", FieldKind::Text),
                FieldSpec::new("usa_medicacao", FieldKind::Flag),
                FieldSpec::new("quais_medicacoes", FieldKind::Text),
                FieldSpec::new("possui_alergia", FieldKind::Flag),
                FieldSpec::new("descricao_alergia", FieldKind::Text),
            ],
        );
        sections.insert(
            SectionKind::Transport,
            vec![
                FieldSpec::new("usa_transporte_escolar", FieldKind::Flag),
                FieldSpec::new("trajeto", FieldKind::Text),
                FieldSpec::new("usa_transporte_publico", FieldKind::Flag),
            ],
        );
        sections.insert(
            SectionKind::Authorizations,
            vec![
                FieldSpec::new("autorizacao_saida_sozinho", FieldKind::Flag),
                FieldSpec::new("autorizacao_fotos_eventos", FieldKind::Flag),
                FieldSpec::new("pessoa_autorizada_buscar", FieldKind::Text),
            ],
        );
        Self::from_sections(sections)
    }

    pub fn from_sections(
        sections: BTreeMap<SectionKind, Vec<FieldSpec>>,
    ) -> Result<Self, ComposerError> {
        if !sections.contains_key(&SectionKind::Core) {
            return Err(ComposerError::BadParams("schema has no core section".into()));
        }
        // Every section of a record lands in one flat map on the wire.
        let mut seen: HashSet<&str> = HashSet::new();
        for fields in sections.values() {
            for f in fields {
                if !seen.insert(f.id) {
                    return Err(ComposerError::BadParams(format!(
                        "field {} is declared in more than one section",
                        f.id
                    )));
                }
            }
        }
        Ok(Self { sections })
    }

    pub fn fields(&self, kind: SectionKind) -> &[FieldSpec] {
        self.sections.get(&kind).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn field(&self, kind: SectionKind, id: &str) -> Option<&FieldSpec> {
        self.fields(kind).iter().find(|f| f.id == id)
    }

    pub fn preview_field(&self) -> Option<&'static str> {
        self.fields(SectionKind::Core)
            .iter()
            .find(|f| f.kind == FieldKind::Preview)
            .map(|f| f.id)
    }

    /// Blank-record factory for one section.
    pub fn blank_section(&self, kind: SectionKind) -> FieldMap {
        self.fields(kind)
            .iter()
            .map(|f| (f.id.to_string(), f.kind.blank()))
            .collect()
    }

    pub fn describe(&self, active: &[SectionKind]) -> Value {
        let mut out = serde_json::Map::new();
        for kind in std::iter::once(SectionKind::Core).chain(active.iter().copied()) {
            let fields: Vec<Value> = self
                .fields(kind)
                .iter()
                .map(|f| {
                    let mut v = json!({ "id": f.id, "kind": f.kind.tag() });
                    if let FieldKind::Choice(opts) = &f.kind {
                        v["options"] = json!(opts);
                    }
                    v
                })
                .collect();
            out.insert(kind.as_str().to_string(), Value::Array(fields));
        }
        Value::Object(out)
    }
}

/// Coerce a raw edit into the stored representation for `spec`.
pub fn coerce_value(spec: &FieldSpec, raw: &Value) -> Result<Value, ComposerError> {
    let bad = |msg: String| ComposerError::BadParams(msg);
    match &spec.kind {
        FieldKind::Preview => Err(ComposerError::ReadOnlyField(spec.id.to_string())),
        FieldKind::Flag => match raw {
            Value::Bool(b) => Ok(Value::Bool(*b)),
            Value::Null => Ok(Value::Bool(false)),
            _ => Err(bad(format!("{} must be a boolean", spec.id))),
        },
        kind => {
            let text = match raw {
                Value::String(s) => s.clone(),
                Value::Null => String::new(),
                Value::Number(n) => n.to_string(),
                _ => return Err(bad(format!("{} must be a string", spec.id))),
            };
            match kind {
                FieldKind::Date => {
                    let t = text.trim();
                    if !t.is_empty() && NaiveDate::parse_from_str(t, "%Y-%m-%d").is_err() {
                        return Err(bad(format!("{} must be YYYY-MM-DD", spec.id)));
                    }
                    Ok(Value::String(t.to_string()))
                }
                FieldKind::Choice(opts) => {
                    let t = text.trim();
                    if !t.is_empty() && !opts.iter().any(|o| o.value == t) {
                        return Err(bad(format!("{} has no option {}", spec.id, t)));
                    }
                    Ok(Value::String(t.to_string()))
                }
                FieldKind::Phone => Ok(Value::String(mask_phone(&text))),
                _ => Ok(Value::String(text)),
            }
        }
    }
}

/// `(DD) DDDD-DDDD` for landlines, `(DD) DDDDD-DDDD` for mobiles; partial
/// input is masked as far as it goes.
pub fn mask_phone(raw: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).take(11).collect();
    if digits.len() < 2 {
        return digits;
    }
    let (area, rest) = digits.split_at(2);
    let head_len = if digits.len() <= 10 { 4 } else { 5 };
    if rest.len() < head_len {
        // Not enough digits to complete the mask pattern yet.
        return digits;
    }
    let (head, tail) = rest.split_at(head_len);
    format!("({}) {}-{}", area, head, tail)
}
