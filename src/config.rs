use serde::Deserialize;

use crate::error::ComposerError;
use crate::schema::{ChoiceOption, FieldKind, FormSchema, SectionKind};

pub const BASE_URL_ENV: &str = "ENROLLBATCHD_BASE_URL";
const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";

fn default_base_url() -> String {
    std::env::var(BASE_URL_ENV)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
}

fn default_preview_path() -> String {
    "/preview-matricula/".into()
}

fn default_submit_path() -> String {
    "/alunos/salvar-lote/".into()
}

fn default_success_redirect() -> String {
    "/listar_aluno/".into()
}

fn default_min_records() -> usize {
    2
}

fn default_dedup_field() -> String {
    "cpf".into()
}

fn default_name_field() -> String {
    "nome".into()
}

fn default_label_prefix() -> String {
    "Aluno".into()
}

fn default_sections() -> Vec<SectionKind> {
    SectionKind::SATELLITES.to_vec()
}

fn default_timeout_ms() -> u64 {
    15_000
}

fn default_fallback_message() -> String {
    "failed to save the enrollment batch".into()
}

/// Parameters of `session.open`; every field has a default.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_preview_path")]
    pub preview_path: String,
    #[serde(default = "default_submit_path")]
    pub submit_path: String,
    #[serde(default = "default_success_redirect")]
    pub success_redirect: String,
    /// Page-embedded anti-forgery value, not a cookie.
    #[serde(default)]
    pub csrf_token: String,
    #[serde(default = "default_min_records")]
    pub min_records: usize,
    #[serde(default = "default_dedup_field")]
    pub dedup_field: String,
    #[serde(default = "default_name_field")]
    pub name_field: String,
    #[serde(default = "default_label_prefix")]
    pub label_prefix: String,
    #[serde(default = "default_sections")]
    pub sections: Vec<SectionKind>,
    #[serde(default)]
    pub class_options: Vec<ChoiceOption>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_fallback_message")]
    pub fallback_message: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            preview_path: default_preview_path(),
            submit_path: default_submit_path(),
            success_redirect: default_success_redirect(),
            csrf_token: String::new(),
            min_records: default_min_records(),
            dedup_field: default_dedup_field(),
            name_field: default_name_field(),
            label_prefix: default_label_prefix(),
            sections: default_sections(),
            class_options: Vec::new(),
            timeout_ms: default_timeout_ms(),
            fallback_message: default_fallback_message(),
        }
    }
}

impl SessionConfig {
    pub fn from_params(params: &serde_json::Value) -> Result<Self, ComposerError> {
        let cfg: SessionConfig = if params.is_null() {
            SessionConfig::default()
        } else {
            serde_json::from_value(params.clone())
                .map_err(|e| ComposerError::BadParams(format!("invalid session config: {e}")))?
        };
        Ok(cfg)
    }

    /// Checks the config against the schema it will drive.
    pub fn validate(&self, schema: &FormSchema) -> Result<(), ComposerError> {
        let bad = |m: &str| Err(ComposerError::BadParams(m.to_string()));
        if self.base_url.trim().is_empty() {
            return bad("baseUrl must not be empty");
        }
        if self.preview_path.trim().is_empty() || self.submit_path.trim().is_empty() {
            return bad("previewPath/submitPath must not be empty");
        }
        if self.min_records == 0 {
            return bad("minRecords must be at least 1");
        }
        if self.timeout_ms == 0 {
            return bad("timeoutMs must be positive");
        }
        if self.sections.contains(&SectionKind::Core) {
            return bad("sections lists satellite kinds only");
        }
        match schema.field(SectionKind::Core, &self.dedup_field) {
            Some(f) if f.kind == FieldKind::Text => {}
            _ => return bad("dedupField must be a core text field"),
        }
        match schema.field(SectionKind::Core, &self.name_field) {
            Some(f) if f.kind == FieldKind::Text => {}
            _ => return bad("nameField must be a core text field"),
        }
        Ok(())
    }
}
