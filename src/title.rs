use serde_json::Value;

use crate::records::SectionBlock;
use crate::schema::FieldMap;

/// Keeps each record's display label in step with its name field.
#[derive(Debug, Clone)]
pub struct TitleBinder {
    prefix: String,
    name_field: String,
}

impl TitleBinder {
    pub fn new(prefix: impl Into<String>, name_field: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            name_field: name_field.into(),
        }
    }

    pub fn name_field(&self) -> &str {
        &self.name_field
    }

    pub fn label(&self, index: usize, name: &str) -> String {
        let name = name.trim();
        if name.is_empty() {
            format!("{} {}", self.prefix, index + 1)
        } else {
            format!("{} {} — {}", self.prefix, index + 1, name)
        }
    }

    pub fn name_of(&self, values: &FieldMap) -> String {
        values
            .get(&self.name_field)
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string()
    }

    /// Recomputes the label for `index` and pushes it to every block sharing
    /// that index. Returns the label when any block changed.
    pub fn bind<'a>(
        &self,
        index: usize,
        name: &str,
        blocks: impl Iterator<Item = &'a mut SectionBlock>,
    ) -> Option<String> {
        let label = self.label(index, name);
        let mut changed = false;
        for block in blocks {
            if block.label != label {
                block.label = label.clone();
                changed = true;
            }
        }
        changed.then_some(label)
    }
}
