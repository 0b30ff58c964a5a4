use serde_json::{json, Value};
use std::fmt;
use uuid::Uuid;

use crate::error::ComposerError;
use crate::schema::{coerce_value, FieldMap, FormSchema, SectionKind};
use crate::title::TitleBinder;

/// Identity of a record across reindexing; positions change, this does not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordId(Uuid);

impl RecordId {
    fn new() -> Self {
        RecordId(Uuid::new_v4())
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// One section of one record, as the page renders it.
#[derive(Debug, Clone, PartialEq)]
pub struct SectionBlock {
    pub index: usize,
    pub record: RecordId,
    pub label: String,
    pub removable: bool,
    pub values: FieldMap,
}

#[derive(Debug, Clone)]
struct SectionContainer {
    kind: SectionKind,
    blocks: Vec<SectionBlock>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReindexReport {
    /// Blocks whose index, label, remove control or presence changed.
    pub changed: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldUpdate {
    pub value: Value,
    /// Set when the edit changed the record's label.
    pub label: Option<String>,
}

/// Ordered person records with their parallel satellite sections.
///
/// Positions are always `0..n`; position 0 is the anchor and is never removed.
#[derive(Debug, Clone)]
pub struct RecordSet {
    schema: FormSchema,
    titles: TitleBinder,
    core: SectionContainer,
    satellites: Vec<SectionContainer>,
}

impl RecordSet {
    pub fn new(schema: FormSchema, active: &[SectionKind], titles: TitleBinder) -> Self {
        let mut satellites: Vec<SectionContainer> = Vec::new();
        for kind in active {
            if *kind == SectionKind::Core || satellites.iter().any(|c| c.kind == *kind) {
                continue;
            }
            satellites.push(SectionContainer {
                kind: *kind,
                blocks: Vec::new(),
            });
        }
        let mut set = Self {
            schema,
            titles,
            core: SectionContainer {
                kind: SectionKind::Core,
                blocks: Vec::new(),
            },
            satellites,
        };
        let anchor = set.blank_block(SectionKind::Core, 0, RecordId::new());
        set.core.blocks.push(anchor);
        set.reindex();
        set
    }

    pub fn schema(&self) -> &FormSchema {
        &self.schema
    }

    pub fn titles(&self) -> &TitleBinder {
        &self.titles
    }

    pub fn count(&self) -> usize {
        self.core.blocks.len()
    }

    pub fn active_sections(&self) -> Vec<SectionKind> {
        self.satellites.iter().map(|c| c.kind).collect()
    }

    pub fn record_id(&self, index: usize) -> Option<RecordId> {
        self.core.blocks.get(index).map(|b| b.record)
    }

    pub fn label(&self, index: usize) -> Option<&str> {
        self.core.blocks.get(index).map(|b| b.label.as_str())
    }

    pub fn removable(&self, index: usize) -> bool {
        self.core.blocks.get(index).map(|b| b.removable).unwrap_or(false)
    }

    pub fn section(&self, kind: SectionKind, index: usize) -> Option<&SectionBlock> {
        self.container(kind).and_then(|c| c.blocks.get(index))
    }

    /// Every section of the record at `index`, core first.
    pub fn blocks_at(&self, index: usize) -> Vec<(SectionKind, &SectionBlock)> {
        std::iter::once(&self.core)
            .chain(self.satellites.iter())
            .filter_map(|c| c.blocks.get(index).map(|b| (c.kind, b)))
            .collect()
    }

    /// Appends a blank record at index `n` and returns `n`.
    pub fn add(&mut self) -> usize {
        let index = self.count();
        let block = self.blank_block(SectionKind::Core, index, RecordId::new());
        self.core.blocks.push(block);
        for kind in self.active_sections() {
            self.append_section(kind, index);
        }
        self.reindex();
        index
    }

    /// Deletes the record at `index` with all its sections and renumbers the rest.
    pub fn remove(&mut self, index: usize) -> Result<RecordId, ComposerError> {
        if index == 0 {
            return Err(ComposerError::AnchorLocked);
        }
        if index >= self.count() {
            return Err(ComposerError::NoSuchRecord(index));
        }
        let removed = self.core.blocks.remove(index);
        for container in &mut self.satellites {
            if let Some(pos) = container.blocks.iter().position(|b| b.index == index) {
                container.blocks.remove(pos);
            }
        }
        self.reindex();
        Ok(removed.record)
    }

    /// Builds a blank `kind` block for position `index` from the schema.
    fn append_section(&mut self, kind: SectionKind, index: usize) {
        if kind == SectionKind::Core {
            return;
        }
        let record = self.record_id(index).unwrap_or_else(RecordId::new);
        let block = self.blank_block(kind, index, record);
        if let Some(container) = self.satellites.iter_mut().find(|c| c.kind == kind) {
            container.blocks.push(block);
        }
    }

    /// Renumbers every container to `0..n` in order, realigns satellites to the
    /// core records and refreshes labels and remove controls. A second call on
    /// a settled set changes nothing.
    pub fn reindex(&mut self) -> ReindexReport {
        let n = self.count();
        let mut changed = 0;

        for kind in self.active_sections() {
            loop {
                let len = self.container(kind).map(|c| c.blocks.len()).unwrap_or(n);
                if len >= n {
                    break;
                }
                self.append_section(kind, len);
                changed += 1;
            }
        }
        for container in &mut self.satellites {
            if container.blocks.len() > n {
                changed += container.blocks.len() - n;
                container.blocks.truncate(n);
            }
        }

        let ids: Vec<RecordId> = self.core.blocks.iter().map(|b| b.record).collect();
        for container in std::iter::once(&mut self.core).chain(self.satellites.iter_mut()) {
            for (i, block) in container.blocks.iter_mut().enumerate() {
                let removable = i != 0;
                if block.index != i || block.record != ids[i] || block.removable != removable {
                    block.index = i;
                    block.record = ids[i];
                    block.removable = removable;
                    changed += 1;
                }
            }
        }

        for i in 0..n {
            if self.bind_title(i).is_some() {
                changed += 1;
            }
        }
        ReindexReport { changed }
    }

    pub fn set_field(
        &mut self,
        index: usize,
        kind: SectionKind,
        field: &str,
        raw: &Value,
    ) -> Result<FieldUpdate, ComposerError> {
        let spec = self
            .schema
            .field(kind, field)
            .filter(|_| self.container(kind).is_some())
            .ok_or_else(|| ComposerError::UnknownField {
                section: kind.as_str().to_string(),
                field: field.to_string(),
            })?;
        let value = coerce_value(spec, raw)?;
        self.write_value(index, kind, field, value.clone())?;
        let label = if kind == SectionKind::Core && field == self.titles.name_field() {
            self.bind_title(index)
        } else {
            None
        };
        Ok(FieldUpdate {
            value,
            label,
        })
    }

    /// Writes a read-only preview value, bypassing edit coercion.
    pub fn set_preview(&mut self, index: usize, preview: &str) -> Result<(), ComposerError> {
        let Some(field) = self.schema.preview_field() else {
            return Ok(());
        };
        self.write_value(index, SectionKind::Core, field, Value::String(preview.to_string()))
    }

    pub fn clear_preview(&mut self, index: usize) -> Result<(), ComposerError> {
        self.set_preview(index, "")
    }

    pub fn preview(&self, index: usize) -> Option<&str> {
        let field = self.schema.preview_field()?;
        self.section(SectionKind::Core, index)?
            .values
            .get(field)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// One flat field map per record, in index order, every section merged.
    pub fn flatten(&self) -> Vec<FieldMap> {
        (0..self.count())
            .map(|i| {
                let mut flat = FieldMap::new();
                for (_, block) in self.blocks_at(i) {
                    for (k, v) in &block.values {
                        let v = match v {
                            Value::String(s) => Value::String(s.trim().to_string()),
                            other => other.clone(),
                        };
                        flat.insert(k.clone(), v);
                    }
                }
                flat
            })
            .collect()
    }

    pub fn view(&self, index: usize) -> Option<Value> {
        let core = self.core.blocks.get(index)?;
        let mut sections = serde_json::Map::new();
        for (kind, block) in self.blocks_at(index) {
            sections.insert(kind.as_str().to_string(), json!(block.values));
        }
        Some(json!({
            "index": core.index,
            "recordId": core.record.to_string(),
            "label": core.label,
            "removable": self.removable(index),
            "previewId": self.preview(index),
            "sections": sections,
        }))
    }

    fn write_value(
        &mut self,
        index: usize,
        kind: SectionKind,
        field: &str,
        value: Value,
    ) -> Result<(), ComposerError> {
        let block = self
            .container_mut(kind)
            .and_then(|c| c.blocks.get_mut(index))
            .ok_or(ComposerError::NoSuchRecord(index))?;
        block.values.insert(field.to_string(), value);
        Ok(())
    }

    fn bind_title(&mut self, index: usize) -> Option<String> {
        let name = self.titles.name_of(&self.core.blocks.get(index)?.values);
        let blocks = std::iter::once(&mut self.core)
            .chain(self.satellites.iter_mut())
            .filter_map(|c| c.blocks.get_mut(index));
        self.titles.bind(index, &name, blocks)
    }

    fn blank_block(&self, kind: SectionKind, index: usize, record: RecordId) -> SectionBlock {
        SectionBlock {
            index,
            record,
            label: self.titles.label(index, ""),
            removable: index != 0,
            values: self.schema.blank_section(kind),
        }
    }

    fn container(&self, kind: SectionKind) -> Option<&SectionContainer> {
        if kind == SectionKind::Core {
            return Some(&self.core);
        }
        self.satellites.iter().find(|c| c.kind == kind)
    }

    fn container_mut(&mut self, kind: SectionKind) -> Option<&mut SectionContainer> {
        if kind == SectionKind::Core {
            return Some(&mut self.core);
        }
        self.satellites.iter_mut().find(|c| c.kind == kind)
    }
}
