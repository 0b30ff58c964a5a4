use serde_json::{json, Value};
use tracing::info;

use crate::config::SessionConfig;
use crate::error::ComposerError;
use crate::preview::{PreviewFetcher, PreviewOutcome, PreviewTicket};
use crate::records::RecordSet;
use crate::schema::{FormSchema, SectionKind};
use crate::submit::{BatchSubmitter, SubmitReceipt};
use crate::title::TitleBinder;
use crate::transport::Transport;
use crate::validate::SubmitRules;

/// State-change notification for the rendering adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    RecordAdded { index: usize, count: usize },
    RecordRemoved { index: usize, count: usize },
    Reindexed { changed: usize },
    LabelChanged { index: usize, label: String },
    PreviewRequested(PreviewTicket),
    PreviewApplied { assigned: Vec<(usize, String)> },
    PreviewDiscarded { stale: PreviewTicket, reissued: bool },
    PreviewFailed { message: String },
    BatchSubmitted { total: usize },
    SessionClosed,
}

impl ChangeEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ChangeEvent::RecordAdded { .. } => "record.added",
            ChangeEvent::RecordRemoved { .. } => "record.removed",
            ChangeEvent::Reindexed { .. } => "records.reindexed",
            ChangeEvent::LabelChanged { .. } => "record.labelChanged",
            ChangeEvent::PreviewRequested(_) => "preview.requested",
            ChangeEvent::PreviewApplied { .. } => "preview.applied",
            ChangeEvent::PreviewDiscarded { .. } => "preview.discarded",
            ChangeEvent::PreviewFailed { .. } => "preview.failed",
            ChangeEvent::BatchSubmitted { .. } => "batch.submitted",
            ChangeEvent::SessionClosed => "session.closed",
        }
    }

    pub fn to_notification(&self) -> Value {
        let params = match self {
            ChangeEvent::RecordAdded { index, count }
            | ChangeEvent::RecordRemoved { index, count } => {
                json!({ "index": index, "count": count })
            }
            ChangeEvent::Reindexed { changed } => json!({ "changed": changed }),
            ChangeEvent::LabelChanged { index, label } => {
                json!({ "index": index, "label": label })
            }
            ChangeEvent::PreviewRequested(t) => {
                json!({ "epoch": t.epoch, "quantity": t.quantity })
            }
            ChangeEvent::PreviewApplied { assigned } => json!({
                "previews": assigned
                    .iter()
                    .map(|(i, id)| json!({ "index": i, "previewId": id }))
                    .collect::<Vec<_>>()
            }),
            ChangeEvent::PreviewDiscarded { stale, reissued } => json!({
                "epoch": stale.epoch,
                "quantity": stale.quantity,
                "reissued": reissued
            }),
            ChangeEvent::PreviewFailed { message } => json!({ "message": message }),
            ChangeEvent::BatchSubmitted { total } => json!({ "total": total }),
            ChangeEvent::SessionClosed => json!({}),
        };
        json!({ "event": self.name(), "params": params })
    }
}

/// One composition session: the record set, its preview identifiers and the
/// submitter. Owned by a single thread; every method runs to completion.
#[derive(Debug)]
pub struct Composer {
    records: RecordSet,
    previews: PreviewFetcher,
    submitter: BatchSubmitter,
    finished: bool,
    events: Vec<ChangeEvent>,
}

impl Composer {
    pub fn open(config: &SessionConfig) -> Result<Self, ComposerError> {
        let schema = FormSchema::enrollment(config.class_options.clone())?;
        config.validate(&schema)?;
        let volatile: Vec<String> = schema.preview_field().map(str::to_string).into_iter().collect();
        let titles = TitleBinder::new(config.label_prefix.clone(), config.name_field.clone());
        let records = RecordSet::new(schema, &config.sections, titles);
        let submitter = BatchSubmitter::new(
            SubmitRules {
                min_records: config.min_records,
                dedup_field: config.dedup_field.clone(),
            },
            config.csrf_token.clone(),
            config.success_redirect.clone(),
            config.fallback_message.clone(),
            volatile,
        );
        info!(sections = ?config.sections, "composition session opened");
        Ok(Self {
            records,
            previews: PreviewFetcher::new(),
            submitter,
            finished: false,
            events: Vec::new(),
        })
    }

    pub fn records(&self) -> &RecordSet {
        &self.records
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn drain_events(&mut self) -> Vec<ChangeEvent> {
        std::mem::take(&mut self.events)
    }

    fn ensure_open(&self) -> Result<(), ComposerError> {
        if self.finished {
            return Err(ComposerError::SessionClosed);
        }
        Ok(())
    }

    pub fn add(&mut self) -> Result<(usize, Option<PreviewTicket>), ComposerError> {
        self.ensure_open()?;
        let index = self.records.add();
        info!(index, count = self.records.count(), "record added");
        self.events.push(ChangeEvent::RecordAdded {
            index,
            count: self.records.count(),
        });
        Ok((index, self.after_structure_change()))
    }

    pub fn remove(&mut self, index: usize) -> Result<Option<PreviewTicket>, ComposerError> {
        self.ensure_open()?;
        self.records.remove(index)?;
        info!(index, count = self.records.count(), "record removed");
        self.events.push(ChangeEvent::RecordRemoved {
            index,
            count: self.records.count(),
        });
        Ok(self.after_structure_change())
    }

    fn after_structure_change(&mut self) -> Option<PreviewTicket> {
        self.previews.structure_changed(&mut self.records);
        self.refresh_previews()
    }

    pub fn reindex(&mut self) -> Result<usize, ComposerError> {
        self.ensure_open()?;
        let report = self.records.reindex();
        if report.changed > 0 {
            self.events.push(ChangeEvent::Reindexed {
                changed: report.changed,
            });
        }
        Ok(report.changed)
    }

    pub fn set_field(
        &mut self,
        index: usize,
        section: SectionKind,
        field: &str,
        value: &Value,
    ) -> Result<Value, ComposerError> {
        self.ensure_open()?;
        let update = self.records.set_field(index, section, field, value)?;
        if let Some(label) = update.label {
            self.events.push(ChangeEvent::LabelChanged { index, label });
        }
        Ok(update.value)
    }

    pub fn refresh_previews(&mut self) -> Option<PreviewTicket> {
        if self.finished {
            return None;
        }
        let ticket = self.previews.refresh(self.records.count())?;
        self.events.push(ChangeEvent::PreviewRequested(ticket));
        Some(ticket)
    }

    /// Applies or discards a preview reply; returns a replacement request
    /// when the reply was stale.
    pub fn complete_preview(
        &mut self,
        ticket: PreviewTicket,
        reply: anyhow::Result<Vec<String>>,
    ) -> Option<PreviewTicket> {
        if self.finished {
            return None;
        }
        match self.previews.complete(ticket, reply, &mut self.records) {
            PreviewOutcome::Applied { assigned } => {
                self.events.push(ChangeEvent::PreviewApplied { assigned });
                None
            }
            PreviewOutcome::Discarded { stale, reissue } => {
                self.events.push(ChangeEvent::PreviewDiscarded {
                    stale,
                    reissued: reissue.is_some(),
                });
                if let Some(t) = reissue {
                    self.events.push(ChangeEvent::PreviewRequested(t));
                }
                reissue
            }
            PreviewOutcome::Failed { message } => {
                self.events.push(ChangeEvent::PreviewFailed { message });
                None
            }
        }
    }

    pub fn validate(&self) -> Result<(), ComposerError> {
        self.ensure_open()?;
        self.submitter.validate(&self.records)
    }

    /// Posts the batch. Success ends the session; every failure leaves the
    /// records as they were.
    pub fn submit(&mut self, transport: &dyn Transport) -> Result<SubmitReceipt, ComposerError> {
        self.ensure_open()?;
        let receipt = self.submitter.submit(&self.records, transport)?;
        self.finished = true;
        self.events.push(ChangeEvent::BatchSubmitted {
            total: receipt.total,
        });
        self.events.push(ChangeEvent::SessionClosed);
        Ok(receipt)
    }

    pub fn view(&self) -> Value {
        let records: Vec<Value> = (0..self.records.count())
            .filter_map(|i| self.records.view(i))
            .collect();
        json!({ "count": self.records.count(), "records": records })
    }

    pub fn describe(&self) -> Value {
        let sections = self.records.active_sections();
        json!({
            "sections": sections.iter().map(|k| k.as_str()).collect::<Vec<_>>(),
            "schema": self.records.schema().describe(&sections),
            "epoch": self.previews.epoch(),
        })
    }
}
