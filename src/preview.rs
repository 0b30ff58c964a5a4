use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::records::{RecordId, RecordSet};

/// Stamp of one outbound preview request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PreviewTicket {
    /// Structural generation of the record set when the request was issued.
    pub epoch: u64,
    /// Record count when the request was issued.
    pub quantity: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreviewOutcome {
    Applied {
        assigned: Vec<(usize, String)>,
    },
    /// The set changed while the request was in flight; nothing was applied.
    Discarded {
        stale: PreviewTicket,
        reissue: Option<PreviewTicket>,
    },
    Failed {
        message: String,
    },
}

/// Assigns server-issued preview identifiers to records by position, and
/// refuses to apply a reply that belongs to an older shape of the set.
#[derive(Debug, Default)]
pub struct PreviewFetcher {
    generation: u64,
    outstanding: Option<PreviewTicket>,
    assignment: BTreeMap<usize, (RecordId, String)>,
}

impl PreviewFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn epoch(&self) -> u64 {
        self.generation
    }

    /// Issues a request for the current record count. No request for an empty set.
    pub fn refresh(&mut self, count: usize) -> Option<PreviewTicket> {
        if count == 0 {
            return None;
        }
        let ticket = PreviewTicket {
            epoch: self.generation,
            quantity: count,
        };
        self.outstanding = Some(ticket);
        debug!(epoch = ticket.epoch, quantity = count, "preview requested");
        Some(ticket)
    }

    /// Called after every add/remove. Drops assignments whose position now
    /// holds a different record and clears their displayed value.
    pub fn structure_changed(&mut self, set: &mut RecordSet) -> Vec<usize> {
        self.generation += 1;
        self.assignment
            .retain(|index, (record, _)| set.record_id(*index) == Some(*record));

        let mut cleared = Vec::new();
        for i in 0..set.count() {
            if self.assignment.contains_key(&i) || set.preview(i).is_none() {
                continue;
            }
            if set.clear_preview(i).is_ok() {
                cleared.push(i);
            }
        }
        cleared
    }

    pub fn complete(
        &mut self,
        ticket: PreviewTicket,
        reply: anyhow::Result<Vec<String>>,
        set: &mut RecordSet,
    ) -> PreviewOutcome {
        if self.outstanding == Some(ticket) {
            self.outstanding = None;
        }

        if ticket.epoch != self.generation || ticket.quantity != set.count() {
            // A request already stamped with the current shape makes a new one redundant.
            let reissue = match self.outstanding {
                Some(t) if t.epoch == self.generation && t.quantity == set.count() => None,
                _ => self.refresh(set.count()),
            };
            info!(
                stale_epoch = ticket.epoch,
                epoch = self.generation,
                quantity = ticket.quantity,
                count = set.count(),
                "stale preview reply discarded"
            );
            return PreviewOutcome::Discarded {
                stale: ticket,
                reissue,
            };
        }

        let ids = match reply {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "preview request failed");
                return PreviewOutcome::Failed {
                    message: format!("{e:#}"),
                };
            }
        };

        // Positions past the end of a short reply keep what they show.
        let mut assigned = Vec::new();
        for (i, id) in ids.into_iter().take(ticket.quantity).enumerate() {
            let Some(record) = set.record_id(i) else {
                break;
            };
            if set.set_preview(i, &id).is_ok() {
                self.assignment.insert(i, (record, id.clone()));
                assigned.push((i, id));
            }
        }
        debug!(epoch = ticket.epoch, assigned = assigned.len(), "preview applied");
        PreviewOutcome::Applied { assigned }
    }
}
