use crate::model::EntityKind;
use std::collections::HashSet;
use thiserror::Error;
use tokio::sync::watch;
use tracing::debug;

pub const DEFAULT_MAX_SELECTION: usize = 20;

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SelectionEntry {
    pub id: String,
    pub kind: EntityKind,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SelectionChange {
    Selected,
    Deselected,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Error)]
pub enum SelectionError {
    #[error("selection is limited to {limit} objects")]
    LimitExceeded { limit: usize },
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub struct SelectionSummary {
    pub count: usize,
}

impl SelectionSummary {
    pub fn is_empty(self) -> bool {
        self.count == 0
    }
}

/// Bounded set of selected object ids shared by every view.
///
/// Entries are keyed by id, so the same object selected in the graph pane
/// shows as selected in the list pane. Count changes are published on a
/// watch channel.
#[derive(Debug)]
pub struct SelectionStore {
    limit: usize,
    entries: Vec<SelectionEntry>,
    members: HashSet<String>,
    summary: watch::Sender<SelectionSummary>,
}

impl SelectionStore {
    pub fn new(limit: usize) -> Self {
        let (summary, _) = watch::channel(SelectionSummary::default());
        Self {
            limit,
            entries: Vec::new(),
            members: HashSet::new(),
            summary,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.members.contains(id)
    }

    /// Selected entries in the order they were added.
    pub fn entries(&self) -> &[SelectionEntry] {
        &self.entries
    }

    pub fn subscribe(&self) -> watch::Receiver<SelectionSummary> {
        self.summary.subscribe()
    }

    pub fn toggle(
        &mut self,
        id: &str,
        kind: EntityKind,
    ) -> Result<SelectionChange, SelectionError> {
        if self.members.remove(id) {
            self.entries.retain(|entry| entry.id != id);
            self.publish();
            return Ok(SelectionChange::Deselected);
        }
        if self.entries.len() >= self.limit {
            debug!(id, limit = self.limit, "selection limit reached");
            return Err(SelectionError::LimitExceeded { limit: self.limit });
        }
        self.members.insert(id.to_string());
        self.entries.push(SelectionEntry {
            id: id.to_string(),
            kind,
        });
        self.publish();
        Ok(SelectionChange::Selected)
    }

    pub fn clear(&mut self) {
        if self.entries.is_empty() {
            return;
        }
        self.entries.clear();
        self.members.clear();
        self.publish();
    }

    fn publish(&self) {
        self.summary.send_replace(SelectionSummary {
            count: self.entries.len(),
        });
    }
}

impl Default for SelectionStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SELECTION)
    }
}
