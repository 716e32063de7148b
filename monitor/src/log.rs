use crate::model::Timestamped;

/// Append-only record of commands or alerts.
///
/// Entries are never edited after they are pushed; readers get a
/// newest-first view sorted on the entry timestamp.
#[derive(Debug, Clone)]
pub struct EventLog<T> {
    entries: Vec<T>,
}

impl<T> Default for EventLog<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T: Timestamped> EventLog<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, entry: T) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Newest first. Entries sharing a timestamp keep latest-appended first.
    pub fn recent(&self) -> Vec<&T> {
        let mut view: Vec<&T> = self.entries.iter().rev().collect();
        view.sort_by(|a, b| b.timestamp().cmp(&a.timestamp()));
        view
    }

    pub fn for_bin(&self, bin_id: &str) -> Vec<&T> {
        self.recent()
            .into_iter()
            .filter(|entry| entry.bin_id() == bin_id)
            .collect()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}
