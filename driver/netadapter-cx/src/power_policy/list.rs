//! Caller-owned snapshots of the power policy entries

use alloc::{sync::Arc, vec::Vec};

use super::{offload::PowerOffload, wake::WakeSource};

pub type WakeSourceList = PowerList<WakeSource>;
pub type PowerOffloadList = PowerList<PowerOffload>;

/// Entries relevant at the time the list was filled
///
/// Entries are shared with the power policy, so their enabled state stays
/// live after the list was filled.
#[derive(Debug)]
pub struct PowerList<T> {
    entries: Vec<Arc<T>>,
}

impl<T> PowerList<T> {
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Arc<T>> {
        self.entries.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<T>> {
        self.entries.iter()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    pub(crate) fn push(&mut self, entry: Arc<T>) {
        self.entries.push(entry);
    }
}

impl<T> Default for PowerList<T> {
    fn default() -> Self {
        Self::new()
    }
}
