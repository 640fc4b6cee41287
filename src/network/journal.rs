use super::ids::RecordKey;
use std::collections::BTreeSet;

/// Keys of records touched since the last commit.
#[derive(Debug, Clone, Default)]
pub(super) struct Journal {
    dirty: BTreeSet<RecordKey>,
}

impl Journal {
    pub fn touch(&mut self, key: RecordKey) {
        self.dirty.insert(key);
    }

    pub fn len(&self) -> usize {
        self.dirty.len()
    }

    /// Touched keys in ascending order; the journal is left empty.
    pub fn drain(&mut self) -> Vec<RecordKey> {
        std::mem::take(&mut self.dirty).into_iter().collect()
    }
}
