use std::cmp::Ordering;
use std::collections::HashMap;

use crate::model::{Key, Record};

/// Caller-supplied ordering applied inside an exact-key group before the
/// group's records are paired positionally.
pub trait RecordComparator: Send + Sync {
    fn compare(&self, a: &Record, b: &Record) -> Ordering;
}

impl<F> RecordComparator for F
where
    F: Fn(&Record, &Record) -> Ordering + Send + Sync,
{
    fn compare(&self, a: &Record, b: &Record) -> Ordering {
        self(a, b)
    }
}

/// Key to input indices for one source. Indices within a group stay in input order.
#[derive(Debug, Default)]
pub struct ExactIndex {
    groups: HashMap<Key, Vec<usize>>,
}

impl ExactIndex {
    pub fn build(keys: &[Key]) -> Self {
        let mut groups: HashMap<Key, Vec<usize>> = HashMap::new();
        for (i, key) in keys.iter().enumerate() {
            groups.entry(key.clone()).or_default().push(i);
        }
        Self { groups }
    }

    pub fn get(&self, key: &Key) -> Option<&[usize]> {
        self.groups.get(key).map(|v| v.as_slice())
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Group members in pairing order: input order, or stably sorted by `comparator`.
    pub fn ordered_group(
        &self,
        key: &Key,
        records: &[Record],
        comparator: Option<&dyn RecordComparator>,
    ) -> Vec<usize> {
        let mut members = self.get(key).map(|g| g.to_vec()).unwrap_or_default();
        if let Some(cmp) = comparator {
            // sort_by is stable, so equal records keep input order
            members.sort_by(|&x, &y| cmp.compare(&records[x], &records[y]));
        }
        members
    }
}
