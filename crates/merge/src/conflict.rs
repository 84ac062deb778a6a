use std::collections::BTreeSet;

use crate::model::{Conflict, Record};

/// Finds field-level disagreements between two matched records.
#[derive(Debug, Clone)]
pub struct ConflictDetector<'a> {
    ignored: &'a BTreeSet<String>,
    case_sensitive: bool,
    /// Field decided by the strategy itself (the timestamp under newest/oldest).
    deciding_field: Option<&'a str>,
}

impl<'a> ConflictDetector<'a> {
    pub fn new(ignored: &'a BTreeSet<String>, case_sensitive: bool) -> Self {
        Self {
            ignored,
            case_sensitive,
            deciding_field: None,
        }
    }

    pub fn with_deciding_field(mut self, field: Option<&'a str>) -> Self {
        self.deciding_field = field;
        self
    }

    fn is_excluded(&self, field: &str) -> bool {
        self.ignored.contains(field) || self.deciding_field == Some(field)
    }

    /// Union of field names over both records, minus excluded ones, in name order.
    fn fields<'r>(&self, a: &'r Record, b: &'r Record) -> BTreeSet<&'r str> {
        a.fields
            .keys()
            .chain(b.fields.keys())
            .map(|s| s.as_str())
            .filter(|f| !self.is_excluded(f))
            .collect()
    }

    /// A field conflicts when both sides hold a non-null value and the values differ.
    pub fn detect(&self, a: &Record, b: &Record) -> Vec<Conflict> {
        self.fields(a, b)
            .into_iter()
            .filter_map(|field| {
                let (va, vb) = (a.get(field)?, b.get(field)?);
                if va.is_null() || vb.is_null() || va.matches(vb, self.case_sensitive) {
                    return None;
                }
                Some(Conflict {
                    field: field.to_string(),
                    value_a: va.clone(),
                    value_b: vb.clone(),
                })
            })
            .collect()
    }

    /// Fields present on exactly one side. These copy through and are never conflicts.
    pub fn one_sided(&self, a: &Record, b: &Record) -> Vec<String> {
        self.fields(a, b)
            .into_iter()
            .filter(|f| a.contains(f) != b.contains(f))
            .map(str::to_string)
            .collect()
    }
}
