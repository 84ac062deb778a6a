use crate::error::{MergeError, MergeResult};
use crate::model::{Key, Record, Value};

/// Derives comparable keys from records for a fixed list of key fields.
#[derive(Debug, Clone)]
pub struct KeyExtractor {
    fields: Vec<String>,
    case_sensitive: bool,
}

impl KeyExtractor {
    pub fn new(fields: &[String], case_sensitive: bool) -> MergeResult<Self> {
        if fields.is_empty() {
            return Err(MergeError::EmptyKeyFields);
        }
        Ok(Self {
            fields: fields.to_vec(),
            case_sensitive,
        })
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// A missing key field yields a `Null` component; it never fails.
    pub fn extract(&self, record: &Record) -> Key {
        Key(self
            .fields
            .iter()
            .map(|field| match record.get(field) {
                None => Value::Null,
                Some(Value::String(s)) if !self.case_sensitive => Value::String(s.to_lowercase()),
                Some(v) => v.clone(),
            })
            .collect())
    }

    pub fn extract_all(&self, records: &[Record]) -> Vec<Key> {
        records.iter().map(|r| self.extract(r)).collect()
    }

    /// Key field values as they appear in the record, unfolded.
    pub fn raw_key(&self, record: &Record) -> Key {
        Key(self
            .fields
            .iter()
            .map(|field| record.get(field).cloned().unwrap_or(Value::Null))
            .collect())
    }
}
