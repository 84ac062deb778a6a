//! Conflict resolution strategies.
//!
//! Every strategy produces one record per matched pair. Non-conflicting
//! fields copy through: the non-null side wins, and when both sides agree the
//! preferred side's spelling is kept. Ignored fields never reach the output.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashSet};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::config::{ConflictStrategy, MergeConfig, SourceSide};
use crate::error::{MergeError, MergeResult, ResolverError};
use crate::model::{Conflict, Record, ResolutionSource, ResolvedRecord, Value};

/// Produces one resolved record from a matched pair and its conflicts.
///
/// Implemented by [`BuiltinResolver`] and by any caller-supplied strategy
/// plugged in through [`MergeConfig::with_custom_resolver`]. A custom
/// resolver sees the whole pair at once and returns the entire record.
pub trait ConflictResolver: Send + Sync {
    fn resolve(
        &self,
        a: &Record,
        b: &Record,
        conflicts: &[Conflict],
    ) -> Result<Record, ResolverError>;
}

impl<F> ConflictResolver for F
where
    F: Fn(&Record, &Record, &[Conflict]) -> Result<Record, ResolverError> + Send + Sync,
{
    fn resolve(
        &self,
        a: &Record,
        b: &Record,
        conflicts: &[Conflict],
    ) -> Result<Record, ResolverError> {
        self(a, b, conflicts)
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Strategy selected for one merge run.
pub enum Resolver<'a> {
    Builtin(BuiltinResolver<'a>),
    Custom {
        resolver: &'a dyn ConflictResolver,
        ignored: &'a BTreeSet<String>,
    },
}

impl<'a> Resolver<'a> {
    /// Expects a validated config.
    pub fn for_config(config: &'a MergeConfig) -> MergeResult<Self> {
        if config.conflict_strategy == ConflictStrategy::Custom {
            let custom = config
                .custom_resolver
                .as_ref()
                .ok_or(MergeError::MissingCustomResolver)?;
            return Ok(Self::Custom {
                resolver: custom.0.as_ref(),
                ignored: &config.ignored_fields,
            });
        }
        Ok(Self::Builtin(BuiltinResolver::from_config(config)))
    }

    /// Resolve the pair (`a_index`, `b_index`) of the current run.
    pub fn resolve_pair(
        &self,
        a: &Record,
        b: &Record,
        a_index: usize,
        b_index: usize,
        conflicts: &[Conflict],
    ) -> MergeResult<ResolvedRecord> {
        match self {
            Self::Builtin(builtin) => builtin.resolve_traced(a, b, a_index, b_index, conflicts),
            Self::Custom { resolver, ignored } => {
                let mut record =
                    resolver
                        .resolve(a, b, conflicts)
                        .map_err(|source| MergeError::CustomResolver {
                            a_index,
                            b_index,
                            source,
                        })?;
                record.fields.retain(|k, _| !ignored.contains(k));
                let trace = conflicts
                    .iter()
                    .map(|c| (c.field.clone(), ResolutionSource::Custom))
                    .collect();
                Ok(ResolvedRecord { record, trace })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Built-in strategies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct BuiltinResolver<'a> {
    strategy: ConflictStrategy,
    timestamp_field: Option<&'a str>,
    preferred: SourceSide,
    ignored: &'a BTreeSet<String>,
}

impl<'a> BuiltinResolver<'a> {
    pub fn from_config(config: &'a MergeConfig) -> Self {
        Self {
            strategy: config.conflict_strategy,
            timestamp_field: config.timestamp_field.as_deref(),
            preferred: config.preferred_side(),
            ignored: &config.ignored_fields,
        }
    }

    pub fn resolve_traced(
        &self,
        a: &Record,
        b: &Record,
        a_index: usize,
        b_index: usize,
        conflicts: &[Conflict],
    ) -> MergeResult<ResolvedRecord> {
        let mut record = self.copy_through(a, b);
        let mut trace = BTreeMap::new();

        let winner = match self.strategy {
            ConflictStrategy::KeepSourceA => Some(SourceSide::A),
            ConflictStrategy::KeepSourceB => Some(SourceSide::B),
            ConflictStrategy::KeepMostComplete => {
                Some(match a.non_null_count().cmp(&b.non_null_count()) {
                    Ordering::Greater => SourceSide::A,
                    Ordering::Less => SourceSide::B,
                    Ordering::Equal => self.preferred,
                })
            }
            ConflictStrategy::KeepNewest | ConflictStrategy::KeepOldest => {
                match self.timestamp_winner(a, b, a_index, b_index) {
                    Ok(side) => {
                        // The deciding field follows the winning record.
                        if let Some(field) = self.timestamp_field {
                            if let Some(ts) = side_record(side, a, b).get(field) {
                                record.insert(field, ts.clone());
                            }
                        }
                        Some(side)
                    }
                    // Without conflicts there is nothing to decide.
                    Err(_) if conflicts.is_empty() => None,
                    Err(e) => return Err(e),
                }
            }
            ConflictStrategy::Combine => None,
            // Dispatched through `Resolver::Custom`; a built-in never sees it.
            ConflictStrategy::Custom => return Err(MergeError::MissingCustomResolver),
        };

        for conflict in conflicts {
            if self.ignored.contains(&conflict.field) {
                continue;
            }
            let (value, source) = match winner {
                Some(SourceSide::A) => (conflict.value_a.clone(), ResolutionSource::SourceA),
                Some(SourceSide::B) => (conflict.value_b.clone(), ResolutionSource::SourceB),
                None => (
                    combine(&conflict.field, &conflict.value_a, &conflict.value_b)?,
                    ResolutionSource::Combined,
                ),
            };
            record.insert(conflict.field.clone(), value);
            trace.insert(conflict.field.clone(), source);
        }

        Ok(ResolvedRecord { record, trace })
    }

    fn copy_through(&self, a: &Record, b: &Record) -> Record {
        let (first, second) = match self.preferred {
            SourceSide::A => (a, b),
            SourceSide::B => (b, a),
        };
        let mut out = Record::new();
        for (field, value) in first.fields.iter().chain(second.fields.iter()) {
            if self.ignored.contains(field) {
                continue;
            }
            match out.fields.get(field) {
                Some(existing) if !existing.is_null() => {}
                _ => {
                    out.fields.insert(field.clone(), value.clone());
                }
            }
        }
        out
    }

    fn timestamp_winner(
        &self,
        a: &Record,
        b: &Record,
        a_index: usize,
        b_index: usize,
    ) -> MergeResult<SourceSide> {
        let field = self
            .timestamp_field
            .ok_or(MergeError::MissingTimestampField {
                strategy: self.strategy,
            })?;
        let ts_a = present(a, field).ok_or_else(|| MergeError::MissingTimestamp {
            side: 'A',
            index: a_index,
            field: field.to_string(),
        })?;
        let ts_b = present(b, field).ok_or_else(|| MergeError::MissingTimestamp {
            side: 'B',
            index: b_index,
            field: field.to_string(),
        })?;

        let ord = compare_timestamps(ts_a, ts_b).ok_or_else(|| {
            MergeError::IncomparableTimestamps {
                a_index,
                b_index,
                a: ts_a.to_string(),
                b: ts_b.to_string(),
            }
        })?;

        let newest_wins = self.strategy == ConflictStrategy::KeepNewest;
        Ok(match (ord, newest_wins) {
            (Ordering::Equal, _) => self.preferred,
            (Ordering::Greater, true) | (Ordering::Less, false) => SourceSide::A,
            (Ordering::Less, true) | (Ordering::Greater, false) => SourceSide::B,
        })
    }
}

/// Built-in strategies also satisfy the pluggable interface.
impl ConflictResolver for BuiltinResolver<'_> {
    fn resolve(
        &self,
        a: &Record,
        b: &Record,
        conflicts: &[Conflict],
    ) -> Result<Record, ResolverError> {
        self.resolve_traced(a, b, 0, 0, conflicts)
            .map(|resolved| resolved.record)
            .map_err(|e| Box::new(e) as ResolverError)
    }
}

fn side_record<'r>(side: SourceSide, a: &'r Record, b: &'r Record) -> &'r Record {
    match side {
        SourceSide::A => a,
        SourceSide::B => b,
    }
}

fn present<'r>(record: &'r Record, field: &str) -> Option<&'r Value> {
    record.get(field).filter(|v| !v.is_null())
}

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.and_utc());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// Order two timestamp values. Numbers are epoch-like, strings are parsed
/// as dates when possible and compared lexically otherwise.
pub fn compare_timestamps(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Timestamp(x), Value::Timestamp(y)) => Some(x.cmp(y)),
        (Value::Number(x), Value::Number(y)) => Some(x.cmp(y)),
        (Value::String(x), Value::String(y)) => match (parse_timestamp(x), parse_timestamp(y)) {
            (Some(px), Some(py)) => Some(px.cmp(&py)),
            _ => Some(x.cmp(y)),
        },
        (Value::Timestamp(x), Value::String(y)) => parse_timestamp(y).map(|py| x.cmp(&py)),
        (Value::String(x), Value::Timestamp(y)) => parse_timestamp(x).map(|px| px.cmp(y)),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// COMBINE
// ---------------------------------------------------------------------------

/// Union of two values, A's elements first, then B's novel ones.
///
/// A scalar beside a collection counts as a one-element collection. The
/// result is a set unless either side is a sequence. Two scalars fail.
pub fn combine(field: &str, a: &Value, b: &Value) -> MergeResult<Value> {
    if !a.is_collection() && !b.is_collection() {
        return Err(MergeError::Uncombinable {
            field: field.to_string(),
            a: a.to_string(),
            b: b.to_string(),
        });
    }

    let as_set = !matches!(a, Value::Sequence(_)) && !matches!(b, Value::Sequence(_));
    if as_set {
        let mut out: BTreeSet<Value> = BTreeSet::new();
        out.extend(elements(a).into_iter().cloned());
        out.extend(elements(b).into_iter().cloned());
        return Ok(Value::Set(out));
    }

    let mut seen: HashSet<&Value> = HashSet::new();
    let mut out = Vec::new();
    for item in elements(a).into_iter().chain(elements(b)) {
        if seen.insert(item) {
            out.push(item.clone());
        }
    }
    Ok(Value::Sequence(out))
}

fn elements(v: &Value) -> Vec<&Value> {
    match v {
        Value::Sequence(items) => items.iter().collect(),
        Value::Set(items) => items.iter().collect(),
        other => vec![other],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::ConflictDetector;

    fn set(xs: &[i64]) -> Value {
        Value::Set(xs.iter().map(|&x| Value::from(x)).collect())
    }

    fn seq(xs: &[i64]) -> Value {
        Value::Sequence(xs.iter().map(|&x| Value::from(x)).collect())
    }

    fn resolve(config: &MergeConfig, a: &Record, b: &Record) -> MergeResult<ResolvedRecord> {
        let deciding = if config.conflict_strategy.is_timestamp_based() {
            config.timestamp_field.as_deref()
        } else {
            None
        };
        let conflicts = ConflictDetector::new(&config.ignored_fields, config.case_sensitive)
            .with_deciding_field(deciding)
            .detect(a, b);
        Resolver::for_config(config)?.resolve_pair(a, b, 0, 0, &conflicts)
    }

    #[test]
    fn combine_sets_unions_without_duplicates() {
        assert_eq!(combine("tags", &set(&[1, 2]), &set(&[2, 3])).unwrap(), set(&[1, 2, 3]));
    }

    #[test]
    fn combine_sequences_keeps_a_order_then_b_novel() {
        let out = combine("voters", &seq(&[3, 1, 2]), &seq(&[2, 5, 3, 4])).unwrap();
        assert_eq!(out, seq(&[3, 1, 2, 5, 4]));
    }

    #[test]
    fn combine_promotes_scalar_side() {
        assert_eq!(combine("tags", &seq(&[1, 2]), &Value::from(3i64)).unwrap(), seq(&[1, 2, 3]));
        assert_eq!(combine("tags", &Value::from(0i64), &set(&[1])).unwrap(), set(&[0, 1]));
        // A sequence on either side yields a sequence
        assert_eq!(combine("tags", &set(&[1]), &seq(&[2])).unwrap(), seq(&[1, 2]));
    }

    #[test]
    fn combine_rejects_two_scalars() {
        let err = combine("title", &"x".into(), &"y".into()).unwrap_err();
        assert!(matches!(err, MergeError::Uncombinable { .. }));
        assert!(err.to_string().contains("'title'"));
    }

    #[test]
    fn keep_newest_takes_later_record() {
        let config = MergeConfig::new(["id"]).with_timestamp_field("t");
        let a = Record::new().with("id", 1i64).with("v", "x").with("t", 10i64);
        let b = Record::new().with("id", 1i64).with("v", "y").with("t", 20i64);
        let resolved = resolve(&config, &a, &b).unwrap();
        assert_eq!(resolved.record, b);
        assert_eq!(resolved.trace.len(), 1);
        assert_eq!(resolved.trace["v"], ResolutionSource::SourceB);
    }

    #[test]
    fn keep_newest_tie_keeps_source_a() {
        let config = MergeConfig::new(["id"]).with_timestamp_field("t");
        let a = Record::new().with("id", 1i64).with("v", "x").with("t", 10i64);
        let b = Record::new().with("id", 1i64).with("v", "y").with("t", 10i64);
        let resolved = resolve(&config, &a, &b).unwrap();
        assert_eq!(resolved.record.get("v"), Some(&Value::from("x")));
        assert_eq!(resolved.trace["v"], ResolutionSource::SourceA);
    }

    #[test]
    fn keep_newest_tie_follows_source_priority() {
        let config = MergeConfig::new(["id"])
            .with_timestamp_field("t")
            .with_source_priority(vec![SourceSide::B, SourceSide::A]);
        let a = Record::new().with("id", 1i64).with("v", "x").with("t", 10i64);
        let b = Record::new().with("id", 1i64).with("v", "y").with("t", 10i64);
        let resolved = resolve(&config, &a, &b).unwrap();
        assert_eq!(resolved.record.get("v"), Some(&Value::from("y")));
    }

    #[test]
    fn keep_oldest_parses_date_strings() {
        let config = MergeConfig::new(["id"])
            .with_strategy(ConflictStrategy::KeepOldest)
            .with_timestamp_field("created");
        let a = Record::new().with("id", 1i64).with("state", "closed").with("created", "2024-03-02");
        let b = Record::new()
            .with("id", 1i64)
            .with("state", "active")
            .with("created", "2024-03-01T23:00:00Z");
        let resolved = resolve(&config, &a, &b).unwrap();
        assert_eq!(resolved.record.get("state"), Some(&Value::from("active")));
        assert_eq!(
            resolved.record.get("created"),
            Some(&Value::from("2024-03-01T23:00:00Z"))
        );
    }

    #[test]
    fn missing_timestamp_fails_only_with_conflicts() {
        let config = MergeConfig::new(["id"]).with_timestamp_field("t");
        let a = Record::new().with("id", 1i64).with("v", "x");
        let b = Record::new().with("id", 1i64).with("v", "y").with("t", 20i64);
        let err = resolve(&config, &a, &b).unwrap_err();
        assert!(matches!(err, MergeError::MissingTimestamp { side: 'A', .. }));

        let b = Record::new().with("id", 1i64).with("v", "x").with("t", 20i64);
        let resolved = resolve(&config, &a, &b).unwrap();
        assert_eq!(resolved.record.get("t"), Some(&Value::from(20i64)));
    }

    #[test]
    fn incomparable_timestamps_fail() {
        let config = MergeConfig::new(["id"]).with_timestamp_field("t");
        let a = Record::new().with("id", 1i64).with("v", "x").with("t", 10i64);
        let b = Record::new().with("id", 1i64).with("v", "y").with("t", true);
        let err = resolve(&config, &a, &b).unwrap_err();
        assert!(matches!(err, MergeError::IncomparableTimestamps { .. }));
    }

    #[test]
    fn keep_source_b_and_copy_through() {
        let config = MergeConfig::new(["id"]).with_strategy(ConflictStrategy::KeepSourceB);
        let a = Record::new()
            .with("id", 1i64)
            .with("title", "A title")
            .with("body", Value::Null)
            .with("author", "alice");
        let b = Record::new()
            .with("id", 1i64)
            .with("title", "B title")
            .with("body", "text")
            .with("quorum", 4i64);
        let resolved = resolve(&config, &a, &b).unwrap();
        let expected = Record::new()
            .with("id", 1i64)
            .with("title", "B title")
            .with("body", "text")
            .with("author", "alice")
            .with("quorum", 4i64);
        assert_eq!(resolved.record, expected);
    }

    #[test]
    fn keep_most_complete_counts_non_null_fields() {
        let config = MergeConfig::new(["id"]).with_strategy(ConflictStrategy::KeepMostComplete);
        let a = Record::new().with("id", 1i64).with("v", "x").with("extra", Value::Null);
        let b = Record::new().with("id", 1i64).with("v", "y").with("more", 1i64);
        let resolved = resolve(&config, &a, &b).unwrap();
        assert_eq!(resolved.record.get("v"), Some(&Value::from("y")));

        // Equal counts keep source A
        let b = Record::new().with("id", 1i64).with("v", "y");
        let resolved = resolve(&config, &a, &b).unwrap();
        assert_eq!(resolved.record.get("v"), Some(&Value::from("x")));
    }

    #[test]
    fn combine_strategy_traces_combined() {
        let config = MergeConfig::new(["id"]).with_strategy(ConflictStrategy::Combine);
        let a = Record::new().with("id", 1i64).with("tags", set(&[1, 2]));
        let b = Record::new().with("id", 1i64).with("tags", set(&[2, 3]));
        let resolved = resolve(&config, &a, &b).unwrap();
        assert_eq!(resolved.record.get("tags"), Some(&set(&[1, 2, 3])));
        assert_eq!(resolved.trace["tags"], ResolutionSource::Combined);
    }

    #[test]
    fn ignored_fields_are_dropped() {
        let config = MergeConfig::new(["id"])
            .with_strategy(ConflictStrategy::KeepSourceA)
            .with_ignored_fields(["scraped_at"]);
        let a = Record::new().with("id", 1i64).with("scraped_at", 1i64);
        let b = Record::new().with("id", 1i64).with("scraped_at", 2i64);
        let resolved = resolve(&config, &a, &b).unwrap();
        assert!(!resolved.record.contains("scraped_at"));
        assert!(resolved.trace.is_empty());
    }

    #[test]
    fn custom_resolver_receives_whole_pair() {
        let config = MergeConfig::new(["id"])
            .with_strategy(ConflictStrategy::Custom)
            .with_custom_resolver(
                |a: &Record, b: &Record, conflicts: &[Conflict]| -> Result<Record, ResolverError> {
                    let mut out = a.clone();
                    out.insert("conflict_count", Value::from(conflicts.len() as i64));
                    out.insert("other_title", b.get("title").cloned().unwrap_or(Value::Null));
                    Ok(out)
                },
            );
        let a = Record::new().with("id", 1i64).with("title", "x").with("state", "open");
        let b = Record::new().with("id", 1i64).with("title", "y").with("state", "closed");
        let resolved = resolve(&config, &a, &b).unwrap();
        assert_eq!(resolved.record.get("conflict_count"), Some(&Value::from(2i64)));
        assert_eq!(resolved.record.get("other_title"), Some(&Value::from("y")));
        assert_eq!(resolved.trace["title"], ResolutionSource::Custom);
        assert_eq!(resolved.trace["state"], ResolutionSource::Custom);
    }

    #[test]
    fn custom_resolver_failure_is_processing_error() {
        let config = MergeConfig::new(["id"])
            .with_strategy(ConflictStrategy::Custom)
            .with_custom_resolver(
                |_: &Record, _: &Record, _: &[Conflict]| -> Result<Record, ResolverError> {
                    Err("no rule for this pair".into())
                },
            );
        let a = Record::new().with("id", 1i64).with("v", "x");
        let b = Record::new().with("id", 1i64).with("v", "y");
        let err = resolve(&config, &a, &b).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Processing);
        assert!(err.to_string().contains("no rule for this pair"));
    }

    #[test]
    fn builtin_implements_pluggable_interface() {
        let config = MergeConfig::new(["id"]).with_strategy(ConflictStrategy::KeepSourceB);
        let builtin = BuiltinResolver::from_config(&config);
        let a = Record::new().with("id", 1i64).with("v", "x");
        let b = Record::new().with("id", 1i64).with("v", "y");
        let conflicts = ConflictDetector::new(&config.ignored_fields, false).detect(&a, &b);
        let dyn_resolver: &dyn ConflictResolver = &builtin;
        let out = dyn_resolver.resolve(&a, &b, &conflicts).unwrap();
        assert_eq!(out, b);
    }
}
