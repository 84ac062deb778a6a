use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::config::MergeConfig;
use crate::conflict::ConflictDetector;
use crate::error::MergeResult;
use crate::key::KeyExtractor;
use crate::matcher::{match_exact, match_fuzzy};
use crate::model::{
    ConflictEntry, MergeMeta, MergeOutcome, MergeStatistics, OutcomeError, Record,
};
use crate::resolve::Resolver;
use crate::stats::compute_statistics;

/// Validated config bound to an engine. Holds no state between merges.
#[derive(Debug, Clone)]
pub struct MergeEngine {
    config: MergeConfig,
}

impl MergeEngine {
    pub fn new(config: MergeConfig) -> MergeResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    pub fn merge(&self, source_a: &[Record], source_b: &[Record]) -> MergeOutcome {
        merge(source_a, source_b, &self.config)
    }
}

/// Merge two record collections per config.
///
/// Never fails outright: validation and resolution errors come back as
/// `success = false` with the error in `errors` and no merged records.
pub fn merge(source_a: &[Record], source_b: &[Record], config: &MergeConfig) -> MergeOutcome {
    let meta = MergeMeta {
        engine_version: env!("CARGO_PKG_VERSION").to_string(),
        strategy: config.conflict_strategy.to_string(),
    };
    info!(
        source_a = source_a.len(),
        source_b = source_b.len(),
        strategy = %config.conflict_strategy,
        "merge started"
    );

    match run(source_a, source_b, config) {
        Ok(merged) => {
            info!(
                total = merged.stats.total_records,
                matches = merged.stats.matches_found,
                conflicts = merged.stats.conflicts_resolved,
                source_a_only = merged.stats.source_a_only,
                source_b_only = merged.stats.source_b_only,
                "merge complete"
            );
            MergeOutcome {
                success: true,
                merged_records: Some(merged.records),
                conflicts: merged.conflicts,
                stats: merged.stats,
                errors: Vec::new(),
                warnings: merged.warnings,
                meta,
            }
        }
        Err(e) => {
            warn!(kind = %e.kind(), error = %e, "merge failed");
            MergeOutcome {
                success: false,
                merged_records: None,
                conflicts: Vec::new(),
                stats: MergeStatistics::default(),
                errors: vec![OutcomeError {
                    kind: e.kind(),
                    message: e.to_string(),
                }],
                warnings: Vec::new(),
                meta,
            }
        }
    }
}

struct Merged {
    records: Vec<Record>,
    conflicts: Vec<ConflictEntry>,
    stats: MergeStatistics,
    warnings: Vec<String>,
}

fn run(source_a: &[Record], source_b: &[Record], config: &MergeConfig) -> MergeResult<Merged> {
    // 1. Validate
    config.validate()?;
    let resolver = Resolver::for_config(config)?;

    // 2. Keys
    let extractor = KeyExtractor::new(&config.key_fields, config.case_sensitive)?;
    let a_keys = extractor.extract_all(source_a);
    let b_keys = extractor.extract_all(source_b);

    // 3. Exact match
    let comparator = config.group_comparator.as_ref().map(|c| c.0.as_ref());
    let mut pairs = match_exact(source_a, &a_keys, source_b, &b_keys, comparator);
    debug!(
        exact = pairs.matched.len(),
        a_residue = pairs.a_only.len(),
        b_residue = pairs.b_only.len(),
        "exact matching done"
    );

    // 4. Fuzzy match the residue
    let mut warnings = Vec::new();
    if config.merge_similar && !pairs.a_only.is_empty() && !pairs.b_only.is_empty() {
        let fuzzy = match_fuzzy(
            &a_keys,
            &pairs.a_only,
            &b_keys,
            &pairs.b_only,
            config.similarity_threshold,
            config.preferred_side(),
        );
        let near = config.similarity_threshold + config.near_threshold_margin;
        for m in &fuzzy.matched {
            if m.score < near {
                warnings.push(format!(
                    "fuzzy match A#{} ~ B#{} accepted at score {:.3} (threshold {})",
                    m.a_index, m.b_index, m.score, config.similarity_threshold
                ));
            }
        }
        pairs.matched.extend(fuzzy.matched);
        pairs.matched.sort_by_key(|m| m.a_index);
        pairs.a_only = fuzzy.a_only;
        pairs.b_only = fuzzy.b_only;
    }

    // 5. Detect + resolve
    let deciding_field = if config.conflict_strategy.is_timestamp_based() {
        config.timestamp_field.as_deref()
    } else {
        None
    };
    let detector = ConflictDetector::new(&config.ignored_fields, config.case_sensitive)
        .with_deciding_field(deciding_field);

    let total = pairs.matched.len() + pairs.a_only.len() + pairs.b_only.len();
    let mut records = Vec::with_capacity(total);
    let mut conflict_log = Vec::new();
    let mut one_sided: BTreeMap<String, usize> = BTreeMap::new();

    for m in &pairs.matched {
        let (a, b) = (&source_a[m.a_index], &source_b[m.b_index]);
        let conflicts = detector.detect(a, b);
        for field in detector.one_sided(a, b) {
            *one_sided.entry(field).or_insert(0) += 1;
        }

        let resolved = resolver.resolve_pair(a, b, m.a_index, m.b_index, &conflicts)?;
        if !conflicts.is_empty() {
            debug!(
                a_index = m.a_index,
                b_index = m.b_index,
                kind = %m.kind,
                conflicts = conflicts.len(),
                "pair resolved"
            );
        }

        let key = extractor.raw_key(a);
        for conflict in conflicts {
            let Some(&source) = resolved.trace.get(&conflict.field) else {
                continue;
            };
            conflict_log.push(ConflictEntry {
                key: key.clone(),
                a_index: m.a_index,
                b_index: m.b_index,
                match_kind: m.kind,
                score: m.score,
                resolved: resolved.record.get(&conflict.field).cloned(),
                field: conflict.field,
                value_a: conflict.value_a,
                value_b: conflict.value_b,
                source,
            });
        }
        records.push(resolved.record);
    }

    for (field, count) in one_sided {
        warnings.push(format!(
            "field '{field}' present on one side only in {count} matched pair(s)"
        ));
    }

    // 6. Assemble: resolved pairs, then A-only, then B-only
    records.extend(pairs.a_only.iter().map(|&i| source_a[i].clone()));
    records.extend(pairs.b_only.iter().map(|&i| source_b[i].clone()));

    // 7. Statistics
    let stats = compute_statistics(
        &pairs.matched,
        pairs.a_only.len(),
        pairs.b_only.len(),
        &conflict_log,
    );
    debug_assert_eq!(stats.matches_found + stats.source_a_only, source_a.len());
    debug_assert_eq!(stats.matches_found + stats.source_b_only, source_b.len());

    Ok(Merged {
        records,
        conflicts: conflict_log,
        stats,
        warnings,
    })
}
