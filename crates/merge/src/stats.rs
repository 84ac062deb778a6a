use crate::model::{ConflictEntry, MatchKind, MatchedPair, MergeStatistics};

/// Compute merge statistics from the final classification.
pub fn compute_statistics(
    matched: &[MatchedPair],
    a_only: usize,
    b_only: usize,
    conflicts: &[ConflictEntry],
) -> MergeStatistics {
    let mut exact_matches = 0;
    let mut fuzzy_matches = 0;
    for m in matched {
        match m.kind {
            MatchKind::Exact => exact_matches += 1,
            MatchKind::Fuzzy => fuzzy_matches += 1,
        }
    }

    MergeStatistics {
        total_records: matched.len() + a_only + b_only,
        matches_found: matched.len(),
        exact_matches,
        fuzzy_matches,
        conflicts_resolved: conflicts.len(),
        source_a_only: a_only,
        source_b_only: b_only,
    }
}
