use std::collections::HashSet;

use tracing::debug;

use crate::config::SourceSide;
use crate::index::{ExactIndex, RecordComparator};
use crate::model::{Key, MatchKind, MatchedPair, PairMatchOutput, Record};
use crate::similarity::key_similarity;

/// Match two sources by exact key equality.
///
/// Records sharing a key form a group on each side; groups pair positionally
/// (after `comparator` ordering, if any). Excess group members and keys with no
/// counterpart end up in `a_only` / `b_only`, in input order.
pub fn match_exact(
    a_records: &[Record],
    a_keys: &[Key],
    b_records: &[Record],
    b_keys: &[Key],
    comparator: Option<&dyn RecordComparator>,
) -> PairMatchOutput {
    let a_index = ExactIndex::build(a_keys);
    let b_index = ExactIndex::build(b_keys);
    debug!(a_groups = a_index.len(), b_groups = b_index.len(), "exact index built");

    let mut matched = Vec::new();
    let mut a_only = Vec::new();
    let mut b_only = Vec::new();

    // Walk A in input order so output never depends on hash order.
    let mut seen: HashSet<&Key> = HashSet::new();
    for key in a_keys {
        if !seen.insert(key) {
            continue;
        }
        let a_group = a_index.ordered_group(key, a_records, comparator);
        if b_index.get(key).is_none() {
            a_only.extend(a_group);
            continue;
        }
        let b_group = b_index.ordered_group(key, b_records, comparator);

        let paired = a_group.len().min(b_group.len());
        for (&ai, &bi) in a_group.iter().zip(&b_group) {
            matched.push(MatchedPair {
                a_index: ai,
                b_index: bi,
                kind: MatchKind::Exact,
                score: 1.0,
            });
        }
        a_only.extend_from_slice(&a_group[paired..]);
        b_only.extend_from_slice(&b_group[paired..]);
    }

    for (bi, key) in b_keys.iter().enumerate() {
        if a_index.get(key).is_none() {
            b_only.push(bi);
        }
    }

    matched.sort_by_key(|m| m.a_index);
    a_only.sort_unstable();
    b_only.sort_unstable();

    PairMatchOutput {
        matched,
        a_only,
        b_only,
    }
}

/// Greedy similarity matching over records left unmatched by [`match_exact`].
///
/// Every pair scoring at least `threshold` is a candidate. Candidates are taken
/// in descending score order; ties go to the lowest input index on the
/// `preferred` side, then on the other side. A record is consumed by its first
/// accepted pairing.
pub fn match_fuzzy(
    a_keys: &[Key],
    a_residue: &[usize],
    b_keys: &[Key],
    b_residue: &[usize],
    threshold: f64,
    preferred: SourceSide,
) -> PairMatchOutput {
    let mut candidates: Vec<MatchedPair> = Vec::new();
    for &ai in a_residue {
        for &bi in b_residue {
            let score = key_similarity(&a_keys[ai], &b_keys[bi]);
            if score >= threshold {
                candidates.push(MatchedPair {
                    a_index: ai,
                    b_index: bi,
                    kind: MatchKind::Fuzzy,
                    score,
                });
            }
        }
    }
    debug!(
        a_residue = a_residue.len(),
        b_residue = b_residue.len(),
        candidates = candidates.len(),
        "fuzzy candidates scored"
    );

    candidates.sort_by(|x, y| {
        let (x_first, x_second, y_first, y_second) = match preferred {
            SourceSide::A => (x.a_index, x.b_index, y.a_index, y.b_index),
            SourceSide::B => (x.b_index, x.a_index, y.b_index, y.a_index),
        };
        y.score
            .total_cmp(&x.score)
            .then(x_first.cmp(&y_first))
            .then(x_second.cmp(&y_second))
    });

    let mut used_a: HashSet<usize> = HashSet::new();
    let mut used_b: HashSet<usize> = HashSet::new();
    let mut matched = Vec::new();
    for candidate in candidates {
        if used_a.contains(&candidate.a_index) || used_b.contains(&candidate.b_index) {
            continue;
        }
        used_a.insert(candidate.a_index);
        used_b.insert(candidate.b_index);
        matched.push(candidate);
    }

    matched.sort_by_key(|m| m.a_index);
    let a_only = a_residue.iter().copied().filter(|i| !used_a.contains(i)).collect();
    let b_only = b_residue.iter().copied().filter(|i| !used_b.contains(i)).collect();

    PairMatchOutput {
        matched,
        a_only,
        b_only,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Value;

    fn rec(id: &str) -> Record {
        Record::new().with("id", id)
    }

    fn keys(records: &[Record]) -> Vec<Key> {
        records
            .iter()
            .map(|r| Key(vec![r.get("id").cloned().unwrap_or(Value::Null)]))
            .collect()
    }

    fn pairs(out: &PairMatchOutput) -> Vec<(usize, usize)> {
        out.matched.iter().map(|m| (m.a_index, m.b_index)).collect()
    }

    #[test]
    fn exact_key_match() {
        let a = vec![rec("p1"), rec("p2")];
        let b = vec![rec("p3"), rec("p1")];
        let out = match_exact(&a, &keys(&a), &b, &keys(&b), None);
        assert_eq!(pairs(&out), vec![(0, 1)]);
        assert_eq!(out.matched[0].kind, MatchKind::Exact);
        assert_eq!(out.matched[0].score, 1.0);
        assert_eq!(out.a_only, vec![1]);
        assert_eq!(out.b_only, vec![0]);
    }

    #[test]
    fn exact_groups_pair_positionally() {
        let a = vec![rec("k"), rec("x"), rec("k"), rec("k")];
        let b = vec![rec("k"), rec("k")];
        let out = match_exact(&a, &keys(&a), &b, &keys(&b), None);
        assert_eq!(pairs(&out), vec![(0, 0), (2, 1)]);
        // Excess A group member and the unmatched key, in input order
        assert_eq!(out.a_only, vec![1, 3]);
        assert!(out.b_only.is_empty());
    }

    #[test]
    fn exact_groups_follow_comparator() {
        let a = vec![
            rec("k").with("rank", 2i64),
            rec("k").with("rank", 1i64),
        ];
        let b = vec![
            rec("k").with("rank", 1i64),
            rec("k").with("rank", 2i64),
        ];
        let by_rank = |x: &Record, y: &Record| x.get("rank").cmp(&y.get("rank"));
        let out = match_exact(&a, &keys(&a), &b, &keys(&b), Some(&by_rank));
        assert_eq!(pairs(&out), vec![(0, 1), (1, 0)]);
    }

    #[test]
    fn fuzzy_threshold_is_inclusive() {
        let a = vec![rec("abcd")];
        let b = vec![rec("abce")];
        let (ak, bk) = (keys(&a), keys(&b));

        let out = match_fuzzy(&ak, &[0], &bk, &[0], 0.75, SourceSide::A);
        assert_eq!(pairs(&out), vec![(0, 0)]);
        assert_eq!(out.matched[0].kind, MatchKind::Fuzzy);

        let out = match_fuzzy(&ak, &[0], &bk, &[0], 0.75 + 1e-9, SourceSide::A);
        assert!(out.matched.is_empty());
        assert_eq!(out.a_only, vec![0]);
        assert_eq!(out.b_only, vec![0]);
    }

    #[test]
    fn fuzzy_prefers_best_score() {
        let a = vec![rec("proposal-10")];
        let b = vec![rec("proposal-19"), rec("proposal-1O"), rec("proposal-10x")];
        let (ak, bk) = (keys(&a), keys(&b));
        let out = match_fuzzy(&ak, &[0], &bk, &[0, 1, 2], 0.5, SourceSide::A);
        // "proposal-10x" is 1 insertion away over 12 chars; the others 1 substitution over 11
        assert_eq!(pairs(&out), vec![(0, 2)]);
        assert_eq!(out.b_only, vec![0, 1]);
    }

    #[test]
    fn fuzzy_ties_go_to_lowest_index() {
        // Both A records score identically against both B records.
        let a = vec![rec("abcx"), rec("abcy")];
        let b = vec![rec("abcz"), rec("abcw")];
        let (ak, bk) = (keys(&a), keys(&b));

        let out = match_fuzzy(&ak, &[0, 1], &bk, &[0, 1], 0.7, SourceSide::A);
        assert_eq!(pairs(&out), vec![(0, 0), (1, 1)]);
    }

    #[test]
    fn fuzzy_ties_with_either_preferred_side() {
        // A0 scores 0.75 against both B records, A1 scores 0.5 against both.
        let a = vec![rec("abcd"), rec("abzz")];
        let b = vec![rec("abcx"), rec("abcy")];
        let (ak, bk) = (keys(&a), keys(&b));

        let out = match_fuzzy(&ak, &[0, 1], &bk, &[0, 1], 0.5, SourceSide::A);
        assert_eq!(pairs(&out), vec![(0, 0), (1, 1)]);

        let out = match_fuzzy(&ak, &[0, 1], &bk, &[0, 1], 0.5, SourceSide::B);
        assert_eq!(pairs(&out), vec![(0, 0), (1, 1)]);

        // Only the higher threshold leaves A1 unmatched.
        let out = match_fuzzy(&ak, &[0, 1], &bk, &[0, 1], 0.6, SourceSide::B);
        assert_eq!(pairs(&out), vec![(0, 0)]);
        assert_eq!(out.a_only, vec![1]);
        assert_eq!(out.b_only, vec![1]);
    }

    #[test]
    fn fuzzy_only_considers_residue() {
        let a = vec![rec("abcd"), rec("abce")];
        let b = vec![rec("abcd")];
        let (ak, bk) = (keys(&a), keys(&b));
        let out = match_fuzzy(&ak, &[1], &bk, &[], 0.5, SourceSide::A);
        assert!(out.matched.is_empty());
        assert_eq!(out.a_only, vec![1]);
    }
}
