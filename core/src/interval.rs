//! Closed block-interval algebra for indexed-coverage tracking.
//!
//! The store records which block ranges have been indexed for each filter as
//! a set of inclusive intervals. After every insert the set is re-merged into
//! its minimal representation: strictly ordered, disjoint, and non-adjacent.

use alloy_primitives::U256;

/// An inclusive range of block numbers. `start <= end` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInterval {
    pub start: U256,
    pub end: U256,
}

impl BlockInterval {
    pub fn new(start: U256, end: U256) -> Self {
        debug_assert!(start <= end, "interval start must not exceed end");
        BlockInterval { start, end }
    }

    /// The single-block interval `[number, number]`.
    pub fn point(number: U256) -> Self {
        BlockInterval {
            start: number,
            end: number,
        }
    }

    pub fn contains(&self, number: U256) -> bool {
        self.start <= number && number <= self.end
    }
}

impl std::fmt::Display for BlockInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// Collapse a set of intervals into the minimal representation of its union.
///
/// Adjacent ranges coalesce: `[1, 2]` and `[3, 4]` become `[1, 4]`. The
/// result is sorted, disjoint and non-adjacent regardless of input order.
pub fn merge(mut intervals: Vec<BlockInterval>) -> Vec<BlockInterval> {
    intervals.sort_unstable_by(|a, b| a.start.cmp(&b.start).then(a.end.cmp(&b.end)));

    let mut merged: Vec<BlockInterval> = Vec::with_capacity(intervals.len());
    for interval in intervals {
        match merged.last_mut() {
            Some(last) if interval.start <= last.end.saturating_add(U256::from(1)) => {
                last.end = last.end.max(interval.end);
            }
            _ => merged.push(interval),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use quickcheck_macros::quickcheck;

    use super::*;

    fn interval(start: u64, end: u64) -> BlockInterval {
        BlockInterval::new(U256::from(start), U256::from(end))
    }

    fn from_pairs(pairs: Vec<(u64, u64)>) -> Vec<BlockInterval> {
        pairs
            .into_iter()
            .map(|(a, b)| {
                let (start, end) = if a <= b { (a, b) } else { (b, a) };
                interval(start, end)
            })
            .collect()
    }

    #[test]
    fn test_merge_overlapping_and_adjacent() {
        let merged = merge(vec![interval(1, 5), interval(6, 8), interval(4, 6)]);
        assert_eq!(merged, vec![interval(1, 8)]);
    }

    #[test]
    fn test_merge_keeps_gaps() {
        let merged = merge(vec![
            interval(15495110, 15495110),
            interval(15495112, 15495112),
        ]);
        assert_eq!(
            merged,
            vec![interval(15495110, 15495110), interval(15495112, 15495112)]
        );
    }

    #[test]
    fn test_merge_fills_gap() {
        let merged = merge(vec![
            interval(15495110, 15495110),
            interval(15495112, 15495112),
            interval(15495111, 15495111),
        ]);
        assert_eq!(merged, vec![interval(15495110, 15495112)]);
    }

    #[test]
    fn test_merge_at_domain_boundary() {
        let top = BlockInterval::new(U256::MAX, U256::MAX);
        let merged = merge(vec![top, top]);
        assert_eq!(merged, vec![top]);
    }

    #[quickcheck]
    fn prop_merge_output_is_minimal(pairs: Vec<(u64, u64)>) -> bool {
        let merged = merge(from_pairs(pairs));
        merged
            .windows(2)
            .all(|pair| pair[1].start > pair[0].end.saturating_add(U256::from(1)))
            && merged.iter().all(|interval| interval.start <= interval.end)
    }

    #[quickcheck]
    fn prop_merge_is_confluent(pairs: Vec<(u64, u64)>) -> bool {
        let forward = from_pairs(pairs.clone());
        let mut backward = forward.clone();
        backward.reverse();

        let mut rotated = forward.clone();
        if !rotated.is_empty() {
            rotated.rotate_left(pairs.len() / 2);
        }

        merge(forward.clone()) == merge(backward) && merge(forward) == merge(rotated)
    }

    #[quickcheck]
    fn prop_merge_preserves_union(pairs: Vec<(u64, u64)>, probe: u64) -> bool {
        let intervals = from_pairs(pairs);
        let probe = U256::from(probe);
        let before = intervals.iter().any(|interval| interval.contains(probe));
        let after = merge(intervals).iter().any(|interval| interval.contains(probe));
        before == after
    }
}
