//! Quantile crossing repair
//!
//! Independently fitted quantile models can cross: a lower level may predict
//! a higher value than a higher level. Repair operates on the predictions of
//! one horizon step, ordered by ascending level, and returns how many entries
//! it changed.

use crate::config::RepairMethod;

/// Whether values are non-decreasing
pub fn is_monotone(values: &[f64]) -> bool {
    values.windows(2).all(|w| w[0] <= w[1])
}

/// Number of adjacent pairs that cross
pub fn count_crossings(values: &[f64]) -> usize {
    values.windows(2).filter(|w| w[0] > w[1]).count()
}

/// Repair `values` in place with the chosen method
pub fn repair(values: &mut [f64], method: RepairMethod) -> usize {
    match method {
        RepairMethod::SuffixMin => repair_suffix_min(values),
        RepairMethod::PoolAdjacent => repair_pool_adjacent(values),
    }
}

/// Replace every value by the minimum of itself and all later values
///
/// The highest level is never changed, and a value already below everything
/// after it is left alone.
pub fn repair_suffix_min(values: &mut [f64]) -> usize {
    let mut changed = 0;
    for i in (0..values.len().saturating_sub(1)).rev() {
        if values[i] > values[i + 1] {
            values[i] = values[i + 1];
            changed += 1;
        }
    }
    changed
}

/// Equal-weight pool-adjacent-violators (isotonic least squares)
pub fn repair_pool_adjacent(values: &mut [f64]) -> usize {
    // (sum, count) per pooled block
    let mut blocks: Vec<(f64, usize)> = Vec::with_capacity(values.len());
    for &v in values.iter() {
        blocks.push((v, 1));
        while blocks.len() > 1 {
            let (s1, n1) = blocks[blocks.len() - 1];
            let (s0, n0) = blocks[blocks.len() - 2];
            if s0 / n0 as f64 <= s1 / n1 as f64 {
                break;
            }
            blocks.pop();
            let last = blocks.len() - 1;
            blocks[last] = (s0 + s1, n0 + n1);
        }
    }

    let mut changed = 0;
    let mut i = 0;
    for (sum, count) in blocks {
        let mean = sum / count as f64;
        for v in &mut values[i..i + count] {
            if *v != mean {
                changed += 1;
            }
            *v = mean;
        }
        i += count;
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_suffix_min_example() {
        let mut v = [1.0, 3.0, 2.0, 4.0];
        assert_eq!(repair_suffix_min(&mut v), 1);
        assert_eq!(v, [1.0, 2.0, 2.0, 4.0]);
    }

    #[test]
    fn test_suffix_min_cascades() {
        let mut v = [5.0, 4.0, 3.0];
        assert_eq!(repair_suffix_min(&mut v), 2);
        assert_eq!(v, [3.0, 3.0, 3.0]);
    }

    #[test]
    fn test_pool_adjacent_example() {
        let mut v = [1.0, 3.0, 2.0, 4.0];
        assert_eq!(repair_pool_adjacent(&mut v), 2);
        assert_eq!(v, [1.0, 2.5, 2.5, 4.0]);
    }

    #[test]
    fn test_monotone_input_is_untouched() {
        let original = [0.5, 1.0, 1.0, 2.0];
        for method in [RepairMethod::SuffixMin, RepairMethod::PoolAdjacent] {
            let mut v = original;
            assert_eq!(repair(&mut v, method), 0);
            assert_eq!(v, original);
        }
    }

    #[test]
    fn test_count_crossings() {
        assert_eq!(count_crossings(&[1.0, 3.0, 2.0, 4.0, 0.0]), 2);
        assert_eq!(count_crossings(&[]), 0);
    }

    proptest! {
        #[test]
        fn prop_suffix_min_is_monotone_and_bounded(
            mut v in prop::collection::vec(-1e6f64..1e6, 0..12)
        ) {
            let original = v.clone();
            repair_suffix_min(&mut v);
            prop_assert!(is_monotone(&v));
            for (new, old) in v.iter().zip(&original) {
                prop_assert!(new <= old);
            }
            prop_assert_eq!(v.last(), original.last());
        }

        #[test]
        fn prop_pool_adjacent_is_monotone_and_preserves_mean(
            mut v in prop::collection::vec(-1e6f64..1e6, 1..12)
        ) {
            let before: f64 = v.iter().sum();
            repair_pool_adjacent(&mut v);
            let after: f64 = v.iter().sum();
            prop_assert!(is_monotone(&v));
            prop_assert!((before - after).abs() <= 1e-6 * before.abs().max(1.0));
        }
    }
}
