//! Count-based partitioning of the global Morton order.
//!
//! Worker `r` owns global leaf indices `splits[r]..splits[r + 1]`. Split points start at the
//! even share `n * r / p` and are then moved back to the first member of any complete family
//! of active siblings they would cut, so coarsening eligibility stays a local question.

use crate::topology::cell_key::CellKey;
use std::collections::BTreeMap;

/// Even split points: `p + 1` entries from `0` to `n_global`.
pub fn ideal_splits(n_global: u64, n_workers: usize) -> Vec<u64> {
    let p = n_workers.max(1) as u64;
    (0..=p)
        .map(|r| ((u128::from(n_global) * u128::from(r)) / u128::from(p)) as u64)
        .collect()
}

/// Global indices whose keys are needed to align split `s` (`2^D - 1` on either side).
pub fn window_around<const D: usize>(s: u64) -> std::ops::RangeInclusive<u64> {
    let reach = (CellKey::<D>::CHILDREN - 1) as u64;
    s.saturating_sub(reach)..=s.saturating_add(reach)
}

/// Move split `s` to the start of the complete active family containing leaf `s`.
///
/// `window` maps global leaf indices to keys and must cover [`window_around`]`(s)`. A family
/// is complete and active iff its `2^D` members are consecutive leaves in Morton order.
pub fn align_split<const D: usize>(window: &BTreeMap<u64, CellKey<D>>, s: u64) -> u64 {
    let Some(key) = window.get(&s) else {
        return s;
    };
    let Some(parent) = key.parent() else {
        return s;
    };
    let Some(start) = s.checked_sub(key.child_position() as u64) else {
        return s;
    };
    let complete = (0..CellKey::<D>::CHILDREN)
        .all(|pos| window.get(&(start + pos as u64)) == Some(&parent.child(pos)));
    if complete { start } else { s }
}

/// Make split points non-decreasing.
pub fn enforce_monotone(splits: &mut [u64]) {
    for r in 1..splits.len() {
        splits[r] = splits[r].max(splits[r - 1]);
    }
}

/// Worker owning global index `g` under `splits`.
pub fn destination(splits: &[u64], g: u64) -> usize {
    let inner = &splits[1..splits.len().saturating_sub(1).max(1)];
    inner.partition_point(|&s| s <= g)
}
