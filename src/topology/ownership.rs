//! Ownership metadata for a partitioned forest.
//!
//! Workers own contiguous ranges of the global Morton order. [`PartitionMarkers`] records
//! where each range starts, which is enough to answer "who owns position `p`" on every
//! worker without holding any remote cell.

use crate::topology::cell_key::MortonPos;

/// First Morton position owned by each worker; `None` for workers that own nothing.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PartitionMarkers {
    first: Vec<Option<MortonPos>>,
}

impl PartitionMarkers {
    pub fn new(first: Vec<Option<MortonPos>>) -> Self {
        Self { first }
    }

    /// Number of workers tracked.
    pub fn len(&self) -> usize {
        self.first.len()
    }

    pub fn is_empty(&self) -> bool {
        self.first.is_empty()
    }

    /// First position owned by `rank`.
    pub fn first(&self, rank: usize) -> Option<MortonPos> {
        self.first.get(rank).copied().flatten()
    }

    /// Non-empty workers in rank order with their starting positions.
    fn starts(&self) -> impl Iterator<Item = (usize, MortonPos)> + '_ {
        self.first
            .iter()
            .enumerate()
            .filter_map(|(rank, f)| f.map(|f| (rank, f)))
    }

    /// Worker owning position `p`.
    ///
    /// Positions before the first marker belong to the first non-empty worker.
    pub fn owner_of(&self, p: MortonPos) -> Option<usize> {
        let mut owner = None;
        for (rank, start) in self.starts() {
            if owner.is_none() || start <= p {
                owner = Some(rank);
            }
            if start > p {
                break;
            }
        }
        owner
    }

    /// All workers owning some position in `lo..=hi`, ascending.
    pub fn owners_of_range(&self, lo: MortonPos, hi: MortonPos) -> Vec<usize> {
        let mut owners: Vec<usize> = self.owner_of(lo).into_iter().collect();
        owners.extend(
            self.starts()
                .filter(|&(_, start)| lo < start && start <= hi)
                .map(|(rank, _)| rank),
        );
        owners.dedup();
        owners
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(code: u64) -> MortonPos {
        MortonPos { tree: 0, code }
    }

    #[test]
    fn owner_lookup_skips_empty_workers() {
        let markers = PartitionMarkers::new(vec![Some(pos(0)), None, Some(pos(10)), Some(pos(20))]);
        assert_eq!(markers.owner_of(pos(0)), Some(0));
        assert_eq!(markers.owner_of(pos(9)), Some(0));
        assert_eq!(markers.owner_of(pos(10)), Some(2));
        assert_eq!(markers.owner_of(pos(99)), Some(3));
        assert_eq!(markers.owners_of_range(pos(5), pos(20)), vec![0, 2, 3]);
        assert_eq!(markers.owners_of_range(pos(11), pos(12)), vec![2]);
    }

    #[test]
    fn markers_serialize() {
        let markers = PartitionMarkers::new(vec![Some(pos(0)), None]);
        let json = serde_json::to_string(&markers).unwrap();
        let back: PartitionMarkers = serde_json::from_str(&json).unwrap();
        assert_eq!(back, markers);
    }
}
