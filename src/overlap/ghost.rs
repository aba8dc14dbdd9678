//! Ghost layer of a partitioned forest.
//!
//! A ghost is a remote active cell whose closed box touches a locally owned active cell.
//! Each ghost carries its owner and the owner's latest [`PostStatus`] for it. The converse
//! relation, local cells that are ghosts on some neighbour, is kept as per-rank mirror lists.
//! Both sides are derived from the same touch predicate, so `mirrors(r)` on this worker
//! matches exactly the ghosts rank `r` holds from us.

use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::propagate::{FlagPropagator, PostStatus, post_leaves};
use crate::algs::wire::{WireCell, WireReader, WireWriter, kind};
use crate::mesh_error::MeshError;
use crate::topology::cell::CellId;
use crate::topology::cell_key::{CellKey, neighbor_offsets};
use crate::topology::ownership::PartitionMarkers;
use crate::topology::store::CellStore;
use itertools::Itertools;
use std::collections::{BTreeMap, BTreeSet};

const CANDIDATE_TAG: CommTag = CommTag::new(0xF100);
const STATUS_TAG: CommTag = CommTag::new(0xF101);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GhostCell {
    pub owner: usize,
    pub status: PostStatus,
}

#[derive(Debug, Clone, Default)]
pub struct GhostLayer<const D: usize> {
    ghosts: BTreeMap<CellKey<D>, GhostCell>,
    mirrors: BTreeMap<usize, Vec<CellId>>,
}

impl<const D: usize> GhostLayer<D> {
    /// Rebuild the layer from scratch (collective).
    ///
    /// Every owned leaf is offered to the owners of its same-level neighbour regions; each
    /// receiver keeps the offers that touch one of its own leaves.
    pub fn build<C: Communicator>(
        store: &CellStore<D>,
        markers: &PartitionMarkers,
        comm: &C,
    ) -> Result<Self, MeshError> {
        let (me, size) = (comm.rank(), comm.size());
        let domain = store.domain();
        let mut offers: Vec<BTreeSet<CellKey<D>>> = vec![BTreeSet::new(); size];
        for id in store.active_cells() {
            let key = store.cell(id)?.key();
            for offset in neighbor_offsets::<D>() {
                let Some(region) = domain.neighbor(&key, offset) else {
                    continue;
                };
                let lo = domain.morton(&region);
                let hi = domain.morton_last(&region);
                for owner in markers.owners_of_range(lo, hi) {
                    if owner != me && owner < size {
                        offers[owner].insert(key);
                    }
                }
            }
        }
        let outgoing = offers
            .into_iter()
            .map(|keys| {
                let mut w = WireWriter::new(kind::GHOST_CANDIDATES);
                w.extend(keys.iter().map(|k| WireCell::new(k, PostStatus::Keep.to_wire())));
                w.finish()
            })
            .collect();
        let incoming = comm.all_to_all(CANDIDATE_TAG, outgoing)?;

        let mut ghosts = BTreeMap::new();
        let mut mirrors: BTreeMap<usize, BTreeSet<CellId>> = BTreeMap::new();
        for (src, bytes) in incoming.iter().enumerate() {
            if src == me {
                continue;
            }
            for rec in WireReader::read::<WireCell>(bytes, kind::GHOST_CANDIDATES)? {
                let key = rec.key::<D>()?;
                let touching = store.active_touching(&key);
                if touching.is_empty() {
                    continue;
                }
                ghosts.insert(
                    key,
                    GhostCell {
                        owner: src,
                        status: PostStatus::Keep,
                    },
                );
                mirrors.entry(src).or_default().extend(touching);
            }
        }
        let layer = Self {
            ghosts,
            mirrors: mirrors
                .into_iter()
                .map(|(r, set)| (r, set.into_iter().collect()))
                .collect(),
        };
        log::debug!(
            "rank {me}: {} ghosts from {} neighbours",
            layer.ghosts.len(),
            layer.mirrors.len()
        );
        Ok(layer)
    }

    /// Send the current status of every mirror cell to the neighbour that ghosts it, and
    /// update the ghosts from what the neighbours send back (collective).
    pub fn exchange_statuses<C: Communicator>(
        &mut self,
        store: &CellStore<D>,
        comm: &C,
    ) -> Result<(), MeshError> {
        let (me, size) = (comm.rank(), comm.size());
        let statuses = FlagPropagator::statuses(store);
        let mut outgoing = Vec::with_capacity(size);
        for rank in 0..size {
            let mut w = WireWriter::new(kind::STATUSES);
            for &id in self.mirrors(rank) {
                let status = statuses.get(&id).copied().ok_or(MeshError::UnknownCell(id))?;
                w.push(WireCell::new(&store.cell(id)?.key(), status.to_wire()));
            }
            outgoing.push(w.finish());
        }
        let incoming = comm.all_to_all(STATUS_TAG, outgoing)?;
        for (src, bytes) in incoming.iter().enumerate() {
            if src == me {
                continue;
            }
            let records = WireReader::read::<WireCell>(bytes, kind::STATUSES)?;
            let expected = self.ghosts.values().filter(|g| g.owner == src).count();
            if records.len() != expected {
                return Err(MeshError::GhostMismatch {
                    rank: src,
                    detail: format!("{} statuses for {expected} ghosts", records.len()),
                });
            }
            for rec in records {
                let key = rec.key::<D>()?;
                let ghost = self
                    .ghosts
                    .get_mut(&key)
                    .filter(|g| g.owner == src)
                    .ok_or_else(|| MeshError::GhostMismatch {
                        rank: src,
                        detail: format!("status for {key}, which is not a ghost from this rank"),
                    })?;
                ghost.status = PostStatus::from_wire(rec.status())?;
            }
        }
        Ok(())
    }

    pub fn get(&self, key: &CellKey<D>) -> Option<&GhostCell> {
        self.ghosts.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CellKey<D>, &GhostCell)> + '_ {
        self.ghosts.iter()
    }

    pub fn len(&self) -> usize {
        self.ghosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ghosts.is_empty()
    }

    /// Ranks this worker exchanges statuses with.
    pub fn neighbours(&self) -> impl Iterator<Item = usize> + '_ {
        self.mirrors.keys().copied()
    }

    /// Local cells that are ghosts on `rank`, ascending.
    pub fn mirrors(&self, rank: usize) -> &[CellId] {
        self.mirrors.get(&rank).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Post-execution leaves implied by the current ghost statuses.
    pub fn post_leaves(&self) -> Vec<CellKey<D>> {
        self.ghosts
            .iter()
            .flat_map(|(&k, g)| post_leaves(k, g.status))
            .sorted_unstable()
            .dedup()
            .collect()
    }
}
