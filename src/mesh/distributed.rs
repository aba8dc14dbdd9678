//! Partitioned engine: each worker owns a contiguous range of the global Morton order.
//!
//! Every method that takes `&mut self` and is documented as *collective* must be entered
//! by all workers in the same order; the communicator's collectives keep them in lockstep.
//!
//! An execute step runs in four phases:
//!
//! 1. synchronized balance rounds: exchange mirror statuses, settle locally, stop once no
//!    worker changed anything,
//! 2. commit the surviving requests,
//! 3. repartition into even, family-aligned ranges and migrate leaves,
//! 4. rebuild the ownership markers and the ghost layer.

use super::{ExecuteSummary, MeshTopology};
use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::meshgen::CoarseGrid;
use crate::algs::partition::{
    align_split, destination, enforce_monotone, ideal_splits, window_around,
};
use crate::algs::propagate::{FlagPropagator, PostStatus};
use crate::algs::wire::{WireCell, WireIndexedCell, WireReader, WireU64, WireWriter, kind};
use crate::config::MeshConfig;
use crate::debug_invariants::DebugInvariants;
use crate::mesh_error::MeshError;
use crate::overlap::ghost::GhostLayer;
use crate::topology::cell::CellId;
use crate::topology::cell_key::{CellKey, MortonPos};
use crate::topology::ownership::PartitionMarkers;
use crate::topology::store::CellStore;
use std::collections::BTreeMap;

const LEVEL_TAG: CommTag = CommTag::new(0xF200);
const FAILED_TAG: CommTag = CommTag::new(0xF201);
const CHANGED_TAG: CommTag = CommTag::new(0xF202);
const COUNT_TAG: CommTag = CommTag::new(0xF203);
const WINDOW_TAG: CommTag = CommTag::new(0xF204);
const MIGRATE_TAG: CommTag = CommTag::new(0xF205);
const MARKER_TAG: CommTag = CommTag::new(0xF206);
const TOTAL_TAG: CommTag = CommTag::new(0xF207);

pub struct DistributedMesh<C: Communicator, const D: usize> {
    comm: C,
    config: MeshConfig,
    store: CellStore<D>,
    markers: PartitionMarkers,
    ghosts: GhostLayer<D>,
    n_global_active: u64,
}

impl<C: Communicator, const D: usize> DistributedMesh<C, D> {
    /// Distribute the roots of `grid` evenly in tree order (collective).
    pub fn new(grid: CoarseGrid<D>, comm: C, config: MeshConfig) -> Result<Self, MeshError> {
        config.validate()?;
        let (rank, size) = (comm.rank(), comm.size());
        let roots = grid.roots().to_vec();
        let splits = ideal_splits(roots.len() as u64, size);
        let mut store = CellStore::new(grid.into_domain());
        for key in &roots[splits[rank] as usize..splits[rank + 1] as usize] {
            store.insert_leaf(*key, Some(rank))?;
        }
        let mut mesh = Self {
            comm,
            config,
            store,
            markers: PartitionMarkers::default(),
            ghosts: GhostLayer::default(),
            n_global_active: 0,
        };
        mesh.refresh()?;
        log::info!(
            "rank {rank}/{size}: {} of {} roots",
            mesh.store.n_active(),
            roots.len()
        );
        Ok(mesh)
    }

    pub fn comm(&self) -> &C {
        &self.comm
    }

    pub fn config(&self) -> &MeshConfig {
        &self.config
    }

    pub fn rank(&self) -> usize {
        self.comm.rank()
    }

    pub fn n_workers(&self) -> usize {
        self.comm.size()
    }

    pub fn markers(&self) -> &PartitionMarkers {
        &self.markers
    }

    pub fn ghost_layer(&self) -> &GhostLayer<D> {
        &self.ghosts
    }

    /// Owned active cells in Morton order.
    pub fn locally_owned_cells(&self) -> Vec<CellId> {
        self.store.active_cells_morton()
    }

    pub fn n_locally_owned_active_cells(&self) -> usize {
        self.store.n_active()
    }

    pub fn find(&self, key: &CellKey<D>) -> Option<CellId> {
        self.store.find(key)
    }

    /// Keys of owned active cells plus all ghosts: every active cell that shares a vertex
    /// with an owned one.
    pub fn local_and_ghost_keys(&self) -> Vec<CellKey<D>> {
        let mut keys: Vec<CellKey<D>> = self
            .store
            .active_cells()
            .filter_map(|id| self.store.get(id).map(|c| c.key()))
            .collect();
        keys.extend(self.ghosts.iter().map(|(k, _)| *k));
        keys
    }

    pub fn clear_flags(&mut self) {
        self.store.clear_flags();
    }

    /// Refine every active cell `times` times (collective).
    pub fn refine_global(&mut self, times: usize) -> Result<(), MeshError> {
        for _ in 0..times {
            self.store.clear_flags();
            let owned: Vec<CellId> = self.store.active_cells().collect();
            for id in owned {
                self.store.set_refine_flag(id)?;
            }
            self.execute_coarsening_and_refinement()?;
        }
        Ok(())
    }

    fn round_bound(&self) -> Result<usize, MeshError> {
        if let Some(bound) = self.config.max_balance_rounds {
            return Ok(bound);
        }
        let depth = self
            .comm
            .all_reduce_max(LEVEL_TAG, u64::from(self.store.max_active_level()))?;
        Ok(2 * (depth as usize + 2) + self.comm.size())
    }

    /// Turn a local result into a collective one: if any worker failed, all fail.
    fn agree<T>(&self, local: Result<T, MeshError>) -> Result<T, MeshError> {
        let failed = self.comm.any(FAILED_TAG, local.is_err())?;
        match local {
            Err(e) => Err(e),
            Ok(_) if failed => Err(MeshError::CommError {
                neighbor: self.rank(),
                detail: "another worker failed during execute".into(),
            }),
            Ok(v) => Ok(v),
        }
    }

    /// Resolve flags into a balanced, repartitioned new mesh (collective).
    ///
    /// The resulting active cell set is the same as a [`SerialMesh`](super::serial::SerialMesh)
    /// would produce from the same flags.
    pub fn execute_coarsening_and_refinement(&mut self) -> Result<ExecuteSummary, MeshError> {
        let prop = FlagPropagator::new(self.config.balance_limit);
        let mut rounds = 0usize;
        if prop.limit().is_some() {
            let bound = self.round_bound()?;
            loop {
                if rounds == bound {
                    return Err(MeshError::BalanceNotConverged { rounds });
                }
                rounds += 1;
                let exchanged = self.ghosts.exchange_statuses(&self.store, &self.comm);
                self.agree(exchanged)?;
                let ghost_leaves = self.ghosts.post_leaves();
                let settled = prop.settle(&mut self.store, &ghost_leaves);
                let outcome = self.agree(settled)?;
                if !self.comm.any(CHANGED_TAG, outcome.changed)? {
                    break;
                }
            }
            log::debug!("rank {}: balance converged in {rounds} rounds", self.rank());
        }

        let committed = prop.commit(&mut self.store);
        let commit = self.agree(committed)?;
        let checked = self.store.check_invariants(self.config.check_invariants);
        self.agree(checked)?;
        let refined = self.comm.all_reduce_sum(COUNT_TAG, commit.refined as u64)?;
        let coarsened = self.comm.all_reduce_sum(COUNT_TAG, commit.coarsened as u64)?;

        let migrated = self.repartition();
        self.agree(migrated)?;
        self.refresh()?;
        Ok(ExecuteSummary {
            refined,
            coarsened,
            balance_rounds: rounds,
            n_active: self.n_global_active,
        })
    }

    fn gather_u64(&self, tag: CommTag, value: u64) -> Result<Vec<u64>, MeshError> {
        let mut w = WireWriter::new(kind::COUNTS);
        w.push(WireU64::of(value));
        let all = self.comm.all_gather(tag, &w.finish())?;
        all.iter()
            .enumerate()
            .map(|(src, bytes)| -> Result<u64, MeshError> {
                let words: Vec<WireU64> = WireReader::read(bytes, kind::COUNTS)?;
                match words.as_slice() {
                    [v] => Ok(v.get()),
                    _ => Err(MeshError::GhostMismatch {
                        rank: src,
                        detail: format!("expected one count, got {}", words.len()),
                    }),
                }
            })
            .collect()
    }

    /// Even, family-aligned repartition with leaf migration (collective).
    fn repartition(&mut self) -> Result<(), MeshError> {
        let (rank, size) = (self.comm.rank(), self.comm.size());
        let leaves = self.store.active_cells_morton();
        let counts = self.gather_u64(COUNT_TAG, leaves.len() as u64)?;
        let offset: u64 = counts[..rank].iter().sum();
        let n_global: u64 = counts.iter().sum();
        let mut splits = ideal_splits(n_global, size);

        // Share the keys around every split so all workers align them identically.
        let mut window = WireWriter::new(kind::SPLITS);
        let mut shared = std::collections::BTreeSet::new();
        for &s in &splits[1..size] {
            for g in window_around::<D>(s) {
                if g >= offset && g < offset + leaves.len() as u64 && shared.insert(g) {
                    let key = self.store.cell(leaves[(g - offset) as usize])?.key();
                    window.push(WireIndexedCell::new(g, &key));
                }
            }
        }
        let mut keys: BTreeMap<u64, CellKey<D>> = BTreeMap::new();
        for bytes in self.comm.all_gather(WINDOW_TAG, &window.finish())? {
            for rec in WireReader::read::<WireIndexedCell>(&bytes, kind::SPLITS)? {
                keys.insert(rec.index(), rec.cell.key()?);
            }
        }
        for s in &mut splits[1..size] {
            *s = align_split(&keys, *s);
        }
        enforce_monotone(&mut splits);

        let mut outgoing: Vec<WireWriter<WireCell>> =
            (0..size).map(|_| WireWriter::new(kind::MIGRATION)).collect();
        let mut leaving = Vec::new();
        for (i, &id) in leaves.iter().enumerate() {
            let dest = destination(&splits, offset + i as u64);
            if dest != rank {
                let key = self.store.cell(id)?.key();
                outgoing[dest].push(WireCell::new(&key, PostStatus::Keep.to_wire()));
                leaving.push(id);
            }
        }
        let sent = leaving.len();
        let incoming = self.comm.all_to_all(
            MIGRATE_TAG,
            outgoing.into_iter().map(WireWriter::finish).collect(),
        )?;
        for id in leaving {
            self.store.remove_leaf(id)?;
        }
        let mut received = 0usize;
        for (src, bytes) in incoming.iter().enumerate() {
            if src == rank {
                continue;
            }
            for rec in WireReader::read::<WireCell>(bytes, kind::MIGRATION)? {
                self.store.insert_leaf(rec.key()?, Some(rank))?;
                received += 1;
            }
        }
        log::debug!(
            "rank {rank}: repartition to {:?} sent {sent}, received {received}",
            splits
        );
        self.store.check_invariants(self.config.check_invariants)
    }

    /// Rebuild markers, ghosts and the global count (collective).
    fn refresh(&mut self) -> Result<(), MeshError> {
        let first = self
            .store
            .active_cells_morton()
            .first()
            .and_then(|&id| self.store.get(id))
            .map(|c| self.store.domain().morton(&c.key()));
        let mut w = WireWriter::new(kind::MARKERS);
        if let Some(pos) = first {
            w.push(WireU64::of(pos.tree));
            w.push(WireU64::of(pos.code));
        }
        let mut starts = Vec::with_capacity(self.comm.size());
        for bytes in self.comm.all_gather(MARKER_TAG, &w.finish())? {
            let words: Vec<WireU64> = WireReader::read(&bytes, kind::MARKERS)?;
            starts.push(match words.as_slice() {
                [tree, code] => Some(MortonPos {
                    tree: tree.get(),
                    code: code.get(),
                }),
                _ => None,
            });
        }
        self.markers = PartitionMarkers::new(starts);
        self.ghosts = GhostLayer::build(&self.store, &self.markers, &self.comm)?;
        self.n_global_active = self
            .comm
            .all_reduce_sum(TOTAL_TAG, self.store.n_active() as u64)?;
        Ok(())
    }
}

impl<C: Communicator, const D: usize> MeshTopology<D> for DistributedMesh<C, D> {
    fn store(&self) -> &CellStore<D> {
        &self.store
    }

    fn is_locally_owned(&self, id: CellId) -> bool {
        let rank = self.rank();
        self.store
            .get(id)
            .is_some_and(|c| c.is_active() && c.owner() == Some(rank))
    }

    fn n_global_active_cells(&self) -> u64 {
        self.n_global_active
    }

    fn set_refine_flag(&mut self, id: CellId) -> Result<(), MeshError> {
        self.store.set_refine_flag(id)
    }

    fn set_coarsen_flag(&mut self, id: CellId) -> Result<(), MeshError> {
        self.store.set_coarsen_flag(id)
    }
}
