//! Transcript cluster forest.
//!
//! A union-find over transcript ids: transcripts that share an ambiguously
//! mapped fragment are merged into one cluster, and each cluster root
//! accumulates the fragment count and log-space mass assigned to it.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::math::{self, LOG_0};

/// Per-cluster accumulators; meaningful only at the root of a set.
struct ClusterData {
    rank: u32,
    count: u64,
    log_mass: f64,
    members: Vec<u32>,
}

/// Concurrent union-find with per-root locks.
///
/// `find` uses lock-free path halving. Mutations lock the root (or, for a
/// merge, every involved root in ascending id order) and re-verify the node
/// is still a root before touching its data, retrying if a concurrent merge
/// got there first.
pub struct ClusterForest {
    parents: Vec<AtomicU32>,
    nodes: Vec<Mutex<ClusterData>>,
}

impl ClusterForest {
    /// Every transcript starts as its own singleton cluster.
    pub fn new(num_transcripts: usize) -> Self {
        Self {
            parents: (0..num_transcripts as u32).map(AtomicU32::new).collect(),
            nodes: (0..num_transcripts as u32)
                .map(|i| {
                    Mutex::new(ClusterData {
                        rank: 0,
                        count: 0,
                        log_mass: LOG_0,
                        members: vec![i],
                    })
                })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.parents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parents.is_empty()
    }

    /// Root of the set containing `tid`, with path halving.
    pub fn find(&self, tid: u32) -> u32 {
        let mut x = tid;
        loop {
            let p = self.parents[x as usize].load(Ordering::Acquire);
            if p == x {
                return x;
            }
            let gp = self.parents[p as usize].load(Ordering::Acquire);
            let _ = self.parents[x as usize].compare_exchange_weak(
                p,
                gp,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
            x = gp;
        }
    }

    /// Lock the root of `tid`'s cluster, retrying across concurrent merges.
    fn lock_root(&self, tid: u32) -> (u32, MutexGuard<'_, ClusterData>) {
        loop {
            let root = self.find(tid);
            let guard = self.nodes[root as usize].lock().unwrap();
            if self.parents[root as usize].load(Ordering::Acquire) == root {
                return (root, guard);
            }
            // Lost a race with a merge; the root moved.
        }
    }

    /// Add a fragment's contribution to the cluster containing `tid`.
    pub fn update_cluster(
        &self,
        tid: u32,
        count_delta: u64,
        log_forgetting_mass: f64,
        update_counts: bool,
    ) {
        let (_, mut data) = self.lock_root(tid);
        if update_counts {
            data.count += count_delta;
        }
        data.log_mass = math::log_add(data.log_mass, log_forgetting_mass);
    }

    /// Union the clusters of every transcript in `tids`.
    ///
    /// The surviving root is the one of greatest rank (ties broken by the
    /// smaller id); counts and masses of absorbed roots are folded into it.
    pub fn merge_clusters(&self, tids: &[u32]) {
        loop {
            let mut roots: Vec<u32> = tids.iter().map(|&t| self.find(t)).collect();
            roots.sort_unstable();
            roots.dedup();
            if roots.len() < 2 {
                return;
            }

            // Lock all roots in ascending id order, then make sure none of
            // them was absorbed while we were acquiring locks.
            let mut guards: Vec<Option<MutexGuard<'_, ClusterData>>> = roots
                .iter()
                .map(|&r| Some(self.nodes[r as usize].lock().unwrap()))
                .collect();
            let stale = roots
                .iter()
                .any(|&r| self.parents[r as usize].load(Ordering::Acquire) != r);
            if stale {
                continue;
            }

            let winner_idx = {
                let mut best = 0;
                for i in 1..roots.len() {
                    // Higher rank wins; the ascending scan keeps the
                    // smaller id on ties.
                    if guards[i].as_ref().unwrap().rank > guards[best].as_ref().unwrap().rank {
                        best = i;
                    }
                }
                best
            };
            let winner = roots[winner_idx];
            let mut winner_guard = guards[winner_idx].take().unwrap();
            let winner_rank = winner_guard.rank;

            let mut bump_rank = false;
            for (i, slot) in guards.iter_mut().enumerate() {
                if i == winner_idx {
                    continue;
                }
                let mut guard = slot.take().unwrap();
                winner_guard.count += guard.count;
                winner_guard.log_mass = math::log_add(winner_guard.log_mass, guard.log_mass);
                let mut members = std::mem::take(&mut guard.members);
                winner_guard.members.append(&mut members);
                bump_rank |= guard.rank == winner_rank;
                // Redirect the absorbed root while the winner is still
                // locked; concurrent lock_root calls will block on it.
                self.parents[roots[i] as usize].store(winner, Ordering::Release);
            }
            if bump_rank {
                winner_guard.rank += 1;
            }
            return;
        }
    }

    /// Snapshot of `(count, log_mass, members)` for the cluster containing
    /// `tid`.
    pub fn cluster_info(&self, tid: u32) -> (u64, f64, Vec<u32>) {
        let (_, data) = self.lock_root(tid);
        (data.count, data.log_mass, data.members.clone())
    }

    /// Number of distinct clusters remaining.
    pub fn num_clusters(&self) -> usize {
        (0..self.parents.len() as u32)
            .filter(|&i| self.find(i) == i)
            .count()
    }
}
