//! Worker loops of the parallel streaming pipeline.
//!
//! N worker threads pull mini-batch jobs from a shared fragment source,
//! map each fragment into a pooled `AlignmentGroup`, and run the EM step
//! on the filled batch. With caching enabled, processed batches flow to
//! the cache writer (which returns the slots); otherwise slots go straight
//! back to the pool. Replay passes run the same EM loop fed from the cache
//! reader instead of the mapper.
//!
//! No ordering is guaranteed between threads; every shared update commutes
//! (log-space additions and atomic counters), so the end state is
//! statistically equivalent regardless of interleaving.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use crossbeam::queue::{ArrayQueue, SegQueue};

use crate::cluster::ClusterForest;
use crate::error::Error;
use crate::fld::FragLenDist;
use crate::index::TranscriptomeIndex;
use crate::io::fastq::FragmentSource;
use crate::library::ReadLibrary;
use crate::quant::alignment::AlignmentGroup;
use crate::quant::em::{self, EmContext};
use crate::quant::{assemble, QuantOpts, MINI_BATCH_SIZE};
use crate::transcript::Transcript;

/// Everything a worker thread needs, borrowed from the session.
pub struct PipelineContext<'a> {
    pub index: &'a TranscriptomeIndex,
    pub opts: &'a QuantOpts,
    pub lib: &'a ReadLibrary,
    pub transcripts: &'a [Transcript],
    pub cluster_forest: &'a ClusterForest,
    pub frag_len_dist: &'a FragLenDist,
    pub structure_pool: &'a ArrayQueue<AlignmentGroup>,
    pub num_observed_fragments: &'a AtomicU64,
    pub num_assigned_fragments: &'a AtomicU64,
    pub num_valid_hits: &'a AtomicU64,
    pub batch_num: &'a AtomicU64,
    pub log_forgetting_mass: &'a Mutex<f64>,
    pub burned_in: &'a AtomicBool,
    /// True on the initial pass only; replays must not inflate counts.
    pub update_counts: bool,
}

impl<'a> PipelineContext<'a> {
    fn em_ctx(&self) -> EmContext<'a> {
        EmContext {
            transcripts: self.transcripts,
            cluster_forest: self.cluster_forest,
            frag_len_dist: self.frag_len_dist,
            num_assigned_fragments: self.num_assigned_fragments,
            burned_in: self.burned_in,
        }
    }
}

/// Spin until a group slot is free. The pool is sized so that it can only
/// be momentarily empty while other threads hold slots in flight.
fn pop_slot(pool: &ArrayQueue<AlignmentGroup>) -> AlignmentGroup {
    loop {
        match pool.pop() {
            Some(group) => return group,
            None => std::hint::spin_loop(),
        }
    }
}

fn return_slot(pool: &ArrayQueue<AlignmentGroup>, group: AlignmentGroup) {
    // The pool can hold every slot ever created, so this cannot fail.
    let _ = pool.push(group);
}

/// Hot-path worker: map fragments, run the EM, route groups onward.
pub fn process_reads(
    ctx: &PipelineContext<'_>,
    source: &FragmentSource,
    output_groups: &SegQueue<AlignmentGroup>,
    write_to_cache: &AtomicBool,
) -> Result<(), Error> {
    let mut rng = rand::thread_rng();

    loop {
        let job = source.next_job(MINI_BATCH_SIZE)?;
        if job.is_empty() {
            break;
        }

        let mut batch: Vec<AlignmentGroup> = Vec::with_capacity(job.len());
        for frag in &job {
            let mut group = pop_slot(ctx.structure_pool);
            assemble::hits_for_fragment(frag, ctx.index, ctx.opts, &mut group);

            // A fragment mapping everywhere maps nowhere.
            if group.len() > ctx.opts.max_read_occs {
                group.clear();
            }

            ctx.num_valid_hits
                .fetch_add(group.len() as u64, Ordering::Relaxed);
            let observed = ctx.num_observed_fragments.fetch_add(1, Ordering::Relaxed) + 1;
            if observed % 50_000 == 0 {
                log::info!("processed {} fragments", observed);
            }
            batch.push(group);
        }

        let log_forgetting_mass =
            em::advance_forgetting_mass(ctx.batch_num, ctx.log_forgetting_mass);
        em::process_mini_batch(
            log_forgetting_mass,
            ctx.lib,
            ctx.opts,
            &mut batch,
            &ctx.em_ctx(),
            ctx.update_counts,
            &mut rng,
        );

        if write_to_cache.load(Ordering::Acquire) {
            for group in batch {
                output_groups.push(group);
            }
        } else {
            for group in batch {
                return_slot(ctx.structure_pool, group);
            }
        }
    }

    Ok(())
}

/// Replay worker: consume deserialized groups in mini-batches and run the
/// EM exactly as on the hot path, skipping the mapper.
pub fn process_cached_alignments(
    ctx: &PipelineContext<'_>,
    replay_queue: &SegQueue<AlignmentGroup>,
    finished_parsing: &AtomicBool,
) {
    let mut rng = rand::thread_rng();

    loop {
        let mut batch: Vec<AlignmentGroup> = Vec::with_capacity(MINI_BATCH_SIZE);
        while batch.len() < MINI_BATCH_SIZE {
            if let Some(group) = replay_queue.pop() {
                batch.push(group);
                continue;
            }
            if finished_parsing.load(Ordering::Acquire) && replay_queue.is_empty() {
                break;
            }
            std::hint::spin_loop();
        }
        if batch.is_empty() {
            break;
        }

        for group in &batch {
            ctx.num_valid_hits
                .fetch_add(group.len() as u64, Ordering::Relaxed);
        }
        ctx.num_observed_fragments
            .fetch_add(batch.len() as u64, Ordering::Relaxed);

        let log_forgetting_mass =
            em::advance_forgetting_mass(ctx.batch_num, ctx.log_forgetting_mass);
        em::process_mini_batch(
            log_forgetting_mass,
            ctx.lib,
            ctx.opts,
            &mut batch,
            &ctx.em_ctx(),
            ctx.update_counts,
            &mut rng,
        );

        for group in batch {
            return_slot(ctx.structure_pool, group);
        }
    }
}
