//! The quantification session: experiment state and the multi-pass driver.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::thread;

use crossbeam::queue::{ArrayQueue, SegQueue};

use crate::cluster::ClusterForest;
use crate::error::Error;
use crate::fld::FragLenDist;
use crate::index::TranscriptomeIndex;
use crate::io::fastq::FragmentSource;
use crate::library::ReadLibrary;
use crate::math::LOG_1;
use crate::quant::alignment::AlignmentGroup;
use crate::quant::cache::{self, CacheFile};
use crate::quant::pipeline::{self, PipelineContext};
use crate::quant::{QuantOpts, MINI_BATCH_SIZE};
use crate::transcript::Transcript;

/// A set of read libraries quantified against one transcript table.
///
/// Owns the shared mutable state of the session: the transcript masses and
/// counts, the cluster forest, and the cumulative fragment counters.
pub struct ReadExperiment {
    transcripts: Vec<Transcript>,
    cluster_forest: ClusterForest,
    libraries: Vec<ReadLibrary>,

    num_observed_fragments: AtomicU64,
    num_assigned_fragments: AtomicU64,
    num_valid_hits: AtomicU64,
    batch_num: AtomicU64,

    total_assigned_fragments: u64,
    quantification_passes: u64,
}

impl ReadExperiment {
    /// Build the transcript table from the index and wrap it with fresh
    /// accumulators.
    pub fn new(index: &TranscriptomeIndex, libraries: Vec<ReadLibrary>) -> Self {
        let num = index.num_transcripts();
        log::info!("index contains {} targets", num);
        let transcripts: Vec<Transcript> = (0..num as u32)
            .map(|tid| {
                Transcript::new(
                    tid,
                    index.name(tid),
                    index.transcript_len(tid),
                    index.packed_seq(tid),
                )
            })
            .collect();
        Self {
            cluster_forest: ClusterForest::new(num),
            transcripts,
            libraries,
            num_observed_fragments: AtomicU64::new(0),
            num_assigned_fragments: AtomicU64::new(0),
            num_valid_hits: AtomicU64::new(0),
            batch_num: AtomicU64::new(0),
            total_assigned_fragments: 0,
            quantification_passes: 0,
        }
    }

    pub fn transcripts(&self) -> &[Transcript] {
        &self.transcripts
    }

    pub fn cluster_forest(&self) -> &ClusterForest {
        &self.cluster_forest
    }

    pub fn libraries(&self) -> &[ReadLibrary] {
        &self.libraries
    }

    /// Fragments seen across all passes (each replay counts again).
    pub fn num_observed_fragments(&self) -> u64 {
        self.num_observed_fragments.load(Ordering::Relaxed)
    }

    /// Fragments assigned in the current pass.
    pub fn num_assigned_fragments(&self) -> u64 {
        self.num_assigned_fragments.load(Ordering::Relaxed)
    }

    /// Assigned fragments across all passes.
    pub fn total_assigned_fragments(&self) -> u64 {
        self.total_assigned_fragments + self.num_assigned_fragments()
    }

    pub fn quantification_passes(&self) -> u64 {
        self.quantification_passes
    }

    /// Whether the input files can be read more than once.
    pub fn is_replayable(&self) -> bool {
        self.libraries.iter().all(ReadLibrary::is_regular_files)
    }

    /// Start a new pass: fold this pass's assignments into the running
    /// total. Masses, counts and the batch number are preserved.
    fn soft_reset(&mut self) {
        self.total_assigned_fragments += self.num_assigned_fragments.swap(0, Ordering::Relaxed);
        self.quantification_passes += 1;
    }
}

/// Drive EM passes until enough fragments have been observed.
///
/// The first pass maps reads (optionally writing the alignment cache);
/// subsequent passes replay the cache. Cache files live in `output_dir`
/// and are removed before returning.
pub fn quantify_library(
    experiment: &mut ReadExperiment,
    index: &TranscriptomeIndex,
    opts: &QuantOpts,
    output_dir: &Path,
    read_files_command: Option<&str>,
) -> Result<(), Error> {
    let frag_len_dist = FragLenDist::default();
    let log_forgetting_mass = Mutex::new(LOG_1);
    let burned_in = AtomicBool::new(false);

    let pool_size = opts.num_threads * MINI_BATCH_SIZE * 10;
    let structure_pool = ArrayQueue::new(pool_size);
    for _ in 0..pool_size {
        let _ = structure_pool.push(AlignmentGroup::new());
    }

    let mut cache_files: Vec<CacheFile> = Vec::new();
    let mut initial_round = true;

    let result = (|| -> Result<(), Error> {
        while experiment.num_observed_fragments() < opts.num_required_fragments {
            let observed_before = experiment.num_observed_fragments();

            if !initial_round {
                if opts.disable_mapping_cache && !experiment.is_replayable() {
                    log::warn!(
                        "observed only {} mapping fragments ({} required), but an input \
                         is not a regular file and the mapping cache is disabled; \
                         accepting the current estimates",
                        observed_before,
                        opts.num_required_fragments
                    );
                    break;
                }
                experiment.soft_reset();
            }

            if initial_round || opts.disable_mapping_cache {
                for lib_index in 0..experiment.libraries().len() {
                    run_mapping_pass(
                        experiment,
                        index,
                        opts,
                        lib_index,
                        output_dir,
                        read_files_command,
                        initial_round,
                        &frag_len_dist,
                        &log_forgetting_mass,
                        &burned_in,
                        &structure_pool,
                        &mut cache_files,
                    )?;
                }
            } else {
                for lib_index in 0..experiment.libraries().len() {
                    run_replay_pass(
                        experiment,
                        index,
                        opts,
                        lib_index,
                        &cache_files[lib_index],
                        &frag_len_dist,
                        &log_forgetting_mass,
                        &burned_in,
                        &structure_pool,
                    )?;
                }
            }

            initial_round = false;

            let observed = experiment.num_observed_fragments();
            log::info!(
                "# observed = {} / # required = {}; # assigned this pass = {}",
                observed,
                opts.num_required_fragments,
                experiment.num_assigned_fragments()
            );
            if observed == observed_before {
                log::warn!("no fragments were observed in the last pass; stopping");
                break;
            }
        }
        Ok(())
    })();

    // Cache files are session temporaries, not outputs.
    for cf in &cache_files {
        if cf.path.exists() {
            if let Err(e) = std::fs::remove_file(&cf.path) {
                log::warn!("failed to remove cache file {}: {}", cf.path.display(), e);
            }
        }
    }

    result?;
    log::info!(
        "finished quantification: {} passes, {} assigned fragments",
        experiment.quantification_passes() + 1,
        experiment.total_assigned_fragments()
    );
    Ok(())
}

/// One hot-path pass over a library: N mapping workers plus, when caching,
/// a writer thread that persists processed groups.
#[allow(clippy::too_many_arguments)]
fn run_mapping_pass(
    experiment: &ReadExperiment,
    index: &TranscriptomeIndex,
    opts: &QuantOpts,
    lib_index: usize,
    output_dir: &Path,
    read_files_command: Option<&str>,
    initial_round: bool,
    frag_len_dist: &FragLenDist,
    log_forgetting_mass: &Mutex<f64>,
    burned_in: &AtomicBool,
    structure_pool: &ArrayQueue<AlignmentGroup>,
    cache_files: &mut Vec<CacheFile>,
) -> Result<(), Error> {
    let lib = &experiment.libraries()[lib_index];
    let source = FragmentSource::from_library(lib, read_files_command);
    let output_groups: SegQueue<AlignmentGroup> = SegQueue::new();

    let caching = !opts.disable_mapping_cache;
    let write_to_cache = AtomicBool::new(caching);
    let cache_path = output_dir.join(format!("alnCache_{}.bin", cache_files.len()));

    let ctx = PipelineContext {
        index,
        opts,
        lib,
        transcripts: experiment.transcripts(),
        cluster_forest: experiment.cluster_forest(),
        frag_len_dist,
        structure_pool,
        num_observed_fragments: &experiment.num_observed_fragments,
        num_assigned_fragments: &experiment.num_assigned_fragments,
        num_valid_hits: &experiment.num_valid_hits,
        batch_num: &experiment.batch_num,
        log_forgetting_mass,
        burned_in,
        update_counts: initial_round,
    };

    let mut num_written = 0u64;
    thread::scope(|s| -> Result<(), Error> {
        let writer = if caching {
            Some(s.spawn(|| {
                cache::write_alignment_cache(
                    &cache_path,
                    &output_groups,
                    structure_pool,
                    &write_to_cache,
                    &experiment.num_observed_fragments,
                    opts.num_required_fragments,
                )
            }))
        } else {
            None
        };

        let workers: Vec<_> = (0..opts.num_threads)
            .map(|_| s.spawn(|| pipeline::process_reads(&ctx, &source, &output_groups, &write_to_cache)))
            .collect();

        // Join everything before propagating any error, so the writer is
        // never left waiting on a flag nobody will clear.
        let worker_results: Vec<Result<(), Error>> =
            workers.into_iter().map(|w| w.join().unwrap()).collect();
        write_to_cache.store(false, Ordering::Release);
        let writer_result = writer.map(|w| w.join().unwrap());

        for r in worker_results {
            r?;
        }
        if let Some(r) = writer_result {
            num_written = r?;
        }
        Ok(())
    })?;

    // Reclaim any groups a late worker routed toward an already-stopped
    // writer.
    while let Some(group) = output_groups.pop() {
        let _ = structure_pool.push(group);
    }

    if caching {
        cache_files.push(CacheFile {
            path: cache_path,
            num_written,
        });
    }
    Ok(())
}

/// One replay pass over a library's cache file: a reader thread feeding N
/// EM workers.
#[allow(clippy::too_many_arguments)]
fn run_replay_pass(
    experiment: &ReadExperiment,
    index: &TranscriptomeIndex,
    opts: &QuantOpts,
    lib_index: usize,
    cache_file: &CacheFile,
    frag_len_dist: &FragLenDist,
    log_forgetting_mass: &Mutex<f64>,
    burned_in: &AtomicBool,
    structure_pool: &ArrayQueue<AlignmentGroup>,
) -> Result<(), Error> {
    let lib = &experiment.libraries()[lib_index];
    let replay_queue: SegQueue<AlignmentGroup> = SegQueue::new();
    let finished_parsing = AtomicBool::new(false);

    let ctx = PipelineContext {
        index,
        opts,
        lib,
        transcripts: experiment.transcripts(),
        cluster_forest: experiment.cluster_forest(),
        frag_len_dist,
        structure_pool,
        num_observed_fragments: &experiment.num_observed_fragments,
        num_assigned_fragments: &experiment.num_assigned_fragments,
        num_valid_hits: &experiment.num_valid_hits,
        batch_num: &experiment.batch_num,
        log_forgetting_mass,
        burned_in,
        update_counts: false,
    };

    thread::scope(|s| -> Result<(), Error> {
        let reader = s.spawn(|| {
            cache::read_alignment_cache(
                &cache_file.path,
                cache_file.num_written,
                structure_pool,
                &replay_queue,
                &finished_parsing,
            )
        });

        let workers: Vec<_> = (0..opts.num_threads)
            .map(|_| {
                s.spawn(|| pipeline::process_cached_alignments(&ctx, &replay_queue, &finished_parsing))
            })
            .collect();

        for w in workers {
            w.join().unwrap();
        }
        reader.join().unwrap()
    })
}
