//! The online EM: per-batch E-step (alignment-probability normalization)
//! and M-step (transcript mass accumulation), with a forgetting-factor
//! schedule that down-weights later batches.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use rand::Rng;

use crate::cluster::ClusterForest;
use crate::fld::FragLenDist;
use crate::library::{log_align_compat_prob, ReadLibrary, MAX_FORMAT_ID};
use crate::math::{self, LOG_0, LOG_1};
use crate::quant::alignment::AlignmentGroup;
use crate::quant::QuantOpts;
use crate::transcript::Transcript;

/// Assigned fragments after which auxiliary distributions stop learning.
pub const NUM_BURNIN_FRAGS: u64 = 5_000_000;

/// Online-EM decay exponent: batch `k` carries mass proportional to
/// `1/k^0.65` in linear space.
pub const FORGETTING_FACTOR: f64 = 0.65;

/// Shared state the EM step reads and updates.
pub struct EmContext<'a> {
    pub transcripts: &'a [Transcript],
    pub cluster_forest: &'a ClusterForest,
    pub frag_len_dist: &'a FragLenDist,
    pub num_assigned_fragments: &'a AtomicU64,
    pub burned_in: &'a AtomicBool,
}

/// Advance the global batch counter and fold the next term of the
/// forgetting-mass recurrence into the shared scalar.
///
/// For batch `k >= 2`:
/// `log_forgetting_mass += 0.65*ln(k-1) - ln(k^0.65 - 1)`.
/// The mutex is held only for the arithmetic, so the pairing of a batch
/// number with its mass is linearizable.
pub fn advance_forgetting_mass(batch_num: &AtomicU64, log_forgetting_mass: &Mutex<f64>) -> f64 {
    let k = batch_num.fetch_add(1, Ordering::SeqCst) + 1;
    let mut mass = log_forgetting_mass.lock().unwrap();
    if k >= 2 {
        *mass += FORGETTING_FACTOR * ((k - 1) as f64).ln()
            - ((k as f64).powf(FORGETTING_FACTOR) - 1.0).ln();
    }
    *mass
}

/// Run one EM step over a mini-batch of alignment groups.
///
/// E-step: each alignment's log-probability combines the transcript's
/// current mass (length-normalized), the fragment-length likelihood, and
/// library-format compatibility; probabilities are then normalized within
/// the group. A group whose total probability is zero counts as observed
/// but not assigned. M-step: each referenced transcript accumulates the
/// batch's forgetting-weighted share of its normalized hits.
///
/// `update_counts` is set only on the first pass so per-transcript read
/// counts are not inflated by replays.
#[allow(clippy::too_many_arguments)]
pub fn process_mini_batch<R: Rng>(
    log_forgetting_mass: f64,
    lib: &ReadLibrary,
    opts: &QuantOpts,
    batch: &mut [AlignmentGroup],
    ctx: &EmContext<'_>,
    update_counts: bool,
    rng: &mut R,
) {
    let num_transcripts = ctx.transcripts.len();
    let expected_format = lib.format;
    let burned_in = ctx.burned_in.load(Ordering::Relaxed);

    let mut local_assigned = 0u64;
    let mut lib_type_counts = vec![0u64; MAX_FORMAT_ID as usize + 1];

    // E-step: distribute each fragment's mass over its current hits.
    for group in batch.iter_mut() {
        if group.is_empty() {
            continue;
        }

        let first_tid = group.alignments()[0].transcript_id;
        let mut transcript_unique = true;
        let mut sum_of_align_probs = LOG_0;
        let mut observed_transcripts: HashSet<u32> = HashSet::new();

        for aln in group.alignments_mut() {
            let tid = aln.transcript_id;
            if tid as usize >= num_transcripts {
                // Bug indicator, not a user error; drop the alignment.
                log::error!("alignment references invalid transcript id {tid}");
                aln.log_prob = LOG_0;
                continue;
            }
            transcript_unique = transcript_unique && tid == first_tid;

            let transcript = &ctx.transcripts[tid as usize];
            let transcript_log_mass = transcript.mass();
            if transcript_log_mass == LOG_0 {
                aln.log_prob = LOG_0;
                continue;
            }

            let log_frag_prob = if opts.use_frag_len_dist && aln.frag_length > 0 {
                ctx.frag_len_dist.pmf(aln.frag_length as usize)
            } else {
                LOG_1
            };
            let log_compat_prob = if opts.use_read_compat {
                log_align_compat_prob(aln.format, expected_format)
            } else {
                LOG_1
            };
            lib_type_counts[aln.format.format_id() as usize] += 1;

            // The per-alignment error likelihood is intentionally fixed
            // at log(1): abundance, fragment length, and orientation are
            // the only terms of the alignment probability.
            let log_ref_length = f64::from(transcript.length.max(1)).ln();
            aln.log_prob = (transcript_log_mass - log_ref_length) + log_frag_prob + log_compat_prob;
            sum_of_align_probs = math::log_add(sum_of_align_probs, aln.log_prob);

            if observed_transcripts.insert(tid) && update_counts {
                transcript.add_total_count(1);
            }
        }

        // A zero-probability fragment stays observed but unassigned.
        if sum_of_align_probs == LOG_0 {
            continue;
        }
        local_assigned += 1;

        for aln in group.alignments_mut() {
            aln.log_prob -= sum_of_align_probs;

            // Pre-burn-in, sample fragment lengths in proportion to the
            // alignment's posterior.
            let r: f64 = rng.gen();
            if !burned_in && r < aln.log_prob.exp() && aln.frag_length > 0 {
                ctx.frag_len_dist
                    .add_val(aln.frag_length as usize, log_forgetting_mass);
            }
        }

        if (first_tid as usize) < num_transcripts {
            if transcript_unique {
                if update_counts {
                    ctx.transcripts[first_tid as usize].add_unique_count(1);
                }
                ctx.cluster_forest
                    .update_cluster(first_tid, 1, log_forgetting_mass, update_counts);
            } else {
                let tids: Vec<u32> = group
                    .alignments()
                    .iter()
                    .map(|a| a.transcript_id)
                    .filter(|&t| (t as usize) < num_transcripts)
                    .collect();
                ctx.cluster_forest.merge_clusters(&tids);
                ctx.cluster_forest
                    .update_cluster(first_tid, 1, log_forgetting_mass, update_counts);
            }
        }
    }

    // M-step: fold each transcript's normalized hit mass into its running
    // total, weighted by the batch's forgetting mass.
    let mut hit_mass_for_transcript: HashMap<u32, f64> = HashMap::new();
    for group in batch.iter() {
        for aln in group.alignments() {
            if (aln.transcript_id as usize) < num_transcripts {
                let entry = hit_mass_for_transcript
                    .entry(aln.transcript_id)
                    .or_insert(LOG_0);
                *entry = math::log_add(*entry, aln.log_prob);
            }
        }
    }
    for (tid, hit_mass) in hit_mass_for_transcript {
        let update = log_forgetting_mass + hit_mass;
        ctx.transcripts[tid as usize].add_mass(update);
    }

    ctx.num_assigned_fragments
        .fetch_add(local_assigned, Ordering::Relaxed);
    if !burned_in
        && ctx.num_assigned_fragments.load(Ordering::Relaxed) >= NUM_BURNIN_FRAGS
    {
        ctx.burned_in.store(true, Ordering::Relaxed);
    }
    lib.update_lib_type_counts(&lib_type_counts);
}
