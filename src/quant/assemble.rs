//! Fragment-level hit assembly: per-mate vote lists become alignments.

use std::collections::HashMap;

use crate::index::TranscriptomeIndex;
use crate::io::fastq::{EncodedRead, Fragment};
use crate::library::{hit_type_paired, hit_type_single};
use crate::quant::alignment::{AlignmentGroup, SmemAlignment};
use crate::quant::collect::collect_hits_for_read;
use crate::quant::hits::TranscriptHitList;
use crate::quant::QuantOpts;

/// Map one fragment, filling `group` with its candidate alignments.
///
/// The group is cleared first; a fragment with no acceptable placement
/// leaves it empty.
pub fn hits_for_fragment(
    frag: &Fragment,
    index: &TranscriptomeIndex,
    opts: &QuantOpts,
    group: &mut AlignmentGroup,
) {
    match frag {
        Fragment::Single(read) => hits_for_single_fragment(read, index, opts, group),
        Fragment::Paired(mate1, mate2) => {
            hits_for_paired_fragment(mate1, mate2, index, opts, group)
        }
    }
}

/// Paired-end assembly: a transcript is a candidate only when both mates
/// chain onto it with sufficient coverage.
pub fn hits_for_paired_fragment(
    mate1: &EncodedRead,
    mate2: &EncodedRead,
    index: &TranscriptomeIndex,
    opts: &QuantOpts,
    group: &mut AlignmentGroup,
) {
    group.clear();

    let left_len = mate1.sequence.len() as u32;
    let right_len = mate2.sequence.len() as u32;

    let mut left_hits: HashMap<u32, TranscriptHitList> = HashMap::new();
    let mut right_hits: HashMap<u32, TranscriptHitList> = HashMap::new();
    collect_hits_for_read(index, opts, &mate1.sequence, &mut left_hits);
    collect_hits_for_read(index, opts, &mate2.sequence, &mut right_hits);

    for list in left_hits.values_mut() {
        list.compute_best_chain(left_len);
    }

    for (&tid, right) in right_hits.iter_mut() {
        let Some(left) = left_hits.get(&tid) else {
            continue;
        };
        if left.best_hit_score < opts.coverage_thresh {
            continue;
        }
        right.compute_best_chain(right_len);
        if right.best_hit_score < opts.coverage_thresh {
            continue;
        }

        let score = (left.best_hit_score + right.best_hit_score) * 0.5;
        let frag_length = (left.best_hit_pos - right.best_hit_pos).unsigned_abs() + right_len;

        // Reverse-strand mates are anchored at their 3' end for the
        // orientation call.
        let end1_pos = if left.is_forward() {
            left.best_hit_pos
        } else {
            left.best_hit_pos + left_len as i32
        };
        let end2_pos = if right.is_forward() {
            right.best_hit_pos
        } else {
            right.best_hit_pos + right_len as i32
        };
        let format = hit_type_paired(end1_pos, left.is_forward(), end2_pos, right.is_forward());

        group.push(SmemAlignment::new(tid, format, score, frag_length));
    }
}

/// Single-end assembly: every transcript passing the coverage threshold
/// yields an alignment with an unknown fragment length.
pub fn hits_for_single_fragment(
    read: &EncodedRead,
    index: &TranscriptomeIndex,
    opts: &QuantOpts,
    group: &mut AlignmentGroup,
) {
    group.clear();

    let read_len = read.sequence.len() as u32;
    let mut hits: HashMap<u32, TranscriptHitList> = HashMap::new();
    collect_hits_for_read(index, opts, &read.sequence, &mut hits);

    for (&tid, list) in hits.iter_mut() {
        list.compute_best_chain(read_len);
        if list.best_hit_score >= opts.coverage_thresh {
            let format = hit_type_single(list.best_hit_pos, list.is_forward());
            group.push(SmemAlignment::new(tid, format, list.best_hit_score, 0));
        }
    }
}
