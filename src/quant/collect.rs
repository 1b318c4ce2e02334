//! Seed collection: MEM occurrences resolved to per-transcript votes.

use std::collections::HashMap;

use crate::index::TranscriptomeIndex;
use crate::quant::hits::TranscriptHitList;
use crate::quant::QuantOpts;

/// Collect the seed votes of one read against every candidate transcript.
///
/// MEM occurrences are subsampled at stride `occ / max_occ` and capped at
/// `max_occ` per MEM. Occurrences straddling the forward/reverse strand
/// boundary are dropped. Occurrences spanning two packed transcripts are
/// dropped unless `split_spanning_seeds` is set, in which case the longer
/// side is kept when it still meets the minimum seed length, with the hit
/// location and query coordinates adjusted to the surviving side.
/// Pathological seeds are silently skipped; collection never fails.
pub fn collect_hits_for_read(
    index: &TranscriptomeIndex,
    opts: &QuantOpts,
    read: &[u8],
    hits: &mut HashMap<u32, TranscriptHitList>,
) {
    let read_len = read.len() as i64;
    let min_seed_len = opts.seed.min_seed_len as i64;

    for mem in index.mem_intervals(read, &opts.seed) {
        let occ = mem.num_occs();
        let step = if occ > opts.max_occ {
            occ / opts.max_occ
        } else {
            1
        };

        let mut k = 0;
        let mut count = 0;
        while k < occ && count < opts.max_occ {
            let rank = mem.sa_start + k;
            k += step;
            count += 1;

            let mut slen = mem.seed_len() as i64;
            let mut query_start = mem.query_start as i64;
            let mut rlen = read_len;

            let abs = index.sa_lookup(rank);
            let (start_raw, rev_start) = index.depos(abs);
            let (end_raw, rev_end) = index.depos(abs + slen as u64 - 1);
            // Occurrences straddling the strand boundary are not real hits.
            if rev_start != rev_end {
                continue;
            }
            let is_rev = rev_start;
            // Reverse hits project with their ends swapped.
            let (start_pos, end_pos) = if is_rev {
                (end_raw, start_raw)
            } else {
                (start_raw, end_raw)
            };

            let mut tid = index.pos_to_transcript(start_pos);
            let tid_end = index.pos_to_transcript(end_pos);
            let tlen = index.transcript_len(tid) as i64;
            let mut hit_loc =
                (if is_rev { end_pos } else { start_pos }) as i64 - index.offset(tid) as i64;

            if tid != tid_end {
                // The seed falls across the junction of two packed
                // transcripts.
                if !opts.split_spanning_seeds {
                    continue;
                }
                if !is_rev {
                    // packed transcripts: t1 ===========|t2|==========>
                    // hit:                          |==========>
                    let len1 = tlen - hit_loc;
                    let len2 = slen - len1;
                    if len1.max(len2) < min_seed_len {
                        continue;
                    }
                    if len1 >= len2 {
                        slen = len1;
                    } else {
                        // The seed now begins at base 0 of the second
                        // transcript, len1 bases into the read.
                        hit_loc = 0;
                        slen = len2;
                        query_start += len1;
                        tid = tid_end;
                    }
                } else {
                    let len2 = end_pos as i64 - index.offset(tid_end) as i64;
                    let len1 = slen - len2;
                    if len1.max(len2) < min_seed_len {
                        continue;
                    }
                    if len1 >= len2 {
                        slen = len1;
                        hit_loc = tlen - len2;
                        query_start += len2;
                        rlen -= len2;
                    } else {
                        slen = len2;
                        tid = tid_end;
                        hit_loc = len2;
                        rlen = hit_loc + query_start;
                    }
                }
            }

            if hit_loc < 0 || query_start < 0 || rlen < query_start {
                continue;
            }
            let entry = hits.entry(tid).or_insert_with(TranscriptHitList::new);
            if is_rev {
                entry.add_frag_match_rc(hit_loc as u32, query_start as u32, slen as u32, rlen as u32);
            } else {
                entry.add_frag_match(hit_loc as u32, query_start as u32, slen as u32);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{SeedOpts, TranscriptomeIndex};
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn encode(s: &str) -> Vec<u8> {
        s.bytes()
            .map(|b| match b {
                b'A' => 0,
                b'C' => 1,
                b'G' => 2,
                b'T' => 3,
                _ => 4,
            })
            .collect()
    }

    fn make_index(transcripts: &[(&str, &str)]) -> TranscriptomeIndex {
        let mut file = NamedTempFile::new().unwrap();
        for (name, seq) in transcripts {
            writeln!(file, ">{name}").unwrap();
            writeln!(file, "{seq}").unwrap();
        }
        file.flush().unwrap();
        TranscriptomeIndex::build(&[file.path()]).unwrap()
    }

    fn opts(min_seed_len: usize) -> QuantOpts {
        QuantOpts {
            seed: SeedOpts {
                min_seed_len,
                ..SeedOpts::default()
            },
            ..QuantOpts::default()
        }
    }

    #[test]
    fn perfect_read_votes_at_origin() {
        let idx = make_index(&[("t0", "ACGTACGTAC")]);
        let read = encode("ACGTACGT");
        let mut hits = HashMap::new();
        collect_hits_for_read(&idx, &opts(8), &read, &mut hits);

        let list = hits.get_mut(&0).expect("vote for t0");
        list.compute_best_chain(read.len() as u32);
        assert_eq!(list.best_hit_pos, 0);
        assert_eq!(list.best_hit_count, 8);
        assert!((list.best_hit_score - 1.0).abs() < 1e-12);
        assert!(list.is_forward());
    }

    #[test]
    fn ambiguous_read_votes_for_both_transcripts() {
        let idx = make_index(&[("t0", "AAAACCCCGGGG"), ("t1", "AAAACCCCGGGG")]);
        let read = encode("AAAACCCC");
        let mut hits = HashMap::new();
        collect_hits_for_read(&idx, &opts(8), &read, &mut hits);

        assert!(hits.contains_key(&0));
        assert!(hits.contains_key(&1));
        for (_, list) in hits.iter_mut() {
            list.compute_best_chain(read.len() as u32);
            assert!((list.best_hit_score - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn reverse_complement_read_votes_reverse() {
        let idx = make_index(&[("t0", "AACCTTGGCAGT")]);
        // Read is the reverse complement of the transcript prefix AACCTTGG.
        let read = encode("CCAAGGTT");
        let mut hits = HashMap::new();
        collect_hits_for_read(&idx, &opts(8), &read, &mut hits);

        let list = hits.get_mut(&0).expect("vote for t0");
        list.compute_best_chain(read.len() as u32);
        assert!(!list.is_forward());
        // An RC vote anchors at the seed end minus the read length, so a
        // perfect 8bp match covers 7 of 8 bases.
        assert_eq!(list.best_hit_count, 7);
        assert!(list.best_hit_score > 0.8);
    }

    #[test]
    fn spanning_seed_dropped_without_split() {
        // The read crosses the t0/t1 junction; with splitting disabled the
        // occurrence must vanish entirely.
        let idx = make_index(&[("t0", "ACGTTGCAGGCATTCAGGAC"), ("t1", "TTGACCAGTCAGCTGAAGCT")]);
        // 15 bases starting 10 into t0: last 10 of t0 + first 5 of t1.
        let read = encode("CATTCAGGACTTGAC");
        let mut o = opts(10);
        o.split_spanning_seeds = false;
        let mut hits = HashMap::new();
        collect_hits_for_read(&idx, &o, &read, &mut hits);
        assert!(hits.is_empty());
    }

    #[test]
    fn spanning_seed_split_keeps_longer_side() {
        let idx = make_index(&[("t0", "ACGTTGCAGGCATTCAGGAC"), ("t1", "TTGACCAGTCAGCTGAAGCT")]);
        let read = encode("CATTCAGGACTTGAC");
        let mut o = opts(10);
        o.split_spanning_seeds = true;
        let mut hits = HashMap::new();
        collect_hits_for_read(&idx, &o, &read, &mut hits);

        // len1 = 10 (in t0) >= len2 = 5, so the vote lands on t0 at the
        // original hit location.
        let list = hits.get_mut(&0).expect("vote for t0");
        list.compute_best_chain(read.len() as u32);
        assert_eq!(list.best_hit_pos, 10);
        assert_eq!(list.best_hit_count, 10);
        assert!(!hits.contains_key(&1));
    }

    #[test]
    fn spanning_seed_split_flips_to_second_transcript() {
        // Only 4 bases in t0, 11 in t1: the t1 side survives.
        let idx = make_index(&[("t0", "ACGTTGCAGGCATTCAGGAC"), ("t1", "TTGACCAGTCAGCTGAAGCT")]);
        let read = encode("GGACTTGACCAGTCA");
        let mut o = opts(10);
        o.split_spanning_seeds = true;
        let mut hits = HashMap::new();
        collect_hits_for_read(&idx, &o, &read, &mut hits);

        let list = hits.get_mut(&1).expect("vote for t1");
        list.compute_best_chain(read.len() as u32);
        // The surviving seed starts at base 0 of t1, 4 bases into the read.
        assert_eq!(list.best_hit_pos, -4);
        assert_eq!(list.best_hit_count, 11);
    }

    #[test]
    fn short_spanning_remnants_are_dropped() {
        let idx = make_index(&[("t0", "ACGTTGCAGGCATTCAGGAC"), ("t1", "TTGACCAGTCAGCTGAAGCT")]);
        // 8 into t0 + 7 into t1; both sides under min_seed_len 10.
        let read = encode("TTCAGGACTTGACCA");
        let mut o = opts(10);
        o.split_spanning_seeds = true;
        let mut hits = HashMap::new();
        collect_hits_for_read(&idx, &o, &read, &mut hits);
        assert!(hits.is_empty());
    }
}
