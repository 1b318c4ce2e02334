//! Transcriptome index: packed reference text + suffix array + MEM search.
//!
//! All transcript sequences are concatenated into a single text and the
//! reverse complement of the whole concatenation is appended, so positions
//! in `[0, len)` lie on the forward strand and positions in `[len, 2*len)`
//! on the reverse strand. A suffix array over the combined text answers the
//! maximal-exact-match queries issued by the seed collector.

pub mod io;

use std::path::Path;

use crate::error::Error;
use crate::io::fasta;

/// Seed-search tuning knobs.
#[derive(Debug, Clone)]
pub struct SeedOpts {
    /// MEMs shorter than this are not reported.
    pub min_seed_len: usize,
    /// A MEM longer than `min_seed_len * split_factor` is re-seeded from
    /// its midpoint (second pass).
    pub split_factor: f64,
    /// Re-seed only MEMs occurring at most this many times; 0 disables the
    /// second pass.
    pub split_width: usize,
    /// Occurrence cap in the extra-sensitive pass.
    pub max_mem_intv: usize,
    /// Enable the extra-sensitive third pass.
    pub extra_seed_pass: bool,
}

impl Default for SeedOpts {
    fn default() -> Self {
        Self {
            min_seed_len: 19,
            split_factor: 1.5,
            split_width: 0,
            max_mem_intv: 20,
            extra_seed_pass: false,
        }
    }
}

/// One maximal exact match between a read substring and the reference,
/// together with its suffix-array occurrence interval.
#[derive(Debug, Clone, Copy)]
pub struct MemInterval {
    /// Start of the match in the read (0-based, inclusive).
    pub query_start: usize,
    /// End of the match in the read (exclusive).
    pub query_end: usize,
    /// Suffix-array rank range [sa_start, sa_end) of the occurrences.
    pub sa_start: usize,
    pub sa_end: usize,
}

impl MemInterval {
    pub fn seed_len(&self) -> usize {
        self.query_end - self.query_start
    }

    pub fn num_occs(&self) -> usize {
        self.sa_end - self.sa_start
    }
}

/// Suffix-array index over a set of reference transcripts.
pub struct TranscriptomeIndex {
    names: Vec<String>,
    /// Start of each transcript in the forward text; `offsets[n]` is the
    /// total forward length.
    offsets: Vec<u64>,
    /// Base codes (0..=3) for the forward text followed by its reverse
    /// complement; length is twice the forward length.
    seq: Vec<u8>,
    /// Suffix positions into `seq`, lexicographically sorted.
    sa: Vec<u64>,
}

impl TranscriptomeIndex {
    /// Build an index over the transcripts in the given FASTA files.
    ///
    /// Ambiguous bases are stored as `A`; transcript order in the files
    /// defines the dense transcript ids.
    pub fn build<P: AsRef<Path>>(fasta_paths: &[P]) -> Result<Self, Error> {
        let records = fasta::parse_fasta_files(fasta_paths)?;
        if records.is_empty() {
            return Err(Error::Index("no transcripts in input FASTA".into()));
        }
        log::info!("read {} target transcripts", records.len());

        let mut names = Vec::with_capacity(records.len());
        let mut offsets = Vec::with_capacity(records.len() + 1);
        let mut total: u64 = 0;
        for r in &records {
            if r.sequence.is_empty() {
                return Err(Error::Index(format!("transcript {} is empty", r.name)));
            }
            names.push(r.name.clone());
            offsets.push(total);
            total += r.sequence.len() as u64;
        }
        offsets.push(total);

        let mut seq = Vec::with_capacity(2 * total as usize);
        for r in &records {
            seq.extend(r.sequence.iter().map(|&c| if c < 4 { c } else { 0 }));
        }
        for i in (0..total as usize).rev() {
            seq.push(3 - seq[i]);
        }

        // Comparator sort over all suffixes; transcriptome-scale references
        // keep this tractable without a linear-time construction.
        log::info!("building suffix array over {} bases", seq.len());
        let mut sa: Vec<u64> = (0..seq.len() as u64).collect();
        sa.sort_unstable_by(|&a, &b| seq[a as usize..].cmp(&seq[b as usize..]));

        Ok(Self {
            names,
            offsets,
            seq,
            sa,
        })
    }

    pub(crate) fn from_parts(names: Vec<String>, offsets: Vec<u64>, seq: Vec<u8>, sa: Vec<u64>) -> Self {
        Self {
            names,
            offsets,
            seq,
            sa,
        }
    }

    pub fn num_transcripts(&self) -> usize {
        self.names.len()
    }

    pub fn name(&self, tid: u32) -> &str {
        &self.names[tid as usize]
    }

    pub fn transcript_len(&self, tid: u32) -> u32 {
        (self.offsets[tid as usize + 1] - self.offsets[tid as usize]) as u32
    }

    pub fn offset(&self, tid: u32) -> u64 {
        self.offsets[tid as usize]
    }

    /// Total length of the forward text.
    pub fn total_len(&self) -> u64 {
        *self.offsets.last().unwrap()
    }

    /// The transcript's base codes, 2-bit packed for the transcript table.
    pub fn packed_seq(&self, tid: u32) -> Vec<u8> {
        let start = self.offsets[tid as usize] as usize;
        let end = self.offsets[tid as usize + 1] as usize;
        crate::transcript::pack_sequence(&self.seq[start..end])
    }

    /// Transcript containing the forward-text position `pos`.
    pub fn pos_to_transcript(&self, pos: u64) -> u32 {
        debug_assert!(pos < self.total_len());
        (self.offsets.partition_point(|&o| o <= pos) - 1) as u32
    }

    /// Absolute text position of the occurrence with suffix-array rank
    /// `rank`.
    pub fn sa_lookup(&self, rank: usize) -> u64 {
        self.sa[rank]
    }

    /// Project an absolute text position onto the forward strand.
    ///
    /// Positions in the appended reverse-complement half mirror back onto
    /// `[0, total_len)` with `is_reverse = true`.
    pub fn depos(&self, abs: u64) -> (u64, bool) {
        let total = self.total_len();
        if abs < total {
            (abs, false)
        } else {
            (2 * total - 1 - abs, true)
        }
    }

    /// Base code at text position `pos + depth`, or -1 past the end of the
    /// text (the implicit terminator sorts before every base).
    fn suffix_code(&self, pos: u64, depth: usize) -> i16 {
        match self.seq.get(pos as usize + depth) {
            Some(&c) => c as i16,
            None => -1,
        }
    }

    /// Restrict `[lo, hi)` — all sharing a common prefix of length `depth`
    /// with the query — to the suffixes whose next base is `code`.
    fn narrow(&self, lo: usize, hi: usize, depth: usize, code: u8) -> (usize, usize) {
        let s = &self.sa[lo..hi];
        let first = s.partition_point(|&p| self.suffix_code(p, depth) < code as i16);
        let last = s.partition_point(|&p| self.suffix_code(p, depth) <= code as i16);
        (lo + first, lo + last)
    }

    /// Longest exact match starting at `start` in the read.
    ///
    /// Returns `(length, sa_start, sa_end)`; a length of zero means no base
    /// matched and the interval is meaningless.
    fn mmp_at(&self, read: &[u8], start: usize) -> (usize, usize, usize) {
        let mut lo = 0;
        let mut hi = self.sa.len();
        let mut len = 0;
        while start + len < read.len() {
            let c = read[start + len];
            if c >= 4 {
                break;
            }
            let (nlo, nhi) = self.narrow(lo, hi, len, c);
            if nlo >= nhi {
                break;
            }
            lo = nlo;
            hi = nhi;
            len += 1;
        }
        (len, lo, hi)
    }

    /// Greedy seed for the extra-sensitive pass: the shortest extension from
    /// `x` whose occurrence count drops to `max_mem_intv` or fewer while
    /// reaching `min_seed_len`.
    fn seed_strategy1(&self, read: &[u8], x: usize, opts: &SeedOpts) -> Option<MemInterval> {
        let mut lo = 0;
        let mut hi = self.sa.len();
        let mut len = 0;
        while x + len < read.len() {
            let c = read[x + len];
            if c >= 4 {
                break;
            }
            let (nlo, nhi) = self.narrow(lo, hi, len, c);
            if nlo >= nhi {
                break;
            }
            lo = nlo;
            hi = nhi;
            len += 1;
            if len >= opts.min_seed_len && (hi - lo) <= opts.max_mem_intv {
                return Some(MemInterval {
                    query_start: x,
                    query_end: x + len,
                    sa_start: lo,
                    sa_end: hi,
                });
            }
        }
        None
    }

    /// Collect maximal exact matches of `read` against the reference.
    ///
    /// Three passes: (1) the longest match starting at every non-N position,
    /// advancing past each match; (2) re-seeding from the midpoint of long,
    /// rare MEMs; (3) an opt-in extra-sensitive greedy pass.
    pub fn mem_intervals(&self, read: &[u8], opts: &SeedOpts) -> Vec<MemInterval> {
        let mut mems = Vec::new();

        // First pass: SMEMs.
        let mut x = 0;
        while x < read.len() {
            if read[x] >= 4 {
                x += 1;
                continue;
            }
            let (len, lo, hi) = self.mmp_at(read, x);
            if len == 0 {
                x += 1;
                continue;
            }
            if len >= opts.min_seed_len {
                mems.push(MemInterval {
                    query_start: x,
                    query_end: x + len,
                    sa_start: lo,
                    sa_end: hi,
                });
            }
            x += len;
        }

        // Second pass: MEMs contained in a long SMEM.
        let split_len = (opts.min_seed_len as f64 * opts.split_factor + 0.499) as usize;
        let first_pass = mems.len();
        for i in 0..first_pass {
            let m = mems[i];
            if m.seed_len() < split_len || m.num_occs() > opts.split_width {
                continue;
            }
            let mid = (m.query_start + m.query_end) / 2;
            let (len, lo, hi) = self.mmp_at(read, mid);
            if len >= opts.min_seed_len {
                mems.push(MemInterval {
                    query_start: mid,
                    query_end: mid + len,
                    sa_start: lo,
                    sa_end: hi,
                });
            }
        }

        // Third pass: extra-sensitive greedy walk.
        if opts.extra_seed_pass && opts.max_mem_intv > 0 {
            let mut x = 0;
            while x < read.len() {
                if read[x] >= 4 {
                    x += 1;
                    continue;
                }
                match self.seed_strategy1(read, x, opts) {
                    Some(m) => {
                        let end = m.query_end;
                        mems.push(m);
                        x = end;
                    }
                    None => x += 1,
                }
            }
        }

        mems
    }

    pub(crate) fn names(&self) -> &[String] {
        &self.names
    }

    pub(crate) fn offsets(&self) -> &[u64] {
        &self.offsets
    }

    pub(crate) fn text(&self) -> &[u8] {
        &self.seq
    }

    pub(crate) fn suffix_array(&self) -> &[u64] {
        &self.sa
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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

    #[test]
    fn build_records_transcripts() {
        let idx = make_index(&[("t0", "ACGTACGTAC"), ("t1", "GGGGCCCC")]);
        assert_eq!(idx.num_transcripts(), 2);
        assert_eq!(idx.name(0), "t0");
        assert_eq!(idx.transcript_len(0), 10);
        assert_eq!(idx.transcript_len(1), 8);
        assert_eq!(idx.offset(1), 10);
        assert_eq!(idx.total_len(), 18);
        assert_eq!(idx.suffix_array().len(), 36);
    }

    #[test]
    fn mmp_finds_exact_read() {
        let idx = make_index(&[("t0", "ACGTTGCAGGTT")]);
        let read = encode("ACGTTGCA");
        let (len, lo, hi) = idx.mmp_at(&read, 0);
        assert_eq!(len, 8);
        assert_eq!(hi - lo, 1);
        let (pos, is_rev) = idx.depos(idx.sa_lookup(lo));
        assert_eq!(pos, 0);
        assert!(!is_rev);
    }

    #[test]
    fn mem_intervals_cover_read() {
        let idx = make_index(&[("t0", "ACGTTGCAGGTTAACC")]);
        let read = encode("ACGTTGCAGG");
        let opts = SeedOpts {
            min_seed_len: 5,
            ..SeedOpts::default()
        };
        let mems = idx.mem_intervals(&read, &opts);
        assert!(!mems.is_empty());
        assert_eq!(mems[0].query_start, 0);
        assert_eq!(mems[0].seed_len(), 10);
    }

    #[test]
    fn reverse_strand_occurrence() {
        // The reverse complement of the read appears in the forward text,
        // so the read itself matches the appended RC half.
        let idx = make_index(&[("t0", "AACCTTGGAACC")]);
        let read = encode("GGTTCCAAGGTT"); // RC of the transcript
        let (len, lo, hi) = idx.mmp_at(&read, 0);
        assert_eq!(len, 12);
        assert!(hi > lo);
        let (_, is_rev) = idx.depos(idx.sa_lookup(lo));
        assert!(is_rev);
    }

    #[test]
    fn depos_mirrors_reverse_half() {
        let idx = make_index(&[("t0", "ACGT")]);
        assert_eq!(idx.depos(0), (0, false));
        assert_eq!(idx.depos(3), (3, false));
        assert_eq!(idx.depos(4), (3, true));
        assert_eq!(idx.depos(7), (0, true));
    }

    #[test]
    fn pos_to_transcript_boundaries() {
        let idx = make_index(&[("t0", "ACGTA"), ("t1", "GGCC")]);
        assert_eq!(idx.pos_to_transcript(0), 0);
        assert_eq!(idx.pos_to_transcript(4), 0);
        assert_eq!(idx.pos_to_transcript(5), 1);
        assert_eq!(idx.pos_to_transcript(8), 1);
    }

    #[test]
    fn n_bases_break_seeds() {
        let idx = make_index(&[("t0", "ACGTACGTACGT")]);
        let mut read = encode("ACGTACGT");
        read[4] = 4; // N
        let opts = SeedOpts {
            min_seed_len: 3,
            ..SeedOpts::default()
        };
        let mems = idx.mem_intervals(&read, &opts);
        // The N splits the read into two seeds.
        assert!(mems.iter().all(|m| m.seed_len() <= 4));
        assert!(mems.iter().any(|m| m.query_start == 0));
        assert!(mems.iter().any(|m| m.query_start == 5));
    }

    #[test]
    fn reseed_pass_adds_contained_mems() {
        let idx = make_index(&[("t0", "ACGTTGCAGGTTAACCGGAT")]);
        let read = encode("ACGTTGCAGGTTAACC");
        let base = SeedOpts {
            min_seed_len: 4,
            split_width: 0,
            ..SeedOpts::default()
        };
        let without = idx.mem_intervals(&read, &base).len();
        let with = idx
            .mem_intervals(
                &read,
                &SeedOpts {
                    split_width: 4,
                    ..base
                },
            )
            .len();
        assert!(with > without);
    }

    #[test]
    fn packed_seq_round_trips() {
        let idx = make_index(&[("t0", "ACGTACG")]);
        let packed = idx.packed_seq(0);
        let t = crate::transcript::Transcript::new(0, "t0", 7, packed);
        let expect = encode("ACGTACG");
        for (i, &c) in expect.iter().enumerate() {
            assert_eq!(t.base_at(i as u32), c);
        }
    }
}
