//! Read-library formats and alignment/library compatibility.
//!
//! A library format combines the fragment type (single/paired), the relative
//! orientation of the mates, and the strandedness of the protocol. Each valid
//! combination has a stable single-byte id:
//!
//! ```text
//! format_id = (type << 5) | (orientation << 3) | strandedness
//! ```
//!
//! with `type` in 1 bit, `orientation` in 2 bits and `strandedness` in 3 bits,
//! so `format_id` and `from_id` are exact inverses over the valid combinations.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::math::{LOG_0, LOG_1, LOG_ONEHALF};

// ---------------------------------------------------------------------------
// Format enums
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadType {
    SingleEnd = 0,
    PairedEnd = 1,
}

/// Relative orientation of the two mates of a paired-end fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOrientation {
    Same = 0,
    Away = 1,
    Toward = 2,
    None = 3,
}

/// Which strand(s) the read(s) of a fragment are drawn from.
///
/// For paired-end data `SA` means mate 1 is sense and mate 2 antisense
/// (and `AS` the converse); for single-end data `S`/`A` name the strand of
/// the lone read; `U` is unstranded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStrandedness {
    SA = 0,
    AS = 1,
    S = 2,
    A = 3,
    U = 4,
}

/// A complete library format: fragment type + orientation + strandedness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LibraryFormat {
    pub read_type: ReadType,
    pub orientation: ReadOrientation,
    pub strandedness: ReadStrandedness,
}

/// Largest value `format_id` can take; sizes per-format count tables.
pub const MAX_FORMAT_ID: u8 = (1 << 6) - 1;

impl LibraryFormat {
    pub fn new(
        read_type: ReadType,
        orientation: ReadOrientation,
        strandedness: ReadStrandedness,
    ) -> Self {
        Self {
            read_type,
            orientation,
            strandedness,
        }
    }

    /// The stable one-byte encoding of this format.
    pub fn format_id(&self) -> u8 {
        ((self.read_type as u8) << 5) | ((self.orientation as u8) << 3) | self.strandedness as u8
    }

    /// Decode a `format_id` back into a format. Returns `None` for byte
    /// values that do not correspond to any valid combination.
    pub fn from_id(id: u8) -> Option<Self> {
        if id > MAX_FORMAT_ID {
            return None;
        }
        let read_type = match (id >> 5) & 0x1 {
            0 => ReadType::SingleEnd,
            _ => ReadType::PairedEnd,
        };
        let orientation = match (id >> 3) & 0x3 {
            0 => ReadOrientation::Same,
            1 => ReadOrientation::Away,
            2 => ReadOrientation::Toward,
            _ => ReadOrientation::None,
        };
        let strandedness = match id & 0x7 {
            0 => ReadStrandedness::SA,
            1 => ReadStrandedness::AS,
            2 => ReadStrandedness::S,
            3 => ReadStrandedness::A,
            4 => ReadStrandedness::U,
            _ => return None,
        };
        Some(Self::new(read_type, orientation, strandedness))
    }

    /// Parse a library-type string (`U`, `SF`, `SR`, `IU`, `ISF`, `ISR`,
    /// `OU`, `OSF`, `OSR`, `MU`, `MSF`, `MSR`).
    pub fn parse(s: &str) -> Result<Self, String> {
        use ReadOrientation::*;
        use ReadStrandedness::*;
        use ReadType::*;
        let fmt = match s {
            "U" => Self::new(SingleEnd, None, U),
            "SF" => Self::new(SingleEnd, None, S),
            "SR" => Self::new(SingleEnd, None, A),
            "IU" => Self::new(PairedEnd, Toward, U),
            "ISF" => Self::new(PairedEnd, Toward, SA),
            "ISR" => Self::new(PairedEnd, Toward, AS),
            "OU" => Self::new(PairedEnd, Away, U),
            "OSF" => Self::new(PairedEnd, Away, SA),
            "OSR" => Self::new(PairedEnd, Away, AS),
            "MU" => Self::new(PairedEnd, Same, U),
            "MSF" => Self::new(PairedEnd, Same, S),
            "MSR" => Self::new(PairedEnd, Same, A),
            _ => {
                return Err(format!(
                    "unknown library type '{s}'; expected one of \
                     U, SF, SR, IU, ISF, ISR, OU, OSF, OSR, MU, MSF, MSR"
                ))
            }
        };
        Ok(fmt)
    }

    pub fn is_paired(&self) -> bool {
        self.read_type == ReadType::PairedEnd
    }
}

impl std::fmt::Display for LibraryFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let t = match self.read_type {
            ReadType::SingleEnd => "single",
            ReadType::PairedEnd => "paired",
        };
        let o = match self.orientation {
            ReadOrientation::Same => "same",
            ReadOrientation::Away => "away",
            ReadOrientation::Toward => "toward",
            ReadOrientation::None => "none",
        };
        let s = match self.strandedness {
            ReadStrandedness::SA => "SA",
            ReadStrandedness::AS => "AS",
            ReadStrandedness::S => "S",
            ReadStrandedness::A => "A",
            ReadStrandedness::U => "U",
        };
        write!(f, "{t}:{o}:{s}")
    }
}

// ---------------------------------------------------------------------------
// Observed-geometry classification
// ---------------------------------------------------------------------------

/// Classify the observed geometry of a mapped single-end read.
pub fn hit_type_single(_pos: i32, is_forward: bool) -> LibraryFormat {
    let strandedness = if is_forward {
        ReadStrandedness::S
    } else {
        ReadStrandedness::A
    };
    LibraryFormat::new(ReadType::SingleEnd, ReadOrientation::None, strandedness)
}

/// Classify the observed geometry of a mapped read pair.
///
/// Mates on opposite strands point toward each other when the forward-strand
/// mate starts first, away from each other otherwise; mates on the same
/// strand are `Same` with the strand of both.
pub fn hit_type_paired(
    end1_start: i32,
    end1_fwd: bool,
    end2_start: i32,
    end2_fwd: bool,
) -> LibraryFormat {
    use ReadOrientation::*;
    use ReadStrandedness::*;
    if end1_fwd != end2_fwd {
        if end1_fwd {
            if end1_start <= end2_start {
                LibraryFormat::new(ReadType::PairedEnd, Toward, SA)
            } else {
                LibraryFormat::new(ReadType::PairedEnd, Away, SA)
            }
        } else if end2_start <= end1_start {
            LibraryFormat::new(ReadType::PairedEnd, Toward, AS)
        } else {
            LibraryFormat::new(ReadType::PairedEnd, Away, AS)
        }
    } else if end1_fwd {
        LibraryFormat::new(ReadType::PairedEnd, Same, S)
    } else {
        LibraryFormat::new(ReadType::PairedEnd, Same, A)
    }
}

/// Log-probability that an alignment with the observed format is consistent
/// with the expected library format.
///
/// Type or orientation mismatches are impossible (log 0). When the expected
/// protocol is unstranded, either strand is equally likely (log 1/2);
/// otherwise the strandedness must match exactly.
pub fn log_align_compat_prob(observed: LibraryFormat, expected: LibraryFormat) -> f64 {
    if observed.read_type != expected.read_type || observed.orientation != expected.orientation {
        LOG_0
    } else if expected.strandedness == ReadStrandedness::U {
        LOG_ONEHALF
    } else if expected.strandedness == observed.strandedness {
        LOG_1
    } else {
        LOG_0
    }
}

// ---------------------------------------------------------------------------
// Read libraries
// ---------------------------------------------------------------------------

/// One input read library: its files, expected format, and per-format
/// alignment counts accumulated during quantification.
pub struct ReadLibrary {
    pub format: LibraryFormat,
    pub mates1: Vec<PathBuf>,
    pub mates2: Vec<PathBuf>,
    pub unmated: Vec<PathBuf>,
    lib_type_counts: Vec<AtomicU64>,
}

impl ReadLibrary {
    pub fn paired(format: LibraryFormat, mates1: Vec<PathBuf>, mates2: Vec<PathBuf>) -> Self {
        Self {
            format,
            mates1,
            mates2,
            unmated: Vec::new(),
            lib_type_counts: (0..=MAX_FORMAT_ID).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    pub fn unpaired(format: LibraryFormat, unmated: Vec<PathBuf>) -> Self {
        Self {
            format,
            mates1: Vec::new(),
            mates2: Vec::new(),
            unmated,
            lib_type_counts: (0..=MAX_FORMAT_ID).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    /// Fold a mini-batch's per-format counts into the library totals.
    pub fn update_lib_type_counts(&self, batch_counts: &[u64]) {
        for (total, &n) in self.lib_type_counts.iter().zip(batch_counts) {
            if n > 0 {
                total.fetch_add(n, Ordering::Relaxed);
            }
        }
    }

    pub fn lib_type_counts(&self) -> Vec<u64> {
        self.lib_type_counts
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .collect()
    }

    fn files(&self) -> impl Iterator<Item = &Path> {
        self.mates1
            .iter()
            .chain(self.mates2.iter())
            .chain(self.unmated.iter())
            .map(PathBuf::as_path)
    }

    /// Whether every input is a regular file, i.e. can be read again on a
    /// later pass. Streams and pipes cannot.
    pub fn is_regular_files(&self) -> bool {
        self.files()
            .all(|p| std::fs::metadata(p).map(|m| m.is_file()).unwrap_or(false))
    }

    pub fn read_files_string(&self) -> String {
        self.files()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_TYPES: [&str; 12] = [
        "U", "SF", "SR", "IU", "ISF", "ISR", "OU", "OSF", "OSR", "MU", "MSF", "MSR",
    ];

    #[test]
    fn format_id_round_trip() {
        for s in ALL_TYPES {
            let fmt = LibraryFormat::parse(s).unwrap();
            let id = fmt.format_id();
            assert!(id <= MAX_FORMAT_ID);
            assert_eq!(LibraryFormat::from_id(id), Some(fmt), "round trip for {s}");
        }
    }

    #[test]
    fn format_ids_distinct() {
        let ids: std::collections::HashSet<u8> = ALL_TYPES
            .iter()
            .map(|s| LibraryFormat::parse(s).unwrap().format_id())
            .collect();
        assert_eq!(ids.len(), ALL_TYPES.len());
    }

    #[test]
    fn parse_rejects_unknown() {
        assert!(LibraryFormat::parse("XYZ").is_err());
        assert!(LibraryFormat::parse("").is_err());
    }

    #[test]
    fn hit_type_inward_pair() {
        // Mate 1 forward at 10, mate 2 reverse at 90: inward, mate 1 sense.
        let fmt = hit_type_paired(10, true, 90, false);
        assert_eq!(fmt.orientation, ReadOrientation::Toward);
        assert_eq!(fmt.strandedness, ReadStrandedness::SA);

        // Mate 2 forward and first: inward, mate 1 antisense.
        let fmt = hit_type_paired(90, false, 10, true);
        assert_eq!(fmt.orientation, ReadOrientation::Toward);
        assert_eq!(fmt.strandedness, ReadStrandedness::AS);
    }

    #[test]
    fn hit_type_outward_pair() {
        let fmt = hit_type_paired(90, true, 10, false);
        assert_eq!(fmt.orientation, ReadOrientation::Away);
        assert_eq!(fmt.strandedness, ReadStrandedness::SA);
    }

    #[test]
    fn hit_type_same_strand_pair() {
        let fmt = hit_type_paired(10, true, 90, true);
        assert_eq!(fmt.orientation, ReadOrientation::Same);
        assert_eq!(fmt.strandedness, ReadStrandedness::S);

        let fmt = hit_type_paired(10, false, 90, false);
        assert_eq!(fmt.strandedness, ReadStrandedness::A);
    }

    #[test]
    fn hit_type_single_strands() {
        assert_eq!(
            hit_type_single(0, true).strandedness,
            ReadStrandedness::S
        );
        assert_eq!(
            hit_type_single(0, false).strandedness,
            ReadStrandedness::A
        );
    }

    #[test]
    fn compat_unstranded_inward() {
        let expected = LibraryFormat::parse("IU").unwrap();

        // Observed inward alignments get log(1/2) regardless of strand.
        let toward = hit_type_paired(10, true, 90, false);
        assert_eq!(log_align_compat_prob(toward, expected), LOG_ONEHALF);

        // Outward alignments are incompatible with an inward library.
        let away = hit_type_paired(90, true, 10, false);
        assert_eq!(log_align_compat_prob(away, expected), LOG_0);
    }

    #[test]
    fn compat_stranded_mismatch() {
        let expected = LibraryFormat::parse("ISF").unwrap();

        let matching = hit_type_paired(10, true, 90, false); // SA
        assert_eq!(log_align_compat_prob(matching, expected), LOG_1);

        let flipped = hit_type_paired(90, false, 10, true); // AS
        assert_eq!(log_align_compat_prob(flipped, expected), LOG_0);
    }

    #[test]
    fn lib_type_count_accumulation() {
        let lib = ReadLibrary::unpaired(LibraryFormat::parse("U").unwrap(), vec![]);
        let mut batch = vec![0u64; MAX_FORMAT_ID as usize + 1];
        let id = hit_type_single(0, true).format_id() as usize;
        batch[id] = 3;
        lib.update_lib_type_counts(&batch);
        lib.update_lib_type_counts(&batch);
        assert_eq!(lib.lib_type_counts()[id], 6);
    }
}
