use std::path::PathBuf;

use clap::Parser;

use crate::index::SeedOpts;
use crate::library::{LibraryFormat, ReadLibrary};
use crate::quant::QuantOpts;

// ---------------------------------------------------------------------------
// Run mode enum
// ---------------------------------------------------------------------------

/// `--runMode` values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunMode {
    Index,
    Quant,
}

impl std::str::FromStr for RunMode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "index" => Ok(Self::Index),
            "quant" => Ok(Self::Quant),
            _ => Err(format!("unknown runMode '{s}'; expected 'index' or 'quant'")),
        }
    }
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Index => write!(f, "index"),
            Self::Quant => write!(f, "quant"),
        }
    }
}

fn default_thread_count() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1)
}

// ---------------------------------------------------------------------------
// Parameters struct
// ---------------------------------------------------------------------------

/// ruSalmon command-line parameters.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "ruSalmon",
    about = "Streaming SMEM-based estimation of transcript abundance from RNA-seq reads",
    version
)]
pub struct Parameters {
    // ── Run ─────────────────────────────────────────────────────────────
    /// Run mode: index or quant
    #[arg(long = "runMode", default_value = "quant")]
    pub run_mode: RunMode,

    /// Number of worker threads
    #[arg(long = "threads", short = 'p', default_value_t = default_thread_count())]
    pub threads: usize,

    // ── Index ───────────────────────────────────────────────────────────
    /// FASTA file(s) with reference transcripts (for index mode)
    #[arg(long = "transcripts", short = 't', num_args = 1..)]
    pub transcripts: Vec<PathBuf>,

    /// Transcriptome index directory
    #[arg(long = "index", short = 'i', default_value = "./TranscriptIndex")]
    pub index_dir: PathBuf,

    // ── Read libraries ──────────────────────────────────────────────────
    /// Library format string (U, SF, SR, IU, ISF, ISR, OU, OSF, OSR, MU, MSF, MSR)
    #[arg(long = "libType", short = 'l')]
    pub lib_type: Option<String>,

    /// File(s) containing the #1 mates
    #[arg(long = "mates1", short = '1', num_args = 1..)]
    pub mates1: Vec<PathBuf>,

    /// File(s) containing the #2 mates
    #[arg(long = "mates2", short = '2', num_args = 1..)]
    pub mates2: Vec<PathBuf>,

    /// File(s) containing unmated (single-end) reads
    #[arg(long = "unmatedReads", short = 'r', num_args = 1..)]
    pub unmated_reads: Vec<PathBuf>,

    /// Command to decompress input files (e.g. "zcat" for .gz)
    #[arg(long = "readFilesCommand")]
    pub read_files_command: Option<String>,

    // ── Mapping ─────────────────────────────────────────────────────────
    /// (S)MEMs smaller than this size are not considered
    #[arg(long = "minSeedLen", short = 'k', default_value_t = 19)]
    pub min_seed_len: usize,

    /// (S)MEMs occurring more than this many times are subsampled
    #[arg(long = "maxOcc", short = 'm', default_value_t = 200)]
    pub max_occ: usize,

    /// Reads mapping to more than this many transcripts are discarded
    #[arg(long = "maxReadOcc", short = 'w', default_value_t = 100)]
    pub max_read_occ: usize,

    /// Re-seed inside (S)MEMs occurring at most this many times; 0 disables
    #[arg(long = "splitWidth", short = 's', default_value_t = 0)]
    pub split_width: usize,

    /// Occurrence cap for the extra-sensitive seed pass
    #[arg(long = "maxMemIntv", default_value_t = 20)]
    pub max_mem_intv: usize,

    /// Attempt to split seeds that fall on a boundary between two transcripts
    #[arg(long = "splitSpanningSeeds", short = 'b', default_value_t = false)]
    pub split_spanning_seeds: bool,

    /// Enable an extra pass of seed search (slower, more sensitive)
    #[arg(long = "extraSensitive", default_value_t = false)]
    pub extra_sensitive: bool,

    /// Required coverage of a read by the union of chained seeds
    #[arg(long = "coverage", short = 'c', default_value_t = 0.75)]
    pub coverage: f64,

    // ── Inference ───────────────────────────────────────────────────────
    /// Weight alignments by orientation/strand agreement with --libType
    #[arg(long = "useReadCompat", short = 'e', default_value_t = false)]
    pub use_read_compat: bool,

    /// Weight paired alignments by the learned fragment-length distribution
    #[arg(long = "useFragLenDist", short = 'd', default_value_t = false)]
    pub use_frag_len_dist: bool,

    /// Minimum number of observed (mapped) fragments before inference stops;
    /// smaller inputs are read through multiple times
    #[arg(long = "numRequiredObs", short = 'n', default_value_t = 50_000_000)]
    pub num_required_obs: u64,

    /// Disable the on-disk mapping cache used by additional passes
    #[arg(long = "disableMappingCache", default_value_t = false)]
    pub disable_mapping_cache: bool,

    // ── Output ──────────────────────────────────────────────────────────
    /// Output directory
    #[arg(long = "output", short = 'o', default_value = "./")]
    pub output: PathBuf,
}

impl Parameters {
    /// The parsed library format; an error in quant mode when missing or
    /// malformed.
    pub fn lib_format(&self) -> Result<LibraryFormat, crate::error::Error> {
        let s = self.lib_type.as_deref().ok_or_else(|| {
            crate::error::Error::Parameter("--libType is required for quantification".into())
        })?;
        LibraryFormat::parse(s).map_err(crate::error::Error::Parameter)
    }

    /// Assemble the read libraries described on the command line.
    pub fn read_libraries(&self) -> Result<Vec<ReadLibrary>, crate::error::Error> {
        let format = self.lib_format()?;
        let lib = if format.is_paired() {
            ReadLibrary::paired(format, self.mates1.clone(), self.mates2.clone())
        } else {
            ReadLibrary::unpaired(format, self.unmated_reads.clone())
        };
        Ok(vec![lib])
    }

    /// Quantification options derived from the mapping/inference flags.
    pub fn quant_opts(&self) -> QuantOpts {
        QuantOpts {
            seed: SeedOpts {
                min_seed_len: self.min_seed_len,
                split_factor: 1.5,
                split_width: self.split_width,
                max_mem_intv: self.max_mem_intv,
                extra_seed_pass: self.extra_sensitive,
            },
            max_occ: self.max_occ,
            max_read_occs: self.max_read_occ,
            split_spanning_seeds: self.split_spanning_seeds,
            coverage_thresh: self.coverage,
            use_read_compat: self.use_read_compat,
            use_frag_len_dist: self.use_frag_len_dist,
            num_required_fragments: self.num_required_obs,
            disable_mapping_cache: self.disable_mapping_cache,
            num_threads: self.threads,
        }
    }

    /// Validate parameter combinations that clap alone cannot enforce.
    pub fn validate(&self) -> Result<(), crate::error::Error> {
        use crate::error::Error;

        if self.threads == 0 {
            return Err(Error::Parameter("--threads must be >= 1".into()));
        }

        match self.run_mode {
            RunMode::Index => {
                if self.transcripts.is_empty() {
                    return Err(Error::Parameter(
                        "--transcripts is required when --runMode index".into(),
                    ));
                }
            }
            RunMode::Quant => {
                let format = self.lib_format()?;
                if format.is_paired() {
                    if self.mates1.is_empty() || self.mates2.is_empty() {
                        return Err(Error::Parameter(
                            "--mates1 and --mates2 are required for a paired-end library".into(),
                        ));
                    }
                    if self.mates1.len() != self.mates2.len() {
                        return Err(Error::Parameter(
                            "--mates1 and --mates2 must list the same number of files".into(),
                        ));
                    }
                    if !self.unmated_reads.is_empty() {
                        return Err(Error::Parameter(
                            "--unmatedReads cannot be combined with a paired library type".into(),
                        ));
                    }
                } else {
                    if self.unmated_reads.is_empty() {
                        return Err(Error::Parameter(
                            "--unmatedReads is required for a single-end library".into(),
                        ));
                    }
                    if !self.mates1.is_empty() || !self.mates2.is_empty() {
                        return Err(Error::Parameter(
                            "--mates1/--mates2 cannot be combined with a single-end library type"
                                .into(),
                        ));
                    }
                }

                if !(0.0..=1.0).contains(&self.coverage) {
                    return Err(Error::Parameter(
                        "--coverage must be between 0 and 1".into(),
                    ));
                }
                if self.min_seed_len == 0 {
                    return Err(Error::Parameter("--minSeedLen must be >= 1".into()));
                }
                if self.max_occ == 0 {
                    return Err(Error::Parameter("--maxOcc must be >= 1".into()));
                }
            }
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
