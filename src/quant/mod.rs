//! The streaming quantification core: seed collection, chain scoring, hit
//! assembly, the online EM, and the parallel pipeline that ties them
//! together.

pub mod alignment;
pub mod assemble;
pub mod cache;
pub mod collect;
pub mod em;
pub mod hits;
pub mod pipeline;
pub mod session;

use crate::index::SeedOpts;

/// Fragments per mini-batch; also the scheduling unit of the pipeline.
pub const MINI_BATCH_SIZE: usize = 1000;

/// Options controlling mapping and inference, assembled from the CLI.
#[derive(Debug, Clone)]
pub struct QuantOpts {
    pub seed: SeedOpts,
    /// Occurrence cap per MEM; more frequent seeds are subsampled.
    pub max_occ: usize,
    /// Fragments mapping to more than this many transcripts are discarded.
    pub max_read_occs: usize,
    /// Attempt to rescue seeds falling across a transcript boundary.
    pub split_spanning_seeds: bool,
    /// Required coverage of a read by chained seeds to call a hit.
    pub coverage_thresh: f64,
    /// Weight alignments by orientation/strand agreement with the library.
    pub use_read_compat: bool,
    /// Weight paired alignments by the learned fragment-length distribution.
    pub use_frag_len_dist: bool,
    /// Mapped-fragment observations required before inference stops.
    pub num_required_fragments: u64,
    /// Disable the on-disk alignment cache between passes.
    pub disable_mapping_cache: bool,
    pub num_threads: usize,
}

impl Default for QuantOpts {
    fn default() -> Self {
        Self {
            seed: SeedOpts::default(),
            max_occ: 200,
            max_read_occs: 100,
            split_spanning_seeds: false,
            coverage_thresh: 0.75,
            use_read_compat: false,
            use_frag_len_dist: false,
            num_required_fragments: 50_000_000,
            disable_mapping_cache: false,
            num_threads: 1,
        }
    }
}
