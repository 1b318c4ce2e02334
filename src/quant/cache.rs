//! On-disk alignment cache.
//!
//! While the initial pass maps reads, finished alignment groups are
//! serialized to one binary file per library. Later EM passes replay these
//! files instead of re-mapping, which is the point of the cache: mapping is
//! the expensive half of the pipeline. Cache files are session temporaries
//! and are deleted when quantification finishes.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crossbeam::queue::{ArrayQueue, SegQueue};

use crate::error::Error;
use crate::quant::alignment::AlignmentGroup;

/// A written cache file and the number of groups it holds. The record
/// count lives here rather than in the file, so the replay reader knows
/// exactly when to stop.
pub struct CacheFile {
    pub path: PathBuf,
    pub num_written: u64,
}

/// Cache-writer loop: drain finished groups from `output_groups`,
/// serialize them, and return their slots to the structure pool.
///
/// Runs until `write_to_cache` is cleared and the queue is empty. The
/// writer itself clears the flag once enough fragments have been observed,
/// at which point workers stop routing groups this way. Returns the number
/// of groups written; any I/O failure is fatal to the session.
pub fn write_alignment_cache(
    path: &Path,
    output_groups: &SegQueue<AlignmentGroup>,
    structure_pool: &ArrayQueue<AlignmentGroup>,
    write_to_cache: &AtomicBool,
    num_observed_fragments: &AtomicU64,
    num_required_fragments: u64,
) -> Result<u64, Error> {
    let file = File::create(path).map_err(|e| Error::io(e, path))?;
    let mut out = BufWriter::new(file);
    let mut num_written = 0u64;

    while write_to_cache.load(Ordering::Acquire) {
        while let Some(group) = output_groups.pop() {
            group.write_to(&mut out).map_err(|e| Error::io(e, path))?;
            num_written += 1;
            let _ = structure_pool.push(group);

            // Once the required observations exist, the cache will never
            // be replayed; stop collecting it.
            if num_observed_fragments.load(Ordering::Relaxed) > num_required_fragments {
                write_to_cache.store(false, Ordering::Release);
            }
        }
        std::thread::yield_now();
    }

    // The hot path has finished; drain whatever is left.
    while let Some(group) = output_groups.pop() {
        group.write_to(&mut out).map_err(|e| Error::io(e, path))?;
        num_written += 1;
        let _ = structure_pool.push(group);
    }

    out.flush().map_err(|e| Error::io(e, path))?;
    Ok(num_written)
}

/// Cache-reader loop: deserialize exactly `num_written` groups into slots
/// pulled from the structure pool and feed them to the replay queue.
///
/// `finished_parsing` is set on every exit path so replay workers never
/// wait on a reader that died.
pub fn read_alignment_cache(
    path: &Path,
    num_written: u64,
    structure_pool: &ArrayQueue<AlignmentGroup>,
    replay_queue: &SegQueue<AlignmentGroup>,
    finished_parsing: &AtomicBool,
) -> Result<(), Error> {
    let result = (|| {
        let file = File::open(path).map_err(|e| Error::io(e, path))?;
        let mut input = BufReader::new(file);
        for _ in 0..num_written {
            let mut group = loop {
                match structure_pool.pop() {
                    Some(g) => break g,
                    None => std::hint::spin_loop(),
                }
            };
            group.read_from(&mut input)?;
            replay_queue.push(group);
        }
        Ok(())
    })();
    finished_parsing.store(true, Ordering::Release);
    result
}
