//! Read input: FASTQ decoding and mini-batch fragment jobs.
//!
//! `FragmentSource` owns the open FASTQ streams of one read library and
//! hands worker threads jobs of up to a mini-batch of encoded fragments.
//! Input files may be plain, gzip-compressed, or piped through a
//! user-supplied decompression command.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Mutex;

use flate2::read::GzDecoder;
use noodles::fastq;

use crate::error::Error;
use crate::library::ReadLibrary;

/// One sequencing read, bases already encoded as numeric codes.
#[derive(Debug, Clone)]
pub struct EncodedRead {
    pub name: String,
    /// Base codes: A=0, C=1, G=2, T=3, anything else 4.
    pub sequence: Vec<u8>,
    /// Raw FASTQ quality values.
    pub quality: Vec<u8>,
}

/// One sequencing fragment: a lone read or a mate pair.
#[derive(Debug, Clone)]
pub enum Fragment {
    Single(EncodedRead),
    Paired(EncodedRead, EncodedRead),
}

impl Fragment {
    pub fn is_paired(&self) -> bool {
        matches!(self, Fragment::Paired(..))
    }
}

/// Numeric code for an ASCII base, case-insensitively. `N` and the IUPAC
/// ambiguity codes all collapse to 4.
pub fn encode_base(base: u8) -> u8 {
    match base & 0xdf {
        b'A' => 0,
        b'C' => 1,
        b'G' => 2,
        b'T' => 3,
        _ => 4,
    }
}

// ---------------------------------------------------------------------------
// Record streams
// ---------------------------------------------------------------------------

/// A single open FASTQ stream yielding encoded reads.
struct RecordStream {
    records: fastq::io::Reader<Box<dyn BufRead + Send>>,
}

impl RecordStream {
    fn open(path: &Path, decompress_cmd: Option<&str>) -> Result<Self, Error> {
        let raw: Box<dyn BufRead + Send> = match decompress_cmd {
            Some(cmd) => Box::new(BufReader::new(spawn_decompressor(cmd, path)?)),
            None => {
                let file = File::open(path).map_err(|e| Error::io(e, path))?;
                if has_gzip_extension(path) {
                    Box::new(BufReader::new(GzDecoder::new(file)))
                } else {
                    Box::new(BufReader::new(file))
                }
            }
        };
        Ok(Self {
            records: fastq::io::Reader::new(raw),
        })
    }

    /// Append up to `limit` encoded reads to `out`, returning how many
    /// were taken. Fewer than `limit` means the stream is exhausted.
    fn take(&mut self, out: &mut Vec<EncodedRead>, limit: usize) -> Result<usize, Error> {
        let mut taken = 0;
        while taken < limit {
            match self.records.records().next() {
                Some(Ok(record)) => {
                    out.push(encode_record(&record)?);
                    taken += 1;
                }
                Some(Err(e)) => return Err(Error::from(e)),
                None => break,
            }
        }
        Ok(taken)
    }
}

fn has_gzip_extension(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("gz") | Some("gzip")
    )
}

fn spawn_decompressor(cmd: &str, path: &Path) -> Result<impl Read + Send, Error> {
    let mut child = Command::new(cmd)
        .arg(path)
        .stdout(Stdio::piped())
        .spawn()
        .map_err(|e| Error::io(e, path))?;
    child.stdout.take().ok_or_else(|| {
        Error::Input(format!("decompression command '{cmd}' produced no stdout"))
    })
}

fn encode_record(record: &fastq::Record) -> Result<EncodedRead, Error> {
    let name = String::from_utf8(record.name().to_vec())
        .map_err(|e| Error::Input(format!("read name is not valid UTF-8: {e}")))?;
    Ok(EncodedRead {
        name,
        sequence: record.sequence().iter().map(|&b| encode_base(b)).collect(),
        quality: record.quality_scores().to_vec(),
    })
}

// ---------------------------------------------------------------------------
// Fragment source
// ---------------------------------------------------------------------------

enum SourceState {
    Single {
        pending: VecDeque<PathBuf>,
        current: Option<RecordStream>,
    },
    Paired {
        pending1: VecDeque<PathBuf>,
        pending2: VecDeque<PathBuf>,
        current: Option<(RecordStream, RecordStream)>,
    },
}

/// Shared fragment supplier for a read library.
///
/// Worker threads pull jobs of up to `max` fragments; a single internal
/// mutex serializes file access, and the library's files are consumed in
/// order. An empty job signals end of input.
pub struct FragmentSource {
    decompress_cmd: Option<String>,
    state: Mutex<SourceState>,
}

impl FragmentSource {
    /// Create a source over all files of `lib`.
    pub fn from_library(lib: &ReadLibrary, decompress_cmd: Option<&str>) -> Self {
        let state = if lib.format.is_paired() {
            SourceState::Paired {
                pending1: lib.mates1.iter().cloned().collect(),
                pending2: lib.mates2.iter().cloned().collect(),
                current: None,
            }
        } else {
            SourceState::Single {
                pending: lib.unmated.iter().cloned().collect(),
                current: None,
            }
        };
        Self {
            decompress_cmd: decompress_cmd.map(str::to_owned),
            state: Mutex::new(state),
        }
    }

    /// Pull the next job of up to `max` fragments; an empty vector means
    /// the library is exhausted.
    pub fn next_job(&self, max: usize) -> Result<Vec<Fragment>, Error> {
        let mut state = self.state.lock().unwrap();
        let cmd = self.decompress_cmd.as_deref();
        let mut job = Vec::with_capacity(max);

        match &mut *state {
            SourceState::Single { pending, current } => {
                while job.len() < max {
                    if current.is_none() {
                        match pending.pop_front() {
                            Some(path) => *current = Some(RecordStream::open(&path, cmd)?),
                            None => break,
                        }
                    }
                    let stream = current.as_mut().unwrap();
                    let mut reads = Vec::new();
                    let taken = stream.take(&mut reads, max - job.len())?;
                    if taken == 0 {
                        *current = None;
                        continue;
                    }
                    job.extend(reads.into_iter().map(Fragment::Single));
                }
            }
            SourceState::Paired {
                pending1,
                pending2,
                current,
            } => {
                while job.len() < max {
                    if current.is_none() {
                        match (pending1.pop_front(), pending2.pop_front()) {
                            (Some(p1), Some(p2)) => {
                                *current = Some((
                                    RecordStream::open(&p1, cmd)?,
                                    RecordStream::open(&p2, cmd)?,
                                ));
                            }
                            (None, None) => break,
                            _ => {
                                return Err(Error::Input(
                                    "unequal numbers of mate-1 and mate-2 files".into(),
                                ))
                            }
                        }
                    }
                    let (r1, r2) = current.as_mut().unwrap();
                    let mut reads1 = Vec::new();
                    let mut reads2 = Vec::new();
                    let taken1 = r1.take(&mut reads1, max - job.len())?;
                    // Ask for at least one mate-2 read even when mate-1 is
                    // exhausted, so a longer mate-2 file is detected.
                    let taken2 = r2.take(&mut reads2, taken1.max(1))?;
                    if taken1 != taken2 {
                        return Err(Error::Input(format!(
                            "mate files out of sync: got {taken1} mate-1 reads but \
                             {taken2} mate-2 reads"
                        )));
                    }
                    if taken1 == 0 {
                        *current = None;
                        continue;
                    }
                    job.extend(
                        reads1
                            .into_iter()
                            .zip(reads2)
                            .map(|(a, b)| Fragment::Paired(a, b)),
                    );
                }
            }
        }

        Ok(job)
    }
}
