//! FASTA input for index construction.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::Error;

/// One reference transcript parsed from FASTA.
#[derive(Debug, Clone)]
pub struct FastaRecord {
    pub name: String,
    /// Base codes: A=0, C=1, G=2, T=3, anything else 4.
    pub sequence: Vec<u8>,
}

/// Numeric code for an ASCII reference base, case-insensitively.
fn base_code(b: u8) -> u8 {
    // Masking bit 5 folds lowercase onto uppercase.
    match b & 0xdf {
        b'A' => 0,
        b'C' => 1,
        b'G' => 2,
        b'T' => 3,
        _ => 4,
    }
}

/// Parse the transcripts in the given FASTA files, in file order.
///
/// A record's name is its header up to the first whitespace; its sequence
/// may span any number of lines.
pub fn parse_fasta_files<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<FastaRecord>, Error> {
    let mut records = Vec::new();
    for path in paths {
        read_records(path.as_ref(), &mut records)?;
    }
    Ok(records)
}

fn read_records(path: &Path, records: &mut Vec<FastaRecord>) -> Result<(), Error> {
    let file = File::open(path).map_err(|e| Error::io(e, path))?;
    // The record currently being accumulated, if any.
    let mut open: Option<FastaRecord> = None;

    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| Error::io(e, path))?;
        match line.bytes().next() {
            None => {}
            Some(b'>') => {
                records.extend(open.take());
                let name = line[1..].split_whitespace().next().ok_or_else(|| {
                    Error::Fasta(format!(
                        "missing record name at {}:{}",
                        path.display(),
                        idx + 1
                    ))
                })?;
                open = Some(FastaRecord {
                    name: name.to_string(),
                    sequence: Vec::new(),
                });
            }
            Some(_) => {
                let record = open.as_mut().ok_or_else(|| {
                    Error::Fasta(format!(
                        "sequence outside of any record at {}:{}",
                        path.display(),
                        idx + 1
                    ))
                })?;
                record.sequence.extend(
                    line.bytes()
                        .filter(|b| !b.is_ascii_control())
                        .map(base_code),
                );
            }
        }
    }

    records.extend(open);
    Ok(())
}
