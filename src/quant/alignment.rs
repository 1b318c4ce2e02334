//! Per-fragment alignment records and their pooled containers.

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::Error;
use crate::library::LibraryFormat;
use crate::math::LOG_0;

/// One candidate placement of a fragment on a transcript.
///
/// `score` is the chain-coverage score from mapping; `log_prob` is filled
/// in by the E-step (log-space, normalized within the fragment's group).
#[derive(Debug, Clone)]
pub struct SmemAlignment {
    pub transcript_id: u32,
    pub format: LibraryFormat,
    pub score: f64,
    pub frag_length: u32,
    pub log_prob: f64,
}

impl SmemAlignment {
    pub fn new(transcript_id: u32, format: LibraryFormat, score: f64, frag_length: u32) -> Self {
        Self {
            transcript_id,
            format,
            score,
            frag_length,
            log_prob: LOG_0,
        }
    }
}

/// All alignments reported for a single fragment.
///
/// Groups are pooled by the pipeline: one is checked out per fragment,
/// reused across batches, and returned after the EM step (or the cache
/// writer), so the steady state allocates nothing. An empty group is a
/// legal state meaning the fragment did not map.
#[derive(Debug)]
pub struct AlignmentGroup {
    alignments: Vec<SmemAlignment>,
}

impl Default for AlignmentGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl AlignmentGroup {
    pub fn new() -> Self {
        Self {
            alignments: Vec::with_capacity(10),
        }
    }

    pub fn alignments(&self) -> &[SmemAlignment] {
        &self.alignments
    }

    pub fn alignments_mut(&mut self) -> &mut [SmemAlignment] {
        &mut self.alignments
    }

    pub fn push(&mut self, aln: SmemAlignment) {
        self.alignments.push(aln);
    }

    pub fn len(&self) -> usize {
        self.alignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alignments.is_empty()
    }

    pub fn clear(&mut self) {
        self.alignments.clear();
    }

    /// Serialize to the cache stream: varint count, then per alignment
    /// `(transcript_id: u32, format_id: u8, score: f64, frag_length: u32)`,
    /// little-endian.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        write_varint(w, self.alignments.len() as u64)?;
        for aln in &self.alignments {
            w.write_u32::<LittleEndian>(aln.transcript_id)?;
            w.write_u8(aln.format.format_id())?;
            w.write_f64::<LittleEndian>(aln.score)?;
            w.write_u32::<LittleEndian>(aln.frag_length)?;
        }
        Ok(())
    }

    /// Deserialize one record from the cache stream into this (cleared)
    /// group.
    pub fn read_from<R: Read>(&mut self, r: &mut R) -> Result<(), Error> {
        self.alignments.clear();
        let count = read_varint(r)?;
        for _ in 0..count {
            let transcript_id = r.read_u32::<LittleEndian>()?;
            let format_id = r.read_u8()?;
            let format = LibraryFormat::from_id(format_id).ok_or_else(|| {
                Error::Input(format!("corrupt alignment cache: bad format id {format_id}"))
            })?;
            let score = r.read_f64::<LittleEndian>()?;
            let frag_length = r.read_u32::<LittleEndian>()?;
            self.alignments
                .push(SmemAlignment::new(transcript_id, format, score, frag_length));
        }
        Ok(())
    }
}

/// LEB128 unsigned varint.
fn write_varint<W: Write>(w: &mut W, mut value: u64) -> io::Result<()> {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        w.write_u8(byte)?;
        if value == 0 {
            return Ok(());
        }
    }
}

fn read_varint<R: Read>(r: &mut R) -> io::Result<u64> {
    let mut value = 0u64;
    let mut shift = 0u32;
    loop {
        let byte = r.read_u8()?;
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
        if shift >= 64 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "varint overflow",
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::hit_type_single;

    #[test]
    fn varint_round_trip() {
        for value in [0u64, 1, 127, 128, 300, 16_383, 16_384, u64::MAX] {
            let mut buf = Vec::new();
            write_varint(&mut buf, value).unwrap();
            let mut cursor = std::io::Cursor::new(buf);
            assert_eq!(read_varint(&mut cursor).unwrap(), value);
        }
    }

    #[test]
    fn group_serialization_round_trip() {
        let mut group = AlignmentGroup::new();
        group.push(SmemAlignment::new(3, hit_type_single(0, true), 0.9, 250));
        group.push(SmemAlignment::new(7, hit_type_single(5, false), 0.8, 0));

        let mut buf = Vec::new();
        group.write_to(&mut buf).unwrap();

        let mut restored = AlignmentGroup::new();
        restored.push(SmemAlignment::new(99, hit_type_single(0, true), 0.0, 0));
        let mut cursor = std::io::Cursor::new(buf);
        restored.read_from(&mut cursor).unwrap();

        assert_eq!(restored.len(), 2);
        assert_eq!(restored.alignments()[0].transcript_id, 3);
        assert_eq!(restored.alignments()[0].frag_length, 250);
        assert_eq!(
            restored.alignments()[1].format.format_id(),
            hit_type_single(5, false).format_id()
        );
        assert!((restored.alignments()[0].score - 0.9).abs() < 1e-12);
        // Probabilities are not persisted; they reset to "no mass".
        assert_eq!(restored.alignments()[0].log_prob, LOG_0);
    }

    #[test]
    fn empty_group_round_trip() {
        let group = AlignmentGroup::new();
        let mut buf = Vec::new();
        group.write_to(&mut buf).unwrap();
        assert_eq!(buf, vec![0]);

        let mut restored = AlignmentGroup::new();
        let mut cursor = std::io::Cursor::new(buf);
        restored.read_from(&mut cursor).unwrap();
        assert!(restored.is_empty());
    }
}
