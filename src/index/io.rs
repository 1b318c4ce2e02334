use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::Error;
use crate::index::TranscriptomeIndex;

const MAGIC: &[u8; 4] = b"RSLM";
const VERSION: u32 = 1;

impl TranscriptomeIndex {
    /// Write the index files into `dir` (created if missing).
    ///
    /// `txpInfo.bin` holds the header, transcript names and offsets;
    /// `refseq.bin` the packed reference text; `sa.bin` the suffix array.
    /// All integers are little-endian.
    pub fn write(&self, dir: &Path) -> Result<(), Error> {
        fs::create_dir_all(dir).map_err(|e| Error::io(e, dir))?;

        let info_path = dir.join("txpInfo.bin");
        let mut info =
            BufWriter::new(File::create(&info_path).map_err(|e| Error::io(e, &info_path))?);
        let werr = |e| Error::io(e, &info_path);
        info.write_all(MAGIC).map_err(werr)?;
        info.write_u32::<LittleEndian>(VERSION).map_err(werr)?;
        info.write_u64::<LittleEndian>(self.names().len() as u64)
            .map_err(werr)?;
        for name in self.names() {
            info.write_u32::<LittleEndian>(name.len() as u32)
                .map_err(werr)?;
            info.write_all(name.as_bytes()).map_err(werr)?;
        }
        for &off in self.offsets() {
            info.write_u64::<LittleEndian>(off).map_err(werr)?;
        }
        info.flush().map_err(werr)?;

        let seq_path = dir.join("refseq.bin");
        let mut seq =
            BufWriter::new(File::create(&seq_path).map_err(|e| Error::io(e, &seq_path))?);
        seq.write_u64::<LittleEndian>(self.text().len() as u64)
            .map_err(|e| Error::io(e, &seq_path))?;
        seq.write_all(self.text())
            .map_err(|e| Error::io(e, &seq_path))?;
        seq.flush().map_err(|e| Error::io(e, &seq_path))?;

        let sa_path = dir.join("sa.bin");
        let mut sa = BufWriter::new(File::create(&sa_path).map_err(|e| Error::io(e, &sa_path))?);
        sa.write_u64::<LittleEndian>(self.suffix_array().len() as u64)
            .map_err(|e| Error::io(e, &sa_path))?;
        for &pos in self.suffix_array() {
            sa.write_u64::<LittleEndian>(pos)
                .map_err(|e| Error::io(e, &sa_path))?;
        }
        sa.flush().map_err(|e| Error::io(e, &sa_path))?;

        Ok(())
    }

    /// Load an index previously written with [`TranscriptomeIndex::write`].
    pub fn load(dir: &Path) -> Result<Self, Error> {
        let info_path = dir.join("txpInfo.bin");
        let mut info =
            BufReader::new(File::open(&info_path).map_err(|e| Error::io(e, &info_path))?);
        let rerr = |e| Error::io(e, &info_path);

        let mut magic = [0u8; 4];
        info.read_exact(&mut magic).map_err(rerr)?;
        if &magic != MAGIC {
            return Err(Error::Index(format!(
                "{} is not a ruSalmon index",
                info_path.display()
            )));
        }
        let version = info.read_u32::<LittleEndian>().map_err(rerr)?;
        if version != VERSION {
            return Err(Error::Index(format!(
                "unsupported index version {version} (expected {VERSION})"
            )));
        }

        let num_transcripts = info.read_u64::<LittleEndian>().map_err(rerr)? as usize;
        let mut names = Vec::with_capacity(num_transcripts);
        for _ in 0..num_transcripts {
            let len = info.read_u32::<LittleEndian>().map_err(rerr)? as usize;
            let mut buf = vec![0u8; len];
            info.read_exact(&mut buf).map_err(rerr)?;
            let name = String::from_utf8(buf)
                .map_err(|e| Error::Index(format!("invalid transcript name: {e}")))?;
            names.push(name);
        }
        let mut offsets = Vec::with_capacity(num_transcripts + 1);
        for _ in 0..=num_transcripts {
            offsets.push(info.read_u64::<LittleEndian>().map_err(rerr)?);
        }

        let seq_path = dir.join("refseq.bin");
        let mut seq_file =
            BufReader::new(File::open(&seq_path).map_err(|e| Error::io(e, &seq_path))?);
        let seq_len = seq_file
            .read_u64::<LittleEndian>()
            .map_err(|e| Error::io(e, &seq_path))? as usize;
        let mut seq = vec![0u8; seq_len];
        seq_file
            .read_exact(&mut seq)
            .map_err(|e| Error::io(e, &seq_path))?;

        let sa_path = dir.join("sa.bin");
        let mut sa_file =
            BufReader::new(File::open(&sa_path).map_err(|e| Error::io(e, &sa_path))?);
        let sa_len = sa_file
            .read_u64::<LittleEndian>()
            .map_err(|e| Error::io(e, &sa_path))? as usize;
        let mut sa = Vec::with_capacity(sa_len);
        for _ in 0..sa_len {
            sa.push(
                sa_file
                    .read_u64::<LittleEndian>()
                    .map_err(|e| Error::io(e, &sa_path))?,
            );
        }

        if seq_len != 2 * *offsets.last().unwrap_or(&0) as usize || sa_len != seq_len {
            return Err(Error::Index(
                "index files are inconsistent; rebuild the index".into(),
            ));
        }

        log::info!(
            "loaded index: {} transcripts, {} reference bases",
            num_transcripts,
            seq_len / 2
        );

        Ok(TranscriptomeIndex::from_parts(names, offsets, seq, sa))
    }
}
