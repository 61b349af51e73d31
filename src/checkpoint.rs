use std::ffi::OsString;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bstr::ByteSlice;
use cqdb::{CQDBWriter, CQDB};
use log::info;
use ndarray::{Array2, Array4};

use crate::dictionary::Dictionary;
use crate::params::ParameterStore;
use crate::tag_index::TagIndex;

const MAGIC: &[u8; 4] = b"lDMV";
const TYPE: &[u8; 4] = b"PARM";
const VERSION: u32 = 1;
const HEADER_SIZE: usize = 56;
const CHUNK_SIZE: usize = 12;

const FLAG_LEX: u32 = 0x01;
const FLAG_INITIAL: u32 = 0x02;

#[inline]
fn unpack_u32(buf: &[u8]) -> io::Result<u32> {
    if buf.len() < 4 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "not enough data for unpacking u32",
        ));
    }
    Ok(u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]))
}

#[inline]
fn unpack_f64(buf: &[u8]) -> io::Result<f64> {
    if buf.len() < 8 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "not enough data for unpacking f64",
        ));
    }
    Ok(f64::from_le_bytes([
        buf[0], buf[1], buf[2], buf[3], buf[4], buf[5], buf[6], buf[7],
    ]))
}

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

#[derive(Debug, Clone, Default)]
struct Header {
    size: u32,
    num_tags: u32,
    num_decision: u32,
    cvalency: u32,
    dvalency: u32,
    vocab_size: u32,
    flags: u32,
    off_trans: u32,
    off_decision: u32,
    off_lex: u32,
    off_tags: u32,
}

impl Header {
    fn write(&self, file: &mut File) -> io::Result<()> {
        file.write_all(MAGIC)?;
        file.write_all(&self.size.to_le_bytes())?;
        file.write_all(TYPE)?;
        file.write_all(&VERSION.to_le_bytes())?;
        for value in [
            self.num_tags,
            self.num_decision,
            self.cvalency,
            self.dvalency,
            self.vocab_size,
            self.flags,
            self.off_trans,
            self.off_decision,
            self.off_lex,
            self.off_tags,
        ] {
            file.write_all(&value.to_le_bytes())?;
        }
        Ok(())
    }

    fn read(buf: &[u8]) -> io::Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(invalid("invalid checkpoint format"));
        }
        if &buf[0..4] != MAGIC {
            return Err(invalid("invalid file format, magic mismatch"));
        }
        if &buf[8..12] != TYPE {
            return Err(invalid("invalid file format, type mismatch"));
        }
        let version = unpack_u32(&buf[12..])?;
        if version != VERSION {
            return Err(invalid(format!("unsupported checkpoint version {}", version)));
        }
        let mut fields = [0u32; 11];
        let mut index = 16;
        for field in fields.iter_mut().skip(1) {
            *field = unpack_u32(&buf[index..])?;
            index += 4;
        }
        fields[0] = unpack_u32(&buf[4..])?;
        let [size, num_tags, num_decision, cvalency, dvalency, vocab_size, flags, off_trans, off_decision, off_lex, off_tags] =
            fields;
        Ok(Self {
            size,
            num_tags,
            num_decision,
            cvalency,
            dvalency,
            vocab_size,
            flags,
            off_trans,
            off_decision,
            off_lex,
            off_tags,
        })
    }
}

/// A DMV parameter checkpoint loaded in memory
///
/// Layout (little endian): a 56-byte header, one `TENS` chunk per tensor
/// (`trans`, `decision`, then `lex` when present) and the tag dictionary as
/// a CQDB database.
#[derive(Clone)]
pub struct Checkpoint<'a> {
    buffer: &'a [u8],
    header: Header,
    tags: CQDB<'a>,
}

impl<'a> fmt::Debug for Checkpoint<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Checkpoint")
            .field("header", &self.header)
            .field("tags", &self.tags)
            .finish()
    }
}

impl<'a> Checkpoint<'a> {
    /// Parse a checkpoint from memory
    pub fn new(buf: &'a [u8]) -> io::Result<Self> {
        let header = Header::read(buf)?;
        if header.size as usize != buf.len() {
            return Err(invalid("checkpoint size mismatch"));
        }
        if !(1..=2).contains(&header.cvalency) || !(1..=2).contains(&header.dvalency) {
            return Err(invalid("invalid valency in checkpoint"));
        }
        if header.num_tags < 2 || header.num_decision + 1 != header.num_tags {
            return Err(invalid("inconsistent tag counts in checkpoint"));
        }
        let has_lex = header.flags & FLAG_LEX != 0;
        if has_lex != (header.off_lex != 0) {
            return Err(invalid("inconsistent lexical flags in checkpoint"));
        }
        let tags_start = header.off_tags as usize;
        if tags_start < HEADER_SIZE || tags_start >= buf.len() {
            return Err(invalid("tag dictionary offset out of range"));
        }
        let tags = CQDB::new(&buf[tags_start..])?;
        Ok(Self {
            buffer: buf,
            header,
            tags,
        })
    }

    pub fn num_tags(&self) -> u32 {
        self.header.num_tags
    }

    pub fn cvalency(&self) -> usize {
        self.header.cvalency as usize
    }

    pub fn dvalency(&self) -> usize {
        self.header.dvalency as usize
    }

    /// Vocabulary size of the lexical tensor, if one was saved
    pub fn vocab_size(&self) -> Option<usize> {
        (self.header.flags & FLAG_LEX != 0).then_some(self.header.vocab_size as usize)
    }

    /// `true` if the checkpoint was written before the first M-step
    pub fn is_initial(&self) -> bool {
        self.header.flags & FLAG_INITIAL != 0
    }

    /// Convert a tag ID to tag string
    pub fn to_tag(&self, id: u32) -> Option<&str> {
        self.tags.to_str(id).and_then(|s| s.to_str().ok())
    }

    /// Convert a tag string to tag ID
    pub fn to_tag_id(&self, value: &str) -> Option<u32> {
        self.tags.to_id(value)
    }

    /// Rebuild the tag index with the saved id assignment
    pub fn tag_index(&self) -> io::Result<TagIndex> {
        let mut tags = Vec::with_capacity(self.header.num_tags as usize);
        for id in 0..self.header.num_tags {
            let tag = self
                .to_tag(id)
                .ok_or_else(|| invalid(format!("missing tag {} in checkpoint", id)))?;
            tags.push(tag);
        }
        TagIndex::new(tags).map_err(|e| invalid(e.to_string()))
    }

    /// Rebuild the parameter store (per-sentence variants are not saved)
    pub fn params(&self) -> io::Result<ParameterStore> {
        let nt = self.header.num_tags as usize;
        let nd = self.header.num_decision as usize;
        let cv = self.cvalency();
        let dv = self.dvalency();
        let mut params = ParameterStore::new(nt, nd, cv, dv, self.vocab_size());

        let trans = self.tensor(self.header.off_trans, nt * nt * 2 * cv)?;
        let trans = Array4::from_shape_vec((nt, nt, 2, cv), trans)
            .map_err(|e| invalid(e.to_string()))?;
        params.set_trans(trans)?;

        let decision = self.tensor(self.header.off_decision, nd * 2 * dv * 2)?;
        let decision = Array4::from_shape_vec((nd, 2, dv, 2), decision)
            .map_err(|e| invalid(e.to_string()))?;
        params.set_decision(decision)?;

        if let Some(vocab_size) = self.vocab_size() {
            let lex = self.tensor(self.header.off_lex, nt * vocab_size)?;
            let lex =
                Array2::from_shape_vec((nt, vocab_size), lex).map_err(|e| invalid(e.to_string()))?;
            params.set_lex(lex)?;
        }
        params.set_initial(self.is_initial());
        Ok(params)
    }

    fn tensor(&self, offset: u32, expected: usize) -> io::Result<Vec<f64>> {
        let start = offset as usize;
        let end = start
            .checked_add(CHUNK_SIZE + 8 * expected)
            .ok_or_else(|| invalid("tensor chunk overflow"))?;
        if start < HEADER_SIZE || end > self.buffer.len() {
            return Err(invalid("tensor chunk out of range"));
        }
        let chunk = &self.buffer[start..end];
        if &chunk[0..4] != b"TENS" {
            return Err(invalid("invalid tensor chunk"));
        }
        let count = unpack_u32(&chunk[8..])? as usize;
        if count != expected {
            return Err(invalid(format!(
                "tensor has {} values, expected {}",
                count, expected
            )));
        }
        let mut values = Vec::with_capacity(count);
        for i in 0..count {
            values.push(unpack_f64(&chunk[CHUNK_SIZE + 8 * i..])?);
        }
        Ok(values)
    }

    /// Print the checkpoint in human-readable format
    pub fn dump<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let header = &self.header;
        writeln!(w, "FILEHEADER = {{")?;
        writeln!(w, "  size: {}", header.size)?;
        writeln!(w, "  num_tags: {}", header.num_tags)?;
        writeln!(w, "  cvalency: {}", header.cvalency)?;
        writeln!(w, "  dvalency: {}", header.dvalency)?;
        writeln!(w, "  vocab_size: {}", header.vocab_size)?;
        writeln!(w, "  initial: {}", self.is_initial())?;
        writeln!(w, "  off_trans: {:#X}", header.off_trans)?;
        writeln!(w, "  off_decision: {:#X}", header.off_decision)?;
        writeln!(w, "  off_lex: {:#X}", header.off_lex)?;
        writeln!(w, "  off_tags: {:#X}", header.off_tags)?;
        writeln!(w, "}}\n")?;
        writeln!(w, "TAGS = {{")?;
        for i in 0..header.num_tags {
            writeln!(w, "  {:>5}: {}", i, self.to_tag(i).unwrap_or("?"))?;
        }
        writeln!(w, "}}\n")?;
        Ok(())
    }
}

/// Writes checkpoints atomically
pub struct CheckpointWriter;

impl CheckpointWriter {
    /// Write a checkpoint to `path` + ".tmp", then rename it over `path`
    pub fn write(path: &Path, tag_index: &TagIndex, params: &ParameterStore) -> io::Result<()> {
        if params.num_tags() != tag_index.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "parameter store does not match the tag index",
            ));
        }
        let tmp = tmp_path(path);
        let result = Self::write_file(&tmp, tag_index, params).and_then(|_| fs::rename(&tmp, path));
        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        result?;
        info!("checkpoint written to {}", path.display());
        Ok(())
    }

    fn write_file(filename: &Path, tag_index: &TagIndex, params: &ParameterStore) -> io::Result<()> {
        let mut file = File::create(filename)?;

        let pos_to_u32 = |pos: u64| -> io::Result<u32> {
            u32::try_from(pos).map_err(|_| invalid("file position exceeds u32::MAX"))
        };

        let mut header = Header {
            num_tags: params.num_tags() as u32,
            num_decision: params.num_decision() as u32,
            cvalency: params.cvalency() as u32,
            dvalency: params.dvalency() as u32,
            ..Header::default()
        };
        if params.is_initial() {
            header.flags |= FLAG_INITIAL;
        }
        header.write(&mut file)?;

        header.off_trans = pos_to_u32(file.stream_position()?)?;
        Self::write_tensor(&mut file, params.trans().iter().copied(), params.trans().len())?;

        header.off_decision = pos_to_u32(file.stream_position()?)?;
        Self::write_tensor(
            &mut file,
            params.decision().iter().copied(),
            params.decision().len(),
        )?;

        if let Some(lex) = params.lex() {
            header.flags |= FLAG_LEX;
            header.vocab_size = u32::try_from(lex.shape()[1])
                .map_err(|_| invalid("vocabulary size exceeds u32::MAX"))?;
            header.off_lex = pos_to_u32(file.stream_position()?)?;
            Self::write_tensor(&mut file, lex.iter().copied(), lex.len())?;
        }

        header.off_tags = pos_to_u32(file.stream_position()?)?;
        Self::write_cqdb(&mut file, tag_index.dictionary())?;

        header.size = pos_to_u32(file.seek(SeekFrom::End(0))?)?;
        file.seek(SeekFrom::Start(0))?;
        header.write(&mut file)?;
        file.sync_all()?;
        Ok(())
    }

    fn write_tensor<I>(file: &mut File, values: I, count: usize) -> io::Result<()>
    where
        I: Iterator<Item = f64>,
    {
        let count_u32 =
            u32::try_from(count).map_err(|_| invalid("tensor size exceeds u32::MAX"))?;
        let chunk_size = u32::try_from(CHUNK_SIZE as u64 + 8 * count as u64)
            .map_err(|_| invalid("tensor chunk size exceeds u32::MAX"))?;
        file.write_all(b"TENS")?;
        file.write_all(&chunk_size.to_le_bytes())?;
        file.write_all(&count_u32.to_le_bytes())?;
        let mut buf = Vec::with_capacity(8 * count);
        for value in values {
            buf.extend_from_slice(&value.to_le_bytes());
        }
        file.write_all(&buf)?;
        Ok(())
    }

    fn write_cqdb(file: &mut File, dict: &Dictionary) -> io::Result<()> {
        let mut writer = CQDBWriter::new(file)?;
        for (s, id) in dict.iter() {
            writer.put(s, id)?;
        }
        // The database is flushed when the writer is dropped.
        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = OsString::from(path.as_os_str());
    tmp.push(".tmp");
    PathBuf::from(tmp)
}
