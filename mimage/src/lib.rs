//! The relocatable binary image produced by the assembler: per-segment
//! payloads, the symbol table with its linkage classes, relocation records,
//! and the source map. Also provides a big-endian container file format for
//! shipping the segment payloads to a host simulator.

use byteorder::{ReadBytesExt, WriteBytesExt};
use mips::{constants, Segment};
use std::collections::HashMap;
use std::fs::File;
use std::io::prelude::*;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use util::Endian;

#[cfg(test)]
mod test;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RelocationType {
    Mips32,
    Mips26,
    MipsPc16,
    MipsHi16,
    MipsLo16,
}

/// A location in an emitted segment that needs patching once the named
/// symbol's final address is known.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct RelocationRecord {
    pub segment: Segment,
    /// Byte offset of the patch site within its segment.
    pub offset: u32,
    pub symbol: String,
    pub kind: RelocationType,
    pub addend: i64,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct SymbolEntry {
    pub name: String,
    pub address: i32,
    /// `None` for values outside every segment (equates, externs).
    pub segment: Option<Segment>,
}

/// One entry per encoded instruction word.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct SourceMapEntry {
    pub address: u32,
    pub file: String,
    pub line: u32,
    pub segment: Segment,
    pub segment_index: usize,
}

#[derive(Clone, PartialEq, Debug)]
pub struct BinaryImage {
    pub text_base: u32,
    pub text: Vec<u32>,
    pub data_base: u32,
    pub data: Vec<u8>,
    pub data_words: Vec<i32>,
    pub ktext_base: u32,
    pub ktext: Vec<u32>,
    pub kdata_base: u32,
    pub kdata: Vec<u8>,
    pub kdata_words: Vec<i32>,
    pub symbols: HashMap<String, i32>,
    pub global_symbols: Vec<String>,
    pub extern_symbols: Vec<String>,
    pub undefined_symbols: Vec<String>,
    pub relocations: Vec<RelocationRecord>,
    pub symbol_entries: Vec<SymbolEntry>,
    pub source_map: Vec<SourceMapEntry>,
}

impl BinaryImage {
    pub fn new() -> BinaryImage {
        BinaryImage {
            text_base: constants::TEXT_BASE,
            text: Vec::new(),
            data_base: constants::DATA_BASE,
            data: Vec::new(),
            data_words: Vec::new(),
            ktext_base: constants::KTEXT_BASE,
            ktext: Vec::new(),
            kdata_base: constants::KDATA_BASE,
            kdata: Vec::new(),
            kdata_words: Vec::new(),
            symbols: HashMap::new(),
            global_symbols: Vec::new(),
            extern_symbols: Vec::new(),
            undefined_symbols: Vec::new(),
            relocations: Vec::new(),
            symbol_entries: Vec::new(),
            source_map: Vec::new(),
        }
    }

    pub fn segment_base(&self, segment: Segment) -> u32 {
        match segment {
            Segment::Text => self.text_base,
            Segment::Data => self.data_base,
            Segment::KText => self.ktext_base,
            Segment::KData => self.kdata_base,
        }
    }

    /// Byte length of a segment's payload.
    pub fn segment_len(&self, segment: Segment) -> u32 {
        match segment {
            Segment::Text => (self.text.len() * constants::WORD_BYTES as usize) as u32,
            Segment::Data => self.data.len() as u32,
            Segment::KText => (self.ktext.len() * constants::WORD_BYTES as usize) as u32,
            Segment::KData => self.kdata.len() as u32,
        }
    }

    /// Classifies an address into the segment whose `[base, base + len)`
    /// range contains it.
    pub fn classify(&self, address: i32) -> Option<Segment> {
        let address = address as u32;
        for &segment in &[Segment::Text, Segment::Data, Segment::KText, Segment::KData] {
            let base = self.segment_base(segment);
            let len = self.segment_len(segment);
            if address >= base && address - base < len {
                return Some(segment);
            }
        }
        None
    }
}

impl Default for BinaryImage {
    fn default() -> BinaryImage {
        BinaryImage::new()
    }
}

fn read_words<R: Read>(reader: &mut R) -> std::io::Result<(u32, Vec<u32>)> {
    let base = reader.read_u32::<Endian>()?;
    let count = reader.read_u32::<Endian>()?;
    let mut words = vec![0u32; count as usize];
    reader.read_u32_into::<Endian>(&mut words)?;
    Ok((base, words))
}

fn read_bytes<R: Read>(reader: &mut R) -> std::io::Result<(u32, Vec<u8>)> {
    let base = reader.read_u32::<Endian>()?;
    let count = reader.read_u32::<Endian>()?;
    let mut bytes = vec![0u8; count as usize];
    reader.read_exact(&mut bytes)?;
    Ok((base, bytes))
}

/// Reads the segment payloads of an image file. Symbols, relocations and the
/// source map are in-memory products and are not part of the container.
pub fn read<R: Read>(reader: &mut R) -> std::io::Result<BinaryImage> {
    let mut image = BinaryImage::new();
    let (text_base, text) = read_words(reader)?;
    let (data_base, data) = read_bytes(reader)?;
    let (ktext_base, ktext) = read_words(reader)?;
    let (kdata_base, kdata) = read_bytes(reader)?;
    image.text_base = text_base;
    image.text = text;
    image.data_base = data_base;
    image.data = data;
    image.ktext_base = ktext_base;
    image.ktext = ktext;
    image.kdata_base = kdata_base;
    image.kdata = kdata;
    Ok(image)
}

fn write_words<W: Write>(writer: &mut W, base: u32, words: &[u32]) -> std::io::Result<()> {
    writer.write_u32::<Endian>(base)?;
    writer.write_u32::<Endian>(words.len() as u32)?;
    for &word in words {
        writer.write_u32::<Endian>(word)?;
    }
    Ok(())
}

fn write_bytes<W: Write>(writer: &mut W, base: u32, bytes: &[u8]) -> std::io::Result<()> {
    writer.write_u32::<Endian>(base)?;
    writer.write_u32::<Endian>(bytes.len() as u32)?;
    writer.write_all(bytes)?;
    Ok(())
}

pub fn write<W: Write>(writer: &mut W, image: &BinaryImage) -> std::io::Result<()> {
    write_words(writer, image.text_base, &image.text)?;
    write_bytes(writer, image.data_base, &image.data)?;
    write_words(writer, image.ktext_base, &image.ktext)?;
    write_bytes(writer, image.kdata_base, &image.kdata)?;
    Ok(())
}

pub trait ReadImageExt: Read + Sized {
    fn read_image(&mut self) -> std::io::Result<BinaryImage> {
        read(self)
    }
}

impl<R: Read + Sized> ReadImageExt for R {}

pub trait WriteImageExt: Write + Sized {
    fn write_image(&mut self, image: &BinaryImage) -> std::io::Result<()> {
        write(self, image)
    }
}

impl<W: Write + Sized> WriteImageExt for W {}

pub fn read_file<P: AsRef<Path>>(path: P) -> std::io::Result<BinaryImage> {
    BufReader::new(File::open(path)?).read_image()
}

pub fn write_file<P: AsRef<Path>>(path: P, image: &BinaryImage) -> std::io::Result<()> {
    BufWriter::new(File::create(path)?).write_image(image)
}
