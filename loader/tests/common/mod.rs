//! Shared helpers: an in-memory ELF32 image builder, unique load addresses
//! and a reader that counts how often it is released.

#![allow(dead_code)]

use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use elfload::elf::{
    SegmentFlags, ELF32_HEADER_SIZE, ELF32_PHDR_SIZE, ELFCLASS32, ELFDATA2LSB, ELF_MAGIC,
    EM_386, ET_EXEC, PT_LOAD,
};

/// First address handed out by `next_base`. Each test binary is its own
/// process, so ranges only need to be unique within one file.
const BASE_START: u32 = 0x2000_0000;

/// Spacing between bases; larger than any segment the tests build.
const BASE_STRIDE: u32 = 0x0010_0000;

static NEXT_BASE: AtomicU32 = AtomicU32::new(BASE_START);

/// A fresh, page-aligned virtual address no other test in this binary uses.
pub fn next_base() -> u32 {
    NEXT_BASE.fetch_add(BASE_STRIDE, Ordering::Relaxed)
}

/// `mov eax, imm32; ret`, valid in both 32-bit and 64-bit x86 mode.
pub fn return_stub(value: i32) -> Vec<u8> {
    let mut code = vec![0xB8];
    code.extend_from_slice(&value.to_le_bytes());
    code.push(0xC3);
    code
}

/// One program header plus the bytes it points at.
#[derive(Clone, Debug)]
pub struct SegmentSpec {
    pub p_type: u32,
    pub vaddr: u32,
    pub data: Vec<u8>,
    pub mem_size: u32,
    pub flags: SegmentFlags,
    /// Overrides the file size written to the header (defaults to `data.len()`).
    pub file_size: Option<u32>,
}

/// Builds a little-endian ELF32 executable image.
#[derive(Clone, Debug)]
pub struct ElfBuilder {
    entry: u32,
    segments: Vec<SegmentSpec>,
    phnum: Option<u16>,
}

impl ElfBuilder {
    pub fn new(entry: u32) -> Self {
        Self {
            entry,
            segments: Vec::new(),
            phnum: None,
        }
    }

    /// Add a PT_LOAD segment.
    pub fn load(self, vaddr: u32, data: Vec<u8>, mem_size: u32) -> Self {
        self.segment(SegmentSpec {
            p_type: PT_LOAD,
            vaddr,
            data,
            mem_size,
            flags: SegmentFlags::R | SegmentFlags::X,
            file_size: None,
        })
    }

    /// Add any program header.
    pub fn segment(mut self, spec: SegmentSpec) -> Self {
        self.segments.push(spec);
        self
    }

    /// Claim `phnum` entries in the header regardless of how many exist.
    pub fn claim_phnum(mut self, phnum: u16) -> Self {
        self.phnum = Some(phnum);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let phnum = self.phnum.unwrap_or(self.segments.len() as u16);
        let table_len = self.segments.len() * ELF32_PHDR_SIZE;

        let mut elf = vec![0u8; ELF32_HEADER_SIZE];
        elf[0..4].copy_from_slice(&ELF_MAGIC);
        elf[4] = ELFCLASS32;
        elf[5] = ELFDATA2LSB;
        elf[6] = 1;
        elf[16..18].copy_from_slice(&ET_EXEC.to_le_bytes());
        elf[18..20].copy_from_slice(&EM_386.to_le_bytes());
        elf[20..24].copy_from_slice(&1u32.to_le_bytes());
        elf[24..28].copy_from_slice(&self.entry.to_le_bytes());
        elf[28..32].copy_from_slice(&(ELF32_HEADER_SIZE as u32).to_le_bytes());
        elf[40..42].copy_from_slice(&(ELF32_HEADER_SIZE as u16).to_le_bytes());
        elf[42..44].copy_from_slice(&(ELF32_PHDR_SIZE as u16).to_le_bytes());
        elf[44..46].copy_from_slice(&phnum.to_le_bytes());

        let mut data_offset = ELF32_HEADER_SIZE + table_len;
        let mut payload = Vec::new();
        for seg in &self.segments {
            let file_size = seg.file_size.unwrap_or(seg.data.len() as u32);
            let mut ph = [0u8; ELF32_PHDR_SIZE];
            ph[0..4].copy_from_slice(&seg.p_type.to_le_bytes());
            ph[4..8].copy_from_slice(&(data_offset as u32).to_le_bytes());
            ph[8..12].copy_from_slice(&seg.vaddr.to_le_bytes());
            ph[12..16].copy_from_slice(&seg.vaddr.to_le_bytes());
            ph[16..20].copy_from_slice(&file_size.to_le_bytes());
            ph[20..24].copy_from_slice(&seg.mem_size.to_le_bytes());
            ph[24..28].copy_from_slice(&seg.flags.bits().to_le_bytes());
            ph[28..32].copy_from_slice(&0x1000u32.to_le_bytes());
            elf.extend_from_slice(&ph);

            payload.extend_from_slice(&seg.data);
            data_offset += seg.data.len();
        }
        elf.extend_from_slice(&payload);
        elf
    }

    /// Write the image to a temporary file.
    pub fn write_temp(&self) -> tempfile::NamedTempFile {
        write_temp(&self.build())
    }
}

pub fn write_temp(bytes: &[u8]) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(bytes).unwrap();
    file.flush().unwrap();
    file
}

/// In-memory reader that records when it is dropped.
pub struct TrackedReader {
    inner: Cursor<Vec<u8>>,
    drops: Arc<AtomicUsize>,
}

impl TrackedReader {
    pub fn new(bytes: Vec<u8>) -> (Self, Arc<AtomicUsize>) {
        let drops = Arc::new(AtomicUsize::new(0));
        let reader = Self {
            inner: Cursor::new(bytes),
            drops: Arc::clone(&drops),
        };
        (reader, drops)
    }
}

impl Read for TrackedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Seek for TrackedReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }
}

impl Drop for TrackedReader {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}
