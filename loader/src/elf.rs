//! ELF32 Format Definitions
//!
//! On-disk layout of the 32-bit ELF file header and program header table,
//! decoded field by field from little-endian bytes.

use bitflags::bitflags;

use crate::error::FormatError;

/// ELF magic number: 0x7F 'E' 'L' 'F'
pub const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];

/// Index of the class byte in `e_ident`
pub const EI_CLASS: usize = 4;

/// Index of the data encoding byte in `e_ident`
pub const EI_DATA: usize = 5;

/// ELF class: 32-bit
pub const ELFCLASS32: u8 = 1;

/// ELF class: 64-bit
pub const ELFCLASS64: u8 = 2;

/// ELF data encoding: little endian
pub const ELFDATA2LSB: u8 = 1;

/// ELF type: executable
pub const ET_EXEC: u16 = 2;

/// Machine type: Intel 80386
pub const EM_386: u16 = 3;

/// Program header type: unused entry
pub const PT_NULL: u32 = 0;

/// Program header type: loadable segment
pub const PT_LOAD: u32 = 1;

/// Program header type: dynamic linking info
pub const PT_DYNAMIC: u32 = 2;

/// Program header type: interpreter path
pub const PT_INTERP: u32 = 3;

/// Size of the ELF32 file header on disk
pub const ELF32_HEADER_SIZE: usize = 52;

/// Size of one ELF32 program header on disk
pub const ELF32_PHDR_SIZE: usize = 32;

bitflags! {
    /// Segment permission bits (`p_flags`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SegmentFlags: u32 {
        /// Segment permission: executable
        const X = 1;
        /// Segment permission: writable
        const W = 2;
        /// Segment permission: readable
        const R = 4;
    }
}

impl core::fmt::Display for SegmentFlags {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let r = if self.contains(Self::R) { 'R' } else { '-' };
        let w = if self.contains(Self::W) { 'W' } else { '-' };
        let x = if self.contains(Self::X) { 'X' } else { '-' };
        write!(f, "{r}{w}{x}")
    }
}

/// ELF32 file header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elf32Header {
    /// Magic number and other info
    pub e_ident: [u8; 16],
    /// Object file type
    pub e_type: u16,
    /// Machine type
    pub e_machine: u16,
    /// Object file version
    pub e_version: u32,
    /// Entry point virtual address
    pub e_entry: u32,
    /// Program header table file offset
    pub e_phoff: u32,
    /// Section header table file offset
    pub e_shoff: u32,
    /// Processor-specific flags
    pub e_flags: u32,
    /// ELF header size
    pub e_ehsize: u16,
    /// Program header table entry size
    pub e_phentsize: u16,
    /// Program header table entry count
    pub e_phnum: u16,
    /// Section header table entry size
    pub e_shentsize: u16,
    /// Section header table entry count
    pub e_shnum: u16,
    /// Section name string table index
    pub e_shstrndx: u16,
}

/// ELF32 program header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elf32ProgramHeader {
    /// Segment type
    pub p_type: u32,
    /// Segment file offset
    pub p_offset: u32,
    /// Segment virtual address
    pub p_vaddr: u32,
    /// Segment physical address (unused)
    pub p_paddr: u32,
    /// Segment size in file
    pub p_filesz: u32,
    /// Segment size in memory
    pub p_memsz: u32,
    /// Segment flags
    pub p_flags: u32,
    /// Segment alignment
    pub p_align: u32,
}

fn le_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn le_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

impl Elf32Header {
    /// Decode and validate a header from its 52 on-disk bytes.
    ///
    /// Only the identification bytes are checked: the magic, the class
    /// (must be 32-bit) and the data encoding (must be little endian).
    pub fn parse(bytes: &[u8; ELF32_HEADER_SIZE]) -> Result<Self, FormatError> {
        let mut e_ident = [0u8; 16];
        e_ident.copy_from_slice(&bytes[0..16]);

        if e_ident[0..4] != ELF_MAGIC {
            return Err(FormatError::NotElf {
                magic: [e_ident[0], e_ident[1], e_ident[2], e_ident[3]],
            });
        }

        if e_ident[EI_CLASS] != ELFCLASS32 {
            if e_ident[EI_CLASS] == ELFCLASS64 {
                log::debug!("64-bit ELF image; only ELFCLASS32 is loadable");
            }
            return Err(FormatError::UnsupportedClass {
                class: e_ident[EI_CLASS],
            });
        }

        if e_ident[EI_DATA] != ELFDATA2LSB {
            return Err(FormatError::UnsupportedEncoding {
                encoding: e_ident[EI_DATA],
            });
        }

        Ok(Self {
            e_ident,
            e_type: le_u16(bytes, 16),
            e_machine: le_u16(bytes, 18),
            e_version: le_u32(bytes, 20),
            e_entry: le_u32(bytes, 24),
            e_phoff: le_u32(bytes, 28),
            e_shoff: le_u32(bytes, 32),
            e_flags: le_u32(bytes, 36),
            e_ehsize: le_u16(bytes, 40),
            e_phentsize: le_u16(bytes, 42),
            e_phnum: le_u16(bytes, 44),
            e_shentsize: le_u16(bytes, 46),
            e_shnum: le_u16(bytes, 48),
            e_shstrndx: le_u16(bytes, 50),
        })
    }

    /// Byte length of the program header table this header describes.
    pub fn program_table_len(&self) -> usize {
        self.e_phnum as usize * ELF32_PHDR_SIZE
    }
}

impl Elf32ProgramHeader {
    /// Decode one program header from its 32 on-disk bytes.
    pub fn parse(bytes: &[u8; ELF32_PHDR_SIZE]) -> Self {
        Self {
            p_type: le_u32(bytes, 0),
            p_offset: le_u32(bytes, 4),
            p_vaddr: le_u32(bytes, 8),
            p_paddr: le_u32(bytes, 12),
            p_filesz: le_u32(bytes, 16),
            p_memsz: le_u32(bytes, 20),
            p_flags: le_u32(bytes, 24),
            p_align: le_u32(bytes, 28),
        }
    }

    /// Decode a whole table. A trailing partial entry is ignored.
    pub fn parse_table(bytes: &[u8]) -> Vec<Self> {
        bytes
            .chunks_exact(ELF32_PHDR_SIZE)
            .filter_map(|chunk| <&[u8; ELF32_PHDR_SIZE]>::try_from(chunk).ok())
            .map(Self::parse)
            .collect()
    }

    /// Check if this entry is a loadable segment
    pub fn is_load(&self) -> bool {
        self.p_type == PT_LOAD
    }

    /// Permission bits, ignoring unknown processor-specific bits
    pub fn flags(&self) -> SegmentFlags {
        SegmentFlags::from_bits_truncate(self.p_flags)
    }

    /// Whether `addr` lies in `[p_vaddr, p_vaddr + p_memsz)`.
    pub fn contains(&self, addr: u32) -> bool {
        let start = self.p_vaddr as u64;
        let end = start + self.p_memsz as u64;
        (start..end).contains(&(addr as u64))
    }
}

/// Human-readable name of a program header type, for diagnostics.
pub fn segment_type_name(p_type: u32) -> &'static str {
    match p_type {
        PT_NULL => "NULL",
        PT_LOAD => "LOAD",
        PT_DYNAMIC => "DYNAMIC",
        PT_INTERP => "INTERP",
        4 => "NOTE",
        5 => "SHLIB",
        6 => "PHDR",
        7 => "TLS",
        _ => "OTHER",
    }
}
