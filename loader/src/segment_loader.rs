//! ELF Segment Memory Loader
//!
//! Places every PT_LOAD segment of a parsed ELF32 image into the current
//! process at the exact virtual address the file asks for.
//!
//! # Process
//!
//! 1. For each PT_LOAD segment, in table order:
//!    a. Calculate the page-aligned range covering `[p_vaddr, p_vaddr + p_memsz)`
//!    b. Map that range anonymous, private and RWX, without replacing
//!       anything already mapped there
//!    c. Copy `p_filesz` bytes from the file to `p_vaddr`
//!    d. BSS (memsz > filesz) is left as the zero pages mmap hands back
//!    e. Note whether the segment covers the ELF entry point
//! 2. Fail if no mapped segment covers the entry point
//!
//! Regions mapped by a failing load are unmapped again. Regions of a
//! successful load stay resident until the process exits.

use std::io::{Read, Seek, SeekFrom};
use std::mem::ManuallyDrop;
use std::{io, slice};

use crate::elf::{segment_type_name, Elf32Header, Elf32ProgramHeader, SegmentFlags};
use crate::error::MapError;

/// `MAP_FIXED_NOREPLACE` fails with `EEXIST` instead of clobbering an
/// existing mapping. Kernels older than 4.17 treat it as a plain hint,
/// which `Region::map` catches by comparing the returned address.
#[cfg(any(target_os = "linux", target_os = "android"))]
const MAP_FIXED_NOREPLACE: libc::c_int = libc::MAP_FIXED_NOREPLACE;

#[cfg(not(any(target_os = "linux", target_os = "android")))]
const MAP_FIXED_NOREPLACE: libc::c_int = 0;

/// Host page size.
pub fn page_size() -> usize {
    // SAFETY: sysconf has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as usize
    } else {
        4096
    }
}

/// Page-aligned `(base, len)` covering `[vaddr, vaddr + mem_size)`.
pub fn page_span(vaddr: u32, mem_size: u32, page: usize) -> (usize, usize) {
    let mask = page as u64 - 1;
    let start = vaddr as u64;
    let end = start + mem_size as u64;
    let base = start & !mask;
    let top = (end + mask) & !mask;
    (base as usize, (top - base) as usize)
}

/// An anonymous mapping owned by an in-progress load.
///
/// Dropping it unmaps the pages; [`Region::commit`] hands them over to the
/// loaded program for good.
struct Region {
    base: usize,
    len: usize,
}

impl Region {
    fn map(index: usize, base: usize, len: usize) -> Result<Self, MapError> {
        // SAFETY: an anonymous mapping with MAP_FIXED_NOREPLACE never
        // replaces memory the process already uses.
        let ptr = unsafe {
            libc::mmap(
                base as *mut libc::c_void,
                len,
                libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | MAP_FIXED_NOREPLACE,
                -1,
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            let source = io::Error::last_os_error();
            if source.raw_os_error() == Some(libc::EEXIST) {
                return Err(MapError::AddressInUse { index, addr: base, len });
            }
            return Err(MapError::MapFailed {
                index,
                addr: base,
                len,
                source,
            });
        }

        if ptr as usize != base {
            // Hint not honoured: something already lives at `base`.
            // SAFETY: `ptr`/`len` is the mapping mmap just returned.
            unsafe { libc::munmap(ptr, len) };
            return Err(MapError::AddressInUse { index, addr: base, len });
        }

        Ok(Self { base, len })
    }

    fn commit(self) {
        let _ = ManuallyDrop::new(self);
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        log::debug!("unmapping {:#x}+{:#x}", self.base, self.len);
        // SAFETY: the region was mapped by `Region::map` and never committed.
        unsafe { libc::munmap(self.base as *mut libc::c_void, self.len) };
    }
}

/// A PT_LOAD segment resident in this process.
#[derive(Debug, Clone)]
pub struct MappedSegment {
    index: usize,
    vaddr: u32,
    mem_size: u32,
    file_size: u32,
    flags: SegmentFlags,
}

impl MappedSegment {
    /// Index of the program header this segment came from
    pub fn index(&self) -> usize {
        self.index
    }

    /// Virtual address of the segment
    pub fn vaddr(&self) -> u32 {
        self.vaddr
    }

    /// Size of segment in memory
    pub fn mem_size(&self) -> u32 {
        self.mem_size
    }

    /// Size of segment data in file
    pub fn file_size(&self) -> u32 {
        self.file_size
    }

    /// Segment flags from the file (the mapping itself is always RWX)
    pub fn flags(&self) -> SegmentFlags {
        self.flags
    }

    /// Check if the segment covers `addr`
    pub fn contains(&self, addr: u32) -> bool {
        let start = self.vaddr as u64;
        (start..start + self.mem_size as u64).contains(&(addr as u64))
    }

    /// The segment's in-memory image, `mem_size` bytes starting at `vaddr`.
    ///
    /// # Safety
    ///
    /// The mapping is writable by the loaded program. The returned slice
    /// must not be alive while that program runs, i.e. across
    /// [`crate::dispatch::invoke`].
    pub unsafe fn bytes(&self) -> &[u8] {
        // SAFETY: a MappedSegment only exists for committed regions, which
        // are never unmapped and cover [vaddr, vaddr + mem_size). The caller
        // rules out concurrent writes by loaded code.
        unsafe { slice::from_raw_parts(self.vaddr as usize as *const u8, self.mem_size as usize) }
    }
}

/// An entry address known to lie inside a mapped segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryPoint(u32);

impl EntryPoint {
    /// The entry virtual address.
    pub fn addr(self) -> usize {
        self.0 as usize
    }
}

/// Result of mapping every loadable segment of an image.
#[derive(Debug)]
pub struct LoadedImage {
    segments: Vec<MappedSegment>,
    entry: EntryPoint,
}

impl LoadedImage {
    /// Segments in program header order.
    pub fn segments(&self) -> &[MappedSegment] {
        &self.segments
    }

    /// Resolved entry point.
    pub fn entry_point(&self) -> EntryPoint {
        self.entry
    }
}

/// Map every PT_LOAD entry of `program_headers` and resolve the entry point.
///
/// On error, every region mapped so far by this call is released; on
/// success all of them stay mapped for the rest of the process's life.
pub fn map_segments<R: Read + Seek>(
    reader: &mut R,
    header: &Elf32Header,
    program_headers: &[Elf32ProgramHeader],
) -> Result<LoadedImage, MapError> {
    let page = page_size();
    let mut regions: Vec<Region> = Vec::new();
    let mut segments = Vec::new();
    let mut entry = None;

    for (index, ph) in program_headers.iter().enumerate() {
        if !ph.is_load() {
            log::debug!(
                "phdr {index}: skipping {} segment",
                segment_type_name(ph.p_type)
            );
            continue;
        }

        if ph.p_filesz > ph.p_memsz {
            return Err(MapError::InvalidSegment {
                index,
                file_size: ph.p_filesz,
                mem_size: ph.p_memsz,
            });
        }

        if ph.p_memsz == 0 {
            log::debug!("phdr {index}: empty LOAD segment at {:#x}", ph.p_vaddr);
            continue;
        }

        let (base, len) = page_span(ph.p_vaddr, ph.p_memsz, page);
        let region = Region::map(index, base, len)?;
        regions.push(region);

        log::debug!(
            "phdr {index}: mapped {:#x}+{:#x} ({}) for vaddr {:#x} filesz {:#x} memsz {:#x}",
            base,
            len,
            ph.flags(),
            ph.p_vaddr,
            ph.p_filesz,
            ph.p_memsz
        );

        load_segment_data(reader, index, ph)?;

        if ph.contains(header.e_entry) {
            entry = Some(EntryPoint(header.e_entry));
        }

        segments.push(MappedSegment {
            index,
            vaddr: ph.p_vaddr,
            mem_size: ph.p_memsz,
            file_size: ph.p_filesz,
            flags: ph.flags(),
        });
    }

    let entry = entry.ok_or(MapError::EntryPointNotFound {
        entry: header.e_entry,
    })?;

    for region in regions {
        region.commit();
    }

    Ok(LoadedImage { segments, entry })
}

/// Copy the on-disk part of a segment to its virtual address.
fn load_segment_data<R: Read + Seek>(
    reader: &mut R,
    index: usize,
    ph: &Elf32ProgramHeader,
) -> Result<(), MapError> {
    let expected = ph.p_filesz as usize;
    if expected == 0 {
        return Ok(());
    }

    let read_failed = |source| MapError::SegmentReadFailed {
        index,
        offset: ph.p_offset,
        expected,
        source,
    };

    reader
        .seek(SeekFrom::Start(ph.p_offset as u64))
        .map_err(read_failed)?;

    // SAFETY: the caller mapped [p_vaddr, p_vaddr + p_memsz) writable and
    // p_filesz <= p_memsz.
    let dest = unsafe { slice::from_raw_parts_mut(ph.p_vaddr as usize as *mut u8, expected) };
    reader.read_exact(dest).map_err(read_failed)
}
