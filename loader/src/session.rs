//! Load Session
//!
//! One `LoadSession` carries a single load attempt through the pipeline:
//! it owns the input handle and the header/table buffers, records the stage
//! reached, and releases everything exactly once when dropped.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::dispatch;
use crate::elf::{
    segment_type_name, Elf32Header, Elf32ProgramHeader, ELF32_HEADER_SIZE, ELF32_PHDR_SIZE,
    EM_386, ET_EXEC,
};
use crate::error::{FileError, FormatError, LoaderError};
use crate::segment_loader::{self, LoadedImage};

/// Pipeline stage reached by a load session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStage {
    /// Nothing acquired yet
    Init,
    /// Input handle acquired
    FileOpened,
    /// ELF header read and validated
    HeaderRead,
    /// Program header table read
    ProgramHeadersRead,
    /// Loadable segments resident, entry point resolved
    SegmentsMapped,
    /// Entry point called and returned
    Dispatched,
    /// Handle and buffers released
    CleanedUp,
    /// A stage failed; only cleanup remains
    Failed,
}

/// A single, linear load attempt over one input.
pub struct LoadSession<R> {
    reader: R,
    header: Option<Elf32Header>,
    program_headers: Vec<Elf32ProgramHeader>,
    stage: LoadStage,
}

impl LoadSession<File> {
    /// Open `path` read-only.
    pub fn open(path: &Path) -> Result<Self, FileError> {
        let file = File::open(path).map_err(|source| FileError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        log::debug!("opened {}", path.display());
        Ok(Self::from_reader(file))
    }
}

impl<R: Read + Seek> LoadSession<R> {
    /// Start a session over an already opened input.
    pub fn from_reader(reader: R) -> Self {
        Self {
            reader,
            header: None,
            program_headers: Vec::new(),
            stage: LoadStage::FileOpened,
        }
    }

    /// Current pipeline stage.
    pub fn stage(&self) -> LoadStage {
        self.stage
    }

    /// Header read by [`LoadSession::read_header`], if any.
    pub fn header(&self) -> Option<&Elf32Header> {
        self.header.as_ref()
    }

    /// Program header table read so far, in file order.
    pub fn program_headers(&self) -> &[Elf32ProgramHeader] {
        &self.program_headers
    }

    fn advance<T, E>(&mut self, next: LoadStage, result: Result<T, E>) -> Result<T, E> {
        self.stage = if result.is_ok() { next } else { LoadStage::Failed };
        result
    }

    /// Read and validate the fixed-size ELF header at offset 0.
    pub fn read_header(&mut self) -> Result<&Elf32Header, FormatError> {
        let result = read_header_from(&mut self.reader);
        let header = self.advance(LoadStage::HeaderRead, result)?;

        log::debug!(
            "ELF header: type {} machine {} entry {:#x} phoff {:#x} phnum {}",
            header.e_type,
            header.e_machine,
            header.e_entry,
            header.e_phoff,
            header.e_phnum
        );
        if header.e_type != ET_EXEC {
            log::debug!("ELF type {} is not ET_EXEC; loading anyway", header.e_type);
        }
        if header.e_machine != EM_386 {
            log::debug!("ELF machine {} is not EM_386; loading anyway", header.e_machine);
        }
        Ok(&*self.header.insert(header))
    }

    /// Read the program header table the header points at.
    pub fn read_program_headers(&mut self) -> Result<&[Elf32ProgramHeader], FormatError> {
        let result = match self.header {
            Some(header) => read_program_headers_from(&mut self.reader, &header),
            None => Err(FormatError::HeaderNotRead),
        };
        self.program_headers = self.advance(LoadStage::ProgramHeadersRead, result)?;

        for (i, ph) in self.program_headers.iter().enumerate() {
            log::debug!(
                "phdr {i}: {} offset {:#x} vaddr {:#x} filesz {:#x} memsz {:#x} flags {}",
                segment_type_name(ph.p_type),
                ph.p_offset,
                ph.p_vaddr,
                ph.p_filesz,
                ph.p_memsz,
                ph.flags()
            );
        }
        Ok(&self.program_headers)
    }

    /// Map every loadable segment and resolve the entry point.
    pub fn map_segments(&mut self) -> Result<LoadedImage, LoaderError> {
        let result = match self.header {
            Some(header) => {
                segment_loader::map_segments(&mut self.reader, &header, &self.program_headers)
                    .map_err(LoaderError::from)
            }
            None => Err(FormatError::HeaderNotRead.into()),
        };
        let image = self.advance(LoadStage::SegmentsMapped, result)?;

        log::info!(
            "mapped {} segment(s), entry point {:#x}",
            image.segments().len(),
            image.entry_point().addr()
        );
        Ok(image)
    }

    /// Run header parsing and segment mapping back to back.
    pub fn load(&mut self) -> Result<LoadedImage, LoaderError> {
        self.read_header()?;
        self.read_program_headers()?;
        self.map_segments()
    }

    /// Call the entry point of `image`.
    ///
    /// # Safety
    ///
    /// See [`dispatch::invoke`].
    pub unsafe fn dispatch(&mut self, image: &LoadedImage) -> i32 {
        // SAFETY: forwarded to the caller.
        let code = unsafe { dispatch::invoke(image.entry_point()) };
        self.stage = LoadStage::Dispatched;
        code
    }
}

impl<R> Drop for LoadSession<R> {
    fn drop(&mut self) {
        log::debug!(
            "cleanup after {:?}: releasing input and {} program header(s)",
            self.stage,
            self.program_headers.len()
        );
        self.stage = LoadStage::CleanedUp;
    }
}

fn read_header_from<R: Read + Seek>(reader: &mut R) -> Result<Elf32Header, FormatError> {
    let mut bytes = [0u8; ELF32_HEADER_SIZE];
    reader
        .seek(SeekFrom::Start(0))
        .and_then(|_| reader.read_exact(&mut bytes))
        .map_err(|source| FormatError::TruncatedHeader { source })?;
    Elf32Header::parse(&bytes)
}

fn read_program_headers_from<R: Read + Seek>(
    reader: &mut R,
    header: &Elf32Header,
) -> Result<Vec<Elf32ProgramHeader>, FormatError> {
    if header.e_phnum > 0 && header.e_phentsize as usize != ELF32_PHDR_SIZE {
        return Err(FormatError::BadEntrySize {
            size: header.e_phentsize,
        });
    }

    let expected = header.program_table_len();
    let mut table = vec![0u8; expected];
    reader
        .seek(SeekFrom::Start(header.e_phoff as u64))
        .and_then(|_| reader.read_exact(&mut table))
        .map_err(|source| FormatError::TruncatedProgramHeaders {
            offset: header.e_phoff,
            expected,
            source,
        })?;

    Ok(Elf32ProgramHeader::parse_table(&table))
}
