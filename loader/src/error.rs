use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

/// The target file could not be opened.
#[derive(thiserror::Error, Debug)]
pub enum FileError {
    #[error("cannot open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// The file is not a loadable 32-bit ELF image.
#[derive(thiserror::Error, Debug)]
pub enum FormatError {
    #[error("truncated ELF header: {source}")]
    TruncatedHeader {
        #[source]
        source: io::Error,
    },

    #[error("not an ELF file (magic {magic:02x?})")]
    NotElf { magic: [u8; 4] },

    #[error("unsupported ELF class {class} (only 32-bit is supported)")]
    UnsupportedClass { class: u8 },

    #[error("unsupported ELF data encoding {encoding} (only little endian is supported)")]
    UnsupportedEncoding { encoding: u8 },

    #[error("unsupported program header entry size {size}")]
    BadEntrySize { size: u16 },

    #[error("ELF header has not been read")]
    HeaderNotRead,

    #[error("truncated program header table ({expected} bytes at offset {offset:#x}): {source}")]
    TruncatedProgramHeaders {
        offset: u32,
        expected: usize,
        #[source]
        source: io::Error,
    },
}

/// A loadable segment could not be placed in memory, or the entry point
/// is not covered by any of them.
#[derive(thiserror::Error, Debug)]
pub enum MapError {
    #[error("segment {index}: file size {file_size:#x} exceeds memory size {mem_size:#x}")]
    InvalidSegment {
        index: usize,
        file_size: u32,
        mem_size: u32,
    },

    #[error("segment {index}: address range {addr:#x}+{len:#x} is already in use")]
    AddressInUse { index: usize, addr: usize, len: usize },

    #[error("segment {index}: cannot map {addr:#x}+{len:#x}: {source}")]
    MapFailed {
        index: usize,
        addr: usize,
        len: usize,
        #[source]
        source: io::Error,
    },

    #[error("segment {index}: failed to read {expected} bytes at offset {offset:#x}: {source}")]
    SegmentReadFailed {
        index: usize,
        offset: u32,
        expected: usize,
        #[source]
        source: io::Error,
    },

    #[error("entry point {entry:#x} not found in any loaded segment")]
    EntryPointNotFound { entry: u32 },
}

/// All errors produced by the loader, tagged by the stage that failed.
#[derive(thiserror::Error, Debug)]
pub enum LoaderError {
    #[error(transparent)]
    File(#[from] FileError),

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Map(#[from] MapError),
}

impl LoaderError {
    /// Name of the pipeline stage that failed.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::File(_) => "file",
            Self::Format(_) => "format",
            Self::Map(_) => "map",
        }
    }

    /// Map each error to its process exit code.
    ///
    /// - `2`: the input could not be reached at all
    /// - `1`: the input was read but cannot be loaded
    pub fn exit_code(&self) -> ExitCode {
        ExitCode::from(self.exit_status())
    }

    /// Raw numeric form of [`LoaderError::exit_code`].
    pub fn exit_status(&self) -> u8 {
        match self {
            Self::File(_) => 2,
            Self::Format(_) | Self::Map(_) => 1,
        }
    }
}
