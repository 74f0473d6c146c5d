//! In-process ELF32 Loader
//!
//! Maps the PT_LOAD segments of a 32-bit ELF executable into the current
//! process at their file-specified virtual addresses and calls the entry
//! point as `int entry(void)`.
//!
//! # Pipeline
//!
//! - File access: [`LoadSession::open`]
//! - Header parser: [`LoadSession::read_header`], [`LoadSession::read_program_headers`]
//! - Segment mapper: [`LoadSession::map_segments`]
//! - Entry dispatcher: [`dispatch::invoke`]
//!
//! # Safety
//!
//! There is no isolation. Loaded code runs on the caller's thread and stack,
//! shares its address space, and takes the process down if it faults.

pub mod cli;
pub mod dispatch;
pub mod elf;
pub mod error;
pub mod logger;
pub mod segment_loader;
pub mod session;

use std::path::Path;

pub use error::{FileError, FormatError, LoaderError, MapError};
pub use segment_loader::{EntryPoint, LoadedImage, MappedSegment};
pub use session::{LoadSession, LoadStage};

/// Open `path` and map its loadable segments without running anything.
pub fn load(path: &Path) -> Result<LoadedImage, LoaderError> {
    let mut session = LoadSession::open(path)?;
    session.load()
}

/// Load `path` and call its entry point, returning the program's result.
///
/// The input is closed after the loaded code returns; on failure it is
/// closed before the error is returned.
///
/// # Safety
///
/// Runs arbitrary code from the file in this process; see
/// [`dispatch::invoke`].
pub unsafe fn load_and_run(path: &Path) -> Result<i32, LoaderError> {
    let mut session = LoadSession::open(path)?;
    let image = session.load()?;
    // SAFETY: forwarded to the caller.
    let code = unsafe { session.dispatch(&image) };
    drop(session);
    Ok(code)
}
