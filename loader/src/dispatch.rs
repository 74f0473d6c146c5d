//! Control transfer into loaded code.

use crate::segment_loader::EntryPoint;

/// Calling convention of a loaded program's entry: no arguments, `int` result.
pub type EntryFn = extern "C" fn() -> i32;

/// Jump to `entry` on the current thread and return what the code returns.
///
/// No new stack is set up and no fault is caught: whatever the loaded code
/// does happens to this process.
///
/// # Safety
///
/// The bytes at `entry` must be machine code for the host that follows the
/// C calling convention for `int f(void)` and returns. `EntryPoint` only
/// guarantees that the address is mapped and executable.
pub unsafe fn invoke(entry: EntryPoint) -> i32 {
    log::info!("jumping to entry point {:#x}", entry.addr());
    // SAFETY: the caller vouches for the code at `entry`; usize and fn
    // pointers have the same size.
    let entry_fn = unsafe { std::mem::transmute::<usize, EntryFn>(entry.addr()) };
    entry_fn()
}
