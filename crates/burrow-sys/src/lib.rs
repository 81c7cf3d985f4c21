//! Low-level Linux syscall wrappers for the burrow sandbox.
//!
//! This crate provides thin wrappers around the Linux-specific syscalls the
//! sandbox launcher needs and that are not covered by rustix: the raw
//! fork-style `clone` into new namespaces, `mount`/`umount2` with typed
//! arguments, and a handful of one-line process controls. For everything
//! else, use rustix or std.
//!
//! It also hosts the fatal-abort reporting used throughout sandbox setup:
//! once namespaces exist, a failed syscall leaves the process in a state
//! that cannot be unwound, so setup code asserts with [`check!`] and dies
//! with a `file:line, ABORTED (errno: message)!` diagnostic instead of
//! propagating an error nobody can handle.

#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

use std::ffi::CStr;
use std::io::Write as _;

pub mod mount;
pub mod process;

#[inline]
pub fn last_errno() -> rustix::io::Errno {
    // SAFETY: __errno_location always returns valid thread-local pointer.
    rustix::io::Errno::from_raw_os_error(unsafe { *libc::__errno_location() })
}

/// Report a fatal setup failure and terminate without unwinding.
///
/// Prints `file:line, ABORTED (errno: message)!` to stderr, flushes both
/// standard streams, and `_exit(1)`s. Never returns; the process may be a
/// namespace-init whose destructors must not run.
pub fn abort_at(file: &str, line: u32) -> ! {
    let errno = last_errno().raw_os_error();
    // SAFETY: strerror returns a pointer to a static NUL-terminated string.
    let message = unsafe { CStr::from_ptr(libc::strerror(errno)) }.to_string_lossy();
    eprintln!("{file}:{line}, ABORTED ({errno}: {message})!");
    std::io::stdout().flush().ok();
    std::io::stderr().flush().ok();
    // SAFETY: _exit is async-signal-safe and skips atexit handlers.
    unsafe { libc::_exit(1) }
}

/// Assert that a setup step succeeded; abort fatally otherwise.
///
/// The expression must evaluate to `bool`. On `false`, reports the source
/// location and current errno via [`abort_at`] and terminates.
#[macro_export]
macro_rules! check {
    ($ok:expr) => {
        if !$ok {
            $crate::abort_at(file!(), line!());
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_reflects_failed_syscall() {
        // SAFETY: closing an invalid fd is harmless and sets EBADF.
        unsafe { libc::close(-1) };
        assert_eq!(last_errno(), rustix::io::Errno::BADF);
    }

    #[test]
    fn check_passes_on_true() {
        check!(true);
    }
}
