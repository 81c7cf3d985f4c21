//! Handshake pipes between the outside parent and the namespace-init.
//!
//! Two unidirectional pipes synchronize sandbox setup. A container-init
//! can't be paused with SIGSTOP from inside its own PID namespace, so the
//! classic stop/cont trick is out; instead:
//!
//! - `parent_pipe`: init → parent. One "ready" byte once the init is
//!   dumpable (so the parent may write the ID maps), and later the inner
//!   exit code as a 32-bit little-endian integer.
//! - `child_pipe`: parent → init. One "go" byte once the maps are in.
//!
//! All transfers are exact-count, single-syscall operations; a partial
//! transfer means the peer died mid-setup and is fatal at the call site.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

/// Unidirectional pipe with close-on-exec ends.
#[derive(Debug)]
pub struct Pipe {
    pub read: OwnedFd,
    pub write: OwnedFd,
}

impl Pipe {
    pub fn new() -> io::Result<Self> {
        let mut fds = [0i32; 2];
        // SAFETY: pipe2 writes to valid array.
        if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) } != 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: On success, fds are valid file descriptors.
        Ok(Self {
            read: unsafe { OwnedFd::from_raw_fd(fds[0]) },
            write: unsafe { OwnedFd::from_raw_fd(fds[1]) },
        })
    }
}

/// Send the one-byte sync token. True iff exactly one byte was written.
pub fn send_byte(fd: &OwnedFd) -> bool {
    // SAFETY: writing one byte from a stack buffer to an owned fd.
    unsafe { libc::write(fd.as_raw_fd(), b"X".as_ptr().cast(), 1) == 1 }
}

/// Receive the one-byte sync token. True iff exactly one byte arrived.
pub fn recv_byte(fd: &OwnedFd) -> bool {
    let mut buf = [0u8; 1];
    // SAFETY: reading one byte into a stack buffer from an owned fd.
    unsafe { libc::read(fd.as_raw_fd(), buf.as_mut_ptr().cast(), 1) == 1 }
}

/// Send the inner exit code. True iff all four bytes were written.
pub fn send_code(fd: &OwnedFd, code: u32) -> bool {
    let bytes = code.to_le_bytes();
    // SAFETY: writing four bytes from a stack buffer to an owned fd.
    unsafe { libc::write(fd.as_raw_fd(), bytes.as_ptr().cast(), 4) == 4 }
}

/// Receive the inner exit code, or `None` on a short or failed read.
pub fn recv_code(fd: &OwnedFd) -> Option<u32> {
    let mut bytes = [0u8; 4];
    // SAFETY: reading four bytes into a stack buffer from an owned fd.
    let n = unsafe { libc::read(fd.as_raw_fd(), bytes.as_mut_ptr().cast(), 4) };
    (n == 4).then(|| u32::from_le_bytes(bytes))
}
