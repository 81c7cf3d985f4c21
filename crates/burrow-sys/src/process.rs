//! Namespace creation and small process controls.
//!
//! The launcher clones its namespace-init the way `fork` would — no new
//! stack, child continues from the call site — because both sides share
//! the same code path up to the clone and diverge on the return value.
//! glibc's `clone()` wrapper insists on a stack, so this goes through
//! `syscall(2)` directly.

use std::path::Path;

use rustix::io::Errno;

use crate::last_errno;
use crate::mount::path_to_cstring;

/// Namespaces a sandbox lives in: PID, mount, user, UTS.
pub const NAMESPACE_CLONE_FLAGS: libc::c_int =
    libc::CLONE_NEWPID | libc::CLONE_NEWNS | libc::CLONE_NEWUSER | libc::CLONE_NEWUTS;

/// Fork-style `clone(2)` into [`NAMESPACE_CLONE_FLAGS`] (plus `SIGCHLD` so
/// the parent can `waitpid`). Returns the child PID in the parent and 0 in
/// the child, or -1 with errno set.
///
/// # Safety
///
/// Same contract as `fork(2)` in a process that may have spawned threads:
/// the caller must ensure the child only runs async-signal-safe-ish code
/// paths or is the sole thread (the launcher is single-threaded).
pub unsafe fn clone_into_namespaces() -> libc::pid_t {
    let flags = (NAMESPACE_CLONE_FLAGS | libc::SIGCHLD) as libc::c_ulong;
    // SAFETY: fork-style clone: no stack, no ptid/ctid/tls. The raw
    // argument order (flags, stack, ptid, ctid, tls) holds on every
    // architecture this crate targets.
    unsafe { libc::syscall(libc::SYS_clone, flags, 0usize, 0usize, 0usize, 0usize) as libc::pid_t }
}

/// `unshare(CLONE_NEWNS)` — detach from the host mount table without
/// touching any other namespace. Used by the privileged pre-clone path.
pub fn unshare_mount_ns() -> Result<(), Errno> {
    // SAFETY: unshare with a valid flag set.
    let ret = unsafe { libc::unshare(libc::CLONE_NEWNS) };
    if ret != 0 { Err(last_errno()) } else { Ok(()) }
}

/// Re-enable dumpability after the credential change `clone(CLONE_NEWUSER)`
/// implies. Undumpable processes have root-owned `/proc/<pid>` entries,
/// which would lock the parent out of writing the ID maps.
pub fn set_dumpable() -> Result<(), Errno> {
    // SAFETY: prctl with constant arguments.
    let ret = unsafe { libc::prctl(libc::PR_SET_DUMPABLE, 1, 0, 0, 0) };
    if ret != 0 { Err(last_errno()) } else { Ok(()) }
}

/// `sethostname(2)` for the new UTS namespace.
pub fn set_hostname(name: &str) -> Result<(), Errno> {
    // SAFETY: pointer/length pair borrowed from a live &str.
    let ret = unsafe { libc::sethostname(name.as_ptr().cast::<libc::c_char>(), name.len()) };
    if ret != 0 { Err(last_errno()) } else { Ok(()) }
}

/// `chdir(2)`.
pub fn chdir(path: &Path) -> Result<(), Errno> {
    let path_c = path_to_cstring(path)?;
    // SAFETY: path_c is a valid NUL-terminated string.
    let ret = unsafe { libc::chdir(path_c.as_ptr()) };
    if ret != 0 { Err(last_errno()) } else { Ok(()) }
}

/// `chroot(2)` — the fallback root-entry for kernels where `pivot_root`
/// is refused.
pub fn chroot(path: &Path) -> Result<(), Errno> {
    let path_c = path_to_cstring(path)?;
    // SAFETY: path_c is a valid NUL-terminated string.
    let ret = unsafe { libc::chroot(path_c.as_ptr()) };
    if ret != 0 { Err(last_errno()) } else { Ok(()) }
}

/// `chown(2)`, following symlinks.
pub fn chown(path: &Path, uid: u32, gid: u32) -> Result<(), Errno> {
    let path_c = path_to_cstring(path)?;
    // SAFETY: path_c is a valid NUL-terminated string.
    let ret = unsafe { libc::chown(path_c.as_ptr(), uid, gid) };
    if ret != 0 { Err(last_errno()) } else { Ok(()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chdir_to_missing_path_reports_noent() {
        assert_eq!(
            chdir(Path::new("/nonexistent-burrow-test")),
            Err(Errno::NOENT)
        );
    }

    #[test]
    fn dumpable_is_settable() {
        set_dumpable().unwrap();
    }
}
