//! Typed wrappers over `mount(2)` and `umount2(2)`.
//!
//! The sandbox composes its virtual root out of many mounts (overlays,
//! recursive binds, tmpfs, procfs, devpts); these helpers keep the
//! `CString` plumbing in one place so the composer reads like the mount
//! table it builds.

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::ptr;

use rustix::io::Errno;

use crate::last_errno;

#[inline]
pub fn path_to_cstring(path: &Path) -> Result<CString, Errno> {
    CString::new(path.as_os_str().as_bytes()).map_err(|_| Errno::INVAL)
}

/// `mount(2)`. `source` and `fstype` may be absent (bind remounts pass no
/// filesystem type, flag-only remounts pass no source).
pub fn mount(
    source: Option<&Path>,
    target: &Path,
    fstype: Option<&str>,
    flags: libc::c_ulong,
    data: Option<&str>,
) -> Result<(), Errno> {
    let source_c = source.map(path_to_cstring).transpose()?;
    let target_c = path_to_cstring(target)?;
    let fstype_c = fstype
        .map(|f| CString::new(f).map_err(|_| Errno::INVAL))
        .transpose()?;
    let data_c = data
        .map(|d| CString::new(d).map_err(|_| Errno::INVAL))
        .transpose()?;

    // SAFETY: all pointers are either null or owned NUL-terminated strings
    // that outlive the call.
    let ret = unsafe {
        libc::mount(
            source_c.as_ref().map_or(ptr::null(), |s| s.as_ptr()),
            target_c.as_ptr(),
            fstype_c.as_ref().map_or(ptr::null(), |s| s.as_ptr()),
            flags,
            data_c
                .as_ref()
                .map_or(ptr::null(), |s| s.as_ptr())
                .cast::<libc::c_void>(),
        )
    };
    if ret != 0 { Err(last_errno()) } else { Ok(()) }
}

/// `umount(2)`.
pub fn umount(target: &Path) -> Result<(), Errno> {
    let target_c = path_to_cstring(target)?;
    // SAFETY: target_c is a valid NUL-terminated string.
    let ret = unsafe { libc::umount(target_c.as_ptr()) };
    if ret != 0 { Err(last_errno()) } else { Ok(()) }
}

/// `umount2(2)` with `MNT_DETACH` — lazy unmount, used to drop the old
/// root after `pivot_root`.
pub fn umount_detach(target: &Path) -> Result<(), Errno> {
    let target_c = path_to_cstring(target)?;
    // SAFETY: target_c is a valid NUL-terminated string.
    let ret = unsafe { libc::umount2(target_c.as_ptr(), libc::MNT_DETACH) };
    if ret != 0 { Err(last_errno()) } else { Ok(()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_to_cstring_valid() {
        let cstr = path_to_cstring(Path::new("/tmp/test")).unwrap();
        assert_eq!(cstr.as_bytes(), b"/tmp/test");
    }

    #[test]
    fn mount_surfaces_errno_or_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let result = mount(
            Some(Path::new("tmpfs")),
            dir.path(),
            Some("tmpfs"),
            0,
            Some("size=1M"),
        );
        match result {
            // Running with CAP_SYS_ADMIN (container CI): clean up.
            Ok(()) => umount(dir.path()).unwrap(),
            // Plain test process: the wrapper surfaces the errno.
            Err(errno) => assert_ne!(errno.raw_os_error(), 0),
        }
    }
}
