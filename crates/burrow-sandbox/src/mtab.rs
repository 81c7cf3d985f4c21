//! Locked-mount-flag discovery from the kernel mount table.
//!
//! Remounting a bind read-only is not allowed to *clear* mount flags that
//! were locked in by the original mount (nosuid, noexec, ...), so the
//! read-only remount in [`crate::mounts::bind_mount`] must carry whichever
//! of those flags currently protect the source's device. We can't apply
//! them blindly either — noexec changes behaviour — so the set in effect
//! is read out of `/proc/self/mounts`.

use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

/// Flags the kernel refuses to drop across a bind remount.
const LOCKED: &[(&str, libc::c_ulong)] = &[
    ("nodev", libc::MS_NODEV),
    ("nosuid", libc::MS_NOSUID),
    ("noexec", libc::MS_NOEXEC),
    ("noatime", libc::MS_NOATIME),
    ("nodiratime", libc::MS_NODIRATIME),
    ("relatime", libc::MS_RELATIME),
];

/// Locked flags protecting the filesystem `path` lives on, or `None` when
/// no mount-table entry matches the path's device (callers treat that as
/// fatal: it means the table is unreadable or the path vanished).
pub fn locked_mount_flags(path: &Path) -> Option<libc::c_ulong> {
    let dev = fs::metadata(path).ok()?.dev();
    let table = fs::read_to_string("/proc/self/mounts").ok()?;

    for line in table.lines() {
        // device mountpoint fstype options dump pass
        let mut fields = line.split_ascii_whitespace();
        let (Some(_device), Some(mountpoint), Some(_fstype), Some(options)) =
            (fields.next(), fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        let mountpoint = unescape_mount_field(mountpoint);

        // Mountpoints we may not stat are skipped, hoping they're not the
        // one we're after.
        match fs::metadata(&mountpoint) {
            Ok(meta) if meta.dev() == dev => return Some(locked_flags_in(options)),
            _ => continue,
        }
    }
    None
}

fn locked_flags_in(options: &str) -> libc::c_ulong {
    let mut flags = 0;
    for opt in options.split(',') {
        if let Some((_, flag)) = LOCKED.iter().find(|(name, _)| *name == opt) {
            flags |= flag;
        }
    }
    flags
}

/// Decode the octal escapes `getmntent(3)` would decode (`\040` for space
/// and friends).
fn unescape_mount_field(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|d| (b'0'..=b'7').contains(d)) {
                let value = digits.iter().fold(0u32, |acc, d| acc * 8 + u32::from(d - b'0'));
                out.push(value as u8);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
