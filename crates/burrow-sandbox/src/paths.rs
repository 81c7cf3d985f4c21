//! Path primitives shared by the mount composer and the probe.

use std::ffi::CString;
use std::fs;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

/// Create `p` and all missing parents, tolerating concurrent creation.
pub fn mkpath(p: &Path) -> io::Result<()> {
    fs::create_dir_all(p)
}

/// `touch`: open read-only, creating with mode 0444 if absent.
///
/// `EISDIR` is tolerated — bind-mount targets are created with `touch`,
/// and the target may already exist as a directory.
pub fn touch(p: &Path) -> io::Result<()> {
    let path_c = CString::new(p.as_os_str().as_bytes())
        .map_err(|_| io::Error::from_raw_os_error(libc::EINVAL))?;
    // SAFETY: O_RDONLY|O_CREAT cannot be expressed through
    // std::fs::OpenOptions (create requires a writable mode there).
    let fd = unsafe { libc::open(path_c.as_ptr(), libc::O_RDONLY | libc::O_CREAT, 0o444) };
    if fd >= 0 {
        // SAFETY: fd is a freshly opened descriptor we own.
        unsafe { libc::close(fd) };
        return Ok(());
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::EISDIR) {
        Ok(())
    } else {
        Err(err)
    }
}

/// Best-effort post-order recursive removal. Errors are ignored; cleanup
/// paths must not turn into new failures.
pub fn rmrf(p: &Path) {
    match fs::symlink_metadata(p) {
        Ok(meta) if meta.is_dir() => {
            let _ = fs::remove_dir_all(p);
        }
        Ok(_) => {
            let _ = fs::remove_file(p);
        }
        Err(_) => {}
    }
}

/// Last path component, with `basename(3)` semantics: trailing slashes
/// ignored, `"/"` maps to itself.
pub fn basename(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return if path.is_empty() { "" } else { "/" };
    }
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

const HASH_SEED: u32 = 0x5f37_59df;

/// One-byte-at-a-time hash based on Murmur's mix.
fn string_hash(s: &str, mut h: u32) -> u32 {
    for &b in s.as_bytes() {
        h ^= u32::from(b);
        h = h.wrapping_mul(0x5bd1_e995);
        h ^= h >> 15;
    }
    h
}

/// `basename(path) + "-" + hex(hash(path))`.
///
/// Used to derive overlay upper/work directory names from sandbox paths.
/// Deterministic across processes — persistent workspaces are resumed by
/// recomputing the same name — and distinct for paths that share a
/// basename.
pub fn hashed_basename(path: &str) -> String {
    format!("{}-{:x}", basename(path), string_hash(path, HASH_SEED))
}

/// Collapse a symlink source before bind-mounting it.
///
/// Best-effort: a dangling or unresolvable link is reported in verbose
/// mode and returned as-is (the subsequent mount will fail with a precise
/// errno if it matters).
pub fn resolve_symlink(src: &Path, verbose: bool) -> PathBuf {
    let is_link = fs::symlink_metadata(src)
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false);
    if !is_link {
        return src.to_path_buf();
    }
    match fs::canonicalize(src) {
        Ok(resolved) => resolved,
        Err(err) => {
            if verbose {
                eprintln!("WARNING: Unable to resolve {} ({err})", src.display());
            }
            src.to_path_buf()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mkpath_creates_nested_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let deep = dir.path().join("a/b/c");
        mkpath(&deep).unwrap();
        assert!(deep.is_dir());
        // Idempotent.
        mkpath(&deep).unwrap();
    }

    #[test]
    fn touch_creates_readonly_file() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("marker");
        touch(&file).unwrap();
        let meta = fs::metadata(&file).unwrap();
        assert!(meta.is_file());
        assert_eq!(meta.permissions().mode() & 0o777, 0o444);
    }

    #[test]
    fn touch_tolerates_directories() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path()).unwrap();
    }

    #[test]
    fn rmrf_removes_trees_and_files() {
        let dir = tempfile::tempdir().unwrap();
        let tree = dir.path().join("t/u/v");
        mkpath(&tree).unwrap();
        fs::write(tree.join("f"), b"x").unwrap();
        rmrf(&dir.path().join("t"));
        assert!(!dir.path().join("t").exists());

        let file = dir.path().join("single");
        fs::write(&file, b"x").unwrap();
        rmrf(&file);
        assert!(!file.exists());

        // Missing paths are a no-op.
        rmrf(&dir.path().join("absent"));
    }

    #[test]
    fn basename_matches_libc_semantics() {
        assert_eq!(basename("/work/cache"), "cache");
        assert_eq!(basename("/work/cache/"), "cache");
        assert_eq!(basename("cache"), "cache");
        assert_eq!(basename("/"), "/");
    }

    #[test]
    fn hashed_basename_is_deterministic() {
        assert_eq!(hashed_basename("/workspace"), hashed_basename("/workspace"));
    }

    #[test]
    fn hashed_basename_distinguishes_shared_basenames() {
        let a = hashed_basename("/srv/data/cache");
        let b = hashed_basename("/var/lib/cache");
        assert!(a.starts_with("cache-"));
        assert!(b.starts_with("cache-"));
        assert_ne!(a, b);
    }

    #[test]
    fn resolve_symlink_follows_links() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("target");
        fs::create_dir(&target).unwrap();
        let link = dir.path().join("link");
        std::os::unix::fs::symlink(&target, &link).unwrap();
        assert_eq!(resolve_symlink(&link, false), target.canonicalize().unwrap());
    }

    #[test]
    fn resolve_symlink_keeps_dangling_links() {
        let dir = tempfile::tempdir().unwrap();
        let link = dir.path().join("dangling");
        std::os::unix::fs::symlink("/nonexistent-burrow", &link).unwrap();
        assert_eq!(resolve_symlink(&link, false), link);
    }

    #[test]
    fn resolve_symlink_passes_regular_paths_through() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(resolve_symlink(dir.path(), false), dir.path());
    }
}
