//! Virtual-root composition: overlays, binds, procfs, /dev.
//!
//! The root filesystem image is never written to. It is used as the
//! *lower* layer of an overlay mounted over its own path, with a fresh
//! upper layer catching every modification — the kernel allows mounting an
//! overlay onto its own lowerdir as long as the upper is distinct. The
//! upper/work layers live either on an ephemeral tmpfs (gone when the
//! namespace dies) or in a caller-provided persist directory (resumable).
//!
//! Ordering matters and is load-bearing:
//!
//! 1. the root overlay first — later mountpoints are created *inside* the
//!    overlay, never in the read-only image;
//! 2. the requested binds, in command-line order;
//! 3. `/proc` and `/dev` last — an earlier bind may have replaced the
//!    directories that contain them.
//!
//! Failures here are fatal (`check!`): a half-composed root cannot be
//! unwound, except in [`mount_overlay`] itself, whose boolean result the
//! overlay probe depends on.

use std::path::{Path, PathBuf};

use burrow_sys::{check, mount as sys_mount, process};
use rustix::io::Errno;

use crate::config::{Config, MountKind};
use crate::mtab::locked_mount_flags;
use crate::paths::{hashed_basename, mkpath, resolve_symlink, touch};

/// Where the ephemeral overlay workspace tmpfs is mounted. Any path that
/// exists on every Linux userland and is hidden from the sandbox once the
/// root is pivoted would do.
pub const EPHEMERAL_WORKSPACE: &str = "/bin";

/// Name of the root filesystem's own overlay layer inside the workspace.
pub const ROOTFS_LAYER: &str = "rootfs";

/// Mark the whole tree private so our mounts never propagate back out.
/// systemd commonly flips the root mount to shared, subverting the
/// kernel default.
pub fn make_rprivate() -> Result<(), Errno> {
    sys_mount::mount(
        None,
        Path::new("/"),
        None,
        libc::MS_PRIVATE | libc::MS_REC,
        None,
    )
}

fn normalize_root(path: &Path) -> &Path {
    if path.as_os_str().is_empty() {
        Path::new("/")
    } else {
        path
    }
}

fn overlay_options(lower: &Path, upper: &Path, work: &Path, userxattr: bool) -> String {
    format!(
        "lowerdir={},upperdir={},workdir={}{}",
        lower.display(),
        upper.display(),
        work.display(),
        if userxattr { ",userxattr" } else { "" }
    )
}

/// Join a guest path onto the new root, stripping leading slashes.
fn join_inside(root: &Path, inside: &str) -> PathBuf {
    root.join(inside.trim_start_matches('/'))
}

/// Stack a copy-on-write layer from `lower` onto `dest`, anchoring
/// modifications in `work_dir/upper/<name>` (and the overlay's internal
/// scratch in `work_dir/work/<name>`).
///
/// Does not abort on mount failure — the probe calls this on candidate
/// workspaces precisely to find out whether it works — but failure to
/// create the layer directories is fatal as everywhere else.
pub fn mount_overlay(
    lower: &Path,
    dest: &Path,
    name: &str,
    work_dir: &Path,
    userxattr: bool,
    verbose: bool,
) -> bool {
    let upper = work_dir.join("upper").join(name);
    let work = work_dir.join("work").join(name);
    let lower = normalize_root(lower);
    let dest = normalize_root(dest);

    if verbose {
        eprintln!(
            "--> Mounting overlay of {} at {} (modifications in {}, workspace in {}, userxattr: {})",
            lower.display(),
            dest.display(),
            upper.display(),
            work.display(),
            userxattr
        );
    }

    check!(mkpath(&upper).is_ok());
    check!(mkpath(&work).is_ok());

    let opts = overlay_options(lower, &upper, &work, userxattr);
    match sys_mount::mount(
        Some(Path::new("overlay")),
        dest,
        Some("overlay"),
        0,
        Some(opts.as_str()),
    ) {
        Ok(()) => true,
        Err(errno) => {
            if verbose {
                eprintln!(
                    "----> mount(\"overlay\", \"{}\", \"overlay\", 0, \"{opts}\") failed: {} ({errno})",
                    dest.display(),
                    errno.raw_os_error(),
                );
            }
            false
        }
    }
}

/// Mount a fresh procfs at `<root>/proc` and hand it to the sandbox
/// identity. The chown may fail when we don't own the mount; it only
/// cosmetically de-"nobody"s the directory, so that's tolerated.
pub fn mount_procfs(root: &Path, uid: u32, gid: u32, verbose: bool) {
    let path = root.join("proc");
    if verbose {
        eprintln!("--> Mounting procfs at {}", path.display());
    }
    check!(sys_mount::mount(Some(Path::new("proc")), &path, Some("proc"), 0, None).is_ok());
    let _ = process::chown(&path, uid, gid);
}

/// Recursive bind of `src` at `dest`, optionally remounted read-only.
///
/// The mountpoint is created on demand: as a directory when the (symlink
/// -resolved) source is one, as a file otherwise. The read-only remount
/// must carry whatever locked flags protect the source's device — the
/// kernel rejects a remount that would clear them — hence the mount-table
/// lookup.
pub fn bind_mount(src: &Path, dest: &Path, read_only: bool, verbose: bool) {
    let src = resolve_symlink(src, verbose);

    if verbose {
        eprintln!(
            "--> Bind-mounting {} over {} ({})",
            src.display(),
            dest.display(),
            if read_only { "read-only" } else { "read-write" }
        );
    }

    if src.is_dir() {
        check!(mkpath(dest).is_ok());
    } else {
        // If src does not exist either, a file is created here and the
        // mount below reports the real error.
        check!(touch(dest).is_ok());
    }

    // MS_REC: the source may itself contain submounts, e.g. when a whole
    // workspace tree is mapped in.
    check!(
        sys_mount::mount(
            Some(src.as_path()),
            dest,
            None,
            libc::MS_BIND | libc::MS_REC,
            None
        )
        .is_ok()
    );

    if read_only {
        let locked = locked_mount_flags(&src);
        check!(locked.is_some());
        let flags =
            libc::MS_BIND | libc::MS_REMOUNT | libc::MS_RDONLY | locked.unwrap_or_default();
        check!(sys_mount::mount(Some(src.as_path()), dest, None, flags, None).is_ok());
    }
}

/// Bind a host path into the root iff it exists on the host; silently
/// skip otherwise (minimal hosts lack some device nodes).
pub fn bind_host_node(root: &Path, name: &str, read_only: bool, verbose: bool) {
    let host = Path::new(name);
    if host.exists() {
        bind_mount(host, &join_inside(root, name), read_only, verbose);
    }
}

/// Populate `<root>/dev`: the standard host nodes, a read-only sysfs, and
/// a fresh devpts whose ptmx is bound to `/dev/ptmx`.
pub fn mount_dev(root: &Path, verbose: bool) {
    for node in [
        "/dev/null",
        "/dev/tty",
        "/dev/zero",
        "/dev/random",
        "/dev/urandom",
        "/dev/shm",
    ] {
        bind_host_node(root, node, false, verbose);
    }

    bind_host_node(root, "/sys", true, verbose);

    let pts = root.join("dev/pts");
    check!(mkpath(&pts).is_ok());
    check!(
        sys_mount::mount(
            Some(Path::new("devpts")),
            &pts,
            Some("devpts"),
            0,
            Some("ptmxmode=0666"),
        )
        .is_ok()
    );

    bind_mount(&pts.join("ptmx"), &root.join("dev/ptmx"), false, verbose);
}

/// Compose the complete virtual root for `cfg`, owned by `uid:gid`.
///
/// Runs before the clone in privileged mode (host identity) and inside
/// the new namespaces in unprivileged mode (in-namespace identity).
pub fn mount_the_world(cfg: &Config, uid: u32, gid: u32) {
    let verbose = cfg.verbose;

    // The workspace holding every overlay's upper/work layers. Ephemeral
    // by default: a tmpfs that disappears with the mount namespace. The
    // caller of a persistent workspace owns cleanup of upper/ and work/.
    let workspace = match &cfg.persist_dir {
        Some(dir) => dir.clone(),
        None => {
            let opts = format!("size={}", cfg.tmpfs_size);
            check!(
                sys_mount::mount(
                    Some(Path::new("tmpfs")),
                    Path::new(EPHEMERAL_WORKSPACE),
                    Some("tmpfs"),
                    0,
                    Some(opts.as_str()),
                )
                .is_ok()
            );
            PathBuf::from(EPHEMERAL_WORKSPACE)
        }
    };

    if verbose {
        eprintln!("--> Creating overlay workdir at {}", workspace.display());
    }

    // Root overlay first; everything below mounts into the writable view.
    check!(mount_overlay(
        &cfg.rootfs,
        &cfg.rootfs,
        ROOTFS_LAYER,
        &workspace,
        cfg.userxattr,
        verbose,
    ));
    check!(process::chown(&cfg.rootfs, uid, gid).is_ok());

    for spec in &cfg.mounts {
        let target = join_inside(&cfg.rootfs, &spec.inside);
        bind_mount(
            &spec.outside,
            &target,
            spec.kind != MountKind::ReadWrite,
            verbose,
        );
        if spec.kind == MountKind::Overlayed {
            let name = hashed_basename(&spec.inside);
            check!(mount_overlay(
                &target,
                &target,
                &name,
                &workspace,
                cfg.userxattr,
                verbose,
            ));
            check!(process::chown(&target, uid, gid).is_ok());
        }
    }

    mount_procfs(&cfg.rootfs, uid, gid, verbose);
    mount_dev(&cfg.rootfs, verbose);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlay_options_format() {
        let opts = overlay_options(
            Path::new("/rootfs"),
            Path::new("/w/upper/rootfs"),
            Path::new("/w/work/rootfs"),
            false,
        );
        assert_eq!(
            opts,
            "lowerdir=/rootfs,upperdir=/w/upper/rootfs,workdir=/w/work/rootfs"
        );
    }

    #[test]
    fn overlay_options_userxattr() {
        let opts = overlay_options(Path::new("/r"), Path::new("/u"), Path::new("/w"), true);
        assert!(opts.ends_with(",userxattr"));
    }

    #[test]
    fn join_inside_strips_leading_slashes() {
        assert_eq!(
            join_inside(Path::new("/root"), "/workspace"),
            Path::new("/root/workspace")
        );
        assert_eq!(
            join_inside(Path::new("/root"), "//deep/path"),
            Path::new("/root/deep/path")
        );
        assert_eq!(
            join_inside(Path::new("/root"), "relative"),
            Path::new("/root/relative")
        );
    }

    #[test]
    fn empty_paths_normalize_to_root() {
        assert_eq!(normalize_root(Path::new("")), Path::new("/"));
        assert_eq!(normalize_root(Path::new("/r")), Path::new("/r"));
    }
}
