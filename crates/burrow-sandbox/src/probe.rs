//! Overlay capability probe.
//!
//! Whether the rootfs-over-itself overlay actually works depends on the
//! filesystem under the upper/work layers: encrypted, snapshotting,
//! already-stacked, and pseudo filesystems all refuse or misbehave, and
//! some kernels mount fine but then fail directory renames inside the
//! overlay (the failure mode that breaks `apt`-style package installs
//! with EXDEV). Rather than encode kernel/filesystem version knowledge,
//! the probe performs the exact mount the launcher would — inside a
//! disposable set of namespaces — plus a directory rename, and reports
//! the outcome as its exit status. A calling layer runs it over a
//! preference list of scratch locations and picks the first that works.

use std::fs;
use std::path::{Path, PathBuf};

use burrow_sys::{abort_at, check, mount as sys_mount, process};

use crate::idmap;
use crate::mounts;
use crate::paths::{mkpath, rmrf};
use crate::pipes::{self, Pipe};
use crate::signals;

/// One probe attempt: does the launcher's overlay work with these paths?
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Candidate root filesystem (used as overlay lower layer and mount
    /// destination, exactly as the launcher does).
    pub rootfs: PathBuf,
    /// Candidate scratch location; the probe works in
    /// `<scratch_parent>/.probe`.
    pub scratch_parent: PathBuf,
    /// Mount a small tmpfs under the probe directory first (probing the
    /// launcher's ephemeral-workspace configuration rather than the
    /// scratch filesystem itself).
    pub tmpfs: bool,
    /// Pass `userxattr` to the overlay mount.
    pub userxattr: bool,
    /// In-namespace UID to map to.
    pub uid: u32,
    /// In-namespace GID to map to.
    pub gid: u32,
    pub verbose: bool,
}

/// Run the probe. Returns the process exit code: 0 when the overlay (and
/// the rename liveness test) succeeded, 1 otherwise.
pub fn run(cfg: &ProbeConfig) -> i32 {
    // SAFETY: getuid/getgid never fail.
    let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };

    let Ok(child_pipe) = Pipe::new() else {
        abort_at(file!(), line!())
    };
    let Ok(parent_pipe) = Pipe::new() else {
        abort_at(file!(), line!())
    };

    // Same namespaces as a real launch: the mounts must be attempted with
    // exactly the capabilities the launcher would hold.
    // SAFETY: single-threaded, fork-style clone.
    let child_pid = unsafe { process::clone_into_namespaces() };
    check!(child_pid != -1);

    if child_pid == 0 {
        let code = probe_child(cfg, child_pipe, parent_pipe);
        // SAFETY: namespace child exits without unwinding.
        unsafe { libc::_exit(code) }
    }

    signals::forward_signals_to(child_pid);

    let Pipe {
        read: child_read,
        write: child_write,
    } = child_pipe;
    let Pipe {
        read: parent_read,
        write: parent_write,
    } = parent_pipe;
    drop(child_read);
    drop(parent_write);

    check!(pipes::recv_byte(&parent_read));
    if cfg.verbose {
        eprintln!("Child Process PID is {child_pid}");
    }

    check!(
        idmap::configure_user_namespace(child_pid, uid, gid, cfg.uid, cfg.gid, cfg.verbose)
            .is_ok()
    );
    check!(pipes::send_byte(&child_write));

    let mut status = 0;
    // SAFETY: waiting on our direct child.
    check!(unsafe { libc::waitpid(child_pid, &mut status, 0) } == child_pid);
    check!(libc::WIFEXITED(status));
    libc::WEXITSTATUS(status)
}

fn probe_child(cfg: &ProbeConfig, child_pipe: Pipe, parent_pipe: Pipe) -> i32 {
    let Pipe {
        read: child_read,
        write: child_write,
    } = child_pipe;
    let Pipe {
        read: parent_read,
        write: parent_write,
    } = parent_pipe;
    drop(child_write);
    drop(parent_read);

    check!(process::set_dumpable().is_ok());
    check!(pipes::send_byte(&parent_write));
    check!(pipes::recv_byte(&child_read));

    if !cfg.scratch_parent.is_dir() {
        eprintln!(
            "---> parent directory does not exist ({})",
            cfg.scratch_parent.display()
        );
        return 1;
    }

    let probe_dir = cfg.scratch_parent.join(".probe");

    if cfg.tmpfs {
        if cfg.verbose {
            eprintln!("--> Mounting tmpfs on {}", probe_dir.display());
        }
        check!(mkpath(&probe_dir).is_ok());
        check!(
            sys_mount::mount(
                Some(Path::new("tmpfs")),
                &probe_dir,
                Some("tmpfs"),
                0,
                Some("size=1M"),
            )
            .is_ok()
        );
    }

    let mut ok = mounts::mount_overlay(
        &cfg.rootfs,
        &cfg.rootfs,
        "probe",
        &probe_dir,
        cfg.userxattr,
        cfg.verbose,
    );

    if ok {
        // Rename a directory inside the overlay. Some kernel and option
        // combinations (userxattr, redirect_dir, ...) mount fine but fail
        // here with EXDEV, which would break package installers inside
        // the sandbox.
        let move_src = cfg.rootfs.join("src");
        let move_dst = cfg.rootfs.join("dst");
        check!(mkpath(&move_src).is_ok());
        match fs::rename(&move_src, &move_dst) {
            Ok(()) => {
                if cfg.verbose {
                    eprintln!(
                        "----> rename(\"{}\", \"{}\") passed",
                        move_src.display(),
                        move_dst.display()
                    );
                }
            }
            Err(err) => {
                if cfg.verbose {
                    eprintln!(
                        "----> rename(\"{}\", \"{}\") failed: {} ({err})",
                        move_src.display(),
                        move_dst.display(),
                        err.raw_os_error().unwrap_or(0)
                    );
                }
                ok = false;
            }
        }
        check!(sys_mount::umount(&cfg.rootfs).is_ok());
    }

    if cfg.tmpfs {
        check!(sys_mount::umount(&probe_dir).is_ok());
    }
    rmrf(&probe_dir);

    if ok {
        if cfg.verbose {
            println!("---> probe of {} successful!", cfg.scratch_parent.display());
        }
        0
    } else {
        1
    }
}
