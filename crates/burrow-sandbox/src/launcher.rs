//! The launch state machines: outside parent and namespace-init.
//!
//! Ordering here is the whole game. Certain steps must happen before the
//! clone (privileged-mode mounting), some between the clone and the
//! child's first privileged action (ID-map installation, which only the
//! outside can perform), and some only after the PID-namespace init
//! exists (everything behind the pivot). Getting a step out of order
//! doesn't always fail loudly — it can silently weaken isolation — so the
//! two processes run in lockstep over the handshake pipes:
//!
//! 1. child: make self dumpable, send ready byte;
//! 2. parent: write uid_map / setgroups / gid_map, send go byte;
//! 3. child: finish mounting (or drop privileges), pivot, fork, exec;
//! 4. child-as-init: reap, encode the command's end, send 4-byte code;
//! 5. parent: wait, decode, exit with the code or re-raise the signal.
//!
//! Setup failures abort via `check!` — after a failed mount or map write
//! there is nothing consistent to return to.

use std::ffi::CString;
use std::io::Write as _;
use std::mem;
use std::os::fd::OwnedFd;
use std::os::unix::ffi::OsStringExt;
use std::path::Path;
use std::ptr;

use burrow_sys::{abort_at, check, last_errno, mount as sys_mount, process};

use crate::config::{Config, HostIdentity, Mode};
use crate::idmap;
use crate::mounts;
use crate::paths::mkpath;
use crate::pipes::{self, Pipe};
use crate::signals;

/// How the sandboxed command ended, as observed by the outside process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Normal exit; propagate the code.
    Exited(i32),
    /// Death by signal; the outside should die the same way.
    Signaled(i32),
}

impl Verdict {
    /// Terminate the calling process the way the inner command
    /// terminated: exit with its code, or re-raise its signal with the
    /// default disposition so our own parent observes an authentic
    /// signal death.
    pub fn propagate(self) -> ! {
        match self {
            Self::Exited(code) => std::process::exit(code),
            Self::Signaled(sig) => {
                // SAFETY: restoring the default disposition, then raising.
                unsafe {
                    libc::signal(sig, libc::SIG_DFL);
                    libc::raise(sig);
                }
                // Reached only when the signal's default disposition does
                // not terminate.
                std::process::exit(1)
            }
        }
    }
}

/// Wire encoding: codes below 256 are exit statuses, `256 + n` is death
/// by signal `n`.
fn decode_exit(code: u32) -> Verdict {
    if code >= 256 {
        Verdict::Signaled((code - 256) as i32)
    } else {
        Verdict::Exited(code as i32)
    }
}

/// Launch `cfg` and block until the inner command ends.
///
/// `cfg` must have passed [`Config::validate`]. Mode and host identity
/// are resolved by the caller (their detection reads and scrubs the
/// environment, which belongs with configuration handling).
pub fn run(cfg: &Config, mode: Mode, host: HostIdentity) -> Verdict {
    if cfg.verbose {
        eprintln!(
            "verbose sandbox enabled (running in {} container mode)",
            mode.as_str()
        );
    }

    // Remembered now so the terminal can be handed back after the wait.
    // SAFETY: getpgid(0) on self never fails.
    let pgrp = unsafe { libc::getpgid(0) };

    let Ok(child_pipe) = Pipe::new() else {
        abort_at(file!(), line!())
    };
    let Ok(parent_pipe) = Pipe::new() else {
        abort_at(file!(), line!())
    };

    if mode == Mode::Privileged {
        // This kernel may refuse overlay mounts inside user namespaces,
        // so the world is mounted out here — in a private mount namespace
        // so nothing leaks onto the host.
        check!(process::unshare_mount_ns().is_ok());
        check!(mounts::make_rprivate().is_ok());
        mounts::mount_the_world(cfg, host.uid, host.gid);
    }

    // SAFETY: single-threaded; the child continues from this call like a
    // fork child would.
    let child_pid = unsafe { process::clone_into_namespaces() };
    check!(child_pid != -1);

    if child_pid == 0 {
        let code = namespace_init(cfg, mode, child_pipe, parent_pipe);
        // SAFETY: the init must not unwind through the parent's state.
        unsafe { libc::_exit(code) }
    }

    outside(cfg, host, child_pid, pgrp, child_pipe, parent_pipe)
}

/// Outside half: configure the child's user namespace, then wait and
/// collect the inner verdict.
fn outside(
    cfg: &Config,
    host: HostIdentity,
    child_pid: libc::pid_t,
    pgrp: libc::pid_t,
    child_pipe: Pipe,
    parent_pipe: Pipe,
) -> Verdict {
    signals::forward_signals_to(child_pid);

    // Each side keeps only the ends it uses.
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

    // The child is ready to be configured once it has re-enabled
    // dumpability; until then its /proc entries are root-owned.
    check!(pipes::recv_byte(&parent_read));
    if cfg.verbose {
        eprintln!("Child Process PID is {child_pid}");
    }

    check!(
        idmap::configure_user_namespace(
            child_pid, host.uid, host.gid, cfg.uid, cfg.gid, cfg.verbose
        )
        .is_ok()
    );
    check!(pipes::send_byte(&child_write));

    let mut status = 0;
    // SAFETY: waiting on our direct child.
    check!(unsafe { libc::waitpid(child_pid, &mut status, 0) } == child_pid);

    let code = pipes::recv_code(&parent_read);
    check!(code.is_some());
    let code = code.unwrap_or_default();

    // Hand the terminal back to the original process group; a failure
    // just means stdin was never a terminal.
    // SAFETY: ignoring SIGTTOU so tcsetpgrp from a background group works.
    unsafe {
        libc::signal(libc::SIGTTOU, libc::SIG_IGN);
        libc::tcsetpgrp(0, pgrp);
    }

    // The namespace-init always exits cleanly — the inner status travels
    // in-band. Anything else is a launcher bug.
    check!(libc::WIFEXITED(status));
    check!(libc::WEXITSTATUS(status) == 0);

    let verdict = decode_exit(code);
    if cfg.verbose {
        match verdict {
            Verdict::Signaled(sig) => eprintln!("Child Process {child_pid} signaled {sig}"),
            Verdict::Exited(code) => eprintln!("Child Process {child_pid} exited with code {code}"),
        }
    }
    verdict
}

/// Namespace-init half: handshake, finish setup inside the namespaces,
/// become init.
fn namespace_init(cfg: &Config, mode: Mode, child_pipe: Pipe, parent_pipe: Pipe) -> i32 {
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

    // The credential change implied by CLONE_NEWUSER may have reset our
    // dumpability, which would leave /proc/<pid> root-owned and the
    // parent unable to write our ID maps.
    check!(process::set_dumpable().is_ok());

    check!(pipes::send_byte(&parent_write));
    check!(pipes::recv_byte(&child_read));

    // From here on the ID maps are installed: we hold the full capability
    // set inside the new user namespace.
    match mode {
        Mode::Privileged => {
            // The world was mounted before the clone; drop to the
            // requested in-namespace identity.
            // SAFETY: setting the mapped ids.
            check!(unsafe { libc::setuid(cfg.uid) } == 0);
            check!(unsafe { libc::setgid(cfg.gid) } == 0);
            // The pre-clone proc mount shows the old PID namespace;
            // mount a fresh one over it for correct values.
            mounts::mount_procfs(&cfg.rootfs, cfg.uid, cfg.gid, cfg.verbose);
        }
        Mode::Unprivileged => {
            mounts::mount_the_world(cfg, cfg.uid, cfg.gid);
        }
    }

    if let Some(hostname) = &cfg.hostname {
        check!(process::set_hostname(hostname).is_ok());
    }

    enter_root_and_exec(cfg, &parent_write)
}

/// Relocate into the composed root, spawn the user command, and serve as
/// the namespace's init until it ends.
fn enter_root_and_exec(cfg: &Config, parent_write: &OwnedFd) -> i32 {
    let root = if cfg.rootfs.as_os_str().is_empty() {
        Path::new("/")
    } else {
        cfg.rootfs.as_path()
    };

    if cfg.verbose {
        eprintln!("Entering rootfs at {}", root.display());
    }

    // pivot_root over chroot: a chroot'd process gets EPERM from
    // clone(CLONE_NEWUSER), which would break nested sandboxing. Pivoting
    // "." onto "." stacks the old root under the new one at the same
    // path, so detaching "." afterwards drops the entire outside tree.
    check!(process::chdir(root).is_ok());
    if rustix::process::pivot_root(".", ".").is_ok() {
        check!(sys_mount::umount_detach(Path::new(".")).is_ok());
        check!(process::chdir(Path::new("/")).is_ok());
        if cfg.verbose {
            eprintln!("--> pivot_root() succeeded and unmounted old root");
        }
    } else {
        let errno = last_errno();
        check!(process::chroot(root).is_ok());
        if cfg.verbose {
            eprintln!(
                "--> chroot() used since pivot_root() errored with: [{}] {errno}, \
                 nested sandboxing unavailable",
                errno.raw_os_error()
            );
        }
    }

    if let Some(cwd) = &cfg.cwd {
        check!(mkpath(cwd).is_ok());
        check!(process::chdir(cwd).is_ok());
    }

    let argv = cfg.argv();

    // SAFETY: single-threaded init forking the user command.
    let command_pid = unsafe { libc::fork() };
    check!(command_pid != -1);
    if command_pid == 0 {
        exec_command(cfg, &argv);
    }

    init_loop(command_pid, parent_write)
}

/// Exec the user command in the current (sandboxed) environment. The
/// inherited environment carries `FORCE_SANDBOX_MODE=unprivileged` and no
/// `SUDO_*` variables. No PATH search: argv[0] is a path.
fn exec_command(cfg: &Config, argv: &[String]) -> ! {
    if cfg.verbose {
        let rendered: Vec<String> = argv.iter().map(|a| format!("`{a}`")).collect();
        eprintln!("About to run {}", rendered.join(" "));
    }

    let args: Option<Vec<CString>> = argv
        .iter()
        .map(|a| CString::new(a.as_bytes()).ok())
        .collect();
    let env: Vec<CString> = std::env::vars_os()
        .filter_map(|(key, value)| {
            let mut entry = key.into_vec();
            entry.push(b'=');
            entry.extend(value.into_vec());
            CString::new(entry).ok()
        })
        .collect();

    if let Some(args) = args {
        let arg_ptrs: Vec<*const libc::c_char> = args
            .iter()
            .map(|a| a.as_ptr())
            .chain(std::iter::once(ptr::null()))
            .collect();
        let env_ptrs: Vec<*const libc::c_char> = env
            .iter()
            .map(|e| e.as_ptr())
            .chain(std::iter::once(ptr::null()))
            .collect();
        // SAFETY: argv/envp are NUL-terminated arrays of NUL-terminated
        // strings, live until the call (which does not return on success).
        unsafe { libc::execve(args[0].as_ptr(), arg_ptrs.as_ptr(), env_ptrs.as_ptr()) };
    }

    let errno = last_errno();
    eprintln!(
        "ERROR: Failed to run {}: {} ({errno})",
        argv[0],
        errno.raw_os_error()
    );
    std::io::stdout().flush().ok();
    std::io::stderr().flush().ok();
    // SAFETY: exec failed; die without unwinding.
    unsafe { libc::_exit(1) }
}

/// Init duties: forward signals to the command, reap orphans, and when
/// the direct child ends, report its encoded status and exit cleanly.
fn init_loop(command_pid: libc::pid_t, parent_write: &OwnedFd) -> i32 {
    signals::forward_signals_to(command_pid);

    // SAFETY: blocking SIGCHLD so it queues for sigwait instead of
    // firing; all calls operate on a locally owned sigset.
    unsafe {
        let mut set: libc::sigset_t = mem::zeroed();
        libc::sigemptyset(&mut set);
        libc::sigaddset(&mut set, libc::SIGCHLD);
        libc::sigprocmask(libc::SIG_BLOCK, &set, ptr::null_mut());

        loop {
            let mut sig = 0;
            libc::sigwait(&set, &mut sig);

            let mut status = 0;
            loop {
                let reaped = libc::waitpid(-1, &mut status, 0);
                if reaped == -1 {
                    break;
                }
                if reaped != command_pid {
                    continue;
                }

                let code: u32 = if libc::WIFSIGNALED(status) {
                    256 + libc::WTERMSIG(status) as u32
                } else if libc::WIFEXITED(status) {
                    libc::WEXITSTATUS(status) as u32
                } else {
                    // waitpid without WUNTRACED only returns exits and
                    // signal deaths; anything else is a launcher bug.
                    check!(false);
                    unreachable!()
                };
                check!(pipes::send_code(parent_write, code));
                return 0;
            }
        }
    }
}
