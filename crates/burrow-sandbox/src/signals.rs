//! Transparent signal pass-through.
//!
//! Signals travel along the process chain: outside parent → namespace-init
//! → user command. Each hop installs the same handler, aimed at its own
//! direct child; the handler forwards and does not terminate the
//! forwarder, so signal death is observed only where it happens and then
//! propagated back up as an exit code.
//!
//! The target PID is the one unavoidable process-wide global here (signal
//! handlers cannot carry context); it is stored atomically and re-aimed at
//! the clone and fork points.

use std::sync::atomic::{AtomicI32, Ordering};

/// Signals forwarded to the current child. SIGSTOP cannot actually be
/// caught — registration fails silently — but it stays in the set to keep
/// the contract explicit.
pub const FORWARDED_SIGNALS: [libc::c_int; 7] = [
    libc::SIGHUP,
    libc::SIGPIPE,
    libc::SIGSTOP,
    libc::SIGINT,
    libc::SIGTERM,
    libc::SIGUSR1,
    libc::SIGUSR2,
];

static FORWARD_TARGET: AtomicI32 = AtomicI32::new(0);

extern "C" fn passthrough(sig: libc::c_int) {
    let target = FORWARD_TARGET.load(Ordering::Relaxed);
    if target > 0 {
        // SAFETY: kill is async-signal-safe.
        unsafe { libc::kill(target, sig) };
    }
}

/// Install the forwarding handlers, aimed at `child`.
///
/// Calling again re-aims the already-installed handlers (the init does
/// this after forking the user command).
pub fn forward_signals_to(child: libc::pid_t) {
    FORWARD_TARGET.store(child, Ordering::Relaxed);
    let handler = passthrough as extern "C" fn(libc::c_int) as libc::sighandler_t;
    for sig in FORWARDED_SIGNALS {
        // SAFETY: installing a handler that only calls kill(2).
        unsafe { libc::signal(sig, handler) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forwarding_relays_to_the_target() {
        // Aim the handlers at a forked child parked in pause(); the
        // relayed SIGTERM's default disposition terminates it, which the
        // parent observes via waitpid.
        // SAFETY: the child only runs async-signal-safe calls.
        unsafe {
            let child = libc::fork();
            assert!(child >= 0);
            if child == 0 {
                // Child: wait until a signal arrives; SIGTERM's default
                // disposition terminates us, which the parent asserts on.
                libc::pause();
                libc::_exit(0);
            }
            forward_signals_to(child);
            // Give the child a moment to reach pause().
            libc::usleep(100_000);
            passthrough(libc::SIGTERM);
            let mut status = 0;
            assert_eq!(libc::waitpid(child, &mut status, 0), child);
            assert!(libc::WIFSIGNALED(status));
            assert_eq!(libc::WTERMSIG(status), libc::SIGTERM);
        }
    }
}
