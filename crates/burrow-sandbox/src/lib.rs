//! burrow-sandbox: Linux namespace sandbox launcher.
//!
//! Runs a user command inside fresh PID, mount, user, and UTS namespaces
//! over a copy-on-write view of a root filesystem image. Modifications to
//! the root land in a stacked overlay layer — ephemeral on a tmpfs by
//! default, or persisted across invocations in a caller-owned directory.
//!
//! ## How a launch works
//!
//! ```text
//! outside parent ──clone(NEWPID|NEWNS|NEWUSER|NEWUTS)──▶ namespace-init
//!       │   ◀─ ready byte ─────────────────────────────────────┤
//!       ├── writes /proc/<pid>/{uid_map,setgroups,gid_map} ──▶ │
//!       ├── go byte ─────────────────────────────────────────▶ │
//!       │                            mounts world, pivots root,│
//!       │                            forks the user command ──▶│──▶ execve
//!       │   ◀─ 4-byte exit code ◀── reaps, encodes ◀───────────┤
//!       ▼
//!  exits with the inner code, or re-raises the inner signal
//! ```
//!
//! The user command always runs as a grandchild: PID 1 of a PID namespace
//! does not receive default-action signals, so the namespace-init stays
//! behind as reaper and signal forwarder.
//!
//! ## Modes
//!
//! - **Unprivileged** (default): all mounting happens inside the new user
//!   namespace, using the capabilities the namespace grants.
//! - **Privileged** (effective UID 0, or forced via `FORCE_SANDBOX_MODE`):
//!   the world is mounted *before* cloning, for kernels that refuse
//!   overlay/bind mounts inside user namespaces.
//!
//! Nested launches always take the unprivileged branch: the launcher
//! exports `FORCE_SANDBOX_MODE=unprivileged` to its children.

#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

pub mod config;
pub mod idmap;
pub mod launcher;
pub mod mounts;
pub mod mtab;
pub mod paths;
pub mod pipes;
pub mod probe;
pub mod signals;

pub use config::{Config, ConfigError, HostIdentity, Mode, MountKind, MountSpec};
pub use launcher::{Verdict, run};
pub use probe::ProbeConfig;
