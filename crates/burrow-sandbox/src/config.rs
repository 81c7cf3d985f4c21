//! Launch configuration: mount requests, identity, mode selection.
//!
//! A [`Config`] describes one sandbox invocation: the root filesystem
//! image, the ordered mount requests layered into it, the identity the
//! command runs as, and the command itself.
//!
//! ## Example
//!
//! ```ignore
//! use burrow_sandbox::{Config, MountSpec};
//!
//! let cfg = Config::new("/images/debian", ["/bin/sh", "-c", "id"])
//!     .mount("/home/user/project:/workspace".parse::<MountSpec>()?)
//!     .cwd("/workspace")
//!     .hostname("burrow");
//! cfg.validate()?;
//! ```

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

/// Environment variable overriding execution-mode detection. The launcher
/// sets it to `"unprivileged"` for its children so nested launches never
/// retry the privileged path.
pub const FORCE_MODE_ENV: &str = "FORCE_SANDBOX_MODE";

/// Error raised before any namespace is created.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("no command given")]
    MissingCommand,

    #[error("rootfs path must be absolute: {0}")]
    RootfsNotAbsolute(String),

    #[error("outside path must be absolute: {0}")]
    OutsidePathNotAbsolute(String),

    #[error("duplicate sandbox path in mount requests: {0}")]
    DuplicateSandboxPath(String),

    #[error("malformed mount spec (expected HOST:GUEST[:MODE]): {0}")]
    MalformedMountSpec(String),

    #[error("unknown mount mode {mode:?} in {spec:?} (expected ro, rw, or ov)")]
    UnknownMountMode { mode: String, spec: String },

    #[error("unknown {FORCE_MODE_ENV} value {0:?} (expected \"privileged\" or \"unprivileged\")")]
    UnknownForcedMode(String),
}

/// How a mount request is materialized inside the sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MountKind {
    /// Recursive bind; writes are immediately visible on the host.
    #[default]
    ReadWrite,
    /// Recursive bind remounted read-only (carrying the locked flags of
    /// the underlying device).
    ReadOnly,
    /// Read-only bind with its own copy-on-write layer stacked on top:
    /// writes succeed inside but never reach the host path.
    Overlayed,
}

/// One requested mount: an absolute host path surfaced at a guest path.
///
/// Requests form an ordered sequence; they are applied in the order given
/// on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSpec {
    /// Absolute path on the host.
    pub outside: PathBuf,
    /// Path inside the sandbox; leading slashes are stripped when the
    /// mountpoint is joined onto the new root.
    pub inside: String,
    pub kind: MountKind,
}

impl MountSpec {
    pub fn new(outside: impl Into<PathBuf>, inside: impl Into<String>, kind: MountKind) -> Self {
        Self {
            outside: outside.into(),
            inside: inside.into(),
            kind,
        }
    }
}

impl FromStr for MountSpec {
    type Err = ConfigError;

    /// Parse `HOST:GUEST[:MODE]` with MODE one of `ro`, `rw`, `ov`
    /// (default `rw`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        let outside = parts
            .next()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| ConfigError::MalformedMountSpec(s.into()))?;
        let inside = parts
            .next()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| ConfigError::MalformedMountSpec(s.into()))?;
        let kind = match parts.next() {
            None | Some("rw") => MountKind::ReadWrite,
            Some("ro") => MountKind::ReadOnly,
            Some("ov") => MountKind::Overlayed,
            Some(other) => {
                return Err(ConfigError::UnknownMountMode {
                    mode: other.into(),
                    spec: s.into(),
                });
            }
        };
        if !outside.starts_with('/') {
            return Err(ConfigError::OutsidePathNotAbsolute(outside.into()));
        }
        Ok(Self::new(outside, inside, kind))
    }
}

/// Complete description of one sandbox invocation.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root filesystem image (required, absolute, trailing slash stripped).
    pub rootfs: PathBuf,
    /// Ordered mount requests.
    pub mounts: Vec<MountSpec>,
    /// Working directory inside the guest, entered (and created if
    /// needed) after the pivot.
    pub cwd: Option<PathBuf>,
    /// Host directory holding the overlay upper/work layers. When unset,
    /// the layers live on an ephemeral tmpfs that dies with the namespace.
    pub persist_dir: Option<PathBuf>,
    /// In-namespace UID the command runs as.
    pub uid: u32,
    /// In-namespace GID the command runs as.
    pub gid: u32,
    /// Prepended to the command vector when set.
    pub entrypoint: Option<PathBuf>,
    /// `size=` option for the ephemeral workspace tmpfs.
    pub tmpfs_size: String,
    /// UTS hostname for the sandbox.
    pub hostname: Option<String>,
    /// Pass `userxattr` to overlay mounts (needed for overlayfs nested in
    /// user namespaces on some kernels).
    pub userxattr: bool,
    /// Progress logging to stderr.
    pub verbose: bool,
    /// The user command vector (exec'd as-is, no PATH search).
    pub command: Vec<String>,
}

impl Config {
    pub fn new(
        rootfs: impl Into<PathBuf>,
        command: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            rootfs: strip_trailing_slash(rootfs.into()),
            mounts: Vec::new(),
            cwd: None,
            persist_dir: None,
            uid: 0,
            gid: 0,
            entrypoint: None,
            tmpfs_size: "1G".into(),
            hostname: None,
            userxattr: false,
            verbose: false,
            command: command.into_iter().map(Into::into).collect(),
        }
    }

    pub fn mount(mut self, spec: MountSpec) -> Self {
        self.mounts.push(spec);
        self
    }

    pub fn mounts(mut self, specs: impl IntoIterator<Item = MountSpec>) -> Self {
        self.mounts.extend(specs);
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn persist(mut self, dir: impl Into<PathBuf>) -> Self {
        self.persist_dir = Some(dir.into());
        self
    }

    pub fn identity(mut self, uid: u32, gid: u32) -> Self {
        self.uid = uid;
        self.gid = gid;
        self
    }

    pub fn entrypoint(mut self, path: impl Into<PathBuf>) -> Self {
        self.entrypoint = Some(path.into());
        self
    }

    pub fn tmpfs_size(mut self, size: impl Into<String>) -> Self {
        self.tmpfs_size = size.into();
        self
    }

    pub fn hostname(mut self, name: impl Into<String>) -> Self {
        self.hostname = Some(name.into());
        self
    }

    pub fn userxattr(mut self, on: bool) -> Self {
        self.userxattr = on;
        self
    }

    pub fn verbose(mut self, on: bool) -> Self {
        self.verbose = on;
        self
    }

    /// The vector actually exec'd: entrypoint (when set) followed by the
    /// user command.
    pub fn argv(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.command.len() + 1);
        if let Some(entry) = &self.entrypoint {
            argv.push(entry.to_string_lossy().into_owned());
        }
        argv.extend(self.command.iter().cloned());
        argv
    }

    /// Reject configurations that would fail obscurely after namespaces
    /// exist. Must be called before [`crate::launcher::run`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.argv().is_empty() {
            return Err(ConfigError::MissingCommand);
        }
        if !self.rootfs.is_absolute() {
            return Err(ConfigError::RootfsNotAbsolute(
                self.rootfs.to_string_lossy().into_owned(),
            ));
        }
        for spec in &self.mounts {
            if !spec.outside.is_absolute() {
                return Err(ConfigError::OutsidePathNotAbsolute(
                    spec.outside.to_string_lossy().into_owned(),
                ));
            }
        }
        // hashed_basename keeps workspace names unique only for distinct
        // paths; a repeated sandbox path would silently stack mounts.
        for (i, spec) in self.mounts.iter().enumerate() {
            if self.mounts[..i].iter().any(|m| m.inside == spec.inside) {
                return Err(ConfigError::DuplicateSandboxPath(spec.inside.clone()));
            }
        }
        Ok(())
    }
}

fn strip_trailing_slash(path: PathBuf) -> PathBuf {
    let s = path.to_string_lossy();
    let trimmed = s.trim_end_matches('/');
    if trimmed.is_empty() || trimmed.len() == s.len() {
        path
    } else {
        PathBuf::from(trimmed)
    }
}

/// Which of the two setup orders a launch uses.
///
/// Privileged mode mounts the world *before* cloning — a workaround for
/// kernels that refuse overlay mounts inside user namespaces. Unprivileged
/// mode clones first and mounts with the capabilities the new user
/// namespace grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Unprivileged,
    Privileged,
}

impl Mode {
    /// Detect from [`FORCE_MODE_ENV`], falling back to the effective UID.
    ///
    /// When detection was not forced, exports
    /// `FORCE_SANDBOX_MODE=unprivileged` so that anything launched inside
    /// the sandbox — where we hold full in-namespace capabilities — takes
    /// the unprivileged branch directly.
    pub fn detect() -> Result<Self, ConfigError> {
        match env::var(FORCE_MODE_ENV) {
            Ok(v) if v == "privileged" => Ok(Self::Privileged),
            Ok(v) if v == "unprivileged" => Ok(Self::Unprivileged),
            Ok(v) => Err(ConfigError::UnknownForcedMode(v)),
            Err(_) => {
                // SAFETY: the launcher is single-threaded at startup.
                unsafe { env::set_var(FORCE_MODE_ENV, "unprivileged") };
                // SAFETY: geteuid never fails.
                if unsafe { libc::geteuid() } == 0 {
                    Ok(Self::Privileged)
                } else {
                    Ok(Self::Unprivileged)
                }
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unprivileged => "unprivileged",
            Self::Privileged => "privileged",
        }
    }
}

/// The host-side UID/GID that will anchor the namespace's ID map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostIdentity {
    pub uid: u32,
    pub gid: u32,
}

impl HostIdentity {
    /// `getuid`/`getgid`, overridden by non-empty `SUDO_UID`/`SUDO_GID`
    /// when running under sudo (the real IDs belong to root then, but the
    /// map should anchor on the invoking user).
    ///
    /// Both variables are scrubbed from the environment afterwards:
    /// carrying outside UID numbers into a nested sandbox would have them
    /// refer to IDs that do not exist there.
    pub fn detect() -> Self {
        // SAFETY: getuid/getgid never fail.
        let mut uid = unsafe { libc::getuid() };
        let mut gid = unsafe { libc::getgid() };

        if let Ok(v) = env::var("SUDO_UID")
            && let Ok(parsed) = v.parse::<u32>()
        {
            uid = parsed;
        }
        if let Ok(v) = env::var("SUDO_GID")
            && let Ok(parsed) = v.parse::<u32>()
        {
            gid = parsed;
        }

        // SAFETY: the launcher is single-threaded at startup.
        unsafe {
            env::remove_var("SUDO_UID");
            env::remove_var("SUDO_GID");
        }

        Self { uid, gid }
    }
}
