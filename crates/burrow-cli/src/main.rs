//! burrow — run a command inside namespaces over a copy-on-write rootfs.
//!
//! ```text
//! mkdir -p /tmp/workspace
//! burrow --verbose --rootfs $rootfs_dir \
//!     --mount /tmp/workspace:/workspace --cd /workspace /bin/bash
//! ```
//!
//! The process exits with the inner command's exit code; if the command
//! died of a signal, burrow re-raises that signal on itself so its own
//! parent sees an authentic signal death. Exit 1 is reserved for
//! configuration and setup errors.

use std::path::PathBuf;
use std::process::exit;

use clap::Parser;
use clap::error::ErrorKind;

use burrow_sandbox::{Config, ConfigError, HostIdentity, Mode, MountSpec, launcher};

#[derive(Parser)]
#[command(
    name = "burrow",
    about = "Run a command inside PID/mount/user/UTS namespaces over a copy-on-write rootfs",
    disable_version_flag = true
)]
struct Cli {
    /// Enable progress logging to stderr
    #[arg(short, long)]
    verbose: bool,

    /// Root filesystem path
    #[arg(long, value_name = "DIR")]
    rootfs: PathBuf,

    /// Working directory inside the sandbox (created if missing)
    #[arg(long, value_name = "DIR")]
    cd: Option<PathBuf>,

    /// Mount request; MODE is ro, rw (default) or ov. Repeatable; applied in order
    #[arg(long = "mount", value_name = "HOST:GUEST[:MODE]", value_parser = parse_mount)]
    mounts: Vec<MountSpec>,

    /// Host directory for the overlay upper/work layers (enables persistence)
    #[arg(long, value_name = "DIR")]
    persist: Option<PathBuf>,

    /// Executable prepended to the command vector
    #[arg(long, value_name = "PATH")]
    entrypoint: Option<PathBuf>,

    /// In-namespace UID to run as
    #[arg(long, value_name = "UID", default_value_t = 0)]
    uid: u32,

    /// In-namespace GID to run as
    #[arg(long, value_name = "GID", default_value_t = 0)]
    gid: u32,

    /// Size of the ephemeral workspace tmpfs
    #[arg(long, value_name = "SIZE", default_value = "1G")]
    tmpfs_size: String,

    /// Mount overlays with the userxattr option (user-namespace-nested overlayfs)
    #[arg(long)]
    userxattr: bool,

    /// UTS hostname inside the sandbox
    #[arg(long, value_name = "NAME")]
    hostname: Option<String>,

    /// Command to run inside the sandbox
    #[arg(value_name = "CMD", trailing_var_arg = true)]
    command: Vec<String>,
}

fn parse_mount(s: &str) -> Result<MountSpec, String> {
    s.parse().map_err(|e: ConfigError| e.to_string())
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            err.print().ok();
            // Help goes to stdout and succeeds; everything else is a
            // configuration error.
            exit(if err.kind() == ErrorKind::DisplayHelp { 0 } else { 1 });
        }
    };

    let mode = match Mode::detect() {
        Ok(mode) => mode,
        Err(err) => {
            eprintln!("ERROR: {err}");
            exit(1);
        }
    };
    let host = HostIdentity::detect();

    let mut cfg = Config::new(cli.rootfs, cli.command)
        .mounts(cli.mounts)
        .identity(cli.uid, cli.gid)
        .tmpfs_size(cli.tmpfs_size)
        .userxattr(cli.userxattr)
        .verbose(cli.verbose);
    cfg.cwd = cli.cd;
    cfg.persist_dir = cli.persist;
    cfg.entrypoint = cli.entrypoint;
    cfg.hostname = cli.hostname;

    if let Err(err) = cfg.validate() {
        eprintln!("ERROR: {err}");
        exit(1);
    }

    launcher::run(&cfg, mode, host).propagate()
}
