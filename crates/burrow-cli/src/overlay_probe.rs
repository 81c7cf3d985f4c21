//! burrow-overlay-probe — can the launcher's overlay work here?
//!
//! Performs the same rootfs-over-itself overlay the launcher would, on a
//! candidate scratch location, inside a disposable set of namespaces, and
//! reports the outcome via exit status (0 = works, 1 = doesn't). Used by
//! orchestration layers to pick a workable scratch directory on hosts
//! with idiosyncratic filesystem support:
//!
//! ```text
//! burrow-overlay-probe --verbose --userxattr --tmpfs ${HOME}/rootfs /tmp
//! ```

use std::path::PathBuf;
use std::process::exit;

use clap::Parser;
use clap::error::ErrorKind;

use burrow_sandbox::{ProbeConfig, probe};

#[derive(Parser)]
#[command(
    name = "burrow-overlay-probe",
    about = "Probe whether the sandbox overlay mount works on a candidate scratch directory",
    disable_version_flag = true
)]
struct Cli {
    /// Enable progress logging to stderr
    #[arg(short, long)]
    verbose: bool,

    /// Mount a small tmpfs at <SCRATCH_PARENT_DIR>/.probe first
    #[arg(long)]
    tmpfs: bool,

    /// Mount the overlay with the userxattr option
    #[arg(long)]
    userxattr: bool,

    /// In-namespace UID to map to
    #[arg(long, value_name = "UID", default_value_t = 0)]
    uid: u32,

    /// In-namespace GID to map to
    #[arg(long, value_name = "GID", default_value_t = 0)]
    gid: u32,

    /// Candidate root filesystem directory
    #[arg(value_name = "ROOTFS_DIR")]
    rootfs: PathBuf,

    /// Candidate scratch parent directory
    #[arg(value_name = "SCRATCH_PARENT_DIR")]
    scratch_parent: PathBuf,
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            err.print().ok();
            exit(if err.kind() == ErrorKind::DisplayHelp { 0 } else { 1 });
        }
    };

    if cli.verbose {
        eprintln!("verbose overlay probe enabled");
    }

    let cfg = ProbeConfig {
        rootfs: cli.rootfs,
        scratch_parent: cli.scratch_parent,
        tmpfs: cli.tmpfs,
        userxattr: cli.userxattr,
        uid: cli.uid,
        gid: cli.gid,
        verbose: cli.verbose,
    };

    exit(probe::run(&cfg))
}
