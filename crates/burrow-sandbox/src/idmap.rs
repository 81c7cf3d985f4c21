//! UID/GID translation tables for the new user namespace.
//!
//! The namespace-init cannot write its own maps: by the time it would, its
//! capabilities in the *parent* namespace are gone. The outside process
//! writes them instead, between the child's "ready" and "go" handshake
//! bytes, establishing a one-entry identity map from the host uid/gid to
//! the caller-chosen in-namespace uid/gid.
//!
//! Ordering is kernel-mandated: `uid_map`, then `setgroups` (denied —
//! required before an unprivileged writer may touch `gid_map`), then
//! `gid_map`. Each file accepts exactly one write.

use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;

fn proc_file(pid: libc::pid_t, name: &str) -> PathBuf {
    PathBuf::from(format!("/proc/{pid}/{name}"))
}

/// Write `bytes` with a single `write(2)`; a short write is an error.
///
/// The map files permit one write per opened descriptor, so a buffered or
/// retried writer would corrupt the transaction instead of completing it.
fn write_once(pid: libc::pid_t, name: &str, bytes: &[u8]) -> io::Result<()> {
    let file = OpenOptions::new().write(true).open(proc_file(pid, name))?;
    let n = rustix::io::write(&file, bytes)?;
    if n != bytes.len() {
        return Err(io::Error::new(
            io::ErrorKind::WriteZero,
            format!("short write to /proc/{pid}/{name}"),
        ));
    }
    Ok(())
}

/// Install the ID maps for the namespace-init `pid`, mapping host
/// `src_uid`/`src_gid` to in-namespace `dst_uid`/`dst_gid`.
pub fn configure_user_namespace(
    pid: libc::pid_t,
    src_uid: u32,
    src_gid: u32,
    dst_uid: u32,
    dst_gid: u32,
    verbose: bool,
) -> io::Result<()> {
    if verbose {
        eprintln!(
            "--> Mapping {src_uid}:{src_gid} to {dst_uid}:{dst_gid} within container namespace"
        );
    }

    write_once(pid, "uid_map", uid_map_line(dst_uid, src_uid).as_bytes())?;
    write_once(pid, "setgroups", b"deny\0")?;
    write_once(pid, "gid_map", gid_map_line(dst_gid, src_gid).as_bytes())
}

fn uid_map_line(dst: u32, src: u32) -> String {
    format!("{dst}\t{src}\t1\n")
}

fn gid_map_line(dst: u32, src: u32) -> String {
    format!("{dst}\t{src}\t1")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_lines_are_single_entry() {
        assert_eq!(uid_map_line(0, 1000), "0\t1000\t1\n");
        assert_eq!(gid_map_line(0, 1000), "0\t1000\t1");
    }

    #[test]
    fn missing_process_reports_not_found() {
        // PID 0 never has a /proc entry of its own.
        let err = configure_user_namespace(0, 1000, 1000, 0, 0, false).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
