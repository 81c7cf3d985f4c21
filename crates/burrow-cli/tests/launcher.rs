//! CLI contract tests for the `burrow` launcher.
//!
//! The parsing and validation tests run anywhere. The end-to-end
//! scenarios need user-namespace permissions and a root filesystem image,
//! so they are `#[ignore]`d and read the image path from
//! `BURROW_TEST_ROOTFS` (skipping with a note when unset):
//!
//! ```bash
//! BURROW_TEST_ROOTFS=/path/to/rootfs cargo test -p burrow-cli -- --ignored
//! ```

use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::Command as StdCommand;

use assert_cmd::Command;
use predicates::prelude::*;

fn burrow() -> Command {
    Command::cargo_bin("burrow").unwrap()
}

/// Rootfs for end-to-end scenarios, or `None` (test logs and bails).
fn test_rootfs() -> Option<PathBuf> {
    match std::env::var("BURROW_TEST_ROOTFS") {
        Ok(path) if !path.is_empty() => Some(PathBuf::from(path)),
        _ => {
            eprintln!("Skipping: BURROW_TEST_ROOTFS not set");
            None
        }
    }
}

#[test]
fn help_exits_zero() {
    burrow()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--rootfs"))
        .stdout(predicate::str::contains("--mount"));
}

#[test]
fn unknown_option_exits_one() {
    burrow()
        .args(["--rootfs", "/r", "--frobnicate", "/bin/true"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn missing_rootfs_exits_one() {
    burrow()
        .arg("/bin/true")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("--rootfs"));
}

#[test]
fn missing_command_exits_one() {
    burrow()
        .args(["--rootfs", "/r"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("no command"));
}

#[test]
fn malformed_mount_spec_exits_one() {
    burrow()
        .args(["--rootfs", "/r", "--mount", "nocolon", "/bin/true"])
        .assert()
        .failure()
        .code(1);
}

#[test]
fn relative_host_path_exits_one() {
    burrow()
        .args(["--rootfs", "/r", "--mount", "relative:/w", "/bin/true"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("absolute"));
}

#[test]
fn unknown_mount_mode_exits_one() {
    burrow()
        .args(["--rootfs", "/r", "--mount", "/a:/w:zz", "/bin/true"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("zz"));
}

#[test]
fn duplicate_guest_path_exits_one() {
    burrow()
        .args([
            "--rootfs",
            "/r",
            "--mount",
            "/a:/w",
            "--mount",
            "/b:/w:ro",
            "/bin/true",
        ])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("duplicate"));
}

#[test]
fn unknown_forced_mode_exits_one() {
    burrow()
        .env("FORCE_SANDBOX_MODE", "superuser")
        .args(["--rootfs", "/r", "/bin/true"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("superuser"));
}

#[test]
#[ignore]
fn stdout_and_stderr_are_captured() {
    let Some(rootfs) = test_rootfs() else { return };
    burrow()
        .args([
            "--rootfs",
            rootfs.to_str().unwrap(),
            "/bin/sh",
            "-c",
            "echo stdout; echo stderr >&2",
        ])
        .assert()
        .success()
        .stdout("stdout\n")
        .stderr(predicate::str::contains("stderr\n"));
}

#[test]
#[ignore]
fn exit_code_propagates() {
    let Some(rootfs) = test_rootfs() else { return };
    burrow()
        .args([
            "--rootfs",
            rootfs.to_str().unwrap(),
            "/bin/sh",
            "-c",
            "exit 17",
        ])
        .assert()
        .code(17);
}

#[test]
#[ignore]
fn rootfs_writes_are_copy_on_write_and_ephemeral() {
    let Some(rootfs) = test_rootfs() else { return };
    // Each run starts from a pristine image: the previous run's write to
    // /bin/science must not be visible, so `cat` sees exactly one line.
    for _ in 0..2 {
        burrow()
            .args([
                "--rootfs",
                rootfs.to_str().unwrap(),
                "/bin/sh",
                "-c",
                "echo a >> /bin/science && cat /bin/science",
            ])
            .assert()
            .success()
            .stdout("a\n");
    }
    assert!(!rootfs.join("bin/science").exists(), "host image modified");
}

#[test]
#[ignore]
fn persist_dir_resumes_rootfs_state() {
    let Some(rootfs) = test_rootfs() else { return };
    let persist = tempfile::tempdir().unwrap();
    let run = |expected: &str| {
        burrow()
            .args([
                "--rootfs",
                rootfs.to_str().unwrap(),
                "--persist",
                persist.path().to_str().unwrap(),
                "/bin/sh",
                "-c",
                "echo a >> /bin/science && cat /bin/science",
            ])
            .assert()
            .success()
            .stdout(expected.to_string());
    };
    run("a\n");
    run("a\na\n");
    assert!(persist.path().join("upper/rootfs").is_dir());
    assert!(persist.path().join("work/rootfs").is_dir());
}

#[test]
#[ignore]
fn readonly_mount_rejects_writes() {
    let Some(rootfs) = test_rootfs() else { return };
    let dir = tempfile::tempdir().unwrap();
    let mount = format!("{}:/ro:ro", dir.path().display());
    burrow()
        .args([
            "--rootfs",
            rootfs.to_str().unwrap(),
            "--mount",
            mount.as_str(),
            "/bin/sh",
            "-c",
            "echo a >> /ro/science",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Read-only file system"));
    assert!(!dir.path().join("science").exists());
}

#[test]
#[ignore]
fn readwrite_mount_is_shared_with_host() {
    let Some(rootfs) = test_rootfs() else { return };
    let dir = tempfile::tempdir().unwrap();
    let mount = format!("{}:/rw", dir.path().display());
    burrow()
        .args([
            "--rootfs",
            rootfs.to_str().unwrap(),
            "--mount",
            mount.as_str(),
            "/bin/sh",
            "-c",
            "echo aperture >> /rw/x && cat /rw/x",
        ])
        .assert()
        .success()
        .stdout("aperture\n");
    assert_eq!(
        std::fs::read_to_string(dir.path().join("x")).unwrap(),
        "aperture\n"
    );
}

#[test]
#[ignore]
fn overlayed_mount_keeps_host_pristine() {
    let Some(rootfs) = test_rootfs() else { return };
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("seed"), "seed\n").unwrap();
    let mount = format!("{}:/ov:ov", dir.path().display());
    burrow()
        .args([
            "--rootfs",
            rootfs.to_str().unwrap(),
            "--mount",
            mount.as_str(),
            "/bin/sh",
            "-c",
            "cat /ov/seed && echo extra >> /ov/seed && echo new > /ov/created",
        ])
        .assert()
        .success()
        .stdout("seed\n");
    assert_eq!(
        std::fs::read_to_string(dir.path().join("seed")).unwrap(),
        "seed\n"
    );
    assert!(!dir.path().join("created").exists());
}

#[test]
#[ignore]
fn working_directory_is_entered_and_created() {
    let Some(rootfs) = test_rootfs() else { return };
    burrow()
        .args([
            "--rootfs",
            rootfs.to_str().unwrap(),
            "--cd",
            "/made/on/demand",
            "/bin/sh",
            "-c",
            "pwd",
        ])
        .assert()
        .success()
        .stdout("/made/on/demand\n");
}

#[test]
#[ignore]
fn hostname_is_set_inside() {
    let Some(rootfs) = test_rootfs() else { return };
    burrow()
        .args([
            "--rootfs",
            rootfs.to_str().unwrap(),
            "--hostname",
            "aperture",
            "/bin/sh",
            "-c",
            "hostname",
        ])
        .assert()
        .success()
        .stdout("aperture\n");
}

#[test]
#[ignore]
fn tmpfs_size_bounds_rootfs_writes() {
    let Some(rootfs) = test_rootfs() else { return };
    burrow()
        .args([
            "--rootfs",
            rootfs.to_str().unwrap(),
            "--tmpfs-size",
            "10M",
            "/bin/sh",
            "-c",
            "dd if=/dev/zero of=/root/x bs=1M count=50",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No space left"));
}

#[test]
#[ignore]
fn signal_death_is_mirrored() {
    let Some(rootfs) = test_rootfs() else { return };
    let exe = assert_cmd::cargo::cargo_bin("burrow");
    let mut child = StdCommand::new(exe)
        .args([
            "--rootfs",
            rootfs.to_str().unwrap(),
            "/bin/sh",
            "-c",
            "sleep 60",
        ])
        .spawn()
        .unwrap();

    // Give the launcher time to reach the inner sleep, then forward.
    std::thread::sleep(std::time::Duration::from_secs(2));
    // SAFETY: signaling the child we just spawned.
    unsafe { libc::kill(child.id() as libc::pid_t, libc::SIGTERM) };

    let status = child.wait().unwrap();
    assert_eq!(status.signal(), Some(libc::SIGTERM));
}
