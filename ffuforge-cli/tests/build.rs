use predicates::prelude::*;

mod common;

#[test]
fn test_build_help_lists_overrides() {
    let mut ctx = common::ffuforge();

    ctx.cmd
        .args(["build", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--apps-iso"))
        .stdout(predicate::str::contains("--keep-disk"));
}

#[test]
fn test_build_invalid_config_fails_before_host_checks() {
    let mut ctx = common::ffuforge();
    let config = ctx.write_config("");

    ctx.cmd
        .args(["build", "--config"])
        .arg(&config)
        .args(["--disk-size-gb", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("disk_size_bytes must exceed"));

    assert!(!ctx.work_dir().join(".ffuforge.lock").exists());
}

#[test]
#[cfg(not(windows))]
fn test_build_requires_windows_host() {
    let mut ctx = common::ffuforge();
    let config = ctx.write_config("");

    ctx.cmd
        .args(["build", "--config"])
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("require a Windows host"));
}
