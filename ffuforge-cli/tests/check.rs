use predicates::prelude::*;

mod common;

#[test]
#[cfg(not(windows))]
fn test_check_rejects_non_windows_host() {
    let mut ctx = common::ffuforge();

    ctx.cmd
        .arg("check")
        .assert()
        .failure()
        .stdout(predicate::str::contains("Compiled backends: "))
        .stderr(predicate::str::contains("require a Windows host"));
}

#[test]
fn test_check_rejects_unknown_provider() {
    let mut ctx = common::ffuforge();

    ctx.cmd
        .args(["check", "--provider", "virtualbox"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown provider"));
}
