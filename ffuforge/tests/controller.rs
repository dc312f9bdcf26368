//! Launching, following and cancelling builds through the controller.

use ffuforge::channel::{BuildMessage, BuildState, MessageLevel};
use ffuforge::config::BuildConfig;
use ffuforge::controller::{BuildController, CleanupStatus};
use ffuforge::orchestrator::BuildPhase;
use ffuforge_shared::errors::FfuError;
use ffuforge_test_utils::{FakeProvider, FakeSteps, Journal, direct_config, install_config};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn controller(config: BuildConfig, journal: &Journal) -> (BuildController, Arc<FakeProvider>, Arc<FakeSteps>) {
    let provider = Arc::new(FakeProvider::new(journal.clone()));
    let steps = Arc::new(FakeSteps::new(journal.clone()));
    let controller = BuildController::new(Arc::new(config), provider.clone(), steps.clone());
    (controller, provider, steps)
}

#[tokio::test]
async fn test_launch_and_follow_to_completion() {
    let dir = TempDir::new().unwrap();
    let journal = Journal::new();
    let (controller, provider, _) = controller(install_config(dir.path()), &journal);

    let mut handle = controller.launch().unwrap();
    let mut seen: Vec<BuildMessage> = Vec::new();
    handle.follow(|m| seen.push(m.clone())).await;
    let summary = handle.wait().await;

    assert!(summary.is_success(), "{summary}");
    assert_eq!(summary.cleanup, CleanupStatus::Complete);
    assert!(summary.ffu_path.as_ref().unwrap().exists());
    assert!(summary.to_string().starts_with("Build completed: "));
    assert!(!provider.vm_exists("_FFU-Build"));

    assert_eq!(seen.last().unwrap().level, MessageLevel::Success);
    let percents: Vec<u8> = seen.iter().filter_map(|m| m.percent()).collect();
    assert!(percents.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(percents.last(), Some(&100));
}

#[tokio::test]
async fn test_failure_summary_carries_last_error() {
    let dir = TempDir::new().unwrap();
    let journal = Journal::new();
    let (controller, provider, _) = controller(install_config(dir.path()), &journal);
    provider
        .behaviour()
        .fail_on("create_vm", || FfuError::Provisioning("switch 'Default Switch' not found".into()));

    let mut handle = controller.launch().unwrap();
    handle.follow(|_| {}).await;
    let summary = handle.wait().await;

    assert_eq!(summary.state, BuildState::Failed);
    assert_eq!(summary.failed_phase, Some(BuildPhase::CreateVm));
    assert!(summary.last_error.as_deref().unwrap().contains("Default Switch"));
    assert_eq!(summary.cleanup, CleanupStatus::Complete);
    assert!(!journal.called("start_vm"));
}

#[tokio::test]
async fn test_work_dir_admits_one_build() {
    let dir = TempDir::new().unwrap();
    let journal = Journal::new();
    let (first, _, steps) = controller(direct_config(dir.path()), &journal);
    steps.behaviour().stall_on("acquire_resources");

    let mut handle = first.launch().unwrap();

    let (second, _, _) = controller(direct_config(dir.path()), &journal);
    let err = second.launch().unwrap_err();
    assert!(matches!(err, FfuError::InvalidState(_)));

    handle.cancel_within(Duration::from_millis(50), |_| {}).await;
    handle.wait().await;

    // the lock goes with the aborted worker
    let (third, _, _) = controller(direct_config(dir.path()), &journal);
    let mut handle = third.launch().unwrap();
    handle.follow(|_| {}).await;
    assert!(handle.wait().await.is_success());
}

#[tokio::test]
async fn test_cancel_is_observed_and_cleaned_up() {
    let dir = TempDir::new().unwrap();
    let journal = Journal::new();
    let (controller, _, _) = controller(direct_config(dir.path()), &journal);

    let mut handle = controller.launch().unwrap();
    assert!(handle.cancel());
    assert!(!handle.cancel());

    let mut warnings = 0;
    let stopped = handle
        .cancel_within(Duration::from_secs(5), |m| {
            if m.level == MessageLevel::Warning {
                warnings += 1;
            }
        })
        .await;
    let summary = handle.wait().await;

    assert!(stopped);
    assert!(warnings >= 1);
    assert_eq!(summary.state, BuildState::Cancelled);
    assert_eq!(summary.cleanup, CleanupStatus::Complete);
    assert!(!journal.called("new_virtual_disk"));
}

#[tokio::test]
async fn test_unresponsive_worker_is_terminated() {
    let dir = TempDir::new().unwrap();
    let journal = Journal::new();
    let (controller, _, steps) = controller(direct_config(dir.path()), &journal);
    steps.behaviour().stall_on("apply_base_image");

    let mut handle = controller.launch().unwrap();
    while !journal.called("apply_base_image") {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let stopped = handle.cancel_within(Duration::from_millis(100), |_| {}).await;
    let summary = handle.wait().await;

    assert!(!stopped);
    assert_eq!(summary.state, BuildState::Failed);
    assert_eq!(summary.cleanup, CleanupStatus::NotRun);
    assert!(summary.to_string().contains("Cleanup did not run"));
}
