//! Integration tests for the build phase orchestrator.

use ffuforge::channel::{BuildChannel, BuildState, MessageLevel};
use ffuforge::cleanup::{CleanupKind, CleanupResult};
use ffuforge::config::BuildConfig;
use ffuforge::orchestrator::{BuildOrchestrator, BuildPhase, StepOutcome};
use ffuforge_shared::constants::memory::GIB;
use ffuforge_shared::errors::FfuError;
use ffuforge_test_utils::{FakeProvider, FakeSteps, Journal, direct_config, install_config};
use std::sync::Arc;
use tempfile::TempDir;

struct Harness {
    journal: Journal,
    provider: Arc<FakeProvider>,
    steps: Arc<FakeSteps>,
    channel: BuildChannel,
    orchestrator: BuildOrchestrator,
    config: Arc<BuildConfig>,
}

fn harness_with(config: BuildConfig, provider: FakeProvider, steps: FakeSteps, journal: Journal) -> Harness {
    let provider = Arc::new(provider);
    let steps = Arc::new(steps);
    let channel = BuildChannel::default();
    let config = Arc::new(config);
    let orchestrator = BuildOrchestrator::new(
        config.clone(),
        provider.clone(),
        steps.clone(),
        channel.clone(),
    );
    Harness {
        journal,
        provider,
        steps,
        channel,
        orchestrator,
        config,
    }
}

fn harness(config: BuildConfig) -> Harness {
    let journal = Journal::new();
    harness_with(
        config,
        FakeProvider::new(journal.clone()),
        FakeSteps::new(journal.clone()),
        journal,
    )
}

fn cleanup_kinds(report: &ffuforge::orchestrator::BuildReport) -> Vec<CleanupKind> {
    report.cleanup.iter().map(|o| o.kind).collect()
}

#[tokio::test]
async fn test_direct_build_completes() {
    let dir = TempDir::new().unwrap();
    let mut h = harness(direct_config(dir.path()));

    let report = h.orchestrator.run().await;

    assert_eq!(report.state, BuildState::Completed, "{:?}", report.error);
    assert_eq!(h.channel.state(), BuildState::Completed);
    assert!(h.orchestrator.registry().is_empty());
    assert!(report.cleanup.is_empty());

    let ffu = report.ffu_path.clone().unwrap();
    assert!(ffu.exists());
    // build disk is deleted unless keep_disk is set
    assert!(!h.config.resolved_disk_path().exists());
    assert!(!h.journal.called("create_vm"));
    assert!(h.journal.called("capture_from_disk"));

    let messages = h.channel.drain(usize::MAX);
    assert_eq!(messages.last().unwrap().level, MessageLevel::Success);
}

#[tokio::test]
async fn test_install_build_completes_and_tears_down_vm() {
    let dir = TempDir::new().unwrap();
    let mut h = harness(install_config(dir.path()));

    let report = h.orchestrator.run().await;

    assert_eq!(report.state, BuildState::Completed, "{:?}", report.error);
    assert!(h.orchestrator.registry().is_empty());
    assert!(!h.provider.vm_exists(&h.config.vm_name));
    assert!(!h.steps.user_exists("ffu_user"));
    assert!(!h.steps.share_exists("FFUCaptureShare"));
    assert!(report.ffu_path.unwrap().exists());

    let j = &h.journal;
    assert_eq!(j.count("start_vm"), 2);
    assert!(j.position("create_vm") < j.position("start_vm"));
    assert!(j.position("create_capture_share") < j.position("collect_guest_capture"));
    assert!(j.position("collect_guest_capture") < j.position("remove_vm"));
    assert!(!j.called("capture_from_disk"));

    let messages = h.channel.drain(usize::MAX);
    assert_eq!(messages.last().unwrap().level, MessageLevel::Success);
}

#[tokio::test]
async fn test_progress_is_phase_weighted_and_monotonic() {
    let dir = TempDir::new().unwrap();
    let mut h = harness(install_config(dir.path()));

    h.orchestrator.run().await;

    let percents: Vec<u8> = h
        .channel
        .drain(usize::MAX)
        .iter()
        .filter_map(|m| m.percent())
        .collect();
    assert!(percents.windows(2).all(|w| w[0] <= w[1]), "{percents:?}");
    assert_eq!(percents.first(), Some(&0));
    assert_eq!(percents.last(), Some(&100));
    assert!(percents.contains(&BuildPhase::Capture.start_percent()));
}

#[tokio::test]
async fn test_keep_disk_leaves_build_disk() {
    let dir = TempDir::new().unwrap();
    let config = BuildConfig {
        keep_disk: true,
        ..direct_config(dir.path())
    };
    let mut h = harness(config);

    let report = h.orchestrator.run().await;

    assert!(report.is_success());
    assert!(h.config.resolved_disk_path().exists());
    assert!(h.orchestrator.registry().is_empty());
}

#[tokio::test]
async fn test_low_memory_fails_validation_without_vm() {
    let dir = TempDir::new().unwrap();
    let config = BuildConfig {
        memory_bytes: GIB,
        ..install_config(dir.path())
    };
    let mut h = harness(config);

    let report = h.orchestrator.run().await;

    assert_eq!(report.state, BuildState::Failed);
    assert_eq!(report.failed_phase, Some(BuildPhase::Validate));
    assert_eq!(report.error_kind, Some("validation"));
    assert!(report.error.as_deref().unwrap().contains("memory"));
    assert!(!h.journal.called("create_vm"));
    assert!(!h.journal.called("new_virtual_disk"));
    assert!(report.cleanup.is_empty());

    let errors: Vec<_> = h
        .channel
        .drain(usize::MAX)
        .into_iter()
        .filter(|m| m.level == MessageLevel::Error)
        .collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("memory"));
}

#[tokio::test]
async fn test_unavailable_provider_fails_before_any_phase() {
    let dir = TempDir::new().unwrap();
    let journal = Journal::new();
    let mut h = harness_with(
        direct_config(dir.path()),
        FakeProvider::new(journal.clone()).unavailable(),
        FakeSteps::new(journal.clone()),
        journal,
    );

    let report = h.orchestrator.run().await;

    assert_eq!(report.state, BuildState::Failed);
    assert_eq!(report.error_kind, Some("provider_unavailable"));
    assert_eq!(h.journal.ops(), vec!["test_available"]);
    assert!(
        h.channel
            .drain(usize::MAX)
            .iter()
            .all(|m| m.percent().is_none())
    );
}

#[tokio::test]
async fn test_cancel_during_prepare_disk_observed_at_create_vm() {
    let dir = TempDir::new().unwrap();
    let mut h = harness(install_config(dir.path()));
    let channel = h.channel.clone();
    h.steps
        .behaviour()
        .on_call("apply_base_image", move || {
            channel.request_cancellation();
        });

    let report = h.orchestrator.run().await;

    assert_eq!(report.state, BuildState::Cancelled);
    assert_eq!(h.channel.state(), BuildState::Cancelled);
    assert_eq!(report.failed_phase, Some(BuildPhase::CreateVm));
    assert!(!h.journal.called("create_vm"));

    // the mount was released inside the phase; only the disk remained
    assert_eq!(cleanup_kinds(&report), vec![CleanupKind::VirtualDisk]);
    assert_eq!(report.cleanup[0].result, CleanupResult::Removed);
    assert!(!h.config.resolved_disk_path().exists());
    assert!(h.orchestrator.registry().is_empty());

    let messages = h.channel.drain(usize::MAX);
    assert!(messages.iter().any(|m| {
        m.level == MessageLevel::Warning && m.message.contains("create_vm")
    }));
}

#[tokio::test]
async fn test_attach_iso_failure_removes_vm_before_disk() {
    let dir = TempDir::new().unwrap();
    let mut h = harness(install_config(dir.path()));
    h.provider
        .behaviour()
        .fail_on("attach_iso", || FfuError::Provisioning("no DVD controller".into()));

    let report = h.orchestrator.run().await;

    assert_eq!(report.state, BuildState::Failed);
    assert_eq!(report.failed_phase, Some(BuildPhase::CreateVm));
    assert_eq!(
        cleanup_kinds(&report),
        vec![CleanupKind::Vm, CleanupKind::VirtualDisk]
    );
    assert!(report.cleanup.iter().all(|o| o.is_success()));
    assert!(!h.provider.vm_exists(&h.config.vm_name));
    assert!(!h.config.resolved_disk_path().exists());
    assert!(h.orchestrator.registry().is_empty());

    let errors: Vec<_> = h
        .channel
        .drain(usize::MAX)
        .into_iter()
        .filter(|m| m.level == MessageLevel::Error)
        .collect();
    assert!(errors[0].message.contains("no DVD controller"));
}

#[tokio::test]
async fn test_cancellation_before_each_checkpoint() {
    // (operation that requests cancellation, checkpoint expected to observe it)
    let cases = [
        ("acquire_resources", BuildPhase::PrepareDisk),
        ("apply_base_image", BuildPhase::CreateVm),
        ("attach_iso", BuildPhase::RunGuestWorkload),
        ("start_vm", BuildPhase::Capture),
        ("collect_guest_capture", BuildPhase::InjectPostCaptureContent),
        ("inject_post_capture", BuildPhase::Package),
    ];

    for (op, expected) in cases {
        let dir = TempDir::new().unwrap();
        let mut h = harness(install_config(dir.path()));
        let channel = h.channel.clone();
        let cancel = move || {
            channel.request_cancellation();
        };
        if matches!(op, "attach_iso" | "start_vm") {
            h.provider.behaviour().on_call(op, cancel);
        } else {
            h.steps.behaviour().on_call(op, cancel);
        }

        let report = h.orchestrator.run().await;

        assert_eq!(report.state, BuildState::Cancelled, "cancel in {op}");
        assert_eq!(report.failed_phase, Some(expected), "cancel in {op}");
        assert!(h.orchestrator.registry().is_empty(), "cancel in {op}");
        assert!(report.cleanup.iter().all(|o| o.is_success()), "cancel in {op}");
        assert!(!h.provider.vm_exists(&h.config.vm_name), "cancel in {op}");
        assert!(!h.config.resolved_disk_path().exists(), "cancel in {op}");
        assert!(!h.config.resolved_output_path().exists(), "cancel in {op}");
        assert!(!h.journal.called("package"), "cancel in {op}");
    }
}

#[tokio::test]
async fn test_cancel_before_start_touches_nothing() {
    let dir = TempDir::new().unwrap();
    let mut h = harness(direct_config(dir.path()));
    h.channel.request_cancellation();
    h.channel.request_cancellation();

    let report = h.orchestrator.run().await;

    assert_eq!(report.state, BuildState::Cancelled);
    assert_eq!(report.failed_phase, Some(BuildPhase::Validate));
    assert!(report.cleanup.is_empty());
    assert_eq!(h.journal.ops(), vec!["test_available"]);
}

#[tokio::test]
async fn test_failed_teardown_is_reported_not_escalated() {
    let dir = TempDir::new().unwrap();
    let mut h = harness(install_config(dir.path()));
    h.provider
        .behaviour()
        .fail_on("remove_vm", || FfuError::Provisioning("VM is locked".into()));
    h.steps
        .behaviour()
        .fail_on("create_capture_user", || FfuError::ExternalTool {
            tool: "powershell.exe".into(),
            code: Some(1),
            detail: "Access is denied.".into(),
        });

    let report = h.orchestrator.run().await;

    assert_eq!(report.state, BuildState::Failed);
    assert_eq!(report.failed_phase, Some(BuildPhase::Capture));
    assert_eq!(report.error_kind, Some("external_tool"));
    let vm = report.cleanup.iter().find(|o| o.kind == CleanupKind::Vm).unwrap();
    assert!(matches!(vm.result, CleanupResult::Failed(_)));
    // the disk is still removed after the VM teardown failed
    let disk = report
        .cleanup
        .iter()
        .find(|o| o.kind == CleanupKind::VirtualDisk)
        .unwrap();
    assert!(disk.is_success());
    assert_eq!(report.pending_cleanup, vec![format!("vm {}", h.config.vm_name)]);
    assert_eq!(h.orchestrator.registry().len(), 1);
}

#[tokio::test]
async fn test_guest_that_never_powers_off_times_out() {
    let dir = TempDir::new().unwrap();
    let journal = Journal::new();
    let config = BuildConfig {
        vm_shutdown_timeout_secs: 0,
        ..install_config(dir.path())
    };
    let mut h = harness_with(
        config,
        FakeProvider::new(journal.clone()).with_running_polls(u32::MAX),
        FakeSteps::new(journal.clone()),
        journal,
    );

    let report = h.orchestrator.run().await;

    assert_eq!(report.state, BuildState::Failed);
    assert_eq!(report.failed_phase, Some(BuildPhase::RunGuestWorkload));
    assert_eq!(report.error_kind, Some("operation_timeout"));
    assert!(!h.provider.vm_exists(&h.config.vm_name));
}

#[tokio::test]
async fn test_unavailable_error_after_provisioning_still_cleans_up() {
    let dir = TempDir::new().unwrap();
    let mut h = harness(install_config(dir.path()));
    h.provider.behaviour().fail_on("start_vm", || {
        FfuError::ProviderUnavailable("vmrest is not reachable: connection refused".into())
    });

    let report = h.orchestrator.run().await;

    assert_eq!(report.state, BuildState::Failed);
    assert_eq!(report.failed_phase, Some(BuildPhase::RunGuestWorkload));
    assert_eq!(report.error_kind, Some("provider_unavailable"));
    assert_eq!(
        cleanup_kinds(&report),
        vec![CleanupKind::Iso, CleanupKind::Vm, CleanupKind::VirtualDisk]
    );
    assert!(report.pending_cleanup.is_empty());
    assert!(h.orchestrator.registry().is_empty());
    assert!(!h.provider.vm_exists(&h.config.vm_name));
    assert!(!h.config.resolved_disk_path().exists());
}

#[tokio::test]
async fn test_vm_deleted_during_guest_workload_fails_fast() {
    let dir = TempDir::new().unwrap();
    let journal = Journal::new();
    let config = BuildConfig {
        vm_shutdown_timeout_secs: 3600,
        ..install_config(dir.path())
    };
    let mut h = harness_with(
        config,
        FakeProvider::new(journal.clone()).losing_running_vm(),
        FakeSteps::new(journal.clone()),
        journal,
    );

    let report = tokio::time::timeout(std::time::Duration::from_secs(10), h.orchestrator.run())
        .await
        .unwrap();

    assert_eq!(report.state, BuildState::Failed);
    assert_eq!(report.failed_phase, Some(BuildPhase::RunGuestWorkload));
    assert_eq!(report.error_kind, Some("vm_not_found"));
    assert_eq!(h.journal.count("vm_exists"), 1);
    // the VM is already gone; its teardown counts as done
    assert!(report.cleanup.iter().all(|o| o.is_success()));
    assert!(report.pending_cleanup.is_empty());
    assert!(!h.config.resolved_disk_path().exists());
}

#[tokio::test]
async fn test_skipped_steps_are_reported() {
    let dir = TempDir::new().unwrap();
    let journal = Journal::new();
    let mut h = harness_with(
        direct_config(dir.path()),
        FakeProvider::new(journal.clone()),
        FakeSteps::new(journal.clone())
            .with_acquire_outcome(StepOutcome::Skipped("no drivers directory configured".into()))
            .with_inject_outcome(StepOutcome::Skipped("nothing to inject".into())),
        journal,
    );

    let report = h.orchestrator.run().await;

    assert!(report.is_success());
    let skipped: Vec<_> = h
        .channel
        .drain(usize::MAX)
        .into_iter()
        .filter(|m| m.message.contains("skipped"))
        .collect();
    assert_eq!(skipped.len(), 2);
}

#[tokio::test]
async fn test_orchestrator_runs_once() {
    let dir = TempDir::new().unwrap();
    let mut h = harness(direct_config(dir.path()));

    assert!(h.orchestrator.run().await.is_success());
    let second = h.orchestrator.run().await;

    assert_eq!(second.state, BuildState::Completed);
    assert_eq!(second.error_kind, Some("invalid_state"));
    assert_eq!(h.journal.count("capture_from_disk"), 1);
}
