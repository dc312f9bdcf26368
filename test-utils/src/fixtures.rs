use ffuforge::config::BuildConfig;
use ffuforge::provider::RetryPolicy;
use std::path::Path;

/// Direct-capture build rooted at `dir`, with fast polling and a real
/// (empty) base image file.
pub fn direct_config(dir: &Path) -> BuildConfig {
    let image = dir.join("install.wim");
    std::fs::write(&image, b"wim").unwrap_or_else(|e| panic!("write {}: {e}", image.display()));
    BuildConfig {
        work_dir: dir.join("work"),
        base_image: Some(image),
        state_poll_interval_ms: 1,
        vm_start_timeout_secs: 5,
        vm_shutdown_timeout_secs: 5,
        cancel_grace_period_secs: 1,
        mount_retry: RetryPolicy {
            attempts: 3,
            initial_backoff_ms: 1,
        },
        ..BuildConfig::default()
    }
}

/// Install-then-capture build: [`direct_config`] plus apps and capture ISOs.
pub fn install_config(dir: &Path) -> BuildConfig {
    let apps = dir.join("apps.iso");
    let capture = dir.join("capture.iso");
    for iso in [&apps, &capture] {
        std::fs::write(iso, b"iso").unwrap_or_else(|e| panic!("write {}: {e}", iso.display()));
    }
    BuildConfig {
        apps_iso: Some(apps),
        capture_iso: Some(capture),
        ..direct_config(dir)
    }
}
