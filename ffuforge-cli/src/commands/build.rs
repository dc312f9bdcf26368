use clap::Args;
use ffuforge::provider::host_check::check_host_support;
use ffuforge::{BuildConfig, BuildController, BuildMessage, MessageLevel, ProviderKind};
use ffuforge_shared::constants::memory::GIB;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct BuildArgs {
    /// Build configuration file (JSON)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Hypervisor backend (hyperv, workstation)
    #[arg(long)]
    pub provider: Option<ProviderKind>,

    /// WIM or ESD applied to the build disk
    #[arg(long)]
    pub base_image: Option<PathBuf>,

    /// Application media; installs apps in a VM before capture
    #[arg(long)]
    pub apps_iso: Option<PathBuf>,

    /// Capture media booted after the application install
    #[arg(long)]
    pub capture_iso: Option<PathBuf>,

    /// Drivers injected into the captured image
    #[arg(long)]
    pub drivers_dir: Option<PathBuf>,

    /// Where to write the FFU
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    #[arg(long)]
    pub vm_name: Option<String>,

    /// VM memory in GiB
    #[arg(long)]
    pub memory_gb: Option<u64>,

    #[arg(long)]
    pub processors: Option<u32>,

    /// Build disk size in GiB
    #[arg(long)]
    pub disk_size_gb: Option<u64>,

    /// Keep the build disk after a successful build
    #[arg(long)]
    pub keep_disk: bool,

    /// Optimize the FFU after capture
    #[arg(long)]
    pub optimize: bool,

    /// Open the VM console while the guest runs
    #[arg(long)]
    pub show_console: bool,
}

impl BuildArgs {
    fn apply(&self, config: &mut BuildConfig) {
        if let Some(provider) = self.provider {
            config.provider = provider;
        }
        if let Some(path) = &self.base_image {
            config.base_image = Some(path.clone());
        }
        if let Some(path) = &self.apps_iso {
            config.apps_iso = Some(path.clone());
        }
        if let Some(path) = &self.capture_iso {
            config.capture_iso = Some(path.clone());
        }
        if let Some(path) = &self.drivers_dir {
            config.drivers_dir = Some(path.clone());
        }
        if let Some(path) = &self.output {
            config.output_path = Some(path.clone());
        }
        if let Some(name) = &self.vm_name {
            config.vm_name = name.clone();
        }
        if let Some(gb) = self.memory_gb {
            config.memory_bytes = gb.saturating_mul(GIB);
        }
        if let Some(count) = self.processors {
            config.processor_count = count;
        }
        if let Some(gb) = self.disk_size_gb {
            config.disk_size_bytes = gb.saturating_mul(GIB);
        }
        config.keep_disk |= self.keep_disk;
        config.optimize |= self.optimize;
        config.show_console |= self.show_console;
    }
}

pub async fn execute(args: BuildArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    let mut config = global.load_config(args.config.as_deref())?;
    args.apply(&mut config);
    config.validate()?;
    check_host_support(config.provider)?;

    let grace = config.cancel_grace_period();
    let controller = BuildController::for_host(config).await?;
    let mut handle = controller.launch()?;
    tracing::info!(id = %handle.id(), "Build started");

    let interrupted = tokio::select! {
        _ = handle.follow(print_message) => false,
        _ = shutdown_signal() => true,
    };
    if interrupted {
        eprintln!("Cancelling build; cleaning up...");
        if !handle.cancel_within(grace, print_message).await {
            eprintln!("Build did not stop within {}s; terminated", grace.as_secs());
        }
    }

    let summary = handle.wait().await;
    if summary.is_success() {
        println!("{summary}");
        Ok(())
    } else {
        anyhow::bail!("{summary}")
    }
}

fn print_message(message: &BuildMessage) {
    let time = message.timestamp.with_timezone(&chrono::Local).format("%H:%M:%S");
    match (message.level, message.percent()) {
        (_, Some(percent)) => eprintln!("{time} [{percent:>3}%] {}", message.message),
        (MessageLevel::Debug, _) => {}
        (level, _) => eprintln!("{time} {:<8} {}", level.as_str().to_uppercase(), message.message),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to install Ctrl+C handler: {}", e);
        std::future::pending::<()>().await;
    }
}
