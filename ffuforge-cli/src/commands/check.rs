use clap::Args;
use ffuforge::ProviderKind;
use ffuforge::provider::create_provider;
use ffuforge::provider::host_check::check_host_support;
use ffuforge::provider::registry::available_providers;

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Backend to check; defaults to the configured one
    #[arg(long)]
    pub provider: Option<ProviderKind>,

    /// Build configuration file (JSON)
    #[arg(short, long)]
    pub config: Option<std::path::PathBuf>,
}

pub async fn execute(args: CheckArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    let config = global.load_config(args.config.as_deref())?;
    let kind = args.provider.unwrap_or(config.provider);

    let compiled: Vec<_> = available_providers().iter().map(|k| k.as_str()).collect();
    println!("Compiled backends: {}", compiled.join(", "));

    let support = check_host_support(kind)?;
    println!("Host: {}", support.reason);

    let provider = create_provider(kind, config.provider_options())?;
    if !provider.test_available().await {
        anyhow::bail!("{kind} is not installed or its service is not running");
    }
    println!("{kind}: available");
    Ok(())
}
