use clap::Args;
use ffuforge::provider::create_provider;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Build configuration file (JSON)
    pub config: PathBuf,

    /// Print the resolved configuration as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(args: ValidateArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    let config = global.load_config(Some(&args.config))?;

    let mut problems = Vec::new();
    if let Err(e) = config.validate() {
        problems.push(e.to_string());
    }

    // Capability checks need the backend but never call the platform.
    let provider = create_provider(config.provider, config.provider_options())?;
    let report = provider.validate_configuration(&config.vm_configuration());
    for warning in &report.warnings {
        eprintln!("Warning: {warning}");
    }
    problems.extend(report.errors.iter().cloned());

    if !problems.is_empty() {
        anyhow::bail!(
            "{} is invalid:\n  {}",
            args.config.display(),
            problems.join("\n  ")
        );
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&config)?);
    } else {
        let path = if config.install_apps() {
            "install then capture"
        } else {
            "direct capture"
        };
        println!(
            "{} is valid ({} on {}, output {})",
            args.config.display(),
            path,
            config.provider,
            config.resolved_output_path().display()
        );
    }
    Ok(())
}
