use crate::commands;
use clap::{Args, Parser, Subcommand};
use ffuforge::BuildConfig;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "ffuforge", author, version, about = "Build FFU disk images in a throwaway VM")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalFlags,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a build: prepare a disk, run the guest workload, capture an FFU
    Build(commands::build::BuildArgs),
    /// Check that this host can run builds with a hypervisor backend
    Check(commands::check::CheckArgs),
    /// Validate a build configuration without touching the host
    Validate(commands::validate::ValidateArgs),
}

#[derive(Args, Debug)]
pub struct GlobalFlags {
    /// Work directory for build disks, VM files and the build lock
    #[arg(long, global = true, env = "FFUFORGE_HOME")]
    pub work_dir: Option<PathBuf>,

    /// Log verbosity when RUST_LOG is not set
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,
}

impl GlobalFlags {
    /// Load `path` (or defaults) and apply global overrides.
    pub fn load_config(&self, path: Option<&Path>) -> anyhow::Result<BuildConfig> {
        let mut config = match path {
            Some(path) => BuildConfig::from_file(path)?,
            None => BuildConfig::default(),
        };
        if let Some(dir) = &self.work_dir {
            config.work_dir = dir.clone();
        }
        Ok(config)
    }
}
