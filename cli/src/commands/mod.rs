//! CLI command definitions and dispatch.

mod publish;
mod run;
mod version;

use std::sync::Arc;

use clap::{Parser, Subcommand};
use jctl_core::JctlConfig;
use jctl_runtime::{GoCompiler, GoToolchain, RegistryPuller, RegistryPusher, Workflow};

/// jctl - run a Go program as a Kubernetes Job.
#[derive(Parser)]
#[command(name = "jctl", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Build, publish and run a program as a Job, then wait for it
    Run(run::RunArgs),
    /// Build and publish a program image without running it
    Publish(publish::PublishArgs),
    /// Show version information
    Version(version::VersionArgs),
}

/// Dispatch a parsed CLI command to its handler.
pub async fn dispatch(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Command::Run(args) => run::execute(args).await,
        Command::Publish(args) => publish::execute(args).await,
        Command::Version(args) => version::execute(args).await,
    }
}

/// Validate the configuration, fetch the base image and wire the Go
/// toolchain and registry client into a workflow.
async fn build_workflow(
    config: JctlConfig,
    quiet: bool,
) -> Result<Workflow, Box<dyn std::error::Error>> {
    config.validate()?;

    let base = RegistryPuller::new().pull_base(&config.base_image).await?;
    let workflow = Workflow::new(
        config,
        Arc::new(GoToolchain::new()),
        Arc::new(GoCompiler::new()),
        base,
        Arc::new(RegistryPusher::new()),
    )?
    .quiet(quiet);
    Ok(workflow)
}
