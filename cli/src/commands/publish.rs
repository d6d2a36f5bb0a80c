//! `jctl publish` command - build and push a program image.

use clap::Args;
use jctl_core::JctlConfig;

#[derive(Args)]
pub struct PublishArgs {
    /// Program path (".", "./cmd/hello" or "github.com/x/hello")
    pub path: String,

    /// Only print the published reference
    #[arg(short, long)]
    pub quiet: bool,
}

pub async fn execute(args: PublishArgs) -> Result<(), Box<dyn std::error::Error>> {
    let workflow = super::build_workflow(JctlConfig::from_env(), args.quiet).await?;
    let published = workflow.publish(&args.path).await?;

    if args.quiet {
        println!("{}", published.reference);
    } else {
        println!("Published: {} ({})", published.program, published.reference);
    }
    Ok(())
}
