//! `jctl run` command - build, publish and run a program as a Job.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use jctl_core::JctlConfig;
use jctl_runtime::KubeClusterClient;

#[derive(Args)]
pub struct RunArgs {
    /// Program path (".", "./cmd/hello" or "github.com/x/hello")
    pub path: String,

    /// Namespace to create the Job in
    #[arg(short, long)]
    pub namespace: Option<String>,

    /// Path to a kubeconfig file (defaults to $KUBECONFIG, then ~/.kube/config)
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,

    /// Seconds to wait for the Job to finish [default: 300]
    #[arg(short, long = "timeout-sec")]
    pub timeout_sec: Option<u64>,

    /// Suppress progress output
    #[arg(short, long)]
    pub quiet: bool,
}

impl RunArgs {
    fn config(&self) -> JctlConfig {
        let mut config = JctlConfig::from_env();
        if let Some(ref namespace) = self.namespace {
            config.namespace = namespace.clone();
        }
        if let Some(ref kubeconfig) = self.kubeconfig {
            config.kubeconfig = Some(kubeconfig.clone());
        }
        if let Some(timeout) = self.timeout_sec {
            config.timeout_secs = timeout;
        }
        config
    }
}

pub async fn execute(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = args.config();
    let kubeconfig = config.kubeconfig.clone();

    let workflow = super::build_workflow(config, args.quiet).await?;
    let cluster = KubeClusterClient::connect(kubeconfig).await?;
    let workflow = workflow.with_cluster(Arc::new(cluster));

    let run = workflow.run(&args.path).await?;
    if args.quiet {
        println!("{}", run.name);
    }
    Ok(())
}
