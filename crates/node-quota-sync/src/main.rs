use std::path::Path;

use anyhow::Context;
use anyhow::Result;
use api_types::NodeQuotaConfig;
use clap::Parser;
use kube::CustomResourceExt;
use node_quota_sync::config::Cli;
use node_quota_sync::config::Commands;
use node_quota_sync::config::RunArgs;
use node_quota_sync::infrastructure::controller;
use node_quota_sync::infrastructure::kube_client;
use node_quota_sync::infrastructure::logging;
use utils::version;

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_global_hooks();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(run_args) => run_controller(*run_args).await,
        Commands::Crd => print_crd(),
        Commands::Validate(validate_args) => validate_manifest(&validate_args.file),
    }
}

async fn run_controller(run_args: RunArgs) -> Result<()> {
    let _guard = logging::init(run_args.metrics_file.as_deref())?;

    tracing::info!("Starting node-quota-sync {}", &**version::VERSION);

    let client = kube_client::init_kube_client(run_args.kubeconfig.clone())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {e:?}"))?;

    controller::run_controller(client, &run_args)
        .await
        .map_err(|e| anyhow::anyhow!("Controller failed: {e:?}"))?;

    Ok(())
}

fn print_crd() -> Result<()> {
    let crd = serde_yaml::to_string(&NodeQuotaConfig::crd()).context("serialize CRD failed")?;
    print!("{crd}");
    Ok(())
}

fn validate_manifest(path: &Path) -> Result<()> {
    utils::logging::init();

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("read manifest {} failed", path.display()))?;
    let config: NodeQuotaConfig = serde_yaml::from_str(&content)
        .with_context(|| format!("parse manifest {} failed", path.display()))?;

    if let Err(errors) = config.spec.validate() {
        for error in &errors {
            tracing::error!("{error}");
        }
        anyhow::bail!(
            "{} has {} validation error(s)",
            path.display(),
            errors.len()
        );
    }

    println!("{}: ok", path.display());
    Ok(())
}
