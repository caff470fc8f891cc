use std::path::PathBuf;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use utils::version;

use crate::infrastructure::metrics::encoders::MetricsFormat;

#[derive(Parser)]
#[command(about, long_about, version = &**version::VERSION)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the quota sync controller
    Run(Box<RunArgs>),
    /// Print the NodeQuotaConfig CRD as YAML
    Crd,
    /// Check a NodeQuotaConfig manifest without contacting a cluster
    Validate(ValidateArgs),
}

#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    #[arg(
        long,
        env = "KUBECONFIG",
        value_hint = clap::ValueHint::FilePath,
        help = "Path to kubeconfig file (defaults to cluster config or ~/.kube/config)"
    )]
    pub kubeconfig: Option<PathBuf>,

    #[arg(
        long,
        env = "NQS_RESYNC_INTERVAL_SECS",
        default_value_t = 300,
        help = "Maximum delay between two passes over the same NodeQuotaConfig"
    )]
    pub resync_interval_secs: u64,

    #[arg(
        long,
        env = "NQS_ERROR_REQUEUE_SECS",
        default_value_t = 30,
        help = "Delay before retrying a pass that failed"
    )]
    pub error_requeue_secs: u64,

    #[arg(
        long,
        env = "NQS_METRICS_FILE",
        value_hint = clap::ValueHint::FilePath,
        help = "File receiving quota metrics, rotated daily, e.g. /logs/metrics.log"
    )]
    pub metrics_file: Option<PathBuf>,

    #[arg(
        long,
        env = "NQS_METRICS_FORMAT",
        value_enum,
        default_value_t = MetricsFormat::Influx,
        help = "Metrics format"
    )]
    pub metrics_format: MetricsFormat,

    #[arg(
        long,
        default_value = "node-quota-sync",
        help = "Field manager recorded on patched objects"
    )]
    pub controller_name: String,
}

#[derive(Args, Clone, Debug)]
pub struct ValidateArgs {
    #[arg(value_hint = clap::ValueHint::FilePath, help = "NodeQuotaConfig manifest (YAML or JSON)")]
    pub file: PathBuf,
}
