//! kube-runtime controller driving one pass per `NodeQuotaConfig` event.

use core::error::Error;
use std::sync::Arc;
use std::time::Duration;

use api_types::NodeQuotaConfig;
use error_stack::Report;
use error_stack::ResultExt;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Node;
use kube::api::ListParams;
use kube::runtime::controller::Action;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher;
use kube::runtime::Controller;
use kube::Api;
use kube::Client;
use kube::ResourceExt;

use crate::config::ReconcileSettings;
use crate::config::RunArgs;
use crate::domain::error::QuotaError;
use crate::domain::reconciler::PassOutcome;
use crate::domain::reconciler::QuotaSync;
use crate::domain::traits::QuotaCluster;
use crate::domain::traits::SystemClock;
use crate::domain::traits::TimeSource;
use crate::infrastructure::k8s::KubeCluster;
use crate::infrastructure::k8s::KubernetesError;
use crate::infrastructure::metrics::MetricsRecorder;

/// Shared state handed to every reconcile call.
pub struct Context<C, T> {
    pub sync: QuotaSync<C, T>,
    pub settings: ReconcileSettings,
}

/// A pass that could not complete.
#[derive(Debug, derive_more::Display)]
#[display("{_0:?}")]
pub struct ReconcileFailure(pub Report<QuotaError>);

impl Error for ReconcileFailure {}

impl From<Report<QuotaError>> for ReconcileFailure {
    fn from(report: Report<QuotaError>) -> Self {
        Self(report)
    }
}

/// Delay before the next pass over a configuration.
///
/// A pass with failures is retried after the error backoff; otherwise the
/// pass wakes up when the earliest reservation expires, and at the resync
/// interval at the latest.
pub fn requeue_delay(outcome: &PassOutcome, settings: &ReconcileSettings) -> Duration {
    if outcome.failed > 0 {
        return settings.error_requeue;
    }
    outcome
        .requeue_after
        .map_or(settings.resync_interval, |after| {
            after.min(settings.resync_interval)
        })
        .max(Duration::from_secs(1))
}

pub async fn reconcile<C, T>(
    config: Arc<NodeQuotaConfig>,
    ctx: Arc<Context<C, T>>,
) -> Result<Action, ReconcileFailure>
where
    C: QuotaCluster,
    T: TimeSource,
{
    let name = config.name_any();

    if let Err(errors) = config.spec.validate() {
        for error in &errors {
            tracing::warn!(config = %name, "invalid NodeQuotaConfig: {error}");
        }
        return Ok(Action::await_change());
    }

    let outcome = ctx
        .sync
        .run_pass(&name, &config.spec, config.status.as_ref())
        .await?;

    let delay = requeue_delay(&outcome, &ctx.settings);
    tracing::debug!(config = %name, "next pass in {}s", delay.as_secs());
    Ok(Action::requeue(delay))
}

pub fn error_policy<C, T>(
    config: Arc<NodeQuotaConfig>,
    error: &ReconcileFailure,
    ctx: Arc<Context<C, T>>,
) -> Action {
    tracing::error!(config = %config.name_any(), "reconciliation failed: {error}");
    Action::requeue(ctx.settings.error_requeue)
}

async fn ensure_crd_installed(client: Client) -> Result<(), Report<KubernetesError>> {
    Api::<NodeQuotaConfig>::all(client)
        .list(&ListParams::default().limit(1))
        .await
        .change_context(KubernetesError::CrdNotInstalled)?;
    Ok(())
}

/// Runs the controller until a termination signal is received.
///
/// Every node event requeues all known configurations since any of them may
/// select the node.
pub async fn run_controller(client: Client, args: &RunArgs) -> Result<(), Report<KubernetesError>> {
    ensure_crd_installed(client.clone()).await?;

    let ctx = Arc::new(Context {
        sync: QuotaSync::new(
            Arc::new(KubeCluster::new(client.clone(), &args.controller_name)),
            Arc::new(SystemClock),
            MetricsRecorder::new(args.metrics_format),
        ),
        settings: ReconcileSettings::from(args),
    });

    let controller = Controller::new(
        Api::<NodeQuotaConfig>::all(client.clone()),
        watcher::Config::default(),
    );
    let store = controller.store();

    tracing::info!(
        resync_interval_secs = ctx.settings.resync_interval.as_secs(),
        "starting NodeQuotaConfig controller"
    );
    controller
        .watches(
            Api::<Node>::all(client),
            watcher::Config::default(),
            move |_node: Node| {
                store
                    .state()
                    .into_iter()
                    .map(|config| ObjectRef::from_obj(config.as_ref()))
            },
        )
        .shutdown_on_signal()
        .run(
            reconcile::<KubeCluster, SystemClock>,
            error_policy::<KubeCluster, SystemClock>,
            ctx,
        )
        .for_each(|result| async move {
            match result {
                Ok((object, _)) => tracing::debug!(config = %object.name, "reconciled"),
                Err(error) => tracing::warn!("controller event failed: {error}"),
            }
        })
        .await;

    tracing::info!("controller stopped");
    Ok(())
}
