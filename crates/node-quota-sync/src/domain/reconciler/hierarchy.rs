//! Folds group quotas into their root namespace.

use api_types::RootGroup;
use error_stack::Report;
use error_stack::ResultExt;

use super::group::reconcile_group;
use super::group::GroupOutcome;
use super::group::PassContext;
use crate::domain::error::QuotaError;
use crate::domain::ledger::ReservationLedger;
use crate::domain::resources::ResourceMap;
use crate::domain::traits::QuotaCluster;
use crate::domain::traits::QuotaTarget;
use crate::infrastructure::metrics::MetricsRecorder;

#[derive(Debug, Clone, PartialEq)]
pub struct RootOutcome {
    pub root: String,
    pub groups: Vec<GroupOutcome>,
    /// Sum of the groups' controlled quotas.
    pub total: ResourceMap,
    pub root_patched: bool,
    pub root_failed: bool,
}

impl RootOutcome {
    pub fn patched(&self) -> usize {
        self.groups.iter().filter(|group| group.patched).count() + usize::from(self.root_patched)
    }

    pub fn failed(&self) -> usize {
        self.groups.iter().filter(|group| group.failed).count() + usize::from(self.root_failed)
    }
}

/// Reconciles every group of `root`, then sets the root quota of each
/// controlled kind to the sum over its groups.
///
/// Listing nodes or reading a group quota fails the whole root. Problems with
/// the root quota object itself are logged only.
#[tracing::instrument(skip_all, fields(root = %root.root_namespace))]
pub(crate) async fn reconcile_root<C: QuotaCluster + ?Sized>(
    cluster: &C,
    metrics: &MetricsRecorder,
    ctx: &PassContext,
    root: &RootGroup,
    ledger: &mut ReservationLedger,
) -> Result<RootOutcome, Report<QuotaError>> {
    let nodes = cluster
        .list_nodes()
        .await
        .attach_printable_lazy(|| format!("root namespace {}", root.root_namespace))?;

    let mut groups = Vec::with_capacity(root.secondary_roots.len());
    let mut total = ResourceMap::new();
    for group in &root.secondary_roots {
        metrics.record_multipliers(&root.root_namespace, &group.name, &group.multipliers, ctx.now);
        let outcome = reconcile_group(cluster, metrics, ctx, group, &nodes, ledger).await?;
        total = total.merge(&outcome.contribution);
        groups.push(outcome);
    }

    let (root_patched, root_failed) = patch_root(cluster, metrics, ctx, &total).await;
    Ok(RootOutcome {
        root: root.root_namespace.clone(),
        groups,
        total,
        root_patched,
        root_failed,
    })
}

/// Returns (patched, failed).
async fn patch_root<C: QuotaCluster + ?Sized>(
    cluster: &C,
    metrics: &MetricsRecorder,
    ctx: &PassContext,
    total: &ResourceMap,
) -> (bool, bool) {
    let target = QuotaTarget::root(&ctx.root);
    let snapshot = match cluster.get_quota(&target).await {
        Ok(Some(snapshot)) => snapshot,
        Ok(None) => {
            tracing::warn!(quota = %target, "root quota not found, skipping");
            return (false, true);
        }
        Err(report) => {
            tracing::error!(quota = %target, "failed to read root quota: {report:?}");
            return (false, true);
        }
    };

    let desired = snapshot.hard.overlay(total, &ctx.controlled);
    if desired.equivalent(&snapshot.hard) {
        return (false, false);
    }

    match cluster
        .patch_quota(&target, &desired, snapshot.resource_version.as_deref())
        .await
    {
        Ok(()) => {
            tracing::info!(quota = %target, "root quota updated");
            metrics.record_quota_change(&ctx.root, &ctx.root, &snapshot.hard, &desired, ctx.now);
            (true, false)
        }
        Err(report) => {
            tracing::error!(quota = %target, "failed to patch root quota: {report:?}");
            (false, true)
        }
    }
}
