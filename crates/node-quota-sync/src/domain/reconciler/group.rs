//! Per node group decision: defer a shrink or enforce the entitlement.

use api_types::GraceClock;
use api_types::NodeGroup;
use chrono::DateTime;
use chrono::Utc;
use error_stack::Report;

use crate::domain::capacity::compute_entitlement;
use crate::domain::capacity::NodeCapacity;
use crate::domain::capacity::NodeGroupPlan;
use crate::domain::error::QuotaError;
use crate::domain::ledger::is_expired;
use crate::domain::ledger::ReservationLedger;
use crate::domain::resources::ResourceKinds;
use crate::domain::resources::ResourceMap;
use crate::domain::traits::QuotaCluster;
use crate::domain::traits::QuotaTarget;
use crate::infrastructure::metrics::MetricsRecorder;

/// Where a node group stands after a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum GroupState {
    /// Applied quota already matched the entitlement.
    #[display("stable")]
    Stable,
    /// A shrink is deferred; the previous quota stays in effect.
    #[display("granted")]
    Granted,
    /// The quota was moved to the entitlement.
    #[display("converged")]
    Converged,
}

/// Pure result of [`decide`].
#[derive(Debug, Clone, PartialEq)]
pub struct GroupDecision {
    /// Controlled quota to apply to the group namespace.
    pub applied: ResourceMap,
    pub state: GroupState,
    /// A reservation was recorded or its clock restarted this pass.
    pub clock_started: bool,
}

/// Settings shared by every group of a pass.
#[derive(Debug, Clone)]
pub struct PassContext {
    pub root: String,
    pub controlled: ResourceKinds,
    pub ttl_hours: i64,
    pub grace_clock: GraceClock,
    pub now: DateTime<Utc>,
}

/// Decides the quota of one group and updates its ledger entry.
///
/// `current` and `entitlement` must already be restricted to controlled kinds.
/// An expired entry is dropped before anything else, so a shrink that
/// outlived its grace period is enforced in the same pass.
pub fn decide(
    ledger: &mut ReservationLedger,
    group: &str,
    entitlement: &ResourceMap,
    current: &ResourceMap,
    ctx: &PassContext,
) -> GroupDecision {
    let just_expired = ledger
        .lookup(group)
        .is_some_and(|entry| is_expired(entry, ctx.ttl_hours, ctx.now));
    if just_expired {
        ledger.remove(group);
        tracing::info!(node_group = %group, "reservation expired, enforcing entitlement");
    }

    let state_for = |applied: &ResourceMap| {
        if applied.equivalent(current) {
            GroupState::Stable
        } else {
            GroupState::Converged
        }
    };

    if current.is_strictly_greater(entitlement) && !just_expired {
        let (debt, _) = current.subtract(entitlement).partition_signs();
        let debt = debt.filter_to(&ctx.controlled);
        let clock_started = ledger.refresh(group, debt, ctx.now, ctx.grace_clock);
        if clock_started {
            tracing::info!(node_group = %group, "capacity shrank, deferring quota reduction");
        }
        return GroupDecision {
            applied: current.clone(),
            state: GroupState::Granted,
            clock_started,
        };
    }

    if !just_expired {
        if let Some(entry) = ledger.lookup(group) {
            let total = entitlement.merge(&entry.debt);
            let regrown = current.iter().all(|(kind, amount)| total.get(kind) >= amount);
            if regrown {
                ledger.remove(group);
                tracing::info!(node_group = %group, "capacity recovered, reservation released");
            }
        }
    }

    let applied = entitlement.clone();
    GroupDecision {
        state: state_for(&applied),
        applied,
        clock_started: false,
    }
}

/// What a pass did to one group.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupOutcome {
    pub name: String,
    pub state: GroupState,
    /// Controlled quota in effect after the pass, summed into the root.
    pub contribution: ResourceMap,
    pub patched: bool,
    pub failed: bool,
    /// The group still holds a reservation.
    pub pending: bool,
    /// The reservation was put back after a failed patch and must outlive
    /// the end-of-pass purge, even when expired.
    pub reservation_held: bool,
}

/// Reads, decides and patches one group namespace.
///
/// Only a failure to read the group's quota is returned as an error. A
/// missing subnamespace, an invalid group spec or a failed patch are logged
/// and reported through [`GroupOutcome::failed`]; the group then keeps its
/// current quota. Only a failed patch marks the restored ledger entry as held;
/// a skipped group's entry expires like any other.
pub(crate) async fn reconcile_group<C: QuotaCluster + ?Sized>(
    cluster: &C,
    metrics: &MetricsRecorder,
    ctx: &PassContext,
    group: &NodeGroup,
    nodes: &[NodeCapacity],
    ledger: &mut ReservationLedger,
) -> Result<GroupOutcome, Report<QuotaError>> {
    let target = QuotaTarget::group(&ctx.root, &group.name);
    let failed = |current: ResourceMap, pending: bool| GroupOutcome {
        name: group.name.clone(),
        state: GroupState::Stable,
        contribution: current,
        patched: false,
        failed: true,
        pending,
        reservation_held: false,
    };

    let Some(snapshot) = cluster.get_quota(&target).await? else {
        tracing::warn!(quota = %target, "node group has no subnamespace, skipping");
        return Ok(failed(ResourceMap::new(), ledger.contains(&group.name)));
    };
    let current = snapshot.hard.filter_to(&ctx.controlled);

    let plan = match NodeGroupPlan::from_spec(group) {
        Ok(plan) => plan,
        Err(report) => {
            tracing::warn!(quota = %target, "invalid node group, keeping current quota: {report:?}");
            return Ok(failed(current, ledger.contains(&group.name)));
        }
    };

    let entitlement = compute_entitlement(nodes, &plan, &ctx.controlled);
    let before = ledger.lookup(&group.name).cloned();
    let decision = decide(ledger, &group.name, &entitlement, &current, ctx);
    tracing::debug!(
        quota = %target,
        state = %decision.state,
        entitlement = ?entitlement,
        applied = ?decision.applied,
        "node group decided"
    );

    let desired = snapshot.hard.overlay(&decision.applied, &ctx.controlled);
    if desired.equivalent(&snapshot.hard) {
        return Ok(GroupOutcome {
            name: group.name.clone(),
            state: decision.state,
            contribution: decision.applied,
            patched: false,
            failed: false,
            pending: ledger.contains(&group.name),
            reservation_held: false,
        });
    }

    if let Err(report) = cluster
        .patch_quota(&target, &desired, snapshot.resource_version.as_deref())
        .await
    {
        tracing::error!(quota = %target, "failed to patch node group quota: {report:?}");
        let held = before.is_some();
        ledger.restore(&group.name, before);
        return Ok(GroupOutcome {
            reservation_held: held,
            ..failed(current, ledger.contains(&group.name))
        });
    }

    tracing::info!(quota = %target, state = %decision.state, "node group quota updated");
    metrics.record_quota_change(&ctx.root, &group.name, &snapshot.hard, &desired, ctx.now);
    Ok(GroupOutcome {
        name: group.name.clone(),
        state: decision.state,
        contribution: decision.applied,
        patched: true,
        failed: false,
        pending: ledger.contains(&group.name),
        reservation_held: false,
    })
}
