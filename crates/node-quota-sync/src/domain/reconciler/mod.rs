//! One reconciliation pass over a `NodeQuotaConfig`.

mod group;
mod hierarchy;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use api_types::NodeQuotaConfigSpec;
use api_types::NodeQuotaConfigStatus;
use error_stack::Report;
use error_stack::ResultExt;

pub use group::decide;
pub use group::GroupDecision;
pub use group::GroupOutcome;
pub use group::GroupState;
pub use group::PassContext;
pub use hierarchy::RootOutcome;

use crate::domain::error::QuotaError;
use crate::domain::ledger::ReservationLedger;
use crate::domain::resources::ResourceKinds;
use crate::domain::traits::QuotaCluster;
use crate::domain::traits::TimeSource;
use crate::infrastructure::metrics::MetricsRecorder;

/// Result of a completed pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassOutcome {
    /// The ledger still holds a reservation after the purge.
    pub pending: bool,
    /// The status was rewritten.
    pub ledger_changed: bool,
    /// Quota objects written.
    pub patched: usize,
    /// Quota objects that could not be reconciled.
    pub failed: usize,
    /// Delay until the earliest reservation expires.
    pub requeue_after: Option<Duration>,
}

/// Runs reconciliation passes against a cluster.
pub struct QuotaSync<C, T> {
    cluster: Arc<C>,
    clock: Arc<T>,
    metrics: MetricsRecorder,
}

impl<C, T> QuotaSync<C, T>
where
    C: QuotaCluster,
    T: TimeSource,
{
    pub fn new(cluster: Arc<C>, clock: Arc<T>, metrics: MetricsRecorder) -> Self {
        Self {
            cluster,
            clock,
            metrics,
        }
    }

    pub fn cluster(&self) -> &C {
        &self.cluster
    }

    /// Reconciles every root of the configuration named `name`.
    ///
    /// Group and root patch failures are logged and counted in the outcome.
    /// Failing to list nodes or to read a group quota aborts the pass before
    /// anything is persisted; patches already applied to earlier roots stay.
    #[tracing::instrument(skip(self, spec, status), fields(config = %name))]
    pub async fn run_pass(
        &self,
        name: &str,
        spec: &NodeQuotaConfigSpec,
        status: Option<&NodeQuotaConfigStatus>,
    ) -> Result<PassOutcome, Report<QuotaError>> {
        let now = self.clock.now();
        let controlled: ResourceKinds = spec.controlled_resources.iter().cloned().collect();
        let mut ledger = ReservationLedger::from_status(status, &controlled);

        let mut outcome = PassOutcome::default();
        let mut held = BTreeSet::new();
        for root in &spec.roots {
            let ctx = PassContext {
                root: root.root_namespace.clone(),
                controlled: controlled.clone(),
                ttl_hours: spec.reserved_hours_to_live,
                grace_clock: spec.grace_clock,
                now,
            };
            let root_outcome =
                hierarchy::reconcile_root(&*self.cluster, &self.metrics, &ctx, root, &mut ledger)
                    .await?;
            outcome.patched += root_outcome.patched();
            outcome.failed += root_outcome.failed();
            held.extend(
                root_outcome
                    .groups
                    .iter()
                    .filter(|group| group.reservation_held)
                    .map(|group| group.name.clone()),
            );
        }

        // A group whose patch failed keeps its reservation for the next pass.
        for purged in ledger.purge_expired(spec.reserved_hours_to_live, now, &held) {
            tracing::info!(node_group = %purged, "removed expired reservation");
        }
        outcome.pending = !ledger.is_empty();

        let persisted = status.cloned().unwrap_or_default();
        let next = ledger.to_status();
        if next != persisted {
            self.cluster
                .persist_status(name, &next)
                .await
                .attach_printable_lazy(|| format!("{} reservations", next.reserved_resources.len()))?;
            outcome.ledger_changed = true;
        }

        outcome.requeue_after = ledger
            .next_expiry(spec.reserved_hours_to_live)
            .map(|at| (at - now).to_std().unwrap_or(Duration::ZERO));

        tracing::info!(
            pending = outcome.pending,
            ledger_changed = outcome.ledger_changed,
            patched = outcome.patched,
            failed = outcome.failed,
            "pass completed"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use api_types::GraceClock;
    use api_types::NodeGroup;
    use api_types::ReservedResources;
    use api_types::RootGroup;
    use chrono::DateTime;
    use chrono::TimeDelta;
    use chrono::TimeZone;
    use chrono::Utc;
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use similar_asserts::assert_eq;

    use super::*;
    use crate::domain::mock::node;
    use crate::domain::mock::resources;
    use crate::domain::mock::InMemoryCluster;
    use crate::domain::mock::ManualClock;
    use crate::domain::traits::QuotaTarget;

    const CONFIG: &str = "config";

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn group(name: &str, pool: &str) -> NodeGroup {
        NodeGroup {
            name: name.to_string(),
            label_selector: [("pool".to_string(), pool.to_string())].into(),
            ..Default::default()
        }
    }

    fn spec() -> NodeQuotaConfigSpec {
        NodeQuotaConfigSpec {
            reserved_hours_to_live: 24,
            controlled_resources: vec!["cpu".to_string(), "memory".to_string()],
            roots: vec![RootGroup {
                root_namespace: "tenants".to_string(),
                secondary_roots: vec![group("a", "a"), group("b", "b")],
            }],
            grace_clock: GraceClock::Restart,
        }
    }

    struct Fixture {
        sync: QuotaSync<InMemoryCluster, ManualClock>,
        clock: Arc<ManualClock>,
    }

    impl Fixture {
        fn new() -> Self {
            let cluster = Arc::new(InMemoryCluster::new());
            cluster.set_nodes(vec![
                node("a1", &[("pool", "a")], &[("cpu", "4"), ("memory", "8Gi")]),
                node("a2", &[("pool", "a")], &[("cpu", "4"), ("memory", "8Gi")]),
                node("b1", &[("pool", "b")], &[("cpu", "2"), ("memory", "4Gi")]),
            ]);
            cluster.set_quota(
                QuotaTarget::group("tenants", "a"),
                resources(&[("cpu", "8"), ("memory", "16Gi"), ("pods", "50")]),
            );
            cluster.set_quota(
                QuotaTarget::group("tenants", "b"),
                resources(&[("cpu", "2"), ("memory", "4Gi")]),
            );
            cluster.set_quota(
                QuotaTarget::root("tenants"),
                resources(&[("cpu", "10"), ("memory", "20Gi"), ("services", "5")]),
            );
            let clock = Arc::new(ManualClock::new(start()));
            Self {
                sync: QuotaSync::new(cluster, clock.clone(), MetricsRecorder::default()),
                clock,
            }
        }

        fn cluster(&self) -> &InMemoryCluster {
            self.sync.cluster()
        }

        async fn pass(&self) -> PassOutcome {
            let status = self.cluster().status(CONFIG);
            self.sync
                .run_pass(CONFIG, &spec(), status.as_ref())
                .await
                .expect("pass succeeds")
        }
    }

    #[test_log::test(tokio::test)]
    async fn converged_cluster_is_left_alone() {
        let fixture = Fixture::new();

        let outcome = fixture.pass().await;
        assert_eq!(outcome, PassOutcome::default());
        assert!(fixture.cluster().patches().is_empty());
        assert_eq!(fixture.cluster().status_writes(), 0);
    }

    #[test_log::test(tokio::test)]
    async fn node_loss_is_deferred_then_enforced() {
        let fixture = Fixture::new();
        fixture.cluster().remove_node("a2");

        let first = fixture.pass().await;
        assert!(first.pending);
        assert!(first.ledger_changed);
        assert_eq!(first.requeue_after, Some(std::time::Duration::from_secs(23 * 3600 + 1800)));
        assert!(fixture.cluster().patches().is_empty());

        let second = fixture.pass().await;
        assert!(second.pending);
        assert!(!second.ledger_changed);
        assert!(fixture.cluster().patches().is_empty());

        fixture.clock.advance(TimeDelta::hours(24));
        let third = fixture.pass().await;
        assert!(!third.pending);
        assert!(third.ledger_changed);
        assert_eq!(third.patched, 2);
        assert_eq!(
            fixture.cluster().quota(&QuotaTarget::group("tenants", "a")),
            Some(resources(&[("cpu", "4"), ("memory", "8Gi"), ("pods", "50")]))
        );
        assert_eq!(
            fixture.cluster().quota(&QuotaTarget::root("tenants")),
            Some(resources(&[("cpu", "6"), ("memory", "12Gi"), ("services", "5")]))
        );
        assert!(fixture
            .cluster()
            .status(CONFIG)
            .expect("status")
            .reserved_resources
            .is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn node_return_releases_reservation() {
        let fixture = Fixture::new();
        fixture.cluster().remove_node("a2");
        fixture.pass().await;

        fixture.clock.advance(TimeDelta::hours(2));
        fixture
            .cluster()
            .add_node(node("a2", &[("pool", "a")], &[("cpu", "4"), ("memory", "8Gi")]));
        let outcome = fixture.pass().await;

        assert!(!outcome.pending);
        assert!(outcome.ledger_changed);
        assert!(fixture.cluster().patches().is_empty());
        assert_eq!(outcome.requeue_after, None);
    }

    #[test_log::test(tokio::test)]
    async fn growth_is_applied_immediately() {
        let fixture = Fixture::new();
        fixture
            .cluster()
            .add_node(node("b2", &[("pool", "b")], &[("cpu", "2"), ("memory", "4Gi")]));

        let outcome = fixture.pass().await;
        assert!(!outcome.pending);
        assert!(!outcome.ledger_changed);
        assert_eq!(
            fixture.cluster().quota(&QuotaTarget::group("tenants", "b")),
            Some(resources(&[("cpu", "4"), ("memory", "8Gi")]))
        );
        assert_eq!(
            fixture.cluster().quota(&QuotaTarget::root("tenants")),
            Some(resources(&[("cpu", "12"), ("memory", "24Gi"), ("services", "5")]))
        );

        fixture.cluster().clear_patches();
        fixture.pass().await;
        assert!(fixture.cluster().patches().is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn failed_group_patch_keeps_siblings_and_ledger() {
        let fixture = Fixture::new();
        fixture.cluster().remove_node("a2");
        fixture.pass().await;
        let recorded = fixture.cluster().status(CONFIG).expect("status");

        fixture.clock.advance(TimeDelta::hours(24));
        fixture
            .cluster()
            .add_node(node("b2", &[("pool", "b")], &[("cpu", "2"), ("memory", "4Gi")]));
        fixture.cluster().fail_patch(QuotaTarget::group("tenants", "a"));

        let outcome = fixture.pass().await;
        assert_eq!(outcome.failed, 1);
        assert!(outcome.pending);
        assert_eq!(
            fixture.cluster().quota(&QuotaTarget::group("tenants", "b")),
            Some(resources(&[("cpu", "4"), ("memory", "8Gi")]))
        );
        // a keeps 8 cpu, b grows to 4
        assert_eq!(
            fixture.cluster().quota(&QuotaTarget::root("tenants")),
            Some(resources(&[("cpu", "12"), ("memory", "24Gi"), ("services", "5")]))
        );
        assert_eq!(fixture.cluster().status(CONFIG), Some(recorded));
    }

    #[test_log::test(tokio::test)]
    async fn concurrent_modification_is_a_conflict() {
        let fixture = Fixture::new();
        fixture
            .cluster()
            .add_node(node("b2", &[("pool", "b")], &[("cpu", "2"), ("memory", "4Gi")]));
        fixture
            .cluster()
            .modify_after_read(QuotaTarget::group("tenants", "b"));

        let outcome = fixture.pass().await;
        assert_eq!(outcome.failed, 1);
        assert_eq!(
            fixture.cluster().quota(&QuotaTarget::group("tenants", "b")),
            Some(resources(&[("cpu", "2"), ("memory", "4Gi")]))
        );
    }

    #[test_log::test(tokio::test)]
    async fn inventory_failure_aborts_without_persisting() {
        let fixture = Fixture::new();
        fixture.cluster().remove_node("a2");
        fixture.cluster().fail_list_nodes(true);

        let error = fixture
            .sync
            .run_pass(CONFIG, &spec(), None)
            .await
            .expect_err("pass fails");
        assert!(matches!(error.current_context(), QuotaError::InventoryRead));
        assert_eq!(fixture.cluster().status_writes(), 0);
        assert!(fixture.cluster().patches().is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn missing_subnamespace_is_skipped() {
        let fixture = Fixture::new();
        let mut spec = spec();
        spec.roots[0].secondary_roots.push(group("ghost", "ghost"));

        let outcome = fixture
            .sync
            .run_pass(CONFIG, &spec, None)
            .await
            .expect("pass succeeds");
        assert_eq!(outcome.failed, 1);
        assert!(fixture.cluster().patches().is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn expired_reservation_of_skipped_group_is_purged() {
        let fixture = Fixture::new();
        let mut spec = spec();
        spec.roots[0].secondary_roots.push(group("ghost", "ghost"));
        let status = NodeQuotaConfigStatus {
            reserved_resources: vec![ReservedResources {
                node_group: "ghost".to_string(),
                resources: [("cpu".to_string(), Quantity("2".to_string()))].into(),
                timestamp: Some(Time(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap())),
            }],
        };

        let outcome = fixture
            .sync
            .run_pass(CONFIG, &spec, Some(&status))
            .await
            .expect("pass succeeds");
        assert_eq!(outcome.failed, 1);
        assert!(!outcome.pending);
        assert!(outcome.ledger_changed);
        assert_eq!(outcome.requeue_after, None);
        let persisted = fixture.cluster().status(CONFIG).expect("status written");
        assert!(persisted.reserved_resources.is_empty());

        fixture.clock.set(start() + TimeDelta::hours(1));
        let again = fixture
            .sync
            .run_pass(CONFIG, &spec, Some(&persisted))
            .await
            .expect("pass succeeds");
        assert!(!again.pending);
        assert!(!again.ledger_changed);
        assert_eq!(fixture.cluster().status_writes(), 1);
    }

    #[test_log::test(tokio::test)]
    async fn quota_read_failure_aborts_without_persisting() {
        let fixture = Fixture::new();
        fixture.cluster().remove_node("a2");
        fixture.cluster().fail_read(QuotaTarget::group("tenants", "a"));

        let error = fixture
            .sync
            .run_pass(CONFIG, &spec(), None)
            .await
            .expect_err("pass fails");
        assert!(matches!(
            error.current_context(),
            QuotaError::QuotaRead { .. }
        ));
        assert_eq!(fixture.cluster().status_writes(), 0);
        assert!(fixture.cluster().patches().is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn unrepresentable_grace_period_defers_without_requeue() {
        let fixture = Fixture::new();
        let mut spec = spec();
        spec.reserved_hours_to_live = 10_000_000_000;
        fixture.cluster().remove_node("a2");

        let outcome = fixture
            .sync
            .run_pass(CONFIG, &spec, None)
            .await
            .expect("pass succeeds");
        assert!(outcome.pending);
        assert_eq!(outcome.requeue_after, None);
        assert!(fixture.cluster().patches().is_empty());

        fixture.clock.set(Utc.with_ymd_and_hms(2200, 1, 1, 0, 0, 0).unwrap());
        let status = fixture.cluster().status(CONFIG);
        let later = fixture
            .sync
            .run_pass(CONFIG, &spec, status.as_ref())
            .await
            .expect("pass succeeds");
        assert!(later.pending);
        assert!(fixture.cluster().patches().is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn status_persist_failure_is_surfaced() {
        let fixture = Fixture::new();
        fixture.cluster().remove_node("a2");
        fixture.cluster().fail_status(true);

        let error = fixture
            .sync
            .run_pass(CONFIG, &spec(), None)
            .await
            .expect_err("pass fails");
        assert!(matches!(
            error.current_context(),
            QuotaError::StatusPersist { .. }
        ));
    }
}
