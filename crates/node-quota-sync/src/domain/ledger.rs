//! Reservation ledger: per node group quota debt awaiting its grace period.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::collections::BTreeSet;

use api_types::GraceClock;
use api_types::NodeQuotaConfigStatus;
use api_types::ReservedResources;
use chrono::DateTime;
use chrono::DurationRound;
use chrono::TimeDelta;
use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

use crate::domain::resources::ResourceKinds;
use crate::domain::resources::ResourceMap;

const SECONDS_PER_HOUR: i64 = 3600;

/// Outstanding debt of one node group and when it was recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct ReservationEntry {
    pub debt: ResourceMap,
    pub recorded_at: DateTime<Utc>,
}

impl ReservationEntry {
    pub fn new(debt: ResourceMap, now: DateTime<Utc>) -> Self {
        Self {
            debt,
            recorded_at: truncate_to_seconds(now),
        }
    }
}

/// Whether the grace period of `entry` is over.
///
/// The age is measured in whole hours rounded half away from zero, so an entry
/// recorded 23h31m ago counts as 24 hours old.
pub fn is_expired(entry: &ReservationEntry, ttl_hours: i64, now: DateTime<Utc>) -> bool {
    let age_secs = (now - entry.recorded_at).num_seconds();
    let age_hours = (age_secs as f64 / SECONDS_PER_HOUR as f64).round() as i64;
    age_hours >= ttl_hours
}

/// Earliest instant at which [`is_expired`] becomes true for `entry`, `None`
/// when that instant is past the representable range.
pub fn expires_at(entry: &ReservationEntry, ttl_hours: i64) -> Option<DateTime<Utc>> {
    let threshold = ttl_hours
        .saturating_mul(SECONDS_PER_HOUR)
        .saturating_sub(SECONDS_PER_HOUR / 2)
        .max(0);
    let grace = TimeDelta::try_seconds(threshold)?;
    entry.recorded_at.checked_add_signed(grace)
}

fn truncate_to_seconds(instant: DateTime<Utc>) -> DateTime<Utc> {
    instant
        .duration_trunc(TimeDelta::seconds(1))
        .unwrap_or(instant)
}

/// Reservations of one configuration object, keyed by node group name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReservationLedger {
    entries: BTreeMap<String, ReservationEntry>,
}

impl ReservationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the ledger from the persisted status.
    ///
    /// Debts are restricted to `controlled` kinds and entries left without
    /// debt are dropped. An entry without timestamp is treated as recorded at
    /// the Unix epoch, i.e. already expired. An entry with an unparseable
    /// quantity is dropped with a warning.
    pub fn from_status(
        status: Option<&NodeQuotaConfigStatus>,
        controlled: &ResourceKinds,
    ) -> Self {
        let mut ledger = Self::new();
        let Some(status) = status else {
            return ledger;
        };

        for reserved in &status.reserved_resources {
            let debt = match ResourceMap::from_quantities(&reserved.resources) {
                Ok(debt) => debt.filter_to(controlled),
                Err(report) => {
                    tracing::warn!(
                        node_group = %reserved.node_group,
                        "dropping reservation with invalid resources: {report:?}"
                    );
                    continue;
                }
            };
            if debt.is_empty() {
                continue;
            }
            let recorded_at = reserved
                .timestamp
                .as_ref()
                .map(|time| time.0)
                .unwrap_or_default();
            ledger.entries.insert(
                reserved.node_group.clone(),
                ReservationEntry {
                    debt,
                    recorded_at: truncate_to_seconds(recorded_at),
                },
            );
        }
        ledger
    }

    /// Status representation, sorted by node group name.
    pub fn to_status(&self) -> NodeQuotaConfigStatus {
        NodeQuotaConfigStatus {
            reserved_resources: self
                .entries
                .iter()
                .map(|(name, entry)| ReservedResources {
                    node_group: name.clone(),
                    resources: entry.debt.to_quantities(),
                    timestamp: Some(Time(entry.recorded_at)),
                })
                .collect(),
        }
    }

    pub fn lookup(&self, node_group: &str) -> Option<&ReservationEntry> {
        self.entries.get(node_group)
    }

    /// Records `debt` for `node_group` with a fresh timestamp, replacing any
    /// existing entry.
    pub fn upsert(&mut self, node_group: &str, debt: ResourceMap, now: DateTime<Utc>) {
        self.entries
            .insert(node_group.to_string(), ReservationEntry::new(debt, now));
    }

    /// Updates the debt of a live entry according to the grace clock policy.
    /// Returns true when the clock was restarted.
    ///
    /// With [`GraceClock::Restart`] a debt that grows on any kind beyond the
    /// recorded amount is a new shrink and gets a fresh timestamp. In every
    /// other case the recorded timestamp is kept.
    pub fn refresh(
        &mut self,
        node_group: &str,
        debt: ResourceMap,
        now: DateTime<Utc>,
        clock: GraceClock,
    ) -> bool {
        let entry = match self.entries.entry(node_group.to_string()) {
            Entry::Vacant(vacant) => {
                vacant.insert(ReservationEntry::new(debt, now));
                return true;
            }
            Entry::Occupied(occupied) => occupied.into_mut(),
        };

        let deeper = debt.iter().any(|(kind, amount)| amount > entry.debt.get(kind));
        if clock == GraceClock::Restart && deeper {
            *entry = ReservationEntry::new(debt, now);
            return true;
        }
        entry.debt = debt;
        false
    }

    pub fn remove(&mut self, node_group: &str) -> Option<ReservationEntry> {
        self.entries.remove(node_group)
    }

    /// Puts back a previously captured state of `node_group`'s entry.
    pub fn restore(&mut self, node_group: &str, entry: Option<ReservationEntry>) {
        match entry {
            Some(entry) => {
                self.entries.insert(node_group.to_string(), entry);
            }
            None => {
                self.entries.remove(node_group);
            }
        }
    }

    /// Removes every expired entry outside `exempt` and returns the affected
    /// node groups.
    pub fn purge_expired(
        &mut self,
        ttl_hours: i64,
        now: DateTime<Utc>,
        exempt: &BTreeSet<String>,
    ) -> Vec<String> {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(name, entry)| !exempt.contains(*name) && is_expired(entry, ttl_hours, now))
            .map(|(name, _)| name.clone())
            .collect();
        for name in &expired {
            self.entries.remove(name);
        }
        expired
    }

    /// Earliest instant at which any entry expires. Entries whose expiry is
    /// out of range never expire and are skipped.
    pub fn next_expiry(&self, ttl_hours: i64) -> Option<DateTime<Utc>> {
        self.entries
            .values()
            .filter_map(|entry| expires_at(entry, ttl_hours))
            .min()
    }

    pub fn contains(&self, node_group: &str) -> bool {
        self.entries.contains_key(node_group)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use similar_asserts::assert_eq;

    use super::*;
    use crate::domain::mock::resources;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, hour, minute, 0).unwrap()
    }

    fn controlled() -> ResourceKinds {
        ["cpu", "memory"].iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn expiry_uses_rounded_hours() {
        let entry = ReservationEntry::new(resources(&[("cpu", "1")]), at(0, 0));
        assert!(!is_expired(&entry, 2, at(1, 29)));
        assert!(is_expired(&entry, 2, at(1, 30)));
        assert!(is_expired(&entry, 0, at(0, 0)));
        assert_eq!(expires_at(&entry, 2), Some(at(1, 30)));
        assert_eq!(expires_at(&entry, 0), Some(at(0, 0)));
    }

    #[test]
    fn out_of_range_expiry_never_fires() {
        let entry = ReservationEntry::new(resources(&[("cpu", "1")]), at(0, 0));
        assert_eq!(expires_at(&entry, 10_000_000_000), None);
        assert_eq!(expires_at(&entry, i64::MAX), None);
        assert!(!is_expired(&entry, 10_000_000_000, at(23, 0)));

        let mut ledger = ReservationLedger::new();
        ledger.upsert("a", resources(&[("cpu", "1")]), at(0, 0));
        assert_eq!(ledger.next_expiry(10_000_000_000), None);
    }

    #[test]
    fn timestamps_are_truncated_to_seconds() {
        let now = at(3, 0) + TimeDelta::milliseconds(750);
        let entry = ReservationEntry::new(ResourceMap::new(), now);
        assert_eq!(entry.recorded_at, at(3, 0));
    }

    #[test]
    fn upsert_replaces_and_remove_forgets() {
        let mut ledger = ReservationLedger::new();
        ledger.upsert("a", resources(&[("cpu", "1")]), at(0, 0));
        ledger.upsert("a", resources(&[("cpu", "2")]), at(1, 0));

        assert_eq!(ledger.len(), 1);
        let entry = ledger.lookup("a").expect("entry");
        assert_eq!(entry.debt, resources(&[("cpu", "2")]));
        assert_eq!(entry.recorded_at, at(1, 0));

        assert!(ledger.remove("a").is_some());
        assert!(ledger.lookup("a").is_none());
    }

    #[test]
    fn restart_policy_resets_clock_only_for_deeper_shrink() {
        let mut ledger = ReservationLedger::new();
        ledger.upsert("a", resources(&[("cpu", "2"), ("memory", "1Gi")]), at(0, 0));

        assert!(!ledger.refresh("a", resources(&[("cpu", "2"), ("memory", "1Gi")]), at(1, 0), GraceClock::Restart));
        assert!(!ledger.refresh("a", resources(&[("cpu", "1")]), at(2, 0), GraceClock::Restart));
        assert_eq!(ledger.lookup("a").expect("entry").recorded_at, at(0, 0));
        assert_eq!(ledger.lookup("a").expect("entry").debt, resources(&[("cpu", "1")]));

        assert!(ledger.refresh("a", resources(&[("cpu", "3")]), at(3, 0), GraceClock::Restart));
        assert_eq!(ledger.lookup("a").expect("entry").recorded_at, at(3, 0));
    }

    #[test]
    fn preserve_policy_keeps_clock() {
        let mut ledger = ReservationLedger::new();
        ledger.upsert("a", resources(&[("cpu", "1")]), at(0, 0));

        assert!(!ledger.refresh("a", resources(&[("cpu", "5")]), at(4, 0), GraceClock::Preserve));
        let entry = ledger.lookup("a").expect("entry");
        assert_eq!(entry.recorded_at, at(0, 0));
        assert_eq!(entry.debt, resources(&[("cpu", "5")]));
    }

    #[test]
    fn purge_removes_only_expired_entries() {
        let mut ledger = ReservationLedger::new();
        ledger.upsert("old", resources(&[("cpu", "1")]), at(0, 0));
        ledger.upsert("new", resources(&[("cpu", "1")]), at(5, 0));

        assert_eq!(ledger.next_expiry(4), Some(at(3, 30)));
        let exempt = BTreeSet::from(["kept".to_string()]);
        ledger.upsert("kept", resources(&[("cpu", "1")]), at(0, 0));
        assert_eq!(ledger.purge_expired(4, at(6, 0), &exempt), vec!["old".to_string()]);
        assert!(ledger.contains("kept"));
        assert!(ledger.contains("new"));
        ledger.remove("kept");
        assert_eq!(ledger.next_expiry(4), Some(at(8, 30)));
    }

    #[test]
    fn restore_puts_back_captured_state() {
        let mut ledger = ReservationLedger::new();
        ledger.upsert("a", resources(&[("cpu", "1")]), at(0, 0));
        let before = ledger.lookup("a").cloned();

        ledger.remove("a");
        ledger.upsert("b", resources(&[("cpu", "1")]), at(0, 0));
        ledger.restore("a", before);
        ledger.restore("b", None);

        assert!(ledger.contains("a"));
        assert!(!ledger.contains("b"));
    }

    #[test]
    fn status_round_trip_filters_kinds_and_defaults_timestamp() {
        let status = NodeQuotaConfigStatus {
            reserved_resources: vec![
                ReservedResources {
                    node_group: "b".to_string(),
                    resources: BTreeMap::from([
                        ("cpu".to_string(), Quantity("2".to_string())),
                        ("gpu".to_string(), Quantity("1".to_string())),
                    ]),
                    timestamp: Some(Time(at(1, 0))),
                },
                ReservedResources {
                    node_group: "a".to_string(),
                    resources: BTreeMap::from([("memory".to_string(), Quantity("1Gi".to_string()))]),
                    timestamp: None,
                },
                ReservedResources {
                    node_group: "only-uncontrolled".to_string(),
                    resources: BTreeMap::from([("gpu".to_string(), Quantity("1".to_string()))]),
                    timestamp: Some(Time(at(1, 0))),
                },
                ReservedResources {
                    node_group: "broken".to_string(),
                    resources: BTreeMap::from([("cpu".to_string(), Quantity("x".to_string()))]),
                    timestamp: Some(Time(at(1, 0))),
                },
            ],
        };

        let ledger = ReservationLedger::from_status(Some(&status), &controlled());
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.lookup("b").expect("entry").debt, resources(&[("cpu", "2")]));
        assert_eq!(
            ledger.lookup("a").expect("entry").recorded_at,
            DateTime::<Utc>::default()
        );
        assert!(is_expired(ledger.lookup("a").expect("entry"), 24, at(0, 0)));

        let persisted = ledger.to_status();
        let names: Vec<_> = persisted
            .reserved_resources
            .iter()
            .map(|r| r.node_group.as_str())
            .collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(
            ReservationLedger::from_status(Some(&persisted), &controlled()),
            ledger
        );
    }
}
