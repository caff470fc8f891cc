//! Resource map arithmetic.
//!
//! Every operation is pure. An absent kind counts as zero in comparisons and
//! arithmetic, but absent and explicit zero stay distinguishable when
//! iterating, so rendering a map back to a quota does not invent kinds.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use error_stack::Report;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

use crate::domain::error::QuotaError;
use crate::domain::quantity::Amount;

/// Set of resource kind names, e.g. the controlled resources of a config.
pub type ResourceKinds = BTreeSet<String>;

/// Mapping from resource kind to amount.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceMap(BTreeMap<String, Amount>);

impl ResourceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a Kubernetes resource list. Fails on the first unparseable
    /// quantity, naming its kind.
    pub fn from_quantities(
        quantities: &BTreeMap<String, Quantity>,
    ) -> Result<Self, Report<QuotaError>> {
        quantities
            .iter()
            .map(|(kind, quantity)| {
                Amount::try_from(quantity)
                    .map(|amount| (kind.clone(), amount))
                    .map_err(|e| {
                        Report::new(e).change_context(QuotaError::InvalidQuantity {
                            resource: kind.clone(),
                        })
                    })
            })
            .collect::<Result<BTreeMap<_, _>, _>>()
            .map(Self)
    }

    pub fn to_quantities(&self) -> BTreeMap<String, Quantity> {
        self.0
            .iter()
            .map(|(kind, amount)| (kind.clone(), Quantity::from(*amount)))
            .collect()
    }

    /// Amount of `kind`, zero when absent.
    pub fn get(&self, kind: &str) -> Amount {
        self.0.get(kind).copied().unwrap_or(Amount::ZERO)
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.0.contains_key(kind)
    }

    pub fn insert(&mut self, kind: impl Into<String>, amount: Amount) {
        self.0.insert(kind.into(), amount);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Amount)> {
        self.0.iter().map(|(kind, amount)| (kind.as_str(), *amount))
    }

    /// Per kind sum; a kind present on one side only passes through.
    pub fn merge(&self, other: &ResourceMap) -> ResourceMap {
        let mut result = self.clone();
        for (kind, amount) in &other.0 {
            *result.0.entry(kind.clone()).or_insert(Amount::ZERO) += *amount;
        }
        result
    }

    /// `self[k] - other[k]` for every kind of `self`; kinds only in `other`
    /// are ignored.
    pub fn subtract(&self, other: &ResourceMap) -> ResourceMap {
        self.0
            .iter()
            .map(|(kind, amount)| (kind.clone(), *amount - other.get(kind)))
            .collect()
    }

    /// Projection onto `allowed`; other kinds are dropped, not zeroed.
    pub fn filter_to(&self, allowed: &ResourceKinds) -> ResourceMap {
        self.0
            .iter()
            .filter(|(kind, _)| allowed.contains(*kind))
            .map(|(kind, amount)| (kind.clone(), *amount))
            .collect()
    }

    /// Scales each kind by its factor. A kind without a factor is passed
    /// through unchanged, never zeroed.
    pub fn multiply(&self, factors: &BTreeMap<String, f64>) -> ResourceMap {
        self.0
            .iter()
            .map(|(kind, amount)| {
                let scaled = match factors.get(kind) {
                    Some(factor) => amount.scale_by(*factor),
                    None => *amount,
                };
                (kind.clone(), scaled)
            })
            .collect()
    }

    /// Splits into (positive kinds, negative kinds). Zero kinds are in neither.
    pub fn partition_signs(&self) -> (ResourceMap, ResourceMap) {
        let mut positive = ResourceMap::new();
        let mut negative = ResourceMap::new();
        for (kind, amount) in &self.0 {
            if amount.is_positive() {
                positive.insert(kind.clone(), *amount);
            } else if amount.is_negative() {
                negative.insert(kind.clone(), *amount);
            }
        }
        (positive, negative)
    }

    /// True when `self` is non-empty and every kind of `self` is strictly
    /// greater than the same kind of `other`.
    pub fn is_strictly_greater(&self, other: &ResourceMap) -> bool {
        !self.0.is_empty()
            && self
                .0
                .iter()
                .all(|(kind, amount)| *amount > other.get(kind))
    }

    /// Every kind of `self` equals the same kind of `other`.
    pub fn is_equal(&self, other: &ResourceMap) -> bool {
        self.0
            .iter()
            .all(|(kind, amount)| *amount == other.get(kind))
    }

    /// Every kind of `self` is at least the same kind of `other`.
    pub fn is_greater_or_equal(&self, other: &ResourceMap) -> bool {
        self.0
            .iter()
            .all(|(kind, amount)| *amount >= other.get(kind))
    }

    /// Value equality over the union of kinds, absent counting as zero.
    pub fn equivalent(&self, other: &ResourceMap) -> bool {
        self.is_equal(other) && other.is_equal(self)
    }

    /// Replaces the `controlled` kinds of `self` with `applied`.
    ///
    /// Kinds outside `controlled` are kept verbatim. A controlled kind present
    /// in `self` but missing from `applied` is written as an explicit zero so
    /// the quota never silently becomes unbounded.
    pub fn overlay(&self, applied: &ResourceMap, controlled: &ResourceKinds) -> ResourceMap {
        let mut result = self.clone();
        for (kind, amount) in result.0.iter_mut() {
            if controlled.contains(kind) {
                *amount = applied.get(kind);
            }
        }
        for (kind, amount) in applied.filter_to(controlled).0 {
            result.0.insert(kind, amount);
        }
        result
    }
}

impl<K: Into<String>> FromIterator<(K, Amount)> for ResourceMap {
    fn from_iter<I: IntoIterator<Item = (K, Amount)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(kind, amount)| (kind.into(), amount))
                .collect(),
        )
    }
}
