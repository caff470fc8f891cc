//! Quota metrics emitted as encoded lines on the `metrics` tracing target.
//!
//! The lines end up in the metrics file when the binary installs the metrics
//! layer, and are dropped otherwise.

use std::collections::BTreeMap;

use chrono::DateTime;
use chrono::Utc;
use utils::logging::METRICS_TARGET;

use crate::domain::resources::ResourceMap;

pub mod encoders;
use encoders::create_encoder;
use encoders::Encoder;
use encoders::MetricsEncoder as _;
use encoders::MetricsFormat;
use encoders::MultiplierMetricsParams;
use encoders::QuotaMetricsParams;

pub struct MetricsRecorder {
    encoder: Encoder,
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new(MetricsFormat::default())
    }
}

impl MetricsRecorder {
    pub fn new(format: MetricsFormat) -> Self {
        Self {
            encoder: create_encoder(format),
        }
    }

    fn emit(line: &str) {
        tracing::info!(target: METRICS_TARGET, msg = %line);
    }

    /// One record per resource kind whose value differs between `before`
    /// and `after`.
    pub fn record_quota_change(
        &self,
        root_namespace: &str,
        namespace: &str,
        before: &ResourceMap,
        after: &ResourceMap,
        at: DateTime<Utc>,
    ) {
        let timestamp = at.timestamp_nanos_opt().unwrap_or_default();
        for (resource, value) in after.iter() {
            if before.contains(resource) && before.get(resource) == value {
                continue;
            }
            let line = self.encoder.encode_quota_metrics(&QuotaMetricsParams {
                resource,
                root_namespace,
                namespace,
                value: value.as_f64(),
                timestamp,
            });
            Self::emit(&line);
        }
    }

    pub fn record_multipliers(
        &self,
        root_namespace: &str,
        secondary_root_namespace: &str,
        multipliers: &BTreeMap<String, f64>,
        at: DateTime<Utc>,
    ) {
        let timestamp = at.timestamp_nanos_opt().unwrap_or_default();
        for (resource, multiplier) in multipliers {
            let line = self.encoder.encode_multiplier_metrics(&MultiplierMetricsParams {
                resource,
                root_namespace,
                secondary_root_namespace,
                multiplier: *multiplier,
                timestamp,
            });
            Self::emit(&line);
        }
    }
}
