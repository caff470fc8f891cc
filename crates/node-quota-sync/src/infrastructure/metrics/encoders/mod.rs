use std::collections::HashMap;

pub mod influx;
pub mod json;

/// Parameters for encoding a quota value of one namespace
#[derive(Debug, Clone)]
pub struct QuotaMetricsParams<'a> {
    pub resource: &'a str,
    pub root_namespace: &'a str,
    pub namespace: &'a str,
    pub value: f64,
    pub timestamp: i64,
}

/// Parameters for encoding a node group multiplier
#[derive(Debug, Clone)]
pub struct MultiplierMetricsParams<'a> {
    pub resource: &'a str,
    pub root_namespace: &'a str,
    pub secondary_root_namespace: &'a str,
    pub multiplier: f64,
    pub timestamp: i64,
}

/// Field value for metrics
#[derive(Debug, Clone)]
pub enum FieldValue {
    String(String),
    Integer(i64),
    Float(f64),
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::String(value.to_string())
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

/// Trait for encoding metrics in different formats
pub trait MetricsEncoder: Send + Sync {
    /// Encode metrics with measurement name, tags, fields, and timestamp
    fn encode_metrics(
        &self,
        measurement: &str,
        tags: &HashMap<String, String>,
        fields: &HashMap<String, FieldValue>,
        timestamp: i64,
    ) -> String;

    fn encode_quota_metrics(&self, params: &QuotaMetricsParams) -> String {
        let mut tags = HashMap::new();
        tags.insert("resource".to_string(), params.resource.to_string());
        tags.insert(
            "root_namespace".to_string(),
            params.root_namespace.to_string(),
        );
        tags.insert("namespace".to_string(), params.namespace.to_string());

        let mut fields = HashMap::new();
        fields.insert("value".to_string(), params.value.into());

        self.encode_metrics("nqs_quota", &tags, &fields, params.timestamp)
    }

    fn encode_multiplier_metrics(&self, params: &MultiplierMetricsParams) -> String {
        let mut tags = HashMap::new();
        tags.insert("resource".to_string(), params.resource.to_string());
        tags.insert(
            "root_namespace".to_string(),
            params.root_namespace.to_string(),
        );
        tags.insert(
            "secondary_root_namespace".to_string(),
            params.secondary_root_namespace.to_string(),
        );

        let mut fields = HashMap::new();
        fields.insert("value".to_string(), params.multiplier.into());

        self.encode_metrics(
            "nqs_resource_over_commit_multiplier",
            &tags,
            &fields,
            params.timestamp,
        )
    }
}

/// Output format of the metrics file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum MetricsFormat {
    #[default]
    Influx,
    Json,
}

/// Concrete encoder without dynamic dispatch
pub enum Encoder {
    Json(json::JsonEncoder),
    Influx(influx::InfluxEncoder),
}

impl MetricsEncoder for Encoder {
    fn encode_metrics(
        &self,
        measurement: &str,
        tags: &HashMap<String, String>,
        fields: &HashMap<String, FieldValue>,
        timestamp: i64,
    ) -> String {
        match self {
            Encoder::Json(inner) => inner.encode_metrics(measurement, tags, fields, timestamp),
            Encoder::Influx(inner) => inner.encode_metrics(measurement, tags, fields, timestamp),
        }
    }
}

pub fn create_encoder(format: MetricsFormat) -> Encoder {
    match format {
        MetricsFormat::Json => Encoder::Json(json::JsonEncoder::new()),
        MetricsFormat::Influx => Encoder::Influx(influx::InfluxEncoder::new()),
    }
}
