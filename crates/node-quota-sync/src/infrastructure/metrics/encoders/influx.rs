use std::collections::HashMap;

use influxdb_line_protocol::LineProtocolBuilder;

use super::FieldValue;
use super::MetricsEncoder;

/// InfluxDB line protocol encoder
pub struct InfluxEncoder;

impl InfluxEncoder {
    pub fn new() -> Self {
        Self
    }
}

fn into_line(bytes: Vec<u8>) -> String {
    String::from_utf8(bytes).unwrap_or_else(|e| {
        tracing::error!("Failed to convert line protocol to string: {e}");
        String::new()
    })
}

impl MetricsEncoder for InfluxEncoder {
    fn encode_metrics(
        &self,
        measurement: &str,
        tags: &HashMap<String, String>,
        fields: &HashMap<String, FieldValue>,
        timestamp: i64,
    ) -> String {
        let mut builder = LineProtocolBuilder::new().measurement(measurement);

        let mut tag_entries: Vec<_> = tags.iter().collect();
        tag_entries.sort_by_key(|(k, _)| *k);
        for (key, value) in tag_entries {
            builder = builder.tag(key, value);
        }

        // The first field moves the builder into its AfterField state
        let mut field_entries: Vec<_> = fields.iter().collect();
        field_entries.sort_by_key(|(k, _)| *k);

        let Some((first_key, first_value)) = field_entries.first() else {
            let lp_built = builder
                .field("_empty", true)
                .timestamp(timestamp)
                .close_line()
                .build();
            return into_line(lp_built);
        };

        let mut after_first_field = match first_value {
            FieldValue::String(s) => builder.field(first_key, s.as_str()),
            FieldValue::Integer(i) => builder.field(first_key, *i),
            FieldValue::Float(f) => builder.field(first_key, *f),
        };
        for (key, value) in field_entries.iter().skip(1) {
            after_first_field = match value {
                FieldValue::String(s) => after_first_field.field(key, s.as_str()),
                FieldValue::Integer(i) => after_first_field.field(key, *i),
                FieldValue::Float(f) => after_first_field.field(key, *f),
            };
        }

        into_line(after_first_field.timestamp(timestamp).close_line().build())
    }
}
