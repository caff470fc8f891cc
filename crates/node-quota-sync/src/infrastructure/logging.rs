//! Global tracing subscriber of the controller binary.

use std::fmt;
use std::path::Path;

use anyhow::Context as _;
use tracing::field::Field;
use tracing::field::Visit;
use tracing::Event;
use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::filter;
use tracing_subscriber::fmt::format::DefaultFields;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::layer;
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::fmt::FormatEvent;
use tracing_subscriber::fmt::FormatFields;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry;
use tracing_subscriber::registry::LookupSpan;
use utils::logging::METRICS_TARGET;

/// Writes the pre-encoded `msg` of a metrics event as one line.
struct MetricsLineFormatter;

#[derive(Default)]
struct MessageVisitor {
    line: Option<String>,
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "msg" {
            self.line = Some(value.to_string());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "msg" {
            self.line = Some(format!("{value:?}"));
        }
    }
}

impl<S, N> FormatEvent<S, N> for MetricsLineFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        match visitor.line {
            Some(line) => writeln!(writer, "{}", line.trim_end()),
            None => Ok(()),
        }
    }
}

/// Installs the global subscriber.
///
/// Logs go to stderr. When `metrics_file` is set, metrics events are appended
/// to it through a daily rolling appender; the returned guard must be held
/// until exit so buffered lines are flushed.
pub fn init(metrics_file: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let Some(metrics_file) = metrics_file else {
        utils::logging::init();
        return Ok(None);
    };

    let directory = metrics_file
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let prefix = metrics_file
        .file_name()
        .and_then(|name| name.to_str())
        .with_context(|| format!("invalid metrics file name: {}", metrics_file.display()))?;

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(prefix)
        .max_log_files(3)
        .build(directory)
        .with_context(|| format!("failed to create metrics appender in {}", directory.display()))?;
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    let metrics_layer = layer()
        .event_format(MetricsLineFormatter)
        .fmt_fields(DefaultFields::new())
        .with_writer(file_writer)
        .with_ansi(false)
        .with_filter(filter::filter_fn(|metadata| {
            metadata.target() == METRICS_TARGET
        }));

    registry()
        .with(utils::logging::fmt_layer())
        .with(metrics_layer)
        .init();
    Ok(Some(guard))
}
