//! provides logging helpers

use tracing::Subscriber;
use tracing_subscriber::filter::FilterExt;
use tracing_subscriber::filter::{self};
use tracing_subscriber::fmt::layer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

/// Target used by events that carry encoded metrics lines instead of log messages.
pub const METRICS_TARGET: &str = "metrics";

/// Human readable stderr layer, filtered by `RUST_LOG` (default `info`).
///
/// Events on the [`METRICS_TARGET`] are excluded; they are routed to a
/// dedicated writer by the binaries that emit them.
pub fn fmt_layer<S>() -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let env_filter = filter::EnvFilter::builder()
        .with_default_directive(filter::LevelFilter::INFO.into())
        .from_env_lossy();

    layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_filter(env_filter.and(filter::filter_fn(|metadata| {
            metadata.target() != METRICS_TARGET
        })))
}

/// initiate the global tracing subscriber with the stderr layer only
pub fn init() {
    registry().with(fmt_layer()).init();
}
