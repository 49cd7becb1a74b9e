pub mod metrics_collector;
pub mod metrics_provider;
pub mod telemetry_setup;

pub use metrics_collector::{MetricName, MetricsCollector, PrometheusMetricsCollector};
pub use metrics_provider::{clear_shards, merge_exposition, shard_path, MetricsProvider};
pub use telemetry_setup::{init_logging, init_tracing};
