pub mod activity;
pub mod config;
pub mod http;
pub mod pipeline;

pub use activity::ActivityCounter;
pub use config::MetricsConfig;
pub use http::MetricsServer;
pub use pipeline::{ConsumerMetrics, ProducerMetrics, RelayMetrics};
