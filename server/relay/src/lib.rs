pub mod config;
pub mod dispatch;
pub mod http;

pub use dispatch::{CycleReport, Relay, RelayConfig};
