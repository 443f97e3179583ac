pub mod config;
pub mod connection;
pub mod http;
pub mod ingest;

pub use connection::{ConnectionHandle, ConnectionState};
pub use ingest::{Ingestor, IngestorConfig};
