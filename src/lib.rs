//! A metrics exporter and bridge for PostgreSQL: collects from one or more
//! servers and exposes Prometheus text exposition format, merges remote
//! exposition endpoints into one bridged feed, and accepts a framed JSON
//! management protocol for runtime control.

pub mod bridge;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod http;
pub mod management;
pub mod pg;
pub mod telemetry;
pub mod wire;

pub use error::{Error, Result};
