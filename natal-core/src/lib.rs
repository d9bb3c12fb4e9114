//! Core library for the natal chart service.
//!
//! This crate defines:
//! - Configuration & credentials handling
//! - Clients for the geocoding, timezone, chart and print providers
//! - The chart request pipeline and its error taxonomy
//!
//! It is used by `natal-server`, but the pipeline can be driven from any binary.

pub mod chart;
pub mod config;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod provider;

pub use config::{Config, ProviderConfig};
pub use error::ChartError;
pub use model::{BirthSubmission, ChartResult};
pub use pipeline::ChartOrchestrator;
pub use provider::ProviderId;
