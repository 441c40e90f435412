//! Early-warning alerts for classroom attendance, participation, grades and behavior.
//!
//! [`AlertsService`] is the entry point: it evaluates classes against a
//! [`MetricProvider`], caches the results and exposes the invalidation hooks that
//! data writers call after recording new participations or results.

pub mod academic;
pub mod behavior;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod hydrator;
pub mod insights;
pub mod models;
pub mod orchestrator;
pub mod provider;
pub mod report;
pub mod risk;
pub mod rules;
#[cfg(test)]
mod testing;

pub use cache::{Clock, SystemClock};
pub use config::Config;
pub use error::{AlertsError, AlertsResult, ProviderError};
pub use orchestrator::{AlertsOptions, AlertsService};
pub use provider::{MetricProvider, ParticipationSeriesProvider, ProviderResult};
