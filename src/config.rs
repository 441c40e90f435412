//! Configuration module

use std::env;

use chrono::Duration;

use crate::rules::IncidentFallback;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL
    pub database_url: Option<String>,

    /// Pool size for the Postgres provider
    pub max_connections: u32,

    /// Lifetime of a cached class evaluation, in seconds
    pub cache_ttl_secs: i64,

    /// Exam results fetched per student during hydration
    pub results_limit: u32,

    /// How behavior incidents are inferred when the shortlist has no count
    pub incident_fallback: IncidentFallback,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: 5,
            cache_ttl_secs: 60,
            results_limit: 10,
            incident_fallback: IncidentFallback::ParticipationSeries,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            database_url: env::var("DATABASE_URL").ok(),

            max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_connections),

            cache_ttl_secs: env::var("ALERTS_CACHE_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|ttl: &i64| *ttl >= 0)
                .unwrap_or(defaults.cache_ttl_secs),

            results_limit: env::var("ALERTS_RESULTS_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|limit: &u32| *limit > 0)
                .unwrap_or(defaults.results_limit),

            incident_fallback: env::var("ALERTS_INCIDENT_FALLBACK")
                .ok()
                .and_then(|v| IncidentFallback::from_name(&v))
                .unwrap_or(defaults.incident_fallback),
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::seconds(self.cache_ttl_secs)
    }
}
