//! Error handling

use thiserror::Error;
use uuid::Uuid;

use crate::models::DateRange;

pub type AlertsResult<T> = Result<T, AlertsError>;

/// Failure of a single metric-provider call.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{0} not found")]
    NotFound(String),

    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum AlertsError {
    /// The class summary is the roster; nothing can be evaluated without it.
    #[error("class analytics unavailable for class {class_id}")]
    ClassAnalytics {
        class_id: Uuid,
        #[source]
        source: ProviderError,
    },

    #[error("invalid date range: start {:?} is after end {:?}", .0.start_date, .0.end_date)]
    InvalidRange(DateRange),
}
