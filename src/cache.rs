//! TTL cache for class evaluations.
//!
//! Entries are keyed by `class_id|start_date|end_date`. Reads and writes each take
//! the lock briefly; two evaluations racing on the same key may both write, and the
//! later write wins.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::models::{DateRange, StudentAlertsResult};

/// Source of "now" for expiry checks and evaluation timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    expires_at: DateTime<Utc>,
    class_label: Option<String>,
    result: StudentAlertsResult,
}

pub struct AlertsCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl AlertsCache {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            clock,
        }
    }

    pub fn key(class_id: Uuid, range: &DateRange) -> String {
        let date = |d: Option<chrono::NaiveDate>| d.map(|d| d.to_string()).unwrap_or_default();
        format!(
            "{}|{}|{}",
            class_id,
            date(range.start_date),
            date(range.end_date)
        )
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Returns the cached result if it is still fresh and was stored under the same
    /// class label. Expired entries are dropped on the way.
    pub fn get(&self, key: &str, class_label: Option<&str>) -> Option<StudentAlertsResult> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();

        let expired = match entries.get(key) {
            None => return None,
            Some(entry) => now > entry.expires_at,
        };
        if expired {
            entries.remove(key);
            debug!(key, "Cache entry expired");
            return None;
        }

        let entry = entries.get(key)?;
        if entry.class_label.as_deref() != class_label {
            debug!(
                key,
                cached = ?entry.class_label,
                requested = ?class_label,
                "Cache label mismatch"
            );
            return None;
        }

        Some(entry.result.clone())
    }

    pub fn insert(&self, key: String, class_label: Option<String>, result: StudentAlertsResult) {
        let expires_at = self.clock.now() + self.ttl;
        self.entries.lock().insert(
            key,
            CacheEntry {
                expires_at,
                class_label,
                result,
            },
        );
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Evicts one exact key when `range` is given, otherwise every key of the class.
    pub fn invalidate_class(&self, class_id: Uuid, range: Option<&DateRange>) -> usize {
        let mut entries = self.entries.lock();
        match range {
            Some(range) => usize::from(entries.remove(&Self::key(class_id, range)).is_some()),
            None => {
                let prefix = format!("{class_id}|");
                let before = entries.len();
                entries.retain(|key, _| !key.starts_with(&prefix));
                before - entries.len()
            }
        }
    }

    /// Evicts every cached class result whose roster lists the student.
    pub fn invalidate_student(&self, student_id: Uuid) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| !entry.result.lists_student(student_id));
        before - entries.len()
    }

    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| now <= entry.expires_at);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
