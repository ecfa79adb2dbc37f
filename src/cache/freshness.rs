//! Freshness and completeness rules for shadow-cache rows.

use crate::model::{aspect_complete_key, aspect_created_key, Instance, COMPLETE, DATE_CACHE_CREATED};
use chrono::{DateTime, Duration, Utc};
use log::warn;

/// How long a cached row stays usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    ttl: Duration,
}

impl CachePolicy {
    pub fn from_days(days: i64) -> Self {
        Self {
            ttl: Duration::days(days),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fresh while `now - created <= ttl`; the boundary itself is still fresh.
    pub fn is_fresh(&self, created: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now - created <= self.ttl
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::from_days(30)
    }
}

/// Timestamps come back from the store as RFC 3339 strings in extended data.
pub fn timestamp(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

pub fn created_at(instance: &Instance, key: &str) -> Option<DateTime<Utc>> {
    instance.extended(key).and_then(timestamp)
}

/// Drop rows that are stale or carry no creation date.
pub fn retain_fresh(instances: Vec<Instance>, policy: &CachePolicy, now: DateTime<Utc>) -> Vec<Instance> {
    let total = instances.len();
    let fresh: Vec<Instance> = instances
        .into_iter()
        .filter(|instance| match created_at(instance, DATE_CACHE_CREATED) {
            Some(created) => policy.is_fresh(created, now),
            None => false,
        })
        .collect();

    if fresh.len() < total {
        warn!("dropped {} stale or undated cache rows", total - fresh.len());
    }
    fresh
}

/// An aspect counts only when flagged complete and created within the ttl.
pub fn aspect_is_complete(instance: &Instance, aspect: &str, policy: &CachePolicy, now: DateTime<Utc>) -> bool {
    let flagged = instance
        .extended_bool(&aspect_complete_key(aspect))
        .unwrap_or(false);
    let fresh = created_at(instance, &aspect_created_key(aspect))
        .map(|created| policy.is_fresh(created, now))
        .unwrap_or(false);
    flagged && fresh
}

/// Record the overall `Complete` verdict on the instance and return it.
pub fn apply_completeness(
    instance: &mut Instance,
    aspects: &[String],
    policy: &CachePolicy,
    now: DateTime<Utc>,
) -> bool {
    let complete = aspects
        .iter()
        .all(|aspect| aspect_is_complete(instance, aspect, policy, now));
    instance.set_extended(COMPLETE, serde_json::Value::Bool(complete));
    complete
}
