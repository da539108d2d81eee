//! Content-addressed memo of parsed expressions.
//!
//! Entries are keyed by the normalised expression text, so two schedules
//! sharing an expression share one parse and editing a schedule can never
//! leave a stale parse behind.

use super::{CronResult, ParsedCron};
use moka::sync::Cache;
use std::sync::Arc;
use tracing::debug;

/// Default number of distinct expressions kept
pub const DEFAULT_CRON_CACHE_CAPACITY: u64 = 512;

#[derive(Clone)]
pub struct CronCache {
    cache: Cache<String, Arc<ParsedCron>>,
}

impl CronCache {
    pub fn new(max_capacity: u64) -> Self {
        Self {
            cache: Cache::builder().max_capacity(max_capacity).build(),
        }
    }

    /// Canonical key: single spaces, lowercase names
    pub fn normalize(expression: &str) -> String {
        expression
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_ascii_lowercase()
    }

    /// Return the cached parse or parse and remember it. Failures are not cached.
    pub fn get_or_parse(&self, expression: &str) -> CronResult<Arc<ParsedCron>> {
        let key = Self::normalize(expression);
        if let Some(parsed) = self.cache.get(&key) {
            return Ok(parsed);
        }

        let parsed = Arc::new(ParsedCron::parse(&key)?);
        debug!(expression = %key, "Caching parsed cron expression");
        self.cache.insert(key, parsed.clone());
        Ok(parsed)
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.entry_count()
    }

    pub fn clear(&self) {
        self.cache.invalidate_all();
    }
}

impl Default for CronCache {
    fn default() -> Self {
        Self::new(DEFAULT_CRON_CACHE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_expression_shares_parse() {
        let cache = CronCache::default();
        let a = cache.get_or_parse("0 9 * * MON-FRI").unwrap();
        let b = cache.get_or_parse("0  9 * *   mon-fri").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.entry_count(), 1);
    }

    #[test]
    fn test_invalid_expression_not_cached() {
        let cache = CronCache::default();
        assert!(cache.get_or_parse("99 * * * *").is_err());
        assert_eq!(cache.entry_count(), 0);
    }

    #[test]
    fn test_clear() {
        let cache = CronCache::default();
        let before = cache.get_or_parse("*/5 * * * *").unwrap();
        cache.clear();
        assert!(cache.cache.get("*/5 * * * *").is_none());

        let after = cache.get_or_parse("*/5 * * * *").unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
    }
}
