use crate::clock::to_chrono;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;

/// Width of the value buckets used in signatures
const VALUE_BUCKET: f64 = 5.0;

/// Drops repeats of the same notification inside a time window
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    last_emitted: HashMap<String, DateTime<Utc>>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_emitted: HashMap::new(),
        }
    }

    /// Signature for an event about a value. Values in the same 5-point band
    /// share a signature so jitter does not defeat the window.
    pub fn signature(event: &str, subject: &str, value: f64) -> String {
        let bucket = (value / VALUE_BUCKET).floor() as i64;
        format!("{}:{}:{}", event, subject, bucket)
    }

    /// True if `key` has not been emitted within the window; records the emission
    pub fn should_emit(&mut self, key: &str, now: DateTime<Utc>) -> bool {
        let window = to_chrono(self.window);
        if let Some(last) = self.last_emitted.get(key) {
            if now - *last < window {
                return false;
            }
        }
        self.last_emitted.insert(key.to_string(), now);
        self.last_emitted.retain(|_, at| now - *at < window);
        true
    }

    pub fn len(&self) -> usize {
        self.last_emitted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_emitted.is_empty()
    }

    pub fn clear(&mut self) {
        self.last_emitted.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_suppresses_within_window() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut debouncer = Debouncer::new(Duration::from_secs(30));
        let key = Debouncer::signature("threshold:warning", "cpu", 72.0);

        assert!(debouncer.should_emit(&key, start));
        assert!(!debouncer.should_emit(&key, start + chrono::Duration::seconds(29)));
        assert!(debouncer.should_emit(&key, start + chrono::Duration::seconds(30)));
    }

    #[test]
    fn test_signature_buckets_values() {
        assert_eq!(
            Debouncer::signature("threshold:warning", "cpu", 71.0),
            Debouncer::signature("threshold:warning", "cpu", 74.9)
        );
        assert_ne!(
            Debouncer::signature("threshold:warning", "cpu", 74.9),
            Debouncer::signature("threshold:warning", "cpu", 75.0)
        );
    }

    #[test]
    fn test_expired_entries_pruned() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut debouncer = Debouncer::new(Duration::from_secs(10));
        debouncer.should_emit("a", start);
        debouncer.should_emit("b", start + chrono::Duration::seconds(20));
        assert_eq!(debouncer.len(), 1);
    }
}
