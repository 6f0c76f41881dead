//! Bounded record of item identifiers already delivered by a stream.

use crate::config::StreamConfig;
use log::*;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
pub struct SentLedger {
    /// item id -> item timestamp
    entries: HashMap<String, i64>,
    max_items: usize,
    scrub_interval: Duration,
    retention: Duration,
    last_scrub: Instant,
}

impl SentLedger {
    pub fn new(config: &StreamConfig) -> Self {
        Self {
            entries: HashMap::new(),
            max_items: config.max_sent_items,
            scrub_interval: config.ledger_scrub_interval,
            retention: config.ledger_retention,
            last_scrub: Instant::now(),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn record(&mut self, id: String, timestamp: i64) {
        self.entries.insert(id, timestamp);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Scrubs at most once per scrub interval. Returns the number of evicted
    /// entries when a scrub ran.
    pub fn maybe_scrub(&mut self, now: Instant, now_unix: i64) -> Option<usize> {
        if now.saturating_duration_since(self.last_scrub) < self.scrub_interval {
            return None;
        }
        self.last_scrub = now;
        Some(self.scrub(now_unix))
    }

    /// Evicts entries older than the retention window, then, if the ledger is
    /// still over capacity, evicts the oldest entries down to half capacity.
    fn scrub(&mut self, now_unix: i64) -> usize {
        let before = self.entries.len();
        let cutoff = now_unix - self.retention.as_secs() as i64;
        self.entries.retain(|_, timestamp| *timestamp >= cutoff);

        if self.entries.len() > self.max_items {
            let remove_count = self.entries.len() - self.max_items / 2;
            let mut by_age: Vec<(i64, String)> = self
                .entries
                .iter()
                .map(|(id, timestamp)| (*timestamp, id.clone()))
                .collect();
            by_age.select_nth_unstable_by_key(remove_count - 1, |(timestamp, _)| *timestamp);
            for (_, id) in by_age.iter().take(remove_count) {
                self.entries.remove(id);
            }
        }

        let evicted = before - self.entries.len();
        if evicted > 0 {
            debug!(
                "Scrubbed {evicted} sent ledger entries, {} remaining",
                self.entries.len()
            );
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger(max_items: usize) -> SentLedger {
        SentLedger::new(&StreamConfig {
            max_sent_items: max_items,
            ..StreamConfig::default()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn scrub_is_rate_limited() {
        let mut ledger = ledger(10);
        let start = Instant::now();
        assert!(ledger.is_empty());

        assert_eq!(ledger.maybe_scrub(start, 0), None);
        assert_eq!(
            ledger.maybe_scrub(start + Duration::from_secs(4 * 60), 0),
            None
        );
        assert_eq!(
            ledger.maybe_scrub(start + Duration::from_secs(5 * 60), 0),
            Some(0)
        );
        assert_eq!(
            ledger.maybe_scrub(start + Duration::from_secs(6 * 60), 0),
            None
        );
    }

    #[tokio::test(start_paused = true)]
    async fn scrub_evicts_entries_past_retention() {
        let mut ledger = ledger(10);
        let now_unix = 100_000;
        ledger.record("old".to_string(), now_unix - 11 * 60);
        ledger.record("edge".to_string(), now_unix - 10 * 60);
        ledger.record("fresh".to_string(), now_unix - 60);

        let evicted = ledger.maybe_scrub(Instant::now() + Duration::from_secs(300), now_unix);

        assert_eq!(evicted, Some(1));
        assert!(!ledger.contains("old"));
        assert!(ledger.contains("edge"));
        assert!(ledger.contains("fresh"));
    }

    #[tokio::test(start_paused = true)]
    async fn scrub_over_capacity_keeps_newest_half() {
        let mut ledger = ledger(10);
        let now_unix = 100_000;
        for i in 0..15 {
            ledger.record(format!("item-{i}"), now_unix + i);
        }

        ledger.maybe_scrub(Instant::now() + Duration::from_secs(300), now_unix);

        assert_eq!(ledger.len(), 5);
        for i in 0..10 {
            assert!(!ledger.contains(&format!("item-{i}")));
        }
        for i in 10..15 {
            assert!(ledger.contains(&format!("item-{i}")));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ledger_is_bounded_after_every_scrub() {
        let mut ledger = ledger(100);
        let mut now = Instant::now();
        let now_unix = 100_000;

        for round in 0..5 {
            for i in 0..250 {
                ledger.record(format!("{round}-{i}"), now_unix + i);
            }
            now += Duration::from_secs(300);
            ledger.maybe_scrub(now, now_unix);
            assert!(ledger.len() <= 100);
        }
    }
}
