use log::*;
use std::time::Duration;

/// Snapshot of the streaming settings every `StreamManager` is built with.
///
/// The first block mirrors the operator-facing options loaded by the
/// `service` crate. The second block holds the engine constants.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Poll cadence and the initial backoff value.
    pub poll_interval: Duration,
    /// Hard upper bound on a single client's lifetime. `None` disables it.
    pub stream_timeout: Option<Duration>,
    /// Live client cap for one tenant stream.
    pub max_connections: usize,
    /// Concurrent connection cap across all streams for one user.
    pub max_connections_per_user: usize,
    /// Emit a `heartbeat` event on every poll tick.
    pub enable_heartbeat: bool,
    /// Cadence of the per-client `ping`. Clients silent for twice this long are dropped.
    pub heartbeat_interval: Duration,
    /// Reserved; the core does not batch.
    pub max_batch_size: usize,

    pub send_queue_capacity: usize,
    pub send_timeout: Duration,
    pub max_consecutive_errors: u32,
    pub max_backoff: Duration,
    pub idle_timeout: Duration,
    pub max_sent_items: usize,
    pub ledger_scrub_interval: Duration,
    pub ledger_retention: Duration,
    pub max_write_errors: u32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(2000),
            stream_timeout: Some(Duration::from_secs(3600)),
            max_connections: 100,
            max_connections_per_user: 5,
            enable_heartbeat: true,
            heartbeat_interval: Duration::from_secs(30),
            max_batch_size: 100,

            send_queue_capacity: 100,
            send_timeout: Duration::from_millis(100),
            max_consecutive_errors: 5,
            max_backoff: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(30 * 60),
            max_sent_items: 10_000,
            ledger_scrub_interval: Duration::from_secs(5 * 60),
            ledger_retention: Duration::from_secs(10 * 60),
            max_write_errors: 3,
        }
    }
}

impl StreamConfig {
    /// Backoff applied after a failed fetch once the error streak reaches
    /// `max_consecutive_errors`: `backoff * 2^(errors - max)`, capped at `max_backoff`.
    pub fn backoff_for(&self, backoff: Duration, consecutive_errors: u32) -> Option<Duration> {
        if consecutive_errors < self.max_consecutive_errors {
            return None;
        }
        let exponent = (consecutive_errors - self.max_consecutive_errors).min(31) as i32;
        let delay = backoff.as_secs_f64() * 2_f64.powi(exponent);
        Some(Duration::from_secs_f64(
            delay.min(self.max_backoff.as_secs_f64()),
        ))
    }

    /// Replaces values the runtime cannot run with (zero cadences and an
    /// empty send queue) by their defaults.
    pub fn normalized(self) -> Self {
        let defaults = Self::default();
        let mut config = self;
        if config.poll_interval.is_zero() {
            warn!("Stream poll interval must be positive, using {:?}", defaults.poll_interval);
            config.poll_interval = defaults.poll_interval;
        }
        if config.heartbeat_interval.is_zero() {
            warn!(
                "Stream heartbeat interval must be positive, using {:?}",
                defaults.heartbeat_interval
            );
            config.heartbeat_interval = defaults.heartbeat_interval;
        }
        if config.send_queue_capacity == 0 {
            config.send_queue_capacity = defaults.send_queue_capacity;
        }
        config
    }

    /// Clients whose last successful ping is older than this are cleaned up.
    pub fn idle_client_threshold(&self) -> Duration {
        self.heartbeat_interval * 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_backoff_below_error_threshold() {
        let config = StreamConfig::default();
        assert_eq!(config.backoff_for(config.poll_interval, 4), None);
    }

    #[test]
    fn backoff_doubles_per_error_past_threshold() {
        let config = StreamConfig {
            poll_interval: Duration::from_secs(1),
            ..StreamConfig::default()
        };

        assert_eq!(
            config.backoff_for(config.poll_interval, 5),
            Some(Duration::from_secs(1))
        );
        assert_eq!(
            config.backoff_for(config.poll_interval, 6),
            Some(Duration::from_secs(2))
        );
        assert_eq!(
            config.backoff_for(config.poll_interval, 8),
            Some(Duration::from_secs(8))
        );
    }

    #[test]
    fn zero_cadences_fall_back_to_defaults() {
        let config = StreamConfig {
            poll_interval: Duration::ZERO,
            heartbeat_interval: Duration::ZERO,
            send_queue_capacity: 0,
            max_connections: 7,
            ..StreamConfig::default()
        }
        .normalized();

        let defaults = StreamConfig::default();
        assert_eq!(config.poll_interval, defaults.poll_interval);
        assert_eq!(config.heartbeat_interval, defaults.heartbeat_interval);
        assert_eq!(config.send_queue_capacity, defaults.send_queue_capacity);
        assert_eq!(config.max_connections, 7);
    }

    #[test]
    fn backoff_is_capped() {
        let config = StreamConfig::default();
        let delay = config.backoff_for(Duration::from_secs(2), 40).unwrap();
        assert_eq!(delay, config.max_backoff);
    }
}
