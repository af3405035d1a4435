//! Builders for test configurations.

#![allow(dead_code)]

use std::time::Duration;

use docanalyst::config::DEFAULT_QUERY;
use docanalyst::scheduler::{Backoff, RetryPolicy, SchedulerConfig};

/// Builder for `SchedulerConfig` with millisecond-scale timings.
pub struct SchedulerConfigBuilder {
    config: SchedulerConfig,
}

impl SchedulerConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: SchedulerConfig {
                worker_count: 2,
                default_query: DEFAULT_QUERY.to_string(),
                accepted_mime_types: vec!["application/pdf".to_string(), "text/plain".to_string()],
                retry: RetryPolicy {
                    max_attempts: 3,
                    backoff: Backoff::Fixed(Duration::from_millis(10)),
                },
                soft_timeout: Duration::from_secs(5),
                hard_timeout: Duration::from_secs(6),
                watchdog_interval: Duration::from_secs(60),
                watchdog_grace: Duration::from_secs(60),
            },
        }
    }

    pub fn workers(mut self, count: usize) -> Self {
        self.config.worker_count = count;
        self
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.retry.max_attempts = attempts;
        self
    }

    pub fn backoff(mut self, backoff: Duration) -> Self {
        self.config.retry.backoff = Backoff::Fixed(backoff);
        self
    }

    pub fn timeouts(mut self, soft: Duration, hard: Duration) -> Self {
        self.config.soft_timeout = soft;
        self.config.hard_timeout = hard;
        self
    }

    pub fn watchdog(mut self, interval: Duration, grace: Duration) -> Self {
        self.config.watchdog_interval = interval;
        self.config.watchdog_grace = grace;
        self
    }

    pub fn accepted_mime_types(mut self, types: &[&str]) -> Self {
        self.config.accepted_mime_types = types.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn build(self) -> SchedulerConfig {
        self.config
    }
}

impl Default for SchedulerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
