use std::time::Duration;

use crate::config::{Config, DEFAULT_QUERY};

use super::policy::RetryPolicy;

/// Runtime settings for the scheduler, derived from the file config.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub worker_count: usize,
    pub default_query: String,
    pub accepted_mime_types: Vec<String>,
    pub retry: RetryPolicy,
    /// Past this the running pipeline is asked to stop.
    pub soft_timeout: Duration,
    /// Past this the attempt counts as failed whether or not it stopped.
    pub hard_timeout: Duration,
    pub watchdog_interval: Duration,
    /// Extra time past `hard_timeout` before the watchdog reclaims a job.
    pub watchdog_grace: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_count: num_cpus::get(),
            default_query: DEFAULT_QUERY.to_string(),
            accepted_mime_types: vec!["application/pdf".to_string()],
            retry: RetryPolicy::default(),
            soft_timeout: Duration::from_secs(300),
            hard_timeout: Duration::from_secs(360),
            watchdog_interval: Duration::from_secs(30),
            watchdog_grace: Duration::from_secs(30),
        }
    }
}

impl SchedulerConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            worker_count: config.worker_count,
            default_query: config.default_query.clone(),
            accepted_mime_types: config.accepted_mime_types.clone(),
            retry: RetryPolicy::from_config(&config.retry),
            soft_timeout: Duration::from_secs(config.timeouts.soft_secs),
            hard_timeout: Duration::from_secs(config.timeouts.hard_secs),
            watchdog_interval: Duration::from_secs(config.watchdog.interval_secs),
            watchdog_grace: Duration::from_secs(config.watchdog.grace_secs),
        }
    }

    /// How long a `processing` claim may last before it is considered abandoned.
    pub fn stale_after(&self) -> Duration {
        self.hard_timeout.saturating_add(self.watchdog_grace)
    }
}
