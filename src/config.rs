use std::collections::HashMap;
use std::time::Duration;

use ::config::{builder::DefaultState, Config, ConfigBuilder, ConfigError, Environment};
use serde::Deserialize;

use crate::dispatcher::DispatcherConfig;
use crate::queue::QueueNames;
use crate::retry::RetrySchedule;
use crate::simulator::{OutcomeMode, SimulatorConfig};
use crate::types::QueueName;

/// Worker configuration.
///
/// Built from defaults overlaid with `WORKER_`-prefixed environment
/// variables, sections separated by `__`, e.g.
/// `WORKER_SETTLEMENT__TEST_MODE=true` or `WORKER_QUEUE__REDIS_URL=...`.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    pub queue: QueueSettings,
    pub database: DatabaseSettings,
    pub settlement: SettlementSettings,
    pub webhook: WebhookSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueSettings {
    pub redis_url: String,
    pub payment_queue: String,
    pub refund_queue: String,
    pub dequeue_backoff_ms: u64,
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SettlementSettings {
    /// Deterministic outcomes and the accelerated retry schedule.
    pub test_mode: bool,
    pub processing_delay_ms: u64,
    /// Payment outcome forced in test mode.
    pub payment_success: bool,
    pub success_probability: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookSettings {
    pub request_timeout_secs: u64,
    /// Overrides the schedule choice; follows `test_mode` when unset.
    pub accelerated_retries: Option<bool>,
}

impl WorkerConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_sources(None)
    }

    /// Load with explicit `section.key` overrides instead of the
    /// process environment.
    pub fn load_with_overrides(overrides: HashMap<String, String>) -> Result<Self, ConfigError> {
        Self::load_with_sources(Some(overrides))
    }

    fn load_with_sources(overrides: Option<HashMap<String, String>>) -> Result<Self, ConfigError> {
        let mut builder = Self::set_defaults()?;
        if let Some(vars) = overrides {
            for (key, value) in vars {
                builder = builder.set_override(key, value)?;
            }
        } else {
            builder = builder.add_source(
                Environment::with_prefix("WORKER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );
        }

        builder.build()?.try_deserialize()
    }

    fn set_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        Config::builder()
            .set_default("queue.redis_url", "redis://127.0.0.1:6379")?
            .set_default("queue.payment_queue", "payment_jobs")?
            .set_default("queue.refund_queue", "refund_jobs")?
            .set_default("queue.dequeue_backoff_ms", 2_000)?
            .set_default("queue.poll_interval_ms", 1_000)?
            .set_default("database.url", "postgres://postgres@localhost/payments")?
            .set_default("settlement.test_mode", false)?
            .set_default("settlement.processing_delay_ms", 3_000)?
            .set_default("settlement.payment_success", false)?
            .set_default("settlement.success_probability", 0.7)?
            .set_default("webhook.request_timeout_secs", 10)
    }

    pub fn queue_names(&self) -> QueueNames {
        QueueNames {
            payments: QueueName::new(&self.queue.payment_queue),
            refunds: QueueName::new(&self.queue.refund_queue),
        }
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            queues: self.queue_names(),
            poll_interval: Duration::from_millis(self.queue.poll_interval_ms),
            outage_backoff: Duration::from_millis(self.queue.dequeue_backoff_ms),
        }
    }

    pub fn simulator_config(&self) -> SimulatorConfig {
        let payment_outcome = if self.settlement.test_mode {
            OutcomeMode::forced(self.settlement.payment_success)
        } else {
            OutcomeMode::Probabilistic {
                success_probability: self.settlement.success_probability.clamp(0.0, 1.0),
            }
        };

        SimulatorConfig {
            processing_delay: Duration::from_millis(self.settlement.processing_delay_ms),
            payment_outcome,
            refund_outcome: OutcomeMode::AlwaysSucceed,
        }
    }

    pub fn retry_schedule(&self) -> RetrySchedule {
        RetrySchedule::select(
            self.webhook
                .accelerated_retries
                .unwrap_or(self.settlement.test_mode),
        )
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.webhook.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn overrides(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults() {
        let config = WorkerConfig::load_with_overrides(HashMap::new()).expect("defaults load");

        assert_eq!(config.queue.payment_queue, "payment_jobs");
        assert_eq!(config.queue.refund_queue, "refund_jobs");
        assert!(!config.settlement.test_mode);
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.retry_schedule(), RetrySchedule::standard());

        let dispatcher = config.dispatcher_config();
        assert_eq!(dispatcher.outage_backoff, Duration::from_secs(2));
        assert_eq!(dispatcher.queues, QueueNames::default());

        let sim = config.simulator_config();
        assert_eq!(sim.processing_delay, Duration::from_secs(3));
        assert_eq!(
            sim.payment_outcome,
            OutcomeMode::Probabilistic { success_probability: 0.7 }
        );
        assert_eq!(sim.refund_outcome, OutcomeMode::AlwaysSucceed);
    }

    #[test]
    fn test_mode_forces_outcome_and_accelerates_retries() {
        let config = WorkerConfig::load_with_overrides(overrides(&[
            ("settlement.test_mode", "true"),
            ("settlement.payment_success", "true"),
            ("settlement.processing_delay_ms", "10"),
        ]))
        .expect("config loads");

        assert_eq!(config.retry_schedule(), RetrySchedule::accelerated());
        let sim = config.simulator_config();
        assert_eq!(sim.payment_outcome, OutcomeMode::AlwaysSucceed);
        assert_eq!(sim.processing_delay, Duration::from_millis(10));
    }

    #[test]
    fn schedule_override_wins_over_test_mode() {
        let config = WorkerConfig::load_with_overrides(overrides(&[
            ("settlement.test_mode", "true"),
            ("webhook.accelerated_retries", "false"),
        ]))
        .expect("config loads");

        assert_eq!(config.retry_schedule(), RetrySchedule::standard());
        assert_eq!(config.simulator_config().payment_outcome, OutcomeMode::AlwaysFail);
    }

    #[test]
    fn custom_queue_names() {
        let config = WorkerConfig::load_with_overrides(overrides(&[
            ("queue.payment_queue", "p"),
            ("queue.refund_queue", "r"),
        ]))
        .expect("config loads");

        let names = config.queue_names();
        assert_eq!(names.dequeue_order(), vec![QueueName::new("p"), QueueName::new("r")]);
    }
}
