#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use settlement_worker::{
    DispatcherConfig, InMemoryQueue, InMemoryStore, JobDispatcher, OutcomeMode, QueueNames,
    RetrySchedule, SettlementSimulator, SettlementStore, SimulatorConfig, TransportError,
    WebhookEndpoint, WebhookNotifier, WebhookTransport,
};

pub const MERCHANT: &str = "merchant_1";
pub const SECRET: &str = "whsec_test_secret";
pub const URL: &str = "http://merchant.test/webhook";

#[derive(Debug, Clone)]
pub struct SentRequest {
    pub url: String,
    pub signature: String,
    pub body: Vec<u8>,
}

/// Replays a fixed list of responses, then repeats `fallback` forever.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Result<u16, TransportError>>>,
    fallback: Result<u16, TransportError>,
    sent: Mutex<Vec<SentRequest>>,
}

impl ScriptedTransport {
    pub fn always(response: Result<u16, TransportError>) -> Arc<Self> {
        Self::sequence(Vec::new(), response)
    }

    pub fn sequence(
        script: Vec<Result<u16, TransportError>>,
        fallback: Result<u16, TransportError>,
    ) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fallback,
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn sent(&self) -> Vec<SentRequest> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl WebhookTransport for ScriptedTransport {
    async fn post(&self, url: &str, signature: &str, body: &[u8]) -> Result<u16, TransportError> {
        self.sent.lock().unwrap().push(SentRequest {
            url: url.to_string(),
            signature: signature.to_string(),
            body: body.to_vec(),
        });
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }
}

pub fn network_error() -> Result<u16, TransportError> {
    Err(TransportError::Network("connection refused".to_string()))
}

/// No processing delay; refunds always succeed.
pub fn instant(payment_outcome: OutcomeMode) -> SimulatorConfig {
    SimulatorConfig {
        processing_delay: Duration::ZERO,
        payment_outcome,
        refund_outcome: OutcomeMode::AlwaysSucceed,
    }
}

pub fn fast_dispatcher_config() -> DispatcherConfig {
    DispatcherConfig {
        queues: QueueNames::default(),
        poll_interval: Duration::from_millis(50),
        outage_backoff: Duration::from_secs(2),
    }
}

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub queue: Arc<InMemoryQueue>,
    pub transport: Arc<ScriptedTransport>,
    pub notifier: Arc<WebhookNotifier>,
    pub simulator: Arc<SettlementSimulator>,
    pub dispatcher: Arc<JobDispatcher>,
}

impl Harness {
    /// Accelerated retry schedule; run retrying tests with paused time.
    pub async fn new(transport: Arc<ScriptedTransport>, config: SimulatorConfig) -> Self {
        Self::with_schedule(transport, config, RetrySchedule::accelerated()).await
    }

    pub async fn with_schedule(
        transport: Arc<ScriptedTransport>,
        config: SimulatorConfig,
        schedule: RetrySchedule,
    ) -> Self {
        let store = Arc::new(InMemoryStore::new());
        store.set_endpoint(MERCHANT, WebhookEndpoint::new(URL, SECRET)).await;
        let store_dyn: Arc<dyn SettlementStore> = store.clone();

        let queue = Arc::new(InMemoryQueue::new());
        let notifier = Arc::new(WebhookNotifier::new(
            store_dyn.clone(),
            transport.clone(),
            schedule,
        ));
        let simulator = Arc::new(
            SettlementSimulator::new(store_dyn, notifier.clone(), config).with_seed(7),
        );
        let dispatcher = Arc::new(JobDispatcher::new(
            queue.clone(),
            queue.clone(),
            simulator.clone(),
            fast_dispatcher_config(),
        ));

        Self {
            store,
            queue,
            transport,
            notifier,
            simulator,
            dispatcher,
        }
    }
}
