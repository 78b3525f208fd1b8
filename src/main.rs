use std::sync::Arc;

use settlement_worker::{
    telemetry, HttpTransport, JobDispatcher, PostgresStore, RedisQueue, SettlementSimulator,
    SettlementStore, WebhookNotifier, WorkerConfig,
};
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    telemetry::init(true);

    let config = WorkerConfig::load()?;
    info!(
        test_mode = config.settlement.test_mode,
        queues = ?config.queue_names().dequeue_order(),
        "settlement worker starting"
    );

    let queue = Arc::new(RedisQueue::open(&config.queue.redis_url)?);

    let (client, connection) =
        tokio_postgres::connect(&config.database.url, tokio_postgres::NoTls).await?;
    tokio::spawn(async move {
        if let Err(err) = connection.await {
            error!(error = %err, "postgres connection closed");
        }
    });
    let store: Arc<dyn SettlementStore> = Arc::new(PostgresStore::new(client).await?);

    let transport = Arc::new(HttpTransport::with_timeout(config.request_timeout())?);
    let notifier = Arc::new(WebhookNotifier::new(
        store.clone(),
        transport,
        config.retry_schedule(),
    ));
    let simulator = Arc::new(SettlementSimulator::new(
        store,
        notifier,
        config.simulator_config(),
    ));

    let dispatcher = Arc::new(JobDispatcher::new(
        queue.clone(),
        queue,
        simulator,
        config.dispatcher_config(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = dispatcher.spawn(shutdown_rx);

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested; draining in-flight job");
    let _ = shutdown_tx.send(true);
    worker.await?;

    Ok(())
}
