//! Background process: startup reconciliation, periodic availability and
//! low-stock sweeps, and a log sink for inventory notifications.

use std::sync::Arc;

use anyhow::Context;

use larder_events::InMemoryEventBus;
use larder_infra::store::{InMemoryInventoryStore, IngredientStore, PostgresInventoryStore, RecipeStore};
use larder_infra::workers::{NotificationWorker, SweepWorker};
use larder_infra::{Larder, LarderConfig, NotificationEnvelope};

fn main() -> anyhow::Result<()> {
    larder_observability::init();

    let config = LarderConfig::from_env().context("invalid configuration")?;

    match config.database_url.as_deref() {
        Some(url) if config.use_persistent_stores => {
            tracing::info!(max_connections = config.db_max_connections, "using postgres store");
            let store = PostgresInventoryStore::connect(url, config.db_max_connections)
                .context("failed to connect to postgres")?;
            store.migrate().context("failed to run migrations")?;
            run(Arc::new(store), &config)
        }
        _ => {
            tracing::warn!("USE_PERSISTENT_STORES not set; using in-memory store");
            run(Arc::new(InMemoryInventoryStore::new()), &config)
        }
    }
}

fn run<S>(store: Arc<S>, config: &LarderConfig) -> anyhow::Result<()>
where
    S: IngredientStore + RecipeStore + 'static,
{
    let bus: Arc<InMemoryEventBus<NotificationEnvelope>> = Arc::new(InMemoryEventBus::new());
    let larder = Larder::new(store, bus.clone(), config.ledger_settings());

    let notifications = NotificationWorker::spawn("larder-notifications", &bus, |env: NotificationEnvelope| {
        tracing::info!(
            event_type = env.event_type(),
            event_id = %env.event_id(),
            payload = ?env.payload(),
            "inventory notification"
        );
        Ok::<(), std::convert::Infallible>(())
    });

    if config.reconcile_on_startup {
        let reports = larder.ledger.reconcile_all().context("startup reconciliation failed")?;
        let repaired = reports.iter().filter(|r| r.repaired).count();
        let broken = reports.iter().filter(|r| r.chain_break.is_some()).count();
        tracing::info!(ingredients = reports.len(), repaired, broken, "startup reconciliation finished");
    }

    let sweeper = larder.clone();
    let sweep = SweepWorker::spawn("larder-sweep", config.sweep_interval, move || {
        sweeper.sweep().map(|_| ())
    });

    tracing::info!(interval_secs = config.sweep_interval.as_secs(), "worker started");
    wait_for_ctrl_c()?;
    tracing::info!("shutting down");

    sweep.shutdown();
    notifications.shutdown();
    Ok(())
}

fn wait_for_ctrl_c() -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build signal runtime")?;
    runtime
        .block_on(tokio::signal::ctrl_c())
        .context("failed to listen for ctrl-c")
}
