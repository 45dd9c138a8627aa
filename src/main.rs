//! postgres-operator entrypoint
//!
//! Startup is fail-fast: missing `DATABASE_URL`, a failed initial connection,
//! or an unbindable probe address all exit with code 1 before the controller
//! starts. Once running, no reconciliation error can bring the process down;
//! failures land in object status and the work queue.

use anyhow::Context as _;
use clap::Parser;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod, Runtime};
use futures::StreamExt;
use kube::runtime::{watcher, Controller};
use kube::{Api, Client};
use postgres_operator::config::{ControllerArgs, DatabaseConfig, Settings};
use postgres_operator::crd::PostgreSQL;
use postgres_operator::probes;
use postgres_operator::reconciler::{self, Context};
use postgres_operator::store::PgTableStore;
use std::sync::Arc;
use tokio_postgres::NoTls;
use tracing::{debug, error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        error!(error = ?err, "startup failed");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let args = ControllerArgs::parse();
    let settings = Settings::load()?;
    info!("configuration loaded");
    info!(addr = %args.metrics_bind_address, "metrics endpoint address bound to flag (reserved)");
    if args.leader_elect {
        info!("leader election enabled; the election itself is managed by the deployment environment");
    }

    let pool = connect_database(&settings.database).await?;
    info!(max_size = settings.database.max_pool_size, "database pool created");

    let client = Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;
    let api: Api<PostgreSQL> = Api::all(client.clone());

    let store = Arc::new(PgTableStore::new(
        pool.clone(),
        settings.database.statement_timeout,
    ));
    let context = Arc::new(Context::new(client, store, settings.backoff.clone()));

    // Probes must answer before the controller counts as started.
    let probe_listener = probes::bind(args.health_probe_bind_address)
        .await
        .context("failed to bind health probe address")?;
    let probe_server = tokio::spawn(probes::serve(probe_listener));

    info!("starting manager");
    Controller::new(api, watcher::Config::default())
        .shutdown_on_signal()
        .run(reconciler::reconcile, reconciler::error_policy, context)
        .for_each(|result| async move {
            match result {
                Ok((obj, _)) => debug!(object = %obj.name, "reconcile scheduled outcome applied"),
                Err(err) => debug!(error = %err, "reconcile dispatch error"),
            }
        })
        .await;

    probe_server.abort();
    pool.close();
    info!("shutdown complete");
    Ok(())
}

/// Initialize tracing with structured logging
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,postgres_operator=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .compact(),
        )
        .init();
}

/// Build the shared connection pool from `DATABASE_URL` and verify it with a
/// round-trip query. Any failure here aborts startup.
async fn connect_database(config: &DatabaseConfig) -> anyhow::Result<Pool> {
    let pg_config: tokio_postgres::Config = config
        .url
        .parse()
        .context("failed to parse DATABASE_URL")?;

    let manager = Manager::from_config(
        pg_config,
        NoTls,
        ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        },
    );
    let pool = Pool::builder(manager)
        .max_size(config.max_pool_size)
        .wait_timeout(Some(config.pool_wait_timeout))
        .runtime(Runtime::Tokio1)
        .build()
        .context("failed to create connection pool")?;

    let client = pool
        .get()
        .await
        .context("failed to acquire initial connection")?;
    client
        .query_one("SELECT 1", &[])
        .await
        .context("failed to verify database connection")?;

    Ok(pool)
}
