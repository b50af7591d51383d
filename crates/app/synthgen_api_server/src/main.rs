//! Synthgen authentication API server.
//!
//! Principals, API keys and one-time tokens live in PostgreSQL. Revocations,
//! attempt counters and locks are short-lived and kept in memory, swept on
//! an interval.

use std::sync::Arc;

use clap::Parser;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use synthgen_api::config::ApiConfig;
use synthgen_core::auth::attempts::InMemoryAttemptStore;
use synthgen_core::auth::events::EventDispatcher;
use synthgen_core::auth::lockout::InMemoryLockoutStore;
use synthgen_core::auth::pg::{PgApiKeyStore, PgOneTimeTokenStore, PgPrincipalStore};
use synthgen_core::auth::revocation::InMemoryRevocationStore;
use synthgen_core::auth::stores::{AuthServices, AuthStores, MemoryStores};
use synthgen_core::auth::sweeper::{Sweep, spawn_sweeper};
use synthgen_core::clock::{Clock, SystemClock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// CLI arguments for the API server.
#[derive(Parser, Debug)]
#[command(name = "synthgen_api_server", about = "Synthgen authentication API server")]
struct Args {
    /// Address to listen on.
    #[arg(long, env = "BIND_ADDR", default_value = "127.0.0.1:3100")]
    bind: String,

    /// PostgreSQL connection URL.
    #[arg(
        long,
        env = "DATABASE_URL",
        default_value = "postgres://localhost:5432/synthgen"
    )]
    database_url: String,

    /// Maximum number of database connections in the pool.
    #[arg(long, default_value_t = 5)]
    max_connections: u32,

    /// Keep every store in memory and skip PostgreSQL. State is lost on exit.
    #[arg(long, default_value_t = false)]
    in_memory: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,synthgen_api=debug,synthgen_core=debug")
            }),
        )
        .init();

    let args = Args::parse();

    let mut config = ApiConfig::from_env()?;
    config.bind_addr = args.bind.clone();
    config.pg_connection_url = args.database_url.clone();
    if config.auth.uses_dev_pepper() {
        warn!("AUTH_API_KEY_PEPPER not set; using the development pepper");
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let cancel = CancellationToken::new();
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    let stores = if args.in_memory {
        info!("starting with in-memory stores");
        let memory = MemoryStores::new();
        for target in memory.sweepables() {
            tasks.push(spawn_sweeper(
                target,
                clock.clone(),
                config.auth.sweep_interval,
                cancel.clone(),
            ));
        }
        memory.stores()
    } else {
        info!(
            database_url = %args.database_url,
            max_connections = args.max_connections,
            "configuring connection pool"
        );
        let pool = PgPoolOptions::new()
            .max_connections(args.max_connections)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .connect(&args.database_url)
            .await?;

        info!("running database migrations");
        synthgen_api::migrate(&pool).await?;

        postgres_stores(pool, &config, clock.clone(), &cancel, &mut tasks)
    };

    let services = AuthServices::build(
        &config.auth,
        config.jwt_secret.as_bytes(),
        stores,
        clock,
        EventDispatcher::default(),
    )?;
    let app = synthgen_api::router(synthgen_api::AppState::new(services, config.clone()));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %listener.local_addr()?, "REST API listening");

    let shutdown = cancel.clone();
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("shutdown signal received"),
                _ = shutdown.cancelled() => {}
            }
        })
        .await;

    cancel.cancel();
    for task in tasks {
        let _ = task.await;
    }

    result?;
    Ok(())
}

/// Durable stores in Postgres; revocations, counters and locks in memory.
fn postgres_stores(
    pool: PgPool,
    config: &ApiConfig,
    clock: Arc<dyn Clock>,
    cancel: &CancellationToken,
    tasks: &mut Vec<JoinHandle<()>>,
) -> AuthStores {
    let revocations = Arc::new(InMemoryRevocationStore::new());
    let attempts = Arc::new(InMemoryAttemptStore::new());
    let locks = Arc::new(InMemoryLockoutStore::new());
    let one_time = Arc::new(PgOneTimeTokenStore::new(pool.clone()));

    let sweepables: [Arc<dyn Sweep>; 3] = [revocations.clone(), attempts.clone(), locks.clone()];
    for target in sweepables {
        tasks.push(spawn_sweeper(
            target,
            clock.clone(),
            config.auth.sweep_interval,
            cancel.clone(),
        ));
    }
    tasks.push(spawn_token_purge(
        one_time.clone(),
        clock,
        config.auth.sweep_interval,
        cancel.clone(),
    ));

    AuthStores {
        principals: Arc::new(PgPrincipalStore::new(pool.clone())),
        revocations,
        attempts,
        locks,
        one_time,
        api_keys: Arc::new(PgApiKeyStore::new(pool)),
    }
}

/// Periodically delete expired one-time tokens from Postgres.
fn spawn_token_purge(
    store: Arc<PgOneTimeTokenStore>,
    clock: Arc<dyn Clock>,
    every: std::time::Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => match store.purge_expired(clock.now()).await {
                    Ok(0) => {}
                    Ok(purged) => info!(purged, "purged expired one-time tokens"),
                    Err(e) => warn!(error = %e, "one-time token purge failed"),
                },
            }
        }
    })
}
