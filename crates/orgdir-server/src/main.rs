use std::sync::Arc;

use clap::Parser;
use orgdir_core::ids::{IdGenerator, Snowflake};
use orgdir_server::cli::{Cli, Command};
use orgdir_server::config::{AppConfig, LogFormat, StorageBackend};
use orgdir_server::metrics::Metrics;
use orgdir_server::rest::{self, AppState};
use orgdir_server::service::DirectoryService;
use orgdir_storage::{DirectoryStore, InMemoryStore, PostgresStore};

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.level));
    let registry = tracing_subscriber::registry().with(filter);

    match config.log.format {
        LogFormat::Json => {
            let fmt_layer = tracing_subscriber::fmt::layer().json();
            registry.with(fmt_layer).init();
        }
        LogFormat::Pretty => {
            let fmt_layer = tracing_subscriber::fmt::layer().pretty();
            registry.with(fmt_layer).init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref())?;
    init_logging(&config);

    match cli.command {
        Some(Command::Migrate) => run_migrate(&config).await,
        Some(Command::Init) => run_init(&config).await,
        Some(Command::Serve) | None => run_serve(config).await,
    }
}

async fn run_migrate(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!("running database migrations");
    let pool = sqlx::PgPool::connect(&config.database.url).await?;
    orgdir_storage::postgres::migrations::run_migrations(&pool).await?;
    tracing::info!("migrations completed successfully");
    Ok(())
}

fn build_service<S: DirectoryStore>(
    config: &AppConfig,
    store: S,
) -> Result<DirectoryService<S>, Box<dyn std::error::Error>> {
    let ids: Arc<dyn IdGenerator> = Arc::new(Snowflake::new(config.ids.node_id)?);
    Ok(DirectoryService::new(store, ids, config.request_timeout()))
}

async fn connect_postgres(config: &AppConfig) -> Result<PostgresStore, Box<dyn std::error::Error>> {
    let store =
        PostgresStore::connect(&config.database.url, config.database.max_connections).await?;
    tracing::info!(max_connections = config.database.max_connections, "connected to postgres");
    Ok(store)
}

async fn run_init(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let report = match config.storage.backend {
        StorageBackend::Postgres => {
            let service = build_service(config, connect_postgres(config).await?)?;
            service.bootstrap(&config.bootstrap).await?
        }
        StorageBackend::Memory => {
            tracing::warn!("initializing the in-memory backend; nothing will persist");
            let service = build_service(config, InMemoryStore::new())?;
            service.bootstrap(&config.bootstrap).await?
        }
    };

    println!("Directory initialized");
    println!("  Root tenant: {}", report.root_tenant);
    println!("  Admin user:  {}", report.admin_user);
    if report.created.is_empty() {
        println!("  Nothing created; every built-in record already existed.");
    } else {
        println!("  Created:     {}", report.created.join(", "));
    }
    Ok(())
}

async fn run_serve(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    match config.storage.backend {
        StorageBackend::Postgres => {
            let store = connect_postgres(&config).await?;
            serve(config, store).await
        }
        StorageBackend::Memory => serve(config, InMemoryStore::new()).await,
    }
}

async fn serve<S: DirectoryStore + 'static>(
    config: AppConfig,
    store: S,
) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(
        http_addr = %config.http_addr(),
        backend = ?config.storage.backend,
        "starting orgdir server"
    );

    let service = build_service(&config, store)?;
    if config.bootstrap.enabled {
        service.bootstrap(&config.bootstrap).await?;
    }

    let state = AppState {
        service: Arc::new(service),
        metrics: Arc::new(Metrics::new()),
    };
    let router = rest::create_router(state);

    let addr: std::net::SocketAddr = config.http_addr().parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "REST server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = ctrl_c => { tracing::info!("received SIGINT"); }
                _ = sigterm.recv() => { tracing::info!("received SIGTERM"); }
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to register SIGTERM handler, using SIGINT only");
            let _ = ctrl_c.await;
            tracing::info!("received SIGINT");
        }
    }
}
