use std::sync::Arc;

use beacon_core::{Clock, RegistryRepository, SessionRepository, SystemClock};
use beacon_db::{MemoryStore, SqliteStore};
use beacon_server::{
    api::{self, AppState},
    config::{Config, StorageBackend},
    telemetry, HttpProber, Registry, SessionStore, TokenAuthority,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio_util::sync::CancellationToken;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() {
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("beacon-server: {e}");
            std::process::exit(2);
        }
    };
    telemetry::init(&config.log);

    if let Err(e) = run(config).await {
        tracing::error!(error = %e, "server exited with error");
        std::process::exit(1);
    }
}

async fn run(config: Config) -> Result<(), BoxError> {
    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();
    metrics::set_global_recorder(recorder).ok();

    let (session_repo, registry_repo): (Arc<dyn SessionRepository>, Arc<dyn RegistryRepository>) =
        match config.storage.backend {
            StorageBackend::Memory => {
                let store = Arc::new(MemoryStore::new());
                (store.clone(), store)
            }
            StorageBackend::Sqlite => {
                let store = Arc::new(SqliteStore::new(&config.storage.path)?);
                (store.clone(), store)
            }
        };
    tracing::info!(backend = ?config.storage.backend, "storage ready");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let tokens = Arc::new(TokenAuthority::new(&config.token, clock.clone())?);
    let sessions = Arc::new(SessionStore::new(session_repo, clock.clone(), &config.session));
    let prober = Arc::new(HttpProber::new(config.registry.health_check_timeout())?);
    let registry = Arc::new(Registry::new(registry_repo, clock, prober, &config.registry));

    let cancel = CancellationToken::new();
    let cleanup = sessions.spawn_cleanup(cancel.clone());
    let monitor = registry.spawn_health_monitor(cancel.clone());

    let state = AppState {
        tokens,
        sessions,
        registry,
        metrics: Some(handle),
    };
    let app = api::router(state, &config.server)?;

    let addr = config.server.socket_addr()?;
    tracing::info!("listening on {}", addr);

    let served = axum::Server::try_bind(&addr)?
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await;

    cancel.cancel();
    let _ = tokio::join!(cleanup, monitor);
    tracing::info!("background tasks stopped");

    served?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("signal received, starting graceful shutdown");
}
