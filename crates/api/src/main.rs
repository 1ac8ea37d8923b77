use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderName, Method, StatusCode};
use axum::Router;
use relay_core::clock::{Clock, SystemClock};
use relay_core::wait::WaitRegistry;
use relay_db::lock::{PgAdvisoryLock, SweepLock};
use relay_db::repositories::{PerpetualTaskRepo, TaskRepo};
use relay_db::store::{PerpetualTaskStore, TaskStore};
use relay_events::EventBus;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use relay_api::config::ServerConfig;
use relay_api::engine::handlers::builtin_handlers;
use relay_api::engine::{PerpetualTaskService, SyncTaskCache, TaskDispatcher, TaskReaper};
use relay_api::ws::{DelegateRegistry, TaskBroadcaster};
use relay_api::{background, routes, state, ws};

use state::AppState;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relay_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = relay_db::create_pool(&database_url)
        .await
        .expect("Failed to connect to database");
    tracing::info!("Database connection pool created");

    relay_db::health_check(&pool)
        .await
        .expect("Database health check failed");
    tracing::info!("Database health check passed");

    relay_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    // --- CORS ---
    let cors = build_cors_layer(&config);

    // --- Fleet registry + heartbeat ---
    let registry = Arc::new(DelegateRegistry::new());
    let heartbeat_handle = ws::start_heartbeat(Arc::clone(&registry));

    // --- Engine wiring (constructed here, injected everywhere) ---
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let bus = Arc::new(EventBus::default());
    let broadcaster = TaskBroadcaster::new(Arc::clone(&registry));
    let waits = Arc::new(WaitRegistry::new());
    let sync_cache = Arc::new(SyncTaskCache::new());
    let task_store: Arc<dyn TaskStore> = Arc::new(TaskRepo::new(pool.clone()));
    let perpetual_store: Arc<dyn PerpetualTaskStore> =
        Arc::new(PerpetualTaskRepo::new(pool.clone()));
    let sweep_lock: Arc<dyn SweepLock> = Arc::new(PgAdvisoryLock::new(
        pool.clone(),
        config.dispatch.lock_acquire_timeout(),
    ));

    let dispatcher = Arc::new(TaskDispatcher::new(
        Arc::clone(&task_store),
        Arc::clone(&waits),
        Arc::clone(&sync_cache),
        broadcaster.clone(),
        Arc::clone(&bus),
        Arc::clone(&clock),
        config.dispatch.clone(),
    ));

    let perpetual = Arc::new(PerpetualTaskService::new(
        Arc::clone(&perpetual_store),
        Arc::new(builtin_handlers()),
        Arc::clone(&registry),
        broadcaster.clone(),
        Arc::clone(&bus),
        Arc::clone(&clock),
        config.dispatch.clone(),
    ));

    // --- Background loops ---
    let engine_cancel = tokio_util::sync::CancellationToken::new();

    let reaper = TaskReaper::new(
        Arc::clone(&task_store),
        Arc::clone(&waits),
        Arc::clone(&sync_cache),
        broadcaster.clone(),
        sweep_lock,
        Arc::clone(&bus),
        Arc::clone(&clock),
        config.dispatch.clone(),
    );
    let reaper_cancel = engine_cancel.clone();
    let reaper_handle = tokio::spawn(async move {
        reaper.run(reaper_cancel).await;
    });

    let assignment_handle = tokio::spawn({
        let perpetual = Arc::clone(&perpetual);
        let cancel = engine_cancel.clone();
        async move {
            perpetual.run(cancel).await;
        }
    });

    let wait_cleanup_handle = tokio::spawn(background::wait_cleanup::run(
        Arc::clone(&waits),
        Arc::clone(&clock),
        config.dispatch.clone(),
        engine_cancel.clone(),
    ));

    tracing::info!("Dispatch engine started (reaper, assignment loop, wait cleanup)");

    // --- App state ---
    let state = AppState {
        pool,
        config: Arc::new(config.clone()),
        clock,
        registry: Arc::clone(&registry),
        broadcaster,
        bus,
        task_store,
        dispatcher,
        perpetual,
    };

    // --- Request ID header name ---
    let request_id_header = HeaderName::from_static("x-request-id");

    // --- Router ---
    let app = Router::new()
        // Health check at root level (not under /api/v1).
        .merge(routes::health::router())
        // API v1 routes.
        .nest("/api/v1", routes::api_routes())
        // Request timeout, applied only to the routes above. The
        // blocking sync submission is mounted after this layer: it
        // legitimately waits for the task's own execution budget.
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(config.request_timeout_secs),
        ))
        .merge(routes::tasks::sync_router())
        // -- Middleware stack for every route (applied bottom-up) --
        // Panic recovery: catch panics and return 500 JSON.
        .layer(CatchPanicLayer::new())
        // Propagate request ID to response.
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        // Structured request/response tracing.
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        // Set request ID on incoming requests.
        .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
        // CORS.
        .layer(cors)
        // Shared state.
        .with_state(state);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    // Stop the engine loops first so nothing re-announces work while
    // the fleet is being disconnected.
    engine_cancel.cancel();
    let drain = Duration::from_secs(config.shutdown_timeout_secs);
    let _ = tokio::time::timeout(drain, reaper_handle).await;
    let _ = tokio::time::timeout(drain, assignment_handle).await;
    let _ = tokio::time::timeout(drain, wait_cleanup_handle).await;
    tracing::info!("Dispatch engine stopped");

    let count = registry.connection_count().await;
    tracing::info!(count, "Closing remaining delegate connections");
    registry.shutdown_all().await;

    heartbeat_handle.abort();
    tracing::info!("Heartbeat task stopped");

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the server
/// shuts down cleanly whether stopped interactively or by a process
/// manager (e.g. systemd, Docker, Kubernetes).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}

/// Build the CORS middleware layer from server configuration.
///
/// Panics at startup if any configured origin is invalid, which is the
/// desired behaviour -- we want misconfiguration to fail fast.
fn build_cors_layer(config: &ServerConfig) -> CorsLayer {
    let origins: Vec<_> = config
        .cors_origins
        .iter()
        .map(|o| {
            o.parse()
                .unwrap_or_else(|e| panic!("Invalid CORS origin '{o}': {e}"))
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_credentials(true)
        .max_age(Duration::from_secs(3600))
}
