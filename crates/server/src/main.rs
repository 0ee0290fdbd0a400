//! Tollgate Server
//!
//! Synchronous remote-approval gateway between an autonomous coding agent
//! and a human operator. Agent hooks POST to `/webhook/*`; blocking routes
//! hold the call open until a decision arrives through the operator surface.

mod coordinator;
mod logging;
mod migration_runner;
mod notify;
mod registry;
mod state;
mod store;
mod web_api;
mod webhook;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use tollgate_protocol::EventKind;

use crate::coordinator::{CoordinatorConfig, DecisionCoordinator};
use crate::logging::init_logging;
use crate::notify::{NotificationSender, NtfyConfig, NtfyNotifier};
use crate::state::AppState;
use crate::store::TaskStore;

/// Configuration loaded from environment variables.
struct ServerConfig {
    server_port: u16,
    database_url: PathBuf,
    ntfy_server_url: Option<String>,
    ntfy_topic: String,
    web_domain: String,
    decision_timeout: Duration,
    retention_days: i64,
}

impl ServerConfig {
    fn from_env() -> ServerConfig {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        let default_db = PathBuf::from(home).join(".tollgate").join("tollgate.db");

        ServerConfig {
            server_port: env_or("SERVER_PORT", "8080").parse().unwrap_or(8080),
            database_url: std::env::var("DATABASE_URL")
                .map(PathBuf::from)
                .unwrap_or(default_db),
            ntfy_server_url: std::env::var("NTFY_SERVER_URL").ok().filter(|v| !v.is_empty()),
            ntfy_topic: env_or("NTFY_TOPIC", "tollgate-notifications"),
            web_domain: env_or("WEB_DOMAIN", "localhost:8080"),
            decision_timeout: Duration::from_secs(
                env_or("DECISION_TIMEOUT_SECS", "300").parse().unwrap_or(300),
            ),
            retention_days: env_or("TASK_RETENTION_DAYS", "30").parse().unwrap_or(30),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn main() -> anyhow::Result<()> {
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async_main())
}

async fn async_main() -> anyhow::Result<()> {
    let logging = init_logging()?;
    let run_id = logging.run_id.clone();
    let _log_guard = logging.guard;
    let root_span =
        tracing::info_span!("tollgate_server", service = "tollgate-server", run_id = %run_id);
    let _root_span_guard = root_span.enter();

    let config = ServerConfig::from_env();
    info!(
        component = "server",
        event = "server.starting",
        run_id = %run_id,
        pid = std::process::id(),
        port = config.server_port,
        db_path = %config.database_url.display(),
        "Starting Tollgate Server..."
    );

    // Run database migrations before anything else.
    if let Some(parent) = config.database_url.parent() {
        std::fs::create_dir_all(parent)?;
    }
    {
        let mut conn = rusqlite::Connection::open(&config.database_url)?;
        migration_runner::run_migrations(&mut conn)?;
    }

    let store = Arc::new(TaskStore::open(&config.database_url));

    // The notifier is best-effort; a missing or dead ntfy server never
    // blocks hook processing.
    let notifier: Option<Arc<dyn NotificationSender>> = match &config.ntfy_server_url {
        Some(server_url) => {
            let ntfy = NtfyNotifier::new(NtfyConfig {
                server_url: server_url.clone(),
                topic: config.ntfy_topic.clone(),
                token: std::env::var("NTFY_TOKEN").ok().filter(|v| !v.is_empty()),
                username: std::env::var("NTFY_USERNAME").ok().filter(|v| !v.is_empty()),
                password: std::env::var("NTFY_PASSWORD").ok().filter(|v| !v.is_empty()),
            });
            match ntfy.verify().await {
                Ok(()) => info!(
                    component = "notify",
                    event = "notify.verified",
                    server_url = %server_url,
                    "ntfy server verified"
                ),
                Err(e) => warn!(
                    component = "notify",
                    event = "notify.verify_failed",
                    server_url = %server_url,
                    error = %e,
                    "ntfy verification failed; notifications may not be delivered"
                ),
            }
            Some(Arc::new(ntfy))
        }
        None => {
            warn!(
                component = "notify",
                event = "notify.disabled",
                "NTFY_SERVER_URL not set; push notifications disabled"
            );
            None
        }
    };

    let coordinator = Arc::new(DecisionCoordinator::new(
        store.clone(),
        notifier,
        CoordinatorConfig {
            web_domain: config.web_domain.clone(),
            decision_timeout: config.decision_timeout,
            notify_kinds: vec![EventKind::PreToolUse, EventKind::UserPromptSubmit],
        },
    ));
    let app_state = AppState::new(coordinator.clone(), store.clone());

    // Daily retention sweep for old terminal tasks and their history.
    {
        let store = store.clone();
        let retention_days = config.retention_days;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(24 * 60 * 60));
            loop {
                interval.tick().await;
                match store.purge_tasks_older_than(retention_days).await {
                    Ok(removed) if removed > 0 => info!(
                        component = "retention",
                        event = "retention.swept",
                        removed = removed,
                        retention_days = retention_days,
                        "Purged old tasks"
                    ),
                    Ok(_) => {}
                    Err(e) => warn!(
                        component = "retention",
                        event = "retention.failed",
                        error = %e,
                        "Retention sweep failed"
                    ),
                }
                if let Err(e) = store.purge_history_older_than(retention_days).await {
                    warn!(
                        component = "retention",
                        event = "retention.history_failed",
                        error = %e,
                        "History retention sweep failed"
                    );
                }
            }
        });
    }

    // Build router. No write timeout is imposed on responses, so blocking
    // decision calls can hold their sockets open for the full decision
    // window.
    let app = Router::new()
        .merge(webhook::routes())
        .merge(web_api::routes())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    info!(
        component = "server",
        event = "server.listening",
        bind_address = %addr,
        dashboard = %format!("http://{}/dashboard", config.web_domain),
        webhook = %format!("http://{}/webhook/", config.web_domain),
        "Listening for connections"
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    coordinator.drain_waiters();
    info!(
        component = "server",
        event = "server.stopped",
        "Server shutdown complete"
    );
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(
            component = "server",
            event = "server.signal_failed",
            error = %e,
            "Failed to install shutdown signal handler"
        );
    }
}
