//! Loopback admin server.
//!
//! Serves the bundled UI and a small JSON API over `127.0.0.1` only. Every
//! response carries the security headers; every request passes the host check;
//! everything but the UI shell needs the per-process auth token.

mod error;
pub mod guard;
mod handlers;
pub mod state_file;
pub mod usage;
pub mod validate;

pub use error::ApiError;
pub use handlers::EDITABLE_FILES;
pub use state_file::{STATE_FILE_NAME, ServerInfo, StateFile};

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderName, HeaderValue, header},
    middleware,
    routing::{get, post},
};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::set_header::SetResponseHeaderLayer;

use crate::config::DaemonConfig;
use crate::keybox::{CommandNotifier, CrlOracle, KeyboxMaintainer, KeyboxRegistry};
use crate::state::{ControlState, SharedState};
use crate::store::ConfigStore;
use crate::{Error, Result};
use usage::CpuSampler;

/// Largest request body accepted.
pub const MAX_BODY_BYTES: usize = 5 * 1024 * 1024;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub shared: SharedState,
    /// Auth token for this process
    pub token: Arc<str>,
    /// Canonical config directory
    pub base: Arc<PathBuf>,
    pub maintainer: Arc<KeyboxMaintainer>,
    pub cpu: Arc<std::sync::Mutex<CpuSampler>>,
}

impl AppState {
    /// `base` must already be canonical.
    pub fn new(
        shared: SharedState,
        token: impl Into<Arc<str>>,
        base: PathBuf,
        maintainer: Arc<KeyboxMaintainer>,
    ) -> Self {
        Self {
            shared,
            token: token.into(),
            base: Arc::new(base),
            maintainer,
            cpu: Arc::new(std::sync::Mutex::new(CpuSampler::default())),
        }
    }
}

fn security_header(name: HeaderName, value: &'static str) -> SetResponseHeaderLayer<HeaderValue> {
    SetResponseHeaderLayer::overriding(name, HeaderValue::from_static(value))
}

/// Build the router with all guards applied.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::serve_index))
        .route("/index.html", get(handlers::serve_index))
        .route(
            "/api/config",
            get(handlers::get_config).post(handlers::set_config),
        )
        .route("/api/profiles", get(handlers::get_profiles))
        .route("/api/profile", post(handlers::apply_profile_handler))
        .route("/api/file", get(handlers::get_file).post(handlers::save_file))
        .route("/api/resource_usage", get(handlers::resource_usage))
        .route(
            "/api/keyboxes",
            get(handlers::list_keyboxes).post(handlers::import_keybox),
        )
        .route("/api/keyboxes/toggle", post(handlers::toggle_keybox))
        .route("/api/keyboxes/verify", post(handlers::verify_keyboxes))
        .fallback(handlers::not_found)
        .layer(
            // Outermost first
            ServiceBuilder::new()
                .layer(security_header(header::X_CONTENT_TYPE_OPTIONS, "nosniff"))
                .layer(security_header(header::X_FRAME_OPTIONS, "DENY"))
                .layer(security_header(
                    header::CONTENT_SECURITY_POLICY,
                    "default-src 'self' 'unsafe-inline'",
                ))
                .layer(security_header(header::REFERRER_POLICY, "no-referrer"))
                .layer(security_header(header::CACHE_CONTROL, "no-store"))
                .layer(middleware::from_fn(guard::host_guard))
                .layer(middleware::from_fn_with_state(
                    state.clone(),
                    guard::auth_guard,
                ))
                .layer(DefaultBodyLimit::disable())
                .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES)),
        )
        .with_state(state)
}

/// Start the daemon: admin server, trigger observer and keybox maintainer.
///
/// Returns after a shutdown signal, once the state file has been removed.
pub async fn start_server(config: &DaemonConfig) -> Result<()> {
    let store = ConfigStore::open(config.config_dir())?;
    let keyboxes = KeyboxRegistry::open(config.config_dir())?;
    let base = std::fs::canonicalize(store.root()).map_err(|e| Error::store_io(store.root(), e))?;
    if let Err(problem) = crate::sys::check_private_dir(&base) {
        tracing::warn!(%problem, "config directory is not private");
    }
    let shared = ControlState::new(store, keyboxes).into_shared();

    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, config.port()));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let port = listener.local_addr()?.port();

    let info = ServerInfo {
        port,
        token: uuid::Uuid::new_v4().to_string(),
    };
    let state_file = StateFile::new(&base);
    state_file
        .write(&info)
        .map_err(|e| Error::store_io(state_file.path(), e))?;

    let maintainer = Arc::new(KeyboxMaintainer::new(
        shared.clone(),
        Arc::new(CrlOracle::new(&config.oracle_url, config.oracle_timeout())),
        Arc::new(CommandNotifier::new(
            &config.notify_program,
            config.notify_timeout(),
        )),
        port,
        config.oracle_timeout(),
    ));

    let maintainer_task = tokio::spawn(Arc::clone(&maintainer).run(config.schedule()));
    let observer_task = tokio::spawn(crate::observer::watch_triggers(
        shared.clone(),
        base.clone(),
        config.poll_interval(),
        maintainer.scan_handle(),
    ));

    let app = build_router(AppState::new(shared, info.token.clone(), base, maintainer));

    tracing::info!(port, "admin server listening on 127.0.0.1");
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    maintainer_task.abort();
    observer_task.abort();
    if let Err(e) = state_file.delete() {
        tracing::warn!(error = %e, "failed to remove state file");
    }
    tracing::info!("admin server stopped");

    served.map_err(Error::Io)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received");
}
