use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    auth::resolve_caller,
    engine::{Engine, Limits},
    handlers::{
        create_secret, delete_secret, get_secret_info, health, list_secrets, redeem_secret,
    },
    store::{crypto, Store},
    AppState,
};

pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: Option<PathBuf>,
    pub sweep_interval: Duration,
    pub cors_origins: Option<String>,
    /// Whether unauthenticated callers may create secrets
    /// (`HUSH_ALLOW_ANONYMOUS`, default true).
    pub allow_anonymous: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("HUSH_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: std::env::var("HUSH_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            data_dir: std::env::var("HUSH_DATA_DIR").ok().map(PathBuf::from),
            sweep_interval: Duration::from_secs(300),
            cors_origins: std::env::var("HUSH_CORS_ORIGINS").ok(),
            allow_anonymous: std::env::var("HUSH_ALLOW_ANONYMOUS")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(true),
        }
    }
}

/// Resolve the data directory, creating it if needed.
pub fn resolve_data_dir(data_dir: Option<&PathBuf>) -> Result<PathBuf> {
    match data_dir {
        Some(d) => {
            std::fs::create_dir_all(d).context("create data dir")?;
            Ok(d.clone())
        }
        None => crate::dirs::data_dir(),
    }
}

/// Load the encryption key: `HUSH_KEY_FILE` if set, otherwise
/// `hush.key` in the data dir (generated on first run). The key never
/// appears in logs and is never stored next to ciphertext.
fn load_or_create_key(data_dir: &std::path::Path) -> Result<crypto::EncryptionKey> {
    if let Ok(path) = std::env::var("HUSH_KEY_FILE") {
        return crypto::read_key_file(std::path::Path::new(&path));
    }

    let key_path = data_dir.join("hush.key");
    if key_path.exists() {
        crypto::read_key_file(&key_path)
    } else {
        let key = crypto::generate_key();
        std::fs::write(&key_path, key.as_bytes()).context("write hush.key")?;
        info!("generated new encryption key");
        Ok(key)
    }
}

pub async fn run(cfg: ServerConfig) -> Result<()> {
    let data_dir = resolve_data_dir(cfg.data_dir.as_ref())?;
    info!(data_dir = %data_dir.display(), "using data directory");

    let key = load_or_create_key(&data_dir)?;

    let db_path = data_dir.join("hush.db");
    let store = Store::open(&db_path).context("open store")?;

    // Expiry is lazy on every read; the sweep just keeps listings tidy.
    store.clone().spawn_expiry_sweep(cfg.sweep_interval);

    let state = AppState {
        engine: Engine::new(store, key, Limits::default()),
        allow_anonymous: cfg.allow_anonymous,
    };

    let cors = build_cors(cfg.cors_origins.as_deref());

    // GET addresses a secret by public token; DELETE addresses it by
    // internal id (owners learn ids from the listing, recipients only
    // ever hold tokens).
    let app = Router::new()
        .route("/health", get(health))
        .route("/secrets", post(create_secret))
        .route("/secrets", get(list_secrets))
        .route(
            "/secrets/{token}",
            get(get_secret_info).delete(delete_secret),
        )
        .route("/secrets/{token}/redeem", post(redeem_secret))
        .layer(middleware::from_fn(resolve_caller))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .context("invalid host/port")?;

    info!(%addr, "hush server listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("bind listener")?;

    axum::serve(listener, app).await.context("server error")
}

fn build_cors(origins: Option<&str>) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            http::Method::GET,
            http::Method::POST,
            http::Method::DELETE,
            http::Method::OPTIONS,
        ])
        .allow_headers(Any);

    match origins {
        Some(o) => {
            let origins: Vec<_> = o.split(',').filter_map(|s| s.trim().parse().ok()).collect();
            cors.allow_origin(origins)
        }
        None => cors.allow_origin(Any),
    }
}
