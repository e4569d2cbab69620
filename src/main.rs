mod api;
mod auth;
mod config;
mod db;
mod error;
mod models;
mod schema;
mod services;
mod websocket;

use anyhow::Result;
use axum::{routing::get, Router};

use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::auth::TokenStore;
use crate::config::Config;
use crate::db::DbPool;
use crate::services::live_state::LiveStateChannel;
use crate::websocket::PlayerRegistry;

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub config: Arc<Config>,
    /// Zone every schedule is evaluated in.
    pub timezone: chrono_tz::Tz,
    pub tokens: Arc<TokenStore>,
    pub registry: Arc<PlayerRegistry>,
    pub live: Arc<LiveStateChannel>,
}

use clap::Parser;

#[derive(Parser)]
#[command(version, author = "MARQUEE AUTHORS", about = "Marquee Server\nLicensed under AGPLv3\nCreated by MARQUEE AUTHORS", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Generate a default configuration template to stdout
    #[arg(long)]
    generate_config: bool,
}

/// Full HTTP surface: REST under `/api`, the player/console socket at `/ws`, uploaded media under `/uploads`.
pub fn app(state: AppState) -> Router {
    let media_dir = state.config.media_dir().to_string();
    Router::new()
        .nest("/api", api::routes())
        .route("/ws", get(websocket::ws_handler))
        .nest_service("/uploads", ServeDir::new(media_dir))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.generate_config {
        println!("{}", Config::default_template());
        return Ok(());
    }

    let config_path = cli
        .config
        .unwrap_or_else(|| "server-config.toml".to_string());
    if std::fs::metadata(&config_path).is_err() {
        eprintln!("Error: Configuration file '{}' not found.", config_path);
        eprintln!("Run with --generate-config to see a template.");
        std::process::exit(1);
    }
    let config = Config::load(&config_path)?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("marquee_server={},tower_http=debug", config.logging.level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
    tracing::info!("Loaded configuration from {}", config_path);

    let db_pool = db::create_pool(&config.database.url)?;
    db::run_migrations(&mut db_pool.get()?)?;
    let tokens = TokenStore::load(&db_pool).await?;
    tracing::info!("Database initialized, {} player tokens loaded", tokens.len().await);

    let timezone = config.schedule.tz()?;
    tracing::info!("Evaluating schedules in {}", timezone);

    let state = AppState {
        db: db_pool,
        config: Arc::new(config.clone()),
        timezone,
        tokens: Arc::new(tokens),
        registry: Arc::new(PlayerRegistry::new()),
        live: Arc::new(LiveStateChannel::new()),
    };

    tokio::spawn(services::heartbeat_monitor::run(state.clone()));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let router = app(state);

    let listener_address: std::net::SocketAddr = addr
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid host/port: {}", e))?;

    if let Some(https_config) = &config.server.https {
        if https_config.enabled {
            use axum_server::tls_rustls::RustlsConfig;

            tracing::info!("Starting server in HTTPS mode on {}", addr);

            if !std::path::Path::new(&https_config.cert_path).exists() {
                anyhow::bail!("Certificate file not found: {}", https_config.cert_path);
            }
            if !std::path::Path::new(&https_config.key_path).exists() {
                anyhow::bail!("Key file not found: {}", https_config.key_path);
            }

            let tls_config =
                RustlsConfig::from_pem_file(&https_config.cert_path, &https_config.key_path)
                    .await?;

            axum_server::bind_rustls(listener_address, tls_config)
                .serve(router.into_make_service())
                .await?;

            return Ok(());
        }
    }

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {} (HTTP)", addr);

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
pub fn test_state() -> (AppState, tempfile::TempDir) {
    use crate::config::{DatabaseConfig, LoggingConfig, ScheduleConfig, ServerConfig};

    let (pool, dir) = db::test_support::temp_pool();
    let config = Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 4000,
            https: None,
            public_url: None,
            media_dir: Some(dir.path().join("uploads").to_string_lossy().to_string()),
        },
        database: DatabaseConfig {
            url: dir.path().join("marquee-test.db").to_string_lossy().to_string(),
        },
        schedule: ScheduleConfig::default(),
        players: Default::default(),
        logging: LoggingConfig {
            level: "debug".to_string(),
        },
    };
    let state = AppState {
        db: pool,
        timezone: chrono_tz::Asia::Kolkata,
        config: Arc::new(config),
        tokens: Arc::new(TokenStore::new()),
        registry: Arc::new(PlayerRegistry::new()),
        live: Arc::new(LiveStateChannel::new()),
    };
    (state, dir)
}
