use axum::{http::HeaderValue, middleware, routing::get, Router};
use siteledger_api::{
    api_v1_routes,
    config::{init_tracing, load_config},
    db,
    events::{process_events, EventSender},
    handlers::{self, AppServices},
    openapi, AppState,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config()?;
    init_tracing(config.log_level(), config.log_json);

    info!(
        environment = %config.environment,
        host = %config.host,
        port = config.port,
        "starting siteledger-api"
    );

    let db = Arc::new(db::establish_connection_from_app_config(&config).await?);
    if config.auto_migrate {
        db::run_migrations(&db).await?;
    }

    let (event_tx, event_rx) = mpsc::channel(config.event_channel_capacity);
    let event_sender = EventSender::new(event_tx);
    tokio::spawn(process_events(event_rx));

    let services = AppServices::new(db.clone(), event_sender.clone(), &config);
    let state = AppState {
        db,
        config: Arc::new(config.clone()),
        event_sender,
        services,
    };

    let cors = build_cors_layer(config.cors_allowed_origins.as_deref());

    let app = Router::new()
        .nest("/api/v1", api_v1_routes())
        .route("/", get(handlers::health::service_info))
        .route("/health", get(handlers::health::health_check))
        .route("/health/live", get(handlers::health::health_check))
        .route("/health/ready", get(handlers::health::readiness_check))
        .merge(openapi::swagger_ui())
        .layer(middleware::from_fn(
            siteledger_api::tracing::request_id_middleware,
        ))
        .layer(siteledger_api::tracing::configure_http_tracing())
        .layer(CompressionLayer::new())
        .layer(cors)
        .with_state(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server stopped");
    Ok(())
}

fn build_cors_layer(allowed_origins: Option<&str>) -> CorsLayer {
    match allowed_origins {
        Some(origins) if !origins.trim().is_empty() => {
            let parsed: Vec<HeaderValue> = origins
                .split(',')
                .filter_map(|origin| {
                    let origin = origin.trim();
                    match origin.parse::<HeaderValue>() {
                        Ok(value) => Some(value),
                        Err(_) => {
                            warn!(origin, "ignoring invalid CORS origin");
                            None
                        }
                    }
                })
                .collect();
            CorsLayer::new()
                .allow_origin(parsed)
                .allow_methods(Any)
                .allow_headers(Any)
        }
        _ => CorsLayer::permissive(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => warn!("failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
