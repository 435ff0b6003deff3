use std::sync::Arc;

use actix_web::{web, App, HttpServer};

use rcon_bridge::config::AppConfig;
use rcon_bridge::formatter::DefaultFormatter;
use rcon_bridge::server::{ws_rcon, BridgeState};
use rcon_bridge::session::SessionHooks;
use rcon_bridge::sse::{get_stream, post_connect, post_rcon};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::load()?;
    tracing::info!(
        "Starting RCON bridge on {}:{} -> {:?} upstream {}:{}",
        config.server.host,
        config.server.port,
        config.bridge.protocol,
        config.bridge.host,
        config.bridge.resolved_port(),
    );

    let state = BridgeState {
        config: config.bridge.clone(),
        formatter: Arc::new(DefaultFormatter),
        hooks: SessionHooks::default(),
    };

    let bridge_path = state.config.path.clone();
    let bind_host = config.server.host.clone();
    let bind_port = config.server.port;

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .route(&bridge_path, web::get().to(ws_rcon))
            .route("/rcon", web::post().to(post_rcon))
            .route("/connect", web::post().to(post_connect))
            .route("/stream", web::get().to(get_stream))
    })
    .bind((bind_host, bind_port))?
    .run()
    .await?;

    Ok(())
}
