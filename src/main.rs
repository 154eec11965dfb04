//! Relay server binary: loads `RELAY_*` configuration and serves the relay router.

// std
use std::sync::Arc;
// crates.io
use color_eyre::Result;
use tokio::net::TcpListener;
use tower_http::trace::{DefaultMakeSpan, DefaultOnFailure, DefaultOnResponse, TraceLayer};
use tracing::Level;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
// self
use device_token_relay::{
	config::RelayConfig,
	http::ReqwestHttpClient,
	service::{RelayService, routes, upstream::OAuthAuthority},
};

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;
	dotenvy::dotenv().ok();
	tracing_subscriber::registry()
		.with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
		.with(tracing_subscriber::fmt::layer())
		.init();

	let config = RelayConfig::from_env()?;
	let authority: OAuthAuthority =
		OAuthAuthority::from_config(&config, ReqwestHttpClient::new()?)?;
	let bind_addr = config.bind_addr;

	if config.signing_key.is_none() {
		tracing::warn!("No signing key configured; /auth/identity-token will answer 500.");
	}

	let service = RelayService::new(config, authority);
	let app = routes::router(Arc::new(service)).layer(
		TraceLayer::new_for_http()
			.make_span_with(DefaultMakeSpan::default())
			.on_response(DefaultOnResponse::default().level(Level::DEBUG))
			.on_failure(DefaultOnFailure::default().level(Level::ERROR)),
	);
	let listener = TcpListener::bind(bind_addr).await?;

	tracing::info!(%bind_addr, "Relay listening.");

	axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

	Ok(())
}

async fn shutdown_signal() {
	if let Err(e) = tokio::signal::ctrl_c().await {
		tracing::error!(error = %e, "Failed to listen for the shutdown signal.");
	}

	tracing::info!("Shutdown signal received.");
}
