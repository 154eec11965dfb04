//! Device-bound token relay: a service that validates mobile device requests and mints
//! short-lived upstream tokens, plus the client that acquires, backs off, and caches them.

#![deny(clippy::all, missing_docs)]

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod obs;
pub mod service;
#[cfg(any(test, feature = "test"))]
pub mod _preludet {
	//! Convenience re-exports and helpers for integration tests; enabled via `cfg(test)` or the
	//! `test` crate feature.

	pub use crate::_prelude::*;

	// std
	use std::net::SocketAddr;
	// crates.io
	use tokio::{net::TcpListener, task::JoinHandle};
	// self
	use crate::{
		auth::{AppVersion, AssertionSigner},
		config::RelayConfig,
		http::ReqwestHttpClient,
		service::{
			RelayService,
			upstream::{OAuthAuthority, UpstreamCredential},
		},
	};

	/// Service email used by test configurations.
	pub const TEST_SERVICE_EMAIL: &str = "relay@test.example";
	/// App version accepted by test configurations.
	pub const TEST_APP_VERSION: &str = "1.0.0";

	/// Builds a relay configuration pointing at `upstream_token_url` that accepts
	/// [`TEST_APP_VERSION`] and carries a freshly generated signing key.
	pub fn test_relay_config(upstream_token_url: &str) -> RelayConfig {
		RelayConfig::new(
			TEST_SERVICE_EMAIL,
			Url::parse("https://relay.test.example/").expect("Failed to parse test audience URL."),
			Url::parse(upstream_token_url).expect("Failed to parse upstream token URL."),
		)
		.with_allowed_app_versions([
			AppVersion::new(TEST_APP_VERSION).expect("Test app version should be valid.")
		])
		.with_signing_key(AssertionSigner::generate(TEST_SERVICE_EMAIL))
	}

	/// Builds a relay service backed by an [`OAuthAuthority`] that authenticates with a client
	/// secret.
	pub fn build_test_service(config: RelayConfig) -> RelayService<OAuthAuthority> {
		let authority: OAuthAuthority = OAuthAuthority::new(
			&config,
			UpstreamCredential::client_secret("upstream-secret"),
			ReqwestHttpClient::default(),
		)
		.expect("Failed to build upstream authority for tests.");

		RelayService::new(config, authority)
	}

	/// Serves the relay router on an ephemeral local port and returns its base URL.
	pub async fn spawn_relay(service: RelayService<OAuthAuthority>) -> (Url, JoinHandle<()>) {
		let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
			.await
			.expect("Failed to bind ephemeral relay listener.");
		let addr = listener.local_addr().expect("Relay listener should expose its address.");
		let app = crate::service::routes::router(Arc::new(service));
		let handle = tokio::spawn(async move {
			axum::serve(listener, app).await.expect("Relay server terminated unexpectedly.");
		});
		let base = Url::parse(&format!("http://{addr}/")).expect("Failed to parse relay URL.");

		(base, handle)
	}
}

mod _prelude {
	pub use std::{
		collections::{BTreeSet, HashMap},
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use parking_lot::Mutex;
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};

	/// Milliseconds since the Unix epoch for `instant`.
	pub fn unix_millis(instant: OffsetDateTime) -> i64 {
		(instant.unix_timestamp_nanos() / 1_000_000) as i64
	}
}

pub use oauth2;
pub use reqwest;
pub use url;
