//! Relay service configuration.
//!
//! [`RelayConfig`] is constructed explicitly (builder-style `with_*` methods) or loaded from
//! `RELAY_*` environment variables. The recognized options and their effect:
//!
//! - `replay_window`: validity bound for request timestamps (fixed default of 300 s).
//! - `allowed_app_versions`: version gate applied by the validator.
//! - `signing_key`: enables the self-signed identity assertion path.
//! - `ttl_seconds`: lifetime granted to minted tokens.

// std
use std::net::SocketAddr;
// self
use crate::{
	_prelude::*,
	auth::{AppVersion, AssertionSigner, TokenSecret},
	error::ConfigError,
};

/// Service identity email (`iss`/`sub` of self-signed assertions, upstream client id).
pub const ENV_SERVICE_EMAIL: &str = "RELAY_SERVICE_EMAIL";
/// Canonical URL of this relay (`aud` of self-signed assertions).
pub const ENV_AUDIENCE_URL: &str = "RELAY_AUDIENCE_URL";
/// Upstream token endpoint used by the delegated mint.
pub const ENV_UPSTREAM_TOKEN_URL: &str = "RELAY_UPSTREAM_TOKEN_URL";
/// Fixed audience requested from the upstream authority.
pub const ENV_UPSTREAM_AUDIENCE: &str = "RELAY_UPSTREAM_AUDIENCE";
/// Client secret for the upstream authority.
pub const ENV_UPSTREAM_CLIENT_SECRET: &str = "RELAY_UPSTREAM_CLIENT_SECRET";
/// Comma-separated allow-set of app versions.
pub const ENV_ALLOWED_APP_VERSIONS: &str = "RELAY_ALLOWED_APP_VERSIONS";
/// Standard-base64 Ed25519 seed.
pub const ENV_SIGNING_KEY: &str = "RELAY_SIGNING_KEY";
/// Lifetime of minted tokens in seconds.
pub const ENV_TOKEN_TTL_SECS: &str = "RELAY_TOKEN_TTL_SECS";
/// Enables one-time-use enforcement for device requests.
pub const ENV_REJECT_REPLAYS: &str = "RELAY_REJECT_REPLAYS";
/// Socket address the server binds to.
pub const ENV_BIND_ADDR: &str = "RELAY_BIND_ADDR";

/// Explicit configuration passed to the validator and minting service at construction.
#[derive(Clone, Debug)]
pub struct RelayConfig {
	/// Service identity email.
	pub service_email: String,
	/// Canonical URL of this relay; audience of self-signed assertions.
	pub audience: Url,
	/// Upstream token endpoint for delegated mints.
	pub upstream_token_url: Url,
	/// Fixed audience requested from the upstream authority.
	pub upstream_audience: String,
	/// Optional client secret for the upstream authority.
	pub upstream_client_secret: Option<TokenSecret>,
	/// App versions accepted by the validator.
	pub allowed_app_versions: BTreeSet<AppVersion>,
	/// Maximum tolerated age or future skew of a request timestamp.
	pub replay_window: Duration,
	/// Lifetime granted to minted tokens.
	pub ttl_seconds: u64,
	/// Key for self-signed identity assertions.
	pub signing_key: Option<AssertionSigner>,
	/// Rejects a second use of the same request inside the replay window.
	pub reject_replays: bool,
	/// Address the relay server binds to.
	pub bind_addr: SocketAddr,
}
impl RelayConfig {
	/// Replay window applied to request timestamps.
	pub const DEFAULT_REPLAY_WINDOW: Duration = Duration::milliseconds(300_000);
	/// Default token lifetime.
	pub const DEFAULT_TTL_SECONDS: u64 = 3600;

	/// Creates a configuration with default window, TTL, and bind address and an empty
	/// allow-set.
	pub fn new(service_email: impl Into<String>, audience: Url, upstream_token_url: Url) -> Self {
		Self {
			service_email: service_email.into(),
			upstream_audience: audience.to_string(),
			audience,
			upstream_token_url,
			upstream_client_secret: None,
			allowed_app_versions: BTreeSet::new(),
			replay_window: Self::DEFAULT_REPLAY_WINDOW,
			ttl_seconds: Self::DEFAULT_TTL_SECONDS,
			signing_key: None,
			reject_replays: false,
			bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
		}
	}

	/// Replaces the app-version allow-set.
	pub fn with_allowed_app_versions(
		mut self,
		versions: impl IntoIterator<Item = AppVersion>,
	) -> Self {
		self.allowed_app_versions = versions.into_iter().collect();

		self
	}

	/// Installs the key used for self-signed assertions.
	pub fn with_signing_key(mut self, signer: AssertionSigner) -> Self {
		self.signing_key = Some(signer);

		self
	}

	/// Sets the token lifetime; zero is raised to one second.
	pub fn with_ttl_seconds(mut self, ttl_seconds: u64) -> Self {
		self.ttl_seconds = ttl_seconds.max(1);

		self
	}

	/// Overrides the fixed upstream audience.
	pub fn with_upstream_audience(mut self, audience: impl Into<String>) -> Self {
		self.upstream_audience = audience.into();

		self
	}

	/// Sets the upstream client secret.
	pub fn with_upstream_client_secret(mut self, secret: impl Into<String>) -> Self {
		self.upstream_client_secret = Some(TokenSecret::new(secret));

		self
	}

	/// Toggles one-time-use enforcement.
	pub fn with_reject_replays(mut self, reject: bool) -> Self {
		self.reject_replays = reject;

		self
	}

	/// Loads the configuration from the process environment.
	pub fn from_env() -> Result<Self, ConfigError> {
		Self::from_lookup(|name| std::env::var(name).ok())
	}

	/// Loads the configuration through an arbitrary variable lookup.
	pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
		let require = |name: &'static str| {
			lookup(name)
				.filter(|value| !value.trim().is_empty())
				.ok_or(ConfigError::MissingVariable { name })
		};
		let service_email = require(ENV_SERVICE_EMAIL)?;
		let audience = parse_url("audience", &require(ENV_AUDIENCE_URL)?)?;
		let upstream_token_url =
			parse_url("upstream token", &require(ENV_UPSTREAM_TOKEN_URL)?)?;
		let mut config = Self::new(service_email, audience, upstream_token_url);

		if let Some(audience) = lookup(ENV_UPSTREAM_AUDIENCE) {
			config.upstream_audience = audience;
		}
		if let Some(secret) = lookup(ENV_UPSTREAM_CLIENT_SECRET) {
			config.upstream_client_secret = Some(TokenSecret::new(secret));
		}
		if let Some(raw) = lookup(ENV_ALLOWED_APP_VERSIONS) {
			config.allowed_app_versions = raw
				.split(',')
				.map(str::trim)
				.filter(|value| !value.is_empty())
				.map(AppVersion::new)
				.collect::<Result<_, _>>()?;
		}
		if let Some(seed) = lookup(ENV_SIGNING_KEY) {
			config.signing_key =
				Some(AssertionSigner::from_base64_seed(config.service_email.clone(), &seed)?);
		}
		if let Some(raw) = lookup(ENV_TOKEN_TTL_SECS) {
			let ttl = raw
				.trim()
				.parse::<u64>()
				.map_err(|_| ConfigError::InvalidNumber { field: "token TTL", value: raw })?;

			if ttl == 0 {
				return Err(ConfigError::NonPositiveTtl);
			}

			config.ttl_seconds = ttl;
		}
		if let Some(raw) = lookup(ENV_REJECT_REPLAYS) {
			config.reject_replays = match raw.trim().to_ascii_lowercase().as_str() {
				"1" | "true" | "yes" => true,
				"0" | "false" | "no" => false,
				_ => return Err(ConfigError::InvalidBool { field: "reject replays", value: raw }),
			};
		}
		if let Some(raw) = lookup(ENV_BIND_ADDR) {
			config.bind_addr = raw
				.trim()
				.parse()
				.map_err(|_| ConfigError::InvalidNumber { field: "bind address", value: raw })?;
		}

		Ok(config)
	}
}

fn parse_url(field: &'static str, raw: &str) -> Result<Url, ConfigError> {
	Url::parse(raw.trim()).map_err(|source| ConfigError::InvalidUrl { field, source })
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
		let map: HashMap<String, String> =
			pairs.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect();

		move |name| map.get(name).cloned()
	}

	const REQUIRED: [(&str, &str); 3] = [
		(ENV_SERVICE_EMAIL, "relay@example.iam"),
		(ENV_AUDIENCE_URL, "https://relay.example.com/"),
		(ENV_UPSTREAM_TOKEN_URL, "https://issuer.example.com/token"),
	];

	#[test]
	fn defaults_apply_when_optional_variables_are_absent() {
		let config =
			RelayConfig::from_lookup(lookup_from(&REQUIRED)).expect("Required variables suffice.");

		assert_eq!(config.replay_window, Duration::seconds(300));
		assert_eq!(config.ttl_seconds, 3600);
		assert!(config.signing_key.is_none());
		assert!(!config.reject_replays);
		assert_eq!(config.upstream_audience, "https://relay.example.com/");
		assert!(config.allowed_app_versions.is_empty());
	}

	#[test]
	fn optional_variables_are_parsed() {
		let mut pairs = REQUIRED.to_vec();

		pairs.extend([
			(ENV_ALLOWED_APP_VERSIONS, "1.0.0, 1.1.0,,"),
			(ENV_TOKEN_TTL_SECS, "1800"),
			(ENV_REJECT_REPLAYS, "true"),
			(ENV_SIGNING_KEY, "BwcHBwcHBwcHBwcHBwcHBwcHBwcHBwcHBwcHBwcHBwc="),
			(ENV_UPSTREAM_AUDIENCE, "https://api.example.com"),
			(ENV_BIND_ADDR, "127.0.0.1:9000"),
		]);

		let config = RelayConfig::from_lookup(lookup_from(&pairs)).expect("Config should load.");

		assert!(config.allowed_app_versions.contains("1.0.0"));
		assert!(config.allowed_app_versions.contains("1.1.0"));
		assert_eq!(config.allowed_app_versions.len(), 2);
		assert_eq!(config.ttl_seconds, 1800);
		assert!(config.reject_replays);
		assert_eq!(
			config.signing_key.as_ref().map(AssertionSigner::issuer),
			Some("relay@example.iam")
		);
		assert_eq!(config.upstream_audience, "https://api.example.com");
		assert_eq!(config.bind_addr, SocketAddr::from(([127, 0, 0, 1], 9000)));
	}

	#[test]
	fn invalid_values_are_reported() {
		assert!(matches!(
			RelayConfig::from_lookup(lookup_from(&REQUIRED[..2])),
			Err(ConfigError::MissingVariable { name: ENV_UPSTREAM_TOKEN_URL })
		));

		let mut pairs = REQUIRED.to_vec();

		pairs.push((ENV_TOKEN_TTL_SECS, "0"));

		assert!(matches!(
			RelayConfig::from_lookup(lookup_from(&pairs)),
			Err(ConfigError::NonPositiveTtl)
		));

		let mut pairs = REQUIRED.to_vec();

		pairs.push((ENV_REJECT_REPLAYS, "maybe"));

		assert!(matches!(
			RelayConfig::from_lookup(lookup_from(&pairs)),
			Err(ConfigError::InvalidBool { .. })
		));
	}
}
