//! Service side of the relay: validation, replay protection, minting, and the HTTP router.

pub mod minter;
pub mod replay;
pub mod routes;
pub mod upstream;
pub mod validator;

pub use minter::*;
pub use replay::*;
pub use validator::*;

// self
use crate::{
	_prelude::*,
	auth::{DeviceHeaders, DeviceRequest, IdentityAssertion, MintedToken},
	config::RelayConfig,
	obs::events,
	service::upstream::UpstreamAuthority,
};

/// Validator, optional replay guard, and minter assembled from one [`RelayConfig`].
pub struct RelayService<A> {
	config: RelayConfig,
	validator: RequestValidator,
	replay_guard: Option<ReplayGuard>,
	minter: TokenMinter<A>,
}
impl<A> RelayService<A>
where
	A: UpstreamAuthority,
{
	/// Wires the service components from `config`.
	pub fn new(config: RelayConfig, authority: A) -> Self {
		let validator = RequestValidator::from_config(&config);
		let replay_guard = config.reject_replays.then(|| ReplayGuard::new(config.replay_window));
		let minter = TokenMinter::new(&config, authority);

		Self { config, validator, replay_guard, minter }
	}

	/// Configuration the service was built from.
	pub fn config(&self) -> &RelayConfig {
		&self.config
	}

	/// Request validator.
	pub fn validator(&self) -> &RequestValidator {
		&self.validator
	}

	/// Token minter.
	pub fn minter(&self) -> &TokenMinter<A> {
		&self.minter
	}

	/// Validates a device request observed at `now` and mints a token for it.
	pub async fn mint_for_device_at(
		&self,
		body: &DeviceRequest,
		headers: &DeviceHeaders,
		now: OffsetDateTime,
	) -> Result<MintedToken> {
		let validated = self.validator.validate(body, headers, now)?;

		if let Some(guard) = &self.replay_guard {
			guard
				.check_and_record(&validated, now)
				.inspect_err(|e| events::request_rejected(body, headers, e))?;
		}

		self.minter.mint(&validated).await
	}

	/// Validates a device request against the current clock and mints a token for it.
	pub async fn mint_for_device(
		&self,
		body: &DeviceRequest,
		headers: &DeviceHeaders,
	) -> Result<MintedToken> {
		self.mint_for_device_at(body, headers, OffsetDateTime::now_utc()).await
	}

	/// Mints a token for a bearer-authenticated caller.
	pub async fn mint_for_bearer(&self) -> Result<MintedToken> {
		self.minter.mint_for_bearer().await
	}

	/// Issues a self-signed identity assertion.
	pub fn issue_identity_assertion(&self) -> Result<IdentityAssertion> {
		self.minter.issue_identity_assertion()
	}
}
