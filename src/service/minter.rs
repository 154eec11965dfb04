//! Token minting: delegated upstream mints and self-signed identity assertions.

// self
use crate::{
	_prelude::*,
	auth::{AssertionSigner, IdentityAssertion, MintedToken, ValidatedRequest},
	config::RelayConfig,
	obs::{self, OpOutcome, OpSpan, RelayOp, events},
	service::upstream::UpstreamAuthority,
};

/// Mints bearer tokens for validated requests through an [`UpstreamAuthority`].
#[derive(Debug)]
pub struct TokenMinter<A> {
	authority: A,
	ttl_seconds: u64,
	signer: Option<AssertionSigner>,
	audience: Url,
}
impl<A> TokenMinter<A>
where
	A: UpstreamAuthority,
{
	/// Creates a minter using the lifetime, signing key, and audience from `config`.
	pub fn new(config: &RelayConfig, authority: A) -> Self {
		Self {
			authority,
			ttl_seconds: config.ttl_seconds,
			signer: config.signing_key.clone(),
			audience: config.audience.clone(),
		}
	}

	/// Lifetime granted to minted tokens before upstream clamping.
	pub fn ttl_seconds(&self) -> u64 {
		self.ttl_seconds
	}

	/// Mints a token attributed to a validated device request.
	pub async fn mint(&self, request: &ValidatedRequest) -> Result<MintedToken> {
		self.delegated(RelayOp::DeviceMint, Some(request)).await
	}

	/// Mints a token for a caller already authenticated by the network layer.
	pub async fn mint_for_bearer(&self) -> Result<MintedToken> {
		self.delegated(RelayOp::PublicMint, None).await
	}

	/// Signs an identity assertion for this service using the current clock.
	pub fn issue_identity_assertion(&self) -> Result<IdentityAssertion> {
		self.issue_identity_assertion_at(OffsetDateTime::now_utc())
	}

	/// Signs an identity assertion issued at `now`.
	pub fn issue_identity_assertion_at(&self, now: OffsetDateTime) -> Result<IdentityAssertion> {
		const OP: RelayOp = RelayOp::IdentityAssertion;

		obs::record_op_outcome(OP, OpOutcome::Attempt);

		let result = match &self.signer {
			Some(signer) => signer.sign_at(&self.audience, now).map_err(Error::from),
			None => Err(Error::SigningKeyMissing),
		};

		match &result {
			Ok(assertion) => {
				events::assertion_issued(&assertion.claims.iss, &assertion.claims.aud);
				obs::record_op_outcome(OP, OpOutcome::Success);
			},
			Err(_) => obs::record_op_outcome(OP, OpOutcome::Failure),
		}

		result
	}

	async fn delegated(
		&self,
		op: RelayOp,
		request: Option<&ValidatedRequest>,
	) -> Result<MintedToken> {
		let span = OpSpan::new(op, "mint");

		obs::record_op_outcome(op, OpOutcome::Attempt);

		let result = span
			.instrument(async move {
				let grant = self.authority.request_token().await?;
				let ttl_seconds = match grant.expires_in {
					Some(upstream) if upstream > 0 => self.ttl_seconds.min(upstream),
					_ => self.ttl_seconds,
				};

				Ok(MintedToken {
					token: grant.access_token,
					issued_at: OffsetDateTime::now_utc(),
					ttl_seconds,
				})
			})
			.await;

		match &result {
			Ok(minted) => {
				events::mint_audited(request, minted);
				obs::record_op_outcome(op, OpOutcome::Success);
			},
			Err(e) => {
				events::upstream_failed(request, e);
				obs::record_op_outcome(op, OpOutcome::Failure);
			},
		}

		result
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::sync::atomic::{AtomicU32, Ordering};
	// crates.io
	use time::macros;
	// self
	use super::*;
	use crate::{
		auth::{AppVersion, DeviceId, Platform, TokenSecret, verify_assertion},
		error::UpstreamError,
		service::upstream::{UpstreamFuture, UpstreamGrant},
	};

	struct FixedAuthority {
		expires_in: Option<u64>,
		fail_with: Option<u16>,
		calls: AtomicU32,
	}
	impl FixedAuthority {
		fn granting(expires_in: Option<u64>) -> Self {
			Self { expires_in, fail_with: None, calls: AtomicU32::new(0) }
		}

		fn failing(status: u16) -> Self {
			Self { expires_in: None, fail_with: Some(status), calls: AtomicU32::new(0) }
		}
	}
	impl UpstreamAuthority for FixedAuthority {
		fn request_token(&self) -> UpstreamFuture<'_, UpstreamGrant> {
			self.calls.fetch_add(1, Ordering::SeqCst);

			Box::pin(async move {
				if let Some(status) = self.fail_with {
					return Err(UpstreamError::Status { status, message: "down".into() }.into());
				}

				Ok(UpstreamGrant {
					access_token: TokenSecret::new("upstream-token"),
					expires_in: self.expires_in,
				})
			})
		}
	}

	fn config() -> RelayConfig {
		RelayConfig::new(
			"relay@example.iam",
			Url::parse("https://relay.example.com/").expect("Audience fixture should parse."),
			Url::parse("https://issuer.example.com/token").expect("Token URL should parse."),
		)
	}

	fn request() -> ValidatedRequest {
		ValidatedRequest {
			device_id: DeviceId::new("abc").expect("Device fixture should be valid."),
			platform: Platform::new("ios").expect("Platform fixture should be valid."),
			app_version: AppVersion::new("1.0.0").expect("Version fixture should be valid."),
			requested_at_ms: 0,
		}
	}

	#[tokio::test]
	async fn mint_uses_configured_ttl_clamped_by_upstream() {
		let minter = TokenMinter::new(&config(), FixedAuthority::granting(Some(7200)));
		let minted = minter.mint(&request()).await.expect("Mint should succeed.");

		assert_eq!(minted.token.expose(), "upstream-token");
		assert_eq!(minted.ttl_seconds, 3600);

		let minter = TokenMinter::new(&config(), FixedAuthority::granting(Some(900)));
		let minted = minter.mint_for_bearer().await.expect("Bearer mint should succeed.");

		assert_eq!(minted.ttl_seconds, 900);
	}

	#[tokio::test]
	async fn upstream_failures_propagate_without_internal_retry() {
		let authority = Arc::new(FixedAuthority::failing(503));
		let minter = TokenMinter::new(&config(), authority.clone());
		let err = minter.mint(&request()).await.expect_err("Upstream failure should propagate.");

		assert!(matches!(err, Error::Upstream(UpstreamError::Status { status: 503, .. })));
		assert_eq!(authority.calls.load(Ordering::SeqCst), 1);
	}

	#[cfg(feature = "tracing")]
	#[tokio::test]
	async fn upstream_failures_are_logged_with_device_and_status() {
		let capture = obs::events::LogCapture::start();
		let minter = TokenMinter::new(&config(), FixedAuthority::failing(502));
		let _ = minter.mint(&request()).await;
		let output = capture.output();

		assert!(output.contains("Token mint failed."));
		assert!(output.contains("device_id=\"abc\""), "{output}");
		assert!(output.contains("platform=\"ios\""), "{output}");
		assert!(output.contains("status=502"), "{output}");
	}

	#[test]
	fn identity_assertion_requires_a_signing_key() {
		let minter = TokenMinter::new(&config(), FixedAuthority::granting(None));

		assert!(matches!(minter.issue_identity_assertion(), Err(Error::SigningKeyMissing)));

		let signer = AssertionSigner::generate("relay@example.iam");
		let key = signer.verifying_key();
		let minter =
			TokenMinter::new(&config().with_signing_key(signer), FixedAuthority::granting(None));
		let now = macros::datetime!(2025-01-01 00:00 UTC);
		let assertion =
			minter.issue_identity_assertion_at(now).expect("Assertion should be issued.");
		let claims =
			verify_assertion(assertion.token.expose(), &key).expect("Assertion should verify.");

		assert_eq!(claims.aud, "https://relay.example.com/");
		assert_eq!(claims.iat, now.unix_timestamp());
	}
}
