//! Minted bearer tokens and the JSON shape they travel in.

// self
use crate::{_prelude::*, auth::TokenSecret};

/// Bearer token produced by the minting service.
///
/// The token carries no persisted identity; it stays valid until `ttl_seconds` elapse
/// regardless of the request that produced it.
#[derive(Clone, Serialize, Deserialize)]
pub struct MintedToken {
	/// Token secret; callers must avoid logging it.
	pub token: TokenSecret,
	/// Instant the token was minted.
	pub issued_at: OffsetDateTime,
	/// Lifetime granted by the service.
	pub ttl_seconds: u64,
}
impl MintedToken {
	/// Creates a token minted at `issued_at` that lives for `ttl_seconds`.
	pub fn new(token: impl Into<String>, issued_at: OffsetDateTime, ttl_seconds: u64) -> Self {
		Self { token: TokenSecret::new(token), issued_at, ttl_seconds }
	}

}
impl Debug for MintedToken {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("MintedToken")
			.field("token", &"<redacted>")
			.field("issued_at", &self.issued_at)
			.field("ttl_seconds", &self.ttl_seconds)
			.finish()
	}
}

/// Success body shared by the relay's token endpoints: `{token, expiresIn, timestamp}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
	/// Bearer token or identity assertion.
	pub token: TokenSecret,
	/// Lifetime in seconds.
	pub expires_in: u64,
	/// Issue instant in epoch milliseconds.
	pub timestamp: i64,
}
impl From<&MintedToken> for TokenResponse {
	fn from(minted: &MintedToken) -> Self {
		Self {
			token: minted.token.clone(),
			expires_in: minted.ttl_seconds,
			timestamp: unix_millis(minted.issued_at),
		}
	}
}
