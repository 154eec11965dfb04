//! Self-signed identity assertions.
//!
//! The relay holds an Ed25519 signing key bound to its service identity. An assertion is a
//! compact JWS (`header.claims.signature`, each segment base64url without padding) whose
//! claims name the service as both issuer and subject and the relay's canonical URL as
//! audience. Assertions are inputs to the delegated mint flow, never final access tokens.

// crates.io
use base64::{
	Engine,
	engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
// self
use crate::{
	_prelude::*,
	auth::{MintedToken, TokenSecret},
	error::ConfigError,
};

/// Lifetime of every self-signed assertion.
pub const ASSERTION_LIFETIME: Duration = Duration::seconds(3600);

const HEADER: AssertionHeader<'static> = AssertionHeader { alg: "EdDSA", typ: "JWT" };

/// Errors raised while encoding or checking identity assertions.
#[derive(Debug, ThisError)]
pub enum AssertionError {
	/// Claims or header could not be encoded.
	#[error("Identity assertion could not be encoded.")]
	Encoding(#[from] serde_json::Error),
	/// The compact form does not have three base64url segments.
	#[error("Identity assertion is malformed.")]
	Malformed,
	/// The header names an algorithm other than EdDSA.
	#[error("Identity assertion uses unsupported algorithm `{0}`.")]
	UnsupportedAlgorithm(String),
	/// The signature does not verify under the supplied key.
	#[error("Identity assertion signature is invalid.")]
	BadSignature,
}

#[derive(Serialize, Deserialize)]
struct AssertionHeader<'a> {
	alg: &'a str,
	typ: &'a str,
}

/// Claims carried by an identity assertion. Times are Unix seconds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionClaims {
	/// Service identity email.
	pub iss: String,
	/// Same as `iss`; the service asserts its own identity.
	pub sub: String,
	/// Canonical URL of the relay.
	pub aud: String,
	/// Issued-at.
	pub iat: i64,
	/// Expiry (`iat + 3600`).
	pub exp: i64,
}

/// Signed assertion plus the claims it carries.
#[derive(Clone, Debug)]
pub struct IdentityAssertion {
	/// Compact JWS form.
	pub token: TokenSecret,
	/// Decoded claims.
	pub claims: AssertionClaims,
}
impl IdentityAssertion {
	/// Views the assertion as a minted token so it can share the token response shape.
	pub fn to_minted(&self) -> MintedToken {
		let issued_at = OffsetDateTime::from_unix_timestamp(self.claims.iat)
			.unwrap_or(OffsetDateTime::UNIX_EPOCH);
		let ttl = u64::try_from(self.claims.exp - self.claims.iat).unwrap_or_default();

		MintedToken { token: self.token.clone(), issued_at, ttl_seconds: ttl }
	}
}

/// Ed25519 key bound to the service identity that signs assertions.
#[derive(Clone)]
pub struct AssertionSigner {
	issuer: String,
	key: SigningKey,
}
impl AssertionSigner {
	/// Wraps an existing signing key for `issuer`.
	pub fn new(issuer: impl Into<String>, key: SigningKey) -> Self {
		Self { issuer: issuer.into(), key }
	}

	/// Decodes a standard-base64 32-byte Ed25519 seed.
	pub fn from_base64_seed(issuer: impl Into<String>, encoded: &str) -> Result<Self, ConfigError> {
		let bytes = STANDARD.decode(encoded.trim()).map_err(|e| ConfigError::InvalidSigningKey {
			reason: format!("seed is not valid base64: {e}"),
		})?;
		let seed: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
			ConfigError::InvalidSigningKey {
				reason: format!("seed must be 32 bytes, got {}", bytes.len()),
			}
		})?;

		Ok(Self::new(issuer, SigningKey::from_bytes(&seed)))
	}

	/// Generates a signer with a random key.
	pub fn generate(issuer: impl Into<String>) -> Self {
		let seed: [u8; 32] = rand::random();

		Self::new(issuer, SigningKey::from_bytes(&seed))
	}

	/// Service identity the signer asserts.
	pub fn issuer(&self) -> &str {
		&self.issuer
	}

	/// Public half of the signing key.
	pub fn verifying_key(&self) -> VerifyingKey {
		self.key.verifying_key()
	}

	/// Signs an assertion for `audience` issued at `now`.
	pub fn sign_at(
		&self,
		audience: &Url,
		now: OffsetDateTime,
	) -> Result<IdentityAssertion, AssertionError> {
		let iat = now.unix_timestamp();
		let claims = AssertionClaims {
			iss: self.issuer.clone(),
			sub: self.issuer.clone(),
			aud: audience.to_string(),
			iat,
			exp: iat + ASSERTION_LIFETIME.whole_seconds(),
		};
		let header = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&HEADER)?);
		let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims)?);
		let signing_input = format!("{header}.{payload}");
		let signature = self.key.sign(signing_input.as_bytes());
		let token = format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(signature.to_bytes()));

		Ok(IdentityAssertion { token: TokenSecret::new(token), claims })
	}

	/// Signs an assertion for `audience` using the current clock.
	pub fn sign(&self, audience: &Url) -> Result<IdentityAssertion, AssertionError> {
		self.sign_at(audience, OffsetDateTime::now_utc())
	}
}
impl Debug for AssertionSigner {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AssertionSigner")
			.field("issuer", &self.issuer)
			.field("public_key", &hex::encode(self.verifying_key().as_bytes()))
			.finish()
	}
}

/// Checks the signature of a compact assertion and returns its claims.
///
/// Expiry and audience are left to the caller.
pub fn verify_assertion(
	token: &str,
	key: &VerifyingKey,
) -> Result<AssertionClaims, AssertionError> {
	let mut segments = token.split('.');
	let (Some(header), Some(payload), Some(signature), None) =
		(segments.next(), segments.next(), segments.next(), segments.next())
	else {
		return Err(AssertionError::Malformed);
	};
	let decode =
		|segment: &str| URL_SAFE_NO_PAD.decode(segment).map_err(|_| AssertionError::Malformed);
	let header_bytes = decode(header)?;
	let parsed_header: AssertionHeader<'_> = serde_json::from_slice(&header_bytes)?;

	if parsed_header.alg != HEADER.alg {
		return Err(AssertionError::UnsupportedAlgorithm(parsed_header.alg.to_owned()));
	}

	let signature =
		Signature::from_slice(&decode(signature)?).map_err(|_| AssertionError::Malformed)?;

	key.verify(format!("{header}.{payload}").as_bytes(), &signature)
		.map_err(|_| AssertionError::BadSignature)?;

	Ok(serde_json::from_slice(&decode(payload)?)?)
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;

	fn audience() -> Url {
		Url::parse("https://relay.example.com/").expect("Audience fixture should parse.")
	}

	#[test]
	fn signed_assertion_carries_service_claims_and_verifies() {
		let signer = AssertionSigner::generate("relay@example.iam");
		let now = macros::datetime!(2025-01-01 00:00 UTC);
		let assertion = signer.sign_at(&audience(), now).expect("Signing should succeed.");
		let claims = verify_assertion(assertion.token.expose(), &signer.verifying_key())
			.expect("Assertion should verify under its own key.");

		assert_eq!(claims, assertion.claims);
		assert_eq!(claims.iss, "relay@example.iam");
		assert_eq!(claims.sub, claims.iss);
		assert_eq!(claims.aud, "https://relay.example.com/");
		assert_eq!(claims.iat, now.unix_timestamp());
		assert_eq!(claims.exp - claims.iat, 3600);
		assert_eq!(assertion.to_minted().ttl_seconds, 3600);
	}

	#[test]
	fn verification_rejects_foreign_keys_and_tampering() {
		let signer = AssertionSigner::generate("relay@example.iam");
		let other = AssertionSigner::generate("relay@example.iam");
		let assertion = signer.sign(&audience()).expect("Signing should succeed.");

		assert!(matches!(
			verify_assertion(assertion.token.expose(), &other.verifying_key()),
			Err(AssertionError::BadSignature)
		));
		assert!(matches!(
			verify_assertion("only.two", &signer.verifying_key()),
			Err(AssertionError::Malformed)
		));
	}

	#[test]
	fn seed_decoding_validates_length() {
		let seed = STANDARD.encode([7_u8; 32]);
		let signer = AssertionSigner::from_base64_seed("relay@example.iam", &seed)
			.expect("A 32-byte seed should decode.");

		assert_eq!(signer.issuer(), "relay@example.iam");
		assert!(!format!("{signer:?}").contains(&seed));
		assert!(matches!(
			AssertionSigner::from_base64_seed("relay@example.iam", &STANDARD.encode([1_u8; 16])),
			Err(ConfigError::InvalidSigningKey { .. })
		));
	}
}
