//! Delegated minting through an upstream OAuth 2.0 authority.
//!
//! [`OAuthAuthority`] performs a `client_credentials` grant against the configured token
//! endpoint with a fixed `audience` parameter. The relay authenticates either with a client
//! secret or with a freshly signed identity assertion (RFC 7523 `client_assertion`).

// crates.io
use oauth2::{
	ClientId, ClientSecret, EndpointNotSet, EndpointSet, HttpClientError, RequestTokenError,
	TokenResponse, TokenUrl,
	basic::{BasicClient, BasicRequestTokenError},
};
// self
use crate::{
	_prelude::*,
	auth::{AssertionSigner, TokenSecret},
	config::{ENV_UPSTREAM_CLIENT_SECRET, RelayConfig},
	error::{ConfigError, UpstreamError},
	http::{ReqwestHttpClient, ResponseMetadata, ResponseMetadataSlot, TokenHttpClient},
};

/// `client_assertion_type` for JWT bearer client authentication.
pub const JWT_BEARER_ASSERTION_TYPE: &str =
	"urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

type ConfiguredBasicClient =
	BasicClient<EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// Boxed future returned by [`UpstreamAuthority`] implementations.
pub type UpstreamFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + 'a + Send>>;

/// Token granted by the upstream authority.
#[derive(Clone, Debug)]
pub struct UpstreamGrant {
	/// Access token minted upstream.
	pub access_token: TokenSecret,
	/// Lifetime reported by the upstream, when present.
	pub expires_in: Option<u64>,
}

/// Source of delegated tokens used by the minting service.
pub trait UpstreamAuthority
where
	Self: Send + Sync,
{
	/// Requests a fresh token for the relay's fixed audience.
	fn request_token(&self) -> UpstreamFuture<'_, UpstreamGrant>;
}
impl<T> UpstreamAuthority for Arc<T>
where
	T: ?Sized + UpstreamAuthority,
{
	fn request_token(&self) -> UpstreamFuture<'_, UpstreamGrant> {
		(**self).request_token()
	}
}

/// Long-lived credential the relay holds for the upstream authority.
#[derive(Clone, Debug)]
pub enum UpstreamCredential {
	/// Client secret paired with the service email as client id.
	ClientSecret(TokenSecret),
	/// Self-signed assertion presented as `client_assertion`.
	SignedAssertion(AssertionSigner),
}
impl UpstreamCredential {
	/// Convenience constructor for a client-secret credential.
	pub fn client_secret(secret: impl Into<String>) -> Self {
		Self::ClientSecret(TokenSecret::new(secret))
	}

	/// Picks the configured credential, preferring a client secret over the signing key.
	pub fn from_config(config: &RelayConfig) -> Result<Self, ConfigError> {
		if let Some(secret) = &config.upstream_client_secret {
			return Ok(Self::ClientSecret(secret.clone()));
		}
		if let Some(signer) = &config.signing_key {
			return Ok(Self::SignedAssertion(signer.clone()));
		}

		Err(ConfigError::MissingVariable { name: ENV_UPSTREAM_CLIENT_SECRET })
	}
}

/// [`UpstreamAuthority`] backed by the `oauth2` client-credentials grant.
pub struct OAuthAuthority<C = ReqwestHttpClient>
where
	C: TokenHttpClient,
{
	oauth_client: ConfiguredBasicClient,
	http_client: Arc<C>,
	credential: UpstreamCredential,
	audience: String,
	token_url: Url,
}
impl<C> OAuthAuthority<C>
where
	C: TokenHttpClient,
{
	/// Builds the authority for the upstream endpoint named in `config`.
	pub fn new(
		config: &RelayConfig,
		credential: UpstreamCredential,
		http_client: impl Into<Arc<C>>,
	) -> Result<Self, ConfigError> {
		let token_url = TokenUrl::new(config.upstream_token_url.to_string())
			.map_err(|source| ConfigError::InvalidUrl { field: "upstream token", source })?;
		let mut oauth_client =
			BasicClient::new(ClientId::new(config.service_email.clone())).set_token_uri(token_url);

		if let UpstreamCredential::ClientSecret(secret) = &credential {
			oauth_client =
				oauth_client.set_client_secret(ClientSecret::new(secret.expose().to_owned()));
		}

		Ok(Self {
			oauth_client,
			http_client: http_client.into(),
			credential,
			audience: config.upstream_audience.clone(),
			token_url: config.upstream_token_url.clone(),
		})
	}

	/// Builds the authority with the credential selected by [`UpstreamCredential::from_config`].
	pub fn from_config(
		config: &RelayConfig,
		http_client: impl Into<Arc<C>>,
	) -> Result<Self, ConfigError> {
		Self::new(config, UpstreamCredential::from_config(config)?, http_client)
	}

	/// Audience requested from the upstream.
	pub fn audience(&self) -> &str {
		&self.audience
	}
}
impl<C> UpstreamAuthority for OAuthAuthority<C>
where
	C: TokenHttpClient,
{
	fn request_token(&self) -> UpstreamFuture<'_, UpstreamGrant> {
		let meta = ResponseMetadataSlot::default();

		Box::pin(async move {
			let handle = self.http_client.with_metadata(meta.clone());
			let mut request = self
				.oauth_client
				.exchange_client_credentials()
				.add_extra_param("audience", self.audience.clone());

			if let UpstreamCredential::SignedAssertion(signer) = &self.credential {
				let assertion = signer.sign(&self.token_url)?;

				request = request
					.add_extra_param("client_assertion_type", JWT_BEARER_ASSERTION_TYPE)
					.add_extra_param("client_assertion", assertion.token.into_inner());
			}

			let response = request
				.request_async(&handle)
				.await
				.map_err(|err| map_request_error(meta.take(), err))?;

			Ok(UpstreamGrant {
				access_token: TokenSecret::new(response.access_token().secret().to_owned()),
				expires_in: response.expires_in().map(|lifetime| lifetime.as_secs()),
			})
		})
	}
}

fn map_request_error<E>(
	meta: Option<ResponseMetadata>,
	err: BasicRequestTokenError<HttpClientError<E>>,
) -> Error
where
	E: 'static + Send + Sync + StdError,
{
	let status = meta.and_then(|value| value.status);
	let failed_status = status.filter(|code| !(200..300).contains(code));

	match err {
		RequestTokenError::ServerResponse(response) => {
			let message = match response.error_description() {
				Some(description) => description.clone(),
				None => response.error().as_ref().to_owned(),
			};

			UpstreamError::Status { status: status.unwrap_or(400), message }.into()
		},
		RequestTokenError::Parse(source, _body) => match failed_status {
			Some(status) =>
				UpstreamError::Status { status, message: "unparseable error body".into() }.into(),
			None => UpstreamError::MalformedResponse { source, status }.into(),
		},
		RequestTokenError::Other(message) => match failed_status {
			Some(status) => UpstreamError::Status { status, message }.into(),
			None => UpstreamError::Unexpected { message, status }.into(),
		},
		RequestTokenError::Request(error) => map_transport_error(status, error),
	}
}

fn map_transport_error<E>(status: Option<u16>, err: HttpClientError<E>) -> Error
where
	E: 'static + Send + Sync + StdError,
{
	match err {
		HttpClientError::Reqwest(inner) => UpstreamError::network(*inner).into(),
		HttpClientError::Http(inner) => ConfigError::from(inner).into(),
		HttpClientError::Io(inner) => UpstreamError::network(inner).into(),
		HttpClientError::Other(message) => UpstreamError::Unexpected { message, status }.into(),
		_ => UpstreamError::Unexpected { message: "unknown transport failure".into(), status }
			.into(),
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn config() -> RelayConfig {
		RelayConfig::new(
			"relay@example.iam",
			Url::parse("https://relay.example.com/").expect("Audience fixture should parse."),
			Url::parse("https://issuer.example.com/token").expect("Token URL should parse."),
		)
	}

	#[test]
	fn credential_prefers_secret_then_signing_key() {
		assert!(matches!(
			UpstreamCredential::from_config(&config()),
			Err(ConfigError::MissingVariable { name: ENV_UPSTREAM_CLIENT_SECRET })
		));

		let signed = config().with_signing_key(AssertionSigner::generate("relay@example.iam"));

		assert!(matches!(
			UpstreamCredential::from_config(&signed),
			Ok(UpstreamCredential::SignedAssertion(_))
		));

		let both = signed.with_upstream_client_secret("secret");

		assert!(matches!(
			UpstreamCredential::from_config(&both),
			Ok(UpstreamCredential::ClientSecret(_))
		));
	}

	#[test]
	fn server_error_statuses_win_over_parse_failures() {
		let source = serde_path_to_error::deserialize::<_, u8>(
			&mut serde_json::Deserializer::from_str("\"not a number\""),
		)
		.expect_err("Fixture should fail to parse.");
		let err: BasicRequestTokenError<HttpClientError<std::io::Error>> =
			RequestTokenError::Parse(source, b"<html>".to_vec());

		assert_eq!(
			map_request_error(Some(ResponseMetadata { status: Some(503) }), err).status(),
			Some(503)
		);

		let err: BasicRequestTokenError<HttpClientError<std::io::Error>> =
			RequestTokenError::Other("empty".into());

		assert!(matches!(
			map_request_error(Some(ResponseMetadata { status: Some(200) }), err),
			Error::Upstream(UpstreamError::Unexpected { status: Some(200), .. })
		));
	}
}
