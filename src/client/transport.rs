//! Client-side calls to the relay's HTTP endpoints.

// crates.io
use reqwest::Response;
use serde::de::DeserializeOwned;
// self
use crate::{
	_prelude::*,
	auth::{
		APP_VERSION_HEADER, AssertionSigner, DEVICE_ID_HEADER, DeviceRequest, PLATFORM_HEADER,
		TokenResponse, TokenSecret,
	},
	error::{ConfigError, UpstreamError},
	http::ReqwestHttpClient,
	service::routes::{DEVICE_TOKEN_PATH, IDENTITY_TOKEN_PATH, PUBLIC_TOKEN_PATH},
};

/// Boxed future returned by client transports and assertion sources.
pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + 'a + Send>>;

/// Credential attached to one mint attempt.
#[derive(Clone, Debug)]
pub enum MintCredential {
	/// Device request sent as JSON body plus mirroring headers.
	Device(DeviceRequest),
	/// Identity assertion sent as a bearer token.
	Assertion(TokenSecret),
}

/// Performs one mint call against the relay.
pub trait MintTransport
where
	Self: Send + Sync,
{
	/// Sends `credential` and decodes the token response. Non-2xx answers surface as
	/// [`UpstreamError::Status`].
	fn mint<'a>(&'a self, credential: &'a MintCredential) -> TransportFuture<'a, TokenResponse>;
}
impl<T> MintTransport for Arc<T>
where
	T: ?Sized + MintTransport,
{
	fn mint<'a>(&'a self, credential: &'a MintCredential) -> TransportFuture<'a, TokenResponse> {
		(**self).mint(credential)
	}
}

/// Supplies a fresh identity assertion before each attempt in assertion mode.
pub trait AssertionSource
where
	Self: Send + Sync,
{
	/// Produces a new assertion.
	fn assertion(&self) -> TransportFuture<'_, TokenSecret>;
}

/// Signs assertions in-process for deployments that hold the service key.
#[derive(Clone, Debug)]
pub struct LocalAssertionSource {
	signer: AssertionSigner,
	audience: Url,
}
impl LocalAssertionSource {
	/// Creates a source signing for `audience`.
	pub fn new(signer: AssertionSigner, audience: Url) -> Self {
		Self { signer, audience }
	}
}
impl AssertionSource for LocalAssertionSource {
	fn assertion(&self) -> TransportFuture<'_, TokenSecret> {
		Box::pin(async move { Ok(self.signer.sign(&self.audience)?.token) })
	}
}

/// reqwest-backed transport rooted at the relay's base URL.
#[derive(Clone)]
pub struct HttpMintTransport {
	http: ReqwestHttpClient,
	base_url: Url,
}
impl HttpMintTransport {
	/// Creates a transport with a default HTTP client.
	pub fn new(base_url: Url) -> Result<Self, ConfigError> {
		Ok(Self::with_client(base_url, ReqwestHttpClient::new()?))
	}

	/// Creates a transport over an existing client.
	pub fn with_client(base_url: Url, http: ReqwestHttpClient) -> Self {
		Self { http, base_url }
	}

	/// Relay base URL.
	pub fn base_url(&self) -> &Url {
		&self.base_url
	}

	fn endpoint(&self, path: &str) -> Result<Url, ConfigError> {
		self.base_url
			.join(path.trim_start_matches('/'))
			.map_err(|source| ConfigError::InvalidUrl { field: "relay endpoint", source })
	}
}
impl Debug for HttpMintTransport {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("HttpMintTransport").field("base_url", &self.base_url.as_str()).finish()
	}
}
impl MintTransport for HttpMintTransport {
	fn mint<'a>(&'a self, credential: &'a MintCredential) -> TransportFuture<'a, TokenResponse> {
		Box::pin(async move {
			let request = match credential {
				MintCredential::Device(body) => {
					let headers = body.headers();
					let mut request = self.http.post(self.endpoint(DEVICE_TOKEN_PATH)?).json(body);

					for (name, value) in [
						(DEVICE_ID_HEADER, headers.device_id),
						(APP_VERSION_HEADER, headers.app_version),
						(PLATFORM_HEADER, headers.platform),
					] {
						if let Some(value) = value {
							request = request.header(name, value);
						}
					}

					request
				},
				MintCredential::Assertion(assertion) => self
					.http
					.get(self.endpoint(PUBLIC_TOKEN_PATH)?)
					.bearer_auth(assertion.expose()),
			};
			let response = request.send().await.map_err(UpstreamError::from)?;

			decode(response).await
		})
	}
}
impl AssertionSource for HttpMintTransport {
	fn assertion(&self) -> TransportFuture<'_, TokenSecret> {
		Box::pin(async move {
			let response = self
				.http
				.get(self.endpoint(IDENTITY_TOKEN_PATH)?)
				.send()
				.await
				.map_err(UpstreamError::from)?;
			let body: TokenResponse = decode(response).await?;

			Ok(body.token)
		})
	}
}

async fn decode<T>(response: Response) -> Result<T>
where
	T: DeserializeOwned,
{
	let status = response.status();
	let bytes = response.bytes().await.map_err(UpstreamError::from)?;

	if !status.is_success() {
		let message = String::from_utf8_lossy(&bytes).trim().to_owned();

		return Err(UpstreamError::Status { status: status.as_u16(), message }.into());
	}

	let mut deserializer = serde_json::Deserializer::from_slice(&bytes);

	serde_path_to_error::deserialize(&mut deserializer).map_err(|source| {
		Error::from(UpstreamError::MalformedResponse { source, status: Some(status.as_u16()) })
	})
}
