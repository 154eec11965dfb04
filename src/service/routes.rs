//! HTTP surface of the relay.
//!
//! | Route | Method | Success body |
//! |---|---|---|
//! | `/auth/device-token` | `POST` | `{token, expiresIn, timestamp}` |
//! | `/auth/public-token` | `GET` | `{token, expiresIn, timestamp}` |
//! | `/auth/identity-token` | `GET` | `{token, expiresIn, timestamp}` |
//! | `/auth/health` | `GET` | `{status, service, timestamp}` |
//!
//! Validation failures answer 401 `{error, message}`; mint failures answer 500
//! `{error, details}`.

// crates.io
use axum::{
	Json, Router,
	body::Bytes,
	extract::State,
	http::{HeaderMap, StatusCode},
	response::{IntoResponse, Response},
	routing::{get, post},
};
use serde_json::json;
// self
use crate::{
	_prelude::*,
	auth::{
		APP_VERSION_HEADER, DEVICE_ID_HEADER, DeviceHeaders, DeviceRequest, PLATFORM_HEADER,
		TokenResponse,
	},
	service::{RelayService, upstream::UpstreamAuthority},
};

/// Path of the device mint endpoint.
pub const DEVICE_TOKEN_PATH: &str = "/auth/device-token";
/// Path of the deprecated bearer mint endpoint.
pub const PUBLIC_TOKEN_PATH: &str = "/auth/public-token";
/// Path of the identity assertion endpoint.
pub const IDENTITY_TOKEN_PATH: &str = "/auth/identity-token";
/// Path of the health endpoint.
pub const HEALTH_PATH: &str = "/auth/health";

type SharedService<A> = State<Arc<RelayService<A>>>;

/// Liveness body returned by [`HEALTH_PATH`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
	/// Always `"ok"`.
	pub status: String,
	/// Service name.
	pub service: String,
	/// Server clock in epoch milliseconds.
	pub timestamp: i64,
}

/// Relay error rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub Error);
impl From<Error> for ApiError {
	fn from(e: Error) -> Self {
		Self(e)
	}
}
impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let (status, body) = match &self.0 {
			Error::Validation(e) =>
				(StatusCode::UNAUTHORIZED, json!({ "error": e.code(), "message": e.to_string() })),
			Error::SigningKeyMissing => (
				StatusCode::INTERNAL_SERVER_ERROR,
				json!({ "error": "SigningKeyMissing", "details": self.0.to_string() }),
			),
			other => (
				StatusCode::INTERNAL_SERVER_ERROR,
				json!({ "error": "TokenMintFailed", "details": other.to_string() }),
			),
		};

		(status, Json(body)).into_response()
	}
}

/// Builds the relay router over a shared service.
pub fn router<A>(service: Arc<RelayService<A>>) -> Router
where
	A: 'static + UpstreamAuthority,
{
	Router::new()
		.route(DEVICE_TOKEN_PATH, post(device_token::<A>))
		.route(PUBLIC_TOKEN_PATH, get(public_token::<A>))
		.route(IDENTITY_TOKEN_PATH, get(identity_token::<A>))
		.route(HEALTH_PATH, get(health::<A>))
		.with_state(service)
}

async fn device_token<A>(
	State(service): SharedService<A>,
	headers: HeaderMap,
	body: Bytes,
) -> Result<Json<TokenResponse>, ApiError>
where
	A: 'static + UpstreamAuthority,
{
	// Unparseable bodies degrade to empty ones so headers can still supply fields.
	let request = serde_json::from_slice::<DeviceRequest>(&body).unwrap_or_default();
	let minted = service.mint_for_device(&request, &device_headers(&headers)).await?;

	Ok(Json(TokenResponse::from(&minted)))
}

async fn public_token<A>(State(service): SharedService<A>) -> Result<Json<TokenResponse>, ApiError>
where
	A: 'static + UpstreamAuthority,
{
	let minted = service.mint_for_bearer().await?;

	Ok(Json(TokenResponse::from(&minted)))
}

async fn identity_token<A>(
	State(service): SharedService<A>,
) -> Result<Json<TokenResponse>, ApiError>
where
	A: 'static + UpstreamAuthority,
{
	let assertion = service.issue_identity_assertion()?;

	Ok(Json(TokenResponse::from(&assertion.to_minted())))
}

async fn health<A>(State(_service): SharedService<A>) -> Json<HealthResponse>
where
	A: 'static + UpstreamAuthority,
{
	Json(HealthResponse {
		status: "ok".into(),
		service: env!("CARGO_PKG_NAME").into(),
		timestamp: unix_millis(OffsetDateTime::now_utc()),
	})
}

fn device_headers(headers: &HeaderMap) -> DeviceHeaders {
	let read = |name: &str| {
		headers.get(name).and_then(|value| value.to_str().ok()).map(|value| value.trim().to_owned())
	};

	DeviceHeaders {
		device_id: read(DEVICE_ID_HEADER),
		app_version: read(APP_VERSION_HEADER),
		platform: read(PLATFORM_HEADER),
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use axum::body;
	// self
	use super::*;
	use crate::{error::UpstreamError, service::ValidationError};

	async fn render(error: Error) -> (StatusCode, serde_json::Value) {
		let response = ApiError(error).into_response();
		let status = response.status();
		let bytes = body::to_bytes(response.into_body(), usize::MAX)
			.await
			.expect("Error body should be readable.");

		(status, serde_json::from_slice(&bytes).expect("Error body should be JSON."))
	}

	#[tokio::test]
	async fn validation_errors_render_as_401_with_code() {
		let (status, body) =
			render(ValidationError::UnsupportedVersion { version: "0.9.0".into() }.into()).await;

		assert_eq!(status, StatusCode::UNAUTHORIZED);
		assert_eq!(body["error"], "UnsupportedVersion");
		assert!(body["message"].as_str().is_some_and(|m| m.contains("0.9.0")));
	}

	#[tokio::test]
	async fn mint_failures_render_as_500_with_details() {
		let (status, body) =
			render(UpstreamError::Status { status: 502, message: "bad gateway".into() }.into())
				.await;

		assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
		assert_eq!(body["error"], "TokenMintFailed");
		assert!(body["details"].is_string());

		let (status, body) = render(Error::SigningKeyMissing).await;

		assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
		assert_eq!(body["error"], "SigningKeyMissing");
	}

	#[test]
	fn device_headers_are_trimmed_and_optional() {
		let mut headers = HeaderMap::new();

		headers.insert("x-device-id", "abc".parse().expect("Header value should parse."));
		headers.insert("x-platform", " ios ".parse().expect("Header value should parse."));

		let parsed = device_headers(&headers);

		assert_eq!(parsed.device_id.as_deref(), Some("abc"));
		assert_eq!(parsed.platform.as_deref(), Some("ios"));
		assert!(parsed.app_version.is_none());
	}
}
