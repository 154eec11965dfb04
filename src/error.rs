//! Relay-level error types shared by the service, the client, and the upstream facade.

// self
use crate::{
	_prelude::*,
	auth::{AssertionError, IdentifierError},
	service::ValidationError,
};

/// Relay-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical relay error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Device request was rejected before any token was minted.
	#[error(transparent)]
	Validation(#[from] ValidationError),
	/// Upstream (or minting service) failure; transient from the client's point of view.
	#[error(transparent)]
	Upstream(#[from] UpstreamError),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Identity assertion could not be produced or checked.
	#[error(transparent)]
	Assertion(#[from] AssertionError),

	/// Minting service refused the credential (HTTP 401/403); retrying will not help.
	#[error("Minting service rejected the credential with status {status}: {message}.")]
	AuthenticationFailed {
		/// HTTP status returned by the minting service.
		status: u16,
		/// Message summarizing the rejection.
		message: String,
	},
	/// Every attempt in the retry budget failed with a transient error.
	#[error("Token acquisition failed after {attempts} attempts.")]
	RetriesExhausted {
		/// Number of attempts performed.
		attempts: u32,
		/// Error produced by the final attempt.
		#[source]
		source: Box<Error>,
	},
	/// Self-signed identity assertions were requested without a signing key.
	#[error("No signing key is configured for identity assertions.")]
	SigningKeyMissing,
}
impl Error {
	/// HTTP status attached to the error, when one is known.
	pub fn status(&self) -> Option<u16> {
		match self {
			Self::Upstream(e) => e.status(),
			Self::AuthenticationFailed { status, .. } => Some(*status),
			Self::RetriesExhausted { source, .. } => source.status(),
			_ => None,
		}
	}
}

/// Failures reported while talking to an upstream token authority (or, from the client, the
/// relay itself).
#[derive(Debug, ThisError)]
pub enum UpstreamError {
	/// Upstream answered with a non-success status.
	#[error("Upstream responded with status {status}: {message}.")]
	Status {
		/// HTTP status code.
		status: u16,
		/// Upstream-supplied or relay-supplied message.
		message: String,
	},
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling the upstream.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Upstream responded with a body that could not be decoded.
	#[error("Upstream returned a malformed response.")]
	MalformedResponse {
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
	/// Upstream responded successfully but the payload is unusable.
	#[error("Upstream returned an unexpected response: {message}.")]
	Unexpected {
		/// Summary of the problem.
		message: String,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
}
impl UpstreamError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}

	/// HTTP status embedded in the failure, when one was observed.
	pub fn status(&self) -> Option<u16> {
		match self {
			Self::Status { status, .. } => Some(*status),
			Self::Network { .. } => None,
			Self::MalformedResponse { status, .. } | Self::Unexpected { status, .. } => *status,
		}
	}

	/// Returns `true` when the status signals an authentication or authorization failure.
	pub fn is_auth_rejection(&self) -> bool {
		matches!(self.status(), Some(401 | 403))
	}
}
impl From<ReqwestError> for UpstreamError {
	fn from(e: ReqwestError) -> Self {
		match e.status() {
			Some(status) => Self::Status { status: status.as_u16(), message: e.to_string() },
			None => Self::network(e),
		}
	}
}

/// Configuration and construction failures.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// HTTP request construction failed.
	#[error(transparent)]
	HttpRequest(#[from] oauth2::http::Error),
	/// A required environment variable is absent.
	#[error("Environment variable `{name}` must be set.")]
	MissingVariable {
		/// Variable name.
		name: &'static str,
	},
	/// A configured URL cannot be parsed.
	#[error("Configured {field} URL is invalid.")]
	InvalidUrl {
		/// Configuration field holding the URL.
		field: &'static str,
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// A numeric option cannot be parsed.
	#[error("Configured {field} value `{value}` is not a valid number.")]
	InvalidNumber {
		/// Configuration field holding the value.
		field: &'static str,
		/// Raw value that failed to parse.
		value: String,
	},
	/// A boolean option cannot be parsed.
	#[error("Configured {field} value `{value}` is not a valid boolean.")]
	InvalidBool {
		/// Configuration field holding the value.
		field: &'static str,
		/// Raw value that failed to parse.
		value: String,
	},
	/// Signing key material is malformed.
	#[error("Signing key is invalid: {reason}.")]
	InvalidSigningKey {
		/// Why the key was rejected.
		reason: String,
	},
	/// An identifier in the configuration is invalid.
	#[error(transparent)]
	InvalidIdentifier(#[from] IdentifierError),
	/// Token lifetime must be positive.
	#[error("Token lifetime must be positive.")]
	NonPositiveTtl,
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
