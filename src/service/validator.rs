//! Device request validation.
//!
//! Checks run in a fixed order and stop at the first failure:
//!
//! 1. presence of `deviceId`, `appVersion`, `platform` (header or body) and `timestamp`, plus
//!    header/body agreement;
//! 2. membership of `appVersion` in the allow-set;
//! 3. `|now - timestamp|` within the replay window.

// self
use crate::{
	_prelude::*,
	auth::{AppVersion, DeviceHeaders, DeviceId, DeviceRequest, Platform, ValidatedRequest},
	config::RelayConfig,
	obs::events,
};

/// Reasons a device request is rejected. Every variant maps to HTTP 401.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum ValidationError {
	/// A required field is absent or empty in both the header and the body.
	#[error("Required field `{field}` is missing.")]
	MissingField {
		/// Wire name of the field.
		field: &'static str,
	},
	/// Header and body carry different values for the same field.
	#[error("Header and body disagree on `{field}`.")]
	HeaderMismatch {
		/// Wire name of the field.
		field: &'static str,
	},
	/// The app version is not in the allow-set.
	#[error("App version `{version}` is not supported.")]
	UnsupportedVersion {
		/// Version reported by the client.
		version: String,
	},
	/// The request timestamp lies outside the replay window.
	#[error("Request timestamp is outside the replay window by a skew of {skew_ms} ms.")]
	StaleOrFutureRequest {
		/// `now - timestamp` in milliseconds; negative for future timestamps.
		skew_ms: i64,
	},
	/// The same request was already used inside the replay window.
	#[error("Request was already used within the replay window.")]
	ReplayedRequest,
}
impl ValidationError {
	/// Stable error code returned to clients.
	pub const fn code(&self) -> &'static str {
		match self {
			Self::MissingField { .. } => "MissingField",
			Self::HeaderMismatch { .. } => "HeaderMismatch",
			Self::UnsupportedVersion { .. } => "UnsupportedVersion",
			Self::StaleOrFutureRequest { .. } => "StaleOrFutureRequest",
			Self::ReplayedRequest => "ReplayedRequest",
		}
	}
}

/// Stateless validator configured with the allow-set and replay window.
#[derive(Clone, Debug)]
pub struct RequestValidator {
	allowed_app_versions: BTreeSet<AppVersion>,
	replay_window: Duration,
}
impl RequestValidator {
	/// Creates a validator for the given allow-set and window.
	pub fn new(
		allowed_app_versions: impl IntoIterator<Item = AppVersion>,
		replay_window: Duration,
	) -> Self {
		Self { allowed_app_versions: allowed_app_versions.into_iter().collect(), replay_window }
	}

	/// Builds a validator from the relay configuration.
	pub fn from_config(config: &RelayConfig) -> Self {
		Self::new(config.allowed_app_versions.iter().cloned(), config.replay_window)
	}

	/// Maximum tolerated timestamp skew.
	pub fn replay_window(&self) -> Duration {
		self.replay_window
	}

	/// Validates a request against the current clock.
	pub fn validate_now(
		&self,
		body: &DeviceRequest,
		headers: &DeviceHeaders,
	) -> Result<ValidatedRequest, ValidationError> {
		self.validate(body, headers, OffsetDateTime::now_utc())
	}

	/// Validates a request observed at `now`.
	pub fn validate(
		&self,
		body: &DeviceRequest,
		headers: &DeviceHeaders,
		now: OffsetDateTime,
	) -> Result<ValidatedRequest, ValidationError> {
		let result = self.check(body, headers, now);

		match &result {
			Ok(request) => events::request_accepted(request),
			Err(e) => events::request_rejected(body, headers, e),
		}

		result
	}

	fn check(
		&self,
		body: &DeviceRequest,
		headers: &DeviceHeaders,
		now: OffsetDateTime,
	) -> Result<ValidatedRequest, ValidationError> {
		let device_id = DeviceId::new(merge_field(
			"deviceId",
			headers.device_id.as_deref(),
			body.device_id.as_deref(),
		)?)
		.map_err(|_| ValidationError::MissingField { field: "deviceId" })?;
		let app_version = AppVersion::new(merge_field(
			"appVersion",
			headers.app_version.as_deref(),
			body.app_version.as_deref(),
		)?)
		.map_err(|_| ValidationError::MissingField { field: "appVersion" })?;
		let platform = Platform::new(merge_field(
			"platform",
			headers.platform.as_deref(),
			body.platform.as_deref(),
		)?)
		.map_err(|_| ValidationError::MissingField { field: "platform" })?;
		let timestamp = body.timestamp.ok_or(ValidationError::MissingField { field: "timestamp" })?;

		if !self.allowed_app_versions.contains(&*app_version) {
			return Err(ValidationError::UnsupportedVersion { version: app_version.into() });
		}

		let skew = i128::from(unix_millis(now)) - i128::from(timestamp);

		if skew.abs() > self.replay_window.whole_milliseconds() {
			let skew_ms = i64::try_from(skew).unwrap_or(if skew < 0 { i64::MIN } else { i64::MAX });

			return Err(ValidationError::StaleOrFutureRequest { skew_ms });
		}

		Ok(ValidatedRequest { device_id, platform, app_version, requested_at_ms: timestamp })
	}
}

/// Picks the header or body value for `field`. Both sides are trimmed before comparison;
/// blank values count as absent.
fn merge_field<'a>(
	field: &'static str,
	header: Option<&'a str>,
	body: Option<&'a str>,
) -> Result<&'a str, ValidationError> {
	let present = |value: Option<&'a str>| value.map(str::trim).filter(|v| !v.is_empty());

	match (present(header), present(body)) {
		(Some(header), Some(body)) if header != body =>
			Err(ValidationError::HeaderMismatch { field }),
		(Some(value), _) | (None, Some(value)) => Ok(value),
		(None, None) => Err(ValidationError::MissingField { field }),
	}
}
