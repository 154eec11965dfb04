//! Device mint requests as they travel over the wire and after validation.

// self
use crate::{
	_prelude::*,
	auth::{AppVersion, DeviceId, Platform},
};

/// Header carrying the device identifier.
pub const DEVICE_ID_HEADER: &str = "x-device-id";
/// Header carrying the application version.
pub const APP_VERSION_HEADER: &str = "x-app-version";
/// Header carrying the client platform.
pub const PLATFORM_HEADER: &str = "x-platform";

/// JSON body of `POST /auth/device-token`.
///
/// Every field is optional on the wire so that absent values surface as validation errors
/// rather than deserialization failures.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRequest {
	/// Opaque per-install identifier.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub device_id: Option<String>,
	/// Client platform label.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub platform: Option<String>,
	/// Client application version.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub app_version: Option<String>,
	/// Client clock at request creation, in epoch milliseconds.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub timestamp: Option<i64>,
}
impl DeviceRequest {
	/// Creates a fully populated request stamped with `timestamp_ms`.
	pub fn new(
		device_id: &DeviceId,
		platform: &Platform,
		app_version: &AppVersion,
		timestamp_ms: i64,
	) -> Self {
		Self {
			device_id: Some(device_id.to_string()),
			platform: Some(platform.to_string()),
			app_version: Some(app_version.to_string()),
			timestamp: Some(timestamp_ms),
		}
	}

	/// Headers mirroring the body fields, as the client sends them.
	pub fn headers(&self) -> DeviceHeaders {
		DeviceHeaders {
			device_id: self.device_id.clone(),
			app_version: self.app_version.clone(),
			platform: self.platform.clone(),
		}
	}
}

/// Device fields sourced from request headers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeviceHeaders {
	/// Value of `X-Device-ID`.
	pub device_id: Option<String>,
	/// Value of `X-App-Version`.
	pub app_version: Option<String>,
	/// Value of `X-Platform`.
	pub platform: Option<String>,
}

/// A device request that passed every validator check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatedRequest {
	/// Device the token is minted for.
	pub device_id: DeviceId,
	/// Platform reported by the device.
	pub platform: Platform,
	/// Accepted application version.
	pub app_version: AppVersion,
	/// Client timestamp that passed the replay window, in epoch milliseconds.
	pub requested_at_ms: i64,
}
