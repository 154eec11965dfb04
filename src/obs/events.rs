//! Diagnostic and audit events.
//!
//! Every helper compiles to a no-op without the `tracing` feature. None of them accept token
//! material; callers pass identifiers and lifetimes only.

// self
use crate::{
	_prelude::*,
	auth::{DeviceHeaders, DeviceRequest, MintedToken, ValidatedRequest},
	service::ValidationError,
};

/// Target used for audit records so they can be routed separately.
pub const AUDIT_TARGET: &str = "device_token_relay::audit";

/// Logs a request that passed validation.
pub fn request_accepted(request: &ValidatedRequest) {
	#[cfg(feature = "tracing")]
	tracing::debug!(
		device_id = %request.device_id,
		platform = %request.platform,
		app_version = %request.app_version,
		"Device request accepted."
	);
	#[cfg(not(feature = "tracing"))]
	let _ = request;
}

/// Logs a rejected device request with whatever identity it claimed.
pub fn request_rejected(body: &DeviceRequest, headers: &DeviceHeaders, error: &ValidationError) {
	#[cfg(feature = "tracing")]
	{
		fn claimed<'a>(header: &'a Option<String>, body: &'a Option<String>) -> Option<&'a str> {
			header.as_deref().or(body.as_deref()).map(str::trim).filter(|v| !v.is_empty())
		}

		tracing::warn!(
			device_id = claimed(&headers.device_id, &body.device_id),
			platform = claimed(&headers.platform, &body.platform),
			status = 401_u16,
			code = error.code(),
			%error,
			"Device request rejected."
		);
	}
	#[cfg(not(feature = "tracing"))]
	let _ = (body, headers, error);
}

/// Records a successful mint. `request` is absent for unattributed bearer mints.
pub fn mint_audited(request: Option<&ValidatedRequest>, minted: &MintedToken) {
	#[cfg(feature = "tracing")]
	match request {
		Some(request) => tracing::info!(
			target: AUDIT_TARGET,
			device_id = %request.device_id,
			platform = %request.platform,
			token_fp = %minted.token.fingerprint(),
			ttl_seconds = minted.ttl_seconds,
			"Token minted for device."
		),
		None => tracing::info!(
			target: AUDIT_TARGET,
			token_fp = %minted.token.fingerprint(),
			ttl_seconds = minted.ttl_seconds,
			"Token minted for bearer caller."
		),
	}
	#[cfg(not(feature = "tracing"))]
	let _ = (request, minted);
}

/// Records a self-signed identity assertion.
pub fn assertion_issued(issuer: &str, audience: &str) {
	#[cfg(feature = "tracing")]
	tracing::info!(target: AUDIT_TARGET, issuer, audience, "Identity assertion issued.");
	#[cfg(not(feature = "tracing"))]
	let _ = (issuer, audience);
}

/// Logs an upstream failure surfaced by the minting service. `request` is absent for bearer
/// mints.
pub fn upstream_failed(request: Option<&ValidatedRequest>, error: &Error) {
	#[cfg(feature = "tracing")]
	tracing::error!(
		device_id = request.map(|r| &*r.device_id),
		platform = request.map(|r| &*r.platform),
		status = error.status(),
		%error,
		"Token mint failed."
	);
	#[cfg(not(feature = "tracing"))]
	let _ = (request, error);
}

/// Logs a transient acquisition failure followed by a backoff wait.
pub fn acquisition_retrying(attempt: u32, delay: std::time::Duration, error: &Error) {
	#[cfg(feature = "tracing")]
	tracing::warn!(
		attempt,
		delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
		status = error.status(),
		%error,
		"Token acquisition attempt failed; backing off."
	);
	#[cfg(not(feature = "tracing"))]
	let _ = (attempt, delay, error);
}

/// Logs the terminal failure of a token acquisition. Device fields are absent in assertion
/// mode.
pub fn acquisition_failed(device_id: Option<&str>, platform: Option<&str>, error: &Error) {
	#[cfg(feature = "tracing")]
	tracing::error!(
		device_id,
		platform,
		status = error.status(),
		%error,
		"Token acquisition failed."
	);
	#[cfg(not(feature = "tracing"))]
	let _ = (device_id, platform, error);
}

/// Logs the degraded identifier path of the device identity provider.
pub fn identity_fallback(reason: &dyn Display) {
	#[cfg(feature = "tracing")]
	tracing::warn!(%reason, "Device identifier unavailable; using timestamp fallback.");
	#[cfg(not(feature = "tracing"))]
	let _ = reason;
}

/// Captures formatted log output of the current thread while alive.
#[cfg(all(test, feature = "tracing"))]
pub(crate) struct LogCapture {
	buffer: Arc<Mutex<Vec<u8>>>,
	_guard: tracing::subscriber::DefaultGuard,
}
#[cfg(all(test, feature = "tracing"))]
impl LogCapture {
	pub(crate) fn start() -> Self {
		let buffer = Arc::new(Mutex::new(Vec::new()));
		let sink = Arc::clone(&buffer);
		let subscriber = tracing_subscriber::fmt()
			.with_writer(move || CaptureWriter(Arc::clone(&sink)))
			.with_ansi(false)
			.with_max_level(tracing::Level::DEBUG)
			.finish();

		Self { buffer, _guard: tracing::subscriber::set_default(subscriber) }
	}

	pub(crate) fn output(&self) -> String {
		String::from_utf8_lossy(&self.buffer.lock()).into_owned()
	}
}

#[cfg(all(test, feature = "tracing"))]
struct CaptureWriter(Arc<Mutex<Vec<u8>>>);
#[cfg(all(test, feature = "tracing"))]
impl std::io::Write for CaptureWriter {
	fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
		self.0.lock().extend_from_slice(buf);

		Ok(buf.len())
	}

	fn flush(&mut self) -> std::io::Result<()> {
		Ok(())
	}
}
