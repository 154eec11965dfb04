//! One-time-use enforcement for validated device requests.
//!
//! A request is identified by `(device_id, timestamp)`. Entries are kept until their
//! timestamp falls out of the replay window, after which the validator rejects the request
//! anyway.

// self
use crate::{
	_prelude::*,
	auth::{DeviceId, ValidatedRequest},
	service::ValidationError,
};

/// In-memory registry of requests seen inside the replay window.
#[derive(Debug)]
pub struct ReplayGuard {
	window: Duration,
	seen: Mutex<HashMap<(DeviceId, i64), OffsetDateTime>>,
}
impl ReplayGuard {
	/// Creates a guard that remembers requests for `window`.
	pub fn new(window: Duration) -> Self {
		Self { window, seen: Default::default() }
	}

	/// Marks the request as used, rejecting it when it was already seen.
	///
	/// The check and the insert happen under one lock.
	pub fn check_and_record(
		&self,
		request: &ValidatedRequest,
		now: OffsetDateTime,
	) -> Result<(), ValidationError> {
		let mut seen = self.seen.lock();

		seen.retain(|_, forget_at| *forget_at > now);

		let key = (request.device_id.clone(), request.requested_at_ms);

		if seen.contains_key(&key) {
			return Err(ValidationError::ReplayedRequest);
		}

		let requested_nanos = i128::from(request.requested_at_ms) * 1_000_000;
		let requested_at =
			OffsetDateTime::from_unix_timestamp_nanos(requested_nanos).unwrap_or(now);

		seen.insert(key, requested_at.saturating_add(self.window));

		Ok(())
	}

	/// Number of requests currently remembered.
	pub fn len(&self) -> usize {
		self.seen.lock().len()
	}

	/// Returns `true` when no request is remembered.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}
