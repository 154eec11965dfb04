//! Single-slot, process-local token cache with its own expiry policy.

// self
use crate::{_prelude::*, auth::TokenSecret};

/// Cached bearer token and the instant after which the client stops serving it.
#[derive(Clone)]
pub struct CachedToken {
	/// Token secret.
	pub token: TokenSecret,
	/// Client-side expiry, earlier than the server expiry by the safety margin.
	pub local_expiry: OffsetDateTime,
}
impl CachedToken {
	/// Returns `true` while `now` is strictly before the local expiry.
	pub fn is_valid_at(&self, now: OffsetDateTime) -> bool {
		now < self.local_expiry
	}
}
impl Debug for CachedToken {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("CachedToken")
			.field("token", &"<redacted>")
			.field("local_expiry", &self.local_expiry)
			.finish()
	}
}

/// Owned single-slot cache. Every operation takes the slot lock once, so reads never observe a
/// half-written entry; concurrent refreshes resolve as last write wins.
#[derive(Debug)]
pub struct TokenCache {
	safety_margin: Duration,
	slot: Mutex<Option<CachedToken>>,
}
impl TokenCache {
	/// Margin subtracted from the server TTL when no other value is configured.
	pub const DEFAULT_SAFETY_MARGIN: Duration = Duration::seconds(600);

	/// Creates an empty cache with the given safety margin; negative margins count as zero.
	pub fn new(safety_margin: Duration) -> Self {
		Self { safety_margin: safety_margin.max(Duration::ZERO), slot: Mutex::new(None) }
	}

	/// Returns the entry if it is still valid now.
	pub fn get(&self) -> Option<CachedToken> {
		self.valid_at(OffsetDateTime::now_utc())
	}

	/// Returns the entry if it is still valid at `now`.
	pub fn valid_at(&self, now: OffsetDateTime) -> Option<CachedToken> {
		self.slot.lock().as_ref().filter(|entry| entry.is_valid_at(now)).cloned()
	}

	/// Returns the stored entry regardless of expiry.
	pub fn peek(&self) -> Option<CachedToken> {
		self.slot.lock().clone()
	}

	/// Stores a token issued now.
	pub fn set(&self, token: TokenSecret, ttl_seconds: u64) -> CachedToken {
		self.set_issued_at(token, OffsetDateTime::now_utc(), ttl_seconds)
	}

	/// Stores a token issued at `issued_at`, replacing any previous entry.
	///
	/// A TTL that does not exceed the safety margin yields an entry that expires at
	/// `issued_at` and is never served.
	pub fn set_issued_at(
		&self,
		token: TokenSecret,
		issued_at: OffsetDateTime,
		ttl_seconds: u64,
	) -> CachedToken {
		let ttl = Duration::seconds(i64::try_from(ttl_seconds).unwrap_or(i64::MAX));
		let usable = (ttl - self.safety_margin).max(Duration::ZERO);
		let entry = CachedToken { token, local_expiry: issued_at.saturating_add(usable) };

		*self.slot.lock() = Some(entry.clone());

		entry
	}

	/// Empties the slot.
	pub fn clear(&self) {
		self.slot.lock().take();
	}
}
impl Default for TokenCache {
	fn default() -> Self {
		Self::new(Self::DEFAULT_SAFETY_MARGIN)
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;

	const ISSUED: OffsetDateTime = macros::datetime!(2025-01-01 00:00 UTC);

	#[test]
	fn local_expiry_subtracts_the_safety_margin() {
		let cache = TokenCache::default();
		let entry = cache.set_issued_at(TokenSecret::new("t"), ISSUED, 3600);

		assert_eq!(entry.local_expiry, macros::datetime!(2025-01-01 00:50 UTC));
		assert!(cache.valid_at(entry.local_expiry - Duration::milliseconds(1)).is_some());
		assert!(cache.valid_at(entry.local_expiry).is_none());
		assert!(cache.peek().is_some(), "Expired entries stay in the slot until replaced.");
	}

	#[test]
	fn short_ttls_are_never_served() {
		let cache = TokenCache::default();
		let entry = cache.set_issued_at(TokenSecret::new("t"), ISSUED, 600);

		assert_eq!(entry.local_expiry, ISSUED);
		assert!(cache.valid_at(ISSUED).is_none());
	}

	#[test]
	fn set_overwrites_and_clear_empties() {
		let cache = TokenCache::new(Duration::ZERO);

		cache.set(TokenSecret::new("first"), 60);
		cache.set(TokenSecret::new("second"), 60);

		assert_eq!(cache.get().map(|entry| entry.token.into_inner()).as_deref(), Some("second"));

		cache.clear();

		assert!(cache.peek().is_none());
	}
}
