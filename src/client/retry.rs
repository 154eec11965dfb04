//! Retry budget, failure classification, and the injectable backoff clock.

// std
use std::time::Duration as StdDuration;
// self
use crate::{_prelude::*, error::UpstreamError};

/// Boxed future returned by [`Sleeper`] implementations.
pub type SleepFuture<'a> = Pin<Box<dyn Future<Output = ()> + 'a + Send>>;

/// Waits between acquisition attempts.
pub trait Sleeper
where
	Self: Send + Sync,
{
	/// Suspends the caller for `duration`.
	fn sleep(&self, duration: StdDuration) -> SleepFuture<'_>;
}

/// [`Sleeper`] backed by the tokio timer.
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioSleeper;
impl Sleeper for TokioSleeper {
	fn sleep(&self, duration: StdDuration) -> SleepFuture<'_> {
		Box::pin(tokio::time::sleep(duration))
	}
}

/// Fixed attempt budget with exponential backoff.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
	/// Total attempts, including the first.
	pub max_attempts: u32,
	/// Base of the exponential backoff.
	pub base_delay: StdDuration,
}
impl RetryPolicy {
	/// Creates a policy; a zero budget is raised to one attempt.
	pub fn new(max_attempts: u32, base_delay: StdDuration) -> Self {
		Self { max_attempts: max_attempts.max(1), base_delay }
	}

	/// Wait after failed attempt `attempt` (counted from 1): `base_delay * 2^attempt`.
	pub fn delay_after(&self, attempt: u32) -> StdDuration {
		self.base_delay.saturating_mul(2_u32.saturating_pow(attempt))
	}
}
impl Default for RetryPolicy {
	fn default() -> Self {
		Self::new(3, StdDuration::from_millis(1000))
	}
}

/// Classified attempt failure.
#[derive(Debug)]
pub enum MintFailure {
	/// Network, 5xx, timeout, or malformed body; worth another attempt.
	Transient(Error),
	/// Credential rejection or local misconfiguration; surfaced immediately.
	NonRetryable(Error),
}
impl MintFailure {
	/// Tags an attempt error. Upstream 401/403 become [`Error::AuthenticationFailed`].
	pub fn classify(error: Error) -> Self {
		match error {
			Error::Upstream(e) if e.is_auth_rejection() => {
				let status = e.status().unwrap_or(401);
				let message = match e {
					UpstreamError::Status { message, .. } => message,
					other => other.to_string(),
				};

				Self::NonRetryable(Error::AuthenticationFailed { status, message })
			},
			Error::Upstream(_) => Self::Transient(error),
			other => Self::NonRetryable(other),
		}
	}

	/// Returns `true` for transient failures.
	pub fn is_transient(&self) -> bool {
		matches!(self, Self::Transient(_))
	}
}
