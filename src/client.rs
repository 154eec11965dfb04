//! Client side of the relay: token acquisition with bounded backoff and a single-slot cache.
//!
//! [`TokenClient::acquire_cached_token`] serves the cached token until its local expiry and
//! otherwise runs [`TokenClient::acquire_token`], which builds a fresh credential before every
//! attempt, retries transient failures with exponential backoff, and stops immediately on
//! credential rejections. Concurrent refreshes are not coalesced; the last write wins.

pub mod cache;
pub mod identity;
pub mod retry;
pub mod transport;

pub use cache::*;
pub use identity::*;
pub use retry::*;
pub use transport::*;

// std
use std::sync::atomic::{AtomicU64, Ordering};
// self
use crate::{
	_prelude::*,
	auth::{AppVersion, DeviceRequest, Platform, TokenResponse, TokenSecret},
	obs::{self, OpOutcome, OpSpan, RelayOp, events},
};

/// Device attributes attached to every device-mode request.
#[derive(Clone, Debug)]
pub struct DeviceProfile {
	/// Source of the installation's identifier.
	pub identity: Arc<DeviceIdentityProvider>,
	/// Platform label.
	pub platform: Platform,
	/// Application version.
	pub app_version: AppVersion,
}

/// Credential strategy used for mint attempts.
#[derive(Clone)]
pub enum AcquisitionMode {
	/// Sign each attempt with a fresh device request.
	Device(DeviceProfile),
	/// Present a fresh identity assertion as bearer to the public endpoint.
	Assertion(Arc<dyn AssertionSource>),
}
impl Debug for AcquisitionMode {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		match self {
			Self::Device(profile) => f.debug_tuple("Device").field(profile).finish(),
			Self::Assertion(_) => f.write_str("Assertion(..)"),
		}
	}
}

/// Thread-safe counters for token acquisition.
#[derive(Debug, Default)]
pub struct AcquisitionMetrics {
	attempts: AtomicU64,
	success: AtomicU64,
	failure: AtomicU64,
	cache_hits: AtomicU64,
}
impl AcquisitionMetrics {
	/// Total network attempts, including retries.
	pub fn attempts(&self) -> u64 {
		self.attempts.load(Ordering::Relaxed)
	}

	/// Acquisitions that produced a token from the network.
	pub fn successes(&self) -> u64 {
		self.success.load(Ordering::Relaxed)
	}

	/// Acquisitions that surfaced an error.
	pub fn failures(&self) -> u64 {
		self.failure.load(Ordering::Relaxed)
	}

	/// Cached acquisitions answered without network.
	pub fn cache_hits(&self) -> u64 {
		self.cache_hits.load(Ordering::Relaxed)
	}

	fn record_attempt(&self) {
		self.attempts.fetch_add(1, Ordering::Relaxed);
	}

	fn record_success(&self) {
		self.success.fetch_add(1, Ordering::Relaxed);
	}

	fn record_failure(&self) {
		self.failure.fetch_add(1, Ordering::Relaxed);
	}

	fn record_cache_hit(&self) {
		self.cache_hits.fetch_add(1, Ordering::Relaxed);
	}
}

/// Acquires relay tokens and caches the latest one.
pub struct TokenClient<T, S = TokioSleeper> {
	transport: T,
	mode: AcquisitionMode,
	cache: TokenCache,
	policy: RetryPolicy,
	sleeper: S,
	metrics: Arc<AcquisitionMetrics>,
}
impl<T> TokenClient<T>
where
	T: MintTransport,
{
	/// Creates a client with the default retry policy, safety margin, and tokio timer.
	pub fn new(transport: T, mode: AcquisitionMode) -> Self {
		Self {
			transport,
			mode,
			cache: TokenCache::default(),
			policy: RetryPolicy::default(),
			sleeper: TokioSleeper,
			metrics: Default::default(),
		}
	}
}
impl<T, S> TokenClient<T, S>
where
	T: MintTransport,
	S: Sleeper,
{
	/// Replaces the backoff clock.
	pub fn with_sleeper<S2>(self, sleeper: S2) -> TokenClient<T, S2>
	where
		S2: Sleeper,
	{
		TokenClient {
			transport: self.transport,
			mode: self.mode,
			cache: self.cache,
			policy: self.policy,
			sleeper,
			metrics: self.metrics,
		}
	}

	/// Replaces the retry policy.
	pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
		self.policy = policy;

		self
	}

	/// Replaces the cache with an empty one using `safety_margin`.
	pub fn with_safety_margin(mut self, safety_margin: Duration) -> Self {
		self.cache = TokenCache::new(safety_margin);

		self
	}

	/// Token cache.
	pub fn cache(&self) -> &TokenCache {
		&self.cache
	}

	/// Shared acquisition counters.
	pub fn metrics(&self) -> Arc<AcquisitionMetrics> {
		Arc::clone(&self.metrics)
	}

	/// Drops the cached token.
	pub fn invalidate(&self) {
		self.cache.clear();
	}

	/// Returns the cached token when valid, otherwise acquires and caches a new one.
	pub async fn acquire_cached_token(&self) -> Result<TokenSecret> {
		self.acquire_cached_token_at(OffsetDateTime::now_utc()).await
	}

	/// Same as [`acquire_cached_token`](Self::acquire_cached_token), judging validity at `now`.
	pub async fn acquire_cached_token_at(&self, now: OffsetDateTime) -> Result<TokenSecret> {
		if let Some(entry) = self.cache.valid_at(now) {
			self.metrics.record_cache_hit();

			return Ok(entry.token);
		}

		let (response, issued_at) = self.fetch().await?;

		self.cache.set_issued_at(response.token.clone(), issued_at, response.expires_in);

		Ok(response.token)
	}

	/// Acquires a new token from the relay, bypassing the cache.
	pub async fn acquire_token(&self) -> Result<TokenSecret> {
		Ok(self.fetch().await?.0.token)
	}

	async fn fetch(&self) -> Result<(TokenResponse, OffsetDateTime)> {
		const OP: RelayOp = RelayOp::Acquire;

		let span = OpSpan::new(OP, "acquire_token");

		obs::record_op_outcome(OP, OpOutcome::Attempt);

		let result = span.instrument(self.attempt_loop()).await;

		match &result {
			Ok(_) => {
				self.metrics.record_success();
				obs::record_op_outcome(OP, OpOutcome::Success);
			},
			Err(e) => {
				self.metrics.record_failure();
				obs::record_op_outcome(OP, OpOutcome::Failure);

				match &self.mode {
					AcquisitionMode::Device(profile) => {
						let device_id = profile.identity.device_identifier().await;

						events::acquisition_failed(Some(&*device_id), Some(&*profile.platform), e);
					},
					AcquisitionMode::Assertion(_) => events::acquisition_failed(None, None, e),
				}
			},
		}

		result
	}

	async fn attempt_loop(&self) -> Result<(TokenResponse, OffsetDateTime)> {
		let max_attempts = self.policy.max_attempts;
		let mut attempt = 1;

		loop {
			self.metrics.record_attempt();

			let dispatched_at = OffsetDateTime::now_utc();
			let error = match self.attempt(dispatched_at).await {
				Ok(response) => return Ok((response, dispatched_at)),
				Err(e) => match MintFailure::classify(e) {
					MintFailure::NonRetryable(e) => return Err(e),
					MintFailure::Transient(e) => e,
				},
			};

			if attempt >= max_attempts {
				return Err(Error::RetriesExhausted { attempts: attempt, source: Box::new(error) });
			}

			let delay = self.policy.delay_after(attempt);

			events::acquisition_retrying(attempt, delay, &error);
			self.sleeper.sleep(delay).await;

			attempt += 1;
		}
	}

	async fn attempt(&self, now: OffsetDateTime) -> Result<TokenResponse> {
		let credential = match &self.mode {
			AcquisitionMode::Device(profile) => {
				let device_id = profile.identity.device_identifier().await;

				MintCredential::Device(DeviceRequest::new(
					&device_id,
					&profile.platform,
					&profile.app_version,
					unix_millis(now),
				))
			},
			AcquisitionMode::Assertion(source) =>
				MintCredential::Assertion(source.assertion().await?),
		};

		self.transport.mint(&credential).await
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::{collections::VecDeque, sync::atomic::AtomicU32, time::Duration as StdDuration};
	// crates.io
	use time::macros;
	// self
	use super::*;
	use crate::{auth::DeviceId, error::UpstreamError};

	#[derive(Default)]
	struct ScriptedTransport {
		script: Mutex<VecDeque<Result<(), u16>>>,
		calls: AtomicU32,
		credentials: Mutex<Vec<MintCredential>>,
	}
	impl ScriptedTransport {
		fn with_script(script: impl IntoIterator<Item = Result<(), u16>>) -> Arc<Self> {
			Arc::new(Self {
				script: Mutex::new(script.into_iter().collect()),
				..Default::default()
			})
		}

		fn calls(&self) -> u32 {
			self.calls.load(Ordering::SeqCst)
		}
	}
	impl MintTransport for ScriptedTransport {
		fn mint<'a>(
			&'a self,
			credential: &'a MintCredential,
		) -> TransportFuture<'a, TokenResponse> {
			let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;

			self.credentials.lock().push(credential.clone());

			let step = self.script.lock().pop_front().unwrap_or(Ok(()));

			Box::pin(async move {
				match step {
					Ok(()) => Ok(TokenResponse {
						token: TokenSecret::new(format!("token-{call}")),
						expires_in: 3600,
						timestamp: 0,
					}),
					Err(status) => Err(UpstreamError::Status {
						status,
						message: format!("scripted failure {call}"),
					}
					.into()),
				}
			})
		}
	}

	#[derive(Clone, Default)]
	struct RecordingSleeper(Arc<Mutex<Vec<StdDuration>>>);
	impl RecordingSleeper {
		fn waits(&self) -> Vec<StdDuration> {
			self.0.lock().clone()
		}
	}
	impl Sleeper for RecordingSleeper {
		fn sleep(&self, duration: StdDuration) -> SleepFuture<'_> {
			self.0.lock().push(duration);

			Box::pin(async {})
		}
	}

	struct StaticAssertion;
	impl AssertionSource for StaticAssertion {
		fn assertion(&self) -> TransportFuture<'_, TokenSecret> {
			Box::pin(async { Ok(TokenSecret::new("signed-assertion")) })
		}
	}

	fn device_mode() -> AcquisitionMode {
		let store = MemoryIdentityStore::with_identifier(
			DeviceId::new("device-1").expect("Device fixture should be valid."),
		);

		AcquisitionMode::Device(DeviceProfile {
			identity: Arc::new(DeviceIdentityProvider::new(
				Arc::new(store),
				DeviceEnvironment::Emulated,
			)),
			platform: Platform::new("ios").expect("Platform fixture should be valid."),
			app_version: AppVersion::new("1.0.0").expect("Version fixture should be valid."),
		})
	}

	fn client(
		transport: Arc<ScriptedTransport>,
	) -> (TokenClient<Arc<ScriptedTransport>, RecordingSleeper>, RecordingSleeper) {
		let sleeper = RecordingSleeper::default();
		let client = TokenClient::new(transport, device_mode()).with_sleeper(sleeper.clone());

		(client, sleeper)
	}

	#[tokio::test]
	async fn cached_acquisitions_share_one_network_call() {
		let transport = ScriptedTransport::with_script([Ok(())]);
		let (client, _) = client(transport.clone());
		let first = client.acquire_cached_token().await.expect("First acquisition should mint.");
		let second = client.acquire_cached_token().await.expect("Second should hit the cache.");

		assert_eq!(first, second);
		assert_eq!(transport.calls(), 1);
		assert_eq!(client.metrics().cache_hits(), 1);

		let credentials = transport.credentials.lock();

		assert!(matches!(
			&credentials[0],
			MintCredential::Device(body) if body.device_id.as_deref() == Some("device-1")
				&& body.timestamp.is_some()
		));
	}

	#[tokio::test]
	async fn expiry_boundary_is_exclusive() {
		let now = macros::datetime!(2025-01-01 12:00 UTC);
		let usable = Duration::seconds(3600) - TokenCache::DEFAULT_SAFETY_MARGIN;
		let transport = ScriptedTransport::with_script([]);
		let (client, _) = client(transport.clone());

		client.cache().set_issued_at(
			TokenSecret::new("cached"),
			now - usable + Duration::milliseconds(1),
			3600,
		);

		let served = client.acquire_cached_token_at(now).await.expect("Cached token is valid.");

		assert_eq!(served.expose(), "cached");
		assert_eq!(transport.calls(), 0);

		client.cache().set_issued_at(
			TokenSecret::new("cached"),
			now - usable - Duration::milliseconds(1),
			3600,
		);

		let refreshed = client.acquire_cached_token_at(now).await.expect("Refresh should mint.");

		assert_eq!(refreshed.expose(), "token-1");
		assert_eq!(transport.calls(), 1);
	}

	#[tokio::test]
	async fn transient_failures_back_off_exponentially() {
		let transport = ScriptedTransport::with_script([Err(503), Err(500), Ok(())]);
		let (client, sleeper) = client(transport.clone());
		let token = client.acquire_token().await.expect("Third attempt should succeed.");

		assert_eq!(token.expose(), "token-3");
		assert_eq!(transport.calls(), 3);
		assert_eq!(
			sleeper.waits(),
			vec![StdDuration::from_millis(2000), StdDuration::from_millis(4000)]
		);
		assert_eq!(client.metrics().attempts(), 3);
	}

	#[tokio::test]
	async fn exhausted_budget_reports_the_last_failure() {
		let transport = ScriptedTransport::with_script([Err(502), Err(502), Err(503)]);
		let (client, sleeper) = client(transport.clone());
		let err = client.acquire_token().await.expect_err("All attempts fail.");

		assert!(matches!(err, Error::RetriesExhausted { attempts: 3, .. }));
		assert_eq!(err.status(), Some(503));
		assert_eq!(sleeper.waits().len(), 2, "No wait follows the final attempt.");
		assert!(client.cache().peek().is_none());
	}

	#[cfg(feature = "tracing")]
	#[tokio::test]
	async fn terminal_failures_are_logged_with_device_and_status() {
		let capture = obs::events::LogCapture::start();
		let transport = ScriptedTransport::with_script([Err(403)]);
		let (client, _) = client(transport);
		let _ = client.acquire_token().await;
		let output = capture.output();

		assert!(output.contains("Token acquisition failed."), "{output}");
		assert!(output.contains("device_id=\"device-1\""), "{output}");
		assert!(output.contains("platform=\"ios\""), "{output}");
		assert!(output.contains("status=403"), "{output}");
	}

	#[tokio::test]
	async fn credential_rejection_stops_after_one_attempt() {
		let transport = ScriptedTransport::with_script([Err(401), Ok(())]);
		let (client, sleeper) = client(transport.clone());
		let err = client.acquire_cached_token().await.expect_err("401 must not be retried.");

		assert!(matches!(err, Error::AuthenticationFailed { status: 401, .. }));
		assert_eq!(transport.calls(), 1);
		assert!(sleeper.waits().is_empty());
		assert_eq!(client.metrics().failures(), 1);
	}

	#[tokio::test]
	async fn assertion_mode_presents_a_fresh_bearer() {
		let transport = ScriptedTransport::with_script([Ok(())]);
		let client = TokenClient::new(
			transport.clone(),
			AcquisitionMode::Assertion(Arc::new(StaticAssertion)),
		)
		.with_sleeper(RecordingSleeper::default());

		client.acquire_token().await.expect("Assertion mint should succeed.");

		assert!(matches!(
			&transport.credentials.lock()[0],
			MintCredential::Assertion(token) if token.expose() == "signed-assertion"
		));
	}

	#[tokio::test]
	async fn invalidate_forces_a_new_mint() {
		let transport = ScriptedTransport::with_script([Ok(()), Ok(())]);
		let (client, _) = client(transport.clone());

		client.acquire_cached_token().await.expect("First acquisition should mint.");
		client.invalidate();

		let second = client.acquire_cached_token().await.expect("Second acquisition should mint.");

		assert_eq!(second.expose(), "token-2");
		assert_eq!(transport.calls(), 2);
	}
}
