//! Stable per-installation device identifiers.
//!
//! [`DeviceIdentityProvider`] memoizes the identifier for the process lifetime and persists it
//! through an [`IdentityStore`] so it survives restarts. Physical devices derive the identifier
//! from hardware descriptors; emulated ones draw it from the OS random source. Any store or
//! randomness failure degrades to a timestamp-derived identifier instead of failing.

// std
use std::{
	fs,
	io::Write,
	path::{Path, PathBuf},
};
// crates.io
use rand::{TryRngCore, rngs::OsRng};
use sha2::{Digest, Sha256};
use tokio::sync::OnceCell;
// self
use crate::{_prelude::*, auth::DeviceId, obs::events};

/// Boxed future returned by [`IdentityStore`] implementations.
pub type IdentityFuture<'a, T> =
	Pin<Box<dyn Future<Output = Result<T, IdentityStoreError>> + 'a + Send>>;

/// Error produced by [`IdentityStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum IdentityStoreError {
	/// Stored document could not be encoded or decoded.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Storage backend failed.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}

/// Persistence for the installation's device identifier.
pub trait IdentityStore
where
	Self: Send + Sync,
{
	/// Loads the persisted identifier, if any.
	fn load(&self) -> IdentityFuture<'_, Option<DeviceId>>;

	/// Persists the identifier.
	fn save<'a>(&'a self, device_id: &'a DeviceId) -> IdentityFuture<'a, ()>;
}

/// In-process [`IdentityStore`] for tests and ephemeral clients.
#[derive(Clone, Debug, Default)]
pub struct MemoryIdentityStore(Arc<Mutex<Option<DeviceId>>>);
impl MemoryIdentityStore {
	/// Creates a store that already holds `device_id`.
	pub fn with_identifier(device_id: DeviceId) -> Self {
		Self(Arc::new(Mutex::new(Some(device_id))))
	}
}
impl IdentityStore for MemoryIdentityStore {
	fn load(&self) -> IdentityFuture<'_, Option<DeviceId>> {
		let value = self.0.lock().clone();

		Box::pin(async move { Ok(value) })
	}

	fn save<'a>(&'a self, device_id: &'a DeviceId) -> IdentityFuture<'a, ()> {
		*self.0.lock() = Some(device_id.clone());

		Box::pin(async { Ok(()) })
	}
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdentityDocument {
	device_id: DeviceId,
}

/// JSON-file [`IdentityStore`]; writes go through a temporary file and a rename.
#[derive(Clone, Debug)]
pub struct FileIdentityStore {
	path: PathBuf,
}
impl FileIdentityStore {
	/// Creates a store at `path`, creating parent directories on demand.
	pub fn open(path: impl Into<PathBuf>) -> Result<Self, IdentityStoreError> {
		let path = path.into();

		if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
			fs::create_dir_all(parent).map_err(|e| IdentityStoreError::Backend {
				message: format!("Failed to create {}: {e}", parent.display()),
			})?;
		}

		Ok(Self { path })
	}

	/// Location of the identity document.
	pub fn path(&self) -> &Path {
		&self.path
	}

	fn read_now(&self) -> Result<Option<DeviceId>, IdentityStoreError> {
		if !self.path.exists() {
			return Ok(None);
		}

		let bytes = fs::read(&self.path).map_err(|e| IdentityStoreError::Backend {
			message: format!("Failed to read {}: {e}", self.path.display()),
		})?;

		if bytes.is_empty() {
			return Ok(None);
		}

		let document: IdentityDocument =
			serde_json::from_slice(&bytes).map_err(|e| IdentityStoreError::Serialization {
				message: format!("Failed to parse {}: {e}", self.path.display()),
			})?;

		Ok(Some(document.device_id))
	}

	fn write_now(&self, device_id: &DeviceId) -> Result<(), IdentityStoreError> {
		let payload = serde_json::to_vec_pretty(&IdentityDocument { device_id: device_id.clone() })
			.map_err(|e| IdentityStoreError::Serialization { message: e.to_string() })?;
		let tmp = self.path.with_extension("tmp");
		let backend = |e: std::io::Error| IdentityStoreError::Backend {
			message: format!("Failed to write {}: {e}", self.path.display()),
		};
		let mut file = fs::File::create(&tmp).map_err(backend)?;

		file.write_all(&payload).map_err(backend)?;
		file.sync_all().map_err(backend)?;
		fs::rename(&tmp, &self.path).map_err(backend)?;

		Ok(())
	}
}
impl IdentityStore for FileIdentityStore {
	fn load(&self) -> IdentityFuture<'_, Option<DeviceId>> {
		Box::pin(async move { self.read_now() })
	}

	fn save<'a>(&'a self, device_id: &'a DeviceId) -> IdentityFuture<'a, ()> {
		Box::pin(async move { self.write_now(device_id) })
	}
}

/// Hardware and OS descriptors of a physical device.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareProfile {
	/// Device manufacturer.
	pub manufacturer: String,
	/// Device model.
	pub model: String,
	/// Operating system name.
	pub os_name: String,
	/// Operating system version.
	pub os_version: String,
}

/// Where the client runs; selects the derivation strategy for new identifiers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeviceEnvironment {
	/// Real hardware; identifiers hash the hardware profile.
	Physical(HardwareProfile),
	/// Emulator or simulator; identifiers are random.
	Emulated,
}

/// Supplies the installation's device identifier.
pub struct DeviceIdentityProvider {
	store: Arc<dyn IdentityStore>,
	environment: DeviceEnvironment,
	memo: OnceCell<DeviceId>,
}
impl DeviceIdentityProvider {
	/// Creates a provider persisting through `store`.
	pub fn new(store: Arc<dyn IdentityStore>, environment: DeviceEnvironment) -> Self {
		Self { store, environment, memo: OnceCell::new() }
	}

	/// Returns the identifier, deriving and persisting it on first use.
	pub async fn device_identifier(&self) -> DeviceId {
		self.device_identifier_at(OffsetDateTime::now_utc()).await
	}

	/// Same as [`device_identifier`](Self::device_identifier) with an explicit creation clock.
	pub async fn device_identifier_at(&self, now: OffsetDateTime) -> DeviceId {
		self.memo.get_or_init(|| self.resolve(now)).await.clone()
	}

	async fn resolve(&self, now: OffsetDateTime) -> DeviceId {
		match self.load_or_create(now).await {
			Ok(device_id) => device_id,
			Err(reason) => {
				events::identity_fallback(&reason);

				fallback_identifier(now)
			},
		}
	}

	async fn load_or_create(&self, now: OffsetDateTime) -> Result<DeviceId, IdentityStoreError> {
		if let Some(existing) = self.store.load().await? {
			return Ok(existing);
		}

		let derived = match &self.environment {
			DeviceEnvironment::Physical(profile) => hardware_identifier(profile, now),
			DeviceEnvironment::Emulated => random_identifier()?,
		};

		self.store.save(&derived).await?;

		Ok(derived)
	}
}
impl Debug for DeviceIdentityProvider {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("DeviceIdentityProvider")
			.field("environment", &self.environment)
			.field("memo", &self.memo.get())
			.finish()
	}
}

fn hardware_identifier(profile: &HardwareProfile, now: OffsetDateTime) -> DeviceId {
	let mut hasher = Sha256::new();

	for part in [&profile.manufacturer, &profile.model, &profile.os_name, &profile.os_version] {
		hasher.update(part.as_bytes());
		hasher.update([0x1f_u8]);
	}

	hasher.update(unix_millis(now).to_be_bytes());

	let digest = hex::encode(hasher.finalize());

	DeviceId::from_generated(digest[..32].to_owned())
}

fn random_identifier() -> Result<DeviceId, IdentityStoreError> {
	let mut bytes = [0_u8; 16];

	OsRng.try_fill_bytes(&mut bytes).map_err(|e| IdentityStoreError::Backend {
		message: format!("OS random source unavailable: {e}"),
	})?;

	Ok(DeviceId::from_generated(hex::encode(bytes)))
}

fn fallback_identifier(now: OffsetDateTime) -> DeviceId {
	DeviceId::from_generated(format!("ts-{:x}", unix_millis(now)))
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;

	struct BrokenStore;
	impl IdentityStore for BrokenStore {
		fn load(&self) -> IdentityFuture<'_, Option<DeviceId>> {
			Box::pin(async {
				Err(IdentityStoreError::Backend { message: "keychain locked".into() })
			})
		}

		fn save<'a>(&'a self, _device_id: &'a DeviceId) -> IdentityFuture<'a, ()> {
			Box::pin(async { Ok(()) })
		}
	}

	fn profile() -> HardwareProfile {
		HardwareProfile {
			manufacturer: "Acme".into(),
			model: "Phone 9".into(),
			os_name: "AcmeOS".into(),
			os_version: "17.1".into(),
		}
	}

	#[tokio::test]
	async fn identifier_is_idempotent_and_persisted() {
		let store = MemoryIdentityStore::default();
		let provider = DeviceIdentityProvider::new(
			Arc::new(store.clone()),
			DeviceEnvironment::Physical(profile()),
		);
		let now = macros::datetime!(2025-01-01 00:00 UTC);
		let first = provider.device_identifier_at(now).await;
		let second = provider.device_identifier_at(now + Duration::hours(1)).await;

		assert_eq!(first, second);
		assert_eq!(first.len(), 32);
		assert!(first.chars().all(|c| c.is_ascii_hexdigit()));

		let restarted = DeviceIdentityProvider::new(Arc::new(store), DeviceEnvironment::Emulated);

		assert_eq!(restarted.device_identifier().await, first, "Persisted identifiers win.");
	}

	#[tokio::test]
	async fn emulated_devices_get_random_identifiers() {
		let a = DeviceIdentityProvider::new(
			Arc::new(MemoryIdentityStore::default()),
			DeviceEnvironment::Emulated,
		)
		.device_identifier()
		.await;
		let b = DeviceIdentityProvider::new(
			Arc::new(MemoryIdentityStore::default()),
			DeviceEnvironment::Emulated,
		)
		.device_identifier()
		.await;

		assert_eq!(a.len(), 32);
		assert_ne!(a, b);
	}

	#[tokio::test]
	async fn store_failures_fall_back_to_a_memoized_timestamp_identifier() {
		let provider =
			DeviceIdentityProvider::new(Arc::new(BrokenStore), DeviceEnvironment::Emulated);
		let now = macros::datetime!(2025-01-01 00:00 UTC);
		let first = provider.device_identifier_at(now).await;

		assert_eq!(first.as_ref(), format!("ts-{:x}", unix_millis(now)));
		assert_eq!(provider.device_identifier_at(now + Duration::seconds(5)).await, first);
	}

	#[tokio::test]
	async fn file_store_round_trips_across_instances() {
		let dir = std::env::temp_dir()
			.join(format!("device-token-relay-identity-{}", rand::random::<u64>()));
		let path = dir.join("nested").join("identity.json");
		let store = FileIdentityStore::open(&path).expect("Store should open.");

		assert_eq!(store.load().await.expect("Empty store should load."), None);

		let device = DeviceId::new("abc123").expect("Device fixture should be valid.");

		store.save(&device).await.expect("Save should succeed.");

		let reopened = FileIdentityStore::open(&path).expect("Store should reopen.");

		assert_eq!(reopened.load().await.expect("Load should succeed."), Some(device));

		let _ = fs::remove_dir_all(dir);
	}
}
