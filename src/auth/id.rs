//! Strongly typed identifiers carried by device requests.

// std
use std::{borrow::Borrow, ops::Deref};
// self
use crate::_prelude::*;

macro_rules! def_id {
	($name:ident, $doc:literal, $kind:literal) => {
		#[doc = $doc]
		#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
		#[serde(try_from = "String", into = "String")]
		pub struct $name(String);
		impl $name {
			/// Creates a new identifier after validation.
			pub fn new(value: impl AsRef<str>) -> Result<Self, IdentifierError> {
				let view = value.as_ref();

				validate_view($kind, view)?;

				Ok(Self(view.to_owned()))
			}
		}
		impl Deref for $name {
			type Target = str;

			fn deref(&self) -> &Self::Target {
				&self.0
			}
		}
		impl AsRef<str> for $name {
			fn as_ref(&self) -> &str {
				&self.0
			}
		}
		impl From<$name> for String {
			fn from(value: $name) -> Self {
				value.0
			}
		}
		impl TryFrom<String> for $name {
			type Error = IdentifierError;

			fn try_from(value: String) -> Result<Self, Self::Error> {
				validate_view($kind, &value)?;

				Ok(Self(value))
			}
		}
		impl Borrow<str> for $name {
			fn borrow(&self) -> &str {
				&self.0
			}
		}
		impl Debug for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				write!(f, concat!($kind, "({})"), self.0)
			}
		}
		impl Display for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				f.write_str(&self.0)
			}
		}
		impl FromStr for $name {
			type Err = IdentifierError;

			fn from_str(s: &str) -> Result<Self, Self::Err> {
				Self::new(s)
			}
		}
	};
}

/// Error returned when identifier validation fails.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ThisError)]
pub enum IdentifierError {
	/// The identifier was empty or whitespace.
	#[error("{kind} identifier cannot be empty.")]
	Empty {
		/// Kind of identifier (device, platform, app version).
		kind: &'static str,
	},
}
impl IdentifierError {
	/// Identifier kind that failed validation.
	pub fn kind(&self) -> &'static str {
		match self {
			Self::Empty { kind } => kind,
		}
	}
}

def_id! { DeviceId, "Opaque identifier that is stable for one app installation.", "Device" }
def_id! { Platform, "Client platform label (`ios`, `android`, ...).", "Platform" }
def_id! { AppVersion, "Client application version string.", "AppVersion" }
impl DeviceId {
	// Generated values are non-empty hex or `ts-` prefixed, so validation cannot fail.
	pub(crate) fn from_generated(value: String) -> Self {
		Self(value)
	}
}

fn validate_view(kind: &'static str, view: &str) -> Result<(), IdentifierError> {
	if view.trim().is_empty() {
		return Err(IdentifierError::Empty { kind });
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn identifiers_reject_blank_values() {
		assert!(DeviceId::new("").is_err());
		assert!(Platform::new("   ").is_err());
		assert_eq!(
			AppVersion::new("\t").expect_err("Tab-only versions must be rejected."),
			IdentifierError::Empty { kind: "AppVersion" }
		);

		let device = DeviceId::new("abc").expect("Device fixture should be valid.");

		assert_eq!(device.as_ref(), "abc");
		assert_eq!(format!("{device:?}"), "Device(abc)");
	}

	#[test]
	fn serde_round_trip_enforces_validation() {
		let version: AppVersion =
			serde_json::from_str("\"1.0.0\"").expect("Version should deserialize successfully.");

		assert_eq!(version.as_ref(), "1.0.0");
		assert!(serde_json::from_str::<AppVersion>("\"\"").is_err());
	}

	#[test]
	fn borrow_supports_set_lookup() {
		let allowed: BTreeSet<AppVersion> =
			BTreeSet::from_iter([AppVersion::new("1.0.0").expect("Version should be valid.")]);

		assert!(allowed.contains("1.0.0"));
		assert!(!allowed.contains("0.9.0"));
	}
}
