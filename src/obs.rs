//! Observability helpers for relay operations.
//!
//! # Feature Flags
//!
//! - `tracing` (default) wraps operations in `device_token_relay.op` spans carrying the `op`
//!   and `stage` fields and emits the diagnostic and audit events in [`events`].
//! - `metrics` increments the `device_token_relay_op_total` counter for every
//!   attempt/success/failure, labeled by `op` + `outcome`.

pub mod events;

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Operations observed by the relay and its client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RelayOp {
	/// Validated device request minted through the upstream authority.
	DeviceMint,
	/// Unattributed mint behind the bearer-protected public endpoint.
	PublicMint,
	/// Self-signed identity assertion.
	IdentityAssertion,
	/// Client-side token acquisition (one per attempt loop).
	Acquire,
}
impl RelayOp {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			RelayOp::DeviceMint => "device_mint",
			RelayOp::PublicMint => "public_mint",
			RelayOp::IdentityAssertion => "identity_assertion",
			RelayOp::Acquire => "acquire",
		}
	}
}
impl Display for RelayOp {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpOutcome {
	/// Entry to an operation.
	Attempt,
	/// Successful completion.
	Success,
	/// Failure propagated back to the caller.
	Failure,
}
impl OpOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			OpOutcome::Attempt => "attempt",
			OpOutcome::Success => "success",
			OpOutcome::Failure => "failure",
		}
	}
}
impl Display for OpOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
