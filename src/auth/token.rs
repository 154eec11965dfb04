//! Minted token models and the redacting secret wrapper.

pub mod minted;
pub mod secret;
