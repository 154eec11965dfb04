//! Auth-domain identifiers, device requests, token models, and identity assertions.

pub mod assertion;
pub mod id;
pub mod request;
pub mod token;

pub use assertion::*;
pub use id::*;
pub use request::*;
pub use token::{minted::*, secret::*};
