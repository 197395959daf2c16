//! paperdrop-common: Shared error taxonomy and HTTP plumbing used across all paperdrop crates.

pub mod error;
pub mod sandbox;

pub use error::{PaperdropError, Result};
pub use sandbox::SandboxClient;
