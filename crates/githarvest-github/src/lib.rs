pub mod client;
pub mod error;
pub mod normalize;
pub mod pool;

// Re-exports
pub use client::{GitHubClient, SearchPage};
pub use error::{Error, Result};
pub use pool::{CredentialPool, Lease};
