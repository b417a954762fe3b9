pub mod batch;
pub mod cache_store;
pub mod error;
pub mod ledger;
pub mod store;

// Re-exports
pub use batch::BatchWriter;
pub use cache_store::PgCacheStore;
pub use error::{Error, Result};
pub use store::Store;
