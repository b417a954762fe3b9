pub mod enrich;
pub mod error;
pub mod orchestrator;
pub mod partition;
pub mod worker;

// Re-exports
pub use enrich::{GeoResult, Geocoder, HttpGeocoder};
pub use error::{Error, Result};
pub use orchestrator::{Orchestrator, SearchProbe, WarehouseProbe};
pub use partition::{partition, CountProbe};
pub use worker::{run_units, CollectContext, WorkReport};
