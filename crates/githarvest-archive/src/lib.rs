pub mod error;
pub mod warehouse;

// Re-exports
pub use error::{Error, Result};
pub use warehouse::{
    records_from_events, EventFilters, EventRow, EventWarehouse, HttpWarehouse, RELEVANT_EVENTS,
};
