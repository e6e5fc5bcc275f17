//! Inventory backend connectors.

pub mod http;
pub mod mock;

pub use http::HttpInventoryConnector;
pub use mock::MockInventoryConnector;
