//! # domains
//!
//! The central domain model and port definitions of the board: entities,
//! errors, paging arithmetic, search filters, and the storage traits that
//! adapters implement.

pub mod errors;
pub mod models;
pub mod paging;
pub mod ports;
pub mod search;

// Re-exporting for easier access in other crates
pub use errors::*;
pub use models::*;
pub use paging::*;
pub use ports::*;
pub use search::*;
