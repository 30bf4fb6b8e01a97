//! # storage-adapters
//!
//! Implementations of the `domains` storage ports.
//!
//! - [`memory::InMemoryBoardStore`]: process-local store, used by tests and demos
//! - [`sqlite::SqliteBoardStore`]: sqlx-backed store (feature `db-sqlite`)
//! - [`media::LocalFileStorage`]: attachment bytes on the local filesystem (feature `media-local`)
//! - [`media::InMemoryFileStorage`]: attachment bytes in a concurrent map

pub mod media;
pub mod memory;
#[cfg(feature = "db-sqlite")]
pub mod sqlite;

#[cfg(feature = "media-local")]
pub use media::LocalFileStorage;
pub use media::InMemoryFileStorage;
pub use memory::InMemoryBoardStore;
#[cfg(feature = "db-sqlite")]
pub use sqlite::SqliteBoardStore;
