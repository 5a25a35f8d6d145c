//! Database layer for Chartbook

mod catalog_repository;
mod connection;
mod conflict_repository;
mod migrations;
mod outbox_repository;
mod sync_state_repository;

pub use catalog_repository::{CatalogRepository, RemoteApply, SqliteCatalogRepository};
pub use connection::Database;
pub use conflict_repository::{ConflictRepository, SqliteConflictRepository};
pub use outbox_repository::{OutboxRepository, SqliteOutboxRepository};
pub use sync_state_repository::{SqliteSyncStateRepository, SyncStateRepository};
