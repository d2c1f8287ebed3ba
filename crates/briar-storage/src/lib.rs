//! # briar-storage
//!
//! Table CRUD on rows, the schema catalog, and per-table statistics.
//!
//! Storage owns all persistent metadata: one row file per table plus one
//! schema descriptor per database directory. Reads and writes go through the
//! narrow block API ([`StorageManager::read_block`],
//! [`StorageManager::write_block`], [`StorageManager::update_by_old_new`],
//! [`StorageManager::delete_block`]); the catalog is the single source of
//! truth for schemas and the statistics the optimizer consumes.
//!
//! Transaction-level isolation is the concurrency control manager's job;
//! storage serializes its own structures with a reader-writer lock.

#![warn(missing_docs)]

pub mod index;
pub mod manager;
pub mod request;
pub mod schema;
pub mod stats;

pub use manager::{DropBehavior, StorageManager, WriteMode};
pub use request::{CompareOp, Condition, ReadRequest};
pub use schema::{ColumnDef, ColumnType, ForeignKey, Schema};
pub use stats::{IndexDescriptor, IndexKind, Statistic};
