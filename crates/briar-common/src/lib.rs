//! # briar-common
//!
//! Common types, errors, and configuration for briardb.
//!
//! This crate provides the foundational types shared by every briardb
//! component:
//!
//! - **Types**: core identifiers (`TxnId`, `ClientId`), the tagged scalar
//!   [`Value`], and the ordered [`Row`]
//! - **Errors**: unified error handling with [`DbError`] and the stable
//!   [`ErrorKind`] taxonomy
//! - **Config**: database configuration structures
//! - **Constants**: system-wide constants and limits

#![warn(missing_docs)]

pub mod config;
pub mod constants;
pub mod error;
pub mod types;

pub use config::DatabaseConfig;
pub use constants::*;
pub use error::{DbError, DbResult, ErrorKind};
pub use types::{ClientId, Row, TxnId, Value};
