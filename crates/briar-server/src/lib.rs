//! # briar-server
//!
//! The network shell: a line-oriented TCP server, one OS thread per client
//! session.
//!
//! Clients send SQL terminated by `;`. The server answers with a result
//! block — tab-separated rows between a `#cols` header and a closing
//! `!ok <rows> <in_txn>` line — or a single `!err <kind>: <cause>` line.
//! The `in_txn` flag drives the client's `dbms>` / `dbms*>` prompt.

#![warn(missing_docs)]

pub mod protocol;
pub mod server;

pub use protocol::{split_statements, COLS_PREFIX, ERR_PREFIX, OK_PREFIX};
pub use server::{Server, ServerHandle};
