//! # briar-cc
//!
//! The concurrency control manager: one protocol contract with pluggable
//! variants.
//!
//! Every algorithm exposes the same surface — begin, validate, end — and the
//! [`CcManager`] adds monotonic transaction ID allocation, blocking
//! acquisition on a `Wait` verdict, and quiescent algorithm swapping. The
//! primary variant is the Wait-Die lock manager; timestamp ordering,
//! optimistic validation, and multi-version variants share the contract.
//!
//! A [`Verdict`] drives the executor: `Grant` proceeds, `Wait` suspends the
//! statement until re-validation succeeds, `Die` aborts the transaction.

#![warn(missing_docs)]

pub mod manager;
pub mod mvcc;
pub mod optimistic;
pub mod protocol;
pub mod timestamp;
pub mod wait_die;

pub use manager::{AlgorithmKind, CcManager};
pub use mvcc::MvPolicy;
pub use protocol::{AccessMode, Protocol, TxnOutcome, Verdict};
pub use wait_die::WaitDie;
