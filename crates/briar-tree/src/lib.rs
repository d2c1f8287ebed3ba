//! # briar-tree
//!
//! The typed algebraic tree that carries logical and physical plans.
//!
//! A parsed statement is a [`QueryNode`] tree. Nodes carry a [`NodeType`], a
//! string value, ordered children, and a stable [`NodeId`] assigned at
//! construction. The optimizer keys its parameter maps by node ID, so clones
//! either preserve IDs or force the caller to rebuild those maps.
//!
//! The [`validate`] module checks the arity invariants each node type must
//! satisfy; the optimizer and executor trust trees that pass it.

#![warn(missing_docs)]

pub mod node;
pub mod refs;
pub mod validate;

pub use node::{JoinMethod, NodeId, NodeType, QueryNode};
pub use validate::validate;
