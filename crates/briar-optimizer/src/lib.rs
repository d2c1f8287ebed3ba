//! # briar-optimizer
//!
//! The cost-based query optimizer: deterministic rewrite rules, a calibrated
//! cost model, and a genetic search over a structured parameter space.
//!
//! Optimization runs in two stages. The deterministic rules (projection
//! elimination, filter pushdown over joins, projection pushdown over joins)
//! are applied once and never revisited. The genetic search then explores
//! the non-deterministic space: filter cascading and reordering, folding
//! filters into joins, join commutativity and associativity, and per-join
//! method selection — every candidate scored by the cost model against
//! catalog statistics.

#![warn(missing_docs)]

pub mod apply;
pub mod cost;
pub mod genetic;
pub mod optimizer;
pub mod params;
pub mod rules;

pub use cost::{CostEstimate, CostModel, CostParams};
pub use genetic::{GaConfig, GaStats, GeneticOptimizer, Individual};
pub use optimizer::{OptimizedPlan, Optimizer};
pub use params::{OperationParams, ParamKind};
