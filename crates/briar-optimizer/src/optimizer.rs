//! The optimizer facade: validate, rewrite deterministically, then search.

use std::sync::Arc;

use briar_common::{DbError, DbResult};
use briar_tree::{validate, QueryNode};
use tracing::debug;

use crate::cost::{CostEstimate, CostModel, StatsMap};
use crate::genetic::{FitnessFn, GaConfig, GaStats, GeneticOptimizer, Individual};
use crate::rules::apply_deterministic;

/// The result of optimizing a statement.
#[derive(Debug)]
pub struct OptimizedPlan {
    /// The physical plan: the rewritten tree with join methods annotated.
    pub tree: QueryNode,
    /// Cost estimate of the final plan.
    pub cost: CostEstimate,
    /// The winning chromosome.
    pub chromosome: Individual,
    /// Fitness history of the search.
    pub search: GaStats,
}

/// The cost-based optimizer.
pub struct Optimizer {
    cost: CostModel,
    ga: GaConfig,
    fitness: Option<Arc<FitnessFn>>,
}

impl Optimizer {
    /// Creates an optimizer with default cost calibration and search
    /// configuration.
    pub fn new() -> Self {
        Self {
            cost: CostModel::new(),
            ga: GaConfig::default(),
            fitness: None,
        }
    }

    /// Overrides the search configuration.
    #[must_use]
    pub fn with_ga_config(mut self, config: GaConfig) -> Self {
        self.ga = config;
        self
    }

    /// Overrides the cost model.
    #[must_use]
    pub fn with_cost_model(mut self, cost: CostModel) -> Self {
        self.cost = cost;
        self
    }

    /// Injects a custom fitness function; it must be deterministic on a
    /// given tree.
    #[must_use]
    pub fn with_fitness(mut self, fitness: Arc<FitnessFn>) -> Self {
        self.fitness = Some(fitness);
        self
    }

    /// Produces a physical plan for a validated logical tree.
    ///
    /// Deterministic rules run once; the genetic search then explores the
    /// non-deterministic parameter space against the statistics snapshot.
    pub fn optimize(&self, tree: &QueryNode, stats: &StatsMap) -> DbResult<OptimizedPlan> {
        validate(tree).map_err(DbError::internal)?;

        let rewritten = apply_deterministic(tree.clone_tree(true), stats);
        debug!(root = %rewritten, "deterministic rewrite finished");

        let mut ga = GeneticOptimizer::new(self.ga.clone());
        if let Some(fitness) = &self.fitness {
            ga = ga.with_fitness(Arc::clone(fitness));
        }
        let (plan, chromosome, search) = ga.optimize(&rewritten, stats, &self.cost);
        let cost = self.cost.estimate(&plan, stats);

        Ok(OptimizedPlan {
            tree: plan,
            cost,
            chromosome,
            search,
        })
    }

    /// Estimated cost of a plan without searching.
    pub fn get_cost(&self, tree: &QueryNode, stats: &StatsMap) -> CostEstimate {
        self.cost.estimate(tree, stats)
    }
}

impl Default for Optimizer {
    fn default() -> Self {
        Self::new()
    }
}
