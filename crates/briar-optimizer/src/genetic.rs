//! The genetic search over operation parameters.
//!
//! A population of chromosomes evolves under tournament selection, uniform
//! crossover, and per-family mutation. Fitness is the cost model's total for
//! the plan obtained by applying the chromosome to the rule-rewritten tree;
//! lower is better. `filter` and `join-fold` parameters inherit jointly in
//! crossover because folding a filter into a join changes which conjuncts
//! survive as a filter.

use std::collections::HashMap;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::debug;

use briar_tree::{NodeId, QueryNode};

use crate::apply::apply_params;
use crate::cost::{CostModel, StatsMap};
use crate::params::{
    default_families, NodeMeta, OperationParams, ParamFamily, ParamKind,
};

/// Genetic search configuration.
#[derive(Debug, Clone)]
pub struct GaConfig {
    /// Number of individuals per generation.
    pub population: usize,
    /// Number of generations.
    pub generations: usize,
    /// Per-child mutation probability.
    pub mutation_rate: f64,
    /// Probability of crossover (vs. cloning the parents).
    pub crossover_rate: f64,
    /// Individuals preserved unchanged each generation.
    pub elitism: usize,
    /// Tournament size for selection.
    pub tournament: usize,
    /// RNG seed; `None` draws one from the OS.
    pub seed: Option<u64>,
}

impl Default for GaConfig {
    fn default() -> Self {
        Self {
            population: 50,
            generations: 100,
            mutation_rate: 0.1,
            crossover_rate: 0.8,
            elitism: 2,
            tournament: 3,
            seed: None,
        }
    }
}

/// One chromosome with its cached fitness.
#[derive(Debug, Clone)]
pub struct Individual {
    /// The operation parameters.
    pub params: OperationParams,
    /// Cached fitness (total plan cost); lower is better.
    pub fitness: Option<f64>,
}

impl Individual {
    fn new(params: OperationParams) -> Self {
        Self {
            params,
            fitness: None,
        }
    }

    fn fitness_or_inf(&self) -> f64 {
        match self.fitness {
            Some(f) if f.is_finite() => f,
            _ => f64::INFINITY,
        }
    }
}

/// Per-generation fitness record.
#[derive(Debug, Clone)]
pub struct GenerationRecord {
    /// Generation number, starting at 0.
    pub generation: usize,
    /// Best (lowest) fitness.
    pub best: f64,
    /// Mean fitness.
    pub average: f64,
    /// Worst (highest) fitness.
    pub worst: f64,
}

/// Search statistics.
#[derive(Debug, Clone, Default)]
pub struct GaStats {
    /// Fitness history per generation.
    pub history: Vec<GenerationRecord>,
    /// Best fitness found.
    pub best_fitness: f64,
}

/// Fitness function over a materialized plan. Must be deterministic on a
/// given tree.
pub type FitnessFn = dyn Fn(&QueryNode) -> f64 + Send + Sync;

/// The genetic optimizer.
pub struct GeneticOptimizer {
    config: GaConfig,
    families: Vec<Box<dyn ParamFamily>>,
    fitness: Option<Arc<FitnessFn>>,
}

impl GeneticOptimizer {
    /// Creates an optimizer with the default family registry.
    pub fn new(config: GaConfig) -> Self {
        Self {
            config,
            families: default_families(),
            fitness: None,
        }
    }

    /// Injects a custom fitness function.
    #[must_use]
    pub fn with_fitness(mut self, fitness: Arc<FitnessFn>) -> Self {
        self.fitness = Some(fitness);
        self
    }

    /// Runs the search. Returns the best plan, its chromosome, and the
    /// fitness history. A tree with no candidates is returned unchanged.
    pub fn optimize(
        &self,
        tree: &QueryNode,
        stats: &StatsMap,
        cost: &CostModel,
    ) -> (QueryNode, Individual, GaStats) {
        let candidates = self.analyze(tree, stats);
        let total: usize = candidates.values().map(HashMap::len).sum();
        if total == 0 {
            let identity = Individual::new(OperationParams::new());
            return (tree.clone_tree(true), identity, GaStats::default());
        }

        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut population: Vec<Individual> = (0..self.config.population.max(2))
            .map(|_| Individual::new(self.generate(&candidates, &mut rng)))
            .collect();

        let mut ga_stats = GaStats {
            best_fitness: f64::INFINITY,
            ..GaStats::default()
        };

        for generation in 0..self.config.generations {
            self.evaluate(&mut population, tree, stats, cost);
            population.sort_by(|a, b| {
                a.fitness_or_inf()
                    .partial_cmp(&b.fitness_or_inf())
                    .unwrap_or(std::cmp::Ordering::Equal)
            });

            let best = population[0].fitness_or_inf();
            let worst = population[population.len() - 1].fitness_or_inf();
            let average = population.iter().map(Individual::fitness_or_inf).sum::<f64>()
                / population.len() as f64;
            ga_stats.best_fitness = ga_stats.best_fitness.min(best);
            ga_stats.history.push(GenerationRecord {
                generation,
                best,
                average,
                worst,
            });

            let mut next: Vec<Individual> =
                population[..self.config.elitism.min(population.len())].to_vec();
            while next.len() < self.config.population.max(2) {
                let parent1 = self.tournament(&population, &mut rng);
                let parent2 = self.tournament(&population, &mut rng);
                let (mut child1, mut child2) = if rng.gen_bool(self.config.crossover_rate) {
                    self.crossover(parent1, parent2, &mut rng)
                } else {
                    (
                        Individual::new(parent1.params.clone()),
                        Individual::new(parent2.params.clone()),
                    )
                };
                if rng.gen_bool(self.config.mutation_rate) {
                    child1 = self.mutate(child1, &candidates, &mut rng);
                }
                if rng.gen_bool(self.config.mutation_rate) {
                    child2 = self.mutate(child2, &candidates, &mut rng);
                }
                next.push(child1);
                if next.len() < self.config.population.max(2) {
                    next.push(child2);
                }
            }
            population = next;
        }

        self.evaluate(&mut population, tree, stats, cost);
        population.sort_by(|a, b| {
            a.fitness_or_inf()
                .partial_cmp(&b.fitness_or_inf())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let best = population.remove(0);
        ga_stats.best_fitness = ga_stats.best_fitness.min(best.fitness_or_inf());
        debug!(
            generations = self.config.generations,
            best_fitness = ga_stats.best_fitness,
            "genetic search finished"
        );
        let plan = apply_params(tree, &best.params);
        (plan, best, ga_stats)
    }

    /// Scores the identity chromosome (no-op parameters), for comparisons.
    pub fn identity_fitness(
        &self,
        tree: &QueryNode,
        stats: &StatsMap,
        cost: &CostModel,
    ) -> f64 {
        self.score(tree, &OperationParams::new(), stats, cost)
    }

    fn analyze(
        &self,
        tree: &QueryNode,
        stats: &StatsMap,
    ) -> HashMap<ParamKind, HashMap<NodeId, NodeMeta>> {
        self.families
            .iter()
            .map(|family| (family.kind(), family.analyze(tree, stats)))
            .collect()
    }

    fn family(&self, kind: ParamKind) -> &dyn ParamFamily {
        self.families
            .iter()
            .find(|f| f.kind() == kind)
            .map(Box::as_ref)
            .expect("family registered")
    }

    fn generate(
        &self,
        candidates: &HashMap<ParamKind, HashMap<NodeId, NodeMeta>>,
        rng: &mut StdRng,
    ) -> OperationParams {
        // Iterate in a fixed order so a seeded run reproduces exactly.
        let mut params = OperationParams::new();
        for kind in ParamKind::ALL {
            let Some(nodes) = candidates.get(&kind) else {
                continue;
            };
            let family = self.family(kind);
            let mut node_ids: Vec<&NodeId> = nodes.keys().collect();
            node_ids.sort();
            for node_id in node_ids {
                let meta = &nodes[node_id];
                // Generators produce valid parameters; the retry guards the
                // odd degenerate candidate.
                let mut param = family.generate(meta, rng);
                for _ in 0..4 {
                    if family.validate(&param, meta) {
                        break;
                    }
                    param = family.generate(meta, rng);
                }
                params.entry(kind).or_default().insert(*node_id, param);
            }
        }
        params
    }

    fn evaluate(
        &self,
        population: &mut [Individual],
        tree: &QueryNode,
        stats: &StatsMap,
        cost: &CostModel,
    ) {
        for individual in population.iter_mut() {
            if individual.fitness.is_none() {
                individual.fitness = Some(self.score(tree, &individual.params, stats, cost));
            }
        }
    }

    fn score(
        &self,
        tree: &QueryNode,
        params: &OperationParams,
        stats: &StatsMap,
        cost: &CostModel,
    ) -> f64 {
        let plan = apply_params(tree, params);
        match &self.fitness {
            Some(f) => f(&plan),
            None => cost.estimate(&plan, stats).total(),
        }
    }

    fn tournament<'a>(
        &self,
        population: &'a [Individual],
        rng: &mut StdRng,
    ) -> &'a Individual {
        let size = self.config.tournament.min(population.len()).max(1);
        population
            .choose_multiple(rng, size)
            .min_by(|a, b| {
                a.fitness_or_inf()
                    .partial_cmp(&b.fitness_or_inf())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .expect("population is non-empty")
    }

    /// Uniform crossover. `Filter` and `JoinFold` inherit jointly from the
    /// same parent; the remaining kinds inherit per node independently.
    fn crossover(
        &self,
        parent1: &Individual,
        parent2: &Individual,
        rng: &mut StdRng,
    ) -> (Individual, Individual) {
        let mut child1 = OperationParams::new();
        let mut child2 = OperationParams::new();

        // Coupled block: filter orders and fold decisions travel together.
        let coupled = [ParamKind::Filter, ParamKind::JoinFold];
        let (first, second) = if rng.gen_bool(0.5) {
            (parent1, parent2)
        } else {
            (parent2, parent1)
        };
        for kind in coupled {
            if let Some(map) = first.params.get(&kind) {
                child1.insert(kind, map.clone());
            }
            if let Some(map) = second.params.get(&kind) {
                child2.insert(kind, map.clone());
            }
        }

        // Independent kinds: per-node coin flip.
        for kind in [
            ParamKind::JoinChildren,
            ParamKind::JoinAssociativity,
            ParamKind::JoinMethod,
        ] {
            let map1 = parent1.params.get(&kind);
            let map2 = parent2.params.get(&kind);
            let mut node_ids: Vec<NodeId> = map1
                .iter()
                .chain(map2.iter())
                .flat_map(|m| m.keys().copied())
                .collect();
            node_ids.sort();
            node_ids.dedup();
            for node_id in node_ids {
                let from1 = map1.and_then(|m| m.get(&node_id));
                let from2 = map2.and_then(|m| m.get(&node_id));
                let (a, b) = if rng.gen_bool(0.5) {
                    (from1, from2)
                } else {
                    (from2, from1)
                };
                if let Some(param) = a.or(b) {
                    child1.entry(kind).or_default().insert(node_id, param.clone());
                }
                if let Some(param) = b.or(a) {
                    child2.entry(kind).or_default().insert(node_id, param.clone());
                }
            }
        }

        (Individual::new(child1), Individual::new(child2))
    }

    /// Mutates one randomly chosen entry; invalid results are retried and
    /// finally dropped in favor of the original.
    fn mutate(
        &self,
        mut individual: Individual,
        candidates: &HashMap<ParamKind, HashMap<NodeId, NodeMeta>>,
        rng: &mut StdRng,
    ) -> Individual {
        let mut entries: Vec<(ParamKind, NodeId)> = individual
            .params
            .iter()
            .flat_map(|(kind, nodes)| nodes.keys().map(|id| (*kind, *id)))
            .collect();
        entries.sort();
        let Some(&(kind, node_id)) = entries.as_slice().choose(rng) else {
            return individual;
        };
        let family = self.family(kind);
        let Some(meta) = candidates.get(&kind).and_then(|m| m.get(&node_id)) else {
            return individual;
        };
        let current = individual
            .params
            .get(&kind)
            .and_then(|m| m.get(&node_id))
            .cloned();
        let Some(current) = current else {
            return individual;
        };

        let mut mutated = family.mutate(&current, meta, rng);
        let mut ok = family.validate(&mutated, meta);
        for _ in 0..4 {
            if ok {
                break;
            }
            mutated = family.mutate(&current, meta, rng);
            ok = family.validate(&mutated, meta);
        }
        if ok {
            individual
                .params
                .entry(kind)
                .or_default()
                .insert(node_id, mutated);
            individual.fitness = None;
        }
        individual
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{NodeParam, OrderItem};
    use briar_storage::Statistic;
    use briar_tree::refs::{column_ref, conjunction};
    use briar_tree::NodeType;

    fn cmp(column: &str, op: &str, literal: &str) -> QueryNode {
        QueryNode::with_children(
            NodeType::Comparison,
            op,
            vec![
                column_ref(None, column),
                QueryNode::new(NodeType::LiteralNumber, literal),
            ],
        )
    }

    /// A three-way AND filter over a table whose columns have distinct
    /// selectivities: 0.01 (equality on a 100-distinct column), 0.33
    /// (range), and ~0.8 (negated equality on a 5-distinct column).
    fn selective_filter() -> (QueryNode, StatsMap) {
        let filter = QueryNode::with_children(
            NodeType::Filter,
            "",
            vec![
                QueryNode::new(NodeType::Relation, "events"),
                conjunction(vec![
                    cmp("kind", "!=", "1"),
                    cmp("score", ">", "10"),
                    cmp("device", "=", "7"),
                ]),
            ],
        );
        let mut stat = Statistic::empty();
        stat.n_r = 10_000;
        stat.f_r = 10;
        stat.b_r = 1000;
        stat.v_a_r.insert("device".to_string(), 100);
        stat.v_a_r.insert("kind".to_string(), 5);
        stat.v_a_r.insert("score".to_string(), 500);
        let mut stats = StatsMap::new();
        stats.insert("events".to_string(), stat);
        (filter, stats)
    }

    fn small_config(seed: u64) -> GaConfig {
        GaConfig {
            population: 20,
            generations: 30,
            seed: Some(seed),
            ..GaConfig::default()
        }
    }

    #[test]
    fn test_no_candidates_returns_tree_unchanged() {
        let tree = QueryNode::new(NodeType::Relation, "t");
        let ga = GeneticOptimizer::new(small_config(1));
        let (plan, individual, stats) =
            ga.optimize(&tree, &StatsMap::new(), &CostModel::new());
        assert_eq!(plan.render(), tree.render());
        assert!(individual.params.is_empty());
        assert!(stats.history.is_empty());
    }

    #[test]
    fn test_search_beats_identity_parameters() {
        let (tree, stats) = selective_filter();
        let ga = GeneticOptimizer::new(small_config(42));
        let cost = CostModel::new();
        let identity = ga.identity_fitness(&tree, &stats, &cost);
        let (_, best, ga_stats) = ga.optimize(&tree, &stats, &cost);
        assert!(best.fitness_or_inf() <= identity);
        assert_eq!(ga_stats.history.len(), 30);
    }

    #[test]
    fn test_winner_evaluates_most_selective_conjunct_first() {
        let (tree, stats) = selective_filter();
        let ga = GeneticOptimizer::new(GaConfig {
            population: 50,
            generations: 100,
            seed: Some(7),
            ..GaConfig::default()
        });
        let (_, best, _) = ga.optimize(&tree, &stats, &CostModel::new());
        let filter_params = best.params.get(&ParamKind::Filter).unwrap();
        let NodeParam::FilterOrder(order) = filter_params.values().next().unwrap() else {
            panic!("expected a filter order");
        };
        // The innermost cascade position (last in the order) is evaluated
        // first and should hold conjunct 2 (device = 7, selectivity 0.01).
        let innermost = match order.last().unwrap() {
            OrderItem::Single(i) => *i,
            OrderItem::Group(items) => *items.last().unwrap(),
        };
        assert_eq!(innermost, 2);
    }

    #[test]
    fn test_fitness_improves_monotonically_with_elitism() {
        let (tree, stats) = selective_filter();
        let ga = GeneticOptimizer::new(small_config(99));
        let (_, _, ga_stats) = ga.optimize(&tree, &stats, &CostModel::new());
        let bests: Vec<f64> = ga_stats.history.iter().map(|r| r.best).collect();
        for window in bests.windows(2) {
            assert!(window[1] <= window[0] + 1e-9);
        }
    }

    #[test]
    fn test_deterministic_under_seed() {
        let (tree, stats) = selective_filter();
        let cost = CostModel::new();
        let run = |seed| {
            let ga = GeneticOptimizer::new(small_config(seed));
            let (plan, best, _) = ga.optimize(&tree, &stats, &cost);
            (plan.render(), best.fitness_or_inf())
        };
        assert_eq!(run(5), run(5));
    }
}
