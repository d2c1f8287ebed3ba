//! The non-deterministic parameter space searched by the genetic algorithm.
//!
//! Each parameter kind registers five operations — analyze, generate, copy,
//! mutate, validate — behind the [`ParamFamily`] trait. The chromosome
//! ([`OperationParams`]) maps a kind to per-node parameters keyed by node
//! ID. New kinds are added by registering a new family, not by touching the
//! search loop.

pub mod filter;
pub mod join;

use std::collections::HashMap;

use rand::rngs::StdRng;

use briar_tree::{JoinMethod, NodeId, QueryNode};

use crate::cost::StatsMap;

pub use filter::FilterFamily;
pub use join::{
    JoinAssociativityFamily, JoinChildrenFamily, JoinFoldFamily, JoinMethodFamily,
};

/// Tags for the registered parameter kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ParamKind {
    /// Filter cascading and conjunct reordering.
    Filter,
    /// Folding a filter above a join into the join condition.
    JoinFold,
    /// Join commutativity: the order of a join's two inputs.
    JoinChildren,
    /// Join associativity: rotating nested joins.
    JoinAssociativity,
    /// Physical join method selection.
    JoinMethod,
}

impl ParamKind {
    /// All registered kinds, in application order.
    pub const ALL: [ParamKind; 5] = [
        ParamKind::Filter,
        ParamKind::JoinFold,
        ParamKind::JoinChildren,
        ParamKind::JoinAssociativity,
        ParamKind::JoinMethod,
    ];
}

/// One element of a filter order: a single cascaded conjunct or a group
/// preserved under one AND.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderItem {
    /// A cascaded single-predicate filter.
    Single(usize),
    /// A preserved AND group.
    Group(Vec<usize>),
}

impl OrderItem {
    /// Flattens into conjunct indices.
    pub fn indices(&self) -> Vec<usize> {
        match self {
            OrderItem::Single(i) => vec![*i],
            OrderItem::Group(items) => items.clone(),
        }
    }
}

/// Associativity rotation choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssocChoice {
    /// Rotate `JOIN(A, JOIN(B, C))` into `JOIN(JOIN(A, B), C)`.
    Left,
    /// Rotate `JOIN(JOIN(A, B), C)` into `JOIN(A, JOIN(B, C))`.
    Right,
    /// Keep the original shape.
    None,
}

/// Per-node analysis metadata.
#[derive(Debug, Clone)]
pub enum NodeMeta {
    /// An AND filter with this many conjuncts.
    Filter {
        /// Number of conjuncts.
        conjuncts: usize,
    },
    /// A filter directly above a join.
    JoinFold,
    /// A join's original child pair.
    JoinChildren {
        /// Left child ID at analysis time.
        left: NodeId,
        /// Right child ID at analysis time.
        right: NodeId,
    },
    /// A nested join eligible for rotation.
    JoinAssociativity {
        /// `JOIN(JOIN(..), ..)` can rotate right.
        can_right: bool,
        /// `JOIN(.., JOIN(..))` can rotate left.
        can_left: bool,
    },
    /// A join's admissible physical methods.
    JoinMethod {
        /// Hash join is admissible (equi-join shape).
        allows_hash: bool,
        /// Index nested-loop is admissible (inner join column indexed).
        allows_index: bool,
    },
}

/// Per-node parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeParam {
    /// A filter order whose flattening is a permutation of the conjuncts.
    FilterOrder(Vec<OrderItem>),
    /// Whether to fold the filter into the join condition.
    Fold(bool),
    /// The join's child pair, possibly swapped from the original.
    ChildOrder {
        /// Child to place on the left.
        left: NodeId,
        /// Child to place on the right.
        right: NodeId,
    },
    /// Associativity rotation.
    Associativity(AssocChoice),
    /// Physical join method.
    Method(JoinMethod),
}

/// The chromosome: parameter kind → node ID → parameter.
pub type OperationParams = HashMap<ParamKind, HashMap<NodeId, NodeParam>>;

/// One registered parameter family.
pub trait ParamFamily: Send + Sync {
    /// The kind tag this family handles.
    fn kind(&self) -> ParamKind;

    /// Collects candidate nodes and their metadata from a tree that already
    /// went through the deterministic rules.
    fn analyze(&self, tree: &QueryNode, stats: &StatsMap) -> HashMap<NodeId, NodeMeta>;

    /// Generates a random valid parameter for a candidate.
    fn generate(&self, meta: &NodeMeta, rng: &mut StdRng) -> NodeParam;

    /// Mutates a parameter. The result may be invalid; the search validates
    /// and retries or drops it.
    fn mutate(&self, param: &NodeParam, meta: &NodeMeta, rng: &mut StdRng) -> NodeParam;

    /// Checks a parameter against the candidate's metadata.
    fn validate(&self, param: &NodeParam, meta: &NodeMeta) -> bool;
}

/// The default family registry, in application order.
pub fn default_families() -> Vec<Box<dyn ParamFamily>> {
    vec![
        Box::new(FilterFamily),
        Box::new(JoinFoldFamily),
        Box::new(JoinChildrenFamily),
        Box::new(JoinAssociativityFamily),
        Box::new(JoinMethodFamily),
    ]
}

/// Flattens a filter order into conjunct indices.
pub fn flatten_order(order: &[OrderItem]) -> Vec<usize> {
    order.iter().flat_map(|item| item.indices()).collect()
}
