//! Join-related parameter families: selection-into-join folding,
//! commutativity, associativity, and physical method selection.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;

use briar_tree::refs::{collect_tables, extract_column_name, extract_table_qualifier};
use briar_tree::{JoinMethod, NodeId, NodeType, QueryNode};

use crate::cost::StatsMap;
use crate::params::{AssocChoice, NodeMeta, NodeParam, ParamFamily, ParamKind};

/// Selection-into-join: per candidate `FILTER` directly above a `JOIN`, a
/// boolean deciding whether to fold the filter's condition into the join
/// condition as a theta-join.
pub struct JoinFoldFamily;

impl ParamFamily for JoinFoldFamily {
    fn kind(&self) -> ParamKind {
        ParamKind::JoinFold
    }

    fn analyze(&self, tree: &QueryNode, _stats: &StatsMap) -> HashMap<NodeId, NodeMeta> {
        let mut candidates = HashMap::new();
        tree.visit_preorder(&mut |node| {
            if node.is_type(NodeType::Filter)
                && node.get_child(0).is_some_and(|s| s.is_type(NodeType::Join))
            {
                candidates.insert(node.id, NodeMeta::JoinFold);
            }
        });
        candidates
    }

    fn generate(&self, _meta: &NodeMeta, rng: &mut StdRng) -> NodeParam {
        NodeParam::Fold(rng.gen_bool(0.5))
    }

    fn mutate(&self, param: &NodeParam, _meta: &NodeMeta, _rng: &mut StdRng) -> NodeParam {
        match param {
            NodeParam::Fold(fold) => NodeParam::Fold(!fold),
            other => other.clone(),
        }
    }

    fn validate(&self, param: &NodeParam, _meta: &NodeMeta) -> bool {
        matches!(param, NodeParam::Fold(_))
    }
}

/// Join commutativity: per `JOIN` node, the `[left, right]` child pair,
/// possibly swapped from the original.
pub struct JoinChildrenFamily;

impl ParamFamily for JoinChildrenFamily {
    fn kind(&self) -> ParamKind {
        ParamKind::JoinChildren
    }

    fn analyze(&self, tree: &QueryNode, _stats: &StatsMap) -> HashMap<NodeId, NodeMeta> {
        let mut candidates = HashMap::new();
        tree.visit_preorder(&mut |node| {
            if node.is_type(NodeType::Join) && node.children.len() >= 2 {
                candidates.insert(
                    node.id,
                    NodeMeta::JoinChildren {
                        left: node.children[0].id,
                        right: node.children[1].id,
                    },
                );
            }
        });
        candidates
    }

    fn generate(&self, meta: &NodeMeta, rng: &mut StdRng) -> NodeParam {
        let NodeMeta::JoinChildren { left, right } = meta else {
            return NodeParam::Fold(false);
        };
        if rng.gen_bool(0.5) {
            NodeParam::ChildOrder {
                left: *left,
                right: *right,
            }
        } else {
            NodeParam::ChildOrder {
                left: *right,
                right: *left,
            }
        }
    }

    fn mutate(&self, param: &NodeParam, _meta: &NodeMeta, _rng: &mut StdRng) -> NodeParam {
        match param {
            NodeParam::ChildOrder { left, right } => NodeParam::ChildOrder {
                left: *right,
                right: *left,
            },
            other => other.clone(),
        }
    }

    fn validate(&self, param: &NodeParam, meta: &NodeMeta) -> bool {
        let (
            NodeParam::ChildOrder { left, right },
            NodeMeta::JoinChildren {
                left: orig_left,
                right: orig_right,
            },
        ) = (param, meta)
        else {
            return false;
        };
        (left == orig_left && right == orig_right) || (left == orig_right && right == orig_left)
    }
}

/// Join associativity: per nested-join root, rotate left, rotate right, or
/// keep. Rotations that would break attribute visibility are rejected at
/// apply time.
pub struct JoinAssociativityFamily;

impl ParamFamily for JoinAssociativityFamily {
    fn kind(&self) -> ParamKind {
        ParamKind::JoinAssociativity
    }

    fn analyze(&self, tree: &QueryNode, _stats: &StatsMap) -> HashMap<NodeId, NodeMeta> {
        let mut candidates = HashMap::new();
        tree.visit_preorder(&mut |node| {
            if !node.is_type(NodeType::Join) || node.children.len() < 2 {
                return;
            }
            let can_right = node.children[0].is_type(NodeType::Join);
            let can_left = node.children[1].is_type(NodeType::Join);
            if can_right || can_left {
                candidates.insert(
                    node.id,
                    NodeMeta::JoinAssociativity {
                        can_right,
                        can_left,
                    },
                );
            }
        });
        candidates
    }

    fn generate(&self, meta: &NodeMeta, rng: &mut StdRng) -> NodeParam {
        NodeParam::Associativity(*allowed_choices(meta).choose(rng).unwrap_or(&AssocChoice::None))
    }

    fn mutate(&self, param: &NodeParam, meta: &NodeMeta, rng: &mut StdRng) -> NodeParam {
        let NodeParam::Associativity(current) = param else {
            return param.clone();
        };
        let others: Vec<AssocChoice> = allowed_choices(meta)
            .into_iter()
            .filter(|c| c != current)
            .collect();
        NodeParam::Associativity(*others.as_slice().choose(rng).unwrap_or(current))
    }

    fn validate(&self, param: &NodeParam, meta: &NodeMeta) -> bool {
        let NodeParam::Associativity(choice) = param else {
            return false;
        };
        allowed_choices(meta).contains(choice)
    }
}

fn allowed_choices(meta: &NodeMeta) -> Vec<AssocChoice> {
    let NodeMeta::JoinAssociativity {
        can_right,
        can_left,
    } = meta
    else {
        return vec![AssocChoice::None];
    };
    let mut choices = vec![AssocChoice::None];
    if *can_right {
        choices.push(AssocChoice::Right);
    }
    if *can_left {
        choices.push(AssocChoice::Left);
    }
    choices
}

/// Physical join method: nested loop always; hash for equi-joins; index
/// nested-loop only when the inner side's join column is indexed.
pub struct JoinMethodFamily;

impl ParamFamily for JoinMethodFamily {
    fn kind(&self) -> ParamKind {
        ParamKind::JoinMethod
    }

    fn analyze(&self, tree: &QueryNode, stats: &StatsMap) -> HashMap<NodeId, NodeMeta> {
        let mut candidates = HashMap::new();
        tree.visit_preorder(&mut |node| {
            if node.is_type(NodeType::Join) && node.children.len() >= 2 {
                let allows_hash = is_equi_join(node);
                let allows_index = inner_join_column_indexed(node, stats);
                candidates.insert(
                    node.id,
                    NodeMeta::JoinMethod {
                        allows_hash,
                        allows_index,
                    },
                );
            }
        });
        candidates
    }

    fn generate(&self, meta: &NodeMeta, rng: &mut StdRng) -> NodeParam {
        NodeParam::Method(
            *allowed_methods(meta)
                .as_slice()
                .choose(rng)
                .unwrap_or(&JoinMethod::NestedLoop),
        )
    }

    fn mutate(&self, param: &NodeParam, meta: &NodeMeta, rng: &mut StdRng) -> NodeParam {
        let NodeParam::Method(current) = param else {
            return param.clone();
        };
        let others: Vec<JoinMethod> = allowed_methods(meta)
            .into_iter()
            .filter(|m| m != current)
            .collect();
        NodeParam::Method(*others.as_slice().choose(rng).unwrap_or(current))
    }

    fn validate(&self, param: &NodeParam, meta: &NodeMeta) -> bool {
        let NodeParam::Method(method) = param else {
            return false;
        };
        allowed_methods(meta).contains(method)
    }
}

fn allowed_methods(meta: &NodeMeta) -> Vec<JoinMethod> {
    let NodeMeta::JoinMethod {
        allows_hash,
        allows_index,
    } = meta
    else {
        return vec![JoinMethod::NestedLoop];
    };
    let mut methods = vec![JoinMethod::NestedLoop];
    if *allows_hash {
        methods.push(JoinMethod::Hash);
    }
    if *allows_index {
        methods.push(JoinMethod::IndexNestedLoop);
    }
    methods
}

/// An equi-join: NATURAL, or an INNER join whose condition contains an
/// equality between columns of the two sides.
fn is_equi_join(join: &QueryNode) -> bool {
    if join.is_value("NATURAL") {
        return true;
    }
    let Some(condition) = join.get_child(2) else {
        return false;
    };
    let mut found = false;
    condition.visit_preorder(&mut |n| {
        if n.is_type(NodeType::Comparison) && n.is_value("=") {
            let left_col = n.get_child(0).and_then(extract_column_name);
            let right_col = n.get_child(1).and_then(extract_column_name);
            if left_col.is_some() && right_col.is_some() {
                found = true;
            }
        }
    });
    found
}

/// True when the join column on the inner (right) side is indexed.
fn inner_join_column_indexed(join: &QueryNode, stats: &StatsMap) -> bool {
    let Some(condition) = join.get_child(2) else {
        return false;
    };
    let inner_tables = collect_tables(&join.children[1]);

    let mut indexed = false;
    condition.visit_preorder(&mut |n| {
        if !(n.is_type(NodeType::Comparison) && n.is_value("=")) {
            return;
        }
        for side in &n.children {
            let Some(column) = extract_column_name(side) else {
                continue;
            };
            // Prefer the qualifier; fall back to probing the inner tables.
            let owner_tables: Vec<String> = match extract_table_qualifier(side) {
                Some(table) if inner_tables.contains(&table) => vec![table],
                Some(_) => continue,
                None => inner_tables.iter().cloned().collect(),
            };
            for table in owner_tables {
                if stats
                    .get(&table)
                    .is_some_and(|s| s.index_on(&column).is_some())
                {
                    indexed = true;
                }
            }
        }
    });
    indexed
}
