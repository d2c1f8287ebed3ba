//! The filter cascading/reordering parameter family.
//!
//! One entry per `FILTER` whose condition is an `OPERATOR("AND")` with at
//! least two conjuncts. The parameter is a mixed order: an integer element
//! cascades that conjunct as its own filter, a list element keeps a group
//! under one AND. `[2, [0, 1]]` cascades conjunct 2 outermost and keeps
//! conjuncts 0 and 1 grouped below it.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;

use briar_tree::{NodeId, NodeType, QueryNode};

use crate::cost::StatsMap;
use crate::params::{flatten_order, NodeMeta, NodeParam, OrderItem, ParamFamily, ParamKind};

/// Filter cascading/reordering.
pub struct FilterFamily;

impl ParamFamily for FilterFamily {
    fn kind(&self) -> ParamKind {
        ParamKind::Filter
    }

    fn analyze(&self, tree: &QueryNode, _stats: &StatsMap) -> HashMap<NodeId, NodeMeta> {
        let mut candidates = HashMap::new();
        tree.visit_preorder(&mut |node| {
            if node.is_type(NodeType::Filter) {
                if let Some(condition) = node.get_child(1) {
                    if condition.is_type(NodeType::Operator)
                        && condition.is_value("AND")
                        && condition.children.len() >= 2
                    {
                        candidates.insert(
                            node.id,
                            NodeMeta::Filter {
                                conjuncts: condition.children.len(),
                            },
                        );
                    }
                }
            }
        });
        candidates
    }

    fn generate(&self, meta: &NodeMeta, rng: &mut StdRng) -> NodeParam {
        let NodeMeta::Filter { conjuncts } = meta else {
            return NodeParam::FilterOrder(Vec::new());
        };
        let mut indices: Vec<usize> = (0..*conjuncts).collect();
        indices.shuffle(rng);

        let max_groups = (*conjuncts / 2).max(1);
        let num_groups = rng.gen_range(0..=max_groups);
        let mut order: Vec<OrderItem> = Vec::new();
        let mut remaining = indices;
        for _ in 0..num_groups {
            if remaining.len() < 2 {
                break;
            }
            let size = rng.gen_range(2..=remaining.len().min(3));
            let group: Vec<usize> = remaining.drain(..size).collect();
            order.push(OrderItem::Group(group));
        }
        order.extend(remaining.into_iter().map(OrderItem::Single));
        order.shuffle(rng);
        NodeParam::FilterOrder(order)
    }

    fn mutate(&self, param: &NodeParam, _meta: &NodeMeta, rng: &mut StdRng) -> NodeParam {
        let NodeParam::FilterOrder(order) = param else {
            return param.clone();
        };
        let mut order = order.clone();
        if order.is_empty() {
            return NodeParam::FilterOrder(order);
        }
        match rng.gen_range(0..4u8) {
            // Swap two elements of the order.
            0 => {
                if order.len() >= 2 {
                    let a = rng.gen_range(0..order.len());
                    let b = rng.gen_range(0..order.len());
                    order.swap(a, b);
                }
            }
            // Merge two singles into a group.
            1 => {
                let singles: Vec<usize> = order
                    .iter()
                    .enumerate()
                    .filter(|(_, item)| matches!(item, OrderItem::Single(_)))
                    .map(|(pos, _)| pos)
                    .collect();
                if singles.len() >= 2 {
                    let pick: Vec<usize> = singles
                        .choose_multiple(rng, 2)
                        .copied()
                        .collect();
                    let (first, second) = (pick[0].min(pick[1]), pick[0].max(pick[1]));
                    let b = order.remove(second);
                    let a = order.remove(first);
                    let mut group = a.indices();
                    group.extend(b.indices());
                    order.insert(first, OrderItem::Group(group));
                }
            }
            // Split a group back into singles.
            2 => {
                let groups: Vec<usize> = order
                    .iter()
                    .enumerate()
                    .filter(|(_, item)| matches!(item, OrderItem::Group(_)))
                    .map(|(pos, _)| pos)
                    .collect();
                if let Some(&pos) = groups.as_slice().choose(rng) {
                    let group = order.remove(pos);
                    for (offset, index) in group.indices().into_iter().enumerate() {
                        order.insert(pos + offset, OrderItem::Single(index));
                    }
                }
            }
            // Rotate the order.
            _ => {
                let rotate_by = rng.gen_range(0..order.len());
                order.rotate_left(rotate_by);
            }
        }
        NodeParam::FilterOrder(order)
    }

    fn validate(&self, param: &NodeParam, meta: &NodeMeta) -> bool {
        let (NodeParam::FilterOrder(order), NodeMeta::Filter { conjuncts }) = (param, meta)
        else {
            return false;
        };
        let mut flat = flatten_order(order);
        if flat.len() != *conjuncts {
            return false;
        }
        flat.sort_unstable();
        flat.iter().enumerate().all(|(expected, &actual)| expected == actual)
    }
}
