//! Applying a chromosome to a plan tree.
//!
//! Transforms run in a fixed order chosen so that node IDs keyed by the
//! parameter maps stay valid as long as possible: fold filters into joins,
//! swap join children, rotate associativity, annotate join methods, and
//! finally cascade filters (which rebuilds filter nodes with fresh IDs).

use std::collections::HashMap;

use briar_tree::refs::{collect_conjuncts, collect_tables, condition_tables, conjunction};
use briar_tree::{NodeId, NodeType, QueryNode};

use crate::params::{AssocChoice, NodeParam, OperationParams, OrderItem, ParamKind};

type NodeParams<'a> = Option<&'a HashMap<NodeId, NodeParam>>;

/// Applies `params` to a clone of `tree` (IDs preserved).
#[must_use]
pub fn apply_params(tree: &QueryNode, params: &OperationParams) -> QueryNode {
    let mut tree = tree.clone_tree(true);
    tree = apply_fold(tree, params.get(&ParamKind::JoinFold));
    tree = apply_child_order(tree, params.get(&ParamKind::JoinChildren));
    tree = apply_associativity(tree, params.get(&ParamKind::JoinAssociativity));
    apply_methods(&mut tree, params.get(&ParamKind::JoinMethod));
    apply_cascade(tree, params.get(&ParamKind::Filter))
}

/// Folds `FILTER(c, JOIN(A, B, j))` into `JOIN(A, B, j AND c)` where the
/// chromosome says so. NATURAL joins keep their implicit condition and are
/// never folded.
fn apply_fold(mut node: QueryNode, params: NodeParams) -> QueryNode {
    for child in std::mem::take(&mut node.children) {
        node.children.push(apply_fold(child, params));
    }
    let fold = params
        .and_then(|p| p.get(&node.id))
        .is_some_and(|p| matches!(p, NodeParam::Fold(true)));
    if fold
        && node.is_type(NodeType::Filter)
        && node.get_child(0).is_some_and(|s| {
            s.is_type(NodeType::Join) && !s.is_value("NATURAL")
        })
    {
        let condition = node.children.remove(1);
        let mut join = node.children.remove(0);
        let mut conjuncts: Vec<QueryNode> = Vec::new();
        if join.children.len() >= 3 {
            let existing = join.children.remove(2);
            conjuncts.extend(collect_conjuncts(&existing).iter().map(|c| c.clone_tree(true)));
        }
        conjuncts.extend(collect_conjuncts(&condition).iter().map(|c| c.clone_tree(true)));
        join.children.push(conjunction(conjuncts));
        if join.is_value("CROSS") {
            join.value = "INNER".to_string();
        }
        return join;
    }
    node
}

/// Reorders join children to match the chromosome's `[left, right]` pair.
fn apply_child_order(mut node: QueryNode, params: NodeParams) -> QueryNode {
    for child in std::mem::take(&mut node.children) {
        node.children.push(apply_child_order(child, params));
    }
    if node.is_type(NodeType::Join) && node.children.len() >= 2 {
        if let Some(NodeParam::ChildOrder { left, .. }) =
            params.and_then(|p| p.get(&node.id))
        {
            // Swap only when the recorded IDs still match the tree.
            if node.children[1].id == *left {
                node.children.swap(0, 1);
            }
        }
    }
    node
}

/// Rotates nested joins per the chromosome, rejecting rotations whose
/// conditions would reference a side not yet materialized.
fn apply_associativity(mut node: QueryNode, params: NodeParams) -> QueryNode {
    for child in std::mem::take(&mut node.children) {
        node.children.push(apply_associativity(child, params));
    }
    let choice = match params.and_then(|p| p.get(&node.id)) {
        Some(NodeParam::Associativity(choice)) => *choice,
        _ => return node,
    };
    match choice {
        AssocChoice::Right => rotate_right(node),
        AssocChoice::Left => rotate_left(node),
        AssocChoice::None => node,
    }
}

/// `JOIN(JOIN(A, B, inner), C, outer) → JOIN(A, JOIN(B, C, outer), inner)`.
///
/// Valid only when `outer` references nothing outside B ∪ C and `inner`
/// references nothing outside A ∪ B ∪ C (it keeps seeing all of them from
/// the new root).
fn rotate_right(mut outer: QueryNode) -> QueryNode {
    if !outer.is_type(NodeType::Join)
        || outer.children.len() < 2
        || !outer.children[0].is_type(NodeType::Join)
        || outer.children[0].children.len() < 2
    {
        return outer;
    }
    let outer_cond = (outer.children.len() >= 3).then(|| outer.children.remove(2));
    let mut inner = outer.children.remove(0);
    let c = outer.children.remove(0);
    let inner_cond = (inner.children.len() >= 3).then(|| inner.children.remove(2));
    let a = inner.children.remove(0);
    let b = inner.children.remove(0);

    if let Some(cond) = &outer_cond {
        let visible: std::collections::BTreeSet<String> = collect_tables(&b)
            .into_iter()
            .chain(collect_tables(&c))
            .collect();
        if !condition_tables(cond).is_subset(&visible) {
            // Revert: rebuild the original shape.
            inner.children = vec![a, b];
            if let Some(ic) = inner_cond {
                inner.children.push(ic);
            }
            outer.children = vec![inner, c];
            outer.children.push(cond.clone_tree(true));
            return outer;
        }
    }

    // The inner join node becomes JOIN(B, C, outer_cond); conditionless
    // joins degrade to CROSS.
    inner.children = vec![b, c];
    set_join_condition(&mut inner, outer_cond);
    outer.children = vec![a, inner];
    set_join_condition(&mut outer, inner_cond);
    outer
}

/// `JOIN(A, JOIN(B, C, inner), outer) → JOIN(JOIN(A, B, outer), C, inner)`.
fn rotate_left(mut outer: QueryNode) -> QueryNode {
    if !outer.is_type(NodeType::Join)
        || outer.children.len() < 2
        || !outer.children[1].is_type(NodeType::Join)
        || outer.children[1].children.len() < 2
    {
        return outer;
    }
    let outer_cond = (outer.children.len() >= 3).then(|| outer.children.remove(2));
    let mut inner = outer.children.remove(1);
    let a = outer.children.remove(0);
    let inner_cond = (inner.children.len() >= 3).then(|| inner.children.remove(2));
    let b = inner.children.remove(0);
    let c = inner.children.remove(0);

    if let Some(cond) = &outer_cond {
        let visible: std::collections::BTreeSet<String> = collect_tables(&a)
            .into_iter()
            .chain(collect_tables(&b))
            .collect();
        if !condition_tables(cond).is_subset(&visible) {
            inner.children = vec![b, c];
            if let Some(ic) = inner_cond {
                inner.children.push(ic);
            }
            outer.children = vec![a, inner];
            outer.children.push(cond.clone_tree(true));
            return outer;
        }
    }

    inner.children = vec![a, b];
    set_join_condition(&mut inner, outer_cond);
    outer.children = vec![inner, c];
    set_join_condition(&mut outer, inner_cond);
    outer
}

fn set_join_condition(join: &mut QueryNode, condition: Option<QueryNode>) {
    match condition {
        Some(condition) => {
            join.children.push(condition);
            if join.is_value("CROSS") {
                join.value = "INNER".to_string();
            }
        }
        None => {
            if join.is_value("INNER") {
                join.value = "CROSS".to_string();
            }
        }
    }
}

/// Annotates joins with the chromosome's physical method.
fn apply_methods(node: &mut QueryNode, params: NodeParams) {
    if node.is_type(NodeType::Join) {
        if let Some(NodeParam::Method(method)) = params.and_then(|p| p.get(&node.id)) {
            node.method = Some(*method);
        }
    }
    for child in &mut node.children {
        apply_methods(child, params);
    }
}

/// Replaces an AND filter by the cascade the chromosome's order describes:
/// `FILTER(p[0], FILTER(p[1], … FILTER(p[k-1], source)))`.
fn apply_cascade(mut node: QueryNode, params: NodeParams) -> QueryNode {
    for child in std::mem::take(&mut node.children) {
        node.children.push(apply_cascade(child, params));
    }
    let order = match params.and_then(|p| p.get(&node.id)) {
        Some(NodeParam::FilterOrder(order)) => order.clone(),
        _ => return node,
    };
    if !node.is_type(NodeType::Filter) || node.children.len() != 2 {
        return node;
    }
    let condition = &node.children[1];
    if !(condition.is_type(NodeType::Operator) && condition.is_value("AND")) {
        return node;
    }
    let conjuncts: Vec<QueryNode> = condition
        .children
        .iter()
        .map(|c| c.clone_tree(true))
        .collect();
    if crate::params::flatten_order(&order).len() != conjuncts.len() {
        return node;
    }

    let source = node.children.remove(0);
    let mut acc = source;
    for item in order.iter().rev() {
        let cond = match item {
            OrderItem::Single(i) => conjuncts[*i].clone_tree(true),
            OrderItem::Group(indices) => conjunction(
                indices
                    .iter()
                    .map(|i| conjuncts[*i].clone_tree(true))
                    .collect(),
            ),
        };
        acc = QueryNode::with_children(NodeType::Filter, "", vec![acc, cond]);
    }
    acc
}
