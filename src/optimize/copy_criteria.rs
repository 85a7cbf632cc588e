//! Rules that mirror criteria across the two sides of a join, so that each
//! side's access can filter before rows ever reach the join.

use enumset::{enum_set, EnumSet};

use crate::context::QueryContext;
use crate::error::OptResult;
use crate::model::{Constraint, JoinCondition, SelectorName};
use crate::optimize::{OptimizerRule, RuleQueue};
use crate::plan::util::{columns_referenced_by, replace_in_constraint, ColumnMapping};
use crate::plan::{
    NodeKind, NodeProp, PlanNodeData, PlanNodeId, PlanTree, PropValue, Traversal,
};

const ORIGINATING: EnumSet<NodeKind> = enum_set!(
    NodeKind::Null | NodeKind::Source | NodeKind::Join | NodeKind::SetOperation
);

/// The two join columns of an equi-join, or the two selectors of a path-less
/// same-node join, as reference-rewriting mappings in both directions.
fn mirror_mappings(
    condition: &JoinCondition,
) -> Option<((SelectorName, ColumnMapping), (SelectorName, ColumnMapping))> {
    match condition {
        JoinCondition::Equi(c) => {
            let mut to_right = ColumnMapping::new();
            to_right.map_column(
                c.selector1.clone(),
                c.property1.clone(),
                c.selector2.clone(),
                c.property2.clone(),
            );
            let mut to_left = ColumnMapping::new();
            to_left.map_column(
                c.selector2.clone(),
                c.property2.clone(),
                c.selector1.clone(),
                c.property1.clone(),
            );
            Some(((c.selector1.clone(), to_right), (c.selector2.clone(), to_left)))
        }
        JoinCondition::SameNode(c) if c.selector2_path.is_none() => {
            let mut to_right = ColumnMapping::new();
            to_right.rename_selector(c.selector1.clone(), c.selector2.clone());
            let mut to_left = ColumnMapping::new();
            to_left.rename_selector(c.selector2.clone(), c.selector1.clone());
            Some(((c.selector1.clone(), to_right), (c.selector2.clone(), to_left)))
        }
        _ => None,
    }
}

/// True when an equal SELECT criteria already exists anywhere in the plan.
fn criteria_exists(plan: &PlanTree, criteria: &Constraint) -> bool {
    plan.find_all_at_or_below(plan.root(), NodeKind::Select.into(), Traversal::PreOrder)
        .into_iter()
        .any(|s| plan.node(s).select_criteria() == Some(criteria))
}

fn select_data(selector: SelectorName, criteria: Constraint) -> PlanNodeData {
    let mut data = PlanNodeData::with_selectors(NodeKind::Select, [selector]);
    data.set_prop(NodeProp::SelectCriteria, PropValue::Constraint(criteria));
    data
}

/// Walks upward from every equi-join looking for SELECT ancestors that
/// constrain exactly the join column of one side, and splices a mirrored
/// SELECT for the other side directly above each. Mirrors that already exist
/// are not duplicated, so the rule is idempotent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct RaiseSelectCriteria;

impl OptimizerRule for RaiseSelectCriteria {
    fn name(&self) -> &'static str {
        "RaiseSelectCriteria"
    }

    fn apply(
        &self,
        _ctx: &QueryContext,
        plan: &mut PlanTree,
        _queue: &mut RuleQueue,
    ) -> OptResult<()> {
        let joins =
            plan.find_all_at_or_below(plan.root(), NodeKind::Join.into(), Traversal::PostOrder);
        for join in joins {
            let condition = match plan.node(join).join_condition() {
                Some(c) => c.clone(),
                None => continue,
            };
            let (left, right) = match mirror_mappings(&condition) {
                Some(pair) => pair,
                None => continue,
            };
            let join_columns = join_columns_of(&condition);
            let mut node = plan.parent(join);
            while let Some(n) = node {
                node = plan.parent(n);
                if plan.kind(n) != NodeKind::Select {
                    continue;
                }
                let criteria = match plan.node(n).select_criteria() {
                    Some(c) => c.clone(),
                    None => continue,
                };
                let referenced = columns_referenced_by(&criteria);
                if referenced.len() != 1 {
                    continue;
                }
                let column = referenced.into_iter().next().unwrap();
                if !join_columns.contains(&column) {
                    continue;
                }
                let (to_selector, mapping) = if column.0 == left.0 {
                    (right.0.clone(), &left.1)
                } else {
                    (left.0.clone(), &right.1)
                };
                let mirrored = replace_in_constraint(&criteria, mapping);
                if mirrored == criteria || criteria_exists(plan, &mirrored) {
                    continue;
                }
                plan.insert_new_as_parent(n, select_data(to_selector, mirrored))?;
            }
        }
        Ok(())
    }
}

fn join_columns_of(condition: &JoinCondition) -> Vec<(SelectorName, String)> {
    match condition {
        JoinCondition::Equi(c) => vec![
            (c.selector1.clone(), c.property1.clone()),
            (c.selector2.clone(), c.property2.clone()),
        ],
        _ => Vec::new(),
    }
}

/// Copies SELECT nodes sitting directly below one side of an equi-join or
/// path-less same-node join onto the other side, placing the copy just above
/// the lowest originating node found there.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct CopyCriteria;

impl OptimizerRule for CopyCriteria {
    fn name(&self) -> &'static str {
        "CopyCriteria"
    }

    fn apply(
        &self,
        _ctx: &QueryContext,
        plan: &mut PlanTree,
        _queue: &mut RuleQueue,
    ) -> OptResult<()> {
        let joins =
            plan.find_all_at_or_below(plan.root(), NodeKind::Join.into(), Traversal::PostOrder);
        for join in joins {
            let condition = match plan.node(join).join_condition() {
                Some(c) => c.clone(),
                None => continue,
            };
            let (left, right) = match mirror_mappings(&condition) {
                Some(pair) => pair,
                None => continue,
            };
            let children = plan.children(join);
            if children.len() != 2 {
                continue;
            }
            self.copy_side(plan, children[0], children[1], &left, &condition)?;
            self.copy_side(plan, children[1], children[0], &right, &condition)?;
        }
        Ok(())
    }
}

impl CopyCriteria {
    fn copy_side(
        &self,
        plan: &mut PlanTree,
        from: PlanNodeId,
        to: PlanNodeId,
        side: &(SelectorName, ColumnMapping),
        condition: &JoinCondition,
    ) -> OptResult<()> {
        let (from_selector, mapping) = side;
        let join_columns = join_columns_of(condition);

        // The chain of SELECT nodes directly below this side.
        let mut chain = Vec::new();
        let mut node = from;
        while plan.kind(node) == NodeKind::Select {
            if let Some(criteria) = plan.node(node).select_criteria() {
                chain.push(criteria.clone());
            }
            node = match plan.only_child(node) {
                Some(child) => child,
                None => break,
            };
        }

        for criteria in chain {
            let referenced = columns_referenced_by(&criteria);
            let copyable = match condition {
                // A selector-wide rename can carry any criteria across.
                JoinCondition::SameNode(_) => {
                    referenced.iter().all(|(s, _)| s == from_selector)
                }
                // Only the join column itself exists on the far side.
                _ => !referenced.is_empty() && referenced.iter().all(|c| join_columns.contains(c)),
            };
            if !copyable {
                continue;
            }
            let mirrored = replace_in_constraint(&criteria, mapping);
            if mirrored == criteria || criteria_exists(plan, &mirrored) {
                continue;
            }
            let target = match plan.find_first_at_or_below(to, ORIGINATING, Traversal::PostOrder) {
                Some(t) => t,
                None => continue,
            };
            let to_selector = plan
                .node(target)
                .selectors()
                .iter()
                .next()
                .cloned()
                .unwrap_or_else(|| from_selector.clone());
            plan.insert_new_as_parent(target, select_data(to_selector, mirrored))?;
        }
        Ok(())
    }
}
