//! Predicate pushdown.

use std::collections::{BTreeSet, HashSet};

use enumset::{enum_set, EnumSet};
use log::trace;

use crate::context::QueryContext;
use crate::error::OptResult;
use crate::model::{Constraint, JoinType, SelectorName};
use crate::optimize::{OptimizerRule, RuleQueue};
use crate::plan::util::selectors_referenced_by;
use crate::plan::{
    NodeKind, NodeProp, PlanNodeData, PlanNodeId, PlanTree, PropValue, Traversal,
};

/// Node kinds at which a set of selectors can originate.
const ORIGINATING: EnumSet<NodeKind> = enum_set!(
    NodeKind::Null | NodeKind::Source | NodeKind::Join | NodeKind::SetOperation
);

/// Pushes every SELECT node as far down the plan as its criteria allow.
///
/// This is a fixpoint rule: it repeats its own scan until no SELECT moved,
/// tracking the unmovable ones in a per-run dead set so every node is
/// attempted at most once per position. A SELECT that lands directly on an
/// inner or cross JOIN not yet under an ACCESS dissolves into the join's
/// constraint list instead of remaining a node of its own.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct PushSelectCriteria;

impl OptimizerRule for PushSelectCriteria {
    fn name(&self) -> &'static str {
        "PushSelectCriteria"
    }

    fn apply(
        &self,
        _ctx: &QueryContext,
        plan: &mut PlanTree,
        _queue: &mut RuleQueue,
    ) -> OptResult<()> {
        // Selects that reached their final position. A select that cannot
        // move right now is retried on later scans, since another select
        // moving out of the way may unblock it; each one moves at most once,
        // which bounds the number of scans.
        let mut dead: HashSet<PlanNodeId> = HashSet::new();
        loop {
            let mut moved = false;
            let selects =
                plan.find_all_at_or_below(plan.root(), NodeKind::Select.into(), Traversal::PreOrder);
            for select in selects {
                if dead.contains(&select) {
                    continue;
                }
                if self.try_push(plan, select, &mut dead)? {
                    moved = true;
                    break;
                }
            }
            if !moved {
                return Ok(());
            }
        }
    }
}

impl PushSelectCriteria {
    /// Attempt to move one SELECT toward its originating node. Returns true
    /// when the tree changed.
    fn try_push(
        &self,
        plan: &mut PlanTree,
        select: PlanNodeId,
        dead: &mut HashSet<PlanNodeId>,
    ) -> OptResult<bool> {
        let data = plan.node(select);
        let criteria = match data.select_criteria() {
            Some(c) => c.clone(),
            None => return Ok(false),
        };
        if data.has_flag(NodeProp::IsDependent) {
            return Ok(false);
        }
        let required = selectors_referenced_by(&criteria);
        if required.is_empty() {
            return Ok(false);
        }
        let below = match plan.only_child(select) {
            Some(child) => child,
            None => return Ok(false),
        };
        let originating = match find_originating_node(plan, below, &required) {
            Some(node) => node,
            None => return Ok(false),
        };
        let target = splice_target(plan, select, originating);
        if target == below {
            // Already as low as it can go; maybe it can still dissolve into
            // the join it sits on.
            if self.fold_into_join(plan, select, target, &criteria)? {
                return Ok(true);
            }
            return Ok(false);
        }
        if self.fold_into_join(plan, select, target, &criteria)? {
            return Ok(true);
        }
        trace!("pushing select {:?} above {:?}", select, target);
        let mut moved = PlanNodeData::with_selectors(NodeKind::Select, required);
        moved.set_prop(NodeProp::SelectCriteria, PropValue::Constraint(criteria));
        plan.extract_from_parent(select)?;
        let new_select = plan.insert_new_as_parent(target, moved)?;
        // The moved node is at its final position.
        dead.insert(new_select);
        Ok(true)
    }

    /// Fold the criteria into `target` when it is an inner or cross JOIN not
    /// yet under an ACCESS. Returns true when the SELECT was dissolved.
    fn fold_into_join(
        &self,
        plan: &mut PlanTree,
        select: PlanNodeId,
        target: PlanNodeId,
        criteria: &Constraint,
    ) -> OptResult<bool> {
        if plan.kind(target) != NodeKind::Join
            || plan.has_ancestor_of_type(target, NodeKind::Access.into())
        {
            return Ok(false);
        }
        match plan.node(target).join_type() {
            Some(JoinType::Inner) | Some(JoinType::Cross) => {}
            _ => return Ok(false),
        }
        match plan.node_mut(target).prop_mut(NodeProp::JoinConstraints) {
            Some(PropValue::ConstraintList(list)) => list.push(criteria.clone()),
            _ => {
                plan.node_mut(target).set_prop(
                    NodeProp::JoinConstraints,
                    PropValue::ConstraintList(vec![criteria.clone()]),
                );
            }
        }
        plan.extract_from_parent(select)?;
        Ok(true)
    }
}

/// The deepest node below `from` (inclusive) of an originating kind whose
/// selectors cover everything the criteria references.
fn find_originating_node(
    plan: &PlanTree,
    from: PlanNodeId,
    required: &BTreeSet<SelectorName>,
) -> Option<PlanNodeId> {
    plan.find_all_at_or_below(from, ORIGINATING, Traversal::PostOrder)
        .into_iter()
        .find(|n| plan.node(*n).covers_selectors(required))
}

/// Walk from just under the SELECT toward the originating node, stopping
/// early at anything the criteria may not cross: a LIMIT applied over a
/// SORT, or the ACCESS boundary shielding a JOIN.
fn splice_target(plan: &PlanTree, select: PlanNodeId, originating: PlanNodeId) -> PlanNodeId {
    let path = match plan.path_between(select, originating) {
        Some(path) => path,
        None => return originating,
    };
    let mut target = originating;
    for node in path {
        match plan.kind(node) {
            NodeKind::Limit => {
                if let Some(child) = plan.first_child(node) {
                    if plan.kind(child) == NodeKind::Sort {
                        target = node;
                        break;
                    }
                }
            }
            NodeKind::Access if plan.kind(originating) == NodeKind::Join => {
                target = node;
                break;
            }
            _ => {}
        }
    }
    // Never hop below a SELECT already settled on the target; the new node
    // goes above the whole chain, keeping criteria in their original order.
    loop {
        match plan.parent(target) {
            Some(p) if p != select && plan.kind(p) == NodeKind::Select => target = p,
            _ => break,
        }
    }
    target
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::model::{Column, DynamicOperand, JoinCondition, Operator, StaticOperand, Value};
    use crate::optimize::AddAccessNodes;
    use crate::plan::PlanBuilder;
    use crate::schema::ImmutableSchemata;

    fn ctx() -> QueryContext {
        QueryContext::new(Rc::new(ImmutableSchemata::default()))
    }

    fn lt(selector: &str, property: &str, value: i64) -> Constraint {
        Constraint::comparison(
            DynamicOperand::property(selector, property),
            Operator::LessThan,
            StaticOperand::Literal(Value::Long(value)),
        )
    }

    fn run(plan: &mut PlanTree, ctx: &QueryContext) {
        let mut queue = RuleQueue::new();
        AddAccessNodes.apply(ctx, plan, &mut queue).unwrap();
        PushSelectCriteria.apply(ctx, plan, &mut queue).unwrap();
    }

    #[test]
    fn select_descends_below_the_access_boundary() {
        let ctx = ctx();
        let mut plan = PlanBuilder::source("t1")
            .select(lt("t1", "c13", 3))
            .project(vec![Column::new("t1", "c11")])
            .build();
        run(&mut plan, &ctx);

        // PROJECT -> ACCESS -> SELECT -> SOURCE
        let root = plan.root();
        assert_eq!(plan.kind(root), NodeKind::Project);
        let access = plan.only_child(root).unwrap();
        assert_eq!(plan.kind(access), NodeKind::Access);
        let select = plan.only_child(access).unwrap();
        assert_eq!(plan.kind(select), NodeKind::Select);
        assert_eq!(plan.node(select).select_criteria(), Some(&lt("t1", "c13", 3)));
        assert_eq!(plan.kind(plan.only_child(select).unwrap()), NodeKind::Source);
    }

    #[test]
    fn single_sided_criteria_descend_into_the_right_join_branch() {
        let ctx = ctx();
        let mut plan = PlanBuilder::source("t1")
            .join(
                crate::model::JoinType::LeftOuter,
                JoinCondition::equi("t1", "c11", "t2", "c21"),
                PlanBuilder::source("t2"),
            )
            .select(lt("t2", "c22", 9))
            .project(vec![Column::new("t1", "c12")])
            .build();
        run(&mut plan, &ctx);

        let join = plan
            .find_first_at_or_below(plan.root(), NodeKind::Join.into(), Traversal::PreOrder)
            .unwrap();
        let right = plan.children(join)[1];
        assert_eq!(plan.kind(right), NodeKind::Access);
        let select = plan.only_child(right).unwrap();
        assert_eq!(plan.kind(select), NodeKind::Select);
        assert_eq!(plan.node(select).select_criteria(), Some(&lt("t2", "c22", 9)));
    }

    #[test]
    fn criteria_spanning_an_inner_join_fold_into_its_constraints() {
        let ctx = ctx();
        let cross_criteria = Constraint::comparison(
            DynamicOperand::property("t1", "c12"),
            Operator::EqualTo,
            StaticOperand::Literal(Value::Long(1)),
        );
        let spanning = Constraint::and(cross_criteria, lt("t2", "c22", 5));
        let mut plan = PlanBuilder::source("t1")
            .join(
                crate::model::JoinType::Inner,
                JoinCondition::equi("t1", "c11", "t2", "c21"),
                PlanBuilder::source("t2"),
            )
            .select(spanning.clone())
            .project(vec![Column::new("t1", "c12")])
            .build();
        run(&mut plan, &ctx);

        let join = plan
            .find_first_at_or_below(plan.root(), NodeKind::Join.into(), Traversal::PreOrder)
            .unwrap();
        let constraints = plan
            .node(join)
            .prop(NodeProp::JoinConstraints)
            .and_then(|v| v.as_constraint_list())
            .unwrap();
        assert_eq!(constraints, &vec![spanning]);
        assert!(plan
            .find_first_at_or_below(plan.root(), NodeKind::Select.into(), Traversal::PreOrder)
            .is_none());
    }

    #[test]
    fn criteria_stay_above_a_limit_over_sort() {
        let ctx = ctx();
        let mut plan = PlanBuilder::source("t1")
            .sort(vec![crate::model::Ordering::ascending(
                DynamicOperand::property("t1", "c11"),
            )])
            .limit()
            .select(lt("t1", "c13", 3))
            .build();
        run(&mut plan, &ctx);

        let root = plan.root();
        assert_eq!(plan.kind(root), NodeKind::Select);
        assert_eq!(plan.kind(plan.only_child(root).unwrap()), NodeKind::Limit);
    }

    #[test]
    fn rerunning_on_its_own_output_is_a_fixpoint() {
        let ctx = ctx();
        let mut plan = PlanBuilder::source("t1")
            .select(lt("t1", "c13", 3))
            .select(lt("t1", "c12", 8))
            .project(vec![Column::new("t1", "c11")])
            .build();
        run(&mut plan, &ctx);
        let once = plan.clone();
        PushSelectCriteria
            .apply(&ctx, &mut plan, &mut RuleQueue::new())
            .unwrap();
        assert_eq!(plan, once);
    }
}
