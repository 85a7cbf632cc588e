//! Join algorithm selection.

use crate::context::QueryContext;
use crate::error::OptResult;
use crate::model::{DynamicOperand, JoinAlgorithm, JoinCondition, Ordering, SelectorName};
use crate::optimize::{OptimizerRule, RuleQueue};
use crate::plan::{
    NodeKind, NodeProp, PlanNodeData, PlanNodeId, PlanTree, PropValue, Traversal,
};

/// Tags every JOIN with the algorithm the executor should use.
///
/// The `nested_loop_only` variant exists for data sources that cannot feed a
/// merge join; it tags the first untagged JOIN it finds NESTED_LOOP, changes
/// nothing else, and stops there. The default variant picks MERGE wherever
/// the condition allows it, inserting a SORT over the join's compared columns
/// and a DUP_REMOVE above each child. Descendant conditions cannot be merged
/// and always get NESTED_LOOP.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChooseJoinAlgorithm {
    nested_loop_only: bool,
}

impl ChooseJoinAlgorithm {
    pub fn best() -> Self {
        Self {
            nested_loop_only: false,
        }
    }

    pub fn nested_loop_only() -> Self {
        Self {
            nested_loop_only: true,
        }
    }
}

impl Default for ChooseJoinAlgorithm {
    fn default() -> Self {
        Self::best()
    }
}

impl OptimizerRule for ChooseJoinAlgorithm {
    fn name(&self) -> &'static str {
        "ChooseJoinAlgorithm"
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
            if plan.node(join).prop(NodeProp::JoinAlgorithm).is_some() {
                continue;
            }
            if self.nested_loop_only {
                set_algorithm(plan, join, JoinAlgorithm::NestedLoop);
                break;
            }
            let condition = match plan.node(join).join_condition() {
                Some(c) => c.clone(),
                None => {
                    set_algorithm(plan, join, JoinAlgorithm::NestedLoop);
                    continue;
                }
            };
            match &condition {
                JoinCondition::Descendant(_) => {
                    set_algorithm(plan, join, JoinAlgorithm::NestedLoop);
                }
                _ => {
                    set_algorithm(plan, join, JoinAlgorithm::Merge);
                    let children = plan.children(join);
                    for child in children {
                        let sort_by = side_sort_order(plan, child, &condition);
                        self.insert_merge_inputs(plan, child, sort_by)?;
                    }
                }
            }
        }
        Ok(())
    }
}

impl ChooseJoinAlgorithm {
    /// Splice `DUP_REMOVE -> SORT` above one input of a merge join. The
    /// DUP_REMOVE is skipped when one already exists below this input.
    fn insert_merge_inputs(
        &self,
        plan: &mut PlanTree,
        child: PlanNodeId,
        sort_by: PropValue,
    ) -> OptResult<()> {
        let selectors = plan.node(child).selectors().clone();
        let mut sort = PlanNodeData::with_selectors(NodeKind::Sort, selectors.clone());
        sort.set_prop(NodeProp::SortOrderBy, sort_by);
        let sort = plan.insert_new_as_parent(child, sort)?;
        let has_dup_below = plan
            .find_first_at_or_below(child, NodeKind::DupRemove.into(), Traversal::PreOrder)
            .is_some();
        if !has_dup_below {
            let dup = PlanNodeData::with_selectors(NodeKind::DupRemove, selectors);
            plan.insert_new_as_parent(sort, dup)?;
        }
        Ok(())
    }
}

fn set_algorithm(plan: &mut PlanTree, join: PlanNodeId, algorithm: JoinAlgorithm) {
    plan.node_mut(join)
        .set_prop(NodeProp::JoinAlgorithm, PropValue::JoinAlgorithm(algorithm));
}

/// The sort key one input of a merge join must be ordered by: the compared
/// column for an equi-join, the side's selector itself for node-identity
/// conditions.
fn side_sort_order(plan: &PlanTree, side: PlanNodeId, condition: &JoinCondition) -> PropValue {
    let covers = |s: &SelectorName| plan.node(side).selectors().contains(s);
    match condition {
        JoinCondition::Equi(c) => {
            let (selector, property) = if covers(&c.selector1) {
                (c.selector1.clone(), c.property1.clone())
            } else {
                (c.selector2.clone(), c.property2.clone())
            };
            PropValue::Orderings(vec![Ordering::ascending(DynamicOperand::property(
                selector, property,
            ))])
        }
        JoinCondition::SameNode(c) => {
            let selector = if covers(&c.selector1) {
                c.selector1.clone()
            } else {
                c.selector2.clone()
            };
            PropValue::Selectors(vec![selector])
        }
        JoinCondition::ChildNode(c) => {
            let selector = if covers(&c.child_selector) {
                c.child_selector.clone()
            } else {
                c.parent_selector.clone()
            };
            PropValue::Selectors(vec![selector])
        }
        // Descendant joins never reach here; they are tagged NESTED_LOOP.
        JoinCondition::Descendant(c) => {
            let selector = if covers(&c.descendant_selector) {
                c.descendant_selector.clone()
            } else {
                c.ancestor_selector.clone()
            };
            PropValue::Selectors(vec![selector])
        }
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::model::{DescendantNodeJoinCondition, JoinType};
    use crate::plan::PlanBuilder;
    use crate::schema::ImmutableSchemata;

    fn ctx() -> QueryContext {
        QueryContext::new(Rc::new(ImmutableSchemata::default()))
    }

    fn equi_join_plan() -> PlanTree {
        PlanBuilder::source("s1")
            .join(
                JoinType::Inner,
                JoinCondition::equi("s1", "a", "s2", "b"),
                PlanBuilder::source("s2"),
            )
            .build()
    }

    #[test]
    fn equi_joins_get_merge_with_sorted_deduplicated_inputs() {
        let ctx = ctx();
        let mut plan = equi_join_plan();
        ChooseJoinAlgorithm::best()
            .apply(&ctx, &mut plan, &mut RuleQueue::new())
            .unwrap();

        let join = plan.root();
        assert_eq!(
            plan.node(join).prop(NodeProp::JoinAlgorithm),
            Some(&PropValue::JoinAlgorithm(JoinAlgorithm::Merge))
        );
        let expected = [("s1", "a"), ("s2", "b")];
        for (i, child) in plan.children(join).into_iter().enumerate() {
            assert_eq!(plan.kind(child), NodeKind::DupRemove);
            let sort = plan.only_child(child).unwrap();
            assert_eq!(plan.kind(sort), NodeKind::Sort);
            let (selector, property) = expected[i];
            assert_eq!(
                plan.node(sort).prop(NodeProp::SortOrderBy),
                Some(&PropValue::Orderings(vec![Ordering::ascending(
                    DynamicOperand::property(selector, property)
                )]))
            );
            assert_eq!(plan.kind(plan.only_child(sort).unwrap()), NodeKind::Source);
        }
    }

    #[test]
    fn descendant_joins_are_nested_loop_without_sorting() {
        let ctx = ctx();
        let condition = JoinCondition::Descendant(DescendantNodeJoinCondition {
            descendant_selector: "s1".into(),
            ancestor_selector: "s2".into(),
        });
        let mut plan = PlanBuilder::source("s1")
            .join(JoinType::Inner, condition, PlanBuilder::source("s2"))
            .build();
        ChooseJoinAlgorithm::best()
            .apply(&ctx, &mut plan, &mut RuleQueue::new())
            .unwrap();

        let join = plan.root();
        assert_eq!(
            plan.node(join).prop(NodeProp::JoinAlgorithm),
            Some(&PropValue::JoinAlgorithm(JoinAlgorithm::NestedLoop))
        );
        for child in plan.children(join) {
            assert_eq!(plan.kind(child), NodeKind::Source);
        }
    }

    #[test]
    fn nested_loop_only_variant_never_touches_the_shape() {
        let ctx = ctx();
        let mut plan = equi_join_plan();
        ChooseJoinAlgorithm::nested_loop_only()
            .apply(&ctx, &mut plan, &mut RuleQueue::new())
            .unwrap();

        let join = plan.root();
        assert_eq!(
            plan.node(join).prop(NodeProp::JoinAlgorithm),
            Some(&PropValue::JoinAlgorithm(JoinAlgorithm::NestedLoop))
        );
        for child in plan.children(join) {
            assert_eq!(plan.kind(child), NodeKind::Source);
        }
    }

    #[test]
    fn nested_loop_only_variant_stops_after_the_first_join() {
        let ctx = ctx();
        let mut plan = PlanBuilder::source("s1")
            .join(
                JoinType::Inner,
                JoinCondition::equi("s1", "a", "s2", "b"),
                PlanBuilder::source("s2"),
            )
            .join(
                JoinType::Inner,
                JoinCondition::equi("s1", "a", "s3", "c"),
                PlanBuilder::source("s3"),
            )
            .build();
        ChooseJoinAlgorithm::nested_loop_only()
            .apply(&ctx, &mut plan, &mut RuleQueue::new())
            .unwrap();

        let joins =
            plan.find_all_at_or_below(plan.root(), NodeKind::Join.into(), Traversal::PostOrder);
        assert_eq!(joins.len(), 2);
        let tagged: Vec<_> = joins
            .iter()
            .filter(|j| plan.node(**j).prop(NodeProp::JoinAlgorithm).is_some())
            .collect();
        assert_eq!(tagged.len(), 1);
        assert_eq!(
            plan.node(*tagged[0]).prop(NodeProp::JoinAlgorithm),
            Some(&PropValue::JoinAlgorithm(JoinAlgorithm::NestedLoop))
        );
    }

    #[test]
    fn existing_dup_remove_below_is_not_duplicated() {
        let ctx = ctx();
        let mut plan = PlanBuilder::source("s1")
            .dup_remove()
            .join(
                JoinType::Inner,
                JoinCondition::equi("s1", "a", "s2", "b"),
                PlanBuilder::source("s2"),
            )
            .build();
        ChooseJoinAlgorithm::best()
            .apply(&ctx, &mut plan, &mut RuleQueue::new())
            .unwrap();

        let join = plan.root();
        let left = plan.children(join)[0];
        // SORT directly; the DUP_REMOVE already below suffices.
        assert_eq!(plan.kind(left), NodeKind::Sort);
        assert_eq!(plan.kind(plan.only_child(left).unwrap()), NodeKind::DupRemove);
    }
}
