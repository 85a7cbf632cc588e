//! Outer-join normalization.

use crate::context::QueryContext;
use crate::error::OptResult;
use crate::model::JoinType;
use crate::optimize::{OptimizerRule, RuleQueue};
use crate::plan::{NodeKind, NodeProp, PlanTree, PropValue, Traversal};

/// Rewrites every right-outer join as a left-outer join by swapping its two
/// children. Conditions and constraints are position-symmetric, so no
/// reference rewriting is needed; downstream components then only ever see
/// left-outer joins.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct RightOuterToLeftOuterJoins;

impl OptimizerRule for RightOuterToLeftOuterJoins {
    fn name(&self) -> &'static str {
        "RightOuterToLeftOuterJoins"
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
            if plan.node(join).join_type() == Some(JoinType::RightOuter) {
                plan.swap_children(join)?;
                plan.node_mut(join)
                    .set_prop(NodeProp::JoinType, PropValue::JoinType(JoinType::LeftOuter));
            }
        }
        Ok(())
    }
}
