//! Variable-name hoisting for dependent queries.

use crate::context::QueryContext;
use crate::error::OptResult;
use crate::optimize::{OptimizerRule, RuleQueue};
use crate::plan::{NodeKind, NodeProp, PlanTree, Traversal};

/// Moves a `VariableName` property buried inside an input of a
/// DEPENDENT_QUERY up to the node directly beneath the DEPENDENT_QUERY.
///
/// Earlier rewrites can wrap the node carrying the variable name in new
/// parents, which would hide the name from the executor; it only inspects
/// the immediate inputs of a dependent query.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct RaiseVariableName;

impl OptimizerRule for RaiseVariableName {
    fn name(&self) -> &'static str {
        "RaiseVariableName"
    }

    fn apply(
        &self,
        _ctx: &QueryContext,
        plan: &mut PlanTree,
        _queue: &mut RuleQueue,
    ) -> OptResult<()> {
        let dependents = plan.find_all_at_or_below(
            plan.root(),
            NodeKind::DependentQuery.into(),
            Traversal::PostOrder,
        );
        for dependent in dependents {
            for input in plan.children(dependent) {
                if plan.node(input).has_prop(NodeProp::VariableName) {
                    continue;
                }
                let carrier = plan.nodes().into_iter().find(|&n| {
                    n != input
                        && plan.is_below(n, input)
                        && plan.node(n).has_prop(NodeProp::VariableName)
                });
                if let Some(carrier) = carrier {
                    if let Some(name) = plan.node_mut(carrier).remove_prop(NodeProp::VariableName) {
                        plan.node_mut(input).set_prop(NodeProp::VariableName, name);
                    }
                }
            }
        }
        Ok(())
    }
}
