//! Rules that create and prune the access boundaries of the plan.

use log::debug;

use crate::context::QueryContext;
use crate::error::OptResult;
use crate::optimize::{OptimizerRule, RuleQueue};
use crate::plan::{NodeKind, NodeProp, PlanNodeData, PlanTree, Traversal};

/// Inserts an ACCESS node directly above every leaf SOURCE, marking the
/// boundary of what gets pushed to the underlying data source as one
/// request. Running it again is a no-op: sources that already sit under an
/// ACCESS are left alone.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct AddAccessNodes;

impl OptimizerRule for AddAccessNodes {
    fn name(&self) -> &'static str {
        "AddAccessNodes"
    }

    fn apply(
        &self,
        _ctx: &QueryContext,
        plan: &mut PlanTree,
        _queue: &mut RuleQueue,
    ) -> OptResult<()> {
        let sources =
            plan.find_all_at_or_below(plan.root(), NodeKind::Source.into(), Traversal::PostOrder);
        for source in sources {
            if plan.child_count(source) > 0 {
                continue;
            }
            if let Some(parent) = plan.parent(source) {
                if plan.kind(parent) == NodeKind::Access {
                    continue;
                }
            }
            let selectors = plan.node(source).selectors().clone();
            let access = PlanNodeData::with_selectors(NodeKind::Access, selectors);
            plan.insert_new_as_parent(source, access)?;
        }
        Ok(())
    }
}

/// Placeholder for pruning ACCESS nodes that can never return results.
///
/// Contradictory criteria are encoded as the `AccessNoResults` flag rather
/// than rewritten away, and the downstream executor shortcuts flagged access
/// nodes to an empty result. This rule only reports what it finds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct RemoveEmptyAccessNodes;

impl OptimizerRule for RemoveEmptyAccessNodes {
    fn name(&self) -> &'static str {
        "RemoveEmptyAccessNodes"
    }

    fn apply(
        &self,
        _ctx: &QueryContext,
        plan: &mut PlanTree,
        _queue: &mut RuleQueue,
    ) -> OptResult<()> {
        for access in
            plan.find_all_at_or_below(plan.root(), NodeKind::Access.into(), Traversal::PreOrder)
        {
            if plan.node(access).has_flag(NodeProp::AccessNoResults) {
                debug!("access node {:?} is known to produce no results", access);
            }
        }
        Ok(())
    }
}
