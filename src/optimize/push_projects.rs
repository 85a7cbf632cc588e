//! Pushes projections down to the access boundaries.

use enumset::{enum_set, EnumSet};

use crate::context::QueryContext;
use crate::error::OptResult;
use crate::optimize::{OptimizerRule, RuleQueue};
use crate::plan::util::{find_required_column_types, find_required_columns};
use crate::plan::{NodeKind, NodeProp, PlanNodeData, PlanNodeId, PlanTree, PropValue, Traversal};

const MOVABLE_THROUGH: EnumSet<NodeKind> =
    enum_set!(NodeKind::Limit | NodeKind::Sort | NodeKind::DupRemove);

/// Ensures every ACCESS node has a PROJECT directly below it, so the
/// underlying source knows exactly which columns to produce.
///
/// An existing PROJECT sitting just above the access (past any stack of
/// LIMIT, SORT, and DUP_REMOVE nodes) is moved below it when the access
/// covers its selectors; otherwise a new PROJECT is synthesized from the
/// columns the ancestors actually consume.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct PushProjects;

impl OptimizerRule for PushProjects {
    fn name(&self) -> &'static str {
        "PushProjects"
    }

    fn apply(
        &self,
        ctx: &QueryContext,
        plan: &mut PlanTree,
        _queue: &mut RuleQueue,
    ) -> OptResult<()> {
        let accesses =
            plan.find_all_at_or_below(plan.root(), NodeKind::Access.into(), Traversal::PostOrder);
        for access in accesses {
            let below = match plan.only_child(access) {
                Some(child) => child,
                None => continue,
            };
            if plan.kind(below) == NodeKind::Project {
                continue;
            }
            if let Some(project) = reusable_project_above(plan, access) {
                let data = plan.node(project).clone();
                plan.extract_from_parent(project)?;
                plan.insert_new_as_parent(below, data)?;
                continue;
            }
            let columns = find_required_columns(ctx, plan, access);
            let types = find_required_column_types(ctx, plan, access, &columns);
            let selectors = plan.node(access).selectors().clone();
            let mut data = PlanNodeData::with_selectors(NodeKind::Project, selectors);
            data.set_prop(NodeProp::ProjectColumns, PropValue::Columns(columns));
            data.set_prop(NodeProp::ProjectColumnTypes, PropValue::Types(types));
            plan.insert_new_as_parent(below, data)?;
        }
        Ok(())
    }
}

/// The PROJECT just above `access`, looking through a unary stack of LIMIT,
/// SORT, and DUP_REMOVE nodes, provided the access covers its selectors.
fn reusable_project_above(plan: &PlanTree, access: PlanNodeId) -> Option<PlanNodeId> {
    let mut node = plan.parent(access)?;
    while plan.node(node).is_one_of(MOVABLE_THROUGH) && plan.child_count(node) == 1 {
        node = plan.parent(node)?;
    }
    let data = plan.node(node);
    if data.is(NodeKind::Project) && plan.node(access).covers_selectors(data.selectors()) {
        Some(node)
    } else {
        None
    }
}
