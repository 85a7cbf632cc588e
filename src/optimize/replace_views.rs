//! Inlines view definitions in place of the SOURCE nodes that reference
//! them.

use log::debug;

use crate::context::{PlanHint, QueryContext};
use crate::error::OptResult;
use crate::model::SelectorName;
use crate::optimize::{
    OptimizerRule, PushSelectCriteria, RaiseSelectCriteria, RuleQueue,
};
use crate::plan::util::{replace_references, replace_references_below, ColumnMapping};
use crate::plan::{NodeKind, NodeProp, PlanNodeId, PlanTree, PropValue, Traversal};
use crate::problems::ProblemKind;

/// Replaces every SOURCE that resolves to a view with a copy of the view's
/// canonical plan.
///
/// References to the view's exposed column names are rewritten to the
/// underlying columns, the view's internal selector takes the external
/// alias, and the view's own topmost PROJECT is dropped as redundant. Views
/// may be defined over other views, so the rule requeues itself at the front
/// until nothing resolves to a view any more; only then do the criteria
/// passes get scheduled to chew on the newly exposed SELECT nodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct ReplaceViews;

impl OptimizerRule for ReplaceViews {
    fn name(&self) -> &'static str {
        "ReplaceViews"
    }

    fn apply(
        &self,
        ctx: &QueryContext,
        plan: &mut PlanTree,
        queue: &mut RuleQueue,
    ) -> OptResult<()> {
        let mut inlined = false;
        let sources =
            plan.find_all_at_or_below(plan.root(), NodeKind::Source.into(), Traversal::PostOrder);
        for source in sources {
            let name = match plan.node(source).source_name() {
                Some(n) => n.clone(),
                None => continue,
            };
            let view = match ctx.schemata().get_table(&name) {
                Some(table) => match table.view_plan() {
                    Some(definition) => definition.clone(),
                    None => continue,
                },
                None => {
                    ctx.add_error(ProblemKind::TableDoesNotExist(name));
                    continue;
                }
            };
            let external = plan
                .node(source)
                .source_alias_or_name()
                .cloned()
                .unwrap_or(name);
            debug!("inlining view {} as {}", plan.node(source).source_name().unwrap_or(&external), external);
            inline_view(plan, source, &external, &view)?;
            inlined = true;
        }

        let views_remain = plan
            .find_all_at_or_below(plan.root(), NodeKind::Source.into(), Traversal::PreOrder)
            .into_iter()
            .filter_map(|s| plan.node(s).source_name().cloned())
            .any(|n| {
                ctx.schemata()
                    .get_table(&n)
                    .map(|t| t.is_view())
                    .unwrap_or(false)
            });
        if views_remain {
            queue.push_front(ReplaceViews.into());
        } else {
            if inlined {
                queue.push_back_if_absent(PushSelectCriteria.into());
                queue.push_back_if_absent(RaiseSelectCriteria.into());
            }
            ctx.clear_hint(PlanHint::HasView);
        }
        Ok(())
    }
}

fn inline_view(
    plan: &mut PlanTree,
    source: PlanNodeId,
    external: &SelectorName,
    view: &PlanTree,
) -> OptResult<()> {
    let grafted = plan.graft_from(view, view.root());

    let internal: Vec<SelectorName> = plan.node(grafted).selectors().iter().cloned().collect();
    let single = internal.len() == 1;

    // References elsewhere in the plan use the view's exposed column names;
    // point them at the defining columns instead.
    let mut outer = ColumnMapping::new();
    if let Some(PropValue::Columns(columns)) = plan.node(grafted).prop(NodeProp::ProjectColumns) {
        for column in columns.clone() {
            let to_selector = if single {
                external.clone()
            } else {
                column.selector.clone()
            };
            let output_name = column.output_name().to_string();
            outer.map_column(external.clone(), output_name, to_selector, column.property);
        }
    }

    if single {
        // The view's internal selector takes the external alias, and any
        // unaliased SOURCE inside the view gains it as its alias.
        let mut inner = ColumnMapping::new();
        inner.rename_selector(internal[0].clone(), external.clone());
        replace_references_below(plan, grafted, &inner);
        for inner_source in
            plan.find_all_at_or_below(grafted, NodeKind::Source.into(), Traversal::PreOrder)
        {
            let data = plan.node_mut(inner_source);
            if data.selectors().contains(external)
                && data.source_alias_or_name() != Some(external)
            {
                data.set_prop(NodeProp::SourceAlias, PropValue::Selector(external.clone()));
            }
        }
    }

    plan.replace_subtree(source, grafted)?;
    replace_references(plan, &outer);

    if !single {
        // A multi-selector view widens every ancestor that referenced it.
        for id in plan.nodes() {
            let data = plan.node_mut(id);
            if data.remove_selector(external) {
                data.add_selectors(internal.iter().cloned());
            }
        }
    }

    // The view's own projection is redundant under the outer plan.
    if plan.kind(grafted) == NodeKind::Project
        && plan.parent(grafted).is_some()
        && plan.child_count(grafted) == 1
    {
        plan.extract_from_parent(grafted)?;
    }
    Ok(())
}
