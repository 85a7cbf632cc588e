//! Folds away joins of a table with itself on its own key.

use std::collections::HashMap;

use log::debug;

use crate::context::{PlanHint, QueryContext};
use crate::error::OptResult;
use crate::model::{EquiJoinCondition, JoinCondition, SelectorName};
use crate::optimize::{OptimizerRule, PushProjects, PushSelectCriteria, RuleQueue};
use crate::plan::util::{replace_references, ColumnMapping};
use crate::plan::{NodeKind, PlanNodeId, PlanTree, Traversal};
use crate::problems::ProblemKind;

/// Rewrites JOIN nodes whose equi-join compares key columns of one and the
/// same table on both sides, and JOINs of one table with itself under a
/// path-less same-node condition. Such a join matches each row with itself,
/// so the whole thing collapses into the left branch; every reference to the
/// eliminated right selector is renamed to the surviving left one.
///
/// Folding one join can turn a formerly three-way join into a newly foldable
/// one, so the rule requeues itself at the front after any rewrite. Once no
/// joins remain anywhere in the plan the join hint is withdrawn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct RewriteIdentityJoins;

impl OptimizerRule for RewriteIdentityJoins {
    fn name(&self) -> &'static str {
        "RewriteIdentityJoins"
    }

    fn apply(
        &self,
        ctx: &QueryContext,
        plan: &mut PlanTree,
        queue: &mut RuleQueue,
    ) -> OptResult<()> {
        let mut renames: HashMap<SelectorName, SelectorName> = HashMap::new();
        let joins =
            plan.find_all_at_or_below(plan.root(), NodeKind::Join.into(), Traversal::PostOrder);
        for join in joins {
            self.try_rewrite(ctx, plan, join, &mut renames)?;
        }

        if renames.is_empty() {
            let no_joins_left = plan
                .find_first_at_or_below(plan.root(), NodeKind::Join.into(), Traversal::PreOrder)
                .is_none();
            if no_joins_left {
                ctx.clear_hint(PlanHint::HasJoin);
            }
            return Ok(());
        }

        // Folding may have exposed further foldable joins.
        queue.push_front(RewriteIdentityJoins.into());
        queue.push_back_if_absent(PushSelectCriteria.into());
        queue.push_back_if_absent(PushProjects.into());

        let mut mapping = ColumnMapping::new();
        for (from, to) in renames {
            mapping.rename_selector(from, to);
        }
        replace_references(plan, &mapping);
        Ok(())
    }
}

impl RewriteIdentityJoins {
    fn try_rewrite(
        &self,
        ctx: &QueryContext,
        plan: &mut PlanTree,
        join: PlanNodeId,
        renames: &mut HashMap<SelectorName, SelectorName>,
    ) -> OptResult<()> {
        // A same-node condition needs no key evidence; the rows on both
        // sides are the same node by definition.
        let equi: Option<EquiJoinCondition> = match plan.node(join).join_condition() {
            Some(JoinCondition::Equi(c)) => Some(c.clone()),
            Some(JoinCondition::SameNode(c)) if c.selector2_path.is_none() => None,
            _ => return Ok(()),
        };
        let children = plan.children(join);
        if children.len() != 2 {
            return Ok(());
        }
        let left_source = match resolve_source(plan, children[0]) {
            Some(found) => found,
            None => return Ok(()),
        };
        let right_source = match resolve_source(plan, children[1]) {
            Some(found) => found,
            None => return Ok(()),
        };

        let left_name = match plan.node(left_source).source_name() {
            Some(n) => n.clone(),
            None => return Ok(()),
        };
        let right_name = match plan.node(right_source).source_name() {
            Some(n) => n.clone(),
            None => return Ok(()),
        };
        // The condition presumably uses aliases; only the real names matter.
        if left_name != right_name {
            return Ok(());
        }
        if let Some(condition) = &equi {
            let table = match ctx.schemata().get_table(&left_name) {
                Some(t) => t,
                None => {
                    ctx.add_error(ProblemKind::TableDoesNotExist(left_name));
                    return Ok(());
                }
            };
            for column in [&condition.property1, &condition.property2] {
                if table.get_column(column).is_none() {
                    ctx.add_error(ProblemKind::ColumnDoesNotExist {
                        table: left_name.clone(),
                        column: column.clone(),
                    });
                    return Ok(());
                }
            }
            if !table.has_key(&condition.property1) || !table.has_key(&condition.property2) {
                return Ok(());
            }
        }

        debug!("folding identity join of {} with itself", left_name);

        // The surviving name every reference to the right side will take.
        let survivor = plan
            .node(left_source)
            .source_alias_or_name()
            .cloned()
            .unwrap_or(left_name);
        renames.insert(right_name, survivor.clone());
        if let Some(alias) = plan.node(right_source).source_alias() {
            renames.insert(alias.clone(), survivor.clone());
        }

        // Move any right-side SELECT chain over to the left branch, then
        // drop the right branch and the join itself.
        let mut right_top = children[1];
        while plan.kind(right_top) == NodeKind::Select {
            let below = match plan.only_child(right_top) {
                Some(child) => child,
                None => break,
            };
            let data = plan.node(right_top).clone();
            plan.extract_from_parent(right_top)?;
            plan.insert_new_as_parent(children[0], data)?;
            right_top = below;
        }
        plan.remove_subtree(right_top);
        plan.extract_from_parent(join)?;
        Ok(())
    }
}

/// Descends through a chain of SELECT nodes to the SOURCE it filters.
fn resolve_source(plan: &PlanTree, from: PlanNodeId) -> Option<PlanNodeId> {
    let mut node = from;
    while plan.kind(node) == NodeKind::Select {
        node = plan.only_child(node)?;
    }
    if plan.kind(node) == NodeKind::Source {
        Some(node)
    } else {
        None
    }
}
