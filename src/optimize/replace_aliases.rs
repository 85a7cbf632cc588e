//! Alias removal.

use crate::context::QueryContext;
use crate::error::OptResult;
use crate::optimize::{OptimizerRule, RuleQueue};
use crate::plan::util::{replace_references, ColumnMapping};
use crate::plan::{NodeKind, NodeProp, PlanTree, Traversal};

/// Strips source aliases from the plan, renaming every reference to an alias
/// back to the literal table name.
///
/// Not part of the standard rule sequence; callers whose executors want raw
/// table names can append it themselves. It must not run on plans that name
/// the same table twice under different aliases.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct ReplaceAliases;

impl OptimizerRule for ReplaceAliases {
    fn name(&self) -> &'static str {
        "ReplaceAliases"
    }

    fn apply(
        &self,
        _ctx: &QueryContext,
        plan: &mut PlanTree,
        _queue: &mut RuleQueue,
    ) -> OptResult<()> {
        let sources =
            plan.find_all_at_or_below(plan.root(), NodeKind::Source.into(), Traversal::PostOrder);
        let mut mapping = ColumnMapping::new();
        for &source in &sources {
            let node = plan.node(source);
            if let (Some(alias), Some(name)) = (node.source_alias(), node.source_name()) {
                if alias != name {
                    mapping.rename_selector(alias.clone(), name.clone());
                }
            }
        }
        if mapping.is_empty() {
            return Ok(());
        }
        replace_references(plan, &mapping);
        for source in sources {
            plan.node_mut(source).remove_prop(NodeProp::SourceAlias);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::model::{Column, Constraint, DynamicOperand, Operator, StaticOperand, Value};
    use crate::plan::PlanBuilder;
    use crate::schema::ImmutableSchemata;

    #[test]
    fn aliased_references_revert_to_the_table_name() {
        let ctx = QueryContext::new(Rc::new(ImmutableSchemata::default()));
        let mut plan = PlanBuilder::aliased_source("t1", "x1")
            .select(Constraint::comparison(
                DynamicOperand::property("x1", "c11"),
                Operator::EqualTo,
                StaticOperand::Literal(Value::Long(1)),
            ))
            .project(vec![Column::new("x1", "c11")])
            .build();

        ReplaceAliases
            .apply(&ctx, &mut plan, &mut RuleQueue::new())
            .unwrap();

        let project = plan.root();
        let columns = plan
            .node(project)
            .prop(NodeProp::ProjectColumns)
            .and_then(|v| v.as_columns())
            .unwrap();
        assert_eq!(columns, &vec![Column::new("t1", "c11")]);
        assert!(plan.node(project).selectors().contains(&"t1".into()));
        assert!(!plan.node(project).selectors().contains(&"x1".into()));

        let source = plan
            .find_first_at_or_below(plan.root(), NodeKind::Source.into(), Traversal::PreOrder)
            .unwrap();
        assert!(plan.node(source).source_alias().is_none());
        assert_eq!(plan.node(source).source_name(), Some(&"t1".into()));
    }

    #[test]
    fn unaliased_plans_are_untouched() {
        let ctx = QueryContext::new(Rc::new(ImmutableSchemata::default()));
        let mut plan = PlanBuilder::source("t1")
            .project(vec![Column::new("t1", "c11")])
            .build();
        let before = plan.clone();
        ReplaceAliases
            .apply(&ctx, &mut plan, &mut RuleQueue::new())
            .unwrap();
        assert_eq!(plan, before);
    }
}
