//! The optimizer driver.

use log::{debug, trace, warn};

use crate::context::{PlanHint, QueryContext};
use crate::error::OptResult;
use crate::optimize::{
    AddAccessNodes, ChooseJoinAlgorithm, CopyCriteria, OptimizerRule, PushProjects,
    PushSelectCriteria, RaiseSelectCriteria, RaiseVariableName, ReplaceViews,
    RewriteAsRangeCriteria, RewriteIdentityJoins, RightOuterToLeftOuterJoins, RuleImpl,
    RuleQueue,
};
use crate::plan::PlanTree;

lazy_static! {
    static ref RAISE_VARIABLE_NAME: RuleImpl = RaiseVariableName.into();
    static ref REPLACE_VIEWS: RuleImpl = ReplaceViews.into();
    static ref RIGHT_OUTER_TO_LEFT_OUTER: RuleImpl = RightOuterToLeftOuterJoins.into();
    static ref REWRITE_IDENTITY_JOINS: RuleImpl = RewriteIdentityJoins.into();
    static ref COPY_CRITERIA: RuleImpl = CopyCriteria.into();
    static ref RAISE_SELECT_CRITERIA: RuleImpl = RaiseSelectCriteria.into();
    static ref ADD_ACCESS_NODES: RuleImpl = AddAccessNodes.into();
    static ref PUSH_SELECT_CRITERIA: RuleImpl = PushSelectCriteria.into();
    static ref REWRITE_AS_RANGE_CRITERIA: RuleImpl = RewriteAsRangeCriteria.into();
    static ref PUSH_PROJECTS: RuleImpl = PushProjects.into();
}

/// Runs rewrite rules over a canonical plan until the pending queue drains.
///
/// The initial queue is assembled from the context's hints, so a query
/// without joins never pays for the join rules. Rules may reschedule
/// themselves and each other, which makes the loop open-ended; the driver
/// therefore stops once any rule has reported an error to the context, and
/// caps the total number of rule executions as a backstop against a rule
/// that keeps requeueing itself.
pub struct RuleBasedOptimizer {
    max_rule_executions: usize,
    nested_loop_joins_only: bool,
}

const DEFAULT_MAX_RULE_EXECUTIONS: usize = 100;

impl Default for RuleBasedOptimizer {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleBasedOptimizer {
    pub fn new() -> Self {
        Self {
            max_rule_executions: DEFAULT_MAX_RULE_EXECUTIONS,
            nested_loop_joins_only: false,
        }
    }

    /// For executors that cannot feed a merge join.
    pub fn with_nested_loop_joins_only(mut self) -> Self {
        self.nested_loop_joins_only = true;
        self
    }

    pub fn with_max_rule_executions(mut self, max: usize) -> Self {
        self.max_rule_executions = max;
        self
    }

    pub fn optimize(&self, ctx: &QueryContext, mut plan: PlanTree) -> OptResult<PlanTree> {
        let mut queue = RuleQueue::new();
        self.populate_rule_queue(ctx, &mut queue);

        let mut executions = 0usize;
        loop {
            if ctx.has_errors() {
                debug!("stopping optimization, problems were reported");
                break;
            }
            let rule = match queue.pop_front() {
                Some(rule) => rule,
                None => break,
            };
            if executions >= self.max_rule_executions {
                warn!(
                    "optimization stopped after {} rule executions with {} rules still pending",
                    executions,
                    queue.len() + 1
                );
                break;
            }
            executions += 1;
            trace!("plan before {}:\n{}", rule.name(), plan.explain());
            rule.apply(ctx, &mut plan, &mut queue)?;
        }
        debug!("optimized plan after {} rule executions:\n{}", executions, plan.explain());
        Ok(plan)
    }

    /// Assemble the initial queue from the plan hints. Order matters: views
    /// are inlined before anything inspects criteria, joins are normalized
    /// and folded before access boundaries appear, and the pushdown passes
    /// run last so they see the final shape.
    pub(crate) fn populate_rule_queue(&self, ctx: &QueryContext, queue: &mut RuleQueue) {
        if ctx.has_hint(PlanHint::HasSubqueries) {
            queue.push_back(RAISE_VARIABLE_NAME.clone());
        }
        if ctx.has_hint(PlanHint::HasView) {
            queue.push_back(REPLACE_VIEWS.clone());
        }
        if ctx.has_hint(PlanHint::HasJoin) {
            queue.push_back(RIGHT_OUTER_TO_LEFT_OUTER.clone());
            queue.push_back(REWRITE_IDENTITY_JOINS.clone());
            if ctx.has_hint(PlanHint::HasCriteria) {
                queue.push_back(COPY_CRITERIA.clone());
                queue.push_back(RAISE_SELECT_CRITERIA.clone());
            }
        }
        queue.push_back(ADD_ACCESS_NODES.clone());
        if ctx.has_hint(PlanHint::HasCriteria) {
            queue.push_back(PUSH_SELECT_CRITERIA.clone());
            queue.push_back(REWRITE_AS_RANGE_CRITERIA.clone());
        }
        queue.push_back(PUSH_PROJECTS.clone());
        if ctx.has_hint(PlanHint::HasJoin) {
            let choose = if self.nested_loop_joins_only {
                ChooseJoinAlgorithm::nested_loop_only()
            } else {
                ChooseJoinAlgorithm::best()
            };
            queue.push_back(choose.into());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::model::{
        Column, Constraint, DynamicOperand, JoinAlgorithm, JoinCondition, JoinType, Operator,
        StaticOperand, Value,
    };
    use crate::plan::{NodeKind, NodeProp, PlanBuilder, PlanNodeId, PropValue, Traversal};
    use crate::schema::ImmutableSchemata;

    fn schemata() -> ImmutableSchemata {
        let v1 = PlanBuilder::source("t1")
            .select(Constraint::comparison(
                DynamicOperand::property("t1", "c13"),
                Operator::LessThan,
                StaticOperand::Literal(Value::Long(3)),
            ))
            .project(vec![
                Column::new("t1", "c11"),
                Column::aliased("t1", "c12", "c2"),
            ])
            .build();
        ImmutableSchemata::builder()
            .add_table("t1", ["c11", "c12", "c13"])
            .add_table("t2", ["c21", "c22", "c23"])
            .add_view("v1", v1)
            .build()
    }

    fn ctx_with(hints: enumset::EnumSet<PlanHint>) -> QueryContext {
        QueryContext::new(Rc::new(schemata())).with_hints(hints)
    }

    /// The kinds along the unary spine starting at the root.
    fn spine(plan: &PlanTree) -> Vec<NodeKind> {
        let mut kinds = vec![plan.kind(plan.root())];
        let mut node = plan.root();
        while let Some(child) = plan.only_child(node) {
            kinds.push(plan.kind(child));
            node = child;
        }
        kinds
    }

    fn chain_below(plan: &PlanTree, mut node: PlanNodeId, kinds: &[NodeKind]) -> PlanNodeId {
        for &kind in kinds {
            node = plan.only_child(node).unwrap();
            assert_eq!(plan.kind(node), kind);
        }
        node
    }

    #[test]
    fn queue_is_populated_in_hint_order() {
        let ctx = ctx_with(
            PlanHint::HasCriteria | PlanHint::HasView | PlanHint::HasJoin | PlanHint::HasSubqueries,
        );
        let mut queue = RuleQueue::new();
        RuleBasedOptimizer::new().populate_rule_queue(&ctx, &mut queue);

        let mut names = Vec::new();
        while let Some(rule) = queue.pop_front() {
            names.push(rule.name());
        }
        assert_eq!(
            names,
            vec![
                "RaiseVariableName",
                "ReplaceViews",
                "RightOuterToLeftOuterJoins",
                "RewriteIdentityJoins",
                "CopyCriteria",
                "RaiseSelectCriteria",
                "AddAccessNodes",
                "PushSelectCriteria",
                "RewriteAsRangeCriteria",
                "PushProjects",
                "ChooseJoinAlgorithm",
            ]
        );
    }

    #[test]
    fn hintless_queries_only_get_the_structural_rules() {
        let ctx = ctx_with(enumset::EnumSet::empty());
        let mut queue = RuleQueue::new();
        RuleBasedOptimizer::new().populate_rule_queue(&ctx, &mut queue);
        assert_eq!(queue.pop_front(), Some(AddAccessNodes.into()));
        assert_eq!(queue.pop_front(), Some(PushProjects.into()));
        assert_eq!(queue.pop_front(), None);
    }

    #[test]
    fn simple_criteria_query_ends_as_access_project_select_source() {
        let ctx = ctx_with(PlanHint::HasCriteria.into());
        let criteria = Constraint::comparison(
            DynamicOperand::property("t1", "c11"),
            Operator::EqualTo,
            StaticOperand::Literal(Value::String("value".into())),
        );
        let plan = PlanBuilder::source("t1")
            .select(criteria.clone())
            .project(vec![Column::new("t1", "c11")])
            .build();

        let plan = RuleBasedOptimizer::new().optimize(&ctx, plan).unwrap();

        assert!(!ctx.has_errors());
        assert_eq!(
            spine(&plan),
            vec![
                NodeKind::Access,
                NodeKind::Project,
                NodeKind::Select,
                NodeKind::Source,
            ]
        );
        let select = chain_below(&plan, plan.root(), &[NodeKind::Project, NodeKind::Select]);
        assert_eq!(plan.node(select).select_criteria(), Some(&criteria));
    }

    #[test]
    fn view_query_inlines_and_pushes_both_criteria_below_the_access() {
        let ctx = ctx_with(PlanHint::HasCriteria | PlanHint::HasView);
        let plan = PlanBuilder::source("v1")
            .select(Constraint::comparison(
                DynamicOperand::property("v1", "c11"),
                Operator::EqualTo,
                StaticOperand::Literal(Value::String("value".into())),
            ))
            .project(vec![Column::new("v1", "c11"), Column::new("v1", "c2")])
            .build();

        let plan = RuleBasedOptimizer::new().optimize(&ctx, plan).unwrap();

        assert!(!ctx.has_errors());
        assert_eq!(
            spine(&plan),
            vec![
                NodeKind::Access,
                NodeKind::Project,
                NodeKind::Select,
                NodeKind::Select,
                NodeKind::Source,
            ]
        );
        let source = chain_below(
            &plan,
            plan.root(),
            &[
                NodeKind::Project,
                NodeKind::Select,
                NodeKind::Select,
                NodeKind::Source,
            ],
        );
        assert_eq!(plan.node(source).source_name(), Some(&"t1".into()));
        assert_eq!(plan.node(source).source_alias(), Some(&"v1".into()));
    }

    #[test]
    fn equi_join_gets_merge_inputs_on_both_sides() {
        let ctx = ctx_with(PlanHint::HasJoin.into());
        let plan = PlanBuilder::source("t1")
            .join(
                JoinType::Inner,
                JoinCondition::equi("t1", "c11", "t2", "c21"),
                PlanBuilder::source("t2"),
            )
            .project(vec![Column::new("t1", "c11"), Column::new("t2", "c21")])
            .build();

        let plan = RuleBasedOptimizer::new().optimize(&ctx, plan).unwrap();

        assert!(!ctx.has_errors());
        let join = plan
            .find_first_at_or_below(plan.root(), NodeKind::Join.into(), Traversal::PreOrder)
            .unwrap();
        assert_eq!(
            plan.node(join).prop(NodeProp::JoinAlgorithm),
            Some(&PropValue::JoinAlgorithm(JoinAlgorithm::Merge))
        );
        for child in plan.children(join) {
            assert_eq!(plan.kind(child), NodeKind::DupRemove);
            chain_below(
                &plan,
                child,
                &[
                    NodeKind::Sort,
                    NodeKind::Access,
                    NodeKind::Project,
                    NodeKind::Source,
                ],
            );
        }
    }

    #[test]
    fn nested_loop_only_optimizer_keeps_join_inputs_unsorted() {
        let ctx = ctx_with(PlanHint::HasJoin.into());
        let plan = PlanBuilder::source("t1")
            .join(
                JoinType::Inner,
                JoinCondition::equi("t1", "c11", "t2", "c21"),
                PlanBuilder::source("t2"),
            )
            .project(vec![Column::new("t1", "c11"), Column::new("t2", "c21")])
            .build();

        let plan = RuleBasedOptimizer::new()
            .with_nested_loop_joins_only()
            .optimize(&ctx, plan)
            .unwrap();

        let join = plan
            .find_first_at_or_below(plan.root(), NodeKind::Join.into(), Traversal::PreOrder)
            .unwrap();
        assert_eq!(
            plan.node(join).prop(NodeProp::JoinAlgorithm),
            Some(&PropValue::JoinAlgorithm(JoinAlgorithm::NestedLoop))
        );
        for child in plan.children(join) {
            assert_eq!(plan.kind(child), NodeKind::Access);
        }
    }

    #[test]
    fn first_reported_error_stops_the_run() {
        let ctx = ctx_with(PlanHint::HasCriteria | PlanHint::HasView);
        let plan = PlanBuilder::source("no_such_table")
            .select(Constraint::comparison(
                DynamicOperand::property("no_such_table", "c1"),
                Operator::EqualTo,
                StaticOperand::Literal(Value::Long(1)),
            ))
            .project(vec![Column::new("no_such_table", "c1")])
            .build();

        let plan = RuleBasedOptimizer::new().optimize(&ctx, plan).unwrap();

        assert!(ctx.has_errors());
        // The structural rules never ran.
        assert!(plan
            .find_first_at_or_below(plan.root(), NodeKind::Access.into(), Traversal::PreOrder)
            .is_none());
    }

    #[test]
    fn runaway_rescheduling_is_cut_off() {
        let recursive = PlanBuilder::source("v")
            .project(vec![Column::new("v", "c1")])
            .build();
        let schemata = ImmutableSchemata::builder()
            .add_view("v", recursive)
            .build();
        let ctx = QueryContext::new(Rc::new(schemata)).with_hints(PlanHint::HasView.into());
        let plan = PlanBuilder::source("v")
            .project(vec![Column::new("v", "c1")])
            .build();

        // A view defined in terms of itself reschedules ReplaceViews forever.
        let result = RuleBasedOptimizer::new()
            .with_max_rule_executions(5)
            .optimize(&ctx, plan);
        assert!(result.is_ok());
    }
}
