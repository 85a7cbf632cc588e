//! The rule-based optimizer: the rule interface, the self-modifying pending
//! queue, and the rewrite rules themselves.

use std::collections::VecDeque;

use enum_dispatch::enum_dispatch;

use crate::context::QueryContext;
use crate::error::OptResult;
use crate::plan::PlanTree;

mod access_nodes;
pub use access_nodes::{AddAccessNodes, RemoveEmptyAccessNodes};
mod copy_criteria;
pub use copy_criteria::{CopyCriteria, RaiseSelectCriteria};
mod identity_joins;
pub use identity_joins::RewriteIdentityJoins;
mod join_algorithm;
pub use join_algorithm::ChooseJoinAlgorithm;
mod optimizer;
pub use optimizer::RuleBasedOptimizer;
mod outer_joins;
pub use outer_joins::RightOuterToLeftOuterJoins;
mod push_projects;
pub use push_projects::PushProjects;
mod push_selects;
pub use push_selects::PushSelectCriteria;
mod raise_variable;
pub use raise_variable::RaiseVariableName;
mod range_criteria;
pub use range_criteria::RewriteAsRangeCriteria;
mod replace_aliases;
pub use replace_aliases::ReplaceAliases;
mod replace_views;
pub use replace_views::ReplaceViews;

/// A single rewrite pass over the plan.
///
/// Rules mutate the plan in place and may push further rules (themselves
/// included) onto either end of the pending queue. Rule values are shared
/// between concurrently optimized queries, so a rule keeps no state of its
/// own; everything per-run lives in locals, the context, or the plan.
#[enum_dispatch]
pub trait OptimizerRule {
    /// Name used in log output.
    fn name(&self) -> &'static str;

    fn apply(
        &self,
        ctx: &QueryContext,
        plan: &mut PlanTree,
        queue: &mut RuleQueue,
    ) -> OptResult<()>;
}

/// The closed set of rules the driver can schedule.
#[enum_dispatch(OptimizerRule)]
#[derive(Clone, Debug, PartialEq)]
pub enum RuleImpl {
    AddAccessNodes,
    ChooseJoinAlgorithm,
    CopyCriteria,
    PushProjects,
    PushSelectCriteria,
    RaiseSelectCriteria,
    RaiseVariableName,
    RemoveEmptyAccessNodes,
    ReplaceAliases,
    ReplaceViews,
    RewriteAsRangeCriteria,
    RewriteIdentityJoins,
    RightOuterToLeftOuterJoins,
}

/// The pending-rule worklist.
///
/// Front- versus back-insertion is load-bearing: a rule that must run again
/// before anything else (view inlining while views remain) pushes itself to
/// the front, while follow-up passes go to the back.
#[derive(Debug, Default)]
pub struct RuleQueue {
    rules: VecDeque<RuleImpl>,
}

impl RuleQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_front(&mut self, rule: RuleImpl) {
        self.rules.push_front(rule);
    }

    pub fn push_back(&mut self, rule: RuleImpl) {
        self.rules.push_back(rule);
    }

    /// Enqueue at the back unless an equal rule is already pending.
    pub fn push_back_if_absent(&mut self, rule: RuleImpl) {
        if !self.contains(&rule) {
            self.rules.push_back(rule);
        }
    }

    pub fn pop_front(&mut self) -> Option<RuleImpl> {
        self.rules.pop_front()
    }

    pub fn contains(&self, rule: &RuleImpl) -> bool {
        self.rules.iter().any(|r| r == rule)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
