//! Merges multiple range criteria over one operand into a single constraint.

use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;

use log::debug;

use crate::context::QueryContext;
use crate::error::OptResult;
use crate::model::{
    Between, Comparison, Constraint, DynamicOperand, Operator, StaticOperand, Value,
};
use crate::optimize::{OptimizerRule, PushSelectCriteria, RemoveEmptyAccessNodes, RuleQueue};
use crate::plan::{NodeKind, NodeProp, PlanNodeId, PlanTree, PropValue, Traversal};

/// One side of a range, taken from a comparison like `x >= 2`.
#[derive(Clone, Debug)]
struct Bound {
    select: PlanNodeId,
    value: Value,
    inclusive: bool,
}

/// Rewrites pairs of range comparisons (`<`, `<=`, `>`, `>=`) over the same
/// operand under one ACCESS into a single BETWEEN, an equality when the
/// bounds meet, or the `AccessNoResults` flag when they contradict each
/// other. The SELECT nodes made redundant by the merge are removed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct RewriteAsRangeCriteria;

impl OptimizerRule for RewriteAsRangeCriteria {
    fn name(&self) -> &'static str {
        "RewriteAsRangeCriteria"
    }

    fn apply(
        &self,
        _ctx: &QueryContext,
        plan: &mut PlanTree,
        queue: &mut RuleQueue,
    ) -> OptResult<()> {
        let mut rewrote = false;
        let mut flagged = false;
        let accesses =
            plan.find_all_at_or_below(plan.root(), NodeKind::Access.into(), Traversal::PostOrder);
        for access in accesses {
            let mut groups: HashMap<DynamicOperand, (Vec<Bound>, Vec<Bound>)> = HashMap::new();
            for select in
                plan.find_all_at_or_below(access, NodeKind::Select.into(), Traversal::PreOrder)
            {
                let comparison = match plan.node(select).select_criteria() {
                    Some(Constraint::Comparison(c)) if c.operator.is_range() => c.clone(),
                    _ => continue,
                };
                let value = match &comparison.value {
                    StaticOperand::Literal(v) => v.clone(),
                    // A bound variable's value is unknown until execution.
                    StaticOperand::BindVariable(_) => continue,
                };
                let bound = Bound {
                    select,
                    value,
                    inclusive: comparison.operator.is_inclusive(),
                };
                let entry = groups.entry(comparison.operand).or_default();
                if comparison.operator.is_lower_bound() {
                    entry.0.push(bound);
                } else {
                    entry.1.push(bound);
                }
            }

            for (operand, (lowers, uppers)) in groups {
                if lowers.len() + uppers.len() < 2 {
                    continue;
                }
                let lower = tightest(lowers, CmpOrdering::Greater);
                let upper = tightest(uppers, CmpOrdering::Less);
                match merge(&operand, lower, upper) {
                    Some(Merged::Constraint(constraint, keep, drop)) => {
                        plan.node_mut(keep)
                            .set_prop(NodeProp::SelectCriteria, PropValue::Constraint(constraint));
                        for select in drop {
                            plan.extract_from_parent(select)?;
                        }
                        rewrote = true;
                    }
                    Some(Merged::NoResults(drop)) => {
                        debug!("contradictory bounds on {:?}; access can never match", operand);
                        plan.node_mut(access)
                            .set_prop(NodeProp::AccessNoResults, PropValue::Flag(true));
                        for select in drop {
                            plan.extract_from_parent(select)?;
                        }
                        rewrote = true;
                        flagged = true;
                    }
                    None => {}
                }
            }
        }

        if rewrote {
            queue.push_back_if_absent(PushSelectCriteria.into());
        }
        if flagged {
            queue.push_back_if_absent(RemoveEmptyAccessNodes.into());
        }
        Ok(())
    }
}

enum Merged {
    /// The merged constraint, the SELECT that now carries it, and the
    /// SELECTs to remove.
    Constraint(Constraint, PlanNodeId, Vec<PlanNodeId>),
    NoResults(Vec<PlanNodeId>),
}

/// The tightest of several like-signed bounds: the greatest lower bound or
/// the least upper bound. Equal values prefer the exclusive one. Bounds over
/// incomparable values are not merged at all.
fn tightest(bounds: Vec<Bound>, keep_when: CmpOrdering) -> Option<(Bound, Vec<PlanNodeId>)> {
    let mut iter = bounds.into_iter();
    let mut best = iter.next()?;
    let mut dropped = Vec::new();
    for bound in iter {
        match bound.value.compare(&best.value)? {
            o if o == keep_when => {
                dropped.push(best.select);
                best = bound;
            }
            CmpOrdering::Equal if !bound.inclusive && best.inclusive => {
                dropped.push(best.select);
                best = bound;
            }
            _ => dropped.push(bound.select),
        }
    }
    Some((best, dropped))
}

fn merge(
    operand: &DynamicOperand,
    lower: Option<(Bound, Vec<PlanNodeId>)>,
    upper: Option<(Bound, Vec<PlanNodeId>)>,
) -> Option<Merged> {
    match (lower, upper) {
        (Some((lower, mut dropped)), Some((upper, dropped_upper))) => {
            dropped.extend(dropped_upper);
            let keep = lower.select;
            dropped.push(upper.select);
            match lower.value.compare(&upper.value)? {
                CmpOrdering::Greater => {
                    dropped.push(keep);
                    Some(Merged::NoResults(dropped))
                }
                CmpOrdering::Equal => {
                    if lower.inclusive || upper.inclusive {
                        let equality = Constraint::Comparison(Comparison {
                            operand: operand.clone(),
                            operator: Operator::EqualTo,
                            value: StaticOperand::Literal(lower.value),
                        });
                        Some(Merged::Constraint(equality, keep, dropped))
                    } else {
                        dropped.push(keep);
                        Some(Merged::NoResults(dropped))
                    }
                }
                CmpOrdering::Less => {
                    let between = Constraint::Between(Between {
                        operand: operand.clone(),
                        lower: StaticOperand::Literal(lower.value),
                        upper: StaticOperand::Literal(upper.value),
                        include_lower: lower.inclusive,
                        include_upper: upper.inclusive,
                    });
                    Some(Merged::Constraint(between, keep, dropped))
                }
            }
        }
        // Several bounds on the same side collapse to the tightest one.
        (Some((lower, dropped)), None) => one_sided(operand, lower, dropped, true),
        (None, Some((upper, dropped))) => one_sided(operand, upper, dropped, false),
        (None, None) => None,
    }
}

fn one_sided(
    operand: &DynamicOperand,
    bound: Bound,
    dropped: Vec<PlanNodeId>,
    is_lower: bool,
) -> Option<Merged> {
    if dropped.is_empty() {
        return None;
    }
    let operator = match (is_lower, bound.inclusive) {
        (true, true) => Operator::GreaterThanOrEqualTo,
        (true, false) => Operator::GreaterThan,
        (false, true) => Operator::LessThanOrEqualTo,
        (false, false) => Operator::LessThan,
    };
    let constraint = Constraint::Comparison(Comparison {
        operand: operand.clone(),
        operator,
        value: StaticOperand::Literal(bound.value),
    });
    Some(Merged::Constraint(constraint, bound.select, dropped))
}
