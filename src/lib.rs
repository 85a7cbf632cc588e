//! ## Background
//!
//! This crate implements the optimization phase of a graph/content-repository
//! query engine. A canonical, logically-correct query plan is produced
//! elsewhere (by the canonical planner, out of scope here); the optimizer
//! rewrites that plan into an equivalent one that executes more efficiently,
//! by repeatedly applying independent rewrite rules to a mutable plan tree
//! until no more rules apply or an error is detected.
//!
//! The optimization here is purely rule based. Each rule is a substitution
//! over the plan tree: predicates are pushed toward the sources they
//! constrain, projections are inserted at access boundaries, join algorithms
//! are selected, views are inlined, and joins that can be proven redundant
//! are folded away. There is no cost model and no statistics; a rule either
//! applies or it does not.
//!
//! ## Design
//!
//! The plan tree is an index-addressed arena ([`plan::PlanTree`]) built on a
//! stable graph, so every rule can hold plain copyable node handles while
//! mutating the tree in place. A small set of tree-surgery primitives
//! (`insert_as_parent`, `extract_from_parent`, ordered child access, ancestry
//! queries) is the only sanctioned way to restructure the tree; the
//! primitives keep the single-parent invariant and the child ordering
//! consistent.
//!
//! Rules are stateless singletons sharing the [`optimize::OptimizerRule`]
//! trait. The driver ([`optimize::RuleBasedOptimizer`]) seeds a pending-rule
//! queue from per-query hints and then dequeues and applies rules one at a
//! time; a rule may push further rules (including itself) onto either end of
//! the queue, which is how fixpoint-style passes reschedule themselves.
//!
//! ## Reference
//!
//! 1. Graefe, G., 1995. The cascades framework for query optimization.
//! IEEE Data Eng. Bull., 18(3), pp.19-29.
//! 2. Pirahesh, H., Hellerstein, J.M. and Hasan, W., 1992. Extensible/rule
//! based query rewrite optimization in Starburst. ACM SIGMOD Record, 21(2).

#[macro_use]
extern crate prettytable;
#[macro_use]
extern crate lazy_static;

pub mod context;
pub mod error;
pub mod model;
pub mod optimize;
pub mod plan;
pub mod problems;
pub mod schema;
