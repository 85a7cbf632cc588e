//! A fluent builder for canonical plan trees.
//!
//! Canonical plans are what the parser hands the optimizer: a PROJECT at the
//! top, SELECT nodes directly above the SOURCEs they filter, and joins in the
//! order the query wrote them. Tests and view definitions build their plans
//! through this type.

use crate::model::{Column, Constraint, JoinCondition, JoinType, Ordering, SelectorName};
use crate::plan::node::{NodeKind, NodeProp, PlanNodeData, PropValue};
use crate::plan::tree::PlanTree;
use crate::schema::TypeName;

pub struct PlanBuilder {
    tree: PlanTree,
}

impl PlanBuilder {
    /// Start a plan from a SOURCE over the named table or view.
    pub fn source<N: Into<SelectorName>>(name: N) -> Self {
        let name = name.into();
        let mut data = PlanNodeData::with_selectors(NodeKind::Source, [name.clone()]);
        data.set_prop(NodeProp::SourceName, PropValue::Selector(name));
        Self {
            tree: PlanTree::with_root(data),
        }
    }

    /// Start a plan from a SOURCE accessed through an alias.
    pub fn aliased_source<N, A>(name: N, alias: A) -> Self
    where
        N: Into<SelectorName>,
        A: Into<SelectorName>,
    {
        let alias = alias.into();
        let mut data = PlanNodeData::with_selectors(NodeKind::Source, [alias.clone()]);
        data.set_prop(NodeProp::SourceName, PropValue::Selector(name.into()));
        data.set_prop(NodeProp::SourceAlias, PropValue::Selector(alias));
        Self {
            tree: PlanTree::with_root(data),
        }
    }

    pub fn select(self, criteria: Constraint) -> Self {
        self.wrap(NodeKind::Select, |data| {
            data.set_prop(NodeProp::SelectCriteria, PropValue::Constraint(criteria));
        })
    }

    pub fn project(self, columns: Vec<Column>) -> Self {
        self.wrap(NodeKind::Project, |data| {
            data.set_prop(NodeProp::ProjectColumns, PropValue::Columns(columns));
        })
    }

    pub fn project_typed(self, columns: Vec<Column>, types: Vec<TypeName>) -> Self {
        self.wrap(NodeKind::Project, |data| {
            data.set_prop(NodeProp::ProjectColumns, PropValue::Columns(columns));
            data.set_prop(NodeProp::ProjectColumnTypes, PropValue::Types(types));
        })
    }

    pub fn sort(self, order_by: Vec<Ordering>) -> Self {
        self.wrap(NodeKind::Sort, |data| {
            data.set_prop(NodeProp::SortOrderBy, PropValue::Orderings(order_by));
        })
    }

    pub fn limit(self) -> Self {
        self.wrap(NodeKind::Limit, |_| {})
    }

    pub fn dup_remove(self) -> Self {
        self.wrap(NodeKind::DupRemove, |_| {})
    }

    /// Join the plan built so far (as the left input) with `right`.
    pub fn join(mut self, join_type: JoinType, condition: JoinCondition, right: PlanBuilder) -> Self {
        let right_tree = right.build();
        let left_root = self.tree.root();
        let mut data = PlanNodeData::new(NodeKind::Join);
        data.add_selectors(self.tree.node(left_root).selectors().iter().cloned());
        data.add_selectors(
            right_tree
                .node(right_tree.root())
                .selectors()
                .iter()
                .cloned(),
        );
        data.set_prop(NodeProp::JoinType, PropValue::JoinType(join_type));
        data.set_prop(NodeProp::JoinCondition, PropValue::JoinCondition(condition));
        let join = self.tree.add_detached(data);
        self.tree
            .insert_as_parent(left_root, join)
            .expect("a freshly created join node is detached");
        let grafted = self.tree.graft_from(&right_tree, right_tree.root());
        self.tree
            .attach_child(join, grafted)
            .expect("a grafted subtree is detached");
        self
    }

    /// Combine two plans under a DEPENDENT_QUERY: `left` runs first and its
    /// results are available to `right`.
    pub fn dependent_query(left: PlanBuilder, right: PlanBuilder) -> Self {
        let right_tree = right.build();
        let mut this = left;
        let left_root = this.tree.root();
        let mut data = PlanNodeData::new(NodeKind::DependentQuery);
        data.add_selectors(this.tree.node(left_root).selectors().iter().cloned());
        data.add_selectors(
            right_tree
                .node(right_tree.root())
                .selectors()
                .iter()
                .cloned(),
        );
        let dep = this.tree.add_detached(data);
        this.tree
            .insert_as_parent(left_root, dep)
            .expect("a freshly created dependent-query node is detached");
        let grafted = this.tree.graft_from(&right_tree, right_tree.root());
        this.tree
            .attach_child(dep, grafted)
            .expect("a grafted subtree is detached");
        this
    }

    /// Name the variable this (sub)plan's results are bound to.
    pub fn as_variable<N: Into<String>>(mut self, name: N) -> Self {
        let root = self.tree.root();
        self.tree
            .node_mut(root)
            .set_prop(NodeProp::VariableName, PropValue::Name(name.into()));
        self
    }

    pub fn build(self) -> PlanTree {
        self.tree
    }

    fn wrap<F: FnOnce(&mut PlanNodeData)>(mut self, kind: NodeKind, fill: F) -> Self {
        let root = self.tree.root();
        let mut data = PlanNodeData::new(kind);
        data.add_selectors(self.tree.node(root).selectors().iter().cloned());
        fill(&mut data);
        let node = self.tree.add_detached(data);
        self.tree
            .insert_as_parent(root, node)
            .expect("a freshly created node is detached");
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DynamicOperand, Operator, StaticOperand, Value};

    #[test]
    fn canonical_shape_for_a_filtered_source() {
        let plan = PlanBuilder::source("t1")
            .select(Constraint::comparison(
                DynamicOperand::property("t1", "c13"),
                Operator::EqualTo,
                StaticOperand::Literal(Value::String("x".into())),
            ))
            .project(vec![Column::new("t1", "c11")])
            .build();

        let root = plan.root();
        assert_eq!(plan.kind(root), NodeKind::Project);
        let select = plan.only_child(root).unwrap();
        assert_eq!(plan.kind(select), NodeKind::Select);
        let source = plan.only_child(select).unwrap();
        assert_eq!(plan.kind(source), NodeKind::Source);
        assert_eq!(plan.node(source).source_name(), Some(&"t1".into()));
        assert!(plan.node(root).selectors().contains(&"t1".into()));
    }

    #[test]
    fn join_unions_selectors_and_keeps_child_order() {
        let plan = PlanBuilder::source("t1")
            .join(
                JoinType::Inner,
                JoinCondition::equi("t1", "c11", "t2", "c21"),
                PlanBuilder::aliased_source("t2", "x2"),
            )
            .build();

        let join = plan.root();
        assert_eq!(plan.kind(join), NodeKind::Join);
        let children = plan.children(join);
        assert_eq!(children.len(), 2);
        assert_eq!(plan.node(children[0]).source_name(), Some(&"t1".into()));
        assert_eq!(
            plan.node(children[1]).source_alias_or_name(),
            Some(&"x2".into())
        );
        assert!(plan.node(join).selectors().contains(&"t1".into()));
        assert!(plan.node(join).selectors().contains(&"x2".into()));
    }

    #[test]
    fn dependent_query_tags_the_left_variable() {
        let plan = PlanBuilder::dependent_query(
            PlanBuilder::source("t1")
                .project(vec![Column::new("t1", "c11")])
                .as_variable("__subquery1"),
            PlanBuilder::source("t2").project(vec![Column::new("t2", "c21")]),
        )
        .build();

        let dep = plan.root();
        assert_eq!(plan.kind(dep), NodeKind::DependentQuery);
        let children = plan.children(dep);
        assert_eq!(
            plan.node(children[0]).prop(NodeProp::VariableName),
            Some(&PropValue::Name("__subquery1".into()))
        );
        assert!(!plan.node(children[1]).has_prop(NodeProp::VariableName));
    }
}
