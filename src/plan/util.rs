//! Helpers shared by the rewrite rules: rewriting selector and column
//! references across a plan, and computing the columns an access node must
//! produce for the plan above it.

use std::collections::{BTreeSet, HashMap};

use enumset::EnumSet;

use crate::context::QueryContext;
use crate::model::{
    ChildNodeJoinCondition, Column, Comparison, Constraint, DescendantNodeJoinCondition,
    DynamicOperand, EquiJoinCondition, JoinCondition, Ordering, PropertyValue, ReferenceValue,
    SameNodeJoinCondition, SelectorName,
};
use crate::plan::node::{NodeProp, PlanNodeData, PropValue};
use crate::plan::tree::{PlanNodeId, PlanTree, Traversal};
use crate::plan::NodeKind;
use crate::problems::ProblemKind;
use crate::schema::TypeName;

/// A rewriting of selector (and optionally column) references, applied
/// uniformly across a plan or subtree.
///
/// Selector entries rename every reference to a selector wholesale; column
/// entries additionally rename one property in the process, and win over the
/// selector entry for the pairs they name.
#[derive(Clone, Debug, Default)]
pub struct ColumnMapping {
    selectors: HashMap<SelectorName, SelectorName>,
    columns: HashMap<(SelectorName, String), (SelectorName, String)>,
}

impl ColumnMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rename every reference to `from` so it refers to `to`.
    pub fn rename_selector(&mut self, from: SelectorName, to: SelectorName) {
        self.selectors.insert(from, to);
    }

    /// Rewrite references to `from.from_property` as `to.to_property`.
    pub fn map_column<P1, P2>(
        &mut self,
        from: SelectorName,
        from_property: P1,
        to: SelectorName,
        to_property: P2,
    ) where
        P1: Into<String>,
        P2: Into<String>,
    {
        self.columns
            .insert((from, from_property.into()), (to, to_property.into()));
    }

    pub fn is_empty(&self) -> bool {
        self.selectors.is_empty() && self.columns.is_empty()
    }

    fn map_selector(&self, selector: &SelectorName) -> Option<&SelectorName> {
        self.selectors.get(selector)
    }

    fn map_pair(&self, selector: &SelectorName, property: &str) -> Option<(SelectorName, String)> {
        if let Some((s, p)) = self
            .columns
            .get(&(selector.clone(), property.to_string()))
        {
            return Some((s.clone(), p.clone()));
        }
        self.map_selector(selector)
            .map(|s| (s.clone(), property.to_string()))
    }
}

pub fn replace_in_operand(operand: &DynamicOperand, mapping: &ColumnMapping) -> DynamicOperand {
    match operand {
        DynamicOperand::Property(p) => match mapping.map_pair(&p.selector, &p.property) {
            Some((selector, property)) => {
                DynamicOperand::Property(PropertyValue { selector, property })
            }
            None => operand.clone(),
        },
        DynamicOperand::Reference(r) => {
            let mapped = match &r.property {
                Some(property) => mapping.map_pair(&r.selector, property).map(|(s, p)| {
                    ReferenceValue {
                        selector: s,
                        property: Some(p),
                    }
                }),
                None => mapping.map_selector(&r.selector).map(|s| ReferenceValue {
                    selector: s.clone(),
                    property: None,
                }),
            };
            mapped
                .map(DynamicOperand::Reference)
                .unwrap_or_else(|| operand.clone())
        }
    }
}

pub fn replace_in_constraint(constraint: &Constraint, mapping: &ColumnMapping) -> Constraint {
    match constraint {
        Constraint::And(l, r) => Constraint::And(
            Box::new(replace_in_constraint(l, mapping)),
            Box::new(replace_in_constraint(r, mapping)),
        ),
        Constraint::Or(l, r) => Constraint::Or(
            Box::new(replace_in_constraint(l, mapping)),
            Box::new(replace_in_constraint(r, mapping)),
        ),
        Constraint::Not(c) => Constraint::Not(Box::new(replace_in_constraint(c, mapping))),
        Constraint::Comparison(c) => Constraint::Comparison(Comparison {
            operand: replace_in_operand(&c.operand, mapping),
            operator: c.operator,
            value: c.value.clone(),
        }),
        Constraint::Between(b) => {
            let mut b = b.clone();
            b.operand = replace_in_operand(&b.operand, mapping);
            Constraint::Between(b)
        }
        Constraint::PropertyExistence(p) => {
            match mapping.map_pair(&p.selector, &p.property) {
                Some((selector, property)) => {
                    Constraint::PropertyExistence(PropertyValue { selector, property })
                }
                None => constraint.clone(),
            }
        }
        Constraint::SetCriteria { operand, values } => Constraint::SetCriteria {
            operand: replace_in_operand(operand, mapping),
            values: values.clone(),
        },
    }
}

pub fn replace_in_condition(condition: &JoinCondition, mapping: &ColumnMapping) -> JoinCondition {
    let map_sel = |s: &SelectorName| mapping.map_selector(s).unwrap_or(s).clone();
    match condition {
        JoinCondition::Equi(c) => {
            let (selector1, property1) = mapping
                .map_pair(&c.selector1, &c.property1)
                .unwrap_or_else(|| (c.selector1.clone(), c.property1.clone()));
            let (selector2, property2) = mapping
                .map_pair(&c.selector2, &c.property2)
                .unwrap_or_else(|| (c.selector2.clone(), c.property2.clone()));
            JoinCondition::Equi(EquiJoinCondition {
                selector1,
                property1,
                selector2,
                property2,
            })
        }
        JoinCondition::SameNode(c) => JoinCondition::SameNode(SameNodeJoinCondition {
            selector1: map_sel(&c.selector1),
            selector2: map_sel(&c.selector2),
            selector2_path: c.selector2_path.clone(),
        }),
        JoinCondition::ChildNode(c) => JoinCondition::ChildNode(ChildNodeJoinCondition {
            child_selector: map_sel(&c.child_selector),
            parent_selector: map_sel(&c.parent_selector),
        }),
        JoinCondition::Descendant(c) => JoinCondition::Descendant(DescendantNodeJoinCondition {
            descendant_selector: map_sel(&c.descendant_selector),
            ancestor_selector: map_sel(&c.ancestor_selector),
        }),
    }
}

/// Rewrite one column. When the mapping renames its property and the column
/// had no alias, the original output name is kept as the alias so consumers
/// of the projection are unaffected.
pub fn replace_in_column(column: &Column, mapping: &ColumnMapping) -> Column {
    match mapping.map_pair(&column.selector, &column.property) {
        Some((selector, property)) => {
            let alias = match &column.alias {
                Some(a) => Some(a.clone()),
                None if property != column.property => Some(column.property.clone()),
                None => None,
            };
            Column {
                selector,
                property,
                alias,
            }
        }
        None => column.clone(),
    }
}

pub fn replace_in_ordering(ordering: &Ordering, mapping: &ColumnMapping) -> Ordering {
    Ordering {
        operand: replace_in_operand(&ordering.operand, mapping),
        order: ordering.order,
    }
}

/// Rewrite every reference inside one node's property bag and selector set.
pub fn replace_in_node(data: &mut PlanNodeData, mapping: &ColumnMapping) {
    let keys: Vec<NodeProp> = data.prop_keys().collect();
    for key in keys {
        let rewritten = match data.prop(key) {
            Some(PropValue::Constraint(c)) => {
                Some(PropValue::Constraint(replace_in_constraint(c, mapping)))
            }
            Some(PropValue::ConstraintList(cs)) => Some(PropValue::ConstraintList(
                cs.iter().map(|c| replace_in_constraint(c, mapping)).collect(),
            )),
            Some(PropValue::JoinCondition(jc)) => {
                Some(PropValue::JoinCondition(replace_in_condition(jc, mapping)))
            }
            Some(PropValue::Columns(cols)) => Some(PropValue::Columns(
                cols.iter().map(|c| replace_in_column(c, mapping)).collect(),
            )),
            Some(PropValue::Orderings(os)) => Some(PropValue::Orderings(
                os.iter().map(|o| replace_in_ordering(o, mapping)).collect(),
            )),
            Some(PropValue::Selector(s)) if key == NodeProp::SourceAlias => mapping
                .map_selector(s)
                .map(|s| PropValue::Selector(s.clone())),
            Some(PropValue::Selectors(ss)) => Some(PropValue::Selectors(
                ss.iter()
                    .map(|s| mapping.map_selector(s).unwrap_or(s).clone())
                    .collect(),
            )),
            _ => None,
        };
        if let Some(value) = rewritten {
            data.set_prop(key, value);
        }
    }
    let renamed: Vec<(SelectorName, SelectorName)> = data
        .selectors()
        .iter()
        .filter_map(|s| mapping.map_selector(s).map(|to| (s.clone(), to.clone())))
        .collect();
    for (from, to) in renamed {
        data.remove_selector(&from);
        data.add_selector(to);
    }
}

/// Rewrite every reference at and below `start`.
pub fn replace_references_below(tree: &mut PlanTree, start: PlanNodeId, mapping: &ColumnMapping) {
    for id in tree.find_all_at_or_below(start, EnumSet::all(), Traversal::PreOrder) {
        replace_in_node(tree.node_mut(id), mapping);
    }
}

/// Rewrite every reference in the whole plan.
pub fn replace_references(tree: &mut PlanTree, mapping: &ColumnMapping) {
    let root = tree.root();
    replace_references_below(tree, root, mapping);
}

fn collect_operand(operand: &DynamicOperand, out: &mut BTreeSet<(SelectorName, String)>) {
    match operand {
        DynamicOperand::Property(p) => {
            out.insert((p.selector.clone(), p.property.clone()));
        }
        DynamicOperand::Reference(r) => {
            if let Some(property) = &r.property {
                out.insert((r.selector.clone(), property.clone()));
            }
        }
    }
}

/// Every (selector, property) pair a constraint reads.
pub fn columns_referenced_by(constraint: &Constraint) -> BTreeSet<(SelectorName, String)> {
    let mut out = BTreeSet::new();
    collect_constraint(constraint, &mut out);
    out
}

/// Every selector a constraint reads, including bare node references that
/// name no property.
pub fn selectors_referenced_by(constraint: &Constraint) -> BTreeSet<SelectorName> {
    let mut out: BTreeSet<SelectorName> = columns_referenced_by(constraint)
        .into_iter()
        .map(|(selector, _)| selector)
        .collect();
    collect_bare_selectors(constraint, &mut out);
    out
}

fn collect_bare_selectors(constraint: &Constraint, out: &mut BTreeSet<SelectorName>) {
    fn operand(op: &DynamicOperand, out: &mut BTreeSet<SelectorName>) {
        if let DynamicOperand::Reference(r) = op {
            if r.property.is_none() {
                out.insert(r.selector.clone());
            }
        }
    }
    match constraint {
        Constraint::And(l, r) | Constraint::Or(l, r) => {
            collect_bare_selectors(l, out);
            collect_bare_selectors(r, out);
        }
        Constraint::Not(c) => collect_bare_selectors(c, out),
        Constraint::Comparison(c) => operand(&c.operand, out),
        Constraint::Between(b) => operand(&b.operand, out),
        Constraint::PropertyExistence(_) => {}
        Constraint::SetCriteria { operand: op, .. } => operand(op, out),
    }
}

fn collect_constraint(constraint: &Constraint, out: &mut BTreeSet<(SelectorName, String)>) {
    match constraint {
        Constraint::And(l, r) | Constraint::Or(l, r) => {
            collect_constraint(l, out);
            collect_constraint(r, out);
        }
        Constraint::Not(c) => collect_constraint(c, out),
        Constraint::Comparison(c) => collect_operand(&c.operand, out),
        Constraint::Between(b) => collect_operand(&b.operand, out),
        Constraint::PropertyExistence(p) => {
            out.insert((p.selector.clone(), p.property.clone()));
        }
        Constraint::SetCriteria { operand, .. } => collect_operand(operand, out),
    }
}

fn collect_condition(condition: &JoinCondition, out: &mut BTreeSet<(SelectorName, String)>) {
    if let JoinCondition::Equi(c) = condition {
        out.insert((c.selector1.clone(), c.property1.clone()));
        out.insert((c.selector2.clone(), c.property2.clone()));
    }
}

/// The columns the subtree under `access` must produce for the plan above
/// it: every column an ancestor projects, filters, joins, or sorts on that
/// belongs to one of the access node's selectors. When nothing above
/// constrains the output, all columns of the underlying tables are required.
pub fn find_required_columns(
    ctx: &QueryContext,
    tree: &PlanTree,
    access: PlanNodeId,
) -> Vec<Column> {
    let selectors = tree.node(access).selectors().clone();
    let mut required = Vec::new();
    let mut seen: BTreeSet<(SelectorName, String)> = BTreeSet::new();

    let mut ancestor = tree.parent(access);
    while let Some(n) = ancestor {
        let data = tree.node(n);
        match data.kind {
            NodeKind::Project => {
                if let Some(PropValue::Columns(cols)) = data.prop(NodeProp::ProjectColumns) {
                    for col in cols {
                        if selectors.contains(&col.selector)
                            && seen.insert((col.selector.clone(), col.property.clone()))
                        {
                            required.push(col.clone());
                        }
                    }
                }
            }
            NodeKind::Select => {
                if let Some(criteria) = data.select_criteria() {
                    for (selector, property) in columns_referenced_by(criteria) {
                        if selectors.contains(&selector)
                            && seen.insert((selector.clone(), property.clone()))
                        {
                            required.push(Column::new(selector, property));
                        }
                    }
                }
            }
            NodeKind::Join => {
                let mut pairs = BTreeSet::new();
                if let Some(condition) = data.join_condition() {
                    collect_condition(condition, &mut pairs);
                }
                if let Some(PropValue::ConstraintList(cs)) = data.prop(NodeProp::JoinConstraints) {
                    for c in cs {
                        collect_constraint(c, &mut pairs);
                    }
                }
                for (selector, property) in pairs {
                    if selectors.contains(&selector)
                        && seen.insert((selector.clone(), property.clone()))
                    {
                        required.push(Column::new(selector, property));
                    }
                }
            }
            NodeKind::Sort => {
                if let Some(PropValue::Orderings(os)) = data.prop(NodeProp::SortOrderBy) {
                    let mut pairs = BTreeSet::new();
                    for o in os {
                        collect_operand(&o.operand, &mut pairs);
                    }
                    for (selector, property) in pairs {
                        if selectors.contains(&selector)
                            && seen.insert((selector.clone(), property.clone()))
                        {
                            required.push(Column::new(selector, property));
                        }
                    }
                }
            }
            _ => {}
        }
        ancestor = tree.parent(n);
    }

    if required.is_empty() {
        for source in tree.find_all_at_or_below(access, NodeKind::Source.into(), Traversal::PreOrder)
        {
            let data = tree.node(source);
            let name = match data.source_name() {
                Some(name) => name.clone(),
                None => continue,
            };
            match ctx.schemata().get_table(&name) {
                Some(table) => {
                    let selector = data
                        .source_alias_or_name()
                        .cloned()
                        .unwrap_or_else(|| name.clone());
                    for column in table.columns() {
                        if seen.insert((selector.clone(), column.name().to_string())) {
                            required.push(Column::new(selector.clone(), column.name()));
                        }
                    }
                }
                None => ctx.add_error(ProblemKind::TableDoesNotExist(name)),
            }
        }
    }
    required
}

/// The schema types of the given columns, resolved against the SOURCE nodes
/// under `access`. Columns that cannot be resolved take the default type.
pub fn find_required_column_types(
    ctx: &QueryContext,
    tree: &PlanTree,
    access: PlanNodeId,
    columns: &[Column],
) -> Vec<TypeName> {
    let sources = tree.find_all_at_or_below(access, NodeKind::Source.into(), Traversal::PreOrder);
    columns
        .iter()
        .map(|col| {
            sources
                .iter()
                .find(|s| tree.node(**s).source_alias_or_name() == Some(&col.selector))
                .and_then(|s| tree.node(*s).source_name())
                .and_then(|name| ctx.schemata().get_table(name))
                .and_then(|table| table.get_column(&col.property))
                .map(|c| c.type_name())
                .unwrap_or_else(|| ctx.type_system().default_type())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    use crate::model::{Operator, StaticOperand, Value};
    use crate::plan::PlanBuilder;
    use crate::schema::ImmutableSchemata;

    fn comparison(selector: &str, property: &str, value: i64) -> Constraint {
        Constraint::comparison(
            DynamicOperand::property(selector, property),
            Operator::EqualTo,
            StaticOperand::Literal(Value::Long(value)),
        )
    }

    #[test]
    fn selector_renames_apply_to_criteria_and_selector_sets() {
        let mut mapping = ColumnMapping::new();
        mapping.rename_selector("t2".into(), "t1".into());

        let mut plan = PlanBuilder::source("t2")
            .select(comparison("t2", "c1", 3))
            .build();
        replace_references(&mut plan, &mapping);

        let select = plan.root();
        let expected = comparison("t1", "c1", 3);
        assert_eq!(plan.node(select).select_criteria(), Some(&expected));
        assert!(plan.node(select).selectors().contains(&"t1".into()));
        assert!(!plan.node(select).selectors().contains(&"t2".into()));
    }

    #[test]
    fn column_entries_rename_the_property_and_preserve_output_names() {
        let mut mapping = ColumnMapping::new();
        mapping.map_column("v1".into(), "c2", "t1".into(), "c12");

        let column = Column::new("v1", "c2");
        let mapped = replace_in_column(&column, &mapping);
        assert_eq!(mapped.selector, "t1".into());
        assert_eq!(mapped.property, "c12");
        assert_eq!(mapped.output_name(), "c2");

        let aliased = Column::aliased("v1", "c2", "out");
        assert_eq!(replace_in_column(&aliased, &mapping).output_name(), "out");
    }

    #[test]
    fn column_entries_win_over_selector_entries() {
        let mut mapping = ColumnMapping::new();
        mapping.rename_selector("v1".into(), "t9".into());
        mapping.map_column("v1".into(), "c2", "t1".into(), "c12");

        let op = DynamicOperand::property("v1", "c2");
        assert_eq!(
            replace_in_operand(&op, &mapping),
            DynamicOperand::property("t1", "c12")
        );
        let other = DynamicOperand::property("v1", "c3");
        assert_eq!(
            replace_in_operand(&other, &mapping),
            DynamicOperand::property("t9", "c3")
        );
    }

    #[test]
    fn required_columns_gather_from_every_ancestor_kind() {
        let schemata = ImmutableSchemata::builder()
            .add_table("t1", ["c11", "c12", "c13"])
            .build();
        let ctx = QueryContext::new(Rc::new(schemata));

        let mut plan = PlanBuilder::source("t1")
            .select(comparison("t1", "c13", 1))
            .sort(vec![Ordering::ascending(DynamicOperand::property(
                "t1", "c12",
            ))])
            .project(vec![Column::new("t1", "c11")])
            .build();
        let source = plan
            .find_first_at_or_below(plan.root(), NodeKind::Source.into(), Traversal::PreOrder)
            .unwrap();
        let access = plan
            .insert_new_as_parent(
                source,
                PlanNodeData::with_selectors(NodeKind::Access, ["t1"]),
            )
            .unwrap();

        let required = find_required_columns(&ctx, &plan, access);
        let names: BTreeSet<_> = required.iter().map(|c| c.property.as_str()).collect();
        assert_eq!(names, BTreeSet::from(["c11", "c12", "c13"]));
    }

    #[test]
    fn unconstrained_access_requires_all_table_columns() {
        let schemata = ImmutableSchemata::builder()
            .add_table("t1", ["c11", "c12"])
            .build();
        let ctx = QueryContext::new(Rc::new(schemata));

        let mut plan = PlanBuilder::source("t1").build();
        let source = plan.root();
        let access = plan
            .insert_new_as_parent(
                source,
                PlanNodeData::with_selectors(NodeKind::Access, ["t1"]),
            )
            .unwrap();

        let required = find_required_columns(&ctx, &plan, access);
        assert_eq!(required.len(), 2);
        let types = find_required_column_types(&ctx, &plan, access, &required);
        assert_eq!(types.len(), 2);
    }
}
