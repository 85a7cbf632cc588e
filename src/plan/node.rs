//! The data carried by a single node within a plan tree.

use std::collections::{BTreeMap, BTreeSet};

use enum_as_inner::EnumAsInner;
use enumset::{EnumSet, EnumSetType};

use crate::model::{
    Column, Constraint, JoinAlgorithm, JoinCondition, JoinType, Ordering, SelectorName,
};
use crate::schema::TypeName;

/// The type tag of a plan node, a closed set.
#[derive(EnumSetType, Debug, Hash, strum_macros::Display, strum_macros::EnumString)]
pub enum NodeKind {
    /// Marks the boundary below which a subtree is sent as one request to a
    /// single underlying data source.
    #[strum(serialize = "Access")]
    Access,
    /// Removes duplicate tuples.
    #[strum(serialize = "DupRemoval")]
    DupRemove,
    /// Combines two inputs under a join type, condition, and algorithm.
    #[strum(serialize = "Join")]
    Join,
    /// Fixes the concrete output column list (and types) of the subtree
    /// below it.
    #[strum(serialize = "Project")]
    Project,
    /// Filters tuples by a criteria constraint.
    #[strum(serialize = "Select")]
    Select,
    /// Orders tuples.
    #[strum(serialize = "Sort")]
    Sort,
    /// The 'table' from which tuples are obtained.
    #[strum(serialize = "Source")]
    Source,
    /// Produces no results.
    #[strum(serialize = "Null")]
    Null,
    /// Limits the number of tuples returned.
    #[strum(serialize = "Limit")]
    Limit,
    /// Set operations (UNION and friends) over two inputs.
    #[strum(serialize = "SetOperation")]
    SetOperation,
    /// Two subqueries where the left must complete before the right runs.
    #[strum(serialize = "DependentQuery")]
    DependentQuery,
}

/// Property keys usable on a plan node, a closed enumeration.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, strum_macros::Display)]
pub enum NodeProp {
    /// For SELECT and JOIN nodes, whether the criteria depends on another
    /// query's results. Value is a flag.
    IsDependent,
    /// For SELECT nodes, the criteria to apply. Value is a constraint.
    SelectCriteria,
    /// For JOIN nodes, the type of join. Value is a join type.
    JoinType,
    /// For JOIN nodes, the chosen join algorithm. Value is a join algorithm.
    JoinAlgorithm,
    /// For JOIN nodes, the join condition. Value is a join condition.
    JoinCondition,
    /// For JOIN nodes, additional criteria pushed down onto the join. Value
    /// is a constraint list.
    JoinConstraints,
    /// For SOURCE nodes, the literal name of the selector. Value is a
    /// selector name.
    SourceName,
    /// For SOURCE nodes, the alias of the selector. Value is a selector
    /// name.
    SourceAlias,
    /// For PROJECT nodes, the ordered projected columns. Value is a column
    /// list.
    ProjectColumns,
    /// For PROJECT nodes, the type names of the projected columns. Value is
    /// a type list.
    ProjectColumnTypes,
    /// For SORT nodes, the order-by list. Value is either orderings or (as
    /// an input to a merge join) selector names.
    SortOrderBy,
    /// For ACCESS nodes, signifies the node can never return results. Value
    /// is a flag; its presence is what matters.
    AccessNoResults,
    /// For the inputs of dependent queries, the variable where the results
    /// are placed. Value is a name.
    VariableName,
}

/// A property value; which variants are legal depends on the key.
#[derive(Clone, Debug, PartialEq, EnumAsInner)]
pub enum PropValue {
    Constraint(Constraint),
    ConstraintList(Vec<Constraint>),
    JoinCondition(JoinCondition),
    JoinType(JoinType),
    JoinAlgorithm(JoinAlgorithm),
    Columns(Vec<Column>),
    Types(Vec<TypeName>),
    Selector(SelectorName),
    Orderings(Vec<Ordering>),
    Selectors(Vec<SelectorName>),
    Name(String),
    Flag(bool),
}

/// The payload of one node in a plan tree: a type tag, the set of selectors
/// whose rows flow through the node, and a typed property bag.
///
/// Parent/child structure lives in [`super::PlanTree`], not here.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct PlanNodeData {
    pub kind: NodeKind,
    selectors: BTreeSet<SelectorName>,
    props: BTreeMap<NodeProp, PropValue>,
}

impl Default for NodeKind {
    fn default() -> Self {
        NodeKind::Null
    }
}

impl PlanNodeData {
    pub fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            selectors: BTreeSet::new(),
            props: BTreeMap::new(),
        }
    }

    pub fn with_selectors<I>(kind: NodeKind, selectors: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<SelectorName>,
    {
        let mut data = Self::new(kind);
        data.add_selectors(selectors);
        data
    }

    pub fn is(&self, kind: NodeKind) -> bool {
        self.kind == kind
    }

    pub fn is_one_of(&self, kinds: EnumSet<NodeKind>) -> bool {
        kinds.contains(self.kind)
    }

    pub fn selectors(&self) -> &BTreeSet<SelectorName> {
        &self.selectors
    }

    pub fn add_selector(&mut self, selector: SelectorName) {
        self.selectors.insert(selector);
    }

    pub fn add_selectors<I>(&mut self, selectors: I)
    where
        I: IntoIterator,
        I::Item: Into<SelectorName>,
    {
        for selector in selectors {
            self.selectors.insert(selector.into());
        }
    }

    pub fn remove_selector(&mut self, selector: &SelectorName) -> bool {
        self.selectors.remove(selector)
    }

    /// True when this node's selectors include every one of `required`.
    pub fn covers_selectors(&self, required: &BTreeSet<SelectorName>) -> bool {
        required.iter().all(|s| self.selectors.contains(s))
    }

    pub fn prop(&self, key: NodeProp) -> Option<&PropValue> {
        self.props.get(&key)
    }

    pub fn prop_mut(&mut self, key: NodeProp) -> Option<&mut PropValue> {
        self.props.get_mut(&key)
    }

    pub fn set_prop(&mut self, key: NodeProp, value: PropValue) -> Option<PropValue> {
        self.props.insert(key, value)
    }

    pub fn remove_prop(&mut self, key: NodeProp) -> Option<PropValue> {
        self.props.remove(&key)
    }

    pub fn has_prop(&self, key: NodeProp) -> bool {
        self.props.contains_key(&key)
    }

    pub fn prop_keys(&self) -> impl Iterator<Item = NodeProp> + '_ {
        self.props.keys().copied()
    }

    /// True when the property is present with a `true` flag value.
    pub fn has_flag(&self, key: NodeProp) -> bool {
        matches!(self.props.get(&key), Some(PropValue::Flag(true)))
    }

    pub fn source_name(&self) -> Option<&SelectorName> {
        self.prop(NodeProp::SourceName).and_then(|v| v.as_selector())
    }

    pub fn source_alias(&self) -> Option<&SelectorName> {
        self.prop(NodeProp::SourceAlias).and_then(|v| v.as_selector())
    }

    /// The name other parts of the plan use to refer to this SOURCE: its
    /// alias when present, its literal name otherwise.
    pub fn source_alias_or_name(&self) -> Option<&SelectorName> {
        self.source_alias().or_else(|| self.source_name())
    }

    pub fn select_criteria(&self) -> Option<&Constraint> {
        self.prop(NodeProp::SelectCriteria)
            .and_then(|v| v.as_constraint())
    }

    pub fn join_condition(&self) -> Option<&JoinCondition> {
        self.prop(NodeProp::JoinCondition)
            .and_then(|v| v.as_join_condition())
    }

    pub fn join_type(&self) -> Option<JoinType> {
        self.prop(NodeProp::JoinType)
            .and_then(|v| v.as_join_type())
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DynamicOperand, Operator, StaticOperand, Value};

    #[test]
    fn property_bag_round_trip() {
        let mut node = PlanNodeData::new(NodeKind::Select);
        let criteria = Constraint::comparison(
            DynamicOperand::property("t1", "c1"),
            Operator::LessThan,
            StaticOperand::Literal(Value::Long(3)),
        );
        assert!(node.select_criteria().is_none());
        node.set_prop(NodeProp::SelectCriteria, PropValue::Constraint(criteria.clone()));
        assert_eq!(node.select_criteria(), Some(&criteria));
        node.remove_prop(NodeProp::SelectCriteria);
        assert!(!node.has_prop(NodeProp::SelectCriteria));
    }

    #[test]
    fn flags_require_a_true_value() {
        let mut node = PlanNodeData::new(NodeKind::Access);
        node.set_prop(NodeProp::AccessNoResults, PropValue::Flag(false));
        assert!(!node.has_flag(NodeProp::AccessNoResults));
        node.set_prop(NodeProp::AccessNoResults, PropValue::Flag(true));
        assert!(node.has_flag(NodeProp::AccessNoResults));
    }

    #[test]
    fn selector_cover_checks_are_subset_based() {
        let mut node = PlanNodeData::with_selectors(NodeKind::Join, ["t1", "t2"]);
        let mut required = BTreeSet::new();
        required.insert(SelectorName::new("t1"));
        assert!(node.covers_selectors(&required));
        required.insert(SelectorName::new("t3"));
        assert!(!node.covers_selectors(&required));
        node.add_selector("t3".into());
        assert!(node.covers_selectors(&required));
    }

    #[test]
    fn source_alias_wins_over_name() {
        let mut node = PlanNodeData::new(NodeKind::Source);
        node.set_prop(NodeProp::SourceName, PropValue::Selector("t1".into()));
        assert_eq!(node.source_alias_or_name(), Some(&"t1".into()));
        node.set_prop(NodeProp::SourceAlias, PropValue::Selector("x1".into()));
        assert_eq!(node.source_alias_or_name(), Some(&"x1".into()));
    }
}
