//! The query model: the language-level objects that plan node properties
//! carry around, such as constraints, join conditions, and orderings.
//!
//! Every category is a closed sum type, so each rule that branches on the
//! kind of a constraint or join condition matches exhaustively and a new
//! variant becomes a compile-time obligation rather than a silently skipped
//! case.

use std::cmp::Ordering as CmpOrdering;
use std::fmt;

use enum_as_inner::EnumAsInner;

/// A logical alias identifying one source (table or view) whose rows a plan
/// node's output depends on.
#[derive(
    Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display, derive_more::From,
)]
pub struct SelectorName(String);

impl SelectorName {
    pub fn new<S: Into<String>>(name: S) -> Self {
        SelectorName(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SelectorName {
    fn from(name: &str) -> Self {
        SelectorName(name.to_string())
    }
}

/// A literal scalar value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    String(String),
    Long(i64),
    Double(f64),
    Boolean(bool),
}

impl Value {
    /// Ordering between two values, with numeric coercion between longs and
    /// doubles. Values of incompatible kinds are incomparable.
    pub fn compare(&self, other: &Value) -> Option<CmpOrdering> {
        match (self, other) {
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Long(a), Value::Long(b)) => Some(a.cmp(b)),
            (Value::Double(a), Value::Double(b)) => a.partial_cmp(b),
            (Value::Long(a), Value::Double(b)) => (*a as f64).partial_cmp(b),
            (Value::Double(a), Value::Long(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "'{}'", s),
            Value::Long(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::Boolean(v) => write!(f, "{}", v),
        }
    }
}

/// Comparison operators usable in a [`Constraint::Comparison`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, strum_macros::Display)]
pub enum Operator {
    #[strum(serialize = "=")]
    EqualTo,
    #[strum(serialize = "!=")]
    NotEqualTo,
    #[strum(serialize = "<")]
    LessThan,
    #[strum(serialize = "<=")]
    LessThanOrEqualTo,
    #[strum(serialize = ">")]
    GreaterThan,
    #[strum(serialize = ">=")]
    GreaterThanOrEqualTo,
}

impl Operator {
    /// True for the operators that describe one bound of a range.
    pub fn is_range(&self) -> bool {
        matches!(
            self,
            Operator::LessThan
                | Operator::LessThanOrEqualTo
                | Operator::GreaterThan
                | Operator::GreaterThanOrEqualTo
        )
    }

    /// True for `<` and `<=`.
    pub fn is_upper_bound(&self) -> bool {
        matches!(self, Operator::LessThan | Operator::LessThanOrEqualTo)
    }

    /// True for `>` and `>=`.
    pub fn is_lower_bound(&self) -> bool {
        matches!(self, Operator::GreaterThan | Operator::GreaterThanOrEqualTo)
    }

    /// True when the operator includes the bound itself (`<=`, `>=`).
    pub fn is_inclusive(&self) -> bool {
        matches!(
            self,
            Operator::LessThanOrEqualTo | Operator::GreaterThanOrEqualTo
        )
    }
}

/// A reference to the value of one property on one selector.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PropertyValue {
    pub selector: SelectorName,
    pub property: String,
}

impl PropertyValue {
    pub fn new<S: Into<SelectorName>, P: Into<String>>(selector: S, property: P) -> Self {
        Self {
            selector: selector.into(),
            property: property.into(),
        }
    }
}

/// A reference to a node identity (or one of its reference properties).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ReferenceValue {
    pub selector: SelectorName,
    pub property: Option<String>,
}

/// An operand whose value is computed per row.
#[derive(Clone, Debug, PartialEq, Eq, Hash, EnumAsInner)]
pub enum DynamicOperand {
    Property(PropertyValue),
    Reference(ReferenceValue),
}

impl DynamicOperand {
    pub fn property<S: Into<SelectorName>, P: Into<String>>(selector: S, property: P) -> Self {
        DynamicOperand::Property(PropertyValue::new(selector, property))
    }

    pub fn selector(&self) -> &SelectorName {
        match self {
            DynamicOperand::Property(p) => &p.selector,
            DynamicOperand::Reference(r) => &r.selector,
        }
    }
}

/// An operand whose value is fixed for the duration of the query.
#[derive(Clone, Debug, PartialEq, EnumAsInner)]
pub enum StaticOperand {
    Literal(Value),
    BindVariable(String),
}

/// A single comparison, e.g. `s.x < 10`.
#[derive(Clone, Debug, PartialEq)]
pub struct Comparison {
    pub operand: DynamicOperand,
    pub operator: Operator,
    pub value: StaticOperand,
}

/// A merged range constraint, e.g. `s.x BETWEEN 2 AND 5` with per-bound
/// inclusivity.
#[derive(Clone, Debug, PartialEq)]
pub struct Between {
    pub operand: DynamicOperand,
    pub lower: StaticOperand,
    pub upper: StaticOperand,
    pub include_lower: bool,
    pub include_upper: bool,
}

/// A row filter, as found on SELECT nodes and in join constraint lists.
#[derive(Clone, Debug, PartialEq, EnumAsInner)]
pub enum Constraint {
    And(Box<Constraint>, Box<Constraint>),
    Or(Box<Constraint>, Box<Constraint>),
    Not(Box<Constraint>),
    Comparison(Comparison),
    Between(Between),
    PropertyExistence(PropertyValue),
    SetCriteria {
        operand: DynamicOperand,
        values: Vec<StaticOperand>,
    },
}

impl Constraint {
    pub fn comparison(operand: DynamicOperand, operator: Operator, value: StaticOperand) -> Self {
        Constraint::Comparison(Comparison {
            operand,
            operator,
            value,
        })
    }

    pub fn and(left: Constraint, right: Constraint) -> Self {
        Constraint::And(Box::new(left), Box::new(right))
    }
}

/// An equi-join predicate of the exact form `s1.p1 = s2.p2`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EquiJoinCondition {
    pub selector1: SelectorName,
    pub property1: String,
    pub selector2: SelectorName,
    pub property2: String,
}

/// A join predicate requiring both selectors to resolve to the same node,
/// optionally offset by a relative path on the second selector.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SameNodeJoinCondition {
    pub selector1: SelectorName,
    pub selector2: SelectorName,
    pub selector2_path: Option<String>,
}

/// A join predicate requiring the child selector's node to be a child of the
/// parent selector's node.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ChildNodeJoinCondition {
    pub child_selector: SelectorName,
    pub parent_selector: SelectorName,
}

/// A join predicate requiring the descendant selector's node to be below the
/// ancestor selector's node.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DescendantNodeJoinCondition {
    pub descendant_selector: SelectorName,
    pub ancestor_selector: SelectorName,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, EnumAsInner)]
pub enum JoinCondition {
    Equi(EquiJoinCondition),
    SameNode(SameNodeJoinCondition),
    ChildNode(ChildNodeJoinCondition),
    Descendant(DescendantNodeJoinCondition),
}

impl JoinCondition {
    pub fn equi<S1, P1, S2, P2>(selector1: S1, property1: P1, selector2: S2, property2: P2) -> Self
    where
        S1: Into<SelectorName>,
        P1: Into<String>,
        S2: Into<SelectorName>,
        P2: Into<String>,
    {
        JoinCondition::Equi(EquiJoinCondition {
            selector1: selector1.into(),
            property1: property1.into(),
            selector2: selector2.into(),
            property2: property2.into(),
        })
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, strum_macros::Display)]
pub enum JoinType {
    Inner,
    LeftOuter,
    RightOuter,
    FullOuter,
    Cross,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, strum_macros::Display)]
pub enum JoinAlgorithm {
    NestedLoop,
    Merge,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Order {
    Ascending,
    Descending,
}

/// One element of a SORT node's order-by list.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Ordering {
    pub operand: DynamicOperand,
    pub order: Order,
}

impl Ordering {
    pub fn ascending(operand: DynamicOperand) -> Self {
        Self {
            operand,
            order: Order::Ascending,
        }
    }
}

/// One projected column: the property of a selector, optionally renamed in
/// the output.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Column {
    pub selector: SelectorName,
    pub property: String,
    pub alias: Option<String>,
}

impl Column {
    pub fn new<S: Into<SelectorName>, P: Into<String>>(selector: S, property: P) -> Self {
        Self {
            selector: selector.into(),
            property: property.into(),
            alias: None,
        }
    }

    pub fn aliased<S, P, A>(selector: S, property: P, alias: A) -> Self
    where
        S: Into<SelectorName>,
        P: Into<String>,
        A: Into<String>,
    {
        Self {
            selector: selector.into(),
            property: property.into(),
            alias: Some(alias.into()),
        }
    }

    /// The name this column exposes to consumers of the projection.
    pub fn output_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.property)
    }
}
