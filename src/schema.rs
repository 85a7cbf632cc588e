//! Table and view metadata the optimizer resolves selectors against.
//!
//! A view carries its definition as a canonical plan tree; the view-inlining
//! rule grafts a copy of that tree into the query plan being optimized.

use std::collections::{BTreeMap, BTreeSet};

use crate::model::SelectorName;
use crate::plan::{NodeKind, NodeProp, PlanTree};

/// The closed set of column types the optimizer knows about.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, strum_macros::Display)]
pub enum TypeName {
    String,
    Long,
    Double,
    Boolean,
    Date,
}

/// Resolves untyped or unknown columns to a concrete type.
#[derive(Clone, Debug)]
pub struct TypeSystem {
    default: TypeName,
}

impl TypeSystem {
    pub fn new() -> Self {
        Self {
            default: TypeName::String,
        }
    }

    pub fn default_type(&self) -> TypeName {
        self.default
    }
}

impl Default for TypeSystem {
    fn default() -> Self {
        Self::new()
    }
}

/// One column of a table or view.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchemaColumn {
    name: String,
    type_name: TypeName,
}

impl SchemaColumn {
    pub fn new<N: Into<String>>(name: N, type_name: TypeName) -> Self {
        Self {
            name: name.into(),
            type_name,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_name(&self) -> TypeName {
        self.type_name
    }
}

/// A table or view known to the schemata.
#[derive(Clone, Debug)]
pub struct Table {
    name: SelectorName,
    columns: Vec<SchemaColumn>,
    key_columns: BTreeSet<String>,
    view_definition: Option<PlanTree>,
}

impl Table {
    pub fn name(&self) -> &SelectorName {
        &self.name
    }

    pub fn columns(&self) -> &[SchemaColumn] {
        &self.columns
    }

    pub fn get_column(&self, name: &str) -> Option<&SchemaColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// True when the column participates in a key of this table.
    pub fn has_key(&self, column: &str) -> bool {
        self.key_columns.contains(column)
    }

    /// True when every one of the named columns belongs to a key.
    pub fn all_keyed<'a, I: IntoIterator<Item = &'a str>>(&self, columns: I) -> bool {
        columns.into_iter().all(|c| self.has_key(c))
    }

    pub fn is_view(&self) -> bool {
        self.view_definition.is_some()
    }

    /// The canonical plan this view stands for.
    pub fn view_plan(&self) -> Option<&PlanTree> {
        self.view_definition.as_ref()
    }
}

/// Read-only access to table and view definitions by name.
pub trait Schemata {
    fn get_table(&self, name: &SelectorName) -> Option<&Table>;
}

/// An immutable, fully-materialized [`Schemata`], built once up front.
#[derive(Clone, Debug, Default)]
pub struct ImmutableSchemata {
    tables: BTreeMap<SelectorName, Table>,
}

impl ImmutableSchemata {
    pub fn builder() -> SchemataBuilder {
        SchemataBuilder::default()
    }
}

impl Schemata for ImmutableSchemata {
    fn get_table(&self, name: &SelectorName) -> Option<&Table> {
        self.tables.get(name)
    }
}

#[derive(Default)]
pub struct SchemataBuilder {
    tables: BTreeMap<SelectorName, Table>,
    type_system: TypeSystem,
}

impl SchemataBuilder {
    /// Add a table whose columns all take the default type.
    pub fn add_table<N, C>(mut self, name: N, columns: C) -> Self
    where
        N: Into<SelectorName>,
        C: IntoIterator,
        C::Item: Into<String>,
    {
        let name = name.into();
        let columns = columns
            .into_iter()
            .map(|c| SchemaColumn::new(c, self.type_system.default_type()))
            .collect();
        self.tables.insert(
            name.clone(),
            Table {
                name,
                columns,
                key_columns: BTreeSet::new(),
                view_definition: None,
            },
        );
        self
    }

    /// Override the type of one column on a previously added table.
    pub fn column_type<N: Into<SelectorName>>(
        mut self,
        table: N,
        column: &str,
        type_name: TypeName,
    ) -> Self {
        let table = table.into();
        if let Some(t) = self.tables.get_mut(&table) {
            if let Some(c) = t.columns.iter_mut().find(|c| c.name == column) {
                c.type_name = type_name;
            }
        }
        self
    }

    /// Mark columns of a previously added table as forming a key.
    pub fn add_key<N, C>(mut self, table: N, columns: C) -> Self
    where
        N: Into<SelectorName>,
        C: IntoIterator,
        C::Item: Into<String>,
    {
        let table = table.into();
        if let Some(t) = self.tables.get_mut(&table) {
            t.key_columns.extend(columns.into_iter().map(Into::into));
        }
        self
    }

    /// Add a view backed by the given canonical plan. The view's columns are
    /// derived from the plan's topmost PROJECT node.
    pub fn add_view<N: Into<SelectorName>>(mut self, name: N, definition: PlanTree) -> Self {
        let name = name.into();
        let columns = view_columns(&definition, self.type_system.default_type());
        self.tables.insert(
            name.clone(),
            Table {
                name,
                columns,
                key_columns: BTreeSet::new(),
                view_definition: Some(definition),
            },
        );
        self
    }

    pub fn build(self) -> ImmutableSchemata {
        ImmutableSchemata {
            tables: self.tables,
        }
    }
}

fn view_columns(definition: &PlanTree, default_type: TypeName) -> Vec<SchemaColumn> {
    let root = definition.root();
    if !definition.node(root).is(NodeKind::Project) {
        return Vec::new();
    }
    let columns = definition
        .node(root)
        .prop(NodeProp::ProjectColumns)
        .and_then(|v| v.as_columns());
    let types = definition
        .node(root)
        .prop(NodeProp::ProjectColumnTypes)
        .and_then(|v| v.as_types());
    match columns {
        Some(columns) => columns
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let ty = types
                    .and_then(|ts| ts.get(i).copied())
                    .unwrap_or(default_type);
                SchemaColumn::new(c.output_name(), ty)
            })
            .collect(),
        None => Vec::new(),
    }
}
