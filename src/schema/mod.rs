//! Schema declarations.
//!
//! A [`Schema`] is the plain-data description of every node type: its
//! properties, edges, indexes and rollups. Schemas are ordinary structs and
//! also deserialize from JSON, so they can live in config files. Validation
//! and interning happen in [`Catalog::build`](catalog::Catalog::build);
//! nothing here is checked until then.
//!
//! ```rust
//! use reflejo::schema::*;
//!
//! let schema = Schema {
//!     types: vec![
//!         TypeDecl::new("user")
//!             .prop("name")
//!             .edge(EdgeDecl::new("posts", "post").reverse("author"))
//!             .rollup(RollupDecl::count("post_count", "posts")),
//!         TypeDecl::new("post").prop("title").prop("published"),
//!     ],
//! };
//! ```

pub mod catalog;

pub use catalog::Catalog;

use crate::error::{GraphError, Result};
use crate::model::Value;
use crate::types::PropId;
use serde::{Deserialize, Serialize};

/// Index field direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dir {
    /// Ascending (nil last).
    #[default]
    Asc,
    /// Descending (nil first).
    Desc,
}

/// Filter comparison operator. Defaults to `Eq`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    /// Equality.
    #[default]
    Eq,
    /// Strictly greater.
    Gt,
    /// Greater or equal.
    Gte,
    /// Strictly less.
    Lt,
    /// Less or equal.
    Lte,
}

/// Filter expression over a property field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    /// Property name on the filtered type.
    pub field: String,
    /// Comparison operator.
    #[serde(default)]
    pub op: FilterOp,
    /// Comparison operand.
    pub value: Value,
}

impl Filter {
    /// Equality filter.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOp::Eq, value)
    }

    /// Filter with an explicit operator.
    pub fn new(field: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op,
            value: value.into(),
        }
    }
}

/// Sort expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sort {
    /// Property name on the sorted type.
    pub field: String,
    /// Sort direction.
    #[serde(default)]
    pub dir: Dir,
}

impl Sort {
    /// Ascending sort.
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            dir: Dir::Asc,
        }
    }

    /// Descending sort.
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            dir: Dir::Desc,
        }
    }
}

/// One field of an index declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexField {
    /// Property name.
    pub field: String,
    /// Field direction.
    #[serde(default)]
    pub dir: Dir,
}

impl IndexField {
    /// Ascending index field.
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            dir: Dir::Asc,
        }
    }

    /// Descending index field.
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            dir: Dir::Desc,
        }
    }
}

/// Type index declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexDecl {
    /// Index name, unique within the type.
    pub name: String,
    /// Ordered field list.
    pub fields: Vec<IndexField>,
}

impl IndexDecl {
    /// Index over the given ascending fields.
    pub fn on(name: impl Into<String>, fields: &[&str]) -> Self {
        Self {
            name: name.into(),
            fields: fields.iter().map(|f| IndexField::asc(*f)).collect(),
        }
    }
}

/// Edge declaration on a type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeDecl {
    /// Edge name, unique within the owner type.
    pub name: String,
    /// Target type name.
    pub target: String,
    /// Optional reverse edge name materialized on the target type.
    #[serde(default)]
    pub reverse: Option<String>,
    /// Edge indexes: ordered lists of target-type fields.
    #[serde(default)]
    pub indexes: Vec<Vec<IndexField>>,
}

impl EdgeDecl {
    /// Edge towards `target` with no reverse name and no indexes.
    pub fn new(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            reverse: None,
            indexes: Vec::new(),
        }
    }

    /// Names the reverse edge on the target type.
    pub fn reverse(mut self, name: impl Into<String>) -> Self {
        self.reverse = Some(name.into());
        self
    }

    /// Adds an edge index over ascending target fields.
    pub fn index(mut self, fields: &[&str]) -> Self {
        self.indexes
            .push(fields.iter().map(|f| IndexField::asc(*f)).collect());
        self
    }

    /// Adds an edge index with explicit directions.
    pub fn index_with(mut self, fields: Vec<IndexField>) -> Self {
        self.indexes.push(fields);
        self
    }
}

/// Rollup kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RollupKind {
    /// Scalar aggregate stored as a pseudo-property on the owner.
    Property,
    /// At most one target, materialized as a derived edge.
    Reference,
    /// Filtered target set, materialized as a derived edge.
    Collection,
}

/// Aggregate function of a property rollup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compute {
    /// Number of qualifying targets.
    Count,
    /// Sum of the target property.
    Sum,
    /// Mean of the target property.
    Avg,
    /// Minimum of the target property.
    Min,
    /// Maximum of the target property.
    Max,
    /// Target property of the first target in sort order.
    First,
    /// Target property of the last target in sort order.
    Last,
    /// True when any qualifying target's probe value is truthy.
    Any,
    /// True when the target set is non-empty and every probe value is truthy.
    All,
}

/// Rollup declaration on a type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollupDecl {
    /// Rollup name. Property rollups claim a property slot on the owner;
    /// reference/collection rollups claim an edge name.
    pub name: String,
    /// Rollup kind.
    pub kind: RollupKind,
    /// Base edge name on the owner type.
    pub edge: String,
    /// Aggregate function (property rollups only).
    #[serde(default)]
    pub compute: Option<Compute>,
    /// Target property fed into the aggregate.
    #[serde(default)]
    pub property: Option<String>,
    /// Qualification filters over target properties.
    #[serde(default)]
    pub filters: Vec<Filter>,
    /// Target order (reference/collection and first/last).
    #[serde(default)]
    pub sort: Option<Sort>,
}

impl RollupDecl {
    /// `count` property rollup over an edge.
    pub fn count(name: impl Into<String>, edge: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: RollupKind::Property,
            edge: edge.into(),
            compute: Some(Compute::Count),
            property: None,
            filters: Vec::new(),
            sort: None,
        }
    }

    /// Property rollup with an aggregate over a target property.
    pub fn property(
        name: impl Into<String>,
        edge: impl Into<String>,
        compute: Compute,
        property: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: RollupKind::Property,
            edge: edge.into(),
            compute: Some(compute),
            property: Some(property.into()),
            filters: Vec::new(),
            sort: None,
        }
    }

    /// Reference rollup (first target under `sort`).
    pub fn reference(name: impl Into<String>, edge: impl Into<String>, sort: Sort) -> Self {
        Self {
            name: name.into(),
            kind: RollupKind::Reference,
            edge: edge.into(),
            compute: None,
            property: None,
            filters: Vec::new(),
            sort: Some(sort),
        }
    }

    /// Collection rollup (targets passing `filters`).
    pub fn collection(
        name: impl Into<String>,
        edge: impl Into<String>,
        filters: Vec<Filter>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: RollupKind::Collection,
            edge: edge.into(),
            compute: None,
            property: None,
            filters,
            sort: None,
        }
    }

    /// Adds qualification filters.
    pub fn filtered(mut self, filters: Vec<Filter>) -> Self {
        self.filters = filters;
        self
    }
}

/// Node type declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeDecl {
    /// Type name, unique within the schema.
    pub name: String,
    /// Declared property names.
    #[serde(default)]
    pub properties: Vec<String>,
    /// Edge declarations.
    #[serde(default)]
    pub edges: Vec<EdgeDecl>,
    /// Type index declarations.
    #[serde(default)]
    pub indexes: Vec<IndexDecl>,
    /// Rollup declarations.
    #[serde(default)]
    pub rollups: Vec<RollupDecl>,
}

impl TypeDecl {
    /// Empty declaration for `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: Vec::new(),
            edges: Vec::new(),
            indexes: Vec::new(),
            rollups: Vec::new(),
        }
    }

    /// Declares a property.
    pub fn prop(mut self, name: impl Into<String>) -> Self {
        self.properties.push(name.into());
        self
    }

    /// Declares an edge.
    pub fn edge(mut self, edge: EdgeDecl) -> Self {
        self.edges.push(edge);
        self
    }

    /// Declares an index.
    pub fn index(mut self, index: IndexDecl) -> Self {
        self.indexes.push(index);
        self
    }

    /// Declares a rollup.
    pub fn rollup(mut self, rollup: RollupDecl) -> Self {
        self.rollups.push(rollup);
        self
    }
}

/// Whole-schema declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    /// All node types.
    pub types: Vec<TypeDecl>,
}

impl Schema {
    /// Parses a schema from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| GraphError::Schema(format!("invalid json: {e}")))
    }

    /// Serializes the schema to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| GraphError::Schema(format!("serialize: {e}")))
    }
}

/// Filter with the field resolved to an interned property id.
#[derive(Debug, Clone)]
pub struct CompiledFilter {
    /// Interned property on the filtered type.
    pub prop: PropId,
    /// Comparison operator.
    pub op: FilterOp,
    /// Comparison operand.
    pub value: Value,
}

impl CompiledFilter {
    /// Evaluates the filter against a property value.
    pub fn matches(&self, value: &Value) -> bool {
        use crate::index::keys::cmp_asc;
        use std::cmp::Ordering::*;
        match self.op {
            FilterOp::Eq => value.same(&self.value),
            FilterOp::Gt => cmp_asc(value, &self.value) == Greater && !value.is_nil(),
            FilterOp::Gte => {
                matches!(cmp_asc(value, &self.value), Greater | Equal) && !value.is_nil()
            }
            FilterOp::Lt => cmp_asc(value, &self.value) == Less,
            FilterOp::Lte => matches!(cmp_asc(value, &self.value), Less | Equal),
        }
    }
}

impl std::fmt::Display for FilterOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FilterOp::Eq => "eq",
            FilterOp::Gt => "gt",
            FilterOp::Gte => "gte",
            FilterOp::Lt => "lt",
            FilterOp::Lte => "lte",
        };
        f.write_str(s)
    }
}
