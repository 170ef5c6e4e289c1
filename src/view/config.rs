//! View edge configuration and its compiled form.

use crate::error::{GraphError, Result};
use crate::index::planner::{self, IndexQuery};
use crate::schema::{Catalog, CompiledFilter, Filter, Sort};
use crate::store::NodeRecord;
use crate::types::{EdgeDefId, TypeId};
use rustc_hash::FxHashMap;
use std::rc::Rc;

/// Read-only property snapshot handed to `eager`/`inline` predicates.
pub struct NodeProps<'a> {
    pub(crate) rec: &'a NodeRecord,
    pub(crate) cat: &'a Catalog,
}

impl NodeProps<'_> {
    /// Property value by name; nil for unknown names.
    pub fn get(&self, name: &str) -> crate::model::Value {
        self.cat
            .prop_id(self.rec.ty, name)
            .map(|p| self.rec.props[p.idx()].clone())
            .unwrap_or(crate::model::Value::Nil)
    }
}

/// Boolean edge flag: off, on, or a predicate over the parent node.
#[derive(Clone, Default)]
pub enum FlagSpec {
    /// Never.
    #[default]
    Off,
    /// Always.
    On,
    /// Decided per parent node.
    When(Rc<dyn Fn(&NodeProps<'_>) -> bool>),
}

impl FlagSpec {
    pub(crate) fn eval(&self, props: &NodeProps<'_>) -> bool {
        match self {
            FlagSpec::Off => false,
            FlagSpec::On => true,
            FlagSpec::When(f) => f(props),
        }
    }
}

impl From<bool> for FlagSpec {
    fn from(v: bool) -> Self {
        if v {
            FlagSpec::On
        } else {
            FlagSpec::Off
        }
    }
}

impl std::fmt::Debug for FlagSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlagSpec::Off => f.write_str("Off"),
            FlagSpec::On => f.write_str("On"),
            FlagSpec::When(_) => f.write_str("When(..)"),
        }
    }
}

/// Per-edge view configuration (pre-normalization).
#[derive(Debug, Clone, Default)]
pub struct EdgeConfig {
    /// Expand this edge automatically wherever its parent becomes visible.
    pub eager: FlagSpec,
    /// Hoist children: they occupy no position and keep the parent's depth.
    pub inline: FlagSpec,
    /// Re-apply this configuration at every deeper occurrence of the edge.
    pub recursive: bool,
    /// Child qualification filters (need a covering edge index).
    pub filters: Vec<Filter>,
    /// Child order (needs a covering edge index).
    pub sort: Option<Sort>,
    /// Cursor: children skipped before the window.
    pub skip: usize,
    /// Cursor: window size.
    pub take: Option<usize>,
    /// Nested edge configurations, keyed by edge name on the child type.
    pub edges: Vec<(String, EdgeConfig)>,
}

impl EdgeConfig {
    /// Empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the eager flag.
    pub fn eager(mut self, flag: impl Into<FlagSpec>) -> Self {
        self.eager = flag.into();
        self
    }

    /// Sets the inline flag.
    pub fn inline(mut self, flag: impl Into<FlagSpec>) -> Self {
        self.inline = flag.into();
        self
    }

    /// Marks the configuration recursive.
    pub fn recursive(mut self) -> Self {
        self.recursive = true;
        self
    }

    /// Sets child filters.
    pub fn filters(mut self, filters: Vec<Filter>) -> Self {
        self.filters = filters;
        self
    }

    /// Sets the child sort.
    pub fn sort(mut self, sort: Sort) -> Self {
        self.sort = Some(sort);
        self
    }

    /// Sets the cursor skip.
    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    /// Sets the cursor take.
    pub fn take(mut self, take: usize) -> Self {
        self.take = Some(take);
        self
    }

    /// Adds a nested edge configuration.
    pub fn edge(mut self, name: impl Into<String>, cfg: EdgeConfig) -> Self {
        self.edges.push((name.into(), cfg));
        self
    }
}

/// Compiled edge configuration node.
pub(crate) struct EdgeCfg {
    pub edge: EdgeDefId,
    pub eager: FlagSpec,
    pub inline: FlagSpec,
    pub recursive: bool,
    pub filters: Vec<CompiledFilter>,
    /// Window over the chosen edge index when filters/sort are present.
    pub query: Option<IndexQuery>,
    pub skip: usize,
    pub take: Option<usize>,
    pub children: FxHashMap<EdgeDefId, Rc<EdgeCfg>>,
}

/// Compiles an edge-config tree rooted at `owner` type, validating that
/// every filter/sort has a covering edge index.
pub(crate) fn compile_tree(
    cat: &Catalog,
    owner: TypeId,
    edges: &[(String, EdgeConfig)],
) -> Result<FxHashMap<EdgeDefId, Rc<EdgeCfg>>> {
    let mut out = FxHashMap::default();
    for (name, cfg) in edges {
        let eid = cat
            .edge_id(owner, name)
            .ok_or_else(|| GraphError::UnknownEdge(format!("{}.{name}", cat.type_name(owner))))?;
        let target = cat.edge(eid).target;
        let filters = cat.compile_filters(target, &cfg.filters)?;
        let sort = cfg
            .sort
            .as_ref()
            .map(|s| cat.compile_sort(target, s))
            .transpose()?;
        let query = if !filters.is_empty() || sort.is_some() {
            let fields = cat.edge_index_fields(eid);
            match planner::plan(fields.iter().map(|f| f.as_slice()), &filters, sort) {
                Some(q) => Some(q),
                None => {
                    return Err(GraphError::NoCoveringIndex(
                        cat.render_filters(target, &filters),
                    ))
                }
            }
        } else {
            None
        };
        let children = compile_tree(cat, target, &cfg.edges)?;
        out.insert(
            eid,
            Rc::new(EdgeCfg {
                edge: eid,
                eager: cfg.eager.clone(),
                inline: cfg.inline.clone(),
                recursive: cfg.recursive,
                filters,
                query,
                skip: cfg.skip,
                take: cfg.take,
                children,
            }),
        );
    }
    Ok(out)
}
