//! Public graph facade.

use crate::error::{GraphError, Result};
use crate::index::planner;
use crate::model::{Patch, Value};
use crate::reactive::{EdgeHandle, RefHandle, Signal, SubKind, Subscription};
use crate::schema::catalog::EdgeKind;
use crate::schema::{Catalog, Dir, Filter, RollupKind, Schema};
use crate::store::{
    edge_ops, index_ops, node_ops, Dispatch, GraphShared, StoreState, WatchSub,
};
use crate::types::{EdgeDefId, NodeId, PropId};
use crate::view::config::{self, EdgeConfig};
use crate::view::{ExpandMeta, View, ViewCore, ViewHooks};
use std::cell::RefCell;
use std::ops::ControlFlow;
use std::rc::Rc;
use tracing::debug;

/// Builds a graph from a validated schema.
pub fn create(schema: &Schema) -> Result<Graph> {
    let catalog = Rc::new(Catalog::build(schema)?);
    Ok(Graph {
        inner: Rc::new(GraphShared {
            state: RefCell::new(StoreState::new(catalog)),
        }),
    })
}

/// Handle to the reactive graph store. Cheap to clone; all clones share one
/// single-threaded engine.
#[derive(Clone)]
pub struct Graph {
    pub(crate) inner: Rc<GraphShared>,
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph").finish_non_exhaustive()
    }
}

impl Graph {
    /// Inserts a node. Unknown property names in `props` are ignored;
    /// rollup outputs cannot be seeded and are ignored too.
    pub fn insert(&self, type_name: &str, props: Patch) -> Result<NodeHandle> {
        let (ty, resolved) = {
            let state = self.inner.state.borrow();
            let cat = state.catalog.clone();
            let ty = cat
                .type_id(type_name)
                .ok_or_else(|| GraphError::UnknownType(type_name.to_string()))?;
            let mut resolved = Vec::new();
            for (name, value) in props.iter() {
                match cat.prop_id(ty, name) {
                    Some(p) if cat.type_meta(ty).props[p.idx()].rollup.is_some() => {
                        debug!(prop = name, "graph.insert.rollup_output_ignored");
                    }
                    Some(p) => resolved.push((p, value.clone())),
                    None => debug!(prop = name, "graph.insert.unknown_property_ignored"),
                }
            }
            (ty, resolved)
        };
        let id = node_ops::insert_node(&self.inner, ty, resolved);
        Ok(NodeHandle::from_shared(self.inner.clone(), id))
    }

    /// Node handle by id; `None` when deleted or never assigned.
    pub fn get(&self, id: NodeId) -> Option<NodeHandle> {
        self.inner
            .state
            .borrow()
            .nodes
            .contains_key(&id)
            .then(|| NodeHandle::from_shared(self.inner.clone(), id))
    }

    /// Applies a property patch. `Ok(false)` for an unknown id; writes to
    /// rollup outputs and unknown names are errors.
    pub fn update(&self, id: NodeId, patch: Patch) -> Result<bool> {
        let resolved = {
            let state = self.inner.state.borrow();
            let cat = state.catalog.clone();
            let Some(rec) = state.nodes.get(&id) else {
                return Ok(false);
            };
            let ty = rec.ty;
            let mut resolved = Vec::new();
            for (name, value) in patch.iter() {
                let p = cat.require_prop(ty, name)?;
                if cat.type_meta(ty).props[p.idx()].rollup.is_some() {
                    return Err(GraphError::ReadOnlyProperty(name.to_string()));
                }
                resolved.push((p, value.clone()));
            }
            resolved
        };
        Ok(node_ops::apply_patch(&self.inner, id, resolved))
    }

    /// Clears one property (sets it to nil).
    pub fn clear_prop(&self, id: NodeId, prop: &str) -> Result<bool> {
        self.update(id, Patch::new().with(prop, Value::Nil))
    }

    /// Deletes a node, cascading edge unlinks and derived-edge cleanup.
    pub fn delete(&self, id: NodeId) -> bool {
        node_ops::delete_node(&self.inner, id)
    }

    fn resolve_edge_on(&self, state: &StoreState, id: NodeId, edge: &str) -> Result<EdgeDefId> {
        let rec = state
            .nodes
            .get(&id)
            .ok_or(GraphError::NotFound("node"))?;
        state
            .catalog
            .edge_id(rec.ty, edge)
            .ok_or_else(|| GraphError::UnknownEdge(edge.to_string()))
    }

    /// Links `src --edge--> tgt`. Missing endpoints and double-links return
    /// `Ok(false)`; unknown or derived edges are errors.
    pub fn link(&self, src: NodeId, edge: &str, tgt: NodeId) -> Result<bool> {
        let resolved = {
            let state = self.inner.state.borrow();
            if !state.nodes.contains_key(&src) || !state.nodes.contains_key(&tgt) {
                let rec = state.nodes.get(&src);
                // An unknown edge name is still an error when the source
                // exists; a missing endpoint alone is a quiet no-op.
                if let Some(rec) = rec {
                    if state.catalog.edge_id(rec.ty, edge).is_none() {
                        return Err(GraphError::UnknownEdge(edge.to_string()));
                    }
                }
                return Ok(false);
            }
            let eid = self.resolve_edge_on(&state, src, edge)?;
            match &state.catalog.edge(eid).kind {
                EdgeKind::Forward { .. } => (src, eid, tgt),
                EdgeKind::Reverse { forward } => (tgt, *forward, src),
                EdgeKind::Derived { .. } => {
                    return Err(GraphError::ReadOnlyEdge(edge.to_string()))
                }
            }
        };
        edge_ops::link_forward(&self.inner, resolved.0, resolved.1, resolved.2)
    }

    /// Unlinks `src --edge--> tgt`. Absent links return `Ok(false)`.
    pub fn unlink(&self, src: NodeId, edge: &str, tgt: NodeId) -> Result<bool> {
        let resolved = {
            let state = self.inner.state.borrow();
            if !state.nodes.contains_key(&src) || !state.nodes.contains_key(&tgt) {
                return Ok(false);
            }
            let eid = self.resolve_edge_on(&state, src, edge)?;
            match &state.catalog.edge(eid).kind {
                EdgeKind::Forward { .. } => (src, eid, tgt),
                EdgeKind::Reverse { forward } => (tgt, *forward, src),
                EdgeKind::Derived { .. } => {
                    return Err(GraphError::ReadOnlyEdge(edge.to_string()))
                }
            }
        };
        edge_ops::unlink_forward(&self.inner, resolved.0, resolved.1, resolved.2)
    }

    /// Targets of `(id, edge)` in stored order.
    pub fn targets(&self, id: NodeId, edge: &str) -> Result<Vec<NodeHandle>> {
        let ids = {
            let state = self.inner.state.borrow();
            let eid = self.resolve_edge_on(&state, id, edge)?;
            edge_ops::slot_targets(&state, id, eid)
        };
        Ok(self.handles(ids))
    }

    /// Stored target count of `(id, edge)`.
    pub fn targets_count(&self, id: NodeId, edge: &str) -> Result<usize> {
        let state = self.inner.state.borrow();
        let eid = self.resolve_edge_on(&state, id, edge)?;
        Ok(edge_ops::slot_len(&state, id, eid))
    }

    /// Sources pointing at `id` through a forward edge named `edge`.
    pub fn sources(&self, id: NodeId, edge: &str) -> Result<Vec<NodeHandle>> {
        let ids = {
            let state = self.inner.state.borrow();
            let rec = state.nodes.get(&id).ok_or(GraphError::NotFound("node"))?;
            let mut found = None;
            for (eidx, meta) in state.catalog.edges.iter().enumerate() {
                if meta.name == edge
                    && meta.target == rec.ty
                    && matches!(meta.kind, EdgeKind::Forward { .. })
                {
                    found = Some(EdgeDefId(eidx as u32));
                    break;
                }
            }
            let fwd = found.ok_or_else(|| GraphError::UnknownEdge(edge.to_string()))?;
            let rev = state.catalog.reverse_of(fwd);
            edge_ops::slot_targets(&state, id, rev)
        };
        Ok(self.handles(ids))
    }

    /// True when `src --edge--> tgt` (or the reverse pairing) exists.
    pub fn has_edge(&self, src: NodeId, edge: &str, tgt: NodeId) -> Result<bool> {
        let state = self.inner.state.borrow();
        let eid = self.resolve_edge_on(&state, src, edge)?;
        Ok(edge_ops::slot_contains(&state, src, eid, tgt))
    }

    /// Targets of `(id, edge)` through an optional covering-index window.
    ///
    /// `index` picks an explicit edge index by position; `filters` select a
    /// window (requiring a covering index); `offset` skips leading results.
    pub fn targets_iter(
        &self,
        id: NodeId,
        edge: &str,
        offset: usize,
        index: Option<usize>,
        filters: Option<Vec<Filter>>,
    ) -> Result<Vec<NodeHandle>> {
        let ids = {
            let state = self.inner.state.borrow();
            let cat = state.catalog.clone();
            let eid = self.resolve_edge_on(&state, id, edge)?;
            let compiled = match &filters {
                Some(fs) => cat.compile_filters(cat.edge(eid).target, fs)?,
                None => Vec::new(),
            };
            if compiled.is_empty() && index.is_none() {
                edge_ops::slot_targets(&state, id, eid)
            } else {
                let fields = cat.edge_index_fields(eid);
                let candidates: Vec<&[(PropId, Dir)]> = match index {
                    Some(i) => {
                        let f = fields.get(i).ok_or_else(|| {
                            GraphError::InvalidArgument(format!("edge {edge} has no index {i}"))
                        })?;
                        vec![f.as_slice()]
                    }
                    None => fields.iter().map(|f| f.as_slice()).collect(),
                };
                let mut query = planner::plan(candidates, &compiled, None).ok_or_else(|| {
                    GraphError::NoCoveringIndex(cat.render_filters(cat.edge(eid).target, &compiled))
                })?;
                if let Some(i) = index {
                    query.index_no = i;
                }
                index_ops::edge_window(&state, id, eid, &query)
            }
        };
        Ok(self.handles(ids.into_iter().skip(offset).collect()))
    }

    /// Subscribes to every property change of one node.
    pub fn watch(
        &self,
        id: NodeId,
        cb: impl FnMut(&NodeHandle, &str, &Value, &Value) + 'static,
    ) -> Subscription {
        let cb: Rc<RefCell<crate::store::WatchFn>> = Rc::new(RefCell::new(cb));
        let sid = {
            let mut state = self.inner.state.borrow_mut();
            let sid = state.next_sub_id();
            state
                .subs
                .watchers
                .entry(id)
                .or_default()
                .push(WatchSub { id: sid, cb });
            sid
        };
        Subscription::store(Rc::downgrade(&self.inner), SubKind::Watch(id), sid)
    }

    /// Creates a virtualized view. Fails when the root filters or any edge
    /// config lack a covering index.
    pub fn view(&self, spec: ViewSpec) -> Result<View> {
        let mut q = Dispatch::new();
        let core_rc;
        {
            let mut guard = self.inner.state.borrow_mut();
            let state = &mut *guard;
            let cat = state.catalog.clone();
            let ty = cat
                .type_id(&spec.type_name)
                .ok_or_else(|| GraphError::UnknownType(spec.type_name.clone()))?;
            let filters = cat.compile_filters(ty, &spec.filters)?;
            let fields: Vec<Vec<(PropId, Dir)>> = cat
                .type_meta(ty)
                .indexes
                .iter()
                .map(|i| i.fields.clone())
                .collect();
            let root_query = planner::plan(fields.iter().map(|f| f.as_slice()), &filters, None)
                .ok_or_else(|| GraphError::NoCoveringIndex(cat.render_filters(ty, &filters)))?;
            let root_cfg = config::compile_tree(&cat, ty, &spec.edges)?;

            let vid = state.next_view;
            state.next_view += 1;
            let mut next_cb = 1u64;
            let cbs = spec.hooks.into_callbacks(&mut next_cb);
            core_rc = Rc::new(RefCell::new(ViewCore::new(
                vid,
                ty,
                filters,
                root_query,
                root_cfg,
                spec.offset,
                spec.limit,
                cbs,
                next_cb,
            )));
            state.views.push((vid, Rc::downgrade(&core_rc)));

            let mut core = core_rc.borrow_mut();
            let mut roots = Vec::new();
            index_ops::type_scan(state, ty, &core.root_query, |id| {
                roots.push(id);
                ControlFlow::Continue(())
            });
            for r in roots {
                core.enter_root(&self.inner, state, &mut q, r);
            }
            core.initializing = false;
        }
        q.run();
        Ok(View {
            core: core_rc,
            graph: self.inner.clone(),
        })
    }

    /// Total number of live nodes.
    pub fn node_count(&self) -> usize {
        self.inner.state.borrow().nodes.len()
    }

    /// Number of live nodes of one type.
    pub fn type_count(&self, type_name: &str) -> Result<usize> {
        let state = self.inner.state.borrow();
        let ty = state
            .catalog
            .type_id(type_name)
            .ok_or_else(|| GraphError::UnknownType(type_name.to_string()))?;
        Ok(state.type_counts[ty.idx()])
    }

    fn handles(&self, ids: Vec<NodeId>) -> Vec<NodeHandle> {
        ids.into_iter()
            .map(|id| NodeHandle::from_shared(self.inner.clone(), id))
            .collect()
    }
}

/// Handle to one node. Property access yields [`Signal`]s, edge access
/// yields [`EdgeHandle`]s (real or derived).
#[derive(Clone)]
pub struct NodeHandle {
    graph: Rc<GraphShared>,
    id: NodeId,
}

impl std::fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeHandle").field("id", &self.id).finish()
    }
}

impl NodeHandle {
    pub(crate) fn from_shared(graph: Rc<GraphShared>, id: NodeId) -> Self {
        Self { graph, id }
    }

    /// Node id.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Type name; `None` once the node is deleted.
    pub fn type_name(&self) -> Option<String> {
        let state = self.graph.state.borrow();
        state
            .nodes
            .get(&self.id)
            .map(|r| state.catalog.type_name(r.ty).to_string())
    }

    /// True while the node is live.
    pub fn exists(&self) -> bool {
        self.graph.state.borrow().nodes.contains_key(&self.id)
    }

    /// Signal over one property. Unknown names return a nil-reading,
    /// unwritable signal; rollup outputs return a read-only signal.
    pub fn prop(&self, name: &str) -> Signal {
        let state = self.graph.state.borrow();
        let resolved = state.nodes.get(&self.id).and_then(|rec| {
            state
                .catalog
                .prop_id(rec.ty, name)
                .map(|p| (p, state.catalog.type_meta(rec.ty).props[p.idx()].rollup.is_some()))
        });
        drop(state);
        match resolved {
            Some((p, read_only)) => Signal::new(
                self.graph.clone(),
                self.id,
                Some(p),
                name.to_string(),
                read_only,
            ),
            None => Signal::new(self.graph.clone(), self.id, None, name.to_string(), true),
        }
    }

    /// Edge handle by public name (forward, declared reverse, or derived).
    pub fn edge(&self, name: &str) -> Result<EdgeHandle> {
        let state = self.graph.state.borrow();
        let rec = state
            .nodes
            .get(&self.id)
            .ok_or(GraphError::NotFound("node"))?;
        let eid = state
            .catalog
            .edge_id(rec.ty, name)
            .ok_or_else(|| GraphError::UnknownEdge(name.to_string()))?;
        drop(state);
        Ok(EdgeHandle::new(
            self.graph.clone(),
            self.id,
            eid,
            name.to_string(),
        ))
    }

    /// Reference-rollup handle by rollup name.
    pub fn reference(&self, name: &str) -> Result<RefHandle> {
        let state = self.graph.state.borrow();
        let rec = state
            .nodes
            .get(&self.id)
            .ok_or(GraphError::NotFound("node"))?;
        let eid = state
            .catalog
            .edge_id(rec.ty, name)
            .ok_or_else(|| GraphError::UnknownEdge(name.to_string()))?;
        let EdgeKind::Derived { rollup } = state.catalog.edge(eid).kind else {
            return Err(GraphError::InvalidArgument(format!(
                "{name} is not a reference rollup"
            )));
        };
        if state.catalog.rollup(rollup).kind != RollupKind::Reference {
            return Err(GraphError::InvalidArgument(format!(
                "{name} is not a reference rollup"
            )));
        }
        drop(state);
        Ok(RefHandle::new(self.graph.clone(), self.id, rollup))
    }

    /// Subscribes to every property change of this node.
    pub fn watch(
        &self,
        cb: impl FnMut(&NodeHandle, &str, &Value, &Value) + 'static,
    ) -> Subscription {
        Graph {
            inner: self.graph.clone(),
        }
        .watch(self.id, cb)
    }
}

/// View construction parameters.
pub struct ViewSpec {
    type_name: String,
    filters: Vec<Filter>,
    edges: Vec<(String, EdgeConfig)>,
    offset: usize,
    limit: Option<usize>,
    hooks: ViewHooks,
}

impl ViewSpec {
    /// View over all nodes of `type_name`.
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            filters: Vec::new(),
            edges: Vec::new(),
            offset: 0,
            limit: None,
            hooks: ViewHooks::default(),
        }
    }

    /// Adds a root filter.
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Replaces the root filters.
    pub fn filters(mut self, filters: Vec<Filter>) -> Self {
        self.filters = filters;
        self
    }

    /// Adds an edge configuration.
    pub fn edge(mut self, name: impl Into<String>, cfg: EdgeConfig) -> Self {
        self.edges.push((name.into(), cfg));
        self
    }

    /// Sets the viewport offset.
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Sets the viewport size.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Constructor-time `on_enter` callback.
    pub fn on_enter(
        mut self,
        cb: impl FnMut(&NodeHandle, usize, Option<&str>, Option<NodeId>) + 'static,
    ) -> Self {
        self.hooks.enter = Some(Rc::new(RefCell::new(cb)));
        self
    }

    /// Constructor-time `on_leave` callback.
    pub fn on_leave(
        mut self,
        cb: impl FnMut(&NodeHandle, Option<&str>, Option<NodeId>) + 'static,
    ) -> Self {
        self.hooks.leave = Some(Rc::new(RefCell::new(cb)));
        self
    }

    /// Constructor-time `on_change` callback.
    pub fn on_change(
        mut self,
        cb: impl FnMut(&NodeHandle, &str, &Value, &Value) + 'static,
    ) -> Self {
        self.hooks.change = Some(Rc::new(RefCell::new(cb)));
        self
    }

    /// Constructor-time `on_expand` callback.
    pub fn on_expand(
        mut self,
        cb: impl FnMut(&NodeHandle, &str, &ExpandMeta) + 'static,
    ) -> Self {
        self.hooks.expand = Some(Rc::new(RefCell::new(cb)));
        self
    }

    /// Constructor-time `on_collapse` callback.
    pub fn on_collapse(
        mut self,
        cb: impl FnMut(&NodeHandle, &str, &ExpandMeta) + 'static,
    ) -> Self {
        self.hooks.collapse = Some(Rc::new(RefCell::new(cb)));
        self
    }
}
