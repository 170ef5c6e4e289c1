//! Edge handles: per-edge reads, mutation and subscriptions.

use super::{SubKind, Subscription};
use crate::error::{GraphError, Result};
use crate::graph::NodeHandle;
use crate::index::planner::{self, IndexQuery};
use crate::model::Value;
use crate::schema::catalog::EdgeKind;
use crate::schema::{CompiledFilter, Filter, Sort};
use crate::store::{edge_ops, Cleanup, EachSub, GraphShared, LinkSub};
use crate::types::{EdgeDefId, NodeId};
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::rc::Rc;

struct FilterSpec {
    filters: Rc<Vec<CompiledFilter>>,
    query: IndexQuery,
}

/// Reactive wrapper around one `(node, edge)` pair, real or derived.
///
/// A filtered handle (from [`filter`](EdgeHandle::filter)) reads through a
/// covering edge index; its subscriptions share the same store registry as
/// the unfiltered handle, so events fire no matter which access created
/// them.
pub struct EdgeHandle {
    graph: Rc<GraphShared>,
    node: NodeId,
    edge: EdgeDefId,
    name: String,
    filters: Option<FilterSpec>,
}

impl std::fmt::Debug for EdgeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EdgeHandle")
            .field("node", &self.node)
            .field("edge", &self.edge)
            .field("name", &self.name)
            .field("filtered", &self.filters.is_some())
            .finish()
    }
}

impl EdgeHandle {
    pub(crate) fn new(graph: Rc<GraphShared>, node: NodeId, edge: EdgeDefId, name: String) -> Self {
        Self {
            graph,
            node,
            edge,
            name,
            filters: None,
        }
    }

    /// Edge name this handle wraps.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Target ids in the handle's order: chosen-index order when filtered,
    /// stored order otherwise.
    pub fn ids(&self) -> Vec<NodeId> {
        let state = self.graph.state.borrow();
        match &self.filters {
            Some(spec) => edge_ops::children(&state, self.node, self.edge, Some(&spec.query)),
            None => edge_ops::slot_targets(&state, self.node, self.edge),
        }
    }

    /// Target nodes in the handle's order. The sequence is materialized
    /// before return, so callers may mutate the graph while consuming it.
    pub fn iter(&self) -> impl Iterator<Item = NodeHandle> {
        let graph = self.graph.clone();
        self.ids()
            .into_iter()
            .map(move |id| NodeHandle::from_shared(graph.clone(), id))
            .collect::<Vec<_>>()
            .into_iter()
    }

    /// Stored target count for unfiltered handles, a linear count under the
    /// filter window otherwise.
    pub fn count(&self) -> usize {
        match &self.filters {
            Some(_) => self.ids().len(),
            None => {
                let state = self.graph.state.borrow();
                edge_ops::slot_len(&state, self.node, self.edge)
            }
        }
    }

    /// True when `other` is a current target.
    pub fn has(&self, other: NodeId) -> bool {
        let state = self.graph.state.borrow();
        edge_ops::slot_contains(&state, self.node, self.edge, other)
    }

    fn canonical(&self, other: NodeId) -> Result<(NodeId, EdgeDefId, NodeId)> {
        let state = self.graph.state.borrow();
        match &state.catalog.edge(self.edge).kind {
            EdgeKind::Forward { .. } => Ok((self.node, self.edge, other)),
            EdgeKind::Reverse { forward } => Ok((other, *forward, self.node)),
            EdgeKind::Derived { .. } => Err(GraphError::ReadOnlyEdge(self.name.clone())),
        }
    }

    /// Links `other` through this edge (either side of a reverse pair).
    pub fn link(&self, other: NodeId) -> Result<bool> {
        let (src, edge, tgt) = self.canonical(other)?;
        edge_ops::link_forward(&self.graph, src, edge, tgt)
    }

    /// Unlinks `other`.
    pub fn unlink(&self, other: NodeId) -> Result<bool> {
        let (src, edge, tgt) = self.canonical(other)?;
        edge_ops::unlink_forward(&self.graph, src, edge, tgt)
    }

    /// Subscribes to links arriving at this side of the edge; the callback
    /// receives the other endpoint.
    pub fn on_link(&self, cb: impl FnMut(&NodeHandle) + 'static) -> Subscription {
        self.subscribe_side(cb, true)
    }

    /// Subscribes to unlinks leaving this side of the edge.
    pub fn on_unlink(&self, cb: impl FnMut(&NodeHandle) + 'static) -> Subscription {
        self.subscribe_side(cb, false)
    }

    fn subscribe_side(
        &self,
        cb: impl FnMut(&NodeHandle) + 'static,
        link: bool,
    ) -> Subscription {
        let cb: Rc<RefCell<crate::store::LinkFn>> = Rc::new(RefCell::new(cb));
        let id = {
            let mut state = self.graph.state.borrow_mut();
            let id = state.next_sub_id();
            let table = if link {
                &mut state.subs.on_link
            } else {
                &mut state.subs.on_unlink
            };
            table
                .entry((self.node, self.edge))
                .or_default()
                .push(LinkSub { id, cb });
            id
        };
        let kind = if link {
            SubKind::Link(self.node, self.edge)
        } else {
            SubKind::Unlink(self.node, self.edge)
        };
        Subscription::store(Rc::downgrade(&self.graph), kind, id)
    }

    /// Runs `effect` for every currently-matching target and every future
    /// match; each target's cleanup runs when it unlinks and when the
    /// subscription is cancelled.
    pub fn each(
        &self,
        mut effect: impl FnMut(&NodeHandle) -> Option<Cleanup> + 'static,
    ) -> Subscription {
        let targets = self.ids();
        let cleanups: Rc<RefCell<FxHashMap<NodeId, Cleanup>>> =
            Rc::new(RefCell::new(FxHashMap::default()));
        for t in targets {
            let h = NodeHandle::from_shared(self.graph.clone(), t);
            if let Some(c) = effect(&h) {
                cleanups.borrow_mut().insert(t, c);
            }
        }
        let filters = self
            .filters
            .as_ref()
            .map(|f| f.filters.clone())
            .unwrap_or_else(|| Rc::new(Vec::new()));
        let effect: Rc<RefCell<crate::store::EachFn>> = Rc::new(RefCell::new(effect));
        let id = {
            let mut state = self.graph.state.borrow_mut();
            let id = state.next_sub_id();
            state
                .subs
                .each
                .entry((self.node, self.edge))
                .or_default()
                .push(EachSub {
                    id,
                    effect,
                    cleanups,
                    filters,
                });
            id
        };
        Subscription::store(
            Rc::downgrade(&self.graph),
            SubKind::Each(self.node, self.edge),
            id,
        )
    }

    /// Returns a filtered/sorted handle over the same edge. Fails when no
    /// edge index covers the filters and sort.
    pub fn filter(&self, filters: Vec<Filter>, sort: Option<Sort>) -> Result<EdgeHandle> {
        let state = self.graph.state.borrow();
        let cat = state.catalog.clone();
        let target = cat.edge(self.edge).target;
        let compiled = cat.compile_filters(target, &filters)?;
        let sort = sort.map(|s| cat.compile_sort(target, &s)).transpose()?;
        let fields = cat.edge_index_fields(self.edge);
        let query = planner::plan(fields.iter().map(|f| f.as_slice()), &compiled, sort)
            .ok_or_else(|| GraphError::NoCoveringIndex(cat.render_filters(target, &compiled)))?;
        drop(state);
        Ok(EdgeHandle {
            graph: self.graph.clone(),
            node: self.node,
            edge: self.edge,
            name: self.name.clone(),
            filters: Some(FilterSpec {
                filters: Rc::new(compiled),
                query,
            }),
        })
    }

    /// First target in the handle's order, if any.
    pub fn first(&self) -> Option<NodeHandle> {
        self.ids()
            .first()
            .map(|id| NodeHandle::from_shared(self.graph.clone(), *id))
    }

    /// Values of one target property across current targets, in order.
    /// Convenience for tests and probes.
    pub fn pluck(&self, prop: &str) -> Vec<Value> {
        self.iter().map(|n| n.prop(prop).get()).collect()
    }
}
