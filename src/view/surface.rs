//! Public view and item surface.

use super::walk::{self, OwnedItem};
use super::{path, ChangeCallback, EnterCallback, ExpandCallback, LeaveCallback, ViewCallbacks, ViewCore};
use crate::error::{GraphError, Result};
use crate::graph::NodeHandle;
use crate::model::Value;
use crate::reactive::{Subscription, ViewCbKind};
use crate::store::{Dispatch, GraphShared, StoreState};
use crate::types::{EdgeDefId, NodeId};
use std::cell::RefCell;
use std::rc::Rc;

/// Constructor-time callbacks passed with the view spec.
#[derive(Default)]
pub(crate) struct ViewHooks {
    pub enter: Option<Rc<RefCell<EnterCallback>>>,
    pub leave: Option<Rc<RefCell<LeaveCallback>>>,
    pub change: Option<Rc<RefCell<ChangeCallback>>>,
    pub expand: Option<Rc<RefCell<ExpandCallback>>>,
    pub collapse: Option<Rc<RefCell<ExpandCallback>>>,
}

impl ViewHooks {
    pub(crate) fn into_callbacks(self, core_next: &mut u64) -> ViewCallbacks {
        let mut cbs = ViewCallbacks::default();
        let mut next = || {
            let id = crate::types::SubId(*core_next);
            *core_next += 1;
            id
        };
        if let Some(cb) = self.enter {
            cbs.enter.push((next(), cb));
        }
        if let Some(cb) = self.leave {
            cbs.leave.push((next(), cb));
        }
        if let Some(cb) = self.change {
            cbs.change.push((next(), cb));
        }
        if let Some(cb) = self.expand {
            cbs.expand.push((next(), cb));
        }
        if let Some(cb) = self.collapse {
            cbs.collapse.push((next(), cb));
        }
        cbs
    }
}

fn resolve_edge(state: &StoreState, node: NodeId, edge: &str) -> Result<EdgeDefId> {
    let rec = state.nodes.get(&node).ok_or(GraphError::NotFound("node"))?;
    state
        .catalog
        .edge_id(rec.ty, edge)
        .ok_or_else(|| GraphError::UnknownEdge(edge.to_string()))
}

/// A live virtualized view. Destroy with [`View::destroy`]; dropping the
/// handle alone leaves the view subscribed.
pub struct View {
    pub(crate) core: Rc<RefCell<ViewCore>>,
    pub(crate) graph: Rc<GraphShared>,
}

impl std::fmt::Debug for View {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("View").finish_non_exhaustive()
    }
}

impl View {
    /// Number of visible roots.
    pub fn total(&self) -> usize {
        self.core.borrow().root_count
    }

    /// Roots plus all non-inline expanded children.
    pub fn visible_total(&self) -> usize {
        self.core.borrow().visible_total()
    }

    /// Items of the current viewport (`offset` / `limit`).
    pub fn items(&self) -> Vec<ViewItem> {
        let state = self.graph.state.borrow();
        let core = self.core.borrow();
        walk::collect_range(&core, &state, core.offset, core.limit)
            .into_iter()
            .map(|o| self.make_item(&state, o))
            .collect()
    }

    /// Every visible item, ignoring the viewport.
    pub fn collect(&self) -> Vec<ViewItem> {
        let state = self.graph.state.borrow();
        let core = self.core.borrow();
        walk::collect_range(&core, &state, 0, None)
            .into_iter()
            .map(|o| self.make_item(&state, o))
            .collect()
    }

    /// Item at an absolute virtual position; `None` past the end.
    pub fn seek(&self, pos: usize) -> Option<ViewItem> {
        let state = self.graph.state.borrow();
        let core = self.core.borrow();
        walk::collect_range(&core, &state, pos, Some(1))
            .into_iter()
            .next()
            .map(|o| self.make_item(&state, o))
    }

    /// Virtual position of the first visible occurrence of `id`.
    pub fn position_of(&self, id: NodeId) -> Option<usize> {
        let state = self.graph.state.borrow();
        let core = self.core.borrow();
        walk::position_of(&core, &state, id)
    }

    /// Moves the viewport offset. Resolution happens lazily at the next
    /// `items()` call; no callbacks fire.
    pub fn scroll(&self, offset: usize) {
        self.core.borrow_mut().offset = offset;
    }

    /// Expands `edge` under the first visible occurrence of `id` (walk
    /// order). Per-path targeting is available through [`ViewItem::expand`].
    pub fn expand(&self, id: NodeId, edge: &str) -> Result<bool> {
        let mut q = Dispatch::new();
        let ok = {
            let state = self.graph.state.borrow();
            let mut core = self.core.borrow_mut();
            let eid = resolve_edge(&state, id, edge)?;
            match walk::find_path_of(&core, &state, id) {
                Some(p) => core.expand_at(&self.graph, &state, &mut q, &p, eid, false),
                None => false,
            }
        };
        q.run();
        Ok(ok)
    }

    /// Collapses `edge` under the first visible occurrence of `id`.
    pub fn collapse(&self, id: NodeId, edge: &str) -> Result<bool> {
        let mut q = Dispatch::new();
        let ok = {
            let state = self.graph.state.borrow();
            let mut core = self.core.borrow_mut();
            let eid = resolve_edge(&state, id, edge)?;
            match walk::find_path_of(&core, &state, id) {
                Some(p) => core.collapse_at(&self.graph, &state, &mut q, &p, eid),
                None => false,
            }
        };
        q.run();
        Ok(ok)
    }

    /// Registers an additional `on_enter` callback.
    pub fn on_enter(
        &self,
        cb: impl FnMut(&NodeHandle, usize, Option<&str>, Option<NodeId>) + 'static,
    ) -> Subscription {
        let mut core = self.core.borrow_mut();
        let id = core.next_cb_id();
        core.cbs.enter.push((id, Rc::new(RefCell::new(cb))));
        Subscription::view(Rc::downgrade(&self.core), ViewCbKind::Enter, id)
    }

    /// Registers an additional `on_leave` callback.
    pub fn on_leave(
        &self,
        cb: impl FnMut(&NodeHandle, Option<&str>, Option<NodeId>) + 'static,
    ) -> Subscription {
        let mut core = self.core.borrow_mut();
        let id = core.next_cb_id();
        core.cbs.leave.push((id, Rc::new(RefCell::new(cb))));
        Subscription::view(Rc::downgrade(&self.core), ViewCbKind::Leave, id)
    }

    /// Registers an additional `on_change` callback.
    pub fn on_change(
        &self,
        cb: impl FnMut(&NodeHandle, &str, &Value, &Value) + 'static,
    ) -> Subscription {
        let mut core = self.core.borrow_mut();
        let id = core.next_cb_id();
        core.cbs.change.push((id, Rc::new(RefCell::new(cb))));
        Subscription::view(Rc::downgrade(&self.core), ViewCbKind::Change, id)
    }

    /// Registers an additional `on_expand` callback.
    pub fn on_expand(
        &self,
        cb: impl FnMut(&NodeHandle, &str, &super::ExpandMeta) + 'static,
    ) -> Subscription {
        let mut core = self.core.borrow_mut();
        let id = core.next_cb_id();
        core.cbs.expand.push((id, Rc::new(RefCell::new(cb))));
        Subscription::view(Rc::downgrade(&self.core), ViewCbKind::Expand, id)
    }

    /// Registers an additional `on_collapse` callback.
    pub fn on_collapse(
        &self,
        cb: impl FnMut(&NodeHandle, &str, &super::ExpandMeta) + 'static,
    ) -> Subscription {
        let mut core = self.core.borrow_mut();
        let id = core.next_cb_id();
        core.cbs.collapse.push((id, Rc::new(RefCell::new(cb))));
        Subscription::view(Rc::downgrade(&self.core), ViewCbKind::Collapse, id)
    }

    /// Tears the view down: drops all expansion state, watchers and
    /// callbacks, and removes it from the store's fan-out registry.
    pub fn destroy(&self) {
        let vid = {
            let mut core = self.core.borrow_mut();
            core.destroyed = true;
            core.expansions.clear();
            core.tails.clear();
            core.subtree.clear();
            core.node_watchers.clear();
            core.expansion_size = 0;
            core.root_count = 0;
            core.cbs = ViewCallbacks::default();
            core.id
        };
        let mut state = self.graph.state.borrow_mut();
        state.views.retain(|(id, _)| *id != vid);
    }

    fn make_item(&self, state: &StoreState, o: OwnedItem) -> ViewItem {
        ViewItem {
            graph: self.graph.clone(),
            core: self.core.clone(),
            id: o.id,
            depth: o.depth,
            edge: o.edge.map(|e| state.catalog.edge(e).name.clone()),
            parent: o.parent,
            path: o.path,
        }
    }
}

/// One visible occurrence of a node, addressable by its exact path.
pub struct ViewItem {
    graph: Rc<GraphShared>,
    core: Rc<RefCell<ViewCore>>,
    /// Node id at this position.
    pub id: NodeId,
    /// Visible depth (inline edges keep the parent's depth).
    pub depth: usize,
    /// Edge this occurrence hangs under; `None` for roots.
    pub edge: Option<String>,
    /// Parent node id; `None` for roots.
    pub parent: Option<NodeId>,
    path: String,
}

impl ViewItem {
    /// Handle for the node at this position.
    pub fn node(&self) -> NodeHandle {
        NodeHandle::from_shared(self.graph.clone(), self.id)
    }

    /// Path key of this exact occurrence.
    pub fn path_key(&self) -> &str {
        &self.path
    }

    /// True when `edge` is expanded at this occurrence.
    pub fn is_expanded(&self, edge: &str) -> bool {
        let state = self.graph.state.borrow();
        let core = self.core.borrow();
        let Ok(eid) = resolve_edge(&state, self.id, edge) else {
            return false;
        };
        core.expansions
            .get(&self.path)
            .is_some_and(|m| m.contains_key(&eid))
    }

    /// Children counted under the edge's cursor at this occurrence: the
    /// stored count when expanded, the would-be count otherwise.
    pub fn child_count(&self, edge: &str) -> usize {
        let state = self.graph.state.borrow();
        let core = self.core.borrow();
        let Ok(eid) = resolve_edge(&state, self.id, edge) else {
            return 0;
        };
        if let Some(exp) = core.expansions.get(&self.path).and_then(|m| m.get(&eid)) {
            return exp.count;
        }
        let cfg = core.resolve_cfg(&state, &self.path, eid);
        core.selection(&state, self.id, eid, cfg.as_ref()).len()
    }

    /// Expands `edge` at this exact occurrence.
    pub fn expand(&self, edge: &str) -> Result<bool> {
        let mut q = Dispatch::new();
        let ok = {
            let state = self.graph.state.borrow();
            let mut core = self.core.borrow_mut();
            let eid = resolve_edge(&state, self.id, edge)?;
            core.expand_at(&self.graph, &state, &mut q, &self.path, eid, false)
        };
        q.run();
        Ok(ok)
    }

    /// Collapses `edge` at this exact occurrence.
    pub fn collapse(&self, edge: &str) -> Result<bool> {
        let mut q = Dispatch::new();
        let ok = {
            let state = self.graph.state.borrow();
            let mut core = self.core.borrow_mut();
            let eid = resolve_edge(&state, self.id, edge)?;
            core.collapse_at(&self.graph, &state, &mut q, &self.path, eid)
        };
        q.run();
        Ok(ok)
    }

    /// Expands when collapsed and vice versa; returns the new state.
    pub fn toggle(&self, edge: &str) -> Result<bool> {
        if self.is_expanded(edge) {
            self.collapse(edge)?;
            Ok(false)
        } else {
            self.expand(edge)?;
            Ok(true)
        }
    }

    /// Structural depth of this item's path key (separator pairs).
    pub fn path_depth(&self) -> usize {
        path::depth(&self.path)
    }
}
