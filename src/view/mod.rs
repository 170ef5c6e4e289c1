//! Virtualized, expandable tree views.
//!
//! A view projects the nodes of one type (under root filters) plus a sparse
//! set of expanded edges into a flat, positioned sequence. Only expansion
//! metadata is stored: counts per `(path, edge)`, per-path subtree sizes,
//! and ref-counted node watchers. Absolute positions are resolved on demand
//! by walking roots and expanded children, skipping whole subtrees by their
//! recorded size.

pub(crate) mod config;
pub(crate) mod path;
pub(crate) mod walk;

pub use config::{EdgeConfig, FlagSpec, NodeProps};

use crate::graph::NodeHandle;
use crate::index::planner::IndexQuery;
use crate::model::Value;
use crate::schema::CompiledFilter;
use crate::store::{edge_ops, Dispatch, GraphShared, StoreState};
use crate::types::{EdgeDefId, NodeId, PropId, SubId, TypeId};
use config::EdgeCfg;
use rustc_hash::{FxHashMap, FxHashSet};
use std::cell::RefCell;
use std::rc::Rc;
use tracing::error;

/// Metadata delivered to `on_expand` / `on_collapse` callbacks.
#[derive(Debug, Clone)]
pub struct ExpandMeta {
    /// True when the expansion came from an eager flag rather than a call.
    pub eager: bool,
    /// Path key of the expanded parent occurrence.
    pub path_key: String,
    /// True when the expanded edge is inline at this parent.
    pub inline: bool,
}

/// `on_enter` callback: `(node, depth, edge, parent)`.
pub type EnterCallback = dyn FnMut(&NodeHandle, usize, Option<&str>, Option<NodeId>);
/// `on_leave` callback: `(node, edge, parent)`.
pub type LeaveCallback = dyn FnMut(&NodeHandle, Option<&str>, Option<NodeId>);
/// `on_change` callback: `(node, prop, new, old)`, fired once per visible path.
pub type ChangeCallback = dyn FnMut(&NodeHandle, &str, &Value, &Value);
/// `on_expand` / `on_collapse` callback: `(parent, edge, meta)`.
pub type ExpandCallback = dyn FnMut(&NodeHandle, &str, &ExpandMeta);

#[derive(Default)]
pub(crate) struct ViewCallbacks {
    pub enter: Vec<(SubId, Rc<RefCell<EnterCallback>>)>,
    pub leave: Vec<(SubId, Rc<RefCell<LeaveCallback>>)>,
    pub change: Vec<(SubId, Rc<RefCell<ChangeCallback>>)>,
    pub expand: Vec<(SubId, Rc<RefCell<ExpandCallback>>)>,
    pub collapse: Vec<(SubId, Rc<RefCell<ExpandCallback>>)>,
}

/// One expanded `(path, edge)` entry.
pub(crate) struct Expansion {
    /// Children counted under the cursor (skip/take) window.
    pub count: usize,
    /// Inline resolution at expansion time.
    pub inline: bool,
    pub cfg: Option<Rc<EdgeCfg>>,
}

pub(crate) struct ViewCore {
    pub id: u64,
    pub ty: TypeId,
    pub filters: Vec<CompiledFilter>,
    pub root_query: IndexQuery,
    pub root_cfg: FxHashMap<EdgeDefId, Rc<EdgeCfg>>,
    pub offset: usize,
    pub limit: Option<usize>,
    pub cbs: ViewCallbacks,
    /// `expansions[path][edge]`, sparse.
    pub expansions: FxHashMap<String, FxHashMap<EdgeDefId, Expansion>>,
    /// Terminal node id -> paths present in `expansions`.
    pub tails: FxHashMap<NodeId, FxHashSet<String>>,
    /// Per-path visible descendant count (path itself excluded).
    pub subtree: FxHashMap<String, usize>,
    /// Sum of non-inline expansion counts.
    pub expansion_size: usize,
    pub root_count: usize,
    /// Ref count = number of distinct visible paths of the node.
    pub node_watchers: FxHashMap<NodeId, usize>,
    pub initializing: bool,
    pub destroyed: bool,
    next_cb: u64,
}

impl ViewCore {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: u64,
        ty: TypeId,
        filters: Vec<CompiledFilter>,
        root_query: IndexQuery,
        root_cfg: FxHashMap<EdgeDefId, Rc<EdgeCfg>>,
        offset: usize,
        limit: Option<usize>,
        cbs: ViewCallbacks,
        next_cb: u64,
    ) -> Self {
        Self {
            id,
            ty,
            filters,
            root_query,
            root_cfg,
            offset,
            limit,
            cbs,
            expansions: FxHashMap::default(),
            tails: FxHashMap::default(),
            subtree: FxHashMap::default(),
            expansion_size: 0,
            root_count: 0,
            node_watchers: FxHashMap::default(),
            initializing: true,
            destroyed: false,
            next_cb,
        }
    }

    pub fn visible_total(&self) -> usize {
        self.root_count + self.expansion_size
    }

    pub fn next_cb_id(&mut self) -> SubId {
        let id = SubId(self.next_cb);
        self.next_cb += 1;
        id
    }

    /// Visible depth of the occurrence at `path`: non-inline steps along the
    /// ancestor chain (inline edges keep the parent's depth).
    pub fn visible_depth(&self, st: &StoreState, path_key: &str) -> usize {
        let cat = &st.catalog;
        let mut ty = self.ty;
        let mut depth = 0;
        let prefixes = path::prefixes(path_key);
        for (i, name) in path::edge_names(path_key).into_iter().enumerate() {
            let Some(eid) = cat.edge_id(ty, name) else {
                break;
            };
            let inline = self
                .expansions
                .get(prefixes[i].as_str())
                .and_then(|m| m.get(&eid))
                .map(|e| e.inline)
                .unwrap_or(false);
            if !inline {
                depth += 1;
            }
            ty = cat.edge(eid).target;
        }
        depth
    }

    fn bump_sizes(&mut self, path_key: &str, delta: isize) {
        if delta == 0 {
            return;
        }
        for prefix in path::prefixes(path_key) {
            let left = {
                let entry = self.subtree.entry(prefix.clone()).or_insert(0);
                *entry = (*entry as isize + delta).max(0) as usize;
                *entry
            };
            if left == 0 {
                self.subtree.remove(&prefix);
            }
        }
    }

    fn watch_inc(&mut self, id: NodeId) {
        *self.node_watchers.entry(id).or_insert(0) += 1;
    }

    fn watch_dec(&mut self, id: NodeId) {
        if let Some(rc) = self.node_watchers.get_mut(&id) {
            *rc -= 1;
            if *rc == 0 {
                self.node_watchers.remove(&id);
            }
        }
    }

    /// Children selected by the edge config cursor at one parent.
    pub(crate) fn selection(
        &self,
        st: &StoreState,
        parent: NodeId,
        edge: EdgeDefId,
        cfg: Option<&Rc<EdgeCfg>>,
    ) -> Vec<NodeId> {
        let base = edge_ops::children(st, parent, edge, cfg.and_then(|c| c.query.as_ref()));
        let (skip, take) = match cfg {
            Some(c) => (c.skip, c.take),
            None => (0, None),
        };
        let start = skip.min(base.len());
        let end = match take {
            Some(t) => (start + t).min(base.len()),
            None => base.len(),
        };
        base[start..end].to_vec()
    }

    /// Resolves the effective config for expanding `edge` at `path`,
    /// honoring `recursive` flags on ancestors.
    pub(crate) fn resolve_cfg(
        &self,
        st: &StoreState,
        path_key: &str,
        edge: EdgeDefId,
    ) -> Option<Rc<EdgeCfg>> {
        let cat = &st.catalog;
        let mut ty = self.ty;
        let mut chain: Vec<Rc<EdgeCfg>> = Vec::new();
        let mut cursor: Option<Rc<EdgeCfg>> = None;
        let mut at_root = true;
        for name in path::edge_names(path_key) {
            let eid = cat.edge_id(ty, name)?;
            let from_map = if at_root {
                self.root_cfg.get(&eid).cloned()
            } else {
                cursor.as_ref().and_then(|c| c.children.get(&eid).cloned())
            };
            let next = from_map.or_else(|| {
                chain
                    .iter()
                    .rev()
                    .find(|c| c.edge == eid && c.recursive)
                    .cloned()
            });
            if let Some(c) = &next {
                chain.push(c.clone());
            }
            cursor = next;
            at_root = false;
            ty = cat.edge(eid).target;
        }
        let from_map = if at_root {
            self.root_cfg.get(&edge).cloned()
        } else {
            cursor.as_ref().and_then(|c| c.children.get(&edge).cloned())
        };
        from_map.or_else(|| {
            chain
                .iter()
                .rev()
                .find(|c| c.edge == edge && c.recursive)
                .cloned()
        })
    }

    // ---- callback queueing -------------------------------------------------

    fn queue_enter(
        &self,
        g: &Rc<GraphShared>,
        q: &mut Dispatch,
        id: NodeId,
        depth: usize,
        edge: Option<String>,
        parent: Option<NodeId>,
    ) {
        for (_, cb) in &self.cbs.enter {
            let cb = cb.clone();
            let g = g.clone();
            let edge = edge.clone();
            q.push(move || {
                let node = NodeHandle::from_shared(g, id);
                match cb.try_borrow_mut() {
                    Ok(mut f) => f(&node, depth, edge.as_deref(), parent),
                    Err(_) => error!("view.enter.reentrant_callback_skipped"),
                }
            });
        }
    }

    fn queue_leave(
        &self,
        g: &Rc<GraphShared>,
        q: &mut Dispatch,
        id: NodeId,
        edge: Option<String>,
        parent: Option<NodeId>,
    ) {
        for (_, cb) in &self.cbs.leave {
            let cb = cb.clone();
            let g = g.clone();
            let edge = edge.clone();
            q.push(move || {
                let node = NodeHandle::from_shared(g, id);
                match cb.try_borrow_mut() {
                    Ok(mut f) => f(&node, edge.as_deref(), parent),
                    Err(_) => error!("view.leave.reentrant_callback_skipped"),
                }
            });
        }
    }

    fn queue_change(
        &self,
        g: &Rc<GraphShared>,
        q: &mut Dispatch,
        id: NodeId,
        name: &str,
        new: &Value,
        old: &Value,
    ) {
        for (_, cb) in &self.cbs.change {
            let cb = cb.clone();
            let g = g.clone();
            let name = name.to_string();
            let (new, old) = (new.clone(), old.clone());
            q.push(move || {
                let node = NodeHandle::from_shared(g, id);
                match cb.try_borrow_mut() {
                    Ok(mut f) => f(&node, &name, &new, &old),
                    Err(_) => error!("view.change.reentrant_callback_skipped"),
                }
            });
        }
    }

    fn queue_expansion_cb(
        &self,
        g: &Rc<GraphShared>,
        q: &mut Dispatch,
        collapse: bool,
        parent: NodeId,
        edge_name: &str,
        meta: ExpandMeta,
    ) {
        let list = if collapse {
            &self.cbs.collapse
        } else {
            &self.cbs.expand
        };
        for (_, cb) in list {
            let cb = cb.clone();
            let g = g.clone();
            let edge_name = edge_name.to_string();
            let meta = meta.clone();
            q.push(move || {
                let node = NodeHandle::from_shared(g, parent);
                match cb.try_borrow_mut() {
                    Ok(mut f) => f(&node, &edge_name, &meta),
                    Err(_) => error!("view.expand.reentrant_callback_skipped"),
                }
            });
        }
    }

    // ---- store event entry points -----------------------------------------

    pub fn on_insert(
        &mut self,
        g: &Rc<GraphShared>,
        st: &StoreState,
        q: &mut Dispatch,
        id: NodeId,
        ty: TypeId,
    ) {
        if self.destroyed || ty != self.ty {
            return;
        }
        if st.eval_filters(id, &self.filters, None) {
            self.enter_root(g, st, q, id);
        }
    }

    pub fn on_delete(
        &mut self,
        g: &Rc<GraphShared>,
        st: &StoreState,
        q: &mut Dispatch,
        id: NodeId,
        ty: TypeId,
    ) {
        if self.destroyed || ty != self.ty {
            return;
        }
        if st.eval_filters(id, &self.filters, None) {
            self.leave_root(g, st, q, id);
        }
    }

    pub fn on_prop_change(
        &mut self,
        g: &Rc<GraphShared>,
        st: &StoreState,
        q: &mut Dispatch,
        id: NodeId,
        ty: TypeId,
        prop: PropId,
        old: &Value,
        new: &Value,
    ) {
        if self.destroyed {
            return;
        }
        if let Some(&rc) = self.node_watchers.get(&id) {
            if !self.initializing && !self.cbs.change.is_empty() {
                let name = st.catalog.prop_name(ty, prop).to_string();
                for _ in 0..rc {
                    self.queue_change(g, q, id, &name, new, old);
                }
            }
        }
        if ty == self.ty && self.filters.iter().any(|f| f.prop == prop) {
            let was = st.eval_filters(id, &self.filters, Some((prop, old)));
            let is = st.eval_filters(id, &self.filters, None);
            if was && !is {
                self.leave_root(g, st, q, id);
            } else if !was && is {
                self.enter_root(g, st, q, id);
            }
        }
    }

    pub fn on_link(
        &mut self,
        g: &Rc<GraphShared>,
        st: &StoreState,
        q: &mut Dispatch,
        parent: NodeId,
        edge: EdgeDefId,
        child: NodeId,
    ) {
        if self.destroyed {
            return;
        }
        let Some(paths) = self.tails.get(&parent).cloned() else {
            return;
        };
        for p in paths {
            let Some(exp) = self.expansions.get(&p).and_then(|m| m.get(&edge)) else {
                continue;
            };
            let (old_count, inline, cfg) = (exp.count, exp.inline, exp.cfg.clone());
            if let Some(c) = &cfg {
                if !st.eval_filters(child, &c.filters, None) {
                    continue;
                }
            }
            let sel = self.selection(st, parent, edge, cfg.as_ref());
            let new_count = sel.len();
            if new_count <= old_count {
                continue;
            }
            let entrant = if sel.contains(&child) {
                child
            } else {
                *sel.last().expect("selection grew")
            };
            if let Some(e) = self.expansions.get_mut(&p).and_then(|m| m.get_mut(&edge)) {
                e.count = new_count;
            }
            if !inline {
                self.expansion_size += new_count - old_count;
                self.bump_sizes(&p, (new_count - old_count) as isize);
            }
            let edge_name = st.catalog.edge(edge).name.clone();
            let cp = path::child_path(&p, &edge_name, entrant);
            if !inline {
                self.watch_inc(entrant);
                let depth = self.visible_depth(st, &p) + 1;
                self.queue_enter(g, q, entrant, depth, Some(edge_name.clone()), Some(parent));
            }
            self.expand_eager_children(g, st, q, &cp, entrant);
        }
    }

    pub fn on_unlink(
        &mut self,
        g: &Rc<GraphShared>,
        st: &StoreState,
        q: &mut Dispatch,
        parent: NodeId,
        edge: EdgeDefId,
        child: NodeId,
    ) {
        if self.destroyed {
            return;
        }
        let Some(paths) = self.tails.get(&parent).cloned() else {
            return;
        };
        for p in paths {
            let Some(exp) = self.expansions.get(&p).and_then(|m| m.get(&edge)) else {
                continue;
            };
            let (old_count, inline, cfg) = (exp.count, exp.inline, exp.cfg.clone());
            let sel = self.selection(st, parent, edge, cfg.as_ref());
            let new_count = sel.len();
            if new_count >= old_count {
                continue;
            }
            let edge_name = st.catalog.edge(edge).name.clone();
            let cp = path::child_path(&p, &edge_name, child);
            self.collapse_subtree(g, st, q, &cp);
            if let Some(e) = self.expansions.get_mut(&p).and_then(|m| m.get_mut(&edge)) {
                e.count = new_count;
            }
            if !inline {
                self.expansion_size -= old_count - new_count;
                self.bump_sizes(&p, -((old_count - new_count) as isize));
                self.watch_dec(child);
                self.queue_leave(g, q, child, Some(edge_name), Some(parent));
            }
        }
    }

    // ---- root membership ---------------------------------------------------

    pub fn enter_root(
        &mut self,
        g: &Rc<GraphShared>,
        st: &StoreState,
        q: &mut Dispatch,
        id: NodeId,
    ) {
        self.root_count += 1;
        self.watch_inc(id);
        self.queue_enter(g, q, id, 0, None, None);
        let root_path = path::root_path(id);
        self.expand_eager_children(g, st, q, &root_path, id);
    }

    pub fn leave_root(
        &mut self,
        g: &Rc<GraphShared>,
        st: &StoreState,
        q: &mut Dispatch,
        id: NodeId,
    ) {
        let root_path = path::root_path(id);
        self.collapse_subtree(g, st, q, &root_path);
        self.root_count -= 1;
        self.watch_dec(id);
        self.queue_leave(g, q, id, None, None);
    }

    // ---- expansion ---------------------------------------------------------

    /// Expands `(path, edge)`. No-op (false) when already expanded or the
    /// parent is gone.
    pub fn expand_at(
        &mut self,
        g: &Rc<GraphShared>,
        st: &StoreState,
        q: &mut Dispatch,
        path_key: &str,
        edge: EdgeDefId,
        eager: bool,
    ) -> bool {
        if self.destroyed {
            return false;
        }
        if self
            .expansions
            .get(path_key)
            .is_some_and(|m| m.contains_key(&edge))
        {
            return false;
        }
        let parent = path::terminal_id(path_key);
        let Some(rec) = st.nodes.get(&parent) else {
            return false;
        };
        let cfg = self.resolve_cfg(st, path_key, edge);
        let inline = cfg.as_ref().is_some_and(|c| {
            c.inline.eval(&NodeProps {
                rec,
                cat: &st.catalog,
            })
        });
        let sel = self.selection(st, parent, edge, cfg.as_ref());
        let count = sel.len();
        let edge_name = st.catalog.edge(edge).name.clone();

        self.expansions
            .entry(path_key.to_string())
            .or_default()
            .insert(
                edge,
                Expansion {
                    count,
                    inline,
                    cfg: cfg.clone(),
                },
            );
        self.tails
            .entry(parent)
            .or_default()
            .insert(path_key.to_string());
        if !inline {
            self.expansion_size += count;
            self.bump_sizes(path_key, count as isize);
        }
        self.queue_expansion_cb(
            g,
            q,
            false,
            parent,
            &edge_name,
            ExpandMeta {
                eager,
                path_key: path_key.to_string(),
                inline,
            },
        );
        let base_depth = self.visible_depth(st, path_key);
        for child in sel {
            let cp = path::child_path(path_key, &edge_name, child);
            if !inline {
                self.watch_inc(child);
                self.queue_enter(g, q, child, base_depth + 1, Some(edge_name.clone()), Some(parent));
            }
            self.expand_eager_children(g, st, q, &cp, child);
        }
        true
    }

    /// Collapses `(path, edge)` and every descendant expansion under it.
    pub fn collapse_at(
        &mut self,
        g: &Rc<GraphShared>,
        st: &StoreState,
        q: &mut Dispatch,
        path_key: &str,
        edge: EdgeDefId,
    ) -> bool {
        let Some(exp) = self.expansions.get(path_key).and_then(|m| m.get(&edge)) else {
            return false;
        };
        let (count, inline, cfg) = (exp.count, exp.inline, exp.cfg.clone());
        let parent = path::terminal_id(path_key);
        let edge_name = st.catalog.edge(edge).name.clone();
        let sel = self.selection(st, parent, edge, cfg.as_ref());

        for child in &sel {
            let cp = path::child_path(path_key, &edge_name, *child);
            self.collapse_subtree(g, st, q, &cp);
        }
        for child in &sel {
            if !inline {
                self.queue_leave(g, q, *child, Some(edge_name.clone()), Some(parent));
                self.watch_dec(*child);
            }
        }
        self.queue_expansion_cb(
            g,
            q,
            true,
            parent,
            &edge_name,
            ExpandMeta {
                eager: false,
                path_key: path_key.to_string(),
                inline,
            },
        );

        if let Some(m) = self.expansions.get_mut(path_key) {
            m.remove(&edge);
            if m.is_empty() {
                self.expansions.remove(path_key);
                if let Some(t) = self.tails.get_mut(&parent) {
                    t.remove(path_key);
                    if t.is_empty() {
                        self.tails.remove(&parent);
                    }
                }
            }
        }
        if !inline {
            self.expansion_size -= count;
            self.bump_sizes(path_key, -(count as isize));
        }
        true
    }

    fn collapse_subtree(
        &mut self,
        g: &Rc<GraphShared>,
        st: &StoreState,
        q: &mut Dispatch,
        path_key: &str,
    ) {
        let Some(map) = self.expansions.get(path_key) else {
            return;
        };
        let mut edges: Vec<EdgeDefId> = map.keys().copied().collect();
        edges.sort();
        for e in edges {
            self.collapse_at(g, st, q, path_key, e);
        }
    }

    /// Expands every configured eager edge on one (newly visible) child.
    fn expand_eager_children(
        &mut self,
        g: &Rc<GraphShared>,
        st: &StoreState,
        q: &mut Dispatch,
        child_path: &str,
        child: NodeId,
    ) {
        let Some(rec) = st.nodes.get(&child) else {
            return;
        };
        let edge_ids: Vec<EdgeDefId> = st.catalog.type_meta(rec.ty).edges.clone();
        for eid in edge_ids {
            let Some(cfg) = self.resolve_cfg(st, child_path, eid) else {
                continue;
            };
            let eager = {
                let rec = &st.nodes[&child];
                cfg.eager.eval(&NodeProps {
                    rec,
                    cat: &st.catalog,
                })
            };
            if eager {
                self.expand_at(g, st, q, child_path, eid, true);
            }
        }
    }
}

mod surface;
pub use surface::{View, ViewItem};
pub(crate) use surface::ViewHooks;
