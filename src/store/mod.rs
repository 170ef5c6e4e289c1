//! Store core: node records, adjacency, indexes and subscriber registries.
//!
//! All engine state lives in one [`StoreState`] behind a `RefCell` on
//! [`GraphShared`]. A mutation mutably borrows the state, performs every
//! storage / index / rollup / view-bookkeeping update, then releases the
//! borrow and drains a dispatch queue of user callbacks. Callbacks may
//! re-enter the engine freely: a nested mutation takes its own borrow and
//! drains its own queue before returning.

use crate::index::SkipList;
use crate::index::keys::{self, KeyTuple};
use crate::model::Value;
use crate::schema::catalog::EdgeKind;
use crate::schema::{Catalog, CompiledFilter, Dir};
use crate::types::{EdgeDefId, NodeId, PropId, RollupId, SubId, TypeId};
use crate::view::ViewCore;
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

pub(crate) mod edge_ops;
pub(crate) mod events;
pub(crate) mod index_ops;
pub(crate) mod node_ops;

pub(crate) use events::Dispatch;

/// Cleanup closure returned by a `use_`/`each` effect.
pub type Cleanup = Box<dyn FnOnce()>;

pub(crate) type EffectFn = dyn FnMut(&Value, &Value) -> Option<Cleanup>;
pub(crate) type WatchFn = dyn FnMut(&crate::graph::NodeHandle, &str, &Value, &Value);
pub(crate) type LinkFn = dyn FnMut(&crate::graph::NodeHandle);
pub(crate) type EachFn = dyn FnMut(&crate::graph::NodeHandle) -> Option<Cleanup>;
pub(crate) type RefFn =
    dyn FnMut(Option<&crate::graph::NodeHandle>, Option<&crate::graph::NodeHandle>) -> Option<Cleanup>;

pub(crate) struct SignalSub {
    pub id: SubId,
    pub effect: Rc<RefCell<EffectFn>>,
    pub cleanup: Rc<RefCell<Option<Cleanup>>>,
}

pub(crate) struct WatchSub {
    pub id: SubId,
    pub cb: Rc<RefCell<WatchFn>>,
}

pub(crate) struct LinkSub {
    pub id: SubId,
    pub cb: Rc<RefCell<LinkFn>>,
}

pub(crate) struct EachSub {
    pub id: SubId,
    pub effect: Rc<RefCell<EachFn>>,
    pub cleanups: Rc<RefCell<FxHashMap<NodeId, Cleanup>>>,
    pub filters: Rc<Vec<CompiledFilter>>,
}

pub(crate) struct RefSub {
    pub id: SubId,
    pub effect: Rc<RefCell<RefFn>>,
    pub cleanup: Rc<RefCell<Option<Cleanup>>>,
}

/// User-subscription registries, keyed so that any two handles over the same
/// `(id, name)` share one subscription target.
#[derive(Default)]
pub(crate) struct Registries {
    pub signals: FxHashMap<(NodeId, PropId), Vec<SignalSub>>,
    pub watchers: FxHashMap<NodeId, Vec<WatchSub>>,
    pub on_link: FxHashMap<(NodeId, EdgeDefId), Vec<LinkSub>>,
    pub on_unlink: FxHashMap<(NodeId, EdgeDefId), Vec<LinkSub>>,
    pub each: FxHashMap<(NodeId, EdgeDefId), Vec<EachSub>>,
    pub refs: FxHashMap<(NodeId, RollupId), Vec<RefSub>>,
}

/// One node record: dense properties plus one target vector per edge slot
/// (forward, reverse and derived alike).
pub(crate) struct NodeRecord {
    pub ty: TypeId,
    pub props: Vec<Value>,
    pub edges: Vec<Vec<NodeId>>,
}

/// Type-index entry: denormalized field tuple plus the id tiebreaker.
pub(crate) struct TypeEntry {
    pub key: KeyTuple,
    pub id: NodeId,
}

/// Edge-index entry: parent, denormalized child field tuple, child.
pub(crate) struct EdgeEntry {
    pub parent: NodeId,
    pub key: KeyTuple,
    pub child: NodeId,
}

pub(crate) struct StoreState {
    pub catalog: Rc<Catalog>,
    pub next_id: u64,
    pub nodes: FxHashMap<NodeId, NodeRecord>,
    pub type_counts: Vec<usize>,
    /// `[type][index]` ordered sets over nodes of the type.
    pub type_indexes: Vec<Vec<SkipList<TypeEntry>>>,
    /// Ordered sets per indexed forward edge.
    pub edge_indexes: FxHashMap<EdgeDefId, Vec<SkipList<EdgeEntry>>>,
    pub subs: Registries,
    pub views: Vec<(u64, Weak<RefCell<ViewCore>>)>,
    pub next_sub: u64,
    pub next_view: u64,
}

/// Shared engine cell. Public handles hold an `Rc` to this.
pub(crate) struct GraphShared {
    pub state: RefCell<StoreState>,
}

impl StoreState {
    pub fn new(catalog: Rc<Catalog>) -> Self {
        let mut type_indexes = Vec::with_capacity(catalog.types.len());
        for ty in &catalog.types {
            let mut lists = Vec::with_capacity(ty.indexes.len());
            for idx in &ty.indexes {
                let dirs: Vec<Dir> = idx.fields.iter().map(|(_, d)| *d).collect();
                lists.push(SkipList::new(move |a: &TypeEntry, b: &TypeEntry| {
                    keys::cmp_entry(&a.key, a.id, &b.key, b.id, &dirs)
                }));
            }
            type_indexes.push(lists);
        }

        let mut edge_indexes: FxHashMap<EdgeDefId, Vec<SkipList<EdgeEntry>>> =
            FxHashMap::default();
        for (eid, edge) in catalog.edges.iter().enumerate() {
            if let EdgeKind::Forward { indexes, .. } = &edge.kind {
                if indexes.is_empty() {
                    continue;
                }
                let mut lists = Vec::with_capacity(indexes.len());
                for idx in indexes {
                    let dirs: Vec<Dir> = idx.fields.iter().map(|(_, d)| *d).collect();
                    lists.push(SkipList::new(move |a: &EdgeEntry, b: &EdgeEntry| {
                        a.parent.cmp(&b.parent).then_with(|| {
                            keys::cmp_entry(&a.key, a.child, &b.key, b.child, &dirs)
                        })
                    }));
                }
                edge_indexes.insert(EdgeDefId(eid as u32), lists);
            }
        }

        let type_counts = vec![0; catalog.types.len()];
        Self {
            catalog,
            next_id: 1,
            nodes: FxHashMap::default(),
            type_counts,
            type_indexes,
            edge_indexes,
            subs: Registries::default(),
            views: Vec::new(),
            next_sub: 1,
            next_view: 1,
        }
    }

    pub fn next_sub_id(&mut self) -> SubId {
        let id = SubId(self.next_sub);
        self.next_sub += 1;
        id
    }

    /// Live views, pruning dead weak entries as a side effect.
    pub fn live_views(&mut self) -> Vec<Rc<RefCell<ViewCore>>> {
        self.views.retain(|(_, w)| w.strong_count() > 0);
        self.views.iter().filter_map(|(_, w)| w.upgrade()).collect()
    }

    /// Current value of a property, with an optional substitution used to
    /// re-evaluate filters against a pre-change value.
    pub fn prop_value(&self, id: NodeId, prop: PropId, subst: Option<(PropId, &Value)>) -> Value {
        match subst {
            Some((p, v)) if p == prop => v.clone(),
            _ => self
                .nodes
                .get(&id)
                .map(|r| r.props[prop.idx()].clone())
                .unwrap_or(Value::Nil),
        }
    }

    /// Evaluates compiled filters against a node, substituting `subst` for
    /// one property when given.
    pub fn eval_filters(
        &self,
        id: NodeId,
        filters: &[CompiledFilter],
        subst: Option<(PropId, &Value)>,
    ) -> bool {
        filters
            .iter()
            .all(|f| f.matches(&self.prop_value(id, f.prop, subst)))
    }
}
