//! Deferred callback dispatch.
//!
//! Mutations queue user callbacks while the store is mutably borrowed and
//! run them afterwards, in pipeline order: view hooks, edge subscribers
//! (forward then reverse), per-node subscribers. Each callback runs inside a
//! panic barrier; a panic is logged and the rest of the queue still runs.
//! Subscriber lists are snapshotted before queueing, so a callback that
//! unsubscribes a later entry does not skip it for the in-flight event.

use super::{GraphShared, StoreState};
use crate::graph::NodeHandle;
use crate::model::Value;
use crate::types::{EdgeDefId, NodeId, PropId, RollupId};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;
use tracing::error;

pub(crate) struct Dispatch {
    queue: Vec<Box<dyn FnOnce()>>,
}

impl Dispatch {
    pub fn new() -> Self {
        Self { queue: Vec::new() }
    }

    pub fn push(&mut self, f: impl FnOnce() + 'static) {
        self.queue.push(Box::new(f));
    }

    /// Runs every queued callback under a panic barrier.
    pub fn run(self) {
        for f in self.queue {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(f)) {
                let msg = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic".to_string());
                error!(error = %msg, "store.callback.panicked");
            }
        }
    }
}

fn handle(g: &Rc<GraphShared>, id: NodeId) -> NodeHandle {
    NodeHandle::from_shared(g.clone(), id)
}

/// Queues `use_` effects registered on `(id, prop)`.
pub(crate) fn queue_signal_subs(
    state: &StoreState,
    q: &mut Dispatch,
    id: NodeId,
    prop: PropId,
    old: &Value,
    new: &Value,
) {
    let Some(subs) = state.subs.signals.get(&(id, prop)) else {
        return;
    };
    for sub in subs {
        let effect = sub.effect.clone();
        let cleanup = sub.cleanup.clone();
        let (old, new) = (old.clone(), new.clone());
        q.push(move || {
            let previous = cleanup.borrow_mut().take();
            if let Some(c) = previous {
                c();
            }
            match effect.try_borrow_mut() {
                Ok(mut f) => {
                    let next = f(&new, &old);
                    *cleanup.borrow_mut() = next;
                }
                Err(_) => error!("store.signal.reentrant_effect_skipped"),
            }
        });
    }
}

/// Queues `watch` callbacks registered on `id`.
pub(crate) fn queue_watchers(
    state: &StoreState,
    g: &Rc<GraphShared>,
    q: &mut Dispatch,
    id: NodeId,
    name: &str,
    old: &Value,
    new: &Value,
) {
    let Some(subs) = state.subs.watchers.get(&id) else {
        return;
    };
    let name = name.to_string();
    for sub in subs {
        let cb = sub.cb.clone();
        let g = g.clone();
        let (old, new) = (old.clone(), new.clone());
        let name = name.clone();
        q.push(move || {
            let node = handle(&g, id);
            match cb.try_borrow_mut() {
                Ok(mut f) => f(&node, &name, &new, &old),
                Err(_) => error!("store.watch.reentrant_callback_skipped"),
            }
        });
    }
}

/// Queues edge subscribers for a link or unlink on one side of an edge.
/// `owner` is the subscription key side; `other` is delivered to callbacks.
pub(crate) fn queue_edge_side(
    state: &StoreState,
    g: &Rc<GraphShared>,
    q: &mut Dispatch,
    owner: NodeId,
    edge: EdgeDefId,
    other: NodeId,
    is_link: bool,
) {
    let table = if is_link {
        &state.subs.on_link
    } else {
        &state.subs.on_unlink
    };
    if let Some(subs) = table.get(&(owner, edge)) {
        for sub in subs {
            let cb = sub.cb.clone();
            let g = g.clone();
            q.push(move || {
                let node = handle(&g, other);
                match cb.try_borrow_mut() {
                    Ok(mut f) => f(&node),
                    Err(_) => error!("store.edge.reentrant_callback_skipped"),
                }
            });
        }
    }

    if let Some(subs) = state.subs.each.get(&(owner, edge)) {
        for sub in subs {
            if is_link && !state.eval_filters(other, &sub.filters, None) {
                continue;
            }
            let effect = sub.effect.clone();
            let cleanups = sub.cleanups.clone();
            let g = g.clone();
            q.push(move || {
                if is_link {
                    let node = handle(&g, other);
                    match effect.try_borrow_mut() {
                        Ok(mut f) => {
                            if let Some(c) = f(&node) {
                                cleanups.borrow_mut().insert(other, c);
                            }
                        }
                        Err(_) => error!("store.each.reentrant_effect_skipped"),
                    }
                } else {
                    // Drop the map borrow before the cleanup runs; it may
                    // re-enter the engine.
                    let cleanup = cleanups.borrow_mut().remove(&other);
                    if let Some(c) = cleanup {
                        c();
                    }
                }
            });
        }
    }
}

/// Queues coalesced reference-rollup change effects.
pub(crate) fn queue_ref_subs(
    state: &StoreState,
    g: &Rc<GraphShared>,
    q: &mut Dispatch,
    owner: NodeId,
    rollup: RollupId,
    old: Option<NodeId>,
    new: Option<NodeId>,
) {
    let Some(subs) = state.subs.refs.get(&(owner, rollup)) else {
        return;
    };
    for sub in subs {
        let effect = sub.effect.clone();
        let cleanup = sub.cleanup.clone();
        let g = g.clone();
        q.push(move || {
            let previous = cleanup.borrow_mut().take();
            if let Some(c) = previous {
                c();
            }
            match effect.try_borrow_mut() {
                Ok(mut f) => {
                    let new_h = new.map(|id| handle(&g, id));
                    let old_h = old.map(|id| handle(&g, id));
                    let next = f(new_h.as_ref(), old_h.as_ref());
                    *cleanup.borrow_mut() = next;
                }
                Err(_) => error!("store.reference.reentrant_effect_skipped"),
            }
        });
    }
}
