//! Reactive read wrappers and subscription handles.
//!
//! Handles are identified by `(node id, name)` and share store-owned
//! subscriber registries, so any two handles over the same key observe the
//! same subscription target. Subscriptions are cancelled exclusively through
//! [`Subscription::cancel`]; dropping a handle or subscription keeps the
//! callback alive.

mod edge_handle;
mod signal;

pub use edge_handle::EdgeHandle;
pub use signal::{RefHandle, Signal};

use crate::store::{Cleanup, GraphShared};
use crate::types::{EdgeDefId, NodeId, PropId, RollupId, SubId};
use crate::view::ViewCore;
use std::cell::RefCell;
use std::rc::Weak;

/// Store-side subscription registries a [`Subscription`] can point into.
pub(crate) enum SubKind {
    Signal(NodeId, PropId),
    Watch(NodeId),
    Link(NodeId, EdgeDefId),
    Unlink(NodeId, EdgeDefId),
    Each(NodeId, EdgeDefId),
    Ref(NodeId, RollupId),
}

/// View callback lists a [`Subscription`] can point into.
pub(crate) enum ViewCbKind {
    Enter,
    Leave,
    Change,
    Expand,
    Collapse,
}

enum SubInner {
    Store {
        graph: Weak<GraphShared>,
        kind: SubKind,
        id: SubId,
    },
    View {
        core: Weak<RefCell<ViewCore>>,
        kind: ViewCbKind,
        id: SubId,
    },
    Noop,
}

/// Cancellation handle returned by every subscription-creating call.
pub struct Subscription {
    inner: SubInner,
}

impl Subscription {
    pub(crate) fn store(graph: Weak<GraphShared>, kind: SubKind, id: SubId) -> Self {
        Self {
            inner: SubInner::Store { graph, kind, id },
        }
    }

    pub(crate) fn view(core: Weak<RefCell<ViewCore>>, kind: ViewCbKind, id: SubId) -> Self {
        Self {
            inner: SubInner::View { core, kind, id },
        }
    }

    /// Subscription that never fires (e.g. `use_` on an unknown property).
    pub(crate) fn noop() -> Self {
        Self {
            inner: SubInner::Noop,
        }
    }

    /// Removes the subscription and runs its final cleanup (for `use_` /
    /// `each` effects). Idempotent by construction: the handle is consumed.
    pub fn cancel(self) {
        match self.inner {
            SubInner::Noop => {}
            SubInner::View { core, kind, id } => {
                let Some(core) = core.upgrade() else {
                    return;
                };
                let mut core = core.borrow_mut();
                match kind {
                    ViewCbKind::Enter => core.cbs.enter.retain(|(sid, _)| *sid != id),
                    ViewCbKind::Leave => core.cbs.leave.retain(|(sid, _)| *sid != id),
                    ViewCbKind::Change => core.cbs.change.retain(|(sid, _)| *sid != id),
                    ViewCbKind::Expand => core.cbs.expand.retain(|(sid, _)| *sid != id),
                    ViewCbKind::Collapse => core.cbs.collapse.retain(|(sid, _)| *sid != id),
                }
            }
            SubInner::Store { graph, kind, id } => {
                let Some(graph) = graph.upgrade() else {
                    return;
                };
                // Final cleanups run after the registry borrow is released:
                // a cleanup may re-enter the engine.
                let mut pending: Vec<Cleanup> = Vec::new();
                {
                    let mut state = graph.state.borrow_mut();
                    match kind {
                        SubKind::Signal(node, prop) => {
                            if let Some(subs) = state.subs.signals.get_mut(&(node, prop)) {
                                if let Some(pos) = subs.iter().position(|s| s.id == id) {
                                    let sub = subs.remove(pos);
                                    if let Some(c) = sub.cleanup.borrow_mut().take() {
                                        pending.push(c);
                                    };
                                }
                            }
                        }
                        SubKind::Watch(node) => {
                            if let Some(subs) = state.subs.watchers.get_mut(&node) {
                                subs.retain(|s| s.id != id);
                            }
                        }
                        SubKind::Link(node, edge) => {
                            if let Some(subs) = state.subs.on_link.get_mut(&(node, edge)) {
                                subs.retain(|s| s.id != id);
                            }
                        }
                        SubKind::Unlink(node, edge) => {
                            if let Some(subs) = state.subs.on_unlink.get_mut(&(node, edge)) {
                                subs.retain(|s| s.id != id);
                            }
                        }
                        SubKind::Each(node, edge) => {
                            if let Some(subs) = state.subs.each.get_mut(&(node, edge)) {
                                if let Some(pos) = subs.iter().position(|s| s.id == id) {
                                    let sub = subs.remove(pos);
                                    let mut map = sub.cleanups.borrow_mut();
                                    pending.extend(map.drain().map(|(_, c)| c));
                                }
                            }
                        }
                        SubKind::Ref(node, rollup) => {
                            if let Some(subs) = state.subs.refs.get_mut(&(node, rollup)) {
                                if let Some(pos) = subs.iter().position(|s| s.id == id) {
                                    let sub = subs.remove(pos);
                                    if let Some(c) = sub.cleanup.borrow_mut().take() {
                                        pending.push(c);
                                    };
                                }
                            }
                        }
                    }
                }
                for c in pending {
                    c();
                }
            }
        }
    }
}
