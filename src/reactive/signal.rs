//! Property signals and reference-rollup handles.

use super::{SubKind, Subscription};
use crate::error::{GraphError, Result};
use crate::graph::NodeHandle;
use crate::model::Value;
use crate::store::{node_ops, Cleanup, GraphShared, RefSub, SignalSub};
use crate::types::{NodeId, PropId, RollupId};
use std::cell::RefCell;
use std::rc::Rc;

/// Reactive wrapper around one `(node, property)` pair.
///
/// Rollup outputs read like any property but reject `set`; unknown property
/// names read as nil and reject `set` with `UnknownProperty`.
pub struct Signal {
    graph: Rc<GraphShared>,
    node: NodeId,
    prop: Option<PropId>,
    name: String,
    read_only: bool,
}

impl Signal {
    pub(crate) fn new(
        graph: Rc<GraphShared>,
        node: NodeId,
        prop: Option<PropId>,
        name: String,
        read_only: bool,
    ) -> Self {
        Self {
            graph,
            node,
            prop,
            name,
            read_only,
        }
    }

    /// Current value; nil for unknown properties or deleted nodes.
    pub fn get(&self) -> Value {
        let Some(prop) = self.prop else {
            return Value::Nil;
        };
        self.graph.state.borrow().prop_value(self.node, prop, None)
    }

    /// Writes the property through the full change pipeline.
    pub fn set(&self, value: impl Into<Value>) -> Result<()> {
        let Some(prop) = self.prop else {
            return Err(GraphError::UnknownProperty(self.name.clone()));
        };
        if self.read_only {
            return Err(GraphError::ReadOnlyProperty(self.name.clone()));
        }
        node_ops::apply_patch(&self.graph, self.node, vec![(prop, value.into())]);
        Ok(())
    }

    /// Runs `effect(new, old)` now (with `old = nil`) and on every change.
    /// The effect may return a cleanup which runs before the next invocation
    /// and when the subscription is cancelled.
    pub fn use_(
        &self,
        mut effect: impl FnMut(&Value, &Value) -> Option<Cleanup> + 'static,
    ) -> Subscription {
        let Some(prop) = self.prop else {
            // Unknown property: fire once with (nil, nil), never again.
            effect(&Value::Nil, &Value::Nil);
            return Subscription::noop();
        };
        let current = self.get();
        let cleanup = Rc::new(RefCell::new(effect(&current, &Value::Nil)));
        let effect = Rc::new(RefCell::new(effect));
        let id = {
            let mut state = self.graph.state.borrow_mut();
            let id = state.next_sub_id();
            state
                .subs
                .signals
                .entry((self.node, prop))
                .or_default()
                .push(SignalSub {
                    id,
                    effect,
                    cleanup,
                });
            id
        };
        Subscription::store(Rc::downgrade(&self.graph), SubKind::Signal(self.node, prop), id)
    }
}

/// Reactive wrapper around a reference rollup: at most one target node.
pub struct RefHandle {
    graph: Rc<GraphShared>,
    node: NodeId,
    rollup: RollupId,
}

impl RefHandle {
    pub(crate) fn new(graph: Rc<GraphShared>, node: NodeId, rollup: RollupId) -> Self {
        Self {
            graph,
            node,
            rollup,
        }
    }

    /// Current reference target.
    pub fn get(&self) -> Option<NodeHandle> {
        let state = self.graph.state.borrow();
        let r = state.catalog.rollup(self.rollup);
        let slot = state.catalog.edge(r.derived_edge.expect("derived edge")).slot;
        let target = state
            .nodes
            .get(&self.node)
            .and_then(|rec| rec.edges[slot].first().copied());
        drop(state);
        target.map(|id| NodeHandle::from_shared(self.graph.clone(), id))
    }

    /// Runs `effect(new, old)` now (with `old = None`) and exactly once per
    /// reference-target change.
    pub fn use_(
        &self,
        mut effect: impl FnMut(Option<&NodeHandle>, Option<&NodeHandle>) -> Option<Cleanup> + 'static,
    ) -> Subscription {
        let current = self.get();
        let cleanup = Rc::new(RefCell::new(effect(current.as_ref(), None)));
        let effect = Rc::new(RefCell::new(effect));
        let id = {
            let mut state = self.graph.state.borrow_mut();
            let id = state.next_sub_id();
            state
                .subs
                .refs
                .entry((self.node, self.rollup))
                .or_default()
                .push(RefSub {
                    id,
                    effect,
                    cleanup,
                });
            id
        };
        Subscription::store(
            Rc::downgrade(&self.graph),
            SubKind::Ref(self.node, self.rollup),
            id,
        )
    }
}
