//! Edge link/unlink pipeline and adjacency reads.

use super::{events, index_ops, Dispatch, GraphShared, StoreState};
use crate::error::{GraphError, Result};
use crate::index::planner::IndexQuery;
use crate::rollup::{self, RollupEffects};
use crate::schema::catalog::EdgeKind;
use crate::types::{EdgeDefId, NodeId};
use crate::view::ViewCore;
use std::cell::RefCell;
use std::rc::Rc;
use tracing::trace;

/// Links `src --edge--> tgt` for a forward edge id. Unknown endpoints and
/// double-links are no-ops returning false.
pub(crate) fn link_forward(
    g: &Rc<GraphShared>,
    src: NodeId,
    edge: EdgeDefId,
    tgt: NodeId,
) -> Result<bool> {
    let mut q = Dispatch::new();
    {
        let mut guard = g.state.borrow_mut();
        let state = &mut *guard;
        let cat = state.catalog.clone();
        let meta = cat.edge(edge);
        let EdgeKind::Forward { reverse, .. } = &meta.kind else {
            return Err(GraphError::ReadOnlyEdge(meta.name.clone()));
        };
        let reverse = *reverse;
        let slot = meta.slot;
        let rev_slot = cat.edge(reverse).slot;

        let Some(srec) = state.nodes.get(&src) else {
            return Ok(false);
        };
        if srec.ty != meta.owner {
            return Err(GraphError::InvalidArgument(format!(
                "edge {} does not start at type {}",
                meta.name,
                cat.type_name(srec.ty)
            )));
        }
        let Some(trec) = state.nodes.get(&tgt) else {
            return Ok(false);
        };
        if trec.ty != meta.target {
            return Err(GraphError::InvalidArgument(format!(
                "edge {} does not target type {}",
                meta.name,
                cat.type_name(trec.ty)
            )));
        }
        if srec.edges[slot].contains(&tgt) {
            return Ok(false);
        }

        state.nodes.get_mut(&src).expect("src").edges[slot].push(tgt);
        state.nodes.get_mut(&tgt).expect("tgt").edges[rev_slot].push(src);
        index_ops::add_edge_entries(state, edge, src, tgt);
        trace!(src = src.0, tgt = tgt.0, edge = %meta.name, "store.link");

        let effects = rollup::on_base_link(g, state, &mut q, src, edge, tgt);

        let views = state.live_views();
        for v in &views {
            v.borrow_mut().on_link(g, state, &mut q, src, edge, tgt);
            v.borrow_mut().on_link(g, state, &mut q, tgt, reverse, src);
        }
        fan_out_effects(g, state, &mut q, &views, &effects);

        events::queue_edge_side(state, g, &mut q, src, edge, tgt, true);
        events::queue_edge_side(state, g, &mut q, tgt, reverse, src, true);
    }
    q.run();
    Ok(true)
}

/// Unlinks `src --edge--> tgt`. Absent edges are no-ops returning false.
pub(crate) fn unlink_forward(
    g: &Rc<GraphShared>,
    src: NodeId,
    edge: EdgeDefId,
    tgt: NodeId,
) -> Result<bool> {
    let mut q = Dispatch::new();
    {
        let mut guard = g.state.borrow_mut();
        let state = &mut *guard;
        let cat = state.catalog.clone();
        let meta = cat.edge(edge);
        let EdgeKind::Forward { reverse, .. } = &meta.kind else {
            return Err(GraphError::ReadOnlyEdge(meta.name.clone()));
        };
        let reverse = *reverse;
        let slot = meta.slot;
        let rev_slot = cat.edge(reverse).slot;

        let present = state
            .nodes
            .get(&src)
            .map(|r| r.edges[slot].contains(&tgt))
            .unwrap_or(false);
        if !present {
            return Ok(false);
        }

        // Index entries key on the child's current snapshot; drop them while
        // the snapshot is still valid.
        index_ops::remove_edge_entries(state, edge, src, tgt);
        let srec = state.nodes.get_mut(&src).expect("src");
        srec.edges[slot].retain(|t| *t != tgt);
        if let Some(trec) = state.nodes.get_mut(&tgt) {
            trec.edges[rev_slot].retain(|s| *s != src);
        }
        trace!(src = src.0, tgt = tgt.0, edge = %meta.name, "store.unlink");

        let effects = rollup::on_base_unlink(g, state, &mut q, src, edge, tgt);

        let views = state.live_views();
        for v in &views {
            v.borrow_mut().on_unlink(g, state, &mut q, src, edge, tgt);
            v.borrow_mut().on_unlink(g, state, &mut q, tgt, reverse, src);
        }
        fan_out_effects(g, state, &mut q, &views, &effects);

        events::queue_edge_side(state, g, &mut q, src, edge, tgt, false);
        events::queue_edge_side(state, g, &mut q, tgt, reverse, src, false);
    }
    q.run();
    Ok(true)
}

/// Delivers derived-edge events and coalesced reference changes produced by
/// the rollup engine: views first, then edge subscribers, then reference
/// subscribers.
pub(crate) fn fan_out_effects(
    g: &Rc<GraphShared>,
    state: &mut StoreState,
    q: &mut Dispatch,
    views: &[Rc<RefCell<ViewCore>>],
    effects: &RollupEffects,
) {
    for ev in &effects.derived {
        for v in views {
            if ev.is_link {
                v.borrow_mut()
                    .on_link(g, state, q, ev.owner, ev.edge, ev.target);
            } else {
                v.borrow_mut()
                    .on_unlink(g, state, q, ev.owner, ev.edge, ev.target);
            }
        }
    }
    for ev in &effects.derived {
        events::queue_edge_side(state, g, q, ev.owner, ev.edge, ev.target, ev.is_link);
    }
    for rc in &effects.refs {
        events::queue_ref_subs(state, g, q, rc.owner, rc.rollup, rc.old, rc.new);
    }
}

/// Clone of one adjacency slot (forward, reverse or derived alike).
pub(crate) fn slot_targets(state: &StoreState, id: NodeId, edge: EdgeDefId) -> Vec<NodeId> {
    let slot = state.catalog.edge(edge).slot;
    state
        .nodes
        .get(&id)
        .map(|r| r.edges[slot].clone())
        .unwrap_or_default()
}

/// Stored target count of one adjacency slot.
pub(crate) fn slot_len(state: &StoreState, id: NodeId, edge: EdgeDefId) -> usize {
    let slot = state.catalog.edge(edge).slot;
    state
        .nodes
        .get(&id)
        .map(|r| r.edges[slot].len())
        .unwrap_or(0)
}

/// Membership test on one adjacency slot.
pub(crate) fn slot_contains(
    state: &StoreState,
    id: NodeId,
    edge: EdgeDefId,
    other: NodeId,
) -> bool {
    let slot = state.catalog.edge(edge).slot;
    state
        .nodes
        .get(&id)
        .map(|r| r.edges[slot].contains(&other))
        .unwrap_or(false)
}

/// Children of `(parent, edge)`: index order under a query window, raw link
/// order otherwise. Always materialized, so callers may dispatch callbacks
/// while walking the result.
pub(crate) fn children(
    state: &StoreState,
    parent: NodeId,
    edge: EdgeDefId,
    query: Option<&IndexQuery>,
) -> Vec<NodeId> {
    match query {
        Some(q) => index_ops::edge_window(state, parent, edge, q),
        None => slot_targets(state, parent, edge),
    }
}
