//! Node CRUD and the property-change pipeline.

use super::{events, index_ops, Cleanup, Dispatch, GraphShared, NodeRecord, StoreState};
use crate::model::Value;
use crate::rollup;
use crate::schema::catalog::EdgeKind;
use crate::types::{NodeId, PropId, TypeId};
use std::cell::RefCell;
use std::rc::Rc;
use tracing::trace;

/// Inserts a node and fans out `on_enter` to matching views.
pub(crate) fn insert_node(
    g: &Rc<GraphShared>,
    ty: TypeId,
    props: Vec<(PropId, Value)>,
) -> NodeId {
    let mut q = Dispatch::new();
    let id;
    {
        let mut guard = g.state.borrow_mut();
        let state = &mut *guard;
        let cat = state.catalog.clone();
        id = NodeId(state.next_id);
        state.next_id += 1;

        let tmeta = cat.type_meta(ty);
        let mut rec = NodeRecord {
            ty,
            props: vec![Value::Nil; tmeta.props.len()],
            edges: vec![Vec::new(); cat.slot_count(ty)],
        };
        for (p, v) in props {
            rec.props[p.idx()] = v;
        }
        // Rollup outputs start from their empty-set values.
        for rid in &tmeta.rollups {
            let r = cat.rollup(*rid);
            if let (Some(out), Some(compute)) = (r.output_prop, r.compute) {
                rec.props[out.idx()] = rollup::empty_value(compute);
            }
        }
        state.nodes.insert(id, rec);
        state.type_counts[ty.idx()] += 1;
        index_ops::add_to_type_indexes(state, id, ty);
        trace!(id = id.0, ty = %cat.type_name(ty), "store.insert");

        let views = state.live_views();
        for v in &views {
            v.borrow_mut().on_insert(g, state, &mut q, id, ty);
        }
    }
    q.run();
    id
}

/// Applies a patch; each differing property runs the full change pipeline.
/// Returns false for an unknown id.
pub(crate) fn apply_patch(
    g: &Rc<GraphShared>,
    id: NodeId,
    patch: Vec<(PropId, Value)>,
) -> bool {
    let mut q = Dispatch::new();
    {
        let mut guard = g.state.borrow_mut();
        let state = &mut *guard;
        if !state.nodes.contains_key(&id) {
            return false;
        }
        for (prop, new) in patch {
            property_change(g, state, &mut q, id, prop, new);
        }
    }
    q.run();
    true
}

/// The property-change pipeline of one property write: storage, type-index
/// re-key, edge-index re-key, rollups (which may re-enter this function for
/// owner rollup outputs), views, then user subscribers. Equal-value writes
/// are dropped here, so subscribers never double-fire.
pub(crate) fn property_change(
    g: &Rc<GraphShared>,
    state: &mut StoreState,
    q: &mut Dispatch,
    id: NodeId,
    prop: PropId,
    new: Value,
) {
    let Some(rec) = state.nodes.get_mut(&id) else {
        return;
    };
    let ty = rec.ty;
    if rec.props[prop.idx()].same(&new) {
        return;
    }
    let old = std::mem::replace(&mut rec.props[prop.idx()], new.clone());

    index_ops::rekey_type_indexes(state, id, ty, prop, &old);
    index_ops::rekey_edge_indexes(state, id, ty, prop, &old);

    let effects = rollup::on_target_prop_change(g, state, q, id, ty, prop, &old);

    let views = state.live_views();
    for v in &views {
        v.borrow_mut()
            .on_prop_change(g, state, q, id, ty, prop, &old, &new);
    }
    super::edge_ops::fan_out_effects(g, state, q, &views, &effects);

    events::queue_signal_subs(state, q, id, prop, &old, &new);
    let name = state.catalog.prop_name(ty, prop).to_string();
    events::queue_watchers(state, g, q, id, &name, &old, &new);
}

/// Deletes a node: unlink every real edge (one nested mutation each, which
/// cascades rollup and derived-edge cleanup), then remove the node from its
/// type indexes, notify views, and drop caches and subscriptions.
pub(crate) fn delete_node(g: &Rc<GraphShared>, id: NodeId) -> bool {
    if !g.state.borrow().nodes.contains_key(&id) {
        return false;
    }
    loop {
        let next = {
            let state = g.state.borrow();
            let cat = state.catalog.clone();
            let Some(rec) = state.nodes.get(&id) else {
                return false;
            };
            let mut found = None;
            for (slot, targets) in rec.edges.iter().enumerate() {
                if targets.is_empty() {
                    continue;
                }
                let eid = cat.type_meta(rec.ty).edges[slot];
                match &cat.edge(eid).kind {
                    EdgeKind::Forward { .. } => {
                        found = Some((id, eid, targets[0]));
                        break;
                    }
                    EdgeKind::Reverse { forward } => {
                        found = Some((targets[0], *forward, id));
                        break;
                    }
                    EdgeKind::Derived { .. } => continue,
                }
            }
            found
        };
        match next {
            Some((src, edge, tgt)) => {
                let _ = super::edge_ops::unlink_forward(g, src, edge, tgt);
            }
            None => break,
        }
    }

    let mut q = Dispatch::new();
    {
        let mut guard = g.state.borrow_mut();
        let state = &mut *guard;
        let Some(rec) = state.nodes.get(&id) else {
            return false;
        };
        let ty = rec.ty;
        index_ops::remove_from_type_indexes(state, id, ty);
        state.type_counts[ty.idx()] -= 1;
        let views = state.live_views();
        for v in &views {
            v.borrow_mut().on_delete(g, state, &mut q, id, ty);
        }
        state.nodes.remove(&id);
        purge_subs(state, &mut q, id);
        trace!(id = id.0, "store.delete");
    }
    q.run();
    true
}

/// Drops every subscription keyed by the deleted node and queues their final
/// cleanups.
fn purge_subs(state: &mut StoreState, q: &mut Dispatch, id: NodeId) {
    let mut final_cleanups: Vec<Rc<RefCell<Option<Cleanup>>>> = Vec::new();
    let mut each_maps = Vec::new();

    state.subs.signals.retain(|(nid, _), subs| {
        if *nid == id {
            for s in subs.iter() {
                final_cleanups.push(s.cleanup.clone());
            }
            false
        } else {
            true
        }
    });
    state.subs.watchers.remove(&id);
    state.subs.on_link.retain(|(nid, _), _| *nid != id);
    state.subs.on_unlink.retain(|(nid, _), _| *nid != id);
    state.subs.each.retain(|(nid, _), subs| {
        if *nid == id {
            for s in subs.iter() {
                each_maps.push(s.cleanups.clone());
            }
            false
        } else {
            true
        }
    });
    state.subs.refs.retain(|(nid, _), subs| {
        if *nid == id {
            for s in subs.iter() {
                final_cleanups.push(s.cleanup.clone());
            }
            false
        } else {
            true
        }
    });

    if final_cleanups.is_empty() && each_maps.is_empty() {
        return;
    }
    q.push(move || {
        for slot in final_cleanups {
            let taken = slot.borrow_mut().take();
            if let Some(f) = taken {
                f();
            }
        }
        for map in each_maps {
            let drained: Vec<Cleanup> = map.borrow_mut().drain().map(|(_, f)| f).collect();
            for f in drained {
                f();
            }
        }
    });
}
