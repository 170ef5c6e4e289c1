//! Incremental rollup maintenance.
//!
//! Property rollups live as pseudo-properties on the owner and update by
//! delta where the aggregate allows it (count, sum, min/max fast paths),
//! falling back to a full recompute over the qualifying target set
//! otherwise. Reference and collection rollups materialize derived edges;
//! their membership changes are returned to the caller as events so the
//! store can fan them out to views and subscribers in pipeline order.
//!
//! Every stored-value change goes through the ordinary property-change
//! pipeline, so rollup outputs index, notify and re-key like any property.

use crate::index::keys::cmp_asc;
use crate::model::Value;
use crate::schema::catalog::{EdgeKind, RollupMeta};
use crate::schema::{Compute, RollupKind};
use crate::store::{edge_ops, index_ops, node_ops, Dispatch, GraphShared, StoreState};
use crate::types::{EdgeDefId, NodeId, PropId, RollupId, TypeId};
use std::cmp::Ordering;
use std::rc::Rc;

/// One derived-edge membership change.
pub(crate) struct DerivedEvent {
    pub owner: NodeId,
    pub edge: EdgeDefId,
    pub target: NodeId,
    pub is_link: bool,
}

/// One coalesced reference-target change.
pub(crate) struct RefChange {
    pub owner: NodeId,
    pub rollup: RollupId,
    pub old: Option<NodeId>,
    pub new: Option<NodeId>,
}

/// Events produced by a rollup pass, delivered after the triggering event.
#[derive(Default)]
pub(crate) struct RollupEffects {
    pub derived: Vec<DerivedEvent>,
    pub refs: Vec<RefChange>,
}

/// Stored value of a property rollup over the empty target set.
pub(crate) fn empty_value(compute: Compute) -> Value {
    match compute {
        Compute::Count | Compute::Sum => Value::Number(0.0),
        Compute::Avg
        | Compute::Min
        | Compute::Max
        | Compute::First
        | Compute::Last => Value::Nil,
        Compute::Any | Compute::All => Value::Bool(false),
    }
}

/// Probe value fed into the aggregate for one target: the aggregated
/// property, or `true` for bare `count`/`any`/`all` rollups.
fn probe(
    state: &StoreState,
    target: NodeId,
    r: &RollupMeta,
    subst: Option<(PropId, &Value)>,
) -> Value {
    match r.property {
        Some(p) => state.prop_value(target, p, subst),
        None => Value::Bool(true),
    }
}

/// Qualifying targets in rollup order: the chosen index window when the
/// rollup has filters/sort, raw link order otherwise.
fn rollup_targets(state: &StoreState, owner: NodeId, r: &RollupMeta) -> Vec<NodeId> {
    match &r.query {
        Some(q) => index_ops::edge_window(state, owner, r.base_edge, q),
        None => edge_ops::slot_targets(state, owner, r.base_edge),
    }
}

/// Full recompute of a property rollup's stored value.
pub(crate) fn recompute(state: &StoreState, owner: NodeId, r: &RollupMeta) -> Value {
    let targets = rollup_targets(state, owner, r);
    let compute = r.compute.expect("property rollup");
    match compute {
        Compute::Count => Value::Number(targets.len() as f64),
        Compute::Sum => Value::Number(
            targets
                .iter()
                .map(|t| probe(state, *t, r, None).as_number())
                .sum(),
        ),
        Compute::Avg => {
            if targets.is_empty() {
                Value::Nil
            } else {
                let sum: f64 = targets
                    .iter()
                    .map(|t| probe(state, *t, r, None).as_number())
                    .sum();
                Value::Number(sum / targets.len() as f64)
            }
        }
        Compute::Min | Compute::Max => {
            let mut best: Option<Value> = None;
            for t in &targets {
                let v = probe(state, *t, r, None);
                if v.is_nil() {
                    continue;
                }
                best = Some(match best {
                    None => v,
                    Some(b) => {
                        let keep_new = match compute {
                            Compute::Min => cmp_asc(&v, &b) == Ordering::Less,
                            _ => cmp_asc(&v, &b) == Ordering::Greater,
                        };
                        if keep_new {
                            v
                        } else {
                            b
                        }
                    }
                });
            }
            best.unwrap_or(Value::Nil)
        }
        Compute::First => targets
            .first()
            .map(|t| probe(state, *t, r, None))
            .unwrap_or(Value::Nil),
        Compute::Last => targets
            .last()
            .map(|t| probe(state, *t, r, None))
            .unwrap_or(Value::Nil),
        Compute::Any => Value::Bool(targets.iter().any(|t| probe(state, *t, r, None).truthy())),
        Compute::All => Value::Bool(
            !targets.is_empty() && targets.iter().all(|t| probe(state, *t, r, None).truthy()),
        ),
    }
}

/// Delta for a newly qualifying target.
fn apply_add(state: &StoreState, owner: NodeId, r: &RollupMeta, stored: &Value, val: &Value) -> Value {
    match r.compute.expect("property rollup") {
        Compute::Count => Value::Number(stored.as_number() + 1.0),
        Compute::Sum => Value::Number(stored.as_number() + val.as_number()),
        Compute::Min => {
            if val.is_nil() {
                stored.clone()
            } else if stored.is_nil() || cmp_asc(val, stored) == Ordering::Less {
                val.clone()
            } else {
                stored.clone()
            }
        }
        Compute::Max => {
            if val.is_nil() {
                stored.clone()
            } else if stored.is_nil() || cmp_asc(val, stored) == Ordering::Greater {
                val.clone()
            } else {
                stored.clone()
            }
        }
        Compute::Any => {
            if stored.truthy() || val.truthy() {
                Value::Bool(true)
            } else {
                Value::Bool(false)
            }
        }
        Compute::Avg | Compute::First | Compute::Last | Compute::All => {
            recompute(state, owner, r)
        }
    }
}

/// Delta for a target that stopped qualifying; `val` is the contribution it
/// had when it was added.
fn apply_sub(state: &StoreState, owner: NodeId, r: &RollupMeta, stored: &Value, val: &Value) -> Value {
    match r.compute.expect("property rollup") {
        Compute::Count => Value::Number(stored.as_number() - 1.0),
        Compute::Sum => Value::Number(stored.as_number() - val.as_number()),
        Compute::Min => {
            if !val.is_nil() && cmp_asc(val, stored) != Ordering::Greater {
                recompute(state, owner, r)
            } else {
                stored.clone()
            }
        }
        Compute::Max => {
            if !val.is_nil() && cmp_asc(val, stored) != Ordering::Less {
                recompute(state, owner, r)
            } else {
                stored.clone()
            }
        }
        Compute::Any => {
            if stored.truthy() && val.truthy() {
                recompute(state, owner, r)
            } else {
                stored.clone()
            }
        }
        Compute::Avg | Compute::First | Compute::Last | Compute::All => {
            recompute(state, owner, r)
        }
    }
}

/// Rollup pass after `src --edge--> tgt` was linked.
pub(crate) fn on_base_link(
    g: &Rc<GraphShared>,
    state: &mut StoreState,
    q: &mut Dispatch,
    src: NodeId,
    edge: EdgeDefId,
    tgt: NodeId,
) -> RollupEffects {
    let cat = state.catalog.clone();
    let mut fx = RollupEffects::default();
    let EdgeKind::Forward { rollups, .. } = &cat.edge(edge).kind else {
        return fx;
    };
    for rid in rollups {
        let r = cat.rollup(*rid);
        match r.kind {
            RollupKind::Property => {
                if state.eval_filters(tgt, &r.filters, None) {
                    let out = r.output_prop.expect("output prop");
                    let stored = state.nodes[&src].props[out.idx()].clone();
                    let val = probe(state, tgt, r, None);
                    let new = apply_add(state, src, r, &stored, &val);
                    node_ops::property_change(g, state, q, src, out, new);
                }
            }
            RollupKind::Reference => refresh_reference(state, src, *rid, r, &mut fx),
            RollupKind::Collection => {
                if state.eval_filters(tgt, &r.filters, None) {
                    insert_derived(state, src, r, tgt);
                    fx.derived.push(DerivedEvent {
                        owner: src,
                        edge: r.derived_edge.expect("derived edge"),
                        target: tgt,
                        is_link: true,
                    });
                }
            }
        }
    }
    fx
}

/// Rollup pass after `src --edge--> tgt` was unlinked.
pub(crate) fn on_base_unlink(
    g: &Rc<GraphShared>,
    state: &mut StoreState,
    q: &mut Dispatch,
    src: NodeId,
    edge: EdgeDefId,
    tgt: NodeId,
) -> RollupEffects {
    let cat = state.catalog.clone();
    let mut fx = RollupEffects::default();
    let EdgeKind::Forward { rollups, .. } = &cat.edge(edge).kind else {
        return fx;
    };
    for rid in rollups {
        let r = cat.rollup(*rid);
        match r.kind {
            RollupKind::Property => {
                if state.eval_filters(tgt, &r.filters, None) {
                    let out = r.output_prop.expect("output prop");
                    let stored = state.nodes[&src].props[out.idx()].clone();
                    let val = probe(state, tgt, r, None);
                    let new = apply_sub(state, src, r, &stored, &val);
                    node_ops::property_change(g, state, q, src, out, new);
                }
            }
            RollupKind::Reference => refresh_reference(state, src, *rid, r, &mut fx),
            RollupKind::Collection => {
                if remove_derived(state, src, r, tgt) {
                    fx.derived.push(DerivedEvent {
                        owner: src,
                        edge: r.derived_edge.expect("derived edge"),
                        target: tgt,
                        is_link: false,
                    });
                }
            }
        }
    }
    fx
}

/// Rollup pass after a target property changed (new value already stored).
pub(crate) fn on_target_prop_change(
    g: &Rc<GraphShared>,
    state: &mut StoreState,
    q: &mut Dispatch,
    tgt: NodeId,
    ty: TypeId,
    prop: PropId,
    old: &Value,
) -> RollupEffects {
    let cat = state.catalog.clone();
    let mut fx = RollupEffects::default();

    if let Some(dep) = cat.rollup_prop_deps.get(&(ty, prop)) {
        for rid in dep {
            let r = cat.rollup(*rid);
            let rev_slot = cat.edge(cat.reverse_of(r.base_edge)).slot;
            let owners: Vec<NodeId> = state.nodes[&tgt].edges[rev_slot].clone();
            for owner in owners {
                let was = state.eval_filters(tgt, &r.filters, Some((prop, old)));
                let is = state.eval_filters(tgt, &r.filters, None);
                let out = r.output_prop.expect("output prop");
                let stored = state.nodes[&owner].props[out.idx()].clone();
                let new_val = if was && !is {
                    let val = probe(state, tgt, r, Some((prop, old)));
                    apply_sub(state, owner, r, &stored, &val)
                } else if !was && is {
                    let val = probe(state, tgt, r, None);
                    apply_add(state, owner, r, &stored, &val)
                } else if was && is {
                    both_match_update(state, owner, r, &stored, tgt, prop, old)
                } else {
                    continue;
                };
                node_ops::property_change(g, state, q, owner, out, new_val);
            }
        }
    }

    if let Some(dep) = cat.derived_prop_deps.get(&(ty, prop)) {
        for rid in dep {
            let r = cat.rollup(*rid);
            let rev_slot = cat.edge(cat.reverse_of(r.base_edge)).slot;
            let owners: Vec<NodeId> = state.nodes[&tgt].edges[rev_slot].clone();
            for owner in owners {
                match r.kind {
                    RollupKind::Reference => refresh_reference(state, owner, *rid, r, &mut fx),
                    RollupKind::Collection => {
                        let was = state.eval_filters(tgt, &r.filters, Some((prop, old)));
                        let is = state.eval_filters(tgt, &r.filters, None);
                        if was && !is {
                            if remove_derived(state, owner, r, tgt) {
                                fx.derived.push(DerivedEvent {
                                    owner,
                                    edge: r.derived_edge.expect("derived edge"),
                                    target: tgt,
                                    is_link: false,
                                });
                            }
                        } else if !was && is {
                            insert_derived(state, owner, r, tgt);
                            fx.derived.push(DerivedEvent {
                                owner,
                                edge: r.derived_edge.expect("derived edge"),
                                target: tgt,
                                is_link: true,
                            });
                        } else if was && is && r.sort.map(|(p, _)| p) == Some(prop) {
                            // Sort key moved: reposition without events.
                            if remove_derived(state, owner, r, tgt) {
                                insert_derived(state, owner, r, tgt);
                            }
                        }
                    }
                    RollupKind::Property => unreachable!("property rollup in derived deps"),
                }
            }
        }
    }
    fx
}

/// Stored-value update when the target matched before and after the change.
/// Only the aggregated (or sort) property moving can shift the value.
fn both_match_update(
    state: &StoreState,
    owner: NodeId,
    r: &RollupMeta,
    stored: &Value,
    tgt: NodeId,
    prop: PropId,
    old: &Value,
) -> Value {
    let compute = r.compute.expect("property rollup");
    let is_agg_prop = r.property == Some(prop);
    let is_sort_prop = r.sort.map(|(p, _)| p) == Some(prop);
    match compute {
        Compute::Count => stored.clone(),
        Compute::Sum => {
            if is_agg_prop {
                let new = state.prop_value(tgt, prop, None);
                Value::Number(stored.as_number() - old.as_number() + new.as_number())
            } else {
                stored.clone()
            }
        }
        Compute::Min | Compute::Max => {
            if is_agg_prop {
                let new = state.prop_value(tgt, prop, None);
                minmax_shift(state, owner, r, stored, old, &new, compute == Compute::Min)
            } else {
                stored.clone()
            }
        }
        Compute::Avg | Compute::Any | Compute::All => {
            if is_agg_prop {
                recompute(state, owner, r)
            } else {
                stored.clone()
            }
        }
        Compute::First | Compute::Last => {
            if is_agg_prop || is_sort_prop {
                recompute(state, owner, r)
            } else {
                stored.clone()
            }
        }
    }
}

/// Delta test for min/max when the aggregated property of a still-matching
/// target moved: adopt an improving value, rescan when the former extreme
/// worsened, keep the stored value otherwise.
fn minmax_shift(
    state: &StoreState,
    owner: NodeId,
    r: &RollupMeta,
    stored: &Value,
    old: &Value,
    new: &Value,
    is_min: bool,
) -> Value {
    if new.is_nil() {
        if !old.is_nil() && cmp_asc(old, stored) == Ordering::Equal {
            recompute(state, owner, r)
        } else {
            stored.clone()
        }
    } else if stored.is_nil() {
        new.clone()
    } else {
        let improves = if is_min {
            cmp_asc(new, stored) == Ordering::Less
        } else {
            cmp_asc(new, stored) == Ordering::Greater
        };
        if improves {
            new.clone()
        } else if cmp_asc(old, stored) == Ordering::Equal && !old.same(new) {
            recompute(state, owner, r)
        } else {
            stored.clone()
        }
    }
}

/// Recomputes the reference target; emits derived unlink/link plus one
/// coalesced reference change when it moved.
fn refresh_reference(
    state: &mut StoreState,
    owner: NodeId,
    rid: RollupId,
    r: &RollupMeta,
    fx: &mut RollupEffects,
) {
    let first = match &r.query {
        Some(q) => {
            let mut found = None;
            index_ops::edge_scan(state, owner, r.base_edge, q, |id| {
                found = Some(id);
                std::ops::ControlFlow::Break(())
            });
            found
        }
        None => edge_ops::slot_targets(state, owner, r.base_edge).first().copied(),
    };
    let did = r.derived_edge.expect("derived edge");
    let slot = state.catalog.edge(did).slot;
    let stored = state
        .nodes
        .get(&owner)
        .and_then(|rec| rec.edges[slot].first().copied());
    if stored == first {
        return;
    }
    if let Some(rec) = state.nodes.get_mut(&owner) {
        rec.edges[slot].clear();
        if let Some(n) = first {
            rec.edges[slot].push(n);
        }
    }
    if let Some(o) = stored {
        fx.derived.push(DerivedEvent {
            owner,
            edge: did,
            target: o,
            is_link: false,
        });
    }
    if let Some(n) = first {
        fx.derived.push(DerivedEvent {
            owner,
            edge: did,
            target: n,
            is_link: true,
        });
    }
    fx.refs.push(RefChange {
        owner,
        rollup: rid,
        old: stored,
        new: first,
    });
}

/// Inserts a target into a collection's derived vector at its sorted
/// position (link order when the rollup has no sort).
fn insert_derived(state: &mut StoreState, owner: NodeId, r: &RollupMeta, tgt: NodeId) {
    let did = r.derived_edge.expect("derived edge");
    let slot = state.catalog.edge(did).slot;
    let pos = match r.sort {
        Some((p, dir)) => {
            let key = state.prop_value(tgt, p, None);
            let members: Vec<NodeId> = state.nodes[&owner].edges[slot].clone();
            let mut pos = members.len();
            for (i, m) in members.iter().enumerate() {
                let mkey = state.prop_value(*m, p, None);
                let ord = crate::index::keys::cmp_dir(&key, &mkey, dir)
                    .then_with(|| tgt.cmp(m));
                if ord == Ordering::Less {
                    pos = i;
                    break;
                }
            }
            pos
        }
        None => state.nodes[&owner].edges[slot].len(),
    };
    if let Some(rec) = state.nodes.get_mut(&owner) {
        if !rec.edges[slot].contains(&tgt) {
            rec.edges[slot].insert(pos, tgt);
        }
    }
}

/// Removes a target from a collection's derived vector; false when absent.
fn remove_derived(state: &mut StoreState, owner: NodeId, r: &RollupMeta, tgt: NodeId) -> bool {
    let did = r.derived_edge.expect("derived edge");
    let slot = state.catalog.edge(did).slot;
    if let Some(rec) = state.nodes.get_mut(&owner) {
        let before = rec.edges[slot].len();
        rec.edges[slot].retain(|t| *t != tgt);
        return rec.edges[slot].len() != before;
    }
    false
}
