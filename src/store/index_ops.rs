//! Index maintenance and window scans.
//!
//! Type-index entries and edge-index entries both carry denormalized key
//! tuples, so a property change re-keys affected entries: remove with the
//! old snapshot, re-insert with the new one. Window scans position with a
//! single `rank_lower_bound_by` probe and walk until the parent or the
//! equality prefix changes.

use super::{EdgeEntry, NodeRecord, StoreState, TypeEntry};
use crate::index::keys::{self, KeyTuple};
use crate::index::planner::IndexQuery;
use crate::model::Value;
use crate::schema::{CompiledFilter, Dir, FilterOp};
use crate::types::{EdgeDefId, NodeId, PropId, TypeId};
use std::cmp::Ordering;
use std::ops::ControlFlow;

/// Key tuple for a record over the given index fields, optionally
/// substituting one property's pre-change value.
pub(crate) fn key_for(
    rec: &NodeRecord,
    fields: &[(PropId, Dir)],
    subst: Option<(PropId, &Value)>,
) -> KeyTuple {
    fields
        .iter()
        .map(|(p, _)| match subst {
            Some((sp, sv)) if sp == *p => sv.clone(),
            _ => rec.props[p.idx()].clone(),
        })
        .collect()
}

pub(crate) fn add_to_type_indexes(state: &mut StoreState, id: NodeId, ty: TypeId) {
    let cat = state.catalog.clone();
    let rec = &state.nodes[&id];
    let entries: Vec<(usize, KeyTuple)> = cat
        .type_meta(ty)
        .indexes
        .iter()
        .enumerate()
        .map(|(no, idx)| (no, key_for(rec, &idx.fields, None)))
        .collect();
    for (no, key) in entries {
        state.type_indexes[ty.idx()][no].insert(TypeEntry { key, id });
    }
}

pub(crate) fn remove_from_type_indexes(state: &mut StoreState, id: NodeId, ty: TypeId) {
    let cat = state.catalog.clone();
    let rec = &state.nodes[&id];
    let entries: Vec<(usize, KeyTuple)> = cat
        .type_meta(ty)
        .indexes
        .iter()
        .enumerate()
        .map(|(no, idx)| (no, key_for(rec, &idx.fields, None)))
        .collect();
    for (no, key) in entries {
        state.type_indexes[ty.idx()][no].remove(&TypeEntry { key, id });
    }
}

/// Re-keys type-index entries after `prop` changed from `old`.
pub(crate) fn rekey_type_indexes(
    state: &mut StoreState,
    id: NodeId,
    ty: TypeId,
    prop: PropId,
    old: &Value,
) {
    let cat = state.catalog.clone();
    let affected = cat.type_meta(ty).prop_type_indexes[prop.idx()].clone();
    if affected.is_empty() {
        return;
    }
    let rec = &state.nodes[&id];
    let rekeys: Vec<(usize, KeyTuple, KeyTuple)> = affected
        .iter()
        .map(|&no| {
            let fields = &cat.type_meta(ty).indexes[no].fields;
            (
                no,
                key_for(rec, fields, Some((prop, old))),
                key_for(rec, fields, None),
            )
        })
        .collect();
    for (no, old_key, new_key) in rekeys {
        let list = &mut state.type_indexes[ty.idx()][no];
        list.remove(&TypeEntry { key: old_key, id });
        list.insert(TypeEntry { key: new_key, id });
    }
}

/// Inserts `(parent, snapshot(child), child)` into every index of a forward
/// edge.
pub(crate) fn add_edge_entries(
    state: &mut StoreState,
    edge: EdgeDefId,
    parent: NodeId,
    child: NodeId,
) {
    let cat = state.catalog.clone();
    let fields = cat.edge_index_fields(edge);
    if fields.is_empty() {
        return;
    }
    let child_rec = &state.nodes[&child];
    let keys: Vec<KeyTuple> = fields
        .iter()
        .map(|f| key_for(child_rec, f, None))
        .collect();
    let lists = state.edge_indexes.get_mut(&edge).expect("indexed edge");
    for (no, key) in keys.into_iter().enumerate() {
        lists[no].insert(EdgeEntry { parent, key, child });
    }
}

pub(crate) fn remove_edge_entries(
    state: &mut StoreState,
    edge: EdgeDefId,
    parent: NodeId,
    child: NodeId,
) {
    let cat = state.catalog.clone();
    let fields = cat.edge_index_fields(edge);
    if fields.is_empty() {
        return;
    }
    let child_rec = &state.nodes[&child];
    let keys: Vec<KeyTuple> = fields
        .iter()
        .map(|f| key_for(child_rec, f, None))
        .collect();
    let lists = state.edge_indexes.get_mut(&edge).expect("indexed edge");
    for (no, key) in keys.into_iter().enumerate() {
        lists[no].remove(&EdgeEntry { parent, key, child });
    }
}

/// Re-keys every edge-index entry whose denormalized snapshot used `prop`
/// of the changed child.
pub(crate) fn rekey_edge_indexes(
    state: &mut StoreState,
    child: NodeId,
    ty: TypeId,
    prop: PropId,
    old: &Value,
) {
    let cat = state.catalog.clone();
    let Some(deps) = cat.edge_field_deps.get(&(ty, prop)) else {
        return;
    };
    for dep in deps {
        let rev = cat.reverse_of(dep.edge);
        let rev_slot = cat.edge(rev).slot;
        let parents: Vec<NodeId> = state.nodes[&child].edges[rev_slot].clone();
        if parents.is_empty() {
            continue;
        }
        let all_fields = cat.edge_index_fields(dep.edge);
        let fields = &all_fields[dep.index_no];
        let child_rec = &state.nodes[&child];
        let old_key = key_for(child_rec, fields, Some((prop, old)));
        let new_key = key_for(child_rec, fields, None);
        let lists = state.edge_indexes.get_mut(&dep.edge).expect("indexed edge");
        for parent in parents {
            lists[dep.index_no].remove(&EdgeEntry {
                parent,
                key: old_key.clone(),
                child,
            });
            lists[dep.index_no].insert(EdgeEntry {
                parent,
                key: new_key.clone(),
                child,
            });
        }
    }
}

// ---- window scans ---------------------------------------------------------

/// True when the range operator needs a start bound in the index (the
/// matching region begins mid-prefix rather than at the prefix start).
/// Descending Gt/Gte also bounds the start, to step over the leading nils.
fn start_bound(op: FilterOp, dir: Dir) -> Option<StartBound> {
    match (dir, op) {
        (Dir::Asc, FilterOp::Gt) => Some(StartBound::Exclusive),
        (Dir::Asc, FilterOp::Gte) => Some(StartBound::Inclusive),
        (Dir::Desc, FilterOp::Lt) => Some(StartBound::Exclusive),
        (Dir::Desc, FilterOp::Lte) => Some(StartBound::Inclusive),
        (Dir::Desc, FilterOp::Gt | FilterOp::Gte) => Some(StartBound::SkipNil),
        _ => None,
    }
}

#[derive(Clone, Copy)]
enum StartBound {
    Inclusive,
    Exclusive,
    SkipNil,
}

fn probe_range(entry_val: &Value, bound: StartBound, value: &Value, dir: Dir) -> Ordering {
    match bound {
        StartBound::SkipNil => {
            if entry_val.is_nil() {
                Ordering::Less
            } else {
                Ordering::Greater
            }
        }
        StartBound::Inclusive => match keys::cmp_dir(entry_val, value, dir) {
            Ordering::Less => Ordering::Less,
            _ => Ordering::Greater,
        },
        StartBound::Exclusive => match keys::cmp_dir(entry_val, value, dir) {
            Ordering::Less | Ordering::Equal => Ordering::Less,
            Ordering::Greater => Ordering::Greater,
        },
    }
}

fn range_filter(query: &IndexQuery) -> Option<CompiledFilter> {
    query.range.as_ref().map(|r| CompiledFilter {
        prop: PropId(0), // unused: evaluated against the key tuple directly
        op: r.op,
        value: r.value.clone(),
    })
}

/// Walks the children of `(parent, edge)` selected by `query`, in index
/// order, until the visitor breaks or the window ends.
pub(crate) fn edge_scan(
    state: &StoreState,
    parent: NodeId,
    edge: EdgeDefId,
    query: &IndexQuery,
    mut f: impl FnMut(NodeId) -> ControlFlow<()>,
) {
    let cat = &state.catalog;
    let all_fields = cat.edge_index_fields(edge);
    let fields = &all_fields[query.index_no];
    let dirs: Vec<Dir> = fields.iter().map(|(_, d)| *d).collect();
    let Some(lists) = state.edge_indexes.get(&edge) else {
        return;
    };
    let list = &lists[query.index_no];
    let eq_len = query.eq.len();
    let bound = query
        .range
        .as_ref()
        .and_then(|r| start_bound(r.op, r.dir).map(|b| (b, r.value.clone(), r.dir)));

    let start = list.rank_lower_bound_by(|e| {
        let ord = e.parent.cmp(&parent);
        if ord != Ordering::Equal {
            return ord;
        }
        for i in 0..eq_len {
            let ord = keys::cmp_dir(&e.key[i], &query.eq[i], dirs[i]);
            if ord != Ordering::Equal {
                return ord;
            }
        }
        match &bound {
            Some((b, value, dir)) => probe_range(&e.key[eq_len], *b, value, *dir),
            None => Ordering::Greater,
        }
    });

    let stop = range_filter(query);
    for entry in list.iter_from(start) {
        if entry.parent != parent {
            break;
        }
        let mut in_prefix = true;
        for i in 0..eq_len {
            if keys::cmp_dir(&entry.key[i], &query.eq[i], dirs[i]) != Ordering::Equal {
                in_prefix = false;
                break;
            }
        }
        if !in_prefix {
            break;
        }
        if let Some(stop) = &stop {
            if !stop.matches(&entry.key[eq_len]) {
                break;
            }
        }
        if f(entry.child).is_break() {
            break;
        }
    }
}

/// Materialized [`edge_scan`].
pub(crate) fn edge_window(
    state: &StoreState,
    parent: NodeId,
    edge: EdgeDefId,
    query: &IndexQuery,
) -> Vec<NodeId> {
    let mut out = Vec::new();
    edge_scan(state, parent, edge, query, |id| {
        out.push(id);
        ControlFlow::Continue(())
    });
    out
}

/// Walks nodes of `ty` selected by `query` over the chosen type index, in
/// index order, until the visitor breaks or the window ends.
pub(crate) fn type_scan(
    state: &StoreState,
    ty: TypeId,
    query: &IndexQuery,
    mut f: impl FnMut(NodeId) -> ControlFlow<()>,
) {
    let cat = &state.catalog;
    let fields = &cat.type_meta(ty).indexes[query.index_no].fields;
    let dirs: Vec<Dir> = fields.iter().map(|(_, d)| *d).collect();
    let list = &state.type_indexes[ty.idx()][query.index_no];
    let eq_len = query.eq.len();
    let bound = query
        .range
        .as_ref()
        .and_then(|r| start_bound(r.op, r.dir).map(|b| (b, r.value.clone(), r.dir)));

    let start = list.rank_lower_bound_by(|e| {
        for i in 0..eq_len {
            let ord = keys::cmp_dir(&e.key[i], &query.eq[i], dirs[i]);
            if ord != Ordering::Equal {
                return ord;
            }
        }
        match &bound {
            Some((b, value, dir)) => probe_range(&e.key[eq_len], *b, value, *dir),
            None => Ordering::Greater,
        }
    });

    let stop = range_filter(query);
    for entry in list.iter_from(start) {
        let mut in_prefix = true;
        for i in 0..eq_len {
            if keys::cmp_dir(&entry.key[i], &query.eq[i], dirs[i]) != Ordering::Equal {
                in_prefix = false;
                break;
            }
        }
        if !in_prefix {
            break;
        }
        if let Some(stop) = &stop {
            if !stop.matches(&entry.key[eq_len]) {
                break;
            }
        }
        if f(entry.id).is_break() {
            break;
        }
    }
}
