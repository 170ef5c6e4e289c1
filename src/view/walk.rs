//! Virtualized position resolution.
//!
//! Walks the visible sequence: roots in root-index order, then each root's
//! expanded subtree depth-first, children in the owner type's edge
//! declaration order. Whole subtrees are skipped by their recorded size, so
//! resolving a position costs the roots before it plus the children along
//! one descent path, not the tree size.

use super::{path, ViewCore};
use crate::store::{index_ops, StoreState};
use crate::types::{EdgeDefId, NodeId};
use std::ops::ControlFlow;

/// One visible occurrence, borrowed during a walk.
pub(crate) struct WalkItem<'a> {
    pub id: NodeId,
    pub depth: usize,
    pub edge: Option<EdgeDefId>,
    pub parent: Option<NodeId>,
    pub path: &'a str,
}

/// Owned snapshot of a visible occurrence.
pub(crate) struct OwnedItem {
    pub id: NodeId,
    pub depth: usize,
    pub edge: Option<EdgeDefId>,
    pub parent: Option<NodeId>,
    pub path: String,
}

/// Walks visible items starting at virtual position `start`.
pub(crate) fn walk(
    core: &ViewCore,
    st: &StoreState,
    start: usize,
    f: &mut dyn FnMut(WalkItem<'_>) -> ControlFlow<()>,
) {
    let mut skip = start;
    index_ops::type_scan(st, core.ty, &core.root_query, |root| {
        let root_path = path::root_path(root);
        let sub = core.subtree.get(&root_path).copied().unwrap_or(0);
        if skip >= 1 + sub {
            skip -= 1 + sub;
            return ControlFlow::Continue(());
        }
        if skip == 0 {
            let item = WalkItem {
                id: root,
                depth: 0,
                edge: None,
                parent: None,
                path: &root_path,
            };
            if f(item).is_break() {
                return ControlFlow::Break(());
            }
        } else {
            skip -= 1;
        }
        descend(core, st, &root_path, root, 0, &mut skip, &mut *f)
    });
}

fn descend(
    core: &ViewCore,
    st: &StoreState,
    path_key: &str,
    id: NodeId,
    depth: usize,
    skip: &mut usize,
    f: &mut dyn FnMut(WalkItem<'_>) -> ControlFlow<()>,
) -> ControlFlow<()> {
    let Some(map) = core.expansions.get(path_key) else {
        return ControlFlow::Continue(());
    };
    let Some(rec) = st.nodes.get(&id) else {
        return ControlFlow::Continue(());
    };
    let edge_ids: Vec<EdgeDefId> = st
        .catalog
        .type_meta(rec.ty)
        .edges
        .iter()
        .copied()
        .filter(|e| map.contains_key(e))
        .collect();
    for eid in edge_ids {
        let exp = &core.expansions[path_key][&eid];
        let inline = exp.inline;
        let sel = core.selection(st, id, eid, exp.cfg.as_ref());
        let edge_name = &st.catalog.edge(eid).name;
        for child in sel {
            let cp = path::child_path(path_key, edge_name, child);
            let self_cost = usize::from(!inline);
            let sub = core.subtree.get(&cp).copied().unwrap_or(0);
            if *skip >= self_cost + sub {
                *skip -= self_cost + sub;
                continue;
            }
            let child_depth = depth + self_cost;
            if !inline {
                if *skip == 0 {
                    f(WalkItem {
                        id: child,
                        depth: child_depth,
                        edge: Some(eid),
                        parent: Some(id),
                        path: &cp,
                    })?;
                } else {
                    *skip -= 1;
                }
            }
            descend(core, st, &cp, child, child_depth, skip, &mut *f)?;
        }
    }
    ControlFlow::Continue(())
}

/// Items in `[start, start+limit)` of the visible sequence.
pub(crate) fn collect_range(
    core: &ViewCore,
    st: &StoreState,
    start: usize,
    limit: Option<usize>,
) -> Vec<OwnedItem> {
    let mut out = Vec::new();
    walk(core, st, start, &mut |item| {
        out.push(OwnedItem {
            id: item.id,
            depth: item.depth,
            edge: item.edge,
            parent: item.parent,
            path: item.path.to_string(),
        });
        match limit {
            Some(n) if out.len() >= n => ControlFlow::Break(()),
            _ => ControlFlow::Continue(()),
        }
    });
    out
}

/// Path key of the first visible occurrence of `id`, in walk order.
pub(crate) fn find_path_of(core: &ViewCore, st: &StoreState, id: NodeId) -> Option<String> {
    let mut found = None;
    walk(core, st, 0, &mut |item| {
        if item.id == id {
            found = Some(item.path.to_string());
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    });
    found
}

/// Virtual position of the first visible occurrence of `id`.
pub(crate) fn position_of(core: &ViewCore, st: &StoreState, id: NodeId) -> Option<usize> {
    let mut pos = 0usize;
    let mut found = None;
    walk(core, st, 0, &mut |item| {
        if item.id == id {
            found = Some(pos);
            ControlFlow::Break(())
        } else {
            pos += 1;
            ControlFlow::Continue(())
        }
    });
    found
}
