//! Path keys.
//!
//! A path key encodes the ancestor chain of one visible occurrence of a
//! node: `"7"` for a root, `"7:posts:12:comments:40"` for a descendant.
//! Multi-parent nodes get one path per visible occurrence.

use crate::types::NodeId;

/// Path key of a root occurrence.
pub(crate) fn root_path(id: NodeId) -> String {
    id.0.to_string()
}

/// Path key of a child occurrence under `parent_path:edge`.
pub(crate) fn child_path(parent_path: &str, edge: &str, id: NodeId) -> String {
    format!("{parent_path}:{edge}:{}", id.0)
}

/// Terminal node id of a path.
pub(crate) fn terminal_id(path: &str) -> NodeId {
    let last = path.rsplit(':').next().unwrap_or(path);
    NodeId(last.parse().unwrap_or(0))
}

/// Structural depth: number of `:` separator pairs.
pub(crate) fn depth(path: &str) -> usize {
    path.matches(':').count() / 2
}

/// Edge names along the path, outermost first.
pub(crate) fn edge_names(path: &str) -> Vec<&str> {
    path.split(':').skip(1).step_by(2).collect()
}

/// Every ancestor path including the path itself, shortest first.
pub(crate) fn prefixes(path: &str) -> Vec<String> {
    let parts: Vec<&str> = path.split(':').collect();
    let mut out = Vec::with_capacity(parts.len() / 2 + 1);
    let mut i = 1;
    while i <= parts.len() {
        out.push(parts[..i].join(":"));
        i += 2;
    }
    out
}

/// True when `path` lies strictly under `parent_path:edge:`.
pub(crate) fn under_edge(path: &str, parent_path: &str, edge: &str) -> bool {
    path.len() > parent_path.len() + edge.len() + 2
        && path.starts_with(parent_path)
        && path[parent_path.len()..].starts_with(':')
        && path[parent_path.len() + 1..].starts_with(edge)
        && path[parent_path.len() + 1 + edge.len()..].starts_with(':')
}
