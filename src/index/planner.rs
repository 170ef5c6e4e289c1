//! Covering-index selection.
//!
//! An index covers a query when its leading fields satisfy every equality
//! filter, optionally followed by the single range filter's field, and the
//! requested sort lands on the range field (or the next field) with the
//! matching direction. The first candidate satisfying the rules wins; there
//! is no cost model.

use crate::model::Value;
use crate::schema::{CompiledFilter, Dir, FilterOp};
use crate::types::PropId;

/// Execution window over the selected index.
#[derive(Debug, Clone)]
pub struct IndexQuery {
    /// Position of the chosen index among the candidates.
    pub index_no: usize,
    /// Equality values for the leading index fields, in index order.
    pub eq: Vec<Value>,
    /// Range bound on the field right after the equality prefix.
    pub range: Option<RangeSpec>,
}

/// The single permitted range bound.
#[derive(Debug, Clone)]
pub struct RangeSpec {
    pub op: FilterOp,
    pub value: Value,
    /// Index direction of the range field.
    pub dir: Dir,
}

/// Selects the first candidate index covering `filters` + `sort`.
///
/// With no filters and no sort any index covers; the first candidate is
/// returned. `None` means no candidate covers the query (including the
/// more-than-one-range case, which no index can cover).
pub fn plan<'a, I>(
    candidates: I,
    filters: &[CompiledFilter],
    sort: Option<(PropId, Dir)>,
) -> Option<IndexQuery>
where
    I: IntoIterator<Item = &'a [(PropId, Dir)]>,
{
    let eq: Vec<&CompiledFilter> = filters.iter().filter(|f| f.op == FilterOp::Eq).collect();
    let ranges: Vec<&CompiledFilter> = filters.iter().filter(|f| f.op != FilterOp::Eq).collect();
    if ranges.len() > 1 {
        return None;
    }
    let range = ranges.first();

    for (index_no, fields) in candidates.into_iter().enumerate() {
        if let Some(query) = try_cover(index_no, fields, &eq, range.copied(), sort) {
            return Some(query);
        }
    }
    None
}

fn try_cover(
    index_no: usize,
    fields: &[(PropId, Dir)],
    eq: &[&CompiledFilter],
    range: Option<&CompiledFilter>,
    sort: Option<(PropId, Dir)>,
) -> Option<IndexQuery> {
    if fields.len() < eq.len() {
        return None;
    }
    let prefix = &fields[..eq.len()];
    let mut eq_values = Vec::with_capacity(eq.len());
    for (prop, _) in prefix {
        let filter = eq.iter().find(|f| f.prop == *prop)?;
        eq_values.push(filter.value.clone());
    }
    // Every equality filter must be consumed by the prefix.
    if eq.iter().any(|f| !prefix.iter().any(|(p, _)| *p == f.prop)) {
        return None;
    }

    let mut pos = eq.len();
    let mut range_spec = None;
    if let Some(r) = range {
        let (prop, dir) = fields.get(pos)?;
        if *prop != r.prop {
            return None;
        }
        range_spec = Some(RangeSpec {
            op: r.op,
            value: r.value.clone(),
            dir: *dir,
        });
        pos += 1;
    }

    if let Some((sort_prop, sort_dir)) = sort {
        let (field, dir) = match &range_spec {
            Some(spec) => (fields[pos - 1].0, spec.dir),
            None => {
                let (p, d) = fields.get(pos)?;
                (*p, *d)
            }
        };
        if field != sort_prop || dir != sort_dir {
            return None;
        }
    }

    Some(IndexQuery {
        index_no,
        eq: eq_values,
        range: range_spec,
    })
}
