//! Direction-aware ordering for index keys.
//!
//! Cross-type rank is `Bool < Number < Str`, with `Nil` greatest, so nil
//! sorts after non-nil ascending and before non-nil descending. Booleans
//! compare `false < true`; numbers compare by `f64::total_cmp`.

use crate::model::Value;
use crate::schema::Dir;
use crate::types::NodeId;
use smallvec::SmallVec;
use std::cmp::Ordering;

/// Denormalized key tuple carried by an index entry.
pub type KeyTuple = SmallVec<[Value; 4]>;

fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Bool(_) => 0,
        Value::Number(_) => 1,
        Value::Str(_) => 2,
        Value::Nil => 3,
    }
}

/// Compares two values in ascending index order.
pub fn cmp_asc(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => x.total_cmp(y),
        (Value::Str(x), Value::Str(y)) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// Compares two values under an index field direction.
pub fn cmp_dir(a: &Value, b: &Value, dir: Dir) -> Ordering {
    match dir {
        Dir::Asc => cmp_asc(a, b),
        Dir::Desc => cmp_asc(b, a),
    }
}

/// Compares two key tuples field-by-field under the index directions,
/// falling back to the id tiebreaker.
pub fn cmp_entry(
    a_key: &[Value],
    a_id: NodeId,
    b_key: &[Value],
    b_id: NodeId,
    dirs: &[Dir],
) -> Ordering {
    for (i, dir) in dirs.iter().enumerate() {
        let ord = cmp_dir(&a_key[i], &b_key[i], *dir);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a_id.cmp(&b_id)
}
