//! Ordered set with positional access.
//!
//! A probabilistic skip list keyed by a caller-supplied comparator. Each
//! forward link carries a span (the number of elements it skips), which makes
//! rank queries and rank-positioned iteration O(log n). Node storage is an
//! index-based arena, so the structure contains no unsafe code.
//!
//! Value identity is comparator-only: two values the comparator deems equal
//! are the same element, and inserting the second is a no-op.
//!
//! Iterators borrow the list. Callers that dispatch user callbacks while
//! walking an index must buffer the walk first; the engine does exactly that
//! before any callback delivery (see `store::events`).

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use smallvec::SmallVec;
use std::cmp::Ordering;

const MAX_LEVEL: usize = 32;
const NIL: usize = usize::MAX;
const HEAD: usize = 0;

#[derive(Clone, Copy)]
struct Link {
    next: usize,
    span: usize,
}

struct Node<T> {
    value: Option<T>,
    links: SmallVec<[Link; 2]>,
}

/// Sorted set with O(log n) insert/remove/rank/seek and O(1) length.
pub struct SkipList<T> {
    nodes: Vec<Node<T>>,
    free: Vec<usize>,
    len: usize,
    level: usize,
    cmp: Box<dyn Fn(&T, &T) -> Ordering>,
    rng: StdRng,
}

impl<T> SkipList<T> {
    /// Creates an empty list ordered by `cmp`.
    pub fn new(cmp: impl Fn(&T, &T) -> Ordering + 'static) -> Self {
        let head = Node {
            value: None,
            links: (0..MAX_LEVEL).map(|_| Link { next: NIL, span: 0 }).collect(),
        };
        Self {
            nodes: vec![head],
            free: Vec::new(),
            len: 0,
            level: 1,
            cmp: Box::new(cmp),
            rng: StdRng::seed_from_u64(0x5EED_1157),
        }
    }

    /// Number of elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn random_level(&mut self) -> usize {
        let mut level = 1;
        while level < MAX_LEVEL && self.rng.gen_ratio(1, 4) {
            level += 1;
        }
        level
    }

    fn alloc(&mut self, value: T, level: usize) -> usize {
        let node = Node {
            value: Some(value),
            links: (0..level).map(|_| Link { next: NIL, span: 0 }).collect(),
        };
        if let Some(idx) = self.free.pop() {
            self.nodes[idx] = node;
            idx
        } else {
            self.nodes.push(node);
            self.nodes.len() - 1
        }
    }

    /// Locates the rightmost node strictly before the probe position at each
    /// level, together with its rank. `probe` compares an element against
    /// the target position (Less = element sorts before it).
    fn descend(
        &self,
        probe: &dyn Fn(&T) -> Ordering,
    ) -> (SmallVec<[usize; MAX_LEVEL]>, SmallVec<[usize; MAX_LEVEL]>) {
        let mut update: SmallVec<[usize; MAX_LEVEL]> = SmallVec::from_elem(HEAD, self.level);
        let mut rank: SmallVec<[usize; MAX_LEVEL]> = SmallVec::from_elem(0, self.level);
        let mut x = HEAD;
        let mut r = 0usize;
        for l in (0..self.level).rev() {
            loop {
                let link = self.nodes[x].links[l];
                if link.next == NIL {
                    break;
                }
                let val = self.nodes[link.next]
                    .value
                    .as_ref()
                    .expect("linked node holds a value");
                if probe(val) == Ordering::Less {
                    r += link.span;
                    x = link.next;
                } else {
                    break;
                }
            }
            update[l] = x;
            rank[l] = r;
        }
        (update, rank)
    }

    /// Inserts `value`, returning its 1-based rank and whether it was newly
    /// inserted. Inserting a comparator-equal value is a no-op that returns
    /// the existing element's rank.
    pub fn insert(&mut self, value: T) -> (usize, bool) {
        let (update, rank) = {
            let cmp = &self.cmp;
            self.descend(&|e| cmp(e, &value))
        };
        let at = self.nodes[update[0]].links[0].next;
        if at != NIL {
            let existing = self.nodes[at].value.as_ref().expect("value");
            if (self.cmp)(existing, &value) == Ordering::Equal {
                return (rank[0] + 1, false);
            }
        }

        let level = self.random_level();
        let mut update = update;
        let mut rank = rank;
        if level > self.level {
            for l in self.level..level {
                update.push(HEAD);
                rank.push(0);
                self.nodes[HEAD].links[l].span = self.len;
            }
            self.level = level;
        }

        let idx = self.alloc(value, level);
        let rank0 = rank[0];
        for l in 0..level {
            let prev = update[l];
            let prev_link = self.nodes[prev].links[l];
            self.nodes[idx].links[l] = Link {
                next: prev_link.next,
                span: prev_link.span.saturating_sub(rank0 - rank[l]),
            };
            self.nodes[prev].links[l] = Link {
                next: idx,
                span: (rank0 - rank[l]) + 1,
            };
        }
        for l in level..self.level {
            self.nodes[update[l]].links[l].span += 1;
        }
        self.len += 1;
        (rank0 + 1, true)
    }

    /// Removes the comparator-equal element, returning its former 1-based
    /// rank, or `None` when absent.
    pub fn remove(&mut self, value: &T) -> Option<usize> {
        let (update, rank) = {
            let cmp = &self.cmp;
            self.descend(&|e| cmp(e, value))
        };
        let target = self.nodes[update[0]].links[0].next;
        if target == NIL {
            return None;
        }
        {
            let existing = self.nodes[target].value.as_ref().expect("value");
            if (self.cmp)(existing, value) != Ordering::Equal {
                return None;
            }
        }
        for l in 0..self.level {
            let prev = update[l];
            if self.nodes[prev].links[l].next == target {
                let tlink = self.nodes[target].links[l];
                let plink = &mut self.nodes[prev].links[l];
                plink.next = tlink.next;
                plink.span += tlink.span.saturating_sub(1);
            } else if self.nodes[prev].links[l].next != NIL {
                self.nodes[prev].links[l].span -= 1;
            }
        }
        self.nodes[target].value = None;
        self.nodes[target].links.clear();
        self.free.push(target);
        while self.level > 1 && self.nodes[HEAD].links[self.level - 1].next == NIL {
            self.level -= 1;
        }
        self.len -= 1;
        Some(rank[0] + 1)
    }

    /// 1-based rank of the first element for which `probe` does not return
    /// `Less`; `len() + 1` when every element sorts before the probe point.
    pub fn rank_lower_bound_by(&self, probe: impl Fn(&T) -> Ordering) -> usize {
        let (_, rank) = self.descend(&probe);
        rank[0] + 1
    }

    /// Exact 1-based rank of a comparator-equal element.
    pub fn rank(&self, value: &T) -> Option<usize> {
        let r = self.rank_lower_bound_by(|e| (self.cmp)(e, value));
        let v = self.get(r)?;
        ((self.cmp)(v, value) == Ordering::Equal).then_some(r)
    }

    /// True when a comparator-equal element is present.
    pub fn contains(&self, value: &T) -> bool {
        self.rank(value).is_some()
    }

    fn node_at(&self, pos: usize) -> Option<usize> {
        if pos == 0 || pos > self.len {
            return None;
        }
        let mut x = HEAD;
        let mut acc = 0usize;
        for l in (0..self.level).rev() {
            loop {
                let link = self.nodes[x].links[l];
                if link.next != NIL && acc + link.span <= pos {
                    acc += link.span;
                    x = link.next;
                } else {
                    break;
                }
            }
            if acc == pos {
                return Some(x);
            }
        }
        None
    }

    /// Element at a 1-based rank.
    pub fn get(&self, pos: usize) -> Option<&T> {
        self.node_at(pos).map(|idx| {
            self.nodes[idx].value.as_ref().expect("ranked node holds a value")
        })
    }

    /// Alias for [`get`](Self::get) mirroring positional seek.
    pub fn seek(&self, pos: usize) -> Option<&T> {
        self.get(pos)
    }

    /// Ascending iterator over all elements.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            list: self,
            next: self.nodes[HEAD].links[0].next,
        }
    }

    /// Ascending iterator starting at a 1-based rank. O(log n) to position,
    /// O(1) per element after that.
    pub fn iter_from(&self, pos: usize) -> Iter<'_, T> {
        let next = if pos <= 1 {
            self.nodes[HEAD].links[0].next
        } else {
            self.node_at(pos - 1)
                .map(|idx| self.nodes[idx].links[0].next)
                .unwrap_or(NIL)
        };
        Iter { list: self, next }
    }
}

/// Ascending iterator over a [`SkipList`].
pub struct Iter<'a, T> {
    list: &'a SkipList<T>,
    next: usize,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next == NIL {
            return None;
        }
        let node = &self.list.nodes[self.next];
        self.next = node.links[0].next;
        node.value.as_ref()
    }
}
