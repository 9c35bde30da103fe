//! Sorted linked list of column indices over a fixed universe.
//!
//! Nodes live in a `next` array indexed by the column itself, so membership is O(1)
//! and inserting a run of ascending indices walks the list only once. Used to merge
//! the column sets of several sparse rows without sorting.

/// Sorted, duplicate-free set of indices in `0..universe`.
#[derive(Debug, Clone)]
pub struct SortedIndexList {
    next: Vec<usize>,
    present: Vec<bool>,
    len: usize,
}

impl SortedIndexList {
    pub fn new(universe: usize) -> Self {
        let mut next = vec![universe; universe + 1];
        next[universe] = universe;
        Self {
            next,
            present: vec![false; universe],
            len: 0,
        }
    }

    fn head(&self) -> usize {
        self.present.len()
    }

    pub fn universe(&self) -> usize {
        self.present.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn contains(&self, idx: usize) -> bool {
        self.present.get(idx).copied().unwrap_or(false)
    }

    /// Smallest element.
    pub fn first(&self) -> Option<usize> {
        let f = self.next[self.head()];
        (f != self.head()).then_some(f)
    }

    /// Successor of `idx`, which must be in the list.
    pub fn next_of(&self, idx: usize) -> Option<usize> {
        debug_assert!(self.contains(idx));
        let n = self.next[idx];
        (n != self.head()).then_some(n)
    }

    /// Insert `idx`, searching from the node `from` (or the head). `from` must precede `idx`.
    fn insert_after(&mut self, from: usize, idx: usize) -> usize {
        let end = self.head();
        let mut cur = from;
        while self.next[cur] != end && self.next[cur] < idx {
            cur = self.next[cur];
        }
        self.next[idx] = self.next[cur];
        self.next[cur] = idx;
        self.present[idx] = true;
        self.len += 1;
        idx
    }

    /// Insert one index. Returns false when it was already present.
    pub fn insert(&mut self, idx: usize) -> bool {
        debug_assert!(idx < self.universe());
        if self.present[idx] {
            return false;
        }
        let head = self.head();
        self.insert_after(head, idx);
        true
    }

    /// Insert `idx` knowing that `hint` is already in the list and `hint < idx`.
    pub fn insert_from(&mut self, hint: usize, idx: usize) -> bool {
        debug_assert!(self.contains(hint) && hint < idx);
        if self.present[idx] {
            return false;
        }
        self.insert_after(hint, idx);
        true
    }

    /// Merge a set of indices. Ascending input is merged in a single pass; any
    /// descent restarts the walk from the head. Returns how many were new.
    pub fn merge(&mut self, indices: &[usize]) -> usize {
        let head = self.head();
        let mut cursor = head;
        let mut last = None;
        let mut added = 0;
        for &idx in indices {
            debug_assert!(idx < self.universe());
            if last.is_some_and(|l| idx < l) {
                cursor = head;
            }
            last = Some(idx);
            if self.present[idx] {
                cursor = idx;
                continue;
            }
            cursor = self.insert_after(cursor, idx);
            added += 1;
        }
        added
    }

    /// Append the elements in ascending order to `out` and reset the list.
    pub fn drain_into(&mut self, out: &mut Vec<usize>) {
        let head = self.head();
        let mut cur = self.next[head];
        out.reserve(self.len);
        while cur != head {
            out.push(cur);
            self.present[cur] = false;
            cur = self.next[cur];
        }
        self.next[head] = head;
        self.len = 0;
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        let head = self.head();
        std::iter::successors(self.first(), move |&i| {
            let n = self.next[i];
            (n != head).then_some(n)
        })
    }
}
