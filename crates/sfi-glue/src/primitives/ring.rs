//! Circular list used for message and event queues.
//!
//! The ring is ordered starting at its head; the tail links back to the head,
//! so `split` followed by `concat` restores the original cyclic order. All
//! ordering operations are stable.

use std::cmp::Ordering;
use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ring<T> {
    nodes: VecDeque<T>,
}

impl<T> Default for Ring<T> {
    fn default() -> Self {
        Self {
            nodes: VecDeque::new(),
        }
    }
}

impl<T> Ring<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn prepend(&mut self, data: T) {
        self.nodes.push_front(data);
    }

    pub fn append(&mut self, data: T) {
        self.nodes.push_back(data);
    }

    /// Insert at `position`; positions past the tail append.
    pub fn insert(&mut self, position: usize, data: T) {
        let position = position.min(self.nodes.len());
        self.nodes.insert(position, data);
    }

    pub fn head(&self) -> Option<&T> {
        self.nodes.front()
    }

    pub fn tail(&self) -> Option<&T> {
        self.nodes.back()
    }

    pub fn pop_head(&mut self) -> Option<T> {
        self.nodes.pop_front()
    }

    pub fn pop_tail(&mut self) -> Option<T> {
        self.nodes.pop_back()
    }

    pub fn nth(&self, n: usize) -> Option<&T> {
        self.nodes.get(n)
    }

    pub fn nth_mut(&mut self, n: usize) -> Option<&mut T> {
        self.nodes.get_mut(n)
    }

    /// Remove the node at `position`.
    pub fn remove_node(&mut self, position: usize) -> Option<T> {
        self.nodes.remove(position)
    }

    /// Position of the first node matching `predicate`.
    pub fn find<F>(&self, predicate: F) -> Option<usize>
    where
        F: FnMut(&T) -> bool,
    {
        self.nodes.iter().position(predicate)
    }

    /// Remove and return the first node matching `predicate`.
    pub fn remove_first<F>(&mut self, predicate: F) -> Option<T>
    where
        F: FnMut(&T) -> bool,
    {
        let position = self.find(predicate)?;
        self.nodes.remove(position)
    }

    /// Keep only the nodes matching `predicate`, preserving order.
    pub fn retain<F>(&mut self, predicate: F)
    where
        F: FnMut(&T) -> bool,
    {
        self.nodes.retain(predicate);
    }

    /// Append every node of `other` after the tail of `self`.
    pub fn concat(&mut self, mut other: Ring<T>) {
        self.nodes.append(&mut other.nodes);
    }

    /// Split the ring before `position`, returning the ring that starts there.
    pub fn split(&mut self, position: usize) -> Ring<T> {
        let position = position.min(self.nodes.len());
        Ring {
            nodes: self.nodes.split_off(position),
        }
    }

    pub fn reverse(&mut self) {
        self.nodes.make_contiguous().reverse();
    }

    pub fn iter(&self) -> std::collections::vec_deque::Iter<'_, T> {
        self.nodes.iter()
    }

    pub fn iter_mut(&mut self) -> std::collections::vec_deque::IterMut<'_, T> {
        self.nodes.iter_mut()
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
    }

    /// Insert after every node that compares less or equal.
    pub fn insert_sorted<F>(&mut self, data: T, mut cmp: F)
    where
        F: FnMut(&T, &T) -> Ordering,
    {
        // Walking from the tail keeps appends of ascending data O(1).
        let mut position = self.nodes.len();
        while position > 0 && cmp(&self.nodes[position - 1], &data) == Ordering::Greater {
            position -= 1;
        }
        self.nodes.insert(position, data);
    }

    /// Merge two sorted rings. On ties, nodes of `self` come first.
    pub fn merge_sorted<F>(self, other: Ring<T>, mut cmp: F) -> Ring<T>
    where
        F: FnMut(&T, &T) -> Ordering,
    {
        merge(self, other, &mut cmp)
    }

    /// Stable merge sort.
    pub fn sort<F>(&mut self, mut cmp: F)
    where
        F: FnMut(&T, &T) -> Ordering,
    {
        let ring = std::mem::take(self);
        *self = merge_sort(ring, &mut cmp);
    }
}

impl<T: PartialEq> Ring<T> {
    /// Remove one node equal to `data`. The tail is checked first, then the
    /// ring is scanned from the head.
    pub fn remove(&mut self, data: &T) -> bool {
        if self.nodes.back() == Some(data) {
            self.nodes.pop_back();
            return true;
        }
        self.remove_first(|node| node == data).is_some()
    }

    pub fn position(&self, data: &T) -> Option<usize> {
        self.find(|node| node == data)
    }
}

fn merge_sort<T, F>(mut ring: Ring<T>, cmp: &mut F) -> Ring<T>
where
    F: FnMut(&T, &T) -> Ordering,
{
    if ring.len() < 2 {
        return ring;
    }
    let back = ring.split(middle(&ring));
    let front = merge_sort(ring, cmp);
    let back = merge_sort(back, cmp);
    merge(front, back, cmp)
}

/// Middle position found by advancing one cursor at half the speed of another.
fn middle<T>(ring: &Ring<T>) -> usize {
    let mut slow = 0;
    let mut fast = ring.nodes.iter().skip(1);
    while fast.next().is_some() && fast.next().is_some() {
        slow += 1;
    }
    slow + 1
}

fn merge<T, F>(mut left: Ring<T>, mut right: Ring<T>, cmp: &mut F) -> Ring<T>
where
    F: FnMut(&T, &T) -> Ordering,
{
    let mut merged = VecDeque::with_capacity(left.len() + right.len());
    loop {
        let take_right = match (left.head(), right.head()) {
            (Some(l), Some(r)) => cmp(l, r) == Ordering::Greater,
            _ => break,
        };
        let node = if take_right {
            right.pop_head()
        } else {
            left.pop_head()
        };
        merged.extend(node);
    }
    merged.append(&mut left.nodes);
    merged.append(&mut right.nodes);
    Ring { nodes: merged }
}

impl<T> FromIterator<T> for Ring<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self {
            nodes: iter.into_iter().collect(),
        }
    }
}

impl<T> IntoIterator for Ring<T> {
    type Item = T;
    type IntoIter = std::collections::vec_deque::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.nodes.into_iter()
    }
}

impl<T> Extend<T> for Ring<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        self.nodes.extend(iter);
    }
}
