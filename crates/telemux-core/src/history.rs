//! Fixed-capacity ring buffer for chart history.
//!
//! `push` is O(1): once full, the write head wraps and overwrites the
//! oldest slot. Iteration always runs oldest to newest and can be
//! restarted any number of times.

use std::iter::FusedIterator;

/// Bounded FIFO history of the last `capacity` items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryBuffer<T> {
    items: Vec<T>,
    /// Index of the oldest element once the buffer has wrapped.
    head: usize,
    capacity: usize,
}

impl<T> HistoryBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
            head: 0,
            capacity,
        }
    }

    /// Append `item`, returning the element it evicted, if any.
    ///
    /// With capacity 0 the item itself is handed back.
    pub fn push(&mut self, item: T) -> Option<T> {
        if self.capacity == 0 {
            return Some(item);
        }
        if self.items.len() < self.capacity {
            self.items.push(item);
            return None;
        }
        let evicted = std::mem::replace(&mut self.items[self.head], item);
        self.head = (self.head + 1) % self.capacity;
        Some(evicted)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.capacity > 0 && self.items.len() == self.capacity
    }

    /// Most recently pushed item.
    pub fn latest(&self) -> Option<&T> {
        if self.items.is_empty() {
            return None;
        }
        let newest = (self.head + self.items.len() - 1) % self.items.len();
        self.items.get(newest)
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.head = 0;
    }

    pub fn iter(&self) -> Iter<'_, T> {
        let (newer, older) = self.items.split_at(self.head);
        Iter {
            older: older.iter(),
            newer: newer.iter(),
        }
    }
}

impl<T: Clone> HistoryBuffer<T> {
    /// Snapshot, oldest first.
    pub fn to_vec(&self) -> Vec<T> {
        self.iter().cloned().collect()
    }
}

impl<'a, T> IntoIterator for &'a HistoryBuffer<T> {
    type Item = &'a T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Oldest-to-newest iterator over a [`HistoryBuffer`].
#[derive(Debug, Clone)]
pub struct Iter<'a, T> {
    older: std::slice::Iter<'a, T>,
    newer: std::slice::Iter<'a, T>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        self.older.next().or_else(|| self.newer.next())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.older.len() + self.newer.len();
        (n, Some(n))
    }
}

impl<T> ExactSizeIterator for Iter<'_, T> {}
impl<T> FusedIterator for Iter<'_, T> {}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn keeps_last_capacity_items_in_order() {
        let mut buf = HistoryBuffer::new(5);
        for i in 1..=12 {
            buf.push(i);
        }
        assert_eq!(buf.len(), 5);
        assert_eq!(buf.to_vec(), vec![8, 9, 10, 11, 12]);
        assert_eq!(buf.latest(), Some(&12));
    }

    #[test]
    fn under_capacity_has_no_eviction() {
        let mut buf = HistoryBuffer::new(4);
        assert_eq!(buf.push('a'), None);
        assert_eq!(buf.push('b'), None);
        assert_eq!(buf.to_vec(), vec!['a', 'b']);
        assert!(!buf.is_full());
    }

    #[test]
    fn push_returns_evicted_oldest() {
        let mut buf = HistoryBuffer::new(2);
        buf.push(1);
        buf.push(2);
        assert_eq!(buf.push(3), Some(1));
        assert_eq!(buf.push(4), Some(2));
        assert_eq!(buf.push(5), Some(3));
        assert_eq!(buf.to_vec(), vec![4, 5]);
    }

    #[test]
    fn iteration_is_restartable() {
        let mut buf = HistoryBuffer::new(3);
        for i in 0..7 {
            buf.push(i);
        }
        let first: Vec<_> = buf.iter().copied().collect();
        let second: Vec<_> = (&buf).into_iter().copied().collect();
        assert_eq!(first, second);
        assert_eq!(buf.iter().len(), 3);
    }

    #[test]
    fn zero_capacity_retains_nothing() {
        let mut buf = HistoryBuffer::new(0);
        assert_eq!(buf.push("x"), Some("x"));
        assert!(buf.is_empty());
        assert_eq!(buf.latest(), None);
        assert_eq!(buf.iter().count(), 0);
    }

    #[test]
    fn clear_resets_head() {
        let mut buf = HistoryBuffer::new(3);
        for i in 0..5 {
            buf.push(i);
        }
        buf.clear();
        assert!(buf.is_empty());
        buf.push(10);
        buf.push(11);
        assert_eq!(buf.to_vec(), vec![10, 11]);
        assert_eq!(buf.latest(), Some(&11));
    }
}
