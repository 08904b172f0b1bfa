//! Associative priority queue.

use std::cmp::{Eq, Ord, Ordering, PartialOrd};
use std::collections::BinaryHeap;

/// A key-value pair ordered by keys in inverse order, with epoch-based ordering
/// for equal keys.
struct Item<K, V>
where
    K: Ord,
{
    key: K,
    value: V,
    epoch: u64,
}

impl<K: Ord, V> Ord for Item<K, V> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key
            .cmp(&other.key)
            .then_with(|| self.epoch.cmp(&other.epoch))
            .reverse()
    }
}

impl<K: Ord, V> PartialOrd for Item<K, V> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K: Ord, V> Eq for Item<K, V> {}

impl<K: Ord, V> PartialEq for Item<K, V> {
    fn eq(&self, other: &Self) -> bool {
        (self.key == other.key) && (self.epoch == other.epoch)
    }
}

/// A priority queue that yields the item with the smallest key first.
///
/// Items with equal keys are popped in insertion order.
pub(crate) struct PriorityQueue<K, V>
where
    K: Ord,
{
    heap: BinaryHeap<Item<K, V>>,
    next_epoch: u64,
}

impl<K: Ord, V> PriorityQueue<K, V> {
    /// Creates an empty `PriorityQueue`.
    pub(crate) fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_epoch: 0,
        }
    }

    /// Inserts a new key-value pair.
    ///
    /// This operation has *O*(log(*N*)) amortized worse-case theoretical
    /// complexity and *O*(1) amortized theoretical complexity for a
    /// sufficiently random heap.
    pub(crate) fn insert(&mut self, key: K, value: V) {
        // Build an item from the key, value and epoch.
        let item = Item {
            key,
            value,
            epoch: self.next_epoch,
        };
        self.next_epoch += 1;

        self.heap.push(item);
    }

    /// Pulls the item with the smallest key.
    ///
    /// If there are several items with the same smallest key, the item that
    /// was inserted first is returned.
    ///
    /// This operation has *O*(log(*N*)) non-amortized theoretical complexity.
    pub(crate) fn pull(&mut self) -> Option<(K, V)> {
        self.heap.pop().map(|item| (item.key, item.value))
    }

    /// Peeks a reference to the key of the item with the smallest key.
    pub(crate) fn peek_key(&self) -> Option<&K> {
        self.heap.peek().map(|item| &item.key)
    }

    /// Returns the number of items in the queue.
    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }

    /// Removes all items from the queue, returning them in unspecified order.
    pub(crate) fn drain(&mut self) -> impl Iterator<Item = (K, V)> + '_ {
        self.heap.drain().map(|item| (item.key, item.value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_queue_smoke() {
        let mut q = PriorityQueue::new();

        q.insert(5, 'a');
        q.insert(2, 'b');
        q.insert(3, 'c');
        q.insert(2, 'd');
        q.insert(7, 'e');

        assert_eq!(q.len(), 5);
        assert_eq!(q.peek_key(), Some(&2));

        assert_eq!(q.pull(), Some((2, 'b')));
        assert_eq!(q.pull(), Some((2, 'd')));
        assert_eq!(q.pull(), Some((3, 'c')));
        assert_eq!(q.pull(), Some((5, 'a')));
        assert_eq!(q.pull(), Some((7, 'e')));
        assert_eq!(q.pull(), None);
        assert_eq!(q.len(), 0);
    }

    #[test]
    fn priority_queue_composite_key_is_stable() {
        let mut q = PriorityQueue::new();

        q.insert((1, 1), "normal-1");
        q.insert((1, 0), "urgent-1");
        q.insert((0, 2), "low-0");
        q.insert((1, 1), "normal-2");
        q.insert((1, 0), "urgent-2");

        let order: Vec<_> = std::iter::from_fn(|| q.pull().map(|(_, v)| v)).collect();
        assert_eq!(
            order,
            ["low-0", "urgent-1", "urgent-2", "normal-1", "normal-2"]
        );
    }

    #[test]
    fn priority_queue_drain() {
        let mut q = PriorityQueue::new();
        q.insert(1, ());
        q.insert(0, ());

        assert_eq!(q.drain().count(), 2);
        assert_eq!(q.peek_key(), None);
    }
}
