//! Mutex-guarded priority list used for inspection, administration, and as
//! a backlog in front of the bounded admission queue.
//!
//! Ordering: descending priority, FIFO within a priority band. Insertion is
//! a linear scan (O(n)); this structure is not the high-throughput admission
//! path, so the simple representation is kept deliberately.

use parking_lot::Mutex;

/// Items that can be ordered and addressed inside a [`PriorityQueue`].
pub trait Prioritized {
    type Key: PartialEq;

    /// Identity used by [`PriorityQueue::remove`].
    fn key(&self) -> &Self::Key;

    /// Higher values are served first.
    fn priority(&self) -> i32;
}

/// Thread-safe priority list. Slices are never exposed; reads return copies.
#[derive(Debug)]
pub struct PriorityQueue<T> {
    items: Mutex<Vec<T>>,
}

impl<T> Default for PriorityQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PriorityQueue<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Remove everything, returning how many items were dropped.
    pub fn clear(&self) -> usize {
        let mut items = self.items.lock();
        let n = items.len();
        items.clear();
        n
    }

    /// Remove and return the highest-priority item.
    pub fn pop(&self) -> Option<T> {
        let mut items = self.items.lock();
        if items.is_empty() {
            None
        } else {
            Some(items.remove(0))
        }
    }
}

impl<T: Prioritized> PriorityQueue<T> {
    /// Insert before the first item of strictly lower priority, otherwise append.
    pub fn push(&self, item: T) {
        let mut items = self.items.lock();
        let priority = item.priority();
        let pos = items
            .iter()
            .position(|existing| existing.priority() < priority)
            .unwrap_or(items.len());
        items.insert(pos, item);
    }

    /// Remove the item with the given key, if present.
    pub fn remove(&self, key: &T::Key) -> Option<T> {
        let mut items = self.items.lock();
        let pos = items.iter().position(|item| item.key() == key)?;
        Some(items.remove(pos))
    }
}

impl<T: Clone> PriorityQueue<T> {
    /// Copy of the head item, without removing it.
    pub fn peek(&self) -> Option<T> {
        self.items.lock().first().cloned()
    }

    /// Copy of every item, in serving order.
    pub fn get_all(&self) -> Vec<T> {
        self.items.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Item {
        id: u32,
        priority: i32,
    }

    impl Prioritized for Item {
        type Key = u32;

        fn key(&self) -> &u32 {
            &self.id
        }

        fn priority(&self) -> i32 {
            self.priority
        }
    }

    fn item(id: u32, priority: i32) -> Item {
        Item { id, priority }
    }

    #[test]
    fn pops_by_priority_with_fifo_ties() {
        let q = PriorityQueue::new();
        q.push(item(1, 5));
        q.push(item(2, 1));
        q.push(item(3, 5));
        q.push(item(4, 3));

        let popped: Vec<_> = std::iter::from_fn(|| q.pop()).collect();
        assert_eq!(
            popped.iter().map(|i| i.priority).collect::<Vec<_>>(),
            vec![5, 5, 3, 1]
        );
        assert_eq!(popped[0].id, 1);
        assert_eq!(popped[1].id, 3);
    }

    #[test]
    fn pop_on_empty_returns_none() {
        let q: PriorityQueue<Item> = PriorityQueue::new();
        assert!(q.pop().is_none());
        assert!(q.peek().is_none());
        assert!(q.is_empty());
    }

    #[test]
    fn peek_does_not_remove() {
        let q = PriorityQueue::new();
        q.push(item(1, 2));
        q.push(item(2, 9));

        assert_eq!(q.peek(), Some(item(2, 9)));
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn remove_by_id_keeps_order_of_the_rest() {
        let q = PriorityQueue::new();
        q.push(item(1, 1));
        q.push(item(2, 2));
        q.push(item(3, 3));

        assert_eq!(q.remove(&2), Some(item(2, 2)));
        assert_eq!(q.remove(&2), None);
        assert_eq!(q.get_all(), vec![item(3, 3), item(1, 1)]);
    }

    #[test]
    fn get_all_returns_a_copy() {
        let q = PriorityQueue::new();
        q.push(item(1, 1));

        let mut snapshot = q.get_all();
        snapshot.clear();
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn clear_reports_removed_count() {
        let q = PriorityQueue::new();
        q.push(item(1, 1));
        q.push(item(2, 1));

        assert_eq!(q.clear(), 2);
        assert!(q.is_empty());
    }

    #[test]
    fn negative_priorities_sort_after_zero() {
        let q = PriorityQueue::new();
        q.push(item(1, -4));
        q.push(item(2, 0));
        assert_eq!(q.pop(), Some(item(2, 0)));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: popping yields a stable sort by descending priority.
        #[test]
        fn pop_order_is_stable_descending_sort(
            priorities in prop::collection::vec(-5i32..5, 0..64)
        ) {
            let q = PriorityQueue::new();
            for (id, p) in priorities.iter().enumerate() {
                q.push(item(id as u32, *p));
            }

            let mut expected: Vec<Item> = priorities
                .iter()
                .enumerate()
                .map(|(id, p)| item(id as u32, *p))
                .collect();
            expected.sort_by(|a, b| b.priority.cmp(&a.priority));

            let popped: Vec<Item> = std::iter::from_fn(|| q.pop()).collect();
            prop_assert_eq!(popped, expected);
        }
    }
}
