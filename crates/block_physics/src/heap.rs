//! Array-backed min binary heap.
//!
//! The backing storage only ever grows: [`MinBinaryHeap::clear`] resets the
//! logical size and empties the used slots but keeps the allocation, so a
//! scheduler with steady throughput stops reallocating after warm-up.
//! Arbitrary removal is not supported; callers that need to cancel an entry
//! mark it and drop it when it reaches the head.

/// Ordering key an item is placed by.
pub trait HeapKey {
    type Key: Ord;

    fn heap_key(&self) -> Self::Key;
}

#[derive(Debug)]
pub struct MinBinaryHeap<T> {
    slots: Vec<Option<T>>,
    size: usize,
}

impl<T> Default for MinBinaryHeap<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            size: 0,
        }
    }
}

impl<T: HeapKey> MinBinaryHeap<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Number of slots allocated so far, used or not.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn add(&mut self, item: T) {
        let mut me = self.size;
        self.size += 1;
        if me < self.slots.len() {
            self.slots[me] = Some(item);
        } else {
            self.slots.push(Some(item));
        }
        while me > 0 {
            let parent = parent_idx(me);
            if self.key_at(parent) <= self.key_at(me) {
                break;
            }
            self.slots.swap(me, parent);
            me = parent;
        }
    }

    /// Minimum-key item, if any.
    pub fn head(&self) -> Option<&T> {
        if self.size == 0 {
            return None;
        }
        self.slots[0].as_ref()
    }

    pub fn remove_head(&mut self) -> Option<T> {
        if self.size == 0 {
            return None;
        }
        self.size -= 1;
        let last = self.slots[self.size].take();
        if self.size == 0 {
            return last;
        }
        let head = std::mem::replace(&mut self.slots[0], last);

        let mut me = 0;
        loop {
            let (kid1, kid2) = kids(me);
            if kid1 >= self.size {
                break;
            }
            let min_kid = if kid2 < self.size && self.key_at(kid2) < self.key_at(kid1) {
                kid2
            } else {
                kid1
            };
            if self.key_at(me) > self.key_at(min_kid) {
                self.slots.swap(me, min_kid);
                me = min_kid;
            } else {
                break;
            }
        }
        head
    }

    pub fn clear(&mut self) {
        for slot in self.slots.iter_mut().take(self.size) {
            *slot = None;
        }
        self.size = 0;
    }

    /// Items in heap order (not sorted).
    #[cfg(test)]
    pub(crate) fn iter(&self) -> impl Iterator<Item = &T> {
        self.slots[..self.size].iter().flatten()
    }

    fn key_at(&self, idx: usize) -> Option<T::Key> {
        self.slots[idx].as_ref().map(HeapKey::heap_key)
    }
}

fn parent_idx(idx: usize) -> usize {
    (idx - 1) / 2
}

fn kids(idx: usize) -> (usize, usize) {
    let kid1 = 2 * idx + 1;
    (kid1, kid1 + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Entry {
        key: i64,
        label: &'static str,
    }

    impl HeapKey for Entry {
        type Key = i64;

        fn heap_key(&self) -> i64 {
            self.key
        }
    }

    fn entry(key: i64) -> Entry {
        Entry { key, label: "" }
    }

    fn assert_heap_property(heap: &MinBinaryHeap<Entry>) {
        let keys: Vec<i64> = heap.iter().map(|item| item.key).collect();
        assert_eq!(keys.len(), heap.len());
        for (idx, key) in keys.iter().enumerate().skip(1) {
            let parent = keys[parent_idx(idx)];
            assert!(
                parent <= *key,
                "parent {} at {} exceeds child {} at {}",
                parent,
                parent_idx(idx),
                key,
                idx
            );
        }
    }

    // Small deterministic generator so the sequences are reproducible.
    fn lcg_sequence(seed: u64, count: usize) -> Vec<i64> {
        let mut state = seed;
        (0..count)
            .map(|_| {
                state = state
                    .wrapping_mul(6364136223846793005)
                    .wrapping_add(1442695040888963407);
                ((state >> 33) % 1000) as i64
            })
            .collect()
    }

    #[test]
    fn empty_heap_has_no_head() {
        let mut heap = MinBinaryHeap::<Entry>::new();
        assert!(heap.is_empty());
        assert!(heap.head().is_none());
        assert!(heap.remove_head().is_none());
        assert_eq!(heap.len(), 0);
    }

    #[test]
    fn head_tracks_minimum_after_every_add() {
        let mut heap = MinBinaryHeap::new();
        let mut min = i64::MAX;
        for key in lcg_sequence(7, 200) {
            heap.add(entry(key));
            min = min.min(key);
            assert_eq!(heap.head().map(|item| item.key), Some(min));
            assert_heap_property(&heap);
        }
    }

    #[test]
    fn remove_head_pops_in_nondecreasing_order() {
        let mut heap = MinBinaryHeap::new();
        let keys = lcg_sequence(42, 300);
        for key in &keys {
            heap.add(entry(*key));
        }

        let mut popped = Vec::new();
        while !heap.is_empty() {
            let before = heap.len();
            let item = heap.remove_head().expect("non-empty heap");
            assert_eq!(heap.len(), before - 1);
            assert_heap_property(&heap);
            popped.push(item.key);
        }

        let mut sorted = keys.clone();
        sorted.sort_unstable();
        assert_eq!(popped, sorted);
    }

    #[test]
    fn interleaved_add_and_remove_keep_heap_property() {
        let mut heap = MinBinaryHeap::<Entry>::new();
        for (step, key) in lcg_sequence(3, 400).into_iter().enumerate() {
            if step % 3 == 2 {
                let expected = heap.iter().map(|item| item.key).min();
                let removed = heap.remove_head().map(|item| item.key);
                assert_eq!(removed, expected);
            } else {
                heap.add(entry(key));
            }
            assert_heap_property(&heap);
        }
    }

    #[test]
    fn equal_keys_are_all_returned() {
        let mut heap = MinBinaryHeap::new();
        for label in ["a", "b", "c"] {
            heap.add(Entry { key: 5, label });
        }
        heap.add(Entry { key: 1, label: "first" });

        assert_eq!(heap.remove_head().map(|item| item.label), Some("first"));
        let mut rest: Vec<&str> = std::iter::from_fn(|| heap.remove_head())
            .map(|item| item.label)
            .collect();
        rest.sort_unstable();
        assert_eq!(rest, vec!["a", "b", "c"]);
    }

    #[test]
    fn clear_resets_size_but_keeps_capacity() {
        let mut heap = MinBinaryHeap::new();
        for key in 0..16 {
            heap.add(entry(key));
        }
        let capacity = heap.capacity();
        heap.clear();

        assert_eq!(heap.len(), 0);
        assert!(heap.head().is_none());
        assert_eq!(heap.capacity(), capacity);
        assert!(heap.slots.iter().all(Option::is_none));

        heap.add(entry(9));
        heap.add(entry(4));
        assert_eq!(heap.capacity(), capacity);
        assert_eq!(heap.head().map(|item| item.key), Some(4));
    }

    #[test]
    fn removed_items_are_not_retained() {
        let shared = std::rc::Rc::new(());

        struct Tracked(i64, std::rc::Rc<()>);
        impl HeapKey for Tracked {
            type Key = i64;
            fn heap_key(&self) -> i64 {
                self.0
            }
        }

        let mut heap = MinBinaryHeap::new();
        heap.add(Tracked(2, std::rc::Rc::clone(&shared)));
        heap.add(Tracked(1, std::rc::Rc::clone(&shared)));
        assert_eq!(std::rc::Rc::strong_count(&shared), 3);

        drop(heap.remove_head());
        assert_eq!(std::rc::Rc::strong_count(&shared), 2);
        drop(heap.remove_head());
        assert_eq!(std::rc::Rc::strong_count(&shared), 1);
        assert_eq!(heap.capacity(), 2);
    }
}
