//! Lock-free concurrent ordered map.
//!
//! A Harris/Michael-style skip list keyed by `String`, generic over the value
//! type. Logical deletion sets the mark bit carried by each next-pointer, and
//! traversals physically unlink marked nodes as they pass. Every operation is
//! lock-free: a failed CAS always means some other thread made global
//! progress.
//!
//! # Linearisation points
//!
//! - `insert`: the successful CAS that links the node at level 0.
//! - `remove`: the CAS that marks the node's level-0 next-pointer.
//! - `search`: the level-0 load that observes (or misses) the key.
//!
//! # Memory reclamation
//!
//! Nodes are reclaimed through `crossbeam-epoch`. Each node counts its live
//! incoming links: one for the level-0 link taken at publication, plus one
//! per successful upper-level link. Unlinking a node at some level releases
//! one count; the thread whose release drops the count to zero hands the node
//! to the epoch collector. A count can never be re-acquired once it reaches
//! zero, so a fully unlinked node is unreachable from every traversal that
//! pins after that point.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_epoch::{self as epoch, Guard, Owned, Shared};
use rand::Rng;

use crate::error::MapError;
use crate::markable::MarkableRef;

/// Highest level a node can occupy.
const MAX_LEVEL: usize = 31;

/// Number of next-slots per node.
const NUM_LEVELS: usize = MAX_LEVEL + 1;

struct Node<V> {
    key: String,
    /// `None` only for the two sentinels.
    value: Option<V>,
    /// Highest level this node is linked at; levels above `height` are
    /// never traversed through this node.
    height: usize,
    next: [MarkableRef<Node<V>>; NUM_LEVELS],
    /// Live incoming links; the release that hits zero reclaims the node.
    links: AtomicUsize,
}

impl<V> Node<V> {
    fn new(key: String, value: V, height: usize) -> Self {
        Node {
            key,
            value: Some(value),
            height,
            next: std::array::from_fn(|_| MarkableRef::null()),
            links: AtomicUsize::new(1),
        }
    }

    fn sentinel() -> Self {
        Node {
            key: String::new(),
            value: None,
            height: MAX_LEVEL,
            next: std::array::from_fn(|_| MarkableRef::null()),
            links: AtomicUsize::new(1),
        }
    }

    /// Takes an extra link count unless the node is already fully unlinked.
    fn try_acquire_link(&self) -> bool {
        let mut count = self.links.load(Ordering::Acquire);
        loop {
            if count == 0 {
                return false;
            }
            match self.links.compare_exchange_weak(
                count,
                count + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(current) => count = current,
            }
        }
    }
}

/// Draws a height by repeated fair coin flips, capped at [`MAX_LEVEL`].
fn random_height() -> usize {
    let mut rng = rand::rng();
    let mut height = 0;
    while height < MAX_LEVEL && rng.random::<bool>() {
        height += 1;
    }
    height
}

type NodeTrace<'g, V> = [Shared<'g, Node<V>>; NUM_LEVELS];

/// A lock-free concurrent ordered map from strings to `V`.
///
/// Keys are compared byte-wise. Two permanent sentinels bound the key space:
/// HEAD sorts below every admissible key and TAIL is recognised by pointer
/// identity, never by its key.
///
/// # Example
///
/// ```
/// use shortener_rs::SkipList;
///
/// let map: SkipList<String> = SkipList::new();
/// map.insert("b".to_string(), "2".to_string()).unwrap();
/// map.insert("a".to_string(), "1".to_string()).unwrap();
///
/// assert_eq!(map.search("a"), Some("1".to_string()));
/// let keys: Vec<String> = map.iter().map(|(k, _)| k).collect();
/// assert_eq!(keys, ["a", "b"]);
/// ```
pub struct SkipList<V> {
    head: epoch::Atomic<Node<V>>,
    tail: epoch::Atomic<Node<V>>,
}

impl<V> SkipList<V> {
    /// An empty map: HEAD linked to TAIL at every level.
    pub fn new() -> Self {
        let head = epoch::Atomic::new(Node::sentinel());
        let tail = epoch::Atomic::new(Node::sentinel());
        // SAFETY: the list is private until `new` returns; no concurrent
        // access is possible while the sentinels are wired up.
        unsafe {
            let guard = epoch::unprotected();
            let t = tail.load(Ordering::Relaxed, guard);
            let h = head.load(Ordering::Relaxed, guard);
            for level in 0..NUM_LEVELS {
                h.deref().next[level].set_ref(t);
            }
        }
        SkipList { head, tail }
    }

    #[inline]
    fn is_tail(&self, node: Shared<'_, Node<V>>, tail: Shared<'_, Node<V>>) -> bool {
        node.as_raw() == tail.as_raw()
    }

    /// Releases one incoming link; the release that hits zero hands the node
    /// to the collector.
    ///
    /// # Safety
    ///
    /// `node` must point to a node of this list that the caller observed
    /// while `guard` was pinned.
    unsafe fn release_link(&self, node: Shared<'_, Node<V>>, guard: &Guard) {
        if node.deref().links.fetch_sub(1, Ordering::AcqRel) == 1 {
            guard.defer_destroy(node);
        }
    }

    /// Locates the splice position for `key` at every level.
    ///
    /// Walks top-down from HEAD. At each level it skips forward while keys
    /// sort below `key`, physically unlinking any successor whose
    /// next-pointer is marked; a failed snip restarts the whole traversal,
    /// since the snipped-over predecessor may itself be gone. On return,
    /// `preds[l]` is the last node below `key` at level `l` and `succs[l]`
    /// the first at-or-above.
    fn find<'g>(
        &self,
        key: &str,
        guard: &'g Guard,
    ) -> (NodeTrace<'g, V>, NodeTrace<'g, V>, bool) {
        let tail = self.tail.load(Ordering::Acquire, guard);
        'retry: loop {
            let mut preds: NodeTrace<'g, V> = [Shared::null(); NUM_LEVELS];
            let mut succs: NodeTrace<'g, V> = [Shared::null(); NUM_LEVELS];
            let head = self.head.load(Ordering::Acquire, guard);
            let mut last = head;
            let mut current = head;

            for level in (0..NUM_LEVELS).rev() {
                // SAFETY: `last` was reached through live links under the
                // pinned guard; its reclamation is deferred past this pin.
                current = unsafe { last.deref() }.next[level].ref_part(guard);
                loop {
                    // SAFETY: as above; `current` came from a live slot.
                    let (mut next_ref, mut next_marked) =
                        unsafe { current.deref() }.next[level].load(guard);

                    while next_marked {
                        // `current` is logically deleted: splice it out. The
                        // same CAS that detaches it republishes its frozen
                        // successor, so link counts are conserved.
                        let snipped = unsafe { last.deref() }.next[level].compare_and_swap(
                            current,
                            false,
                            next_ref,
                            false,
                            guard,
                        );
                        if !snipped {
                            continue 'retry;
                        }
                        // SAFETY: `current` was just unlinked at this level.
                        unsafe { self.release_link(current, guard) };
                        current = unsafe { last.deref() }.next[level].ref_part(guard);
                        let reloaded = unsafe { current.deref() }.next[level].load(guard);
                        next_ref = reloaded.0;
                        next_marked = reloaded.1;
                    }

                    if self.is_tail(current, tail)
                        || unsafe { current.deref() }.key.as_str() >= key
                    {
                        break;
                    }
                    last = current;
                    current = next_ref;
                }
                preds[level] = last;
                succs[level] = current;
            }

            let found =
                !self.is_tail(current, tail) && unsafe { current.deref() }.key == key;
            return (preds, succs, found);
        }
    }

    /// Inserts `key -> value`.
    ///
    /// Returns [`MapError::KeyExists`] if a live entry already holds the key.
    /// In a duplicate-key race, at most one level-0 CAS wins; losers observe
    /// the winner on retry and return the error.
    pub fn insert(&self, key: String, value: V) -> Result<(), MapError> {
        let guard = &epoch::pin();
        let height = random_height();
        let mut node = Owned::new(Node::new(key.clone(), value, height));

        loop {
            let (preds, succs, found) = self.find(&key, guard);
            if found {
                return Err(MapError::KeyExists);
            }

            // Wire the private node to its successors before publication.
            for level in 0..=height {
                node.next[level].set_ref(succs[level]);
            }

            // SAFETY: `preds[0]` is pinned by the guard.
            let pred0 = unsafe { preds[0].deref() };
            match pred0.next[0].compare_and_swap_owned(succs[0], false, node, false, guard) {
                Ok(new_ref) => {
                    self.link_upper_levels(&key, height, new_ref, preds, succs, guard);
                    return Ok(());
                }
                Err(returned) => node = returned,
            }
        }
    }

    /// Links an already-published node at levels `1..=height`.
    ///
    /// Each level retries its CAS, re-running `find` to refresh the splice on
    /// failure. Linking stops early if the node is concurrently removed:
    /// either its slot at the level is already marked, its link count has
    /// hit zero, or `find` no longer reports it at level 0.
    fn link_upper_levels<'g>(
        &self,
        key: &str,
        height: usize,
        new_ref: Shared<'g, Node<V>>,
        mut preds: NodeTrace<'g, V>,
        mut succs: NodeTrace<'g, V>,
        guard: &'g Guard,
    ) {
        // SAFETY: `new_ref` was published by this thread under this guard.
        let node = unsafe { new_ref.deref() };
        for level in 1..=height {
            loop {
                let (slot_ref, slot_marked) = node.next[level].load(guard);
                if slot_marked {
                    return;
                }
                // Point our slot at the current successor first, so the link
                // CAS publishes a consistent pair.
                if slot_ref.as_raw() != succs[level].as_raw()
                    && !node.next[level].compare_and_swap(
                        slot_ref,
                        false,
                        succs[level],
                        false,
                        guard,
                    )
                {
                    continue;
                }
                if !node.try_acquire_link() {
                    return;
                }
                // SAFETY: splice nodes are pinned by the guard.
                let pred = unsafe { preds[level].deref() };
                if pred.next[level].compare_and_swap(succs[level], false, new_ref, false, guard)
                {
                    break;
                }
                // SAFETY: the link was not created; return its count.
                unsafe { self.release_link(new_ref, guard) };

                let (p, s, found) = self.find(key, guard);
                if !found || s[0].as_raw() != new_ref.as_raw() {
                    return;
                }
                preds = p;
                succs = s;
            }
        }
    }

    /// Looks up `key`, returning a clone of its value.
    ///
    /// Mirrors [`find`](Self::find) but performs no physical unlinking: it
    /// only hops past marked successors, so lookups never write.
    pub fn search(&self, key: &str) -> Option<V>
    where
        V: Clone,
    {
        let guard = &epoch::pin();
        let tail = self.tail.load(Ordering::Acquire, guard);
        let head = self.head.load(Ordering::Acquire, guard);
        let mut last = head;
        let mut current = head;

        for level in (0..NUM_LEVELS).rev() {
            // SAFETY: nodes reached through live links stay valid while the
            // guard is pinned.
            current = unsafe { last.deref() }.next[level].ref_part(guard);
            loop {
                let (mut next_ref, mut next_marked) =
                    unsafe { current.deref() }.next[level].load(guard);

                while next_marked {
                    current = next_ref;
                    let reloaded = unsafe { current.deref() }.next[level].load(guard);
                    next_ref = reloaded.0;
                    next_marked = reloaded.1;
                }

                if self.is_tail(current, tail)
                    || unsafe { current.deref() }.key.as_str() >= key
                {
                    break;
                }
                last = current;
                current = next_ref;
            }
        }

        if !self.is_tail(current, tail) && unsafe { current.deref() }.key == key {
            unsafe { current.deref() }.value.clone()
        } else {
            None
        }
    }

    /// Logically removes `key`, then helps unlink it.
    ///
    /// Marks the node's next-pointers from its top level down; the level-0
    /// mark is the linearisation point. Exactly one racing remover wins it;
    /// the rest get [`MapError::AlreadyDeleted`].
    pub fn remove(&self, key: &str) -> Result<(), MapError> {
        let guard = &epoch::pin();
        let (_, succs, found) = self.find(key, guard);
        if !found {
            return Err(MapError::KeyNotFound);
        }
        // SAFETY: `succs[0]` is pinned by the guard.
        let node = unsafe { succs[0].deref() };

        for level in (1..=node.height).rev() {
            loop {
                let (next_ref, marked) = node.next[level].load(guard);
                if marked {
                    break;
                }
                node.next[level].compare_and_swap(next_ref, false, next_ref, true, guard);
            }
        }

        loop {
            let (next_ref, marked) = node.next[0].load(guard);
            if marked {
                return Err(MapError::AlreadyDeleted);
            }
            if node.next[0].compare_and_swap(next_ref, false, next_ref, true, guard) {
                // Help unlink before returning.
                let _ = self.find(key, guard);
                return Ok(());
            }
        }
    }

    /// Iterates live entries in key order.
    ///
    /// One level-0 walk under a single epoch pin, skipping nodes whose
    /// next-pointer is marked. Weakly consistent: the walk observes a valid
    /// prefix of some linearisation of concurrent operations but may miss
    /// entries inserted or removed while it runs; it never yields deleted
    /// keys and never yields duplicates.
    pub fn iter(&self) -> Iter<V>
    where
        V: Clone,
    {
        let guard = epoch::pin();
        let tail = self.tail.load(Ordering::Acquire, &guard);
        let mut items = Vec::new();

        // SAFETY: every node on the walk is reached through live links while
        // the guard is pinned.
        let mut current =
            unsafe { self.head.load(Ordering::Acquire, &guard).deref() }.next[0].ref_part(&guard);
        while !self.is_tail(current, tail) {
            let node = unsafe { current.deref() };
            let (next_ref, marked) = node.next[0].load(&guard);
            if !marked {
                if let Some(value) = node.value.as_ref() {
                    items.push((node.key.clone(), value.clone()));
                }
            }
            current = next_ref;
        }

        Iter {
            inner: items.into_iter(),
        }
    }
}

impl<V> Default for SkipList<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> fmt::Debug for SkipList<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SkipList").finish_non_exhaustive()
    }
}

impl<V> Drop for SkipList<V> {
    fn drop(&mut self) {
        // SAFETY: `&mut self` guarantees no concurrent access; every node
        // still linked at any level is collected exactly once, then the
        // sentinels are freed. Nodes already handed to the collector are not
        // on any chain.
        unsafe {
            let guard = epoch::unprotected();
            let head = self.head.load(Ordering::Relaxed, guard);
            let tail = self.tail.load(Ordering::Relaxed, guard);

            let mut nodes: Vec<*mut Node<V>> = Vec::new();
            for level in 0..NUM_LEVELS {
                let mut current = head.deref().next[level].ref_part(guard);
                while !current.is_null() && current.as_raw() != tail.as_raw() {
                    nodes.push(current.as_raw() as *mut Node<V>);
                    current = current.deref().next[level].ref_part(guard);
                }
            }
            nodes.sort_unstable();
            nodes.dedup();
            for ptr in nodes {
                drop(Owned::from_raw(ptr));
            }
            drop(head.into_owned());
            drop(tail.into_owned());
        }
    }
}

/// Iterator over a consistent level-0 walk of a [`SkipList`].
pub struct Iter<V> {
    inner: std::vec::IntoIter<(String, V)>,
}

impl<V> Iterator for Iter<V> {
    type Item = (String, V);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_list_finds_nothing() {
        let list: SkipList<u32> = SkipList::new();
        assert_eq!(list.search("missing"), None);
        assert_eq!(list.iter().count(), 0);
    }

    #[test]
    fn insert_then_search() {
        let list = SkipList::new();
        list.insert("abc".to_string(), 1u32).unwrap();
        list.insert("abd".to_string(), 2).unwrap();
        assert_eq!(list.search("abc"), Some(1));
        assert_eq!(list.search("abd"), Some(2));
        assert_eq!(list.search("abe"), None);
        assert_eq!(list.search("ab"), None);
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let list = SkipList::new();
        list.insert("k".to_string(), 1u32).unwrap();
        assert_eq!(list.insert("k".to_string(), 2), Err(MapError::KeyExists));
        assert_eq!(list.search("k"), Some(1));
    }

    #[test]
    fn iter_yields_key_order() {
        let list = SkipList::new();
        for key in ["delta", "alpha", "echo", "charlie", "bravo"] {
            list.insert(key.to_string(), ()).unwrap();
        }
        let keys: Vec<String> = list.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["alpha", "bravo", "charlie", "delta", "echo"]);
    }

    #[test]
    fn remove_makes_a_key_unfindable() {
        let list = SkipList::new();
        list.insert("k".to_string(), 1u32).unwrap();
        list.remove("k").unwrap();
        assert_eq!(list.search("k"), None);
        assert_eq!(list.iter().count(), 0);
    }

    #[test]
    fn remove_of_absent_key_fails() {
        let list: SkipList<u32> = SkipList::new();
        assert_eq!(list.remove("k"), Err(MapError::KeyNotFound));
    }

    #[test]
    fn removed_key_can_be_reinserted() {
        let list = SkipList::new();
        list.insert("k".to_string(), 1u32).unwrap();
        list.remove("k").unwrap();
        list.insert("k".to_string(), 2).unwrap();
        assert_eq!(list.search("k"), Some(2));
    }

    #[test]
    fn second_remove_sees_key_not_found() {
        // After the winner's helping unlink the node is gone from the list,
        // so a later remove misses it entirely.
        let list = SkipList::new();
        list.insert("k".to_string(), 1u32).unwrap();
        list.remove("k").unwrap();
        assert_eq!(list.remove("k"), Err(MapError::KeyNotFound));
    }

    #[test]
    fn iter_skips_entries_removed_midway() {
        let list = SkipList::new();
        for i in 0..10 {
            list.insert(format!("key{i}"), i).unwrap();
        }
        for i in (0..10).step_by(2) {
            list.remove(&format!("key{i}")).unwrap();
        }
        let keys: Vec<String> = list.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["key1", "key3", "key5", "key7", "key9"]);
    }

    #[test]
    fn many_keys_stay_sorted_and_unique() {
        let list = SkipList::new();
        for i in (0..500).rev() {
            list.insert(format!("{i:04}"), i).unwrap();
        }
        let entries: Vec<(String, i32)> = list.iter().collect();
        assert_eq!(entries.len(), 500);
        for (i, (key, value)) in entries.iter().enumerate() {
            assert_eq!(key, &format!("{i:04}"));
            assert_eq!(*value, i as i32);
        }
    }

    #[test]
    fn random_height_respects_the_cap() {
        for _ in 0..10_000 {
            assert!(random_height() <= MAX_LEVEL);
        }
    }
}
