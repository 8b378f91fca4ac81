//! Atomic markable reference.
//!
//! A `MarkableRef<T>` stores a (pointer, mark) pair that is only ever updated
//! as a unit: the mark lives in the tag bit of the pointer word, so a single
//! machine-word compare-and-swap covers both. This is what makes logical
//! deletion in the skip list safe: a deletion mark can never be lost across
//! a concurrent next-pointer rewrite, because there is no operation that
//! changes one half of the pair without the other.

use crossbeam_epoch::{Atomic, Guard, Owned, Shared};
use std::sync::atomic::Ordering;

const MARK_BIT: usize = 1;

#[inline]
fn tag_of(mark: bool) -> usize {
    if mark {
        MARK_BIT
    } else {
        0
    }
}

/// A (pointer, mark) pair updatable by a single compare-and-swap.
///
/// The mark rides in the low tag bit of the pointer, which is always free
/// because `T` is at least word-aligned.
pub(crate) struct MarkableRef<T> {
    inner: Atomic<T>,
}

impl<T> MarkableRef<T> {
    /// A null, unmarked reference.
    pub(crate) fn null() -> Self {
        MarkableRef {
            inner: Atomic::null(),
        }
    }

    /// Loads the (reference, mark) pair.
    pub(crate) fn load<'g>(&self, guard: &'g Guard) -> (Shared<'g, T>, bool) {
        let p = self.inner.load(Ordering::Acquire, guard);
        (p.with_tag(0), p.tag() == MARK_BIT)
    }

    /// Loads just the reference half.
    pub(crate) fn ref_part<'g>(&self, guard: &'g Guard) -> Shared<'g, T> {
        self.load(guard).0
    }

    /// Loads just the mark half.
    pub(crate) fn is_marked(&self, guard: &Guard) -> bool {
        self.load(guard).1
    }

    /// Atomically replaces `(old_ref, old_mark)` with `(new_ref, new_mark)`.
    ///
    /// Succeeds iff the current pair equals the expected pair exactly; a
    /// concurrent change to either half fails the swap.
    pub(crate) fn compare_and_swap<'g>(
        &self,
        old_ref: Shared<'g, T>,
        old_mark: bool,
        new_ref: Shared<'g, T>,
        new_mark: bool,
        guard: &'g Guard,
    ) -> bool {
        self.inner
            .compare_exchange(
                old_ref.with_tag(tag_of(old_mark)),
                new_ref.with_tag(tag_of(new_mark)),
                Ordering::AcqRel,
                Ordering::Acquire,
                guard,
            )
            .is_ok()
    }

    /// Like [`compare_and_swap`](Self::compare_and_swap) but publishes an
    /// owned node, returning ownership on failure so the caller can retry.
    pub(crate) fn compare_and_swap_owned<'g>(
        &self,
        old_ref: Shared<'g, T>,
        old_mark: bool,
        new: Owned<T>,
        new_mark: bool,
        guard: &'g Guard,
    ) -> Result<Shared<'g, T>, Owned<T>> {
        match self.inner.compare_exchange(
            old_ref.with_tag(tag_of(old_mark)),
            new.with_tag(tag_of(new_mark)),
            Ordering::AcqRel,
            Ordering::Acquire,
            guard,
        ) {
            Ok(published) => Ok(published.with_tag(0)),
            Err(err) => Err(err.new.with_tag(0)),
        }
    }

    /// Overwrites the reference, keeping the slot unmarked.
    ///
    /// Not a linearisation point: only valid while the owning node is still
    /// private to one thread (node initialisation).
    pub(crate) fn set_ref(&self, r: Shared<'_, T>) {
        self.inner.store(r.with_tag(0), Ordering::Release);
    }
}
