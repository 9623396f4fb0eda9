//! Stack-style sub-allocation of a linear range.
//!
//! [`StackArena`] hands out aligned offsets from a fixed-size range by bumping a
//! single cursor. Nothing is freed individually: space comes back either by
//! unwinding to a [`Bookmark`] or by resetting the whole arena once the memory
//! behind it is no longer in use.
//!
//! The arena only does offset arithmetic. Callers pair it with whatever storage
//! the offsets index into (a GPU upload buffer, a scratch buffer, a host `Vec`).
//!
//! # Example
//!
//! ```
//! use tessera_core::arena::StackArena;
//!
//! let mut arena = StackArena::new(1024);
//! let a = arena.allocate(100, 16).unwrap();
//! assert_eq!(a.offset, 0);
//!
//! let mark = arena.push_bookmark();
//! let b = arena.allocate(64, 256).unwrap();
//! assert_eq!(b.offset, 256);
//! arena.pop_bookmark(mark);
//!
//! // Space after the bookmark is reusable.
//! let c = arena.allocate(8, 8).unwrap();
//! assert_eq!(c.offset, 104);
//! ```

/// A range handed out by [`StackArena::allocate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArenaAllocation {
    /// Aligned offset from the start of the arena.
    pub offset: u64,
    /// Requested size in bytes.
    pub size: u64,
}

impl ArenaAllocation {
    /// One past the last byte of the allocation.
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// Saved arena position returned by [`StackArena::push_bookmark`].
///
/// Bookmarks must be popped in reverse order of creation.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a bookmark must be passed back to pop_bookmark"]
pub struct Bookmark {
    depth: usize,
    top: u64,
}

/// Bump allocator over `[0, capacity)` with nested bookmarks.
#[derive(Debug, Clone)]
pub struct StackArena {
    capacity: u64,
    top: u64,
    peak: u64,
    bookmarks: Vec<u64>,
}

impl StackArena {
    /// Create an empty arena covering `capacity` bytes.
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            top: 0,
            peak: 0,
            bookmarks: Vec::new(),
        }
    }

    /// Allocate `size` bytes at an offset aligned to `alignment`.
    ///
    /// Returns `None` when the arena cannot fit the request.
    ///
    /// # Panics
    ///
    /// Panics if `alignment` is zero or not a power of two.
    pub fn allocate(&mut self, size: u64, alignment: u64) -> Option<ArenaAllocation> {
        assert!(
            alignment.is_power_of_two(),
            "arena alignment must be a power of two, got {alignment}"
        );

        let offset = align_up(self.top, alignment);
        let end = offset.checked_add(size)?;
        if end > self.capacity {
            log::trace!(
                "StackArena: {} bytes (align {}) do not fit, {} of {} used",
                size,
                alignment,
                self.top,
                self.capacity
            );
            return None;
        }

        self.top = end;
        self.peak = self.peak.max(end);
        Some(ArenaAllocation { offset, size })
    }

    /// Remember the current position so later allocations can be unwound.
    pub fn push_bookmark(&mut self) -> Bookmark {
        self.bookmarks.push(self.top);
        Bookmark {
            depth: self.bookmarks.len(),
            top: self.top,
        }
    }

    /// Release everything allocated since `bookmark` was pushed.
    ///
    /// # Panics
    ///
    /// Panics if `bookmark` is not the most recently pushed one.
    pub fn pop_bookmark(&mut self, bookmark: Bookmark) {
        assert_eq!(
            bookmark.depth,
            self.bookmarks.len(),
            "arena bookmarks must be popped in stack order"
        );
        let top = self.bookmarks.pop();
        debug_assert_eq!(top, Some(bookmark.top));
        self.top = bookmark.top;
    }

    /// Release all allocations.
    ///
    /// # Panics
    ///
    /// Panics if a bookmark is still outstanding.
    pub fn reset(&mut self) {
        assert!(
            self.bookmarks.is_empty(),
            "cannot reset an arena with {} outstanding bookmark(s)",
            self.bookmarks.len()
        );
        self.top = 0;
    }

    /// Total size of the arena.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Bytes between the start of the arena and the cursor, padding included.
    pub fn used(&self) -> u64 {
        self.top
    }

    /// Bytes left after the cursor, ignoring alignment of the next request.
    pub fn remaining(&self) -> u64 {
        self.capacity - self.top
    }

    /// Highest cursor position reached since creation.
    pub fn peak_usage(&self) -> u64 {
        self.peak
    }

    /// Whether nothing is currently allocated.
    pub fn is_empty(&self) -> bool {
        self.top == 0
    }
}

/// Round `value` up to the next multiple of `alignment` (a power of two).
#[inline]
pub fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, 256, 0)]
    #[case(1, 256, 256)]
    #[case(256, 256, 256)]
    #[case(257, 4, 260)]
    #[case(7, 1, 7)]
    fn test_align_up(#[case] value: u64, #[case] alignment: u64, #[case] expected: u64) {
        assert_eq!(align_up(value, alignment), expected);
    }

    #[test]
    fn test_allocations_are_aligned_and_disjoint() {
        let mut arena = StackArena::new(4096);
        let a = arena.allocate(10, 16).unwrap();
        let b = arena.allocate(10, 256).unwrap();
        let c = arena.allocate(1, 4).unwrap();

        assert_eq!(a.offset, 0);
        assert_eq!(b.offset, 256);
        assert_eq!(c.offset, 268);
        assert!(a.end() <= b.offset);
        assert!(b.end() <= c.offset);
        assert_eq!(arena.used(), 269);
    }

    #[test]
    fn test_allocation_that_does_not_fit() {
        let mut arena = StackArena::new(128);
        assert!(arena.allocate(100, 1).is_some());
        assert!(arena.allocate(64, 1).is_none());
        // Failed requests leave the cursor untouched.
        assert_eq!(arena.used(), 100);
        assert!(arena.allocate(28, 1).is_some());
        assert_eq!(arena.remaining(), 0);
    }

    #[test]
    fn test_nested_bookmarks() {
        let mut arena = StackArena::new(1024);
        arena.allocate(8, 8).unwrap();

        let outer = arena.push_bookmark();
        arena.allocate(100, 8).unwrap();
        let inner = arena.push_bookmark();
        arena.allocate(200, 8).unwrap();
        assert_eq!(arena.used(), 312);

        arena.pop_bookmark(inner);
        assert_eq!(arena.used(), 108);
        arena.pop_bookmark(outer);
        assert_eq!(arena.used(), 8);
        assert_eq!(arena.peak_usage(), 312);
    }

    #[test]
    #[should_panic(expected = "stack order")]
    fn test_bookmark_out_of_order() {
        let mut arena = StackArena::new(64);
        let outer = arena.push_bookmark();
        let _inner = arena.push_bookmark();
        arena.pop_bookmark(outer);
    }

    #[test]
    #[should_panic(expected = "outstanding bookmark")]
    fn test_reset_with_bookmark() {
        let mut arena = StackArena::new(64);
        let _mark = arena.push_bookmark();
        arena.reset();
    }

    #[test]
    fn test_reset_releases_everything() {
        let mut arena = StackArena::new(64);
        arena.allocate(64, 1).unwrap();
        arena.reset();
        assert!(arena.is_empty());
        assert_eq!(arena.allocate(64, 1).unwrap().offset, 0);
    }
}
