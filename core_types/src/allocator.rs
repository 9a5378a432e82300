//! Process-wide handle allocation

use crate::Handle;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic source of fresh handles
///
/// One allocator serves every resource kind, so two resources can never share
/// a handle. Values are never reused, even after the resource is closed.
#[derive(Debug)]
pub struct HandleAllocator {
    next: AtomicU64,
}

impl HandleAllocator {
    /// Creates an allocator whose first handle is `first`
    ///
    /// Values inside the reserved console range are bumped past it.
    pub fn new(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first.max(3)),
        }
    }

    /// Issues the next handle
    pub fn next(&self) -> Handle {
        Handle::from_raw(self.next.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the value the next call to [`HandleAllocator::next`] will issue
    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

impl Default for HandleAllocator {
    fn default() -> Self {
        Self::new(Handle::FIRST_DYNAMIC)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_allocator_starts_high() {
        let alloc = HandleAllocator::default();
        assert_eq!(alloc.next().as_raw(), 10_000);
        assert_eq!(alloc.next().as_raw(), 10_001);
    }

    #[test]
    fn test_allocator_skips_reserved_range() {
        let alloc = HandleAllocator::new(0);
        assert_eq!(alloc.next(), Handle::from_raw(3));
    }

    #[test]
    fn test_allocator_unique_across_threads() {
        let alloc = Arc::new(HandleAllocator::default());
        let threads: Vec<_> = (0..4)
            .map(|_| {
                let alloc = alloc.clone();
                std::thread::spawn(move || (0..250).map(|_| alloc.next()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for thread in threads {
            for handle in thread.join().unwrap() {
                assert!(seen.insert(handle));
            }
        }
        assert_eq!(seen.len(), 1000);
        assert_eq!(alloc.peek(), 11_000);
    }
}
