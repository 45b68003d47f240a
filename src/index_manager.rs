//! Recycling allocator for the global indices of one codimension.

use fixedbitset as fb;

/// Allocator of small integer indices with LIFO reuse of freed ones.
///
/// Indices are handed out from a monotonically increasing counter
/// until some are given back with [`free`][Self::free];
/// after that the most recently freed index is reused first.
/// The set of live indices is always the complement of the free list
/// within `0..self.size()`,
/// so `size()` can be used to size dense arrays of per-entity data.
///
/// ```
/// # use bisection_grid::IndexManager;
/// let mut im = IndexManager::new();
/// assert_eq!((im.allocate(), im.allocate(), im.allocate()), (0, 1, 2));
/// im.free(0);
/// im.free(2);
/// assert_eq!(im.allocate(), 2);
/// assert_eq!(im.allocate(), 0);
/// assert_eq!(im.allocate(), 3);
/// ```
#[derive(Clone, Debug, Default)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(try_from = "FreeList", into = "FreeList")
)]
pub struct IndexManager {
    /// freed indices, most recently freed last
    free: Vec<usize>,
    /// the same indices as `free`, for constant-time lookup
    freed: fb::FixedBitSet,
    /// next never-issued index
    next: usize,
}

impl PartialEq for IndexManager {
    fn eq(&self, other: &Self) -> bool {
        self.next == other.next && self.free == other.free
    }
}

impl Eq for IndexManager {}

impl IndexManager {
    /// Create an index manager that hasn't issued any indices yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get an index that isn't currently in use.
    #[inline]
    pub fn allocate(&mut self) -> usize {
        if let Some(idx) = self.free.pop() {
            self.freed.set(idx, false);
            idx
        } else {
            let idx = self.next;
            self.next += 1;
            idx
        }
    }

    /// Return an index to the pool.
    ///
    /// The index must have been issued by this manager and still be live;
    /// this is only checked in debug builds.
    #[inline]
    pub fn free(&mut self, index: usize) {
        debug_assert!(
            index < self.next,
            "freed index {index} was never issued by this manager"
        );
        debug_assert!(!self.freed.contains(index), "index {index} was freed twice");
        if self.freed.len() <= index {
            self.freed.grow(self.next.max(index + 1));
        }
        self.freed.insert(index);
        self.free.push(index);
    }

    /// One past the highest index ever issued.
    ///
    /// Every live index is below this value.
    #[inline]
    pub fn size(&self) -> usize {
        self.next
    }

    /// One past the highest index that is currently live.
    pub fn current_maximum(&self) -> usize {
        let mut max = self.next;
        while max > 0 && self.freed.contains(max - 1) {
            max -= 1;
        }
        max
    }

    /// Number of indices currently in use.
    #[inline]
    pub fn live_count(&self) -> usize {
        self.next - self.free.len()
    }

    /// Number of indices waiting on the free list.
    #[inline]
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Check whether an index is currently in use.
    #[inline]
    pub fn is_live(&self, index: usize) -> bool {
        index < self.next && !self.freed.contains(index)
    }
}

/// The stored form of an [`IndexManager`].
#[cfg(feature = "serde")]
#[derive(serde::Serialize, serde::Deserialize)]
struct FreeList {
    free: Vec<usize>,
    next: usize,
}

#[cfg(feature = "serde")]
impl From<IndexManager> for FreeList {
    fn from(im: IndexManager) -> Self {
        Self {
            free: im.free,
            next: im.next,
        }
    }
}

#[cfg(feature = "serde")]
impl TryFrom<FreeList> for IndexManager {
    type Error = String;

    fn try_from(list: FreeList) -> Result<Self, Self::Error> {
        let mut freed = fb::FixedBitSet::with_capacity(list.next);
        for &idx in &list.free {
            if idx >= list.next {
                return Err(format!(
                    "free index {idx} was never issued, only {} were",
                    list.next
                ));
            }
            if freed.put(idx) {
                return Err(format!("index {idx} is on the free list twice"));
            }
        }
        Ok(Self {
            free: list.free,
            freed,
            next: list.next,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn reuse_is_last_in_first_out() {
        let mut im = IndexManager::new();
        let issued: Vec<usize> = (0..5).map(|_| im.allocate()).collect();
        assert_eq!(issued, vec![0, 1, 2, 3, 4]);

        im.free(1);
        im.free(3);
        assert_eq!(im.live_count(), 3);
        assert_eq!(im.free_count(), 2);
        assert_eq!(im.allocate(), 3);
        assert_eq!(im.allocate(), 1);
        // free list exhausted, counter continues
        assert_eq!(im.allocate(), 5);
        assert_eq!(im.size(), 6);
    }

    #[test]
    fn current_maximum_ignores_freed_tail() {
        let mut im = IndexManager::new();
        for _ in 0..4 {
            im.allocate();
        }
        im.free(3);
        im.free(2);
        assert_eq!(im.size(), 4);
        assert_eq!(im.current_maximum(), 2);
        im.free(0);
        assert_eq!(im.current_maximum(), 2);
        assert!(!im.is_live(0));
        assert!(im.is_live(1));
    }

    #[test]
    fn no_fixed_capacity() {
        // the old stack-based implementation topped out at 10000 entries
        let mut im = IndexManager::new();
        let n = 25_000;
        for _ in 0..n {
            im.allocate();
        }
        for i in 0..n {
            im.free(i);
        }
        assert_eq!(im.free_count(), n);
        assert_eq!(im.allocate(), n - 1);
    }

    #[test]
    fn reused_indices_are_live_again() {
        let mut im = IndexManager::new();
        let n = 1000;
        for _ in 0..n {
            im.allocate();
        }
        for i in (0..n).step_by(2) {
            im.free(i);
        }
        im.free(n - 1);
        assert_eq!(im.current_maximum(), n - 2);
        assert!((0..n).all(|i| im.is_live(i) == (i % 2 == 1 && i != n - 1)));

        assert_eq!(im.allocate(), n - 1);
        assert!(im.is_live(n - 1));
        assert_eq!(im.current_maximum(), n);
        assert!(!im.is_live(n));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn stored_free_list_is_checked() {
        let mut im = IndexManager::new();
        for _ in 0..3 {
            im.allocate();
        }
        im.free(1);
        let stored = ron::to_string(&im).unwrap();
        let restored: IndexManager = ron::from_str(&stored).unwrap();
        assert_eq!(restored, im);
        assert!(!restored.is_live(1));
        assert!(restored.is_live(2));

        assert!(ron::from_str::<IndexManager>("(free: [3], next: 3)").is_err());
        assert!(ron::from_str::<IndexManager>("(free: [0, 0], next: 3)").is_err());
    }

    proptest! {
        #[test]
        fn live_set_is_complement_of_free_list(ops in prop::collection::vec(any::<(bool, usize)>(), 0..200)) {
            let mut im = IndexManager::new();
            let mut live: Vec<usize> = Vec::new();
            for (alloc, pick) in ops {
                if alloc || live.is_empty() {
                    let idx = im.allocate();
                    prop_assert!(!live.contains(&idx), "index {} issued twice", idx);
                    live.push(idx);
                } else {
                    let idx = live.swap_remove(pick % live.len());
                    im.free(idx);
                }
                prop_assert_eq!(im.live_count(), live.len());
                for &idx in &live {
                    prop_assert!(idx < im.current_maximum());
                    prop_assert!(im.is_live(idx));
                }
                for idx in 0..im.size() {
                    prop_assert_eq!(im.is_live(idx), live.contains(&idx));
                }
            }
        }
    }
}
