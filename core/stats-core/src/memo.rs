//! FILENAME: core/stats-core/src/memo.rs
//! Bounded memoization.
//!
//! `memoize(key_fn, compute_fn, capacity)` wraps a computation so repeated
//! calls with an equal key return the cached result. The cache holds at most
//! `capacity` entries and evicts the least recently used one first.
//!
//! There is no invalidation hook: `key_fn` must capture every input the
//! result depends on (the chart engine prefixes its keys with the data store
//! version for that reason).

use std::cell::{Cell, RefCell};
use std::convert::Infallible;
use std::hash::Hash;
use std::num::NonZeroUsize;

use lru::LruCache;

use crate::log_debug;

// ============================================================================
// BOUNDED CACHE
// ============================================================================

/// LRU cache with hit/miss counters. Single-threaded by construction.
pub struct BoundedCache<K: Hash + Eq, V> {
    entries: RefCell<LruCache<K, V>>,
    hits: Cell<u64>,
    misses: Cell<u64>,
}

impl<K: Hash + Eq, V: Clone> BoundedCache<K, V> {
    /// Creates a cache. A capacity of 0 is treated as 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        BoundedCache {
            entries: RefCell::new(LruCache::new(capacity)),
            hits: Cell::new(0),
            misses: Cell::new(0),
        }
    }

    /// Looks up a key, marking it most recently used.
    pub fn get(&self, key: &K) -> Option<V> {
        let found = self.entries.borrow_mut().get(key).cloned();
        if found.is_some() {
            self.hits.set(self.hits.get() + 1);
        } else {
            self.misses.set(self.misses.get() + 1);
        }
        found
    }

    /// Inserts a value, evicting the least recently used entry when full.
    pub fn put(&self, key: K, value: V) {
        let evicted = self.entries.borrow_mut().push(key, value);
        if evicted.is_some() {
            log_debug!("MEMO", "evicted least recently used entry");
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.borrow().contains(key)
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.entries.borrow().cap().get()
    }

    pub fn hits(&self) -> u64 {
        self.hits.get()
    }

    pub fn misses(&self) -> u64 {
        self.misses.get()
    }

    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
    }
}

// ============================================================================
// MEMOIZED FUNCTION
// ============================================================================

type KeyFn<A, K> = Box<dyn Fn(&A) -> Option<K>>;
type ComputeFn<A, V, E> = Box<dyn Fn(&A) -> Result<V, E>>;

/// A memoized function of `A`.
///
/// `key_fn` returning `None` means the argument could not be turned into a
/// key; such calls always recompute and never touch the cache.
pub struct Memo<A, K: Hash + Eq, V, E = Infallible> {
    key_fn: KeyFn<A, K>,
    compute_fn: ComputeFn<A, V, E>,
    cache: BoundedCache<K, V>,
}

/// Memoizes an infallible computation.
pub fn memoize<A, K, V>(
    key_fn: impl Fn(&A) -> Option<K> + 'static,
    compute_fn: impl Fn(&A) -> V + 'static,
    capacity: usize,
) -> Memo<A, K, V, Infallible>
where
    K: Hash + Eq,
    V: Clone,
{
    Memo {
        key_fn: Box::new(key_fn),
        compute_fn: Box::new(move |arg| Ok(compute_fn(arg))),
        cache: BoundedCache::new(capacity),
    }
}

/// Memoizes a fallible computation. Errors are returned but never cached.
pub fn try_memoize<A, K, V, E>(
    key_fn: impl Fn(&A) -> Option<K> + 'static,
    compute_fn: impl Fn(&A) -> Result<V, E> + 'static,
    capacity: usize,
) -> Memo<A, K, V, E>
where
    K: Hash + Eq,
    V: Clone,
{
    Memo {
        key_fn: Box::new(key_fn),
        compute_fn: Box::new(compute_fn),
        cache: BoundedCache::new(capacity),
    }
}

impl<A, K: Hash + Eq, V: Clone, E> Memo<A, K, V, E> {
    /// Returns the cached result for `arg`'s key or computes and caches it.
    pub fn try_call(&self, arg: &A) -> Result<V, E> {
        let key = match (self.key_fn)(arg) {
            Some(key) => key,
            None => {
                log_debug!("MEMO", "key unavailable, bypassing cache");
                return (self.compute_fn)(arg);
            }
        };

        if let Some(value) = self.cache.get(&key) {
            return Ok(value);
        }

        let value = (self.compute_fn)(arg)?;
        self.cache.put(key, value.clone());
        Ok(value)
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.cache.capacity()
    }

    pub fn hits(&self) -> u64 {
        self.cache.hits()
    }

    pub fn misses(&self) -> u64 {
        self.cache.misses()
    }

    pub fn clear(&self) {
        self.cache.clear();
    }
}

impl<A, K: Hash + Eq, V: Clone> Memo<A, K, V, Infallible> {
    pub fn call(&self, arg: &A) -> V {
        match self.try_call(arg) {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    fn counting_square(capacity: usize) -> (Memo<i64, i64, i64>, Rc<Cell<usize>>) {
        let calls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&calls);
        let memo = memoize(
            |x: &i64| Some(*x),
            move |x: &i64| {
                counter.set(counter.get() + 1);
                x * x
            },
            capacity,
        );
        (memo, calls)
    }

    #[test]
    fn repeated_calls_hit_the_cache() {
        let (memo, calls) = counting_square(4);
        assert_eq!(memo.call(&3), 9);
        assert_eq!(memo.call(&3), 9);
        assert_eq!(calls.get(), 1);
        assert_eq!(memo.hits(), 1);
        assert_eq!(memo.misses(), 1);
    }

    #[test]
    fn evicts_least_recently_used_entry() {
        let (memo, calls) = counting_square(2);
        memo.call(&1);
        memo.call(&2);
        memo.call(&1); // 2 is now least recently used
        memo.call(&3);
        assert_eq!(memo.len(), 2);
        assert_eq!(calls.get(), 3);

        memo.call(&1);
        assert_eq!(calls.get(), 3);
        memo.call(&2);
        assert_eq!(calls.get(), 4);
    }

    #[test]
    fn size_never_exceeds_capacity() {
        let (memo, _) = counting_square(5);
        for i in 0..100 {
            memo.call(&i);
            assert!(memo.len() <= 5);
        }
        assert_eq!(memo.capacity(), 5);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let (memo, calls) = counting_square(0);
        assert_eq!(memo.capacity(), 1);
        memo.call(&7);
        memo.call(&7);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn missing_key_always_recomputes() {
        let calls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&calls);
        let memo: Memo<i64, i64, i64> = memoize(
            |_: &i64| None,
            move |x: &i64| {
                counter.set(counter.get() + 1);
                *x + 1
            },
            4,
        );
        assert_eq!(memo.call(&1), 2);
        assert_eq!(memo.call(&1), 2);
        assert_eq!(calls.get(), 2);
        assert!(memo.is_empty());
    }

    #[test]
    fn errors_are_not_cached() {
        let calls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&calls);
        let memo = try_memoize(
            |x: &i64| Some(*x),
            move |x: &i64| {
                counter.set(counter.get() + 1);
                if *x < 0 {
                    Err("negative")
                } else {
                    Ok(*x)
                }
            },
            4,
        );
        assert!(memo.try_call(&-1).is_err());
        assert!(memo.try_call(&-1).is_err());
        assert_eq!(calls.get(), 2);
        assert_eq!(memo.try_call(&5), Ok(5));
        assert_eq!(memo.len(), 1);
    }

    #[test]
    fn clear_drops_entries() {
        let (memo, calls) = counting_square(3);
        memo.call(&2);
        memo.clear();
        memo.call(&2);
        assert_eq!(calls.get(), 2);
    }
}
