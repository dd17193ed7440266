// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use lru::LruCache;
use parking_lot::Mutex;
use std::hash::Hash;
use std::num::NonZeroUsize;

/// 有界缓存
///
/// 线程安全的LRU缓存：条目数超过容量时淘汰最久未访问的条目。
/// 所有读改写操作都在同一把锁内完成，调用方不会观察到中间状态。
pub struct BoundedCache<K, V> {
    inner: Mutex<LruCache<K, V>>,
}

impl<K, V> BoundedCache<K, V>
where
    K: Hash + Eq,
    V: Clone,
{
    /// 创建缓存，容量为0时按1处理
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// 读取并刷新条目的访问顺序
    pub fn get(&self, key: &K) -> Option<V> {
        self.inner.lock().get(key).cloned()
    }

    /// 读取但不影响淘汰顺序
    pub fn peek(&self, key: &K) -> Option<V> {
        self.inner.lock().peek(key).cloned()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.inner.lock().contains(key)
    }

    /// 写入条目，返回被淘汰的条目（如果有）
    pub fn set(&self, key: K, value: V) -> Option<(K, V)> {
        self.inner.lock().push(key, value)
    }

    /// 仅在键不存在时写入，返回是否写入
    pub fn insert_if_absent(&self, key: K, value: V) -> bool {
        let mut cache = self.inner.lock();
        if cache.contains(&key) {
            cache.promote(&key);
            return false;
        }
        cache.put(key, value);
        true
    }

    /// 原子地读改写一个条目，返回修改后的值
    pub fn update<D, F>(&self, key: K, default: D, f: F) -> V
    where
        D: FnOnce() -> V,
        F: FnOnce(&mut V),
    {
        let mut cache = self.inner.lock();
        if let Some(value) = cache.get_mut(&key) {
            f(value);
            return value.clone();
        }
        let mut value = default();
        f(&mut value);
        cache.put(key, value.clone());
        value
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().cap().get()
    }

    /// 清空所有条目
    pub fn purge(&self) {
        self.inner.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_get_set_purge() {
        let cache = BoundedCache::new(4);
        assert!(cache.is_empty());

        cache.set("a", 1);
        cache.set("b", 2);
        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.len(), 2);

        cache.purge();
        assert!(cache.is_empty());
        assert_eq!(cache.get(&"a"), None);
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let cache = BoundedCache::new(2);
        cache.set("a", 1);
        cache.set("b", 2);

        // touching `a` makes `b` the eviction candidate
        assert_eq!(cache.get(&"a"), Some(1));
        let evicted = cache.set("c", 3);

        assert_eq!(evicted, Some(("b", 2)));
        assert!(cache.contains(&"a"));
        assert!(cache.contains(&"c"));
        assert!(!cache.contains(&"b"));
        assert_eq!(cache.capacity(), 2);
    }

    #[test]
    fn test_peek_does_not_promote() {
        let cache = BoundedCache::new(2);
        cache.set("a", 1);
        cache.set("b", 2);

        assert_eq!(cache.peek(&"a"), Some(1));
        cache.set("c", 3);

        assert!(!cache.contains(&"a"));
    }

    #[test]
    fn test_insert_if_absent() {
        let cache = BoundedCache::new(8);
        assert!(cache.insert_if_absent(7u64, ()));
        assert!(!cache.insert_if_absent(7u64, ()));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let cache: BoundedCache<u8, u8> = BoundedCache::new(0);
        assert_eq!(cache.capacity(), 1);
    }

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        let cache = Arc::new(BoundedCache::new(16));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        cache.update("host", || 0u64, |count| *count += 1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(cache.get(&"host"), Some(8000));
    }
}
