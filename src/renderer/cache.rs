//! 原生对象缓存
//!
//! 以描述符内容为键，把相等的描述映射到同一个已创建的原生对象。
//! 未命中是正常的冷路径：调用创建函数并记住结果。

use std::collections::HashMap;
use std::hash::Hash;

use crate::core::error::Result;

/// 命中统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// 描述符到原生对象 id 的缓存
#[derive(Debug)]
pub struct ObjectCache<D, Id> {
    label: &'static str,
    entries: HashMap<D, Id>,
    hits: u64,
    misses: u64,
}

impl<D, Id> ObjectCache<D, Id>
where
    D: Eq + Hash + Clone,
    Id: Copy,
{
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            entries: HashMap::new(),
            hits: 0,
            misses: 0,
        }
    }

    /// 查找或创建
    ///
    /// 创建失败时不缓存任何内容。
    pub fn get_or_create(&mut self, desc: &D, create: impl FnOnce(&D) -> Result<Id>) -> Result<Id> {
        if let Some(id) = self.entries.get(desc) {
            self.hits += 1;
            return Ok(*id);
        }

        let id = create(desc)?;
        self.misses += 1;
        self.entries.insert(desc.clone(), id);
        tracing::debug!(cache = self.label, entries = self.entries.len(), "Cache miss, native object created");
        Ok(id)
    }

    pub fn get(&self, desc: &D) -> Option<Id> {
        self.entries.get(desc).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            entries: self.entries.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::EngineError;

    #[test]
    fn test_creates_once_per_key() {
        let mut cache: ObjectCache<String, u32> = ObjectCache::new("Test");
        let mut created = 0;

        for _ in 0..3 {
            let id = cache
                .get_or_create(&"a".to_string(), |_| {
                    created += 1;
                    Ok(7)
                })
                .unwrap();
            assert_eq!(id, 7);
        }
        assert_eq!(created, 1);
        assert_eq!(cache.stats(), CacheStats { hits: 2, misses: 1, entries: 1 });
    }

    #[test]
    fn test_failed_creation_not_cached() {
        let mut cache: ObjectCache<u8, u32> = ObjectCache::new("Test");
        assert!(cache
            .get_or_create(&1, |_| Err(EngineError::Runtime("nope".to_string())))
            .is_err());
        assert!(cache.is_empty());
        assert_eq!(cache.get_or_create(&1, |_| Ok(3)).unwrap(), 3);
    }
}
