use std::num::NonZeroUsize;
use std::time::SystemTime;

use bytes::Bytes;
use lru::LruCache;

#[derive(Clone)]
struct CacheEntry {
    content: Bytes,
    modified_time: SystemTime,
}

/// 渲染后页面的内存缓存。条目以文件路径为键，按修改时间判定是否过期。
pub struct FileCache {
    cache: LruCache<String, CacheEntry>,
}

impl FileCache {
    // 容量为0时退化为1，调用方应在配置层处理
    pub fn from_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: LruCache::new(capacity),
        }
    }

    pub fn push(&mut self, filename: &str, bytes: Bytes, modified_time: SystemTime) {
        let entry = CacheEntry {
            content: bytes,
            modified_time,
        };
        self.cache.put(filename.to_string(), entry);
    }

    pub fn should_cache(file_size: u64, threshold: u64) -> bool {
        file_size <= threshold
    }

    /// 仅当缓存的修改时间与当前一致时命中。过期条目顺带移除。
    pub fn find(&mut self, filename: &str, current_modified_time: SystemTime) -> Option<Bytes> {
        let stale = match self.cache.get(filename) {
            Some(entry) if entry.modified_time == current_modified_time => {
                return Some(entry.content.clone());
            }
            Some(_) => true,
            None => false,
        };
        if stale {
            self.cache.pop(filename);
        }
        None
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.cache.cap().get()
    }
}
