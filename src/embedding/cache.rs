//! 임베딩 캐시 - 용량 제한 맵
//!
//! 전처리된 텍스트의 해시를 키로 계산된 벡터를 보관합니다.
//! 용량 초과 시 삽입 순서 기준으로 오래된 절반을 한 번에 제거합니다
//! (엄밀한 LRU가 아닌 분할 상환 방식). 엔트리 유실은 정확성에
//! 영향을 주지 않고 성능에만 영향을 줍니다.

use std::collections::{HashMap, VecDeque};

use serde::Serialize;
use sha2::{Digest, Sha256};

/// 기본 캐시 용량 (엔트리 수)
pub const DEFAULT_CACHE_CAPACITY: usize = 1000;

/// 캐시 키 계산 (전처리된 텍스트의 SHA-256)
pub fn cache_key(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// 캐시 통계
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
}

/// 용량 제한 임베딩 캐시
#[derive(Debug)]
pub struct EmbeddingCache {
    entries: HashMap<String, Vec<f32>>,
    order: VecDeque<String>,
    capacity: usize,
    hits: u64,
    misses: u64,
}

impl EmbeddingCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
            hits: 0,
            misses: 0,
        }
    }

    /// 캐시 조회
    pub fn get(&mut self, key: &str) -> Option<Vec<f32>> {
        match self.entries.get(key) {
            Some(v) => {
                self.hits += 1;
                Some(v.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// 캐시 삽입
    ///
    /// 용량 초과 시 오래된 절반을 제거합니다.
    pub fn insert(&mut self, key: String, embedding: Vec<f32>) {
        if !self.entries.contains_key(&key) {
            self.order.push_back(key.clone());
        }
        self.entries.insert(key, embedding);

        if self.entries.len() > self.capacity {
            self.evict_oldest_half();
        }
    }

    /// 오래된 절반 제거
    fn evict_oldest_half(&mut self) {
        let evict = (self.order.len() / 2).max(1);
        for _ in 0..evict {
            if let Some(key) = self.order.pop_front() {
                self.entries.remove(&key);
            }
        }
        tracing::debug!("Evicted {} cache entries, {} remain", evict, self.entries.len());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            capacity: self.capacity,
            hits: self.hits,
            misses: self.misses,
        }
    }
}

impl Default for EmbeddingCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

// ============================================================================
// Tests
// ============================================================================
