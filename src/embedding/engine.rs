//! 임베딩 엔진 - 전처리, 캐시, 청킹, 벡터 결합 오케스트레이션
//!
//! 프로바이더 호출 전후의 모든 로직을 담당합니다:
//! 전처리 → 캐시 조회 → 청킹 → 청크별 임베딩 → 평균 결합 → 캐시 저장.

use std::sync::{Arc, Mutex};

use crate::error::RagError;

use super::cache::{cache_key, CacheStats, EmbeddingCache};
use super::chunk::{preprocess_text, split_into_chunks};
use super::pacer::{DelayPacer, Pacer};
use super::provider::EmbeddingProvider;

// ============================================================================
// Configuration
// ============================================================================

/// 임베딩 엔진 설정
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// 전처리 후 최대 텍스트 길이 (문자 수)
    pub max_text_chars: usize,
    /// 청크 당 최대 길이 (문자 수)
    pub max_chunk_chars: usize,
    /// 배치 그룹 크기
    pub batch_size: usize,
    /// 이 개수를 넘는 배치에만 그룹 간 페이싱 적용
    pub pacing_threshold: usize,
    /// 캐시 용량 (엔트리 수)
    pub cache_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_text_chars: 8000,
            max_chunk_chars: 2000,
            batch_size: 20,
            pacing_threshold: 10,
            cache_capacity: super::cache::DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl EngineConfig {
    /// 짧은 텍스트용 설정 (테스트 및 소형 문서)
    pub fn compact() -> Self {
        Self {
            max_text_chars: 1000,
            max_chunk_chars: 200,
            batch_size: 5,
            pacing_threshold: 5,
            cache_capacity: 100,
        }
    }
}

// ============================================================================
// EmbeddingEngine
// ============================================================================

/// 임베딩 엔진
///
/// 프로바이더와 캐시를 공유하는 복제 가능한 핸들입니다.
#[derive(Clone)]
pub struct EmbeddingEngine {
    provider: Arc<dyn EmbeddingProvider>,
    cache: Arc<Mutex<EmbeddingCache>>,
    pacer: Arc<dyn Pacer>,
    config: EngineConfig,
}

impl EmbeddingEngine {
    /// 새 엔진 생성
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: EngineConfig) -> Self {
        let cache = Arc::new(Mutex::new(EmbeddingCache::new(config.cache_capacity)));
        Self {
            provider,
            cache,
            pacer: Arc::new(DelayPacer::default()),
            config,
        }
    }

    /// 페이서 교체 (테스트에서 실제 딜레이 제거용)
    pub fn with_pacer(mut self, pacer: Arc<dyn Pacer>) -> Self {
        self.pacer = pacer;
        self
    }

    /// 임베딩 차원
    pub fn dimension(&self) -> usize {
        self.provider.dimension()
    }

    /// 프로바이더 이름
    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// 단일 텍스트 임베딩 생성
    ///
    /// 같은 입력에 대한 재호출은 캐시에서 비트 동일한 벡터를 반환하며
    /// 프로바이더를 다시 호출하지 않습니다.
    pub async fn generate_embedding(&self, text: &str) -> Result<Vec<f32>, RagError> {
        let prepared = preprocess_text(text, self.config.max_text_chars);
        let key = cache_key(&prepared);

        // 캐시 조회 (락 실패는 미스로 취급 - best effort)
        if let Ok(mut cache) = self.cache.lock() {
            if let Some(hit) = cache.get(&key) {
                return Ok(hit);
            }
        }

        let chunks = split_into_chunks(&prepared, self.config.max_chunk_chars);
        tracing::debug!("Embedding {} chunk(s), {} chars", chunks.len(), prepared.len());

        let mut vectors = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            let vector = self.provider.embed(chunk).await?;
            self.ensure_dimension(&vector)?;
            vectors.push(vector);
        }

        let combined = combine_chunk_vectors(vectors);

        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(key, combined.clone());
        }

        Ok(combined)
    }

    /// 배치 임베딩 생성
    ///
    /// 입력 순서대로 고정 크기 그룹으로 처리하며, 임계값을 넘는 배치는
    /// 그룹 사이에 페이싱 딜레이를 둡니다.
    pub async fn generate_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        let mut results = Vec::with_capacity(texts.len());
        let pace = texts.len() > self.config.pacing_threshold;
        let group_count = texts.len().div_ceil(self.config.batch_size);

        for (i, group) in texts.chunks(self.config.batch_size).enumerate() {
            if i > 0 && pace {
                self.pacer.pause().await;
            }
            for text in group {
                results.push(self.generate_embedding(text).await?);
            }
            tracing::debug!("Embedded group {}/{}", i + 1, group_count);
        }

        Ok(results)
    }

    /// 캐시 통계
    pub fn cache_stats(&self) -> CacheStats {
        self.cache
            .lock()
            .map(|c| c.stats())
            .unwrap_or_else(|_| CacheStats {
                entries: 0,
                capacity: self.config.cache_capacity,
                hits: 0,
                misses: 0,
            })
    }

    /// 프로바이더 반환 벡터의 차원 검증
    fn ensure_dimension(&self, vector: &[f32]) -> Result<(), RagError> {
        let expected = self.provider.dimension();
        if vector.len() != expected {
            return Err(RagError::ContractViolation {
                expected,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// Vector Math
// ============================================================================

/// 청크 벡터 결합 (원소별 산술 평균)
///
/// 순서에 무관한 전체 문서 의미의 근사입니다.
fn combine_chunk_vectors(mut vectors: Vec<Vec<f32>>) -> Vec<f32> {
    if vectors.len() == 1 {
        return vectors.remove(0);
    }
    if vectors.is_empty() {
        return Vec::new();
    }

    let dim = vectors[0].len();
    let mut combined = vec![0.0f32; dim];
    for vector in &vectors {
        for (acc, x) in combined.iter_mut().zip(vector.iter()) {
            *acc += x;
        }
    }
    let n = vectors.len() as f32;
    for acc in combined.iter_mut() {
        *acc /= n;
    }
    combined
}

/// 코사인 유사도
///
/// 길이가 다르거나 영벡터가 포함되면 0.0을 반환합니다 (에러가 아님).
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::pacer::NoopPacer;
    use crate::embedding::provider::testing::MockProvider;

    fn test_engine(provider: Arc<MockProvider>, config: EngineConfig) -> EmbeddingEngine {
        EmbeddingEngine::new(provider, config).with_pacer(Arc::new(NoopPacer))
    }

    #[tokio::test]
    async fn test_cache_hit_skips_provider() {
        let provider = Arc::new(MockProvider::new(8));
        let engine = test_engine(provider.clone(), EngineConfig::compact());

        let first = engine.generate_embedding("VLOOKUP 함수 사용법.").await.expect("embed");
        let calls_after_first = provider.call_count();
        assert_eq!(calls_after_first, 1);

        let second = engine.generate_embedding("VLOOKUP 함수 사용법.").await.expect("embed");
        assert_eq!(provider.call_count(), calls_after_first);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_equivalent_whitespace_shares_cache() {
        let provider = Arc::new(MockProvider::new(8));
        let engine = test_engine(provider.clone(), EngineConfig::compact());

        engine.generate_embedding("hello   world").await.expect("embed");
        engine.generate_embedding("hello world").await.expect("embed");
        // 전처리 후 동일 텍스트이므로 두 번째는 캐시 히트
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_short_text_single_provider_call() {
        let provider = Arc::new(MockProvider::new(8));
        let engine = test_engine(provider.clone(), EngineConfig::compact());

        engine.generate_embedding("short text.").await.expect("embed");
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_long_text_one_call_per_chunk() {
        let provider = Arc::new(MockProvider::new(8));
        let mut config = EngineConfig::compact();
        config.max_chunk_chars = 20;
        let engine = test_engine(provider.clone(), config);

        let text = "First sentence here. Second sentence here. Third sentence here.";
        let prepared = preprocess_text(text, 1000);
        let expected_chunks = split_into_chunks(&prepared, 20).len();
        assert!(expected_chunks > 1);

        engine.generate_embedding(text).await.expect("embed");
        assert_eq!(provider.call_count(), expected_chunks);
    }

    #[tokio::test]
    async fn test_identical_chunk_vectors_combine_to_same() {
        let provider = Arc::new(MockProvider::new(4));
        let mut config = EngineConfig::compact();
        config.max_chunk_chars = 10;
        let engine = test_engine(provider.clone(), config);

        // 모든 청크에 같은 벡터를 강제
        let text = "aaaa bbbb. cccc dddd. eeee ffff.";
        let prepared = preprocess_text(text, 1000);
        let expected = vec![0.25, 0.5, 0.75, 1.0];
        for chunk in split_into_chunks(&prepared, 10) {
            provider.set_vector(&chunk, expected.clone());
        }

        let combined = engine.generate_embedding(text).await.expect("embed");
        for (a, b) in combined.iter().zip(expected.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_contract_violation() {
        let provider = Arc::new(MockProvider::new(8));
        provider.set_vector("bad vector text.", vec![1.0, 2.0, 3.0]);
        let engine = test_engine(provider, EngineConfig::compact());

        let err = engine.generate_embedding("bad vector text.").await.unwrap_err();
        assert!(matches!(
            err,
            RagError::ContractViolation { expected: 8, actual: 3 }
        ));
    }

    #[tokio::test]
    async fn test_batch_preserves_input_order() {
        let provider = Arc::new(MockProvider::new(4));
        let engine = test_engine(provider.clone(), EngineConfig::compact());

        let texts: Vec<String> = (0..12).map(|i| format!("text number {}.", i)).collect();
        let results = engine.generate_embeddings(&texts).await.expect("batch");
        assert_eq!(results.len(), 12);

        for (text, result) in texts.iter().zip(results.iter()) {
            let single = engine.generate_embedding(text).await.expect("embed");
            assert_eq!(*result, single);
        }
    }

    #[test]
    fn test_combine_mean() {
        let combined = combine_chunk_vectors(vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        assert_eq!(combined, vec![0.5, 0.5]);
    }

    #[test]
    fn test_combine_single_passthrough() {
        let combined = combine_chunk_vectors(vec![vec![0.1, 0.2, 0.3]]);
        assert_eq!(combined, vec![0.1, 0.2, 0.3]);
    }

    #[test]
    fn test_cosine_similarity_self_is_one() {
        let v = vec![0.3, -0.5, 0.8];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        let a = vec![1.0, 2.0, 3.0];
        let zero = vec![0.0, 0.0, 0.0];
        assert_eq!(cosine_similarity(&a, &zero), 0.0);
        assert_eq!(cosine_similarity(&zero, &zero), 0.0);
    }

    #[test]
    fn test_cosine_similarity_length_mismatch() {
        let a = vec![1.0, 2.0];
        let b = vec![1.0, 2.0, 3.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }
}
