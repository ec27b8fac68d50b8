//! 임베딩 모듈 - 텍스트 벡터화 엔진
//!
//! - Provider: Gemini API 호출 (rate limit, 재시도)
//! - Engine: 전처리 → 캐시 → 청킹 → 평균 결합 오케스트레이션
//! - Cache: 용량 제한 캐시 (오래된 절반 일괄 제거)
//! - Chunk: 문장/단어 경계 기반 분할
//! - Pacer: 배치 그룹 간 페이싱 (주입 가능)
//!
//! ## 사용법
//! ```rust,ignore
//! let provider = Arc::new(GeminiEmbedding::from_env()?);
//! let engine = EmbeddingEngine::new(provider, EngineConfig::default());
//! let embedding = engine.generate_embedding("VLOOKUP 사용법").await?;
//! ```

mod cache;
mod chunk;
mod engine;
mod pacer;
mod provider;

// Re-exports
pub use cache::{cache_key, CacheStats, EmbeddingCache, DEFAULT_CACHE_CAPACITY};
pub use chunk::{preprocess_text, split_into_chunks, truncate_chars};
pub use engine::{cosine_similarity, EmbeddingEngine, EngineConfig};
pub use pacer::{DelayPacer, NoopPacer, Pacer};
pub use provider::{
    get_api_key, has_api_key, EmbeddingProvider, GeminiEmbedding, DEFAULT_DIMENSION,
};

#[cfg(test)]
pub(crate) use provider::testing;
