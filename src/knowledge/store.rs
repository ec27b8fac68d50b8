//! Document Store - 지식 문서 저장소
//!
//! SQLite 인덱스(행, 키워드 검색)와 LanceDB 벡터 인덱스(최근접 검색),
//! 임베딩 엔진을 묶은 복합 저장소입니다. 단건/배치 수집, 시맨틱/키워드/
//! 하이브리드 검색, 통계, 정리 작업을 제공합니다.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Duration, Utc};
use sha2::{Digest, Sha256};

use crate::embedding::{EmbeddingEngine, Pacer};
use crate::error::RagError;

use super::document::{
    estimate_tokens, sanitize_content, validate_content_length, Document, DocumentMetadata,
    NewDocument,
};
use super::index::{DocumentIndex, SearchFilters, StoreStats};
use super::lance::LanceVectorStore;
use super::vector::{DocumentVector, VectorStore};

// ============================================================================
// Types
// ============================================================================

/// 검색 모드
///
/// 자유 형식 문자열 대신 닫힌 열거형으로 표현하여 잘못된 모드를
/// 컴파일 타임에 차단합니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum SearchMode {
    /// 벡터 유사도 검색
    Semantic,
    /// FTS5 키워드 검색
    Keyword,
    /// 가중 병합 (시맨틱 0.7 + 키워드 0.3)
    #[default]
    Hybrid,
}

impl SearchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMode::Semantic => "semantic",
            SearchMode::Keyword => "keyword",
            SearchMode::Hybrid => "hybrid",
        }
    }
}

/// 검색 결과
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub doc_id: i64,
    pub content: String,
    pub metadata: DocumentMetadata,
    /// 시맨틱: 유사도, 하이브리드: 병합 스코어,
    /// 키워드: 정규화된 BM25 (참고용, 병합에는 미사용)
    pub score: f32,
    pub search_type: SearchMode,
}

/// 배치 항목별 실패 정책
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchPolicy {
    /// 실패 항목을 건너뛰고 계속 (기본)
    #[default]
    ContinueOnError,
    /// 첫 실패에서 전체 중단
    FailFast,
}

/// 배치 실패 항목
#[derive(Debug)]
pub struct BatchFailure {
    /// 입력 내 인덱스
    pub index: usize,
    pub error: RagError,
}

/// 배치 수집 결과
#[derive(Debug, Default)]
pub struct BatchReport {
    pub stored: Vec<Document>,
    pub failures: Vec<BatchFailure>,
}

/// 저장소 설정
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// 최소 콘텐츠 길이 (문자 수)
    pub min_content_chars: usize,
    /// 최대 콘텐츠 길이 (문자 수, 초과분 절단)
    pub max_content_chars: usize,
    /// 배치 그룹 크기
    pub batch_size: usize,
    /// 이 개수를 넘는 배치에만 그룹 간 페이싱 적용
    pub pacing_threshold: usize,
    /// 시맨틱 검색 기본 유사도 임계값
    pub default_match_threshold: f32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            min_content_chars: 10,
            max_content_chars: 50_000,
            batch_size: 20,
            pacing_threshold: 10,
            default_match_threshold: 0.5,
        }
    }
}

/// 하이브리드 병합 가중치
const SEMANTIC_WEIGHT: f32 = 0.7;
const KEYWORD_WEIGHT: f32 = 0.3;

// ============================================================================
// Data Directory
// ============================================================================

/// 데이터 디렉토리 경로 (~/.excelkb-rag/)
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".excelkb-rag")
}

// ============================================================================
// DocumentStore
// ============================================================================

/// 지식 문서 저장소
pub struct DocumentStore {
    index: DocumentIndex,
    vectors: LanceVectorStore,
    engine: EmbeddingEngine,
    pacer: Arc<dyn Pacer>,
    config: StoreConfig,
}

impl DocumentStore {
    /// 구성 요소로 생성
    pub fn new(
        index: DocumentIndex,
        vectors: LanceVectorStore,
        engine: EmbeddingEngine,
        config: StoreConfig,
    ) -> Self {
        Self {
            index,
            vectors,
            engine,
            pacer: Arc::new(crate::embedding::DelayPacer::default()),
            config,
        }
    }

    /// 데이터 디렉토리에서 열기
    ///
    /// `knowledge.db`(SQLite)와 `vectors.lance`(LanceDB)를 생성하거나 엽니다.
    pub async fn open(data_dir: &Path, engine: EmbeddingEngine) -> Result<Self, RagError> {
        if !data_dir.exists() {
            std::fs::create_dir_all(data_dir)
                .map_err(|e| RagError::Store(format!("failed to create data directory: {}", e)))?;
        }

        let index = DocumentIndex::open(&data_dir.join("knowledge.db"))?;
        let vectors =
            LanceVectorStore::open(&data_dir.join("vectors.lance"), engine.dimension()).await?;

        Ok(Self::new(index, vectors, engine, StoreConfig::default()))
    }

    /// 페이서 교체 (테스트용)
    pub fn with_pacer(mut self, pacer: Arc<dyn Pacer>) -> Self {
        self.pacer = pacer;
        self
    }

    /// 내부 인덱스 접근
    pub fn index(&self) -> &DocumentIndex {
        &self.index
    }

    /// 내부 벡터 스토어 접근
    pub fn vector_store(&self) -> &LanceVectorStore {
        &self.vectors
    }

    // ------------------------------------------------------------------------
    // Ingestion
    // ------------------------------------------------------------------------

    /// 문서 저장
    ///
    /// 콘텐츠 정리 → 길이 검증 → 토큰 추정 → 임베딩 → 영속화.
    /// 벡터 삽입이 실패하면 행을 되돌리고 에러를 반환합니다.
    pub async fn store_document(&self, doc: NewDocument) -> Result<Document, RagError> {
        let content = sanitize_content(&doc.content, self.config.max_content_chars);
        validate_content_length(&content, self.config.min_content_chars)?;

        let token_count = estimate_tokens(&content);
        let embedding = self.engine.generate_embedding(&content).await?;
        let created_at = Utc::now();

        let id = self
            .index
            .insert(&content, &doc.metadata, token_count, &embedding, created_at)?;

        let entry = DocumentVector {
            doc_id: id,
            embedding: embedding.clone(),
        };
        if let Err(e) = self.vectors.insert_batch(&[entry]).await {
            let _ = self.index.delete(id);
            return Err(e);
        }

        tracing::info!("Stored document id={} ({} tokens)", id, token_count);

        Ok(Document {
            id,
            content,
            metadata: doc.metadata,
            embedding,
            token_count,
            created_at,
        })
    }

    /// 배치 문서 저장
    ///
    /// 입력 순서대로 고정 크기 그룹으로 처리합니다. 기본 정책은
    /// 항목별 실패를 수집하고 계속 진행하는 것입니다.
    pub async fn batch_store_documents(
        &self,
        docs: Vec<NewDocument>,
        policy: BatchPolicy,
    ) -> Result<BatchReport, RagError> {
        let mut report = BatchReport::default();
        let pace = docs.len() > self.config.pacing_threshold;

        for (i, doc) in docs.into_iter().enumerate() {
            if pace && i > 0 && i % self.config.batch_size == 0 {
                self.pacer.pause().await;
            }

            match self.store_document(doc).await {
                Ok(stored) => report.stored.push(stored),
                Err(e) => {
                    if policy == BatchPolicy::FailFast {
                        return Err(e);
                    }
                    tracing::warn!("Batch item {} failed: {}", i, e);
                    report.failures.push(BatchFailure { index: i, error: e });
                }
            }
        }

        tracing::info!(
            "Batch store finished: {} stored, {} failed",
            report.stored.len(),
            report.failures.len()
        );
        Ok(report)
    }

    // ------------------------------------------------------------------------
    // Search
    // ------------------------------------------------------------------------

    /// 시맨틱 검색
    ///
    /// 임계값 미만의 결과는 반환하지 않습니다. 벡터는 있으나 행이
    /// 삭제된 문서(삭제 경합)는 조용히 건너뜁니다.
    pub async fn semantic_search(
        &self,
        query: &str,
        limit: usize,
        threshold: f32,
    ) -> Result<Vec<SearchResult>, RagError> {
        let query_embedding = self.engine.generate_embedding(query).await?;
        let hits = self.vectors.search(&query_embedding, limit).await?;

        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            if hit.similarity < threshold {
                continue;
            }
            let Some(doc) = self.index.get(hit.doc_id)? else {
                continue;
            };
            results.push(SearchResult {
                doc_id: doc.id,
                content: doc.content,
                metadata: doc.metadata,
                score: hit.similarity,
                search_type: SearchMode::Semantic,
            });
        }

        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(limit);
        Ok(results)
    }

    /// 기본 임계값으로 시맨틱 검색
    pub async fn semantic_search_default(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchResult>, RagError> {
        self.semantic_search(query, limit, self.config.default_match_threshold)
            .await
    }

    /// 키워드 검색
    ///
    /// 메타데이터 필터 + FTS5 전문 검색. BM25 순위, 최신순 보조 정렬.
    pub fn keyword_search(
        &self,
        query: &str,
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<SearchResult>, RagError> {
        let rows = self.index.keyword_search(query, limit, filters)?;

        Ok(rows
            .into_iter()
            .map(|(doc, rank)| SearchResult {
                doc_id: doc.id,
                content: doc.content,
                metadata: doc.metadata,
                // BM25는 음수이며 작을수록 좋음 - (0, 1]로 정규화
                score: rank.map(|r| 1.0 / (1.0 + r.abs()) as f32).unwrap_or(0.0),
                search_type: SearchMode::Keyword,
            })
            .collect())
    }

    /// 하이브리드 검색
    ///
    /// 시맨틱/키워드 각각 2×limit 후보를 가져와 문서 ID로 병합합니다.
    /// 시맨틱은 유사도의 0.7배, 키워드는 고정 0.3을 기여하며,
    /// 양쪽에 모두 나타난 문서는 두 기여를 합산하고 hybrid로 태깅됩니다.
    pub async fn hybrid_search(
        &self,
        query: &str,
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<SearchResult>, RagError> {
        let semantic = self
            .semantic_search(query, limit * 2, self.config.default_match_threshold)
            .await?;
        let keyword = self.keyword_search(query, limit * 2, filters)?;

        let mut merged: HashMap<i64, SearchResult> = HashMap::new();

        for mut result in semantic {
            result.score *= SEMANTIC_WEIGHT;
            merged.insert(result.doc_id, result);
        }

        for result in keyword {
            match merged.entry(result.doc_id) {
                std::collections::hash_map::Entry::Occupied(mut entry) => {
                    let existing = entry.get_mut();
                    existing.score += KEYWORD_WEIGHT;
                    existing.search_type = SearchMode::Hybrid;
                }
                std::collections::hash_map::Entry::Vacant(slot) => {
                    slot.insert(SearchResult {
                        score: KEYWORD_WEIGHT,
                        search_type: SearchMode::Keyword,
                        ..result
                    });
                }
            }
        }

        let mut results: Vec<SearchResult> = merged.into_values().collect();
        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(limit);

        tracing::debug!("Hybrid search returned {} result(s)", results.len());
        Ok(results)
    }

    // ------------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------------

    /// ID로 문서 조회
    pub fn get_document(&self, id: i64) -> Result<Option<Document>, RagError> {
        self.index.get(id)
    }

    /// 문서 삭제
    ///
    /// 존재하지 않는 ID는 `NotFoundError`입니다.
    pub async fn delete_document(&self, id: i64) -> Result<(), RagError> {
        if !self.index.delete(id)? {
            return Err(RagError::NotFound(id));
        }
        self.vectors.delete_by_doc_id(id).await?;
        tracing::info!("Deleted document id={}", id);
        Ok(())
    }

    /// 저장소 통계
    pub fn get_statistics(&self) -> Result<StoreStats, RagError> {
        self.index.stats()
    }

    /// 오래된 문서 정리
    ///
    /// 기준 시각보다 오래된 문서를 행과 벡터 모두 삭제합니다.
    pub async fn cleanup_old_documents(&self, max_age: Duration) -> Result<usize, RagError> {
        let cutoff = Utc::now() - max_age;
        let ids = self.index.older_than(cutoff)?;

        for id in &ids {
            self.vectors.delete_by_doc_id(*id).await?;
        }
        let removed = self.index.delete_many(&ids)?;

        tracing::info!("Cleaned up {} old document(s)", removed);
        Ok(removed)
    }

    /// 중복 문서 정리
    ///
    /// 공백 정규화한 콘텐츠의 SHA-256이 같으면 중복으로 보고,
    /// 가장 최신 사본만 남깁니다.
    pub async fn cleanup_duplicate_documents(&self) -> Result<usize, RagError> {
        let rows = self.index.list_for_dedup()?;

        let mut seen: std::collections::HashSet<[u8; 32]> = std::collections::HashSet::new();
        let mut removed = 0;

        for (id, content, _created_at) in rows {
            if seen.insert(content_fingerprint(&content)) {
                continue;
            }
            self.vectors.delete_by_doc_id(id).await?;
            self.index.delete(id)?;
            removed += 1;
        }

        if removed > 0 {
            tracing::info!("Removed {} duplicate document(s)", removed);
        }
        Ok(removed)
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 중복 판정용 콘텐츠 지문 (공백 정규화 후 SHA-256)
fn content_fingerprint(content: &str) -> [u8; 32] {
    let normalized: String = content.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hasher.finalize().into()
}

// ============================================================================
// Tests
// ============================================================================
