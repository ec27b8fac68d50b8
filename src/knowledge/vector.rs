//! Vector Store - 벡터 인덱스 트레이트
//!
//! 문서 단위 임베딩의 최근접 검색 계약입니다. 구현체는
//! `LanceVectorStore`이며, 다른 백엔드로 교체할 수 있습니다.

use async_trait::async_trait;

use crate::error::RagError;

// ============================================================================
// Types
// ============================================================================

/// 벡터 엔트리 (저장용)
#[derive(Debug, Clone)]
pub struct DocumentVector {
    /// 문서 ID (documents.id)
    pub doc_id: i64,
    /// 문서 전체 임베딩
    pub embedding: Vec<f32>,
}

/// 최근접 검색 결과
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub doc_id: i64,
    /// 거리에서 유도한 유사도 (0.0 ~ 1.0, 높을수록 가까움)
    pub similarity: f32,
}

// ============================================================================
// VectorStore Trait
// ============================================================================

/// 벡터 인덱스 공통 인터페이스
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// 벡터 배치 삽입
    async fn insert_batch(&self, entries: &[DocumentVector]) -> Result<usize, RagError>;

    /// 최근접 검색
    async fn search(
        &self,
        query_embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<VectorHit>, RagError>;

    /// doc_id의 벡터 삭제, 제거된 수 반환
    async fn delete_by_doc_id(&self, doc_id: i64) -> Result<usize, RagError>;

    /// 저장된 벡터 수
    async fn count(&self) -> Result<usize, RagError>;
}
