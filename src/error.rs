//! 에러 타입 정의
//!
//! RAG 서브시스템 전체에서 사용하는 타입화된 에러입니다.
//! 배치 연산은 항목별 실패를 수집하고, 단건 연산은 즉시 전파합니다.

use thiserror::Error;

/// RAG 서브시스템 에러
#[derive(Debug, Error)]
pub enum RagError {
    /// 임베딩 프로바이더 호출 실패 (일시적, 재시도는 호출자 판단)
    #[error("embedding provider '{provider}' failed: {message}")]
    Provider {
        /// 프로바이더 이름 (예: gemini-embedding-001)
        provider: String,
        /// 실패 원인
        message: String,
    },

    /// 프로바이더가 잘못된 차원의 벡터를 반환 (치명적, 저장 금지)
    #[error("embedding dimension contract violated: expected {expected}, got {actual}")]
    ContractViolation {
        /// 기대 차원
        expected: usize,
        /// 실제 반환된 차원
        actual: usize,
    },

    /// 문서 콘텐츠가 설정된 길이 범위를 벗어남
    #[error("invalid document content: {0}")]
    Validation(String),

    /// 존재하지 않는 문서 ID 참조
    #[error("document not found: id={0}")]
    NotFound(i64),

    /// 저장소 I/O 실패
    #[error("store operation failed: {0}")]
    Store(String),
}

impl From<rusqlite::Error> for RagError {
    fn from(err: rusqlite::Error) -> Self {
        RagError::Store(err.to_string())
    }
}

impl From<lancedb::Error> for RagError {
    fn from(err: lancedb::Error) -> Self {
        RagError::Store(err.to_string())
    }
}

impl RagError {
    /// 프로바이더 에러 생성 헬퍼
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        RagError::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
