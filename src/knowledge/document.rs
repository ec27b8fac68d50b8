//! 문서 타입 및 검증
//!
//! 지식 문서와 메타데이터 타입, 콘텐츠 정리, 토큰 추정 휴리스틱을
//! 정의합니다.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RagError;

// ============================================================================
// Types
// ============================================================================

/// 문서 메타데이터
///
/// 잘 알려진 필드는 타입화하고, 나머지는 `extra` 확장 맵으로 보관합니다.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// 출처 (예: manual, community, support-ticket)
    pub source: Option<String>,
    /// 언어 코드 (ko, en)
    pub language: Option<String>,
    /// 분류 (예: excel)
    pub category: Option<String>,
    /// 난이도 (예: beginner, intermediate, advanced)
    pub difficulty: Option<String>,
    /// 콘텐츠 타입 태그
    pub content_type: Option<String>,
    /// 자유 형식 확장 필드
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, serde_json::Value>,
}

/// 저장된 문서
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: i64,
    pub content: String,
    pub metadata: DocumentMetadata,
    /// 문서 전체 임베딩 (차원은 항상 엔진 차원과 일치)
    pub embedding: Vec<f32>,
    /// 토큰 추정치 (chars/4 휴리스틱, 항상 1 이상)
    pub token_count: usize,
    pub created_at: DateTime<Utc>,
}

/// 새 문서 입력용 구조체
#[derive(Debug, Clone, Default)]
pub struct NewDocument {
    pub content: String,
    pub metadata: DocumentMetadata,
}

impl NewDocument {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: DocumentMetadata::default(),
        }
    }

    pub fn with_metadata(content: impl Into<String>, metadata: DocumentMetadata) -> Self {
        Self {
            content: content.into(),
            metadata,
        }
    }
}

// ============================================================================
// Content Handling
// ============================================================================

/// 토큰 수 추정 (chars/4 휴리스틱)
///
/// 실제 토크나이저가 아닌 문자 수 기반 근사치입니다. 다운스트림 비용
/// 계산이 이 휴리스틱의 형태에 의존하므로 정밀 토크나이저로 교체하지
/// 않습니다. 결과는 항상 1 이상입니다.
pub fn estimate_tokens(text: &str) -> usize {
    (text.chars().count() / 4).max(1)
}

/// 콘텐츠 정리
///
/// 앞뒤 공백 제거, 개행/탭을 제외한 제어 문자 제거, 최대 길이 절단.
pub fn sanitize_content(content: &str, max_chars: usize) -> String {
    let cleaned: String = content
        .trim()
        .chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\t'))
        .collect();

    if cleaned.chars().count() <= max_chars {
        return cleaned;
    }
    cleaned.chars().take(max_chars).collect()
}

/// 콘텐츠 길이 검증
///
/// 정리된 콘텐츠가 최소 길이 미만이면 `ValidationError`입니다.
pub fn validate_content_length(content: &str, min_chars: usize) -> Result<(), RagError> {
    let len = content.chars().count();
    if len < min_chars {
        return Err(RagError::Validation(format!(
            "content too short: {} chars (minimum {})",
            len, min_chars
        )));
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
