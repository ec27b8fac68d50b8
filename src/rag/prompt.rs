//! 프롬프트 템플릿 및 조립
//!
//! 티어별 시스템 프롬프트와 RAG 컨텍스트가 포함된 사용자 프롬프트를
//! 조립합니다. 상위 티어 템플릿은 하위 티어의 엄격한 상위 집합입니다.

use clap::ValueEnum;
use serde::Serialize;

use crate::knowledge::estimate_tokens;

// ============================================================================
// Prompt Tier
// ============================================================================

/// 프롬프트 특화 수준
///
/// 순서가 있는 세 단계이며, 각 단계의 시스템 프롬프트는 아래 단계의
/// 지침을 모두 포함합니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptTier {
    /// 기본 답변 지침
    #[default]
    Basic,
    /// 수식 설계/디버깅 지침 추가
    Pro,
    /// 자동화/최적화 전문 지침 추가
    Expert,
}

impl PromptTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromptTier::Basic => "basic",
            PromptTier::Pro => "pro",
            PromptTier::Expert => "expert",
        }
    }
}

// ============================================================================
// Templates
// ============================================================================

const BASE_PROMPT: &str = "\
당신은 엑셀 전문 어시스턴트입니다.
- 사용자의 엑셀 질문에 정확하고 간결하게 답변합니다.
- 수식은 반드시 코드 블록으로 제시하고, 각 인자의 의미를 설명합니다.
- 확실하지 않은 내용은 추측하지 말고 모른다고 답합니다.
- 제공된 참고 지식이 있으면 우선 활용합니다.
";

const PRO_ADDENDUM: &str = "
[고급 지침]
- 여러 해법이 있으면 장단점을 비교하고 권장안을 제시합니다.
- 수식 오류(#N/A, #REF!, #VALUE! 등)는 원인별 진단 절차를 안내합니다.
- 대용량 데이터에서는 휘발성 함수(OFFSET, INDIRECT) 사용을 경고합니다.
- 버전별 함수 지원 여부(XLOOKUP, FILTER 등 365 전용)를 명시합니다.
";

const EXPERT_ADDENDUM: &str = "
[전문가 지침]
- 반복 작업은 파워 쿼리, 매크로(VBA), LAMBDA 함수 등 자동화 방안을 제안합니다.
- 계산 성능 병목(전체 열 참조, 배열 수식 남용)을 지적하고 개선안을 제시합니다.
- 데이터 모델링 관점(정규화, 피벗 구조)에서 시트 설계를 조언합니다.
";

/// 티어별 시스템 프롬프트
///
/// 상위 티어는 하위 티어 프롬프트에 지침을 덧붙이는 방식으로 만들어
/// 상위 집합 관계가 구조적으로 보장됩니다.
pub fn system_prompt(tier: PromptTier) -> String {
    let mut prompt = String::from(BASE_PROMPT);
    if tier >= PromptTier::Pro {
        prompt.push_str(PRO_ADDENDUM);
    }
    if tier >= PromptTier::Expert {
        prompt.push_str(EXPERT_ADDENDUM);
    }
    prompt
}

// ============================================================================
// User Prompt Assembly
// ============================================================================

/// 답변 지침 블록 (사용자 프롬프트 말미에 고정 삽입)
const INSTRUCTION_BLOCK: &str = "\
[답변 지침]
- 참고 지식에 근거한 부분과 일반 지식에 근거한 부분을 구분하세요.
- 수식 예시는 한국어 시트 환경(쉼표 구분자)을 기준으로 작성하세요.
- 단계가 있는 작업은 번호를 붙여 순서대로 설명하세요.";

/// 사용자 프롬프트 조립
///
/// 존재하는 섹션만 순서대로 이어 붙입니다:
/// 참고 지식 → 추가 컨텍스트 → 첨부 안내 → 질문 → 답변 지침.
pub fn assemble_user_prompt(
    enhanced_context: &str,
    caller_context: &str,
    attachment_count: usize,
    query: &str,
) -> String {
    let mut sections: Vec<String> = Vec::new();

    if !enhanced_context.is_empty() {
        sections.push(format!("[참고 지식]\n{}", enhanced_context));
    }

    if !caller_context.trim().is_empty() {
        sections.push(format!("[추가 컨텍스트]\n{}", caller_context.trim()));
    }

    if attachment_count > 0 {
        sections.push(format!(
            "[첨부 파일]\n사용자가 파일 {}개를 첨부했습니다. 답변 시 참고하세요.",
            attachment_count
        ));
    }

    sections.push(format!("[질문]\n{}", query));
    sections.push(INSTRUCTION_BLOCK.to_string());

    sections.join("\n\n")
}

/// 프롬프트 토큰 추정 (시스템 + 사용자, chars/4 휴리스틱)
pub fn estimate_prompt_tokens(system_prompt: &str, user_prompt: &str) -> usize {
    estimate_tokens(system_prompt) + estimate_tokens(user_prompt)
}

// ============================================================================
// Tests
// ============================================================================
