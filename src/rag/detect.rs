//! 휴리스틱 감지 함수
//!
//! 언어 감지와 엑셀 함수명 추출. 둘 다 근사치이며 로깅/메타데이터
//! 용도입니다. 정확성이 필요한 분기에 사용하면 안 됩니다.

use regex::Regex;

/// 한글 문자 포함 시 "ko", 아니면 "en"
///
/// 음절(가-힣), 자모(ㄱ-ㅎ, ㅏ-ㅣ) 범위만 확인하는 단순 휴리스틱입니다.
pub fn detect_language(text: &str) -> &'static str {
    let has_hangul = text.chars().any(|c| {
        matches!(c,
            '\u{AC00}'..='\u{D7A3}'   // 한글 음절
            | '\u{3131}'..='\u{318E}' // 호환 자모
        )
    });
    if has_hangul {
        "ko"
    } else {
        "en"
    }
}

/// 텍스트에서 엑셀 함수명 추출
///
/// 알려진 함수명 뒤에 여는 괄호가 오는 패턴만 인식합니다.
/// 출현 순서를 유지하고 중복을 제거합니다.
pub fn detect_excel_functions(text: &str) -> Vec<String> {
    let pattern = Regex::new(
        r"(?i)\b(VLOOKUP|HLOOKUP|XLOOKUP|INDEX|MATCH|SUMIF|SUMIFS|COUNTIF|COUNTIFS|AVERAGEIF|AVERAGEIFS|IFERROR|IFNA|SUMPRODUCT|OFFSET|INDIRECT|TEXTJOIN|CONCATENATE|CONCAT|SUBSTITUTE|TRIM|LEFT|RIGHT|MID|LEN|FIND|SEARCH|ROUND|ROUNDUP|ROUNDDOWN|RANK|LARGE|SMALL|FILTER|SORT|UNIQUE|SEQUENCE|TRANSPOSE|PIVOTBY|GROUPBY|LET|LAMBDA)\s*\(",
    )
    .expect("valid function pattern");

    let mut seen = std::collections::HashSet::new();
    let mut functions = Vec::new();

    for capture in pattern.captures_iter(text) {
        let name = capture[1].to_uppercase();
        if seen.insert(name.clone()) {
            functions.push(name);
        }
    }

    functions
}

// ============================================================================
// Tests
// ============================================================================
