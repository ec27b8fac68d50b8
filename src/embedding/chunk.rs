//! 텍스트 전처리 및 청킹
//!
//! 임베딩 프로바이더의 입력 크기 제한에 맞춰 텍스트를 분할합니다.
//! 문장 경계를 우선하고, 한 문장이 제한을 넘으면 단어 경계에서,
//! 한 단어가 제한을 넘으면 문자 단위로 강제 분할합니다.
//!
//! 불변식: 모든 청크는 원문의 연속 부분 문자열이며, 청크를 이어 붙이면
//! 전처리된 입력 전체가 정확히 복원됩니다. 어떤 청크도 제한을 넘지 않습니다.

// ============================================================================
// Preprocessing
// ============================================================================

/// 임베딩 입력 전처리
///
/// 연속 공백을 단일 공백으로 축약하고, 제어 문자를 제거한 뒤,
/// 최대 길이(문자 수)로 자릅니다.
pub fn preprocess_text(text: &str, max_chars: usize) -> String {
    let collapsed: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let cleaned: String = collapsed.chars().filter(|c| !c.is_control()).collect();
    truncate_chars(&cleaned, max_chars)
}

/// 문자 수 기준 절단 (UTF-8 경계 안전)
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    s.chars().take(max_chars).collect()
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

// ============================================================================
// Chunking
// ============================================================================

/// 문장 종결 부호 여부
fn is_terminator(c: char) -> bool {
    matches!(c, '.' | '!' | '?')
}

/// 텍스트를 문장 구간으로 분할 (바이트 오프셋)
///
/// 종결 부호 연속과 뒤따르는 공백 하나까지를 앞 문장에 포함시켜
/// 구간을 이어 붙이면 원문이 복원되도록 합니다.
fn sentence_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if !is_terminator(c) {
            continue;
        }

        let mut end = i + c.len_utf8();

        // 종결 부호 연속 ("?!", "...") 소비
        while let Some(&(j, c2)) = chars.peek() {
            if is_terminator(c2) {
                chars.next();
                end = j + c2.len_utf8();
            } else {
                break;
            }
        }

        // 뒤따르는 공백 하나 포함 (전처리 후 공백은 단일)
        if let Some(&(j, c2)) = chars.peek() {
            if c2 == ' ' {
                chars.next();
                end = j + 1;
            }
        }

        spans.push((start, end));
        start = end;
    }

    if start < text.len() {
        spans.push((start, text.len()));
    }

    spans
}

/// 텍스트를 최대 크기 이하의 청크로 분할
///
/// 제한 이하의 텍스트는 그대로 단일 청크가 됩니다.
pub fn split_into_chunks(text: &str, max_chunk_chars: usize) -> Vec<String> {
    let max_chunk_chars = max_chunk_chars.max(1);

    if char_len(text) <= max_chunk_chars {
        return vec![text.to_string()];
    }

    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for (s, e) in sentence_spans(text) {
        let sentence = &text[s..e];
        let slen = char_len(sentence);

        // 단일 문장이 제한 초과 - 단어 경계에서 분할
        if slen > max_chunk_chars {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            let (mut pieces, rest, rest_len) = split_long_sentence(sentence, max_chunk_chars);
            chunks.append(&mut pieces);
            current = rest;
            current_len = rest_len;
            continue;
        }

        if current_len + slen > max_chunk_chars && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }

        current.push_str(sentence);
        current_len += slen;
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

/// 제한을 넘는 문장을 단어 경계에서 분할
///
/// 마지막 미완성 조각은 다음 문장과 합쳐질 수 있도록
/// (조각들, 잔여 문자열, 잔여 길이)로 반환합니다.
fn split_long_sentence(sentence: &str, max_chunk_chars: usize) -> (Vec<String>, String, usize) {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for word in sentence.split_inclusive(' ') {
        let wlen = char_len(word);

        // 단어 하나가 제한 초과 - 문자 단위 강제 분할
        if wlen > max_chunk_chars {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            for ch in word.chars() {
                if current_len == max_chunk_chars {
                    chunks.push(std::mem::take(&mut current));
                    current_len = 0;
                }
                current.push(ch);
                current_len += 1;
            }
            continue;
        }

        if current_len + wlen > max_chunk_chars && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }

        current.push_str(word);
        current_len += wlen;
    }

    (chunks, current, current_len)
}

// ============================================================================
// Tests
// ============================================================================
