//! # 보고서 응답 파서
//!
//! 언어 모델이 돌려준 텍스트를 섹션 맵으로 바꾸고, 본문과 단어 수를 계산합니다.
//!
//! 모델에게 JSON만 달라고 요청하지만 실제 응답은 자주 깨져 있습니다:
//! - ```` ```json ```` 코드 블록으로 감싸져 있음
//! - 앞뒤에 설명 문장이 붙음
//! - 마지막 항목 뒤에 쉼표가 남음 (`{"a": "b",}`)
//! - 토큰 한도에 걸려 중간에 잘림 (`{"sections": {"Event Summary": "The lec`)
//!
//! - 항목 사이 쉼표가 빠지거나 문자열 안에 줄바꿈이 그대로 들어감
//!
//! 그래서 파싱은 세 단계로 진행합니다:
//! 1. 그대로 파싱
//! 2. 실패하면 `repair_json()`으로 고친 뒤 다시 파싱
//! 3. 그래도 안 되면 `"제목": "본문"` 쌍을 하나씩 뽑아냄 (`extract_sections()`)

use serde_json::{Map, Value};
use thiserror::Error;

/// 응답을 어떻게 해도 JSON으로 읽을 수 없음
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Failed to parse response as JSON")]
pub struct ReportError {
    /// 디버깅용 원본 응답 앞부분 (최대 1000자)
    pub raw_excerpt: String,
}

/// 파싱된 보고서
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedReport {
    /// 섹션 제목 → 본문 (응답 순서 유지)
    pub sections: Map<String, Value>,
    /// 섹션 본문을 공백 하나로 이어 붙인 전체 내용
    pub content: String,
    pub word_count: u64,
    /// JSON이긴 하지만 섹션 구조가 없어서 원문을 통째로 쓴 경우의 경고
    pub warning: Option<String>,
}

/// 모델 응답을 보고서로 파싱합니다.
pub fn parse_report(raw: &str) -> Result<ParsedReport, ReportError> {
    let parsed = serde_json::from_str::<Value>(raw)
        .ok()
        .filter(|value| sections_of(value).is_some())
        .or_else(|| serde_json::from_str::<Value>(&repair_json(raw)).ok());

    let Some(value) = parsed.filter(Value::is_object) else {
        let sections = extract_sections(raw);
        if sections.is_empty() {
            return Err(ReportError {
                raw_excerpt: raw.chars().take(1000).collect(),
            });
        }
        tracing::debug!("Recovered {} sections from malformed JSON", sections.len());
        return Ok(report_from(sections, None));
    };

    let (sections, warning) = match sections_of(&value) {
        Some(sections) => (sections, None),
        None => {
            // JSON 객체이지만 sections가 없으면 원문 전체를 하나의 섹션으로 씁니다.
            let mut fallback = Map::new();
            fallback.insert("Content".to_string(), Value::String(raw.to_string()));
            (
                fallback,
                Some("Response format was incorrect, displaying as raw content".to_string()),
            )
        }
    };

    Ok(report_from(sections, warning))
}

fn report_from(sections: Map<String, Value>, warning: Option<String>) -> ParsedReport {
    let content = join_sections(&sections);
    let word_count = count_words(&content) as u64;

    ParsedReport {
        sections,
        content,
        word_count,
        warning,
    }
}

/// `sections` 값을 맵으로 꺼냅니다.
///
/// 두 가지 모양을 받습니다:
/// - 객체: `{"sections": {"Event Summary": "..."}}`
/// - 목록: `{"sections": [{"title": "Event Summary", "content": "..."}]}`
fn sections_of(value: &Value) -> Option<Map<String, Value>> {
    match value.get("sections")? {
        Value::Object(map) => Some(map.clone()),
        Value::Array(items) => {
            let mut map = Map::new();
            for item in items {
                // title/content가 문자열이 아닌 항목은 건너뜁니다.
                let (Some(title), Some(content)) = (
                    item.get("title").and_then(Value::as_str),
                    item.get("content").and_then(Value::as_str),
                ) else {
                    continue;
                };
                map.insert(title.to_string(), Value::String(content.to_string()));
            }
            Some(map)
        }
        _ => None,
    }
}

/// 섹션 본문들을 공백 하나로 이어 붙입니다. 문자열이 아닌 값은 JSON 표기 그대로 씁니다.
fn join_sections(sections: &Map<String, Value>) -> String {
    sections
        .values()
        .map(|value| match value {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// 흔히 깨지는 JSON 응답을 고칩니다.
///
/// 1. 코드 블록 표시(```` ```json ````, ```` ``` ````) 제거
/// 2. 첫 `{`부터 마지막 `}`까지만 남김 (닫는 괄호가 없으면 끝까지)
/// 3. 문자열 밖의 `,}` / `,]` 에서 쉼표 제거
/// 4. 잘린 문자열과 열린 괄호를 순서대로 닫음
pub fn repair_json(raw: &str) -> String {
    let unfenced = raw.replace("```json", "").replace("```", "");

    let body = match (unfenced.find('{'), unfenced.rfind('}')) {
        (Some(start), Some(end)) if end > start => &unfenced[start..=end],
        (Some(start), _) => &unfenced[start..],
        _ => unfenced.as_str(),
    };

    let mut out = String::with_capacity(body.len() + 8);
    // 아직 닫히지 않은 괄호들 (스택)
    let mut open: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for c in body.chars() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '{' | '[' => {
                open.push(c);
                out.push(c);
            }
            '}' | ']' => {
                drop_trailing_comma(&mut out);
                open.pop();
                out.push(c);
            }
            _ => out.push(c),
        }
    }

    // 잘린 응답 마무리
    if escaped {
        out.pop();
    }
    if in_string {
        out.push('"');
    }
    while let Some(bracket) = open.pop() {
        drop_trailing_comma(&mut out);
        out.push(if bracket == '{' { '}' } else { ']' });
    }

    out
}

/// 고쳐도 JSON이 아닌 응답에서 `"제목": "본문"` 쌍을 순서대로 뽑아냅니다.
///
/// 값이 문자열이 아닌 키(`"sections": {` 등)는 건너뜁니다.
/// 마지막 값이 잘려 있으면 끝까지를 본문으로 씁니다.
fn extract_sections(raw: &str) -> Map<String, Value> {
    let bytes = raw.as_bytes();
    let mut sections = Map::new();
    // 따옴표, 콜론, 공백은 모두 ASCII라 바이트 위치로 잘라도 문자 경계가 맞습니다.
    let mut pos = 0;

    while let Some(offset) = raw[pos..].find('"') {
        let key_start = pos + offset + 1;
        let Some(key_end) = closing_quote(bytes, key_start) else {
            break;
        };
        pos = key_end + 1;

        let colon = skip_whitespace(bytes, pos);
        if bytes.get(colon) != Some(&b':') {
            continue;
        }
        let value_open = skip_whitespace(bytes, colon + 1);
        if bytes.get(value_open) != Some(&b'"') {
            pos = value_open;
            continue;
        }

        let value_start = value_open + 1;
        let value_end = closing_quote(bytes, value_start);
        let title = unescape(&raw[key_start..key_end]);
        let body = unescape(&raw[value_start..value_end.unwrap_or(raw.len())]);
        if !title.is_empty() && !body.trim().is_empty() {
            sections.insert(title, Value::String(body));
        }

        match value_end {
            Some(end) => pos = end + 1,
            None => break,
        }
    }

    sections
}

/// `start`부터 이스케이프되지 않은 닫는 따옴표의 위치
fn closing_quote(bytes: &[u8], start: usize) -> Option<usize> {
    let mut i = start;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'"' => return Some(i),
            _ => i += 1,
        }
    }
    None
}

fn skip_whitespace(bytes: &[u8], mut i: usize) -> usize {
    while bytes.get(i).is_some_and(u8::is_ascii_whitespace) {
        i += 1;
    }
    i
}

/// JSON 문자열 이스케이프(`\"`, `\n`, `\uXXXX` 등)를 풉니다.
fn unescape(literal: &str) -> String {
    let mut out = String::with_capacity(literal.len());
    let mut chars = literal.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('b') => out.push('\u{8}'),
            Some('f') => out.push('\u{c}'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                let decoded = u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32);
                out.push(decoded.unwrap_or(char::REPLACEMENT_CHARACTER));
            }
            // \" \\ \/
            Some(other) => out.push(other),
            None => {}
        }
    }

    out
}

/// 끝에 남은 `,`(뒤따르는 공백 포함)를 지웁니다.
fn drop_trailing_comma(out: &mut String) {
    let trimmed = out.trim_end().len();
    if out[..trimmed].ends_with(',') {
        out.truncate(trimmed - 1);
    }
}

/// 텍스트의 단어 수를 계산합니다.
///
/// 공백(스페이스, 탭, 줄바꿈)으로 분리하여 단어를 셉니다.
pub fn count_words(text: &str) -> usize {
    // .split_whitespace(): 연속된 공백도 하나의 구분자로 취급합니다.
    text.split_whitespace().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_clean_object_sections_in_order() {
        let raw = r#"{"sections": {"Event Summary": "The lecture was held.", "Speaker Details": "Dr. Smith spoke."}}"#;
        let report = parse_report(raw).unwrap();

        let titles: Vec<&String> = report.sections.keys().collect();
        assert_eq!(titles, vec!["Event Summary", "Speaker Details"]);
        assert_eq!(report.content, "The lecture was held. Dr. Smith spoke.");
        assert_eq!(report.word_count, 7);
        assert!(report.warning.is_none());
    }

    #[test]
    fn repairs_fenced_output_with_trailing_commas() {
        let raw = "Here is the report:\n```json\n{\"sections\": {\"Topic Summary\": \"Large language models.\",},}\n```";
        let report = parse_report(raw).unwrap();
        assert_eq!(report.content, "Large language models.");
        assert_eq!(report.word_count, 3);
    }

    #[test]
    fn closes_truncated_output() {
        let raw = r#"{"sections": {"Event Summary": "The session began on time", "Acknowledgments": "We thank"#;
        let report = parse_report(raw).unwrap();
        assert_eq!(report.sections.len(), 2);
        assert_eq!(report.sections["Acknowledgments"], "We thank");
    }

    #[test]
    fn accepts_list_form_sections() {
        let raw = r#"{"sections": [{"title": "Event Summary", "content": "Held in Hall A."}, {"title": "Acknowledgments", "content": "Thanks."}]}"#;
        let report = parse_report(raw).unwrap();
        assert_eq!(report.sections["Event Summary"], "Held in Hall A.");
        assert_eq!(report.content, "Held in Hall A. Thanks.");
    }

    #[test]
    fn object_without_sections_falls_back_with_warning() {
        let raw = r#"{"report": "A plain report body"}"#;
        let report = parse_report(raw).unwrap();
        assert_eq!(report.sections["Content"], raw);
        assert!(report.warning.is_some());
    }

    #[test]
    fn missing_commas_fall_back_to_pair_extraction() {
        let raw = "{\"sections\": {\"Event Summary\": \"Held in \\\"Hall A\\\".\" \"Acknowledgments\": \"Thanks to\nthe team\"";
        assert!(serde_json::from_str::<Value>(&repair_json(raw)).is_err());

        let report = parse_report(raw).unwrap();
        let titles: Vec<&String> = report.sections.keys().collect();
        assert_eq!(titles, vec!["Event Summary", "Acknowledgments"]);
        assert_eq!(report.sections["Event Summary"], "Held in \"Hall A\".");
        assert_eq!(report.sections["Acknowledgments"], "Thanks to\nthe team");
        assert_eq!(report.content, "Held in \"Hall A\". Thanks to\nthe team");
        assert!(report.warning.is_none());
    }

    #[test]
    fn extraction_skips_non_string_values() {
        let sections = extract_sections(r#"{"sections": {"Year": 2024 "Topic Summary": "Rust \u00e9tudes"}"#);
        assert_eq!(sections.len(), 1);
        assert_eq!(sections["Topic Summary"], "Rust études");
    }

    #[test]
    fn unparseable_output_is_an_error() {
        let err = parse_report("I'm sorry, I cannot help with that.").unwrap_err();
        assert_eq!(err.to_string(), "Failed to parse response as JSON");
        assert!(err.raw_excerpt.starts_with("I'm sorry"));
    }

    #[test]
    fn repair_keeps_commas_inside_strings() {
        let repaired = repair_json(r#"{"a": "x,}", "b": [1, 2,],}"#);
        let value: Value = serde_json::from_str(&repaired).unwrap();
        assert_eq!(value["a"], "x,}");
        assert_eq!(value["b"], serde_json::json!([1, 2]));
    }

    #[test]
    fn counts_words_across_whitespace() {
        assert_eq!(count_words("Hello   World\n\tagain"), 3);
        assert_eq!(count_words("   "), 0);
    }
}
