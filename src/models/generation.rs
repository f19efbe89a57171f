//! # 문서 생성 스트림 메시지 정의
//!
//! 콘텐츠 생성기와 주고받는 메시지 형식입니다.
//!
//! ```text
//! 클라이언트 → { "type": "GuestLecture", "fields": { "Guest Name": "...", ... } }
//! 서버       → { "type": "token", "content": "..." }        (0번 이상)
//!            → { "type": "complete", "content": "...", "word_count": 312, ... }
//!              또는 { "type": "error", "error": "..." }      (정확히 1번)
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 생성 요청: 문서 종류와 수집된 필드 값
///
/// `fields`는 순서를 지키는 `Map`입니다 (`preserve_order`).
/// 프롬프트에 필드가 문서 종류에 정의된 순서대로 들어가야 하기 때문입니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    #[serde(rename = "type")]
    pub document_type: String,
    pub fields: Map<String, Value>,
}

/// 생성기가 보내는 스트림 메시지
///
/// `#[serde(tag = "type")]`: `type` 필드 값으로 variant를 구분합니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamMessage {
    /// 본문 조각: 도착 순서대로 이어 붙입니다.
    Token { content: String },
    /// 최종 결과. `content`가 누적 버퍼보다 우선합니다.
    Complete {
        content: String,
        word_count: u64,
        #[serde(default)]
        sections: Map<String, Value>,
        #[serde(default)]
        metadata: BTreeMap<String, String>,
    },
    /// 생성 실패
    Error { error: String },
    /// 결과는 나왔지만 형식이 기대와 다름 (예: 섹션 구조 없음)
    Warning { message: String },
    /// 진행 상황 알림 ("processing", "parsing" 등)
    Status { status: String, message: String },
}

impl StreamMessage {
    /// `complete` 또는 `error`처럼 스트림을 끝내는 메시지인지
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamMessage::Complete { .. } | StreamMessage::Error { .. })
    }

    pub fn error(message: impl Into<String>) -> Self {
        StreamMessage::Error {
            error: message.into(),
        }
    }

    pub fn status(status: &str, message: impl Into<String>) -> Self {
        StreamMessage::Status {
            status: status.to_string(),
            message: message.into(),
        }
    }
}

/// 생성 한 번의 최종 결과
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationOutcome {
    Completed {
        content: String,
        word_count: u64,
        sections: Map<String, Value>,
    },
    Failed { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_wire_messages() {
        let token: StreamMessage =
            serde_json::from_str(r#"{"type":"token","content":"Hel"}"#).unwrap();
        assert_eq!(
            token,
            StreamMessage::Token {
                content: "Hel".to_string()
            }
        );

        // sections, metadata는 선택 항목
        let complete: StreamMessage =
            serde_json::from_str(r#"{"type":"complete","content":"Hello World","word_count":2}"#)
                .unwrap();
        assert!(complete.is_terminal());

        let error: StreamMessage =
            serde_json::from_str(r#"{"type":"error","error":"AI API error"}"#).unwrap();
        assert_eq!(error, StreamMessage::error("AI API error"));
    }

    #[test]
    fn request_uses_type_key() {
        let mut fields = Map::new();
        fields.insert("Topic".to_string(), "Machine Learning".into());
        let request = GenerationRequest {
            document_type: "GuestLecture".to_string(),
            fields,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["type"], "GuestLecture");
        assert_eq!(json["fields"]["Topic"], "Machine Learning");
    }

    #[test]
    fn request_keeps_field_order_from_the_wire() {
        let request: GenerationRequest = serde_json::from_str(
            r#"{"type":"GuestLecture","fields":{"Year":"2024","Guest Name":"Dr. Smith","Activity Code":"GL-1"}}"#,
        )
        .unwrap();
        let names: Vec<&str> = request.fields.keys().map(String::as_str).collect();
        assert_eq!(names, ["Year", "Guest Name", "Activity Code"]);
    }
}
