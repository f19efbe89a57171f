//! # 입력 필드 모델 정의
//!
//! 문서 한 종류를 채우기 위해 사용자에게 물어보는 "필드"를 표현합니다.
//! 필드마다 질문 문구(prompt), 검증 규칙(rule), 입력 방식(input)이 있습니다.
//!
//! 검증 규칙을 클로저가 아닌 **데이터(enum)**로 표현했기 때문에
//! 카탈로그를 JSON 파일에서 읽어오거나 그대로 직렬화할 수 있습니다.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 필드 검증 실패: 사용자가 같은 필드에 다시 답해야 합니다.
///
/// `message`는 채팅창에 그대로 표시되는 문장입니다.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ValidationError {
    /// 검증에 실패한 필드 이름 (예: "Topic")
    pub field: String,
    /// 사용자에게 보여줄 에러 메시지
    pub message: String,
}

/// 필드 검증 규칙
///
/// `#[serde(tag = "kind")]`: JSON에서 `{ "kind": "min_length", "min": 2, ... }`처럼
/// 어떤 variant인지를 `kind` 필드로 구분합니다 (internally tagged enum).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldRule {
    /// 앞뒤 공백을 제외한 문자 수가 `min` 이상이어야 함
    MinLength { min: usize, message: String },
    /// 숫자(0-9)로만 이루어져야 함
    Digits { message: String },
    /// 외부 입력기(날짜 선택기, 옵션 버튼)가 이미 형식을 맞춰서 보내는 값: 그대로 통과
    AcceptAsIs,
}

impl FieldRule {
    /// 입력값을 검사합니다. 실패하면 규칙에 등록된 메시지를 돌려줍니다.
    pub fn check(&self, input: &str) -> Result<(), String> {
        match self {
            FieldRule::MinLength { min, message } => {
                // .chars().count(): 바이트 수가 아니라 유니코드 문자 수
                if input.trim().chars().count() < *min {
                    return Err(message.clone());
                }
                Ok(())
            }
            FieldRule::Digits { message } => {
                let trimmed = input.trim();
                if trimmed.is_empty() || !trimmed.chars().all(|c| c.is_ascii_digit()) {
                    return Err(message.clone());
                }
                Ok(())
            }
            FieldRule::AcceptAsIs => Ok(()),
        }
    }
}

/// 필드 값을 입력받는 방식
///
/// 프론트엔드는 이 값을 보고 일반 입력창, 날짜 선택기, 옵션 버튼 중 하나를 띄웁니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum InputMode {
    FreeText,
    DatePicker,
    SingleSelect { options: Vec<String> },
}

/// 문서 한 종류에 필요한 필드 하나의 명세
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// 필드 이름이자 `collected` 맵의 키 (문서 종류 안에서 유일)
    pub name: String,
    /// 봇이 보여줄 질문
    pub prompt: String,
    pub rule: FieldRule,
    pub input: InputMode,
}

impl FieldSpec {
    /// 이 필드의 규칙으로 입력값을 검증합니다.
    pub fn validate(&self, input: &str) -> Result<(), ValidationError> {
        self.rule.check(input).map_err(|message| ValidationError {
            field: self.name.clone(),
            message,
        })
    }

    /// 옵션 버튼 목록 (단일 선택 필드가 아니면 빈 슬라이스)
    pub fn options(&self) -> &[String] {
        match &self.input {
            InputMode::SingleSelect { options } => options,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn min_length(min: usize) -> FieldRule {
        FieldRule::MinLength {
            min,
            message: format!("at least {min}"),
        }
    }

    #[test]
    fn min_length_counts_trimmed_characters() {
        let rule = min_length(5);
        assert!(rule.check("  AI  ").is_err());
        assert!(rule.check("Large Language Models").is_ok());
        // 한글 5자 = 15바이트지만 5문자로 계산됩니다.
        assert!(rule.check("인공지능학").is_ok());
    }

    #[test]
    fn digits_rule_rejects_mixed_input() {
        let rule = FieldRule::Digits {
            message: "numbers only".to_string(),
        };
        assert!(rule.check("120").is_ok());
        assert_eq!(rule.check("12a"), Err("numbers only".to_string()));
        assert!(rule.check("").is_err());
        assert!(rule.check("-5").is_err());
    }

    #[test]
    fn validation_error_carries_field_name() {
        let spec = FieldSpec {
            name: "Topic".to_string(),
            prompt: "Please enter the topic of the lecture:".to_string(),
            rule: min_length(5),
            input: InputMode::FreeText,
        };
        let err = spec.validate("AI").unwrap_err();
        assert_eq!(err.field, "Topic");
        assert_eq!(err.to_string(), "at least 5");
    }

    #[test]
    fn rule_serializes_with_kind_tag() {
        let json = serde_json::to_value(min_length(2)).unwrap();
        assert_eq!(json["kind"], "min_length");
        assert_eq!(json["min"], 2);
    }
}
