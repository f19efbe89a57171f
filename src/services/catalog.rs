//! # 문서 종류 카탈로그
//!
//! 문서 종류(예: "GuestLecture")마다 채워야 할 필드 목록을 정의한 정적 레지스트리입니다.
//! 상태 머신은 이 카탈로그를 **읽기만** 합니다.
//!
//! ## 메뉴 선택 방식
//! 사용자는 세 가지 방법으로 문서 종류를 고를 수 있습니다:
//! - 메뉴 번호: `"11"`
//! - 표시 이름: `"guest lecture"` (대소문자 무시)
//! - 타입 키: `"GuestLecture"`
//!
//! 필드 목록이 비어 있는 종류는 메뉴에는 보이지만 "개발 중"으로 안내합니다.
//!
//! 기본은 `DocumentCatalog::builtin()`이며, `DOCUMENT_CATALOG_PATH`로
//! 같은 구조의 JSON 파일을 지정하면 그것을 대신 사용합니다.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::{FieldRule, FieldSpec, GenerationRequest, InputMode};

/// 학년 선택지
pub const YEARS: [&str; 4] = ["First Year", "Second Year", "Third Year", "Fourth Year"];
/// 학과 선택지
pub const DEPARTMENTS: [&str; 4] = ["CSBS", "CSE", "ECE", "MECH"];

/// 문서 종류 하나
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentType {
    /// 타입 키 (생성 요청의 `type` 값)
    pub key: String,
    /// 메뉴에 보이는 이름
    pub display_name: String,
    /// 메뉴 번호 (1부터)
    pub menu_number: u32,
    /// 선언 순서대로 채울 필드. 비어 있으면 아직 지원하지 않는 종류입니다.
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
}

impl DocumentType {
    pub fn is_available(&self) -> bool {
        !self.fields.is_empty()
    }
}

/// 사용자 입력을 문서 종류로 해석한 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentChoice<'a> {
    /// 필드 목록이 있는 종류: 수집을 시작할 수 있음
    Available(&'a DocumentType),
    /// 메뉴에는 있지만 필드 목록이 없는 종류
    InDevelopment(&'a DocumentType),
    /// 해석할 수 없는 입력
    Unknown,
}

/// 문서 종류 레지스트리
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentCatalog {
    types: Vec<DocumentType>,
}

impl DocumentCatalog {
    /// 문서 종류 목록으로 카탈로그를 만듭니다.
    ///
    /// 타입 키, 메뉴 번호, 종류 안의 필드 이름은 각각 유일해야 합니다.
    pub fn new(types: Vec<DocumentType>) -> Result<Self, AppError> {
        let mut keys = HashSet::new();
        let mut numbers = HashSet::new();
        for doc_type in &types {
            // HashSet::insert는 이미 있던 값이면 false를 반환합니다.
            if !keys.insert(doc_type.key.to_lowercase()) {
                return Err(AppError::BadRequest(format!(
                    "Duplicate document type: {}",
                    doc_type.key
                )));
            }
            if !numbers.insert(doc_type.menu_number) {
                return Err(AppError::BadRequest(format!(
                    "Duplicate menu number: {}",
                    doc_type.menu_number
                )));
            }
            let mut names = HashSet::new();
            for field in &doc_type.fields {
                if !names.insert(field.name.as_str()) {
                    return Err(AppError::BadRequest(format!(
                        "Duplicate field {} in {}",
                        field.name, doc_type.key
                    )));
                }
            }
        }

        let mut types = types;
        types.sort_by_key(|t| t.menu_number);
        Ok(Self { types })
    }

    /// JSON 파일에서 카탈로그를 읽습니다.
    pub async fn from_json_file(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let raw = tokio::fs::read_to_string(path).await?;
        let types: Vec<DocumentType> = serde_json::from_str(&raw)?;
        Self::new(types)
    }

    /// 내장 카탈로그: 11개 종류 중 Guest Lecture만 필드가 정의되어 있습니다.
    pub fn builtin() -> Self {
        let pending = [
            (1, "Minutes", "Minutes of Department Meeting"),
            (2, "MasterList", "Master list of documents"),
            (3, "SubjectAllocation", "Subject Allocation"),
            (4, "StaffRequirement", "Requirement of Staff Members"),
            (5, "LabManual", "Lab Manual"),
            (6, "Experiments", "List of Experiments"),
            (7, "Workload", "Workload Allocation"),
            (8, "IndividualTT", "Individual Time Table"),
            (9, "MasterTT", "Master Time Table"),
            (10, "CoachingTT", "Coaching Class Time Table"),
        ];

        let mut types: Vec<DocumentType> = pending
            .into_iter()
            .map(|(menu_number, key, display_name)| DocumentType {
                key: key.to_string(),
                display_name: display_name.to_string(),
                menu_number,
                fields: Vec::new(),
            })
            .collect();

        types.push(DocumentType {
            key: "GuestLecture".to_string(),
            display_name: "Guest Lecture".to_string(),
            menu_number: 11,
            fields: guest_lecture_fields(),
        });

        Self { types }
    }

    /// 전체 종류 (메뉴 번호 순)
    pub fn types(&self) -> &[DocumentType] {
        &self.types
    }

    /// 타입 키로 찾기 (대소문자 무시)
    pub fn get(&self, key: &str) -> Option<&DocumentType> {
        self.types.iter().find(|t| t.key.eq_ignore_ascii_case(key))
    }

    /// 필드 목록 복사본. 종류를 찾지 못하면 빈 벡터입니다.
    pub fn fields_for(&self, key: Option<&str>) -> Vec<FieldSpec> {
        key.and_then(|k| self.get(k))
            .map(|t| t.fields.clone())
            .unwrap_or_default()
    }

    /// 사용자 입력(번호, 표시 이름, 타입 키)을 문서 종류로 해석합니다.
    pub fn resolve(&self, input: &str) -> DocumentChoice<'_> {
        let normalized = input.trim().to_lowercase();
        if normalized.is_empty() {
            return DocumentChoice::Unknown;
        }

        let found = self.types.iter().find(|t| {
            t.menu_number.to_string() == normalized
                || t.display_name.to_lowercase() == normalized
                || t.key.to_lowercase() == normalized
        });

        match found {
            Some(t) if t.is_available() => DocumentChoice::Available(t),
            Some(t) => DocumentChoice::InDevelopment(t),
            None => DocumentChoice::Unknown,
        }
    }

    /// "1. Minutes of Department Meeting" 형식의 메뉴 항목들
    pub fn menu_labels(&self) -> Vec<String> {
        self.types
            .iter()
            .map(|t| format!("{}. {}", t.menu_number, t.display_name))
            .collect()
    }

    /// 메뉴 번호 범위 안내 문구에 쓰는 마지막 번호
    pub fn last_menu_number(&self) -> u32 {
        self.types.last().map(|t| t.menu_number).unwrap_or(0)
    }

    /// 생성 요청이 카탈로그와 맞는지 확인합니다.
    ///
    /// - 알 수 없거나 아직 지원하지 않는 종류 → `BadRequest`
    /// - 빠진 필수 필드 → `BadRequest("Missing required fields: ...")`
    pub fn check_request(&self, request: &GenerationRequest) -> Result<&DocumentType, AppError> {
        let doc_type = self
            .get(&request.document_type)
            .filter(|t| t.is_available())
            .ok_or_else(|| {
                AppError::BadRequest(format!(
                    "Unsupported document type: {}",
                    request.document_type
                ))
            })?;

        let missing: Vec<&str> = doc_type
            .fields
            .iter()
            .filter(|f| !request.fields.contains_key(&f.name))
            .map(|f| f.name.as_str())
            .collect();

        if !missing.is_empty() {
            return Err(AppError::BadRequest(format!(
                "Missing required fields: {}",
                missing.join(", ")
            )));
        }

        Ok(doc_type)
    }
}

impl Default for DocumentCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

fn text_field(name: &str, prompt: &str, min: usize, message: &str) -> FieldSpec {
    FieldSpec {
        name: name.to_string(),
        prompt: prompt.to_string(),
        rule: FieldRule::MinLength {
            min,
            message: message.to_string(),
        },
        input: InputMode::FreeText,
    }
}

fn select_field(name: &str, prompt: &str, options: &[&str]) -> FieldSpec {
    FieldSpec {
        name: name.to_string(),
        prompt: prompt.to_string(),
        rule: FieldRule::AcceptAsIs,
        input: InputMode::SingleSelect {
            options: options.iter().map(|o| o.to_string()).collect(),
        },
    }
}

/// Guest Lecture 보고서의 9개 필드
fn guest_lecture_fields() -> Vec<FieldSpec> {
    vec![
        text_field(
            "Guest Name",
            "Please enter the guest's name:",
            2,
            "Guest name must be at least 2 characters long.",
        ),
        text_field(
            "Guest Designation",
            "Please enter the guest's designation:",
            2,
            "Designation must be at least 2 characters long.",
        ),
        text_field(
            "Topic",
            "Please enter the topic of the lecture:",
            5,
            "Topic must be at least 5 characters long.",
        ),
        FieldSpec {
            name: "Event Date".to_string(),
            prompt: "Please select the event date:".to_string(),
            rule: FieldRule::AcceptAsIs,
            input: InputMode::DatePicker,
        },
        text_field(
            "Activity Code",
            "Please enter the activity code:",
            3,
            "Activity code must be at least 3 characters long.",
        ),
        select_field("Year", "Please select the target year:", &YEARS),
        FieldSpec {
            name: "No Of Count".to_string(),
            prompt: "Please enter the expected number of participants:".to_string(),
            rule: FieldRule::Digits {
                message: "Please enter a valid number of participants (digits only).".to_string(),
            },
            input: InputMode::FreeText,
        },
        select_field(
            "Organizer Department",
            "Please select the organizing department:",
            &DEPARTMENTS,
        ),
        text_field(
            "Organizer Faculty Name",
            "Please enter the faculty coordinator's name:",
            2,
            "Faculty name must be at least 2 characters long.",
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    #[test]
    fn guest_lecture_declares_nine_fields_in_order() {
        let catalog = DocumentCatalog::builtin();
        let names: Vec<String> = catalog
            .fields_for(Some("GuestLecture"))
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(
            names,
            vec![
                "Guest Name",
                "Guest Designation",
                "Topic",
                "Event Date",
                "Activity Code",
                "Year",
                "No Of Count",
                "Organizer Department",
                "Organizer Faculty Name",
            ]
        );
    }

    #[test]
    fn resolves_number_name_and_key() {
        let catalog = DocumentCatalog::builtin();
        for input in ["11", "guest lecture", "Guest Lecture", "GuestLecture", " 11 "] {
            match catalog.resolve(input) {
                DocumentChoice::Available(t) => assert_eq!(t.key, "GuestLecture"),
                other => panic!("{input:?} resolved to {other:?}"),
            }
        }
    }

    #[test]
    fn pending_types_are_in_development() {
        let catalog = DocumentCatalog::builtin();
        assert!(matches!(
            catalog.resolve("1"),
            DocumentChoice::InDevelopment(t) if t.key == "Minutes"
        ));
        assert_eq!(catalog.resolve("lab report"), DocumentChoice::Unknown);
        assert_eq!(catalog.resolve("42"), DocumentChoice::Unknown);
    }

    #[test]
    fn menu_is_ordered_by_number() {
        let labels = DocumentCatalog::builtin().menu_labels();
        assert_eq!(labels.len(), 11);
        assert_eq!(labels[0], "1. Minutes of Department Meeting");
        assert_eq!(labels[10], "11. Guest Lecture");
    }

    #[test]
    fn rejects_duplicate_field_names() {
        let field = FieldSpec {
            name: "Topic".to_string(),
            prompt: "Topic?".to_string(),
            rule: FieldRule::AcceptAsIs,
            input: InputMode::FreeText,
        };
        let result = DocumentCatalog::new(vec![DocumentType {
            key: "Talk".to_string(),
            display_name: "Talk".to_string(),
            menu_number: 1,
            fields: vec![field.clone(), field],
        }]);
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }

    #[test]
    fn check_request_lists_missing_fields() {
        let catalog = DocumentCatalog::builtin();
        let mut fields = Map::new();
        fields.insert("Guest Name".to_string(), "Dr. Jane Smith".into());
        let request = GenerationRequest {
            document_type: "GuestLecture".to_string(),
            fields,
        };
        let err = catalog.check_request(&request).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("Missing required fields"));
        assert!(message.contains("Topic"));
        assert!(!message.contains("Guest Name,"));

        let unknown = GenerationRequest {
            document_type: "Minutes".to_string(),
            fields: Map::new(),
        };
        assert!(catalog.check_request(&unknown).is_err());
    }

    #[test]
    fn catalog_survives_json_round_trip() {
        let catalog = DocumentCatalog::builtin();
        let json = serde_json::to_string(catalog.types()).unwrap();
        let types: Vec<DocumentType> = serde_json::from_str(&json).unwrap();
        assert_eq!(DocumentCatalog::new(types).unwrap(), catalog);
    }
}
