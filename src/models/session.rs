//! # 문서 생성 세션 모델 정의
//!
//! 사용자와 봇의 대화 한 건(세션)을 표현하는 구조체들입니다.
//!
//! ## 두 가지 표현
//! - `DocumentSession`: 메모리 안에서 상태 머신이 다루는 값 (필드 명세, 진행 단계 포함)
//! - `SessionRecord`: 저장소에 JSON으로 저장되는 모양 (camelCase 키)
//!
//! 레코드에는 필드 명세(FieldSpec)를 저장하지 않습니다.
//! 불러올 때 문서 종류 이름으로 카탈로그에서 다시 찾아 붙입니다.
//!
//! ## 진행 단계 흐름
//! ```text
//! Idle → AwaitingField(0) → ... → AwaitingField(N-1) → Ready → Generating → Completed
//!                                                        ↑__________|  (생성 실패 시)
//! ```

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{FieldSpec, GenerationRequest, InputMode};

/// 새 세션의 기본 제목
pub const DEFAULT_TITLE: &str = "New Chat";

/// 메시지 작성자
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    Bot,
    User,
}

/// 채팅 메시지 한 건: 추가된 뒤에는 절대 수정하지 않습니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// 세션 안에서 1부터 증가하는 순번
    pub id: u64,
    pub sender: Sender,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    /// 옵션 버튼 (단일 선택 필드의 선택지, 문서 종류 메뉴 등)
    ///
    /// `skip_serializing_if`: 비어 있으면 JSON에서 키 자체를 생략합니다.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub buttons: Vec<String>,
    /// 첨부 이미지 URL
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
    /// 프론트엔드가 띄울 입력기 힌트 (날짜 선택기 / 옵션 목록)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<InputMode>,
}

/// 필드 수집 상태 머신의 현재 단계
///
/// `#[serde(tag = "state")]`: `{ "state": "awaiting_field", "index": 2, ... }` 형태로 직렬화
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Phase {
    /// 문서 종류를 아직 고르지 않음
    Idle,
    /// `index`번째 필드의 답을 기다리는 중.
    /// `prompt_pending`이 true이면 이전 답을 받은 직후의 지연 구간이며,
    /// 이 동안 들어오는 입력은 무시합니다.
    AwaitingField { index: usize, prompt_pending: bool },
    /// 모든 필드 수집 완료, 생성 스트림 없음 (생성 실패 후 재시도 대기 포함)
    Ready,
    /// 생성 스트림이 열려 있음
    Generating,
    /// 문서 생성 완료
    Completed,
}

impl Phase {
    /// 저장 레코드에 쓰는 단계 이름
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::AwaitingField { .. } => "awaiting_field",
            Phase::Ready => "ready",
            Phase::Generating => "generating",
            Phase::Completed => "completed",
        }
    }
}

/// 생성/편집된 문서 내용
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentContent {
    /// 사용자가 에디터에서 편집 후 저장한 내용
    pub editor_content: Option<String>,
    pub word_count: Option<u64>,
    /// 섹션 제목 → 본문 (모델이 응답한 순서 유지)
    #[serde(default)]
    pub sections: Map<String, Value>,
    pub last_updated: Option<DateTime<Utc>>,
}

/// 대화 한 건의 전체 상태
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSession {
    pub id: String,
    pub title: String,
    /// 선택된 문서 종류 키 (예: "GuestLecture")
    pub document_type: Option<String>,
    /// 문서 종류의 필드 명세 (카탈로그에서 복사, 선언 순서 유지)
    pub fields: Vec<FieldSpec>,
    /// 필드 이름 → 입력값. 항상 `fields[..current_field_index()]`의 이름만 키로 가짐
    pub collected: BTreeMap<String, String>,
    pub phase: Phase,
    pub generated_content: Option<String>,
    pub content: DocumentContent,
    pub messages: Vec<ChatMessage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DocumentSession {
    /// 빈 세션을 만듭니다 (Idle 단계, 메시지 없음).
    pub fn new(id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            title: DEFAULT_TITLE.to_string(),
            document_type: None,
            fields: Vec::new(),
            collected: BTreeMap::new(),
            phase: Phase::Idle,
            generated_content: None,
            content: DocumentContent::default(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// 다음에 채울 필드의 인덱스
    ///
    /// Idle이면 0, 모든 필드를 받은 뒤(Ready/Generating/Completed)에는 필드 개수입니다.
    pub fn current_field_index(&self) -> usize {
        match self.phase {
            Phase::Idle => 0,
            Phase::AwaitingField { index, .. } => index,
            Phase::Ready | Phase::Generating | Phase::Completed => self.fields.len(),
        }
    }

    /// 지금 필드 답변을 받을 수 있는지 (지연 구간 중에는 false)
    pub fn awaiting_input(&self) -> bool {
        matches!(
            self.phase,
            Phase::AwaitingField {
                prompt_pending: false,
                ..
            }
        )
    }

    /// 답을 기다리는 필드 (Idle, Ready 이후에는 None)
    pub fn current_field(&self) -> Option<&FieldSpec> {
        match self.phase {
            Phase::AwaitingField { index, .. } => self.fields.get(index),
            _ => None,
        }
    }

    /// 메시지를 추가하고, 추가된 메시지의 가변 참조를 돌려줍니다.
    ///
    /// 버튼이나 입력 힌트를 붙일 때 반환값을 수정합니다.
    pub fn push_message(
        &mut self,
        sender: Sender,
        text: impl Into<String>,
        now: DateTime<Utc>,
    ) -> &mut ChatMessage {
        let id = self.messages.last().map(|m| m.id + 1).unwrap_or(1);
        self.messages.push(ChatMessage {
            id,
            sender,
            text: text.into(),
            timestamp: now,
            buttons: Vec::new(),
            images: Vec::new(),
            input: None,
        });
        self.updated_at = now;
        // 방금 push 했으므로 마지막 인덱스는 항상 유효합니다.
        let last = self.messages.len() - 1;
        &mut self.messages[last]
    }

    /// 생성 요청 본문. 문서 종류가 정해지지 않았으면 None입니다.
    ///
    /// 필드는 문서 종류에 정의된 순서대로 담습니다.
    /// `collected`는 이름순 `BTreeMap`이라 그대로 복사하면 순서가 바뀝니다.
    pub fn generation_request(&self) -> Option<GenerationRequest> {
        let document_type = self.document_type.clone()?;
        let fields = self
            .fields
            .iter()
            .filter_map(|spec| {
                let value = self.collected.get(&spec.name)?;
                Some((spec.name.clone(), Value::String(value.clone())))
            })
            .collect();
        Some(GenerationRequest {
            document_type,
            fields,
        })
    }
}

/// API 응답용 세션 뷰: 파생 값(현재 필드, 입력 가능 여부)을 함께 내려줍니다.
#[derive(Debug, Serialize)]
pub struct SessionView {
    // #[serde(flatten)]: 내부 구조체의 필드를 같은 JSON 객체에 펼쳐 넣습니다.
    #[serde(flatten)]
    pub session: DocumentSession,
    pub current_field_index: usize,
    pub awaiting_input: bool,
    pub current_field: Option<FieldSpec>,
}

impl From<DocumentSession> for SessionView {
    fn from(session: DocumentSession) -> Self {
        Self {
            current_field_index: session.current_field_index(),
            awaiting_input: session.awaiting_input(),
            current_field: session.current_field().cloned(),
            session,
        }
    }
}

// ── 저장 레코드 ──

/// 저장소에 보관되는 세션 레코드
///
/// `rename_all = "camelCase"`: `document_data` → `documentData`처럼 키 이름을 바꿉니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: String,
    pub messages: Vec<ChatMessage>,
    pub document_data: DocumentData,
    pub content: ContentRecord,
    pub last_updated: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub title: String,
}

/// 레코드의 `documentData` 부분: 상태 머신 진행 상황
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentData {
    #[serde(rename = "type")]
    pub doc_type: Option<String>,
    /// 답을 기다리는 필드 이름
    pub current_field: Option<String>,
    pub current_field_index: usize,
    /// `Phase::as_str()` 값
    pub state: String,
    #[serde(default)]
    pub prompt_pending: bool,
    /// 수집된 필드 값
    pub fields: BTreeMap<String, String>,
}

/// 레코드의 `content` 부분
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentRecord {
    pub editor_content: Option<String>,
    /// 생성된 문서 내용
    pub preview_content: Option<String>,
    pub word_count: Option<u64>,
    #[serde(default)]
    pub sections: Map<String, Value>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl From<&DocumentSession> for SessionRecord {
    fn from(session: &DocumentSession) -> Self {
        Self {
            id: session.id.clone(),
            messages: session.messages.clone(),
            document_data: DocumentData {
                doc_type: session.document_type.clone(),
                current_field: session.current_field().map(|f| f.name.clone()),
                current_field_index: session.current_field_index(),
                state: session.phase.as_str().to_string(),
                prompt_pending: matches!(
                    session.phase,
                    Phase::AwaitingField {
                        prompt_pending: true,
                        ..
                    }
                ),
                fields: session.collected.clone(),
            },
            content: ContentRecord {
                editor_content: session.content.editor_content.clone(),
                preview_content: session.generated_content.clone(),
                word_count: session.content.word_count,
                sections: session.content.sections.clone(),
                last_updated: session.content.last_updated,
            },
            last_updated: session.updated_at,
            created_at: session.created_at,
            title: session.title.clone(),
        }
    }
}

impl SessionRecord {
    /// 레코드를 메모리 세션으로 되돌립니다.
    ///
    /// `fields`는 호출하는 쪽이 `document_data.doc_type`으로 카탈로그에서 찾아 넘깁니다.
    /// 복원 규칙:
    /// - `generating` → `Ready` (재시작 후에는 살아 있는 스트림이 없음)
    /// - 필드 명세를 찾지 못하면 → `Idle` (수집값도 버림)
    /// - 인덱스가 필드 범위를 벗어나면 → `Ready`
    pub fn into_session(self, fields: Vec<FieldSpec>) -> DocumentSession {
        let data = self.document_data;
        let mut collected = data.fields;
        let mut document_type = data.doc_type;

        let phase = if fields.is_empty() {
            if document_type.is_some() || !collected.is_empty() {
                tracing::warn!(
                    "Session {} refers to an unknown document type, restoring as idle",
                    self.id
                );
            }
            document_type = None;
            collected.clear();
            Phase::Idle
        } else {
            match data.state.as_str() {
                "awaiting_field" if data.current_field_index < fields.len() => {
                    Phase::AwaitingField {
                        index: data.current_field_index,
                        prompt_pending: data.prompt_pending,
                    }
                }
                "awaiting_field" | "ready" | "generating" => Phase::Ready,
                "completed" => Phase::Completed,
                _ => Phase::Idle,
            }
        };

        // 불변식 유지: 현재 인덱스 이전 필드의 값만 남깁니다.
        let filled = match phase {
            Phase::Idle => 0,
            Phase::AwaitingField { index, .. } => index,
            _ => fields.len(),
        };
        let allowed: Vec<&str> = fields[..filled].iter().map(|f| f.name.as_str()).collect();
        collected.retain(|name, _| allowed.contains(&name.as_str()));

        let fields = if phase == Phase::Idle { Vec::new() } else { fields };

        DocumentSession {
            id: self.id,
            title: self.title,
            document_type,
            fields,
            collected,
            phase,
            generated_content: self.content.preview_content,
            content: DocumentContent {
                editor_content: self.content.editor_content,
                word_count: self.content.word_count,
                sections: self.content.sections,
                last_updated: self.content.last_updated,
            },
            messages: self.messages,
            created_at: self.created_at,
            updated_at: self.last_updated,
        }
    }

    /// DB 정렬 컬럼에 쓰는 고정 폭 타임스탬프 (밀리초, `Z` 접미사)
    pub fn sort_key(&self) -> String {
        self.last_updated.to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

/// 세션 목록 항목: DB의 `chat_sessions` 한 행에 대응합니다.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SessionSummary {
    pub id: String,
    pub title: String,
    pub document_type: Option<String>,
    pub updated_at: String,
}

/// 채팅 입력 요청: `POST /api/v1/chats/{id}/messages`
#[derive(Debug, Deserialize)]
pub struct ChatInputRequest {
    pub text: String,
}

/// 편집 내용 저장 요청: `PUT /api/v1/chats/{id}/content`
#[derive(Debug, Deserialize)]
pub struct SaveContentRequest {
    pub editor_content: String,
}
