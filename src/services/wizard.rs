//! # 필드 수집 상태 머신 (Reducer)
//!
//! 대화의 모든 규칙이 여기에 있습니다. 핵심 함수는 하나입니다:
//!
//! ```text
//! reduce(session, event, now) -> (session, effects)
//! ```
//!
//! - **순수 함수**: I/O가 없습니다. DB 저장, 타이머, 생성 스트림은 모두
//!   `Effect` 값으로 "요청"만 하고, 실제 실행은 `conversation` 서비스가 합니다.
//! - 세션을 값으로 받아서 새 값으로 돌려줍니다 (소유권 이동).
//! - 현재 시각도 인자로 받으므로 테스트에서 시간을 마음대로 정할 수 있습니다.
//!
//! ## 지연 구간 (pacing window)
//! 답변을 받으면 바로 다음 질문을 보이지 않고 `SchedulePrompt` 효과를 냅니다.
//! 타이머가 끝나면 `PromptDue` 이벤트가 들어와서 질문이 추가됩니다.
//! 그 사이에 들어오는 답변은 무시하므로 필드 인덱스가 두 번 증가하지 않습니다.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::models::{
    DocumentSession, FieldSpec, GenerationOutcome, GenerationRequest, InputMode, Phase, Sender,
    DEFAULT_TITLE,
};
use crate::services::catalog::{DocumentCatalog, DocumentChoice};

/// 상태 머신에 들어오는 이벤트
#[derive(Debug, Clone, PartialEq)]
pub enum WizardEvent {
    /// 채팅창에 입력된 글 (명령어 해석 후 아래 이벤트로 분기)
    UserInput(String),
    /// 메뉴에서 문서 종류 선택
    SelectDocumentType(String),
    /// 현재 필드에 대한 답변
    SubmitAnswer(String),
    /// 지연 타이머 만료: `field_index`번 질문을 보여줄 차례
    PromptDue { field_index: usize },
    /// 처음부터 다시
    Reset,
    /// 수동으로 생성 다시 시도
    RetryGeneration,
    /// 생성 스트림이 끝남
    GenerationFinished(GenerationOutcome),
}

/// reducer가 요청하는 부수 효과
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// 세션을 저장소에 저장
    Persist,
    /// `delay` 후에 `PromptDue { field_index }`를 보내 달라
    SchedulePrompt { field_index: usize, delay: Duration },
    /// 생성 스트림 시작
    StartGeneration(GenerationRequest),
    /// 진행 중인 생성 스트림 취소
    CancelGeneration,
}

/// 채팅 명령어
const RESET_COMMANDS: [&str; 2] = ["clear", "reset"];
const RETRY_COMMANDS: [&str; 2] = ["retry", "generate"];

/// 상태 머신: 카탈로그와 지연 시간만 들고 있는 불변 값입니다.
#[derive(Debug, Clone)]
pub struct Wizard {
    catalog: Arc<DocumentCatalog>,
    prompt_delay: Duration,
}

impl Wizard {
    pub fn new(catalog: Arc<DocumentCatalog>, prompt_delay: Duration) -> Self {
        Self {
            catalog,
            prompt_delay,
        }
    }

    pub fn catalog(&self) -> &DocumentCatalog {
        &self.catalog
    }

    /// 새 세션에 환영 메시지와 메뉴를 추가합니다.
    pub fn welcome(&self, mut session: DocumentSession, now: DateTime<Utc>) -> DocumentSession {
        self.push_menu(
            &mut session,
            "Hello! I can help you create various types of documents. Please select from the following options:",
            now,
        );
        session
    }

    /// 이벤트 하나를 처리합니다.
    ///
    /// 무시된 이벤트는 세션을 그대로 돌려주고 효과도 비어 있습니다.
    pub fn reduce(
        &self,
        mut session: DocumentSession,
        event: WizardEvent,
        now: DateTime<Utc>,
    ) -> (DocumentSession, Vec<Effect>) {
        let mut effects = Vec::new();

        match event {
            WizardEvent::UserInput(text) => self.on_input(&mut session, &text, now, &mut effects),
            WizardEvent::SelectDocumentType(choice) => {
                if let Some(choice) = accept_user_text(&mut session, &choice, now) {
                    self.on_select(&mut session, &choice, now, &mut effects);
                }
            }
            WizardEvent::SubmitAnswer(raw) => {
                if let Some(raw) = accept_user_text(&mut session, &raw, now) {
                    self.on_answer(&mut session, &raw, now, &mut effects);
                }
            }
            WizardEvent::PromptDue { field_index } => {
                self.on_prompt_due(&mut session, field_index, now, &mut effects)
            }
            WizardEvent::Reset => self.on_reset(&mut session, now, &mut effects),
            WizardEvent::RetryGeneration => self.on_retry(&mut session, now, &mut effects),
            WizardEvent::GenerationFinished(outcome) => {
                self.on_finished(&mut session, outcome, now, &mut effects)
            }
        }

        (session, effects)
    }

    /// 채팅 입력 → 명령어 또는 현재 단계에 맞는 이벤트
    fn on_input(
        &self,
        session: &mut DocumentSession,
        text: &str,
        now: DateTime<Utc>,
        effects: &mut Vec<Effect>,
    ) {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return;
        }

        // 초기화 명령은 지연 구간 중에도 받습니다.
        let command = trimmed.to_lowercase();
        if RESET_COMMANDS.contains(&command.as_str()) {
            session.push_message(Sender::User, trimmed, now);
            self.on_reset(session, now, effects);
            return;
        }

        let Some(text) = accept_user_text(session, trimmed, now) else {
            return;
        };

        // retry/generate는 모든 필드가 모인 뒤에만 명령어입니다.
        // 그 전에는 메뉴 선택이나 필드 답변으로 그대로 처리합니다.
        let collected = matches!(
            session.phase,
            Phase::Ready | Phase::Generating | Phase::Completed
        );
        if collected && RETRY_COMMANDS.contains(&command.as_str()) {
            self.on_retry(session, now, effects);
            return;
        }

        match session.phase {
            Phase::Idle => self.on_select(session, &text, now, effects),
            Phase::AwaitingField { .. } => self.on_answer(session, &text, now, effects),
            Phase::Ready => {
                session.push_message(
                    Sender::Bot,
                    "All details are collected. Type \"retry\" to generate the document, or \"reset\" to start over.",
                    now,
                );
                effects.push(Effect::Persist);
            }
            Phase::Generating => {
                session.push_message(
                    Sender::Bot,
                    "Your document is being generated. Please wait...",
                    now,
                );
                effects.push(Effect::Persist);
            }
            Phase::Completed => {
                session.push_message(
                    Sender::Bot,
                    "Your document is ready in the editor. Type \"retry\" to generate it again, or \"reset\" to start a new document.",
                    now,
                );
                effects.push(Effect::Persist);
            }
        }
    }

    fn on_select(
        &self,
        session: &mut DocumentSession,
        choice: &str,
        now: DateTime<Utc>,
        effects: &mut Vec<Effect>,
    ) {
        if session.phase != Phase::Idle {
            session.push_message(
                Sender::Bot,
                "A document is already in progress. Type \"reset\" to start over.",
                now,
            );
            effects.push(Effect::Persist);
            return;
        }

        match self.catalog.resolve(choice) {
            DocumentChoice::Available(doc_type) => {
                session.document_type = Some(doc_type.key.clone());
                session.fields = doc_type.fields.clone();
                session.collected.clear();
                session.generated_content = None;
                session.phase = Phase::AwaitingField {
                    index: 0,
                    prompt_pending: false,
                };
                if session.title == DEFAULT_TITLE {
                    session.title = doc_type.display_name.clone();
                }

                session.push_message(
                    Sender::Bot,
                    format!(
                        "Great! Let's create a {} document. I'll need some information from you.",
                        doc_type.display_name
                    ),
                    now,
                );
                // 첫 질문은 지연 없이 바로 보여줍니다.
                push_prompt(session, 0, now);
            }
            DocumentChoice::InDevelopment(doc_type) => {
                let intro = format!(
                    "{} document generation is currently in development. Please select another option:",
                    doc_type.display_name
                );
                self.push_menu(session, &intro, now);
            }
            DocumentChoice::Unknown => {
                session.push_message(
                    Sender::Bot,
                    format!(
                        "I didn't understand that. Please select a number from 1-{} or type the document name.",
                        self.catalog.last_menu_number()
                    ),
                    now,
                );
            }
        }
        effects.push(Effect::Persist);
    }

    fn on_answer(
        &self,
        session: &mut DocumentSession,
        raw: &str,
        now: DateTime<Utc>,
        effects: &mut Vec<Effect>,
    ) {
        let Phase::AwaitingField {
            index,
            prompt_pending: false,
        } = session.phase
        else {
            return;
        };
        // 인덱스는 항상 필드 범위 안에 있지만, 만약을 위해 Option으로 다룹니다.
        let Some(field) = session.fields.get(index).cloned() else {
            session.phase = Phase::Ready;
            effects.push(Effect::Persist);
            return;
        };

        if let Err(err) = field.validate(raw) {
            session.push_message(Sender::Bot, err.message, now);
            effects.push(Effect::Persist);
            return;
        }

        session.collected.insert(field.name.clone(), raw.to_string());
        let next = index + 1;

        if next < session.fields.len() {
            session.phase = Phase::AwaitingField {
                index: next,
                prompt_pending: true,
            };
            effects.push(Effect::Persist);
            effects.push(Effect::SchedulePrompt {
                field_index: next,
                delay: self.prompt_delay,
            });
            return;
        }

        // 마지막 필드 → Ready를 거쳐 바로 생성 시작
        session.phase = Phase::Ready;
        session.push_message(
            Sender::Bot,
            format!(
                "Thank you! I have all the information I need. Generating your {} document...",
                self.display_name(session)
            ),
            now,
        );
        self.start_generation(session, effects);
    }

    fn on_prompt_due(
        &self,
        session: &mut DocumentSession,
        field_index: usize,
        now: DateTime<Utc>,
        effects: &mut Vec<Effect>,
    ) {
        // 초기화되었거나 이미 질문을 보인 뒤 도착한 타이머는 무시합니다.
        let due = session.phase
            == Phase::AwaitingField {
                index: field_index,
                prompt_pending: true,
            };
        if !due {
            tracing::debug!(
                "Ignoring stale prompt timer for field {} in session {}",
                field_index,
                session.id
            );
            return;
        }

        session.phase = Phase::AwaitingField {
            index: field_index,
            prompt_pending: false,
        };
        push_prompt(session, field_index, now);
        effects.push(Effect::Persist);
    }

    fn on_reset(&self, session: &mut DocumentSession, now: DateTime<Utc>, effects: &mut Vec<Effect>) {
        if session.phase == Phase::Generating {
            effects.push(Effect::CancelGeneration);
        }

        session.document_type = None;
        session.fields.clear();
        session.collected.clear();
        session.generated_content = None;
        session.phase = Phase::Idle;

        self.push_menu(
            session,
            "Let's start over. Please select the type of document you want to create:",
            now,
        );
        effects.push(Effect::Persist);
    }

    fn on_retry(&self, session: &mut DocumentSession, now: DateTime<Utc>, effects: &mut Vec<Effect>) {
        match session.phase {
            Phase::Ready | Phase::Completed => {
                session.push_message(
                    Sender::Bot,
                    format!("Generating your {} document again...", self.display_name(session)),
                    now,
                );
                self.start_generation(session, effects);
            }
            Phase::Generating => {
                session.push_message(
                    Sender::Bot,
                    "Your document is already being generated. Please wait...",
                    now,
                );
                effects.push(Effect::Persist);
            }
            Phase::Idle | Phase::AwaitingField { .. } => {
                session.push_message(
                    Sender::Bot,
                    "There is nothing to generate yet. Please answer the remaining questions first.",
                    now,
                );
                effects.push(Effect::Persist);
            }
        }
    }

    fn on_finished(
        &self,
        session: &mut DocumentSession,
        outcome: GenerationOutcome,
        now: DateTime<Utc>,
        effects: &mut Vec<Effect>,
    ) {
        if session.phase != Phase::Generating {
            tracing::debug!(
                "Ignoring generation result for session {} in phase {}",
                session.id,
                session.phase.as_str()
            );
            return;
        }

        match outcome {
            GenerationOutcome::Completed {
                content,
                word_count,
                sections,
            } => {
                session.generated_content = Some(content);
                // 새로 생성된 내용이 이전 편집본을 대체합니다.
                session.content.editor_content = None;
                session.content.word_count = Some(word_count);
                session.content.sections = sections;
                session.content.last_updated = Some(now);
                session.phase = Phase::Completed;
                session.push_message(
                    Sender::Bot,
                    format!(
                        "Your document has been generated successfully ({word_count} words). You can review and edit it in the editor."
                    ),
                    now,
                );
            }
            GenerationOutcome::Failed { message } => {
                session.phase = Phase::Ready;
                session.push_message(
                    Sender::Bot,
                    format!(
                        "Sorry, there was an error generating the document: {message}. Type \"retry\" to try again."
                    ),
                    now,
                );
            }
        }
        effects.push(Effect::Persist);
    }

    fn start_generation(&self, session: &mut DocumentSession, effects: &mut Vec<Effect>) {
        match session.generation_request() {
            Some(request) => {
                session.phase = Phase::Generating;
                effects.push(Effect::Persist);
                effects.push(Effect::StartGeneration(request));
            }
            None => {
                session.phase = Phase::Idle;
                effects.push(Effect::Persist);
            }
        }
    }

    fn display_name(&self, session: &DocumentSession) -> String {
        let key = session.document_type.as_deref().unwrap_or_default();
        self.catalog
            .get(key)
            .map(|t| t.display_name.clone())
            .unwrap_or_else(|| key.to_string())
    }

    /// 안내 문구 + 번호 메뉴 + 메뉴 버튼
    fn push_menu(&self, session: &mut DocumentSession, intro: &str, now: DateTime<Utc>) {
        let labels = self.catalog.menu_labels();
        let text = format!("{intro}\n\n{}", labels.join("\n"));
        let message = session.push_message(Sender::Bot, text, now);
        message.buttons = self
            .catalog
            .types()
            .iter()
            .map(|t| t.display_name.clone())
            .collect();
    }
}

/// 사용자 글을 받아들일 수 있으면 대화에 추가하고 다듬은 값을 돌려줍니다.
///
/// 빈 입력이거나 지연 구간이면 None: 아무 것도 추가하지 않습니다.
fn accept_user_text(session: &mut DocumentSession, text: &str, now: DateTime<Utc>) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Phase::AwaitingField {
        prompt_pending: true,
        ..
    } = session.phase
    {
        tracing::debug!("Ignoring input during pacing window in session {}", session.id);
        return None;
    }
    session.push_message(Sender::User, trimmed, now);
    Some(trimmed.to_string())
}

/// `index`번 필드의 질문을 추가합니다. 선택형 필드는 버튼과 입력기 힌트를 붙입니다.
fn push_prompt(session: &mut DocumentSession, index: usize, now: DateTime<Utc>) {
    let Some(field) = session.fields.get(index).cloned() else {
        return;
    };
    let FieldSpec { prompt, input, .. } = field;
    let buttons = match &input {
        InputMode::SingleSelect { options } => options.clone(),
        _ => Vec::new(),
    };

    let message = session.push_message(Sender::Bot, prompt, now);
    message.buttons = buttons;
    if input != InputMode::FreeText {
        message.input = Some(input);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    const GUEST_ANSWERS: [&str; 9] = [
        "Dr. Jane Smith",
        "Professor",
        "Machine Learning in Practice",
        "2026-11-20",
        "GL-204",
        "Third Year",
        "120",
        "CSE",
        "Dr. Ravi Kumar",
    ];

    fn wizard() -> Wizard {
        Wizard::new(
            Arc::new(DocumentCatalog::builtin()),
            Duration::from_millis(1000),
        )
    }

    fn fresh(wizard: &Wizard) -> DocumentSession {
        wizard.welcome(DocumentSession::new("chat_000001", Utc::now()), Utc::now())
    }

    fn step(wizard: &Wizard, session: DocumentSession, event: WizardEvent) -> (DocumentSession, Vec<Effect>) {
        wizard.reduce(session, event, Utc::now())
    }

    /// 답변을 보내고, 예약된 질문이 있으면 타이머를 바로 만료시킵니다.
    fn answer(wizard: &Wizard, session: DocumentSession, text: &str) -> (DocumentSession, Vec<Effect>) {
        let (mut session, effects) = step(wizard, session, WizardEvent::UserInput(text.to_string()));
        for effect in &effects {
            if let Effect::SchedulePrompt { field_index, .. } = effect {
                let (next, _) = step(
                    wizard,
                    session,
                    WizardEvent::PromptDue {
                        field_index: *field_index,
                    },
                );
                session = next;
            }
        }
        (session, effects)
    }

    fn last_bot_text(session: &DocumentSession) -> &str {
        session
            .messages
            .iter()
            .rev()
            .find(|m| m.sender == Sender::Bot)
            .map(|m| m.text.as_str())
            .unwrap_or_default()
    }

    fn start_guest_lecture(wizard: &Wizard) -> DocumentSession {
        let (session, _) = step(wizard, fresh(wizard), WizardEvent::UserInput("11".to_string()));
        session
    }

    #[test]
    fn welcome_lists_the_menu() {
        let wizard = wizard();
        let session = fresh(&wizard);
        assert_eq!(session.messages.len(), 1);
        assert!(session.messages[0].text.contains("11. Guest Lecture"));
        assert_eq!(session.messages[0].buttons.len(), 11);
    }

    #[test]
    fn selecting_guest_lecture_prompts_first_field() {
        let wizard = wizard();
        let session = start_guest_lecture(&wizard);
        assert_eq!(session.document_type.as_deref(), Some("GuestLecture"));
        assert_eq!(session.title, "Guest Lecture");
        assert!(session.awaiting_input());
        assert_eq!(session.current_field().map(|f| f.name.as_str()), Some("Guest Name"));
        assert_eq!(last_bot_text(&session), "Please enter the guest's name:");
    }

    #[test]
    fn unknown_type_asks_for_clarification() {
        let wizard = wizard();
        let (session, effects) = step(&wizard, fresh(&wizard), WizardEvent::SelectDocumentType("lab report".to_string()));
        assert_eq!(session.phase, Phase::Idle);
        assert!(last_bot_text(&session).starts_with("I didn't understand that."));
        assert!(last_bot_text(&session).contains("1-11"));
        assert_eq!(effects, vec![Effect::Persist]);
    }

    #[test]
    fn pending_type_is_reported_in_development() {
        let wizard = wizard();
        let (session, _) = step(&wizard, fresh(&wizard), WizardEvent::UserInput("1".to_string()));
        assert_eq!(session.phase, Phase::Idle);
        assert!(last_bot_text(&session).contains("currently in development"));
        assert!(last_bot_text(&session).contains("11. Guest Lecture"));
    }

    #[test]
    fn short_topic_is_rejected_without_advancing() {
        let wizard = wizard();
        let session = start_guest_lecture(&wizard);
        let (session, _) = answer(&wizard, session, "Dr. Jane Smith");
        let (session, _) = answer(&wizard, session, "Professor");
        let topic_index = session.current_field_index();
        assert_eq!(session.current_field().map(|f| f.name.as_str()), Some("Topic"));

        let before = session.collected.clone();
        let (session, effects) = answer(&wizard, session, "AI");

        assert_eq!(session.current_field_index(), topic_index);
        assert_eq!(session.collected, before);
        assert!(session.awaiting_input());
        assert_eq!(last_bot_text(&session), "Topic must be at least 5 characters long.");
        assert!(!effects.iter().any(|e| matches!(e, Effect::SchedulePrompt { .. })));
    }

    #[test]
    fn invalid_count_never_mutates_collected() {
        let wizard = wizard();
        let mut session = start_guest_lecture(&wizard);
        for value in &GUEST_ANSWERS[..6] {
            session = answer(&wizard, session, value).0;
        }
        assert_eq!(session.current_field().map(|f| f.name.as_str()), Some("No Of Count"));

        for bad in ["about 100", "12a", "-3"] {
            let before = (session.collected.clone(), session.current_field_index());
            session = answer(&wizard, session, bad).0;
            assert_eq!((session.collected.clone(), session.current_field_index()), before);
        }
    }

    #[test]
    fn completing_all_fields_starts_generation_once() {
        let wizard = wizard();
        let mut session = start_guest_lecture(&wizard);
        let mut starts = 0;
        for value in GUEST_ANSWERS {
            let (next, effects) = answer(&wizard, session, value);
            starts += effects
                .iter()
                .filter(|e| matches!(e, Effect::StartGeneration(_)))
                .count();
            session = next;
        }

        assert_eq!(starts, 1);
        assert_eq!(session.phase, Phase::Generating);
        assert_eq!(session.collected.len(), 9);
        assert_eq!(session.current_field_index(), 9);
        assert_eq!(session.collected["Year"], "Third Year");
    }

    #[test]
    fn fields_are_collected_in_declared_order() {
        let wizard = wizard();
        let declared: Vec<String> = wizard
            .catalog()
            .fields_for(Some("GuestLecture"))
            .into_iter()
            .map(|f| f.name)
            .collect();

        let mut session = start_guest_lecture(&wizard);
        for (i, value) in GUEST_ANSWERS.iter().enumerate() {
            session = answer(&wizard, session, value).0;
            // 수집된 키는 항상 선언 순서의 앞부분과 같아야 합니다.
            let mut expected: Vec<&String> = declared[..=i].iter().collect();
            expected.sort();
            let keys: Vec<&String> = session.collected.keys().collect();
            assert_eq!(keys, expected);
        }
    }

    #[test]
    fn input_during_pacing_window_is_ignored() {
        let wizard = wizard();
        let session = start_guest_lecture(&wizard);
        let (session, effects) = step(&wizard, session, WizardEvent::UserInput("Dr. Jane Smith".to_string()));
        assert_eq!(
            effects,
            vec![
                Effect::Persist,
                Effect::SchedulePrompt {
                    field_index: 1,
                    delay: Duration::from_millis(1000)
                }
            ]
        );
        assert!(!session.awaiting_input());

        let message_count = session.messages.len();
        let (session, effects) = step(&wizard, session, WizardEvent::UserInput("Professor".to_string()));
        assert!(effects.is_empty());
        assert_eq!(session.messages.len(), message_count);
        assert_eq!(session.current_field_index(), 1);
        assert!(!session.collected.contains_key("Guest Designation"));

        let (session, _) = step(&wizard, session, WizardEvent::PromptDue { field_index: 1 });
        assert!(session.awaiting_input());
        assert_eq!(last_bot_text(&session), "Please enter the guest's designation:");
    }

    #[test]
    fn stale_prompt_timer_is_ignored() {
        let wizard = wizard();
        let session = start_guest_lecture(&wizard);
        let (session, _) = step(&wizard, session, WizardEvent::UserInput("Dr. Jane Smith".to_string()));
        let (session, _) = step(&wizard, session, WizardEvent::Reset);
        let before = session.clone();

        let (session, effects) = step(&wizard, session, WizardEvent::PromptDue { field_index: 1 });
        assert!(effects.is_empty());
        assert_eq!(session, before);
    }

    #[test]
    fn select_prompt_carries_option_buttons() {
        let wizard = wizard();
        let mut session = start_guest_lecture(&wizard);
        for value in &GUEST_ANSWERS[..5] {
            session = answer(&wizard, session, value).0;
        }
        let prompt = session.messages.last().unwrap();
        assert_eq!(prompt.buttons, vec!["First Year", "Second Year", "Third Year", "Fourth Year"]);
        assert!(matches!(prompt.input, Some(InputMode::SingleSelect { .. })));

        // 날짜 필드 질문에는 날짜 선택기 힌트가 붙습니다.
        let date_prompt = session
            .messages
            .iter()
            .find(|m| m.text == "Please select the event date:")
            .unwrap();
        assert_eq!(date_prompt.input, Some(InputMode::DatePicker));
    }

    #[test]
    fn reset_command_discards_progress() {
        let wizard = wizard();
        let session = start_guest_lecture(&wizard);
        let (session, _) = answer(&wizard, session, "Dr. Jane Smith");
        let (session, effects) = step(&wizard, session, WizardEvent::UserInput("CLEAR".to_string()));

        assert_eq!(session.phase, Phase::Idle);
        assert!(session.collected.is_empty());
        assert!(session.document_type.is_none());
        assert!(last_bot_text(&session).contains("1. Minutes of Department Meeting"));
        assert_eq!(effects, vec![Effect::Persist]);
    }

    #[test]
    fn reset_while_generating_cancels_stream() {
        let wizard = wizard();
        let mut session = start_guest_lecture(&wizard);
        for value in GUEST_ANSWERS {
            session = answer(&wizard, session, value).0;
        }
        let (session, effects) = step(&wizard, session, WizardEvent::Reset);
        assert_eq!(effects[0], Effect::CancelGeneration);
        assert_eq!(session.phase, Phase::Idle);
    }

    fn generating_session(wizard: &Wizard) -> DocumentSession {
        let mut session = start_guest_lecture(wizard);
        for value in GUEST_ANSWERS {
            session = answer(wizard, session, value).0;
        }
        session
    }

    #[test]
    fn completed_generation_stores_content() {
        let wizard = wizard();
        let session = generating_session(&wizard);
        let outcome = GenerationOutcome::Completed {
            content: "Hello World".to_string(),
            word_count: 2,
            sections: Map::new(),
        };
        let (session, effects) = step(&wizard, session, WizardEvent::GenerationFinished(outcome));

        assert_eq!(session.phase, Phase::Completed);
        assert_eq!(session.generated_content.as_deref(), Some("Hello World"));
        assert_eq!(session.content.word_count, Some(2));
        assert!(last_bot_text(&session).contains("generated successfully"));
        assert_eq!(effects, vec![Effect::Persist]);
    }

    #[test]
    fn failed_generation_returns_to_ready_and_allows_retry() {
        let wizard = wizard();
        let session = generating_session(&wizard);
        let outcome = GenerationOutcome::Failed {
            message: "AI API error".to_string(),
        };
        let (session, _) = step(&wizard, session, WizardEvent::GenerationFinished(outcome));

        assert_eq!(session.phase, Phase::Ready);
        assert!(session.generated_content.is_none());
        assert!(last_bot_text(&session).contains("AI API error"));

        let (session, effects) = step(&wizard, session, WizardEvent::UserInput("retry".to_string()));
        assert_eq!(session.phase, Phase::Generating);
        let request = effects.iter().find_map(|e| match e {
            Effect::StartGeneration(request) => Some(request),
            _ => None,
        });
        assert_eq!(request.map(|r| r.document_type.as_str()), Some("GuestLecture"));
    }

    #[test]
    fn result_outside_generating_is_ignored() {
        let wizard = wizard();
        let session = start_guest_lecture(&wizard);
        let before = session.clone();
        let outcome = GenerationOutcome::Failed {
            message: "late".to_string(),
        };
        let (session, effects) = step(&wizard, session, WizardEvent::GenerationFinished(outcome));
        assert!(effects.is_empty());
        assert_eq!(session, before);
    }

    #[test]
    fn command_words_are_plain_answers_while_collecting() {
        let wizard = wizard();
        let session = start_guest_lecture(&wizard);
        let (session, _) = answer(&wizard, session, "Dr. Jane Smith");
        assert_eq!(
            session.current_field().map(|f| f.name.as_str()),
            Some("Guest Designation")
        );

        let (session, effects) = answer(&wizard, session, "Generate");

        assert_eq!(
            session.collected.get("Guest Designation").map(String::as_str),
            Some("Generate")
        );
        assert!(!effects.iter().any(|e| matches!(e, Effect::StartGeneration(_))));
        assert!(effects.iter().any(|e| matches!(e, Effect::SchedulePrompt { .. })));
    }

    #[test]
    fn retry_before_collection_is_refused() {
        let wizard = wizard();
        let (session, effects) = step(&wizard, fresh(&wizard), WizardEvent::RetryGeneration);
        assert_eq!(session.phase, Phase::Idle);
        assert!(!effects.iter().any(|e| matches!(e, Effect::StartGeneration(_))));
    }

    #[test]
    fn empty_input_is_ignored() {
        let wizard = wizard();
        let session = fresh(&wizard);
        let before = session.clone();
        let (session, effects) = step(&wizard, session, WizardEvent::UserInput("   ".to_string()));
        assert!(effects.is_empty());
        assert_eq!(session, before);
    }
}
