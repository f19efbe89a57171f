//! # 대화 서비스 (Conversation Service)
//!
//! 메모리 안의 세션들을 소유하고, 상태 머신(`wizard`)을 돌리고,
//! 상태 머신이 요청한 효과(저장, 타이머, 생성 스트림)를 실행합니다.
//!
//! ## 액터(Actor) 패턴
//! ```text
//! HTTP 핸들러 ──Command + oneshot──► [액터 태스크] ──► 응답
//! 타이머 태스크 ──PromptDue────────►      │
//! 생성 태스크  ──GenerationDone────►      │
//! ```
//! 세션 상태를 바꾸는 것은 액터 태스크 하나뿐입니다. 명령은 채널에 들어온 순서대로
//! 하나씩 끝까지 처리되므로, 같은 세션의 두 전이가 섞이지 않고 락도 필요 없습니다.
//!
//! ## 생성 실행 번호 (run id)
//! 생성을 시작할 때마다 번호를 붙입니다. 초기화나 재시도로 새 실행이 시작된 뒤
//! 예전 실행의 결과가 늦게 도착하면 번호가 달라서 버려집니다.
//!
//! ## 저장 실패
//! 저장소 쓰기 실패(용량 초과 등)는 경고 로그만 남깁니다.
//! 메모리 안의 세션이 계속 기준이 되며 대화는 멈추지 않습니다.
//!
//! ## 메모리에서 내보내기
//! 명령을 하나 처리할 때마다 그 세션이 쉬는 중인지 봅니다.
//! 생성 중도 아니고, 질문 타이머도 없고, 마지막 변경이 저장되어 있으면
//! 메모리에서 내보냅니다. 다음 요청 때 저장소에서 다시 불러옵니다.
//! 그래서 메모리에는 실제로 움직이는 세션만 남습니다.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use sqlx::SqlitePool;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::db;
use crate::error::AppError;
use crate::models::{
    DocumentSession, GenerationOutcome, Phase, SessionRecord, SessionSummary, SessionView,
};
use crate::services::generation::{run_generation, Generator};
use crate::services::report::count_words;
use crate::services::wizard::{Effect, Wizard, WizardEvent};

/// 명령 채널 버퍼 크기
const COMMAND_CAPACITY: usize = 256;

/// 세션 ID 생성기
pub type IdSource = Box<dyn FnMut() -> String + Send + Sync>;

type Reply<T> = oneshot::Sender<Result<T, AppError>>;

/// 액터가 처리하는 명령
enum Command {
    Create {
        reply: Reply<SessionView>,
    },
    Load {
        id: String,
        reply: Reply<SessionView>,
    },
    List {
        reply: Reply<Vec<SessionSummary>>,
    },
    Delete {
        id: String,
        reply: Reply<()>,
    },
    Dispatch {
        id: String,
        event: WizardEvent,
        reply: Reply<SessionView>,
    },
    Partial {
        id: String,
        reply: Reply<PartialContent>,
    },
    SaveContent {
        id: String,
        editor_content: String,
        reply: Reply<SessionView>,
    },
    // ── 내부 명령 (타이머/생성 태스크가 보냄) ──
    PromptDue {
        id: String,
        field_index: usize,
    },
    GenerationDone {
        id: String,
        run_id: u64,
        outcome: GenerationOutcome,
    },
    #[cfg(test)]
    LiveCount {
        reply: Reply<usize>,
    },
}

/// 생성 중인 문서의 부분 내용
#[derive(Debug, Clone, Serialize)]
pub struct PartialContent {
    pub id: String,
    pub state: &'static str,
    pub generating: bool,
    /// 지금까지 받은 토큰을 이어 붙인 내용 (생성 중이 아니면 마지막 값 또는 빈 문자열)
    pub content: String,
}

/// 대화 서비스 핸들
///
/// `Clone`: 내부는 채널 송신자뿐이므로 복제 비용이 작습니다. AppState에 넣어 공유합니다.
#[derive(Clone)]
pub struct ConversationService {
    commands: mpsc::Sender<Command>,
}

impl ConversationService {
    /// 액터 태스크를 띄우고 핸들을 돌려줍니다.
    pub fn spawn(
        pool: SqlitePool,
        wizard: Wizard,
        generator: Arc<dyn Generator>,
        capacity: i64,
    ) -> Self {
        Self::spawn_with_ids(
            pool,
            wizard,
            generator,
            capacity,
            Box::new(db::random_session_id),
        )
    }

    /// ID 생성기를 지정해서 띄웁니다.
    pub fn spawn_with_ids(
        pool: SqlitePool,
        wizard: Wizard,
        generator: Arc<dyn Generator>,
        capacity: i64,
        next_id: IdSource,
    ) -> Self {
        let (tx, rx) = mpsc::channel(COMMAND_CAPACITY);
        let actor = Actor {
            pool,
            capacity,
            wizard,
            generator,
            // 약한 송신자: 핸들이 모두 사라지면 액터도 끝나도록 합니다.
            commands: tx.downgrade(),
            sessions: HashMap::new(),
            next_run: 0,
            next_id,
        };
        tokio::spawn(actor.run(rx));
        Self { commands: tx }
    }

    /// 새 세션을 만들고 환영 메시지를 넣습니다.
    pub async fn create(&self) -> Result<SessionView, AppError> {
        self.request(|reply| Command::Create { reply }).await
    }

    pub async fn load(&self, id: &str) -> Result<SessionView, AppError> {
        let id = id.to_string();
        self.request(|reply| Command::Load { id, reply }).await
    }

    pub async fn list(&self) -> Result<Vec<SessionSummary>, AppError> {
        self.request(|reply| Command::List { reply }).await
    }

    /// 세션을 지웁니다. 진행 중인 생성도 취소됩니다.
    pub async fn delete(&self, id: &str) -> Result<(), AppError> {
        let id = id.to_string();
        self.request(|reply| Command::Delete { id, reply }).await
    }

    /// 상태 머신에 이벤트를 보냅니다.
    pub async fn dispatch(&self, id: &str, event: WizardEvent) -> Result<SessionView, AppError> {
        let id = id.to_string();
        self.request(|reply| Command::Dispatch { id, event, reply })
            .await
    }

    /// 채팅 입력 한 줄
    pub async fn handle_input(&self, id: &str, text: &str) -> Result<SessionView, AppError> {
        self.dispatch(id, WizardEvent::UserInput(text.to_string()))
            .await
    }

    pub async fn reset(&self, id: &str) -> Result<SessionView, AppError> {
        self.dispatch(id, WizardEvent::Reset).await
    }

    pub async fn retry(&self, id: &str) -> Result<SessionView, AppError> {
        self.dispatch(id, WizardEvent::RetryGeneration).await
    }

    pub async fn partial(&self, id: &str) -> Result<PartialContent, AppError> {
        let id = id.to_string();
        self.request(|reply| Command::Partial { id, reply }).await
    }

    /// 에디터에서 편집한 내용을 저장합니다.
    pub async fn save_content(
        &self,
        id: &str,
        editor_content: String,
    ) -> Result<SessionView, AppError> {
        let id = id.to_string();
        self.request(|reply| Command::SaveContent {
            id,
            editor_content,
            reply,
        })
        .await
    }

    /// 메모리에 올라와 있는 세션 수
    #[cfg(test)]
    pub async fn live_count(&self) -> Result<usize, AppError> {
        self.request(|reply| Command::LiveCount { reply }).await
    }

    /// 명령을 보내고 응답을 기다립니다.
    ///
    /// `FnOnce(Reply<T>) -> Command`: 응답 채널을 받아 명령을 만드는 클로저
    async fn request<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, AppError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| stopped())?;
        response.await.map_err(|_| stopped())?
    }
}

fn stopped() -> AppError {
    AppError::ServiceUnavailable("conversation service has stopped".to_string())
}

/// 진행 중인 생성 한 건
struct ActiveRun {
    run_id: u64,
    task: JoinHandle<()>,
}

/// 메모리 안의 세션 + 실행 상태
struct LiveSession {
    session: DocumentSession,
    run: Option<ActiveRun>,
    /// 부분 생성 내용. 생성 태스크가 쓰고 `partial()`이 읽습니다.
    progress: Arc<watch::Sender<String>>,
    /// 메모리의 세션이 저장소의 레코드와 같은지
    persisted: bool,
}

impl LiveSession {
    /// 방금 저장했거나 저장소에서 읽어 온 세션
    fn new(session: DocumentSession) -> Self {
        // 완료된 세션은 마지막 결과를 부분 내용으로 보여줍니다.
        let last = match session.phase {
            Phase::Completed => session.generated_content.clone().unwrap_or_default(),
            _ => String::new(),
        };
        let (progress, _) = watch::channel(last);
        Self {
            session,
            run: None,
            progress: Arc::new(progress),
            persisted: true,
        }
    }

    /// 메모리에서 내보내도 되는지
    fn is_idle(&self) -> bool {
        let busy_phase = matches!(
            self.session.phase,
            Phase::Generating
                | Phase::AwaitingField {
                    prompt_pending: true,
                    ..
                }
        );
        self.persisted && self.run.is_none() && !busy_phase
    }

    fn cancel_run(&mut self) {
        if let Some(run) = self.run.take() {
            run.task.abort();
            tracing::debug!("Cancelled generation run {} for {}", run.run_id, self.session.id);
        }
        self.progress.send_replace(String::new());
    }
}

struct Actor {
    pool: SqlitePool,
    capacity: i64,
    wizard: Wizard,
    generator: Arc<dyn Generator>,
    commands: mpsc::WeakSender<Command>,
    sessions: HashMap<String, LiveSession>,
    next_run: u64,
    next_id: IdSource,
}

impl Actor {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        tracing::debug!("Conversation service started");
        while let Some(command) = rx.recv().await {
            self.handle(command).await;
        }
        for live in self.sessions.values_mut() {
            live.cancel_run();
        }
        tracing::debug!("Conversation service stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Create { reply } => {
                let result = self.create().await;
                if let Ok(view) = &result {
                    self.release_if_idle(&view.session.id);
                }
                let _ = reply.send(result);
            }
            Command::Load { id, reply } => {
                let result = match self.ensure_loaded(&id).await {
                    Ok(()) => self.view(&id),
                    Err(err) => Err(err),
                };
                self.release_if_idle(&id);
                let _ = reply.send(result);
            }
            Command::List { reply } => {
                let _ = reply.send(self.list().await);
            }
            Command::Delete { id, reply } => {
                let _ = reply.send(self.delete(&id).await);
            }
            Command::Dispatch { id, event, reply } => {
                let result = match self.ensure_loaded(&id).await {
                    Ok(()) => self.apply(&id, event).await,
                    Err(err) => Err(err),
                };
                self.release_if_idle(&id);
                let _ = reply.send(result);
            }
            Command::Partial { id, reply } => {
                let result = match self.ensure_loaded(&id).await {
                    Ok(()) => self.partial(&id),
                    Err(err) => Err(err),
                };
                self.release_if_idle(&id);
                let _ = reply.send(result);
            }
            Command::SaveContent {
                id,
                editor_content,
                reply,
            } => {
                let result = match self.ensure_loaded(&id).await {
                    Ok(()) => self.save_content(&id, editor_content).await,
                    Err(err) => Err(err),
                };
                self.release_if_idle(&id);
                let _ = reply.send(result);
            }
            Command::PromptDue { id, field_index } => {
                // 그 사이 삭제된 세션의 타이머
                if !self.sessions.contains_key(&id) {
                    return;
                }
                if let Err(err) = self.apply(&id, WizardEvent::PromptDue { field_index }).await {
                    tracing::warn!("Prompt timer for {} failed: {}", id, err);
                }
                self.release_if_idle(&id);
            }
            Command::GenerationDone {
                id,
                run_id,
                outcome,
            } => {
                self.finish_generation(&id, run_id, outcome).await;
                self.release_if_idle(&id);
            }
            #[cfg(test)]
            Command::LiveCount { reply } => {
                let _ = reply.send(Ok(self.sessions.len()));
            }
        }
    }

    /// 쉬는 중인 세션을 메모리에서 내보냅니다.
    fn release_if_idle(&mut self, id: &str) {
        if self.sessions.get(id).is_some_and(LiveSession::is_idle) {
            self.sessions.remove(id);
            tracing::debug!("Released chat session {} from memory", id);
        }
    }

    async fn create(&mut self) -> Result<SessionView, AppError> {
        let now = Utc::now();
        let initial = self.wizard.welcome(DocumentSession::new("", now), now);
        let session =
            db::create_chat_session(&self.pool, self.capacity, initial, &mut *self.next_id)
                .await?;

        let id = session.id.clone();
        tracing::info!("Created chat session {}", id);
        self.sessions.insert(id.clone(), LiveSession::new(session));
        self.view(&id)
    }

    /// 메모리에 없으면 저장소에서 불러옵니다.
    async fn ensure_loaded(&mut self, id: &str) -> Result<(), AppError> {
        if self.sessions.contains_key(id) {
            return Ok(());
        }

        let record: SessionRecord = db::load_chat_session(&self.pool, id)
            .await?
            .ok_or(AppError::NotFound)?;
        let fields = self
            .wizard
            .catalog()
            .fields_for(record.document_data.doc_type.as_deref());
        let session = record.into_session(fields);
        let pending = match session.phase {
            Phase::AwaitingField {
                index,
                prompt_pending: true,
            } => Some(index),
            _ => None,
        };

        tracing::debug!("Restored chat session {} ({})", id, session.phase.as_str());
        self.sessions.insert(id.to_string(), LiveSession::new(session));

        // 질문 타이머가 걸려 있던 채로 저장된 세션은 타이머가 사라졌으므로 바로 질문을 보입니다.
        if let Some(field_index) = pending {
            self.apply(id, WizardEvent::PromptDue { field_index }).await?;
        }
        Ok(())
    }

    /// 이벤트를 상태 머신에 넣고 효과를 실행합니다.
    async fn apply(&mut self, id: &str, event: WizardEvent) -> Result<SessionView, AppError> {
        let live = self.sessions.get_mut(id).ok_or(AppError::NotFound)?;
        let (session, effects) = self.wizard.reduce(live.session.clone(), event, Utc::now());
        if session != live.session {
            live.persisted = false;
        }
        live.session = session;

        for effect in effects {
            self.execute(id, effect).await;
        }
        self.view(id)
    }

    async fn execute(&mut self, id: &str, effect: Effect) {
        match effect {
            Effect::Persist => self.persist(id).await,
            Effect::SchedulePrompt { field_index, delay } => {
                let Some(commands) = self.commands.upgrade() else {
                    return;
                };
                let id = id.to_string();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = commands.send(Command::PromptDue { id, field_index }).await;
                });
            }
            Effect::StartGeneration(request) => {
                let Some(commands) = self.commands.upgrade() else {
                    return;
                };
                self.next_run += 1;
                let run_id = self.next_run;
                let Some(live) = self.sessions.get_mut(id) else {
                    return;
                };
                // 세션당 스트림은 하나만: 이전 실행은 먼저 중단합니다.
                live.cancel_run();

                let progress = Arc::clone(&live.progress);
                let generator = Arc::clone(&self.generator);
                let session_id = id.to_string();
                tracing::info!("Starting generation run {} for {}", run_id, session_id);

                let task = tokio::spawn(async move {
                    let outcome = run_generation(generator.as_ref(), request, &progress).await;
                    let _ = commands
                        .send(Command::GenerationDone {
                            id: session_id,
                            run_id,
                            outcome,
                        })
                        .await;
                });
                live.run = Some(ActiveRun { run_id, task });
            }
            Effect::CancelGeneration => {
                if let Some(live) = self.sessions.get_mut(id) {
                    live.cancel_run();
                }
            }
        }
    }

    /// 저장 실패는 로그만 남깁니다.
    async fn persist(&mut self, id: &str) {
        let Some(live) = self.sessions.get_mut(id) else {
            return;
        };
        match db::save_chat_session(&self.pool, self.capacity, &live.session).await {
            Ok(()) => live.persisted = true,
            Err(err) => tracing::warn!("Could not persist chat session {}: {}", id, err),
        }
    }

    async fn finish_generation(&mut self, id: &str, run_id: u64, outcome: GenerationOutcome) {
        let Some(live) = self.sessions.get_mut(id) else {
            return;
        };
        if live.run.as_ref().map(|run| run.run_id) != Some(run_id) {
            tracing::debug!("Dropping stale result of run {} for {}", run_id, id);
            return;
        }
        live.run = None;

        if let Err(err) = self
            .apply(id, WizardEvent::GenerationFinished(outcome))
            .await
        {
            tracing::warn!("Could not apply generation result for {}: {}", id, err);
        }
    }

    async fn list(&self) -> Result<Vec<SessionSummary>, AppError> {
        let stored = db::list_chat_sessions(&self.pool).await?;

        // 메모리 안의 세션이 기준입니다 (저장에 실패한 변경도 목록에 보이도록).
        let mut summaries: Vec<SessionSummary> = stored
            .into_iter()
            .filter(|s| !self.sessions.contains_key(&s.id))
            .collect();
        summaries.extend(self.sessions.values().map(|live| {
            let session = &live.session;
            SessionSummary {
                id: session.id.clone(),
                title: session.title.clone(),
                document_type: session.document_type.clone(),
                updated_at: SessionRecord::from(session).sort_key(),
            }
        }));

        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(a.id.cmp(&b.id)));
        Ok(summaries)
    }

    async fn delete(&mut self, id: &str) -> Result<(), AppError> {
        let was_live = match self.sessions.remove(id) {
            Some(mut live) => {
                live.cancel_run();
                true
            }
            None => false,
        };
        let deleted = db::delete_chat_session(&self.pool, id).await?;

        if !deleted && !was_live {
            return Err(AppError::NotFound);
        }
        tracing::info!("Deleted chat session {}", id);
        Ok(())
    }

    fn partial(&self, id: &str) -> Result<PartialContent, AppError> {
        let live = self.sessions.get(id).ok_or(AppError::NotFound)?;
        Ok(PartialContent {
            id: id.to_string(),
            state: live.session.phase.as_str(),
            generating: live.session.phase == Phase::Generating,
            content: live.progress.borrow().clone(),
        })
    }

    /// 편집 내용 저장. 명시적인 저장 요청이므로 저장소 실패를 호출자에게 돌려줍니다.
    async fn save_content(
        &mut self,
        id: &str,
        editor_content: String,
    ) -> Result<SessionView, AppError> {
        let live = self.sessions.get_mut(id).ok_or(AppError::NotFound)?;
        let now = Utc::now();
        let session = &mut live.session;
        session.content.word_count = Some(count_words(&editor_content) as u64);
        session.content.editor_content = Some(editor_content);
        session.content.last_updated = Some(now);
        session.updated_at = now;
        live.persisted = false;

        db::save_chat_session(&self.pool, self.capacity, &live.session).await?;
        live.persisted = true;
        self.view(id)
    }

    fn view(&self, id: &str) -> Result<SessionView, AppError> {
        self.sessions
            .get(id)
            .map(|live| SessionView::from(live.session.clone()))
            .ok_or(AppError::NotFound)
    }
}
