//! # 채팅 세션(Chat) 라우트 핸들러
//!
//! 문서 작성 마법사의 대화 세션을 다루는 HTTP 핸들러 함수들입니다.
//! 실제 상태 변경은 모두 `ConversationService` 액터가 처리하고,
//! 핸들러는 요청을 명령으로 바꿔 전달한 뒤 결과를 JSON으로 돌려줍니다.
//!
//! ## 엔드포인트
//! - `GET    /api/v1/chats`                → 세션 목록 (최근 수정 순)
//! - `POST   /api/v1/chats`                → 새 세션 생성 (환영 메시지 포함)
//! - `GET    /api/v1/chats/{id}`           → 단일 세션 조회
//! - `DELETE /api/v1/chats/{id}`           → 세션 삭제
//! - `POST   /api/v1/chats/{id}/messages`  → 사용자 입력 전달 `{ "text": "..." }`
//! - `POST   /api/v1/chats/{id}/reset`     → 마법사 초기화
//! - `POST   /api/v1/chats/{id}/generate`  → 생성 다시 시도
//! - `GET    /api/v1/chats/{id}/partial`   → 생성 중인 부분 결과
//! - `PUT    /api/v1/chats/{id}/content`   → 에디터에서 고친 내용 저장
//!
//! 세션 응답은 `SessionView` 형태입니다. 세션 필드에 더해
//! `current_field_index`, `awaiting_input`, `current_field`가 함께 내려갑니다.
//! 응답 키는 모두 snake_case입니다. camelCase는 DB에 저장하는 레코드에만 씁니다.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use sqlx::SqlitePool;

use crate::{
    error::AppError,
    models::{ChatInputRequest, SaveContentRequest, SessionView},
    services::{catalog::DocumentCatalog, conversation::ConversationService, generation::Generator},
};

/// 애플리케이션 공유 상태
///
/// 모든 요청 핸들러가 `State(state): State<AppState>`로 접근합니다.
/// 필드가 전부 `Arc`이거나 내부적으로 `Arc`를 쓰므로 clone 비용이 작습니다.
#[derive(Clone)]
pub struct AppState {
    /// SQLite 연결 풀 (헬스체크에서 저장 용량 확인용)
    pub pool: SqlitePool,
    /// 세션 액터 핸들
    pub conversations: ConversationService,
    /// 문서 종류 목록
    pub catalog: Arc<DocumentCatalog>,
    /// 콘텐츠 생성기 (`/generate-content`, `/ws/generate-content`에서 직접 사용)
    pub generator: Arc<dyn Generator>,
    /// API 키가 설정되어 있는지
    pub generation_configured: bool,
    /// 세션 저장소 용량 (바이트)
    pub storage_capacity: i64,
}

/// `GET /chats`: 세션 요약 목록을 조회합니다.
///
/// # 반환값
/// `{ "chats": [{ "id", "title", "document_type", "updated_at" }, ...] }`
pub async fn list_chats(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let chats = state.conversations.list().await?;
    Ok(Json(json!({ "chats": chats })))
}

/// `POST /chats`: 새 세션을 만듭니다.
///
/// 성공하면 `201 Created`와 함께 환영 메시지가 담긴 세션을 돌려줍니다.
/// 저장소가 가득 차면 `507`, ID를 할당하지 못하면 `409`입니다.
pub async fn create_chat(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<SessionView>), AppError> {
    let view = state.conversations.create().await?;
    tracing::info!("Created chat session {}", view.session.id);
    Ok((StatusCode::CREATED, Json(view)))
}

/// `GET /chats/{id}`: 세션 하나를 조회합니다.
pub async fn get_chat(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionView>, AppError> {
    let view = state.conversations.load(&id).await?;
    Ok(Json(view))
}

/// `DELETE /chats/{id}`: 세션을 삭제합니다.
///
/// 진행 중인 생성이 있으면 함께 취소됩니다. 본문 없이 `204 No Content`를 돌려줍니다.
pub async fn delete_chat(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.conversations.delete(&id).await?;
    tracing::info!("Deleted chat session {}", id);
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /chats/{id}/messages`: 사용자 입력을 마법사에 전달합니다.
///
/// 메뉴 선택, 필드 답변, `reset`/`retry` 명령어 모두 이 엔드포인트로 들어옵니다.
/// 빈 입력은 `400`으로 거절합니다.
pub async fn post_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ChatInputRequest>,
) -> Result<Json<SessionView>, AppError> {
    if req.text.trim().is_empty() {
        return Err(AppError::BadRequest("Message text must not be empty".to_string()));
    }

    let view = state.conversations.handle_input(&id, &req.text).await?;
    Ok(Json(view))
}

/// `POST /chats/{id}/reset`: 마법사를 처음 상태로 되돌립니다.
pub async fn reset_chat(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionView>, AppError> {
    let view = state.conversations.reset(&id).await?;
    Ok(Json(view))
}

/// `POST /chats/{id}/generate`: 모든 필드가 모인 세션의 생성을 다시 시작합니다.
///
/// 아직 필드를 모으는 중이면 세션은 바뀌지 않고 그대로 돌아옵니다.
pub async fn generate_chat(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionView>, AppError> {
    let view = state.conversations.retry(&id).await?;
    Ok(Json(view))
}

/// `GET /chats/{id}/partial`: 생성 중인 부분 결과를 조회합니다.
///
/// # 반환값
/// `{ "id", "state", "generating", "content" }`
pub async fn get_partial(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let partial = state.conversations.partial(&id).await?;
    Ok(Json(json!(partial)))
}

/// `PUT /chats/{id}/content`: 에디터에서 고친 문서 내용을 저장합니다.
///
/// 마법사 진행 중의 자동 저장과 달리, 여기서는 저장 실패(용량 초과 등)를
/// 그대로 에러 응답으로 돌려줍니다.
pub async fn update_chat_content(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SaveContentRequest>,
) -> Result<Json<SessionView>, AppError> {
    let view = state
        .conversations
        .save_content(&id, req.editor_content)
        .await?;
    Ok(Json(view))
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::time::Duration;

    use super::*;
    use crate::db::chat_sessions::test_support::memory_pool;
    use crate::services::generation::scripted::ScriptedGenerator;
    use crate::services::wizard::Wizard;

    /// 메모리 DB와 가짜 생성기로 상태를 만듭니다.
    pub async fn state_with(generator: ScriptedGenerator) -> AppState {
        let pool = memory_pool().await;
        let catalog = Arc::new(DocumentCatalog::builtin());
        let generator: Arc<dyn Generator> = Arc::new(generator);
        let wizard = Wizard::new(catalog.clone(), Duration::from_millis(20));
        let conversations =
            ConversationService::spawn(pool.clone(), wizard, generator.clone(), 1024 * 1024);

        AppState {
            pool,
            conversations,
            catalog,
            generator,
            generation_configured: true,
            storage_capacity: 1024 * 1024,
        }
    }
}
