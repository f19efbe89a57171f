//! # 문서 직접 생성 핸들러
//!
//! 채팅 세션을 거치지 않고 필드 값을 한 번에 보내 문서를 생성합니다.
//!
//! ## 엔드포인트
//! - `POST /api/v1/generate-content`   → 생성이 끝날 때까지 기다렸다가 결과를 한 번에 응답
//! - `GET  /ws/generate-content`        → WebSocket으로 진행 메시지를 그대로 중계
//!
//! ## WebSocket 흐름
//! ```text
//! 클라이언트 → { "type": "GuestLecture", "fields": { ... } }   (한 번)
//! 서버       → { "type": "status", ... } / { "type": "token", ... } ...
//!            → { "type": "complete", ... } 또는 { "type": "error", ... }
//! 서버가 연결을 닫음
//! ```
//! 요청이 잘못되었으면(형식 오류, 지원하지 않는 종류, 빠진 필드) 생성기를 열지 않고
//! `error` 메시지 하나만 보낸 뒤 닫습니다.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    Json,
};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::{
    error::AppError,
    models::{GenerationRequest, StreamMessage},
    routes::chats::AppState,
    services::generation::{open_stream, GenerationError, TRANSPORT_FAILURE_MESSAGE},
};

/// 중계 채널 버퍼 크기
const RELAY_CAPACITY: usize = 64;

/// `POST /generate-content`: 문서를 생성하고 최종 결과를 돌려줍니다.
///
/// # 반환값
/// `{ "content", "word_count", "sections", "metadata" }`
///
/// # 에러
/// - 지원하지 않는 종류나 빠진 필드 → 400
/// - API 키 없음 → 503
/// - 생성기가 실패를 보고하거나 연결이 끊김 → 502
pub async fn generate_content(
    State(state): State<AppState>,
    Json(req): Json<GenerationRequest>,
) -> Result<Json<Value>, AppError> {
    state.catalog.check_request(&req)?;

    let mut stream = open_stream(state.generator.as_ref(), req)
        .await
        .map_err(open_error)?;

    let result = loop {
        match stream.next_message().await {
            Some(Ok(StreamMessage::Complete {
                content,
                word_count,
                sections,
                metadata,
            })) => {
                break Ok(Json(json!({
                    "content": content,
                    "word_count": word_count,
                    "sections": sections,
                    "metadata": metadata,
                })));
            }
            Some(Ok(StreamMessage::Error { error })) => break Err(AppError::Generation(error)),
            // 토큰과 진행 알림은 한 번에 응답하는 경로에서는 필요 없습니다.
            Some(Ok(_)) => continue,
            Some(Err(err)) => {
                tracing::warn!("Generation stream failed: {}", err);
                break Err(AppError::Generation(TRANSPORT_FAILURE_MESSAGE.to_string()));
            }
            None => {
                break Err(AppError::Generation(TRANSPORT_FAILURE_MESSAGE.to_string()));
            }
        }
    };

    stream.close().await;
    result
}

/// 생성기를 열지 못한 이유를 HTTP 에러로 바꿉니다.
fn open_error(err: GenerationError) -> AppError {
    match err {
        GenerationError::NotConfigured => AppError::ServiceUnavailable(err.to_string()),
        other => AppError::Generation(other.to_string()),
    }
}

/// `GET /ws/generate-content`: WebSocket 업그레이드
///
/// `WebSocketUpgrade` Extractor가 HTTP 연결을 WebSocket으로 바꿉니다.
/// 실제 처리는 `on_upgrade`에 넘긴 비동기 함수에서 이어집니다.
pub async fn ws_generate_content(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// 소켓 하나를 끝까지 처리합니다.
async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let Some(raw) = first_text(&mut socket).await else {
        tracing::debug!("WebSocket closed before a generation request arrived");
        return;
    };

    let (tx, rx) = mpsc::channel::<StreamMessage>(RELAY_CAPACITY);

    // 생성기 쪽 중계와 소켓 쓰기를 동시에 돌립니다.
    // 소켓 쓰기가 실패하면 rx가 사라지고, 중계 쪽 send가 실패하면서 스트림이 닫힙니다.
    let producer = async move {
        relay(&state, &raw, &tx).await;
    };
    tokio::join!(producer, forward(&mut socket, rx));

    // 이미 끊긴 연결이면 실패해도 상관없습니다.
    let _ = socket.send(Message::Close(None)).await;
}

/// 채널의 메시지를 JSON 텍스트로 소켓에 씁니다.
///
/// `rx`를 값으로 받으므로 여기서 돌아가는 순간 채널이 닫힙니다.
async fn forward(socket: &mut WebSocket, mut rx: mpsc::Receiver<StreamMessage>) {
    while let Some(message) = rx.recv().await {
        let text = match serde_json::to_string(&message) {
            Ok(text) => text,
            Err(err) => {
                tracing::error!("Could not serialize stream message: {}", err);
                return;
            }
        };
        if socket.send(Message::Text(text.into())).await.is_err() {
            tracing::debug!("WebSocket client went away during generation");
            return;
        }
    }
}

/// 첫 번째 텍스트 메시지를 기다립니다. Ping/Pong은 건너뜁니다.
async fn first_text(socket: &mut WebSocket) -> Option<String> {
    while let Some(message) = socket.recv().await {
        match message {
            Ok(Message::Text(text)) => return Some(text.as_str().to_string()),
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        }
    }
    None
}

/// 요청 하나를 검증하고 생성기 메시지를 `out`으로 넘깁니다.
///
/// 종료 메시지(`complete`/`error`)를 넘기거나 `out`의 수신자가 사라지면 멈춥니다.
/// 어느 쪽이든 생성기 스트림은 닫고 돌아갑니다.
async fn relay(state: &AppState, raw: &str, out: &mpsc::Sender<StreamMessage>) {
    let request: GenerationRequest = match serde_json::from_str(raw) {
        Ok(request) => request,
        Err(err) => {
            tracing::debug!("Rejected generation request: {}", err);
            let _ = out.send(StreamMessage::error("Invalid request format")).await;
            return;
        }
    };

    if let Err(err) = state.catalog.check_request(&request) {
        let message = match err {
            AppError::BadRequest(message) => message,
            other => other.to_string(),
        };
        let _ = out.send(StreamMessage::error(message)).await;
        return;
    }

    tracing::info!("Streaming {} generation over WebSocket", request.document_type);

    let mut stream = match open_stream(state.generator.as_ref(), request).await {
        Ok(stream) => stream,
        Err(err) => {
            let _ = out.send(StreamMessage::error(err.to_string())).await;
            return;
        }
    };

    loop {
        let message = match stream.next_message().await {
            Some(Ok(message)) => message,
            Some(Err(err)) => {
                tracing::warn!("Generation stream failed: {}", err);
                StreamMessage::error(TRANSPORT_FAILURE_MESSAGE)
            }
            None => StreamMessage::error(TRANSPORT_FAILURE_MESSAGE),
        };

        let terminal = message.is_terminal();
        if out.send(message).await.is_err() || terminal {
            break;
        }
    }

    stream.close().await;
}
