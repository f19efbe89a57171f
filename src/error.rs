//! # 에러 처리 모듈
//!
//! 애플리케이션에서 발생할 수 있는 모든 에러 타입을 정의합니다.
//! Rust에서는 예외(exception) 대신 `Result<T, E>` 타입으로 에러를 처리합니다.
//!
//! 이 모듈의 핵심:
//! - `AppError` 열거형(enum): 모든 에러 종류를 하나의 타입으로 통합
//! - `IntoResponse` 구현: 에러를 HTTP 응답으로 자동 변환
//!
//! 필드 검증 실패(`ValidationError`)와 생성 실패(`GenerationError`)는
//! 각자의 모듈에 정의되어 있고, 대부분 채팅 메시지로 바뀌어 사용자에게 전달됩니다.
//! 여기의 `AppError`는 HTTP 핸들러와 저장소 계층에서 쓰입니다.

use axum::{
    http::StatusCode,                   // HTTP 상태 코드 (200, 404, 500 등)
    response::{IntoResponse, Response}, // Axum의 응답 변환 트레이트
    Json,                               // JSON 응답 래퍼
};
use serde_json::json;
use thiserror::Error;

/// 애플리케이션에서 발생할 수 있는 모든 에러 종류
///
/// 각 에러 variant는 적절한 HTTP 상태 코드와 메시지로 변환됩니다.
/// 핸들러에서 `Result<T, AppError>`를 반환하면,
/// Axum이 자동으로 `IntoResponse`를 호출하여 HTTP 응답으로 변환합니다.
#[derive(Debug, Error)]
pub enum AppError {
    /// 요청한 리소스를 찾을 수 없음 (HTTP 404)
    #[error("Resource not found")]
    NotFound,

    /// 잘못된 요청 (HTTP 400)
    /// {0}은 첫 번째 필드(String)를 참조하는 포맷 문법입니다.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// 서버 내부 오류 (HTTP 500)
    #[error("Internal error: {0}")]
    Internal(String),

    /// 데이터베이스 오류 (HTTP 500)
    /// #[from]: sqlx::Error를 AppError로 자동 변환하는 From 트레이트를 구현합니다.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// 파일 입출력 오류 (HTTP 500)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 세션 레코드 직렬화/역직렬화 오류 (HTTP 500)
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// 리소스 충돌 (HTTP 409). 예: 세션 ID를 할당하지 못함
    #[error("Conflict: {0}")]
    Conflict(String),

    /// 세션 저장소 용량 초과 (HTTP 507)
    ///
    /// 저장이 거부되어도 이전에 저장된 레코드는 그대로 남습니다.
    #[error("Session storage is full: {requested} bytes requested, {available} of {capacity} bytes available")]
    StorageFull {
        requested: i64,
        available: i64,
        capacity: i64,
    },

    /// 외부 의존 서비스를 사용할 수 없음 (HTTP 503)
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// 콘텐츠 생성기가 실패를 보고함 (HTTP 502)
    #[error("Generation failed: {0}")]
    Generation(String),
}

impl IntoResponse for AppError {
    /// AppError를 HTTP 응답으로 변환합니다.
    ///
    /// 내부 에러(Database, IO, Internal, Serialization)는 실제 에러 내용을 로그에만 기록하고,
    /// 클라이언트에는 일반적인 메시지만 반환합니다.
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AppError::NotFound => (StatusCode::NOT_FOUND, "not_found", self.to_string()),
            AppError::BadRequest(ref msg) => {
                (StatusCode::BAD_REQUEST, "bad_request", msg.clone())
            }
            AppError::Internal(ref msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
            AppError::Database(ref e) => {
                tracing::error!("Database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "database_error",
                    "A database error occurred".to_string(),
                )
            }
            AppError::Io(ref e) => {
                tracing::error!("IO error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "io_error",
                    "An IO error occurred".to_string(),
                )
            }
            AppError::Serialization(ref e) => {
                tracing::error!("Serialization error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "serialization_error",
                    "A serialization error occurred".to_string(),
                )
            }
            AppError::Conflict(ref msg) => (StatusCode::CONFLICT, "conflict", msg.clone()),
            AppError::StorageFull { .. } => {
                tracing::warn!("{}", self);
                (
                    StatusCode::INSUFFICIENT_STORAGE,
                    "storage_full",
                    self.to_string(),
                )
            }
            AppError::ServiceUnavailable(ref msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable", msg.clone())
            }
            AppError::Generation(ref msg) => {
                (StatusCode::BAD_GATEWAY, "generation_failed", msg.clone())
            }
        };

        // 결과: { "error": { "code": "not_found", "message": "Resource not found" } }
        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}
