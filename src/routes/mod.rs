//! # 라우트 핸들러 모듈
//!
//! HTTP 요청을 처리하는 핸들러 함수들을 모아둔 모듈입니다.
//! Axum에서 핸들러는 HTTP 요청을 받아 응답을 반환하는 async 함수입니다.
//!
//! 각 하위 모듈:
//! - `chats`: 채팅 세션 핸들러와 공유 상태(`AppState`)
//! - `document_types`: 문서 종류 목록
//! - `generate`: 세션 없이 바로 생성 (HTTP, WebSocket)
//! - `health`: 서버 상태 확인 (헬스체크)

pub mod chats;
pub mod document_types;
pub mod generate;
pub mod health;

// main.rs에서 `routes::list_chats`처럼 바로 접근 가능하게 재공개합니다.
pub use chats::*;
pub use document_types::*;
pub use generate::*;
pub use health::*;
