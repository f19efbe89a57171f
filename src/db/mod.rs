//! # 데이터베이스 접근 계층 (Data Access Layer)
//!
//! 세션 레코드를 SQLite에 저장하고 읽어오는 함수들을 모아둔 모듈입니다.
//! 서비스 계층(services/conversation.rs)이 이 모듈의 함수를 호출합니다.
//!
//! 각 하위 모듈:
//! - `chat_sessions`: 세션 레코드 저장/조회/목록/삭제, 저장 용량 확인

pub mod chat_sessions;

// `crate::db::save_chat_session`처럼 바로 접근할 수 있게 재공개합니다.
pub use chat_sessions::*;
