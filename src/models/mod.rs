//! # 데이터 모델 모듈
//!
//! 애플리케이션에서 사용하는 데이터 구조체(struct)들을 정의합니다.
//! 각 하위 모듈은 특정 도메인의 데이터 타입을 담당합니다:
//! - `field`: 문서 필드 명세와 검증 규칙
//! - `generation`: 생성 요청과 스트림 메시지
//! - `session`: 채팅 세션, 메시지, 저장 레코드
//!
//! `pub use X::*;`로 재공개하여 `crate::models::DocumentSession`처럼 짧게 접근합니다.

pub mod field;
pub mod generation;
pub mod session;

pub use field::*;
pub use generation::*;
pub use session::*;
