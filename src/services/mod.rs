//! # 서비스 계층 (비즈니스 로직)
//!
//! 라우트 핸들러와 저장소 사이에서 실제 동작을 담당합니다.
//!
//! 각 하위 모듈:
//! - `catalog`: 문서 종류와 필드 목록 (메뉴 번호, 검증 규칙)
//! - `wizard`: 필드 수집 상태 기계 (순수 함수 `reduce`)
//! - `conversation`: 세션별 이벤트를 한 번에 하나씩 처리하는 액터
//! - `generation`: 생성기 스트림 추상화와 토큰 누적
//! - `llm`: OpenAI 호환 API를 쓰는 실제 생성기
//! - `report`: 모델 응답 JSON 복구와 섹션 파싱

pub mod catalog;
pub mod conversation;
pub mod generation;
pub mod llm;
pub mod report;
pub mod wizard;
