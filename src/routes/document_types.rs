//! # 문서 종류(Document Type) 핸들러
//!
//! ## 엔드포인트
//! - `GET /api/v1/document-types` → 메뉴 번호 순 문서 종류 목록
//!
//! 각 항목에는 필드 목록(프롬프트, 입력 방식)과 지원 여부(`available`)가 들어 있습니다.
//! 필드가 없는 종류는 아직 개발 중이라 선택해도 생성할 수 없습니다.

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::routes::chats::AppState;

/// `GET /document-types`: 카탈로그 전체를 돌려줍니다.
pub async fn list_document_types(State(state): State<AppState>) -> Json<Value> {
    let types: Vec<Value> = state
        .catalog
        .types()
        .iter()
        .map(|t| {
            json!({
                "key": t.key,
                "display_name": t.display_name,
                "menu_number": t.menu_number,
                "available": t.is_available(),
                "fields": t.fields,
            })
        })
        .collect();

    Json(json!({ "document_types": types }))
}
