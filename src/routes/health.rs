//! # 헬스체크(Health Check) 핸들러
//!
//! 서버가 정상적으로 동작하는지 확인하는 엔드포인트입니다.
//!
//! ## 엔드포인트
//! - `GET /api/v1/health` → `{ "status": "ok", "generation": {...}, "storage": {...} }`
//!
//! 프론트엔드는 이 응답으로 생성기 설정 여부를 확인하고,
//! 세션 저장소가 얼마나 찼는지 보여줄 수 있습니다.

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::{db, error::AppError, routes::chats::AppState};

/// `GET /health`: 서버 상태를 확인합니다.
///
/// DB 조회가 실패하면 에러 응답(500)이 나가므로, 이 응답 자체가 DB 연결 확인도 겸합니다.
pub async fn health_check(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let used = db::used_storage_bytes(&state.pool).await?;

    Ok(Json(json!({
        "status": "ok",
        "generation": {
            "configured": state.generation_configured,
        },
        "storage": {
            "used_bytes": used,
            "capacity_bytes": state.storage_capacity,
        }
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::chats::{create_chat, test_support::state_with};
    use crate::services::generation::scripted::ScriptedGenerator;

    #[tokio::test]
    async fn reports_storage_usage() {
        let state = state_with(ScriptedGenerator::default()).await;

        let Json(before) = health_check(State(state.clone())).await.unwrap();
        assert_eq!(before["status"], "ok");
        assert_eq!(before["storage"]["used_bytes"], 0);

        create_chat(State(state.clone())).await.unwrap();
        let Json(after) = health_check(State(state)).await.unwrap();
        assert!(after["storage"]["used_bytes"].as_i64().unwrap() > 0);
    }
}
