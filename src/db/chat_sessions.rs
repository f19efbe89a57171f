//! # 채팅 세션 저장소 쿼리 모듈
//!
//! 세션 ID → 세션 레코드(JSON)를 보관하는 키-값 저장소입니다.
//!
//! ## 세션 ID
//! `chat_` + 6자리 난수 (예: `chat_048213`). 100만 개뿐이므로 충돌할 수 있고,
//! 충돌하면 새 번호로 다시 시도합니다.
//!
//! ## 용량 한도
//! 모든 레코드의 바이트 수 합계가 `capacity`를 넘을 수 없습니다.
//! 한도를 넘는 저장은 트랜잭션 안에서 거부되므로 기존 레코드는 그대로 남습니다.

use rand_core::{OsRng, RngCore};
use sqlx::{Sqlite, SqlitePool, Transaction};

use crate::error::AppError;
use crate::models::{DocumentSession, SessionRecord, SessionSummary};

/// ID 충돌 시 최대 시도 횟수
const MAX_ID_ATTEMPTS: usize = 32;

/// 무작위 세션 ID를 만듭니다.
///
/// `OsRng`: 운영체제의 보안 난수 생성기
pub fn random_session_id() -> String {
    format!("chat_{:06}", OsRng.next_u32() % 1_000_000)
}

/// 새 세션을 저장하고, ID가 채워진 세션을 돌려줍니다.
///
/// `next_id`가 만든 ID가 이미 있으면 다른 ID로 다시 시도합니다.
/// 테스트에서는 일부러 충돌하는 ID 생성기를 넘길 수 있습니다.
///
/// `&mut dyn FnMut() -> String`: 호출할 때마다 내부 상태를 바꿀 수 있는 클로저
pub async fn create_chat_session(
    pool: &SqlitePool,
    capacity: i64,
    mut session: DocumentSession,
    next_id: &mut (dyn FnMut() -> String + Send),
) -> Result<DocumentSession, AppError> {
    for _ in 0..MAX_ID_ATTEMPTS {
        session.id = next_id();
        let record = SessionRecord::from(&session);
        let json = serde_json::to_string(&record)?;
        let size = json.len() as i64;

        let mut tx = pool.begin().await?;
        check_capacity(&mut tx, &session.id, size, capacity).await?;

        // ON CONFLICT DO NOTHING: 같은 ID가 있으면 아무 것도 하지 않음 → 영향받은 행 0
        let result = sqlx::query(
            r#"
            INSERT INTO chat_sessions (id, title, document_type, record, record_size, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(&session.id)
        .bind(&record.title)
        .bind(&record.document_data.doc_type)
        .bind(&json)
        .bind(size)
        .bind(record.created_at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
        .bind(record.sort_key())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        if result.rows_affected() > 0 {
            tracing::debug!("Created chat session {}", session.id);
            return Ok(session);
        }
        tracing::debug!("Session id {} already taken, retrying", session.id);
    }

    Err(AppError::Conflict(
        "Could not allocate a unique session id".to_string(),
    ))
}

/// 세션을 저장합니다 (없으면 새로 추가, 있으면 덮어쓰기).
///
/// 용량을 넘으면 `AppError::StorageFull`을 반환하고 아무 것도 바꾸지 않습니다.
pub async fn save_chat_session(
    pool: &SqlitePool,
    capacity: i64,
    session: &DocumentSession,
) -> Result<(), AppError> {
    let record = SessionRecord::from(session);
    let json = serde_json::to_string(&record)?;
    let size = json.len() as i64;

    let mut tx = pool.begin().await?;
    check_capacity(&mut tx, &session.id, size, capacity).await?;

    // excluded.컬럼: INSERT하려던 값을 UPDATE 절에서 참조하는 SQLite 문법
    sqlx::query(
        r#"
        INSERT INTO chat_sessions (id, title, document_type, record, record_size, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            title = excluded.title,
            document_type = excluded.document_type,
            record = excluded.record,
            record_size = excluded.record_size,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&session.id)
    .bind(&record.title)
    .bind(&record.document_data.doc_type)
    .bind(&json)
    .bind(size)
    .bind(record.created_at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
    .bind(record.sort_key())
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

/// 레코드 하나를 불러옵니다. 없으면 `None`입니다.
pub async fn load_chat_session(
    pool: &SqlitePool,
    id: &str,
) -> Result<Option<SessionRecord>, AppError> {
    let raw: Option<String> = sqlx::query_scalar("SELECT record FROM chat_sessions WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    // Option<String> → Option<SessionRecord>. 파싱 실패는 에러로 전파합니다.
    raw.map(|json| serde_json::from_str(&json).map_err(AppError::from))
        .transpose()
}

/// 세션 요약 목록 (최근에 수정된 순)
pub async fn list_chat_sessions(pool: &SqlitePool) -> Result<Vec<SessionSummary>, AppError> {
    let sessions = sqlx::query_as::<_, SessionSummary>(
        r#"
        SELECT id, title, document_type, updated_at
        FROM chat_sessions
        ORDER BY updated_at DESC, id ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(sessions)
}

/// 세션을 삭제합니다. 삭제된 행이 있으면 true입니다.
pub async fn delete_chat_session(pool: &SqlitePool, id: &str) -> Result<bool, AppError> {
    let result = sqlx::query("DELETE FROM chat_sessions WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// 저장된 레코드들의 전체 바이트 수
pub async fn used_storage_bytes(pool: &SqlitePool) -> Result<i64, AppError> {
    let used: i64 = sqlx::query_scalar("SELECT COALESCE(SUM(record_size), 0) FROM chat_sessions")
        .fetch_one(pool)
        .await?;
    Ok(used)
}

/// `id`의 기존 레코드를 `size` 바이트로 바꿔도 한도 안인지 확인합니다.
async fn check_capacity(
    tx: &mut Transaction<'_, Sqlite>,
    id: &str,
    size: i64,
    capacity: i64,
) -> Result<(), AppError> {
    // 덮어쓸 레코드 자신의 크기는 빼고 계산합니다.
    let others: i64 = sqlx::query_scalar(
        "SELECT COALESCE(SUM(record_size), 0) FROM chat_sessions WHERE id != ?",
    )
    .bind(id)
    .fetch_one(&mut **tx)
    .await?;

    if others + size > capacity {
        return Err(AppError::StorageFull {
            requested: size,
            available: (capacity - others).max(0),
            capacity,
        });
    }
    Ok(())
}
