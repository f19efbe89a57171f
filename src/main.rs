//! # 문서 생성 마법사 서버 진입점
//!
//! 이 파일은 애플리케이션의 **시작점(entry point)**입니다.
//!
//! 이 파일이 수행하는 작업:
//! 1. 환경변수(.env) 로딩
//! 2. 로깅(tracing) 초기화
//! 3. 설정 로딩
//! 4. SQLite 연결 풀 생성과 마이그레이션
//! 5. 문서 카탈로그와 생성기 준비
//! 6. 세션 액터 시작
//! 7. API 라우터 설정
//! 8. HTTP 서버 시작

// ── 모듈 선언 ──
mod config;
mod db;
mod error;
mod models;
mod routes;
mod services;

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    routing::{get, post, put},
    Router,
};
use config::Config;
use routes::*;
use services::{
    catalog::DocumentCatalog, conversation::ConversationService, generation::Generator,
    llm::LlmGenerator, wizard::Wizard,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tower_http::{
    cors::{Any, CorsLayer},
    services::{ServeDir, ServeFile},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// 빌드된 프론트엔드 위치
const FRONTEND_DIST: &str = "../frontend/dist";

#[tokio::main]
async fn main() -> Result<()> {
    // ── 1단계: 환경변수 로딩 ──
    // .env 파일이 없어도 에러 없이 넘어갑니다.
    dotenvy::dotenv().ok();

    // ── 2단계: 로깅(tracing) 초기화 ──
    // RUST_LOG가 없으면 docgen, tower_http, axum 모듈을 debug 레벨로 봅니다.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "docgen=debug,tower_http=debug,axum=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // ── 3단계: 설정 로딩 ──
    let config = Config::from_env()?;
    tracing::info!("Starting document generator on {}:{}", config.host, config.port);

    // ── 4단계: SQLite 연결 풀 생성과 마이그레이션 ──
    // create_if_missing: DB 파일이 없으면 새로 만듭니다.
    let connect_options =
        SqliteConnectOptions::from_str(&config.database_url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(connect_options)
        .await?;

    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;

    // ── 5단계: 문서 카탈로그와 생성기 준비 ──
    // DOCUMENT_CATALOG_PATH가 있으면 JSON 파일에서, 없으면 내장 목록을 씁니다.
    let catalog = match &config.catalog_path {
        Some(path) => {
            tracing::info!("Loading document catalog from {}", path);
            DocumentCatalog::from_json_file(path).await?
        }
        None => DocumentCatalog::builtin(),
    };
    let catalog = Arc::new(catalog);

    let llm = LlmGenerator::new(config.generation.clone())?;
    let generation_configured = llm.is_configured();
    if !generation_configured {
        // 마법사는 동작하지만 생성 단계에서 실패 메시지가 나갑니다.
        tracing::warn!("GENERATION_API_KEY is not set; document generation will fail");
    }
    let generator: Arc<dyn Generator> = Arc::new(llm);

    // ── 6단계: 세션 액터 시작 ──
    let wizard = Wizard::new(catalog.clone(), config.prompt_delay);
    let conversations = ConversationService::spawn(
        pool.clone(),
        wizard,
        generator.clone(),
        config.session_store_capacity,
    );

    let state = AppState {
        pool,
        conversations,
        catalog,
        generator,
        generation_configured,
        storage_capacity: config.session_store_capacity,
    };

    // ── 7단계: API 라우터 설정 ──
    // `{id}`는 URL 경로 파라미터 (Path<String>으로 핸들러에서 추출)
    let api_routes = Router::new()
        .route("/chats", get(list_chats).post(create_chat))
        .route("/chats/{id}", get(get_chat).delete(delete_chat))
        .route("/chats/{id}/messages", post(post_message))
        .route("/chats/{id}/reset", post(reset_chat))
        .route("/chats/{id}/generate", post(generate_chat))
        .route("/chats/{id}/partial", get(get_partial))
        .route("/chats/{id}/content", put(update_chat_content))
        .route("/document-types", get(list_document_types))
        .route("/generate-content", post(generate_content))
        .route("/health", get(health_check))
        .with_state(state.clone());

    // WebSocket은 /api/v1 밖에 둡니다.
    let ws_routes = Router::new()
        .route("/ws/generate-content", get(ws_generate_content))
        .with_state(state);

    // 개발 환경에서는 모든 출처를 허용합니다.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let router = Router::new().nest("/api/v1", api_routes).merge(ws_routes);

    // 빌드된 프론트엔드가 있으면 같은 서버에서 서빙합니다 (SPA 라우팅 지원).
    let router = if Path::new(FRONTEND_DIST).exists() {
        tracing::info!("Serving frontend static files from {}", FRONTEND_DIST);
        let serve_dir = ServeDir::new(FRONTEND_DIST)
            .not_found_service(ServeFile::new(format!("{FRONTEND_DIST}/index.html")));
        router.fallback_service(serve_dir)
    } else {
        tracing::warn!("Frontend dist directory not found, serving API only");
        router
    };
    let app = router.layer(cors).layer(TraceLayer::new_for_http());

    // ── 8단계: 서버 시작 ──
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
