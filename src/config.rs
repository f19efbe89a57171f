//! # 애플리케이션 설정(Configuration) 모듈
//!
//! 환경변수에서 서버 설정값을 읽어오는 모듈입니다.
//! `.env` 파일이나 시스템 환경변수에서 값을 가져옵니다.
//!
//! 설정 항목:
//! - `DATABASE_URL`: SQLite 데이터베이스 경로 (필수)
//! - `HOST` / `PORT`: 서버 바인딩 주소와 포트
//! - `GENERATION_API_URL`: OpenAI 호환 chat completions 엔드포인트
//! - `GENERATION_API_KEY`: 생성 API 키 (없으면 생성 요청이 에러 메시지로 끝남)
//! - `GENERATION_MODEL`, `GENERATION_MAX_TOKENS`, `GENERATION_TEMPERATURE`
//! - `GENERATION_TIMEOUT_SECS`: 생성 요청 전체 타임아웃
//! - `PROMPT_DELAY_MS`: 답변을 받은 뒤 다음 질문을 보여주기까지의 지연
//! - `SESSION_STORE_CAPACITY_BYTES`: 세션 저장소에 담을 수 있는 레코드 총 바이트 수
//! - `DOCUMENT_CATALOG_PATH`: 문서 종류 카탈로그 JSON 파일 (없으면 내장 카탈로그)

use std::env;
use std::time::Duration;

/// 기본 생성 API 엔드포인트 (OpenRouter)
pub const DEFAULT_GENERATION_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
/// 기본 생성 모델
pub const DEFAULT_GENERATION_MODEL: &str = "meta-llama/llama-3.1-70b-instruct";

/// 서버 설정
///
/// 서버 시작 시 환경변수에서 한 번 읽어온 후,
/// 애플리케이션 전체에서 공유됩니다.
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite 데이터베이스 경로 (예: "sqlite:data/docgen.db?mode=rwc")
    pub database_url: String,
    /// 서버가 바인딩할 호스트 주소 (기본값: "0.0.0.0")
    pub host: String,
    /// 서버 포트 번호 (기본값: 8000)
    pub port: u16,
    pub generation: GenerationConfig,
    /// 다음 질문까지의 지연 (기본값: 1초)
    pub prompt_delay: Duration,
    /// 세션 저장소 용량 (기본값: 5 MiB)
    pub session_store_capacity: i64,
    /// 카탈로그 JSON 파일 경로 (선택)
    pub catalog_path: Option<String>,
}

/// 콘텐츠 생성 API 설정
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub api_url: String,
    /// None이면 생성기가 "설정되지 않음" 에러를 보냅니다.
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout: Duration,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_GENERATION_API_URL.to_string(),
            api_key: None,
            model: DEFAULT_GENERATION_MODEL.to_string(),
            max_tokens: 3000,
            temperature: 0.7,
            timeout: Duration::from_secs(60),
        }
    }
}

impl Config {
    /// 환경변수에서 설정값을 읽어 Config 인스턴스를 생성합니다.
    ///
    /// # 에러
    /// `DATABASE_URL`은 필수이며, 없으면 에러가 발생합니다.
    /// 나머지 설정은 기본값이 있어 환경변수가 없어도 동작합니다.
    pub fn from_env() -> Result<Self, env::VarError> {
        let defaults = GenerationConfig::default();

        Ok(Self {
            database_url: env::var("DATABASE_URL")?, // 필수: 없으면 에러
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: parse_var("PORT", 8000),
            generation: GenerationConfig {
                api_url: env::var("GENERATION_API_URL").unwrap_or(defaults.api_url),
                // .ok(): Result → Option. 빈 문자열도 "없음"으로 취급합니다.
                api_key: env::var("GENERATION_API_KEY")
                    .ok()
                    .filter(|key| !key.trim().is_empty()),
                model: env::var("GENERATION_MODEL").unwrap_or(defaults.model),
                max_tokens: parse_var("GENERATION_MAX_TOKENS", defaults.max_tokens),
                temperature: parse_var("GENERATION_TEMPERATURE", defaults.temperature),
                timeout: Duration::from_secs(parse_var("GENERATION_TIMEOUT_SECS", 60)),
            },
            prompt_delay: Duration::from_millis(parse_var("PROMPT_DELAY_MS", 1000)),
            session_store_capacity: parse_var("SESSION_STORE_CAPACITY_BYTES", 5 * 1024 * 1024),
            catalog_path: env::var("DOCUMENT_CATALOG_PATH").ok(),
        })
    }
}

/// 환경변수를 읽어 원하는 타입으로 파싱합니다. 없거나 파싱에 실패하면 기본값을 씁니다.
///
/// `T: std::str::FromStr`: 문자열에서 파싱할 수 있는 타입만 받는다는 트레이트 경계(bound)
fn parse_var<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("Ignoring invalid value for {}: {:?}", key, raw);
            default
        }),
        Err(_) => default,
    }
}
