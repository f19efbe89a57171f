//! # 언어 모델 생성기
//!
//! OpenAI 호환 chat completions API(기본값: OpenRouter)를 스트리밍 모드로 호출하여
//! 보고서를 생성하는 `Generator` 구현입니다.
//!
//! ## 흐름
//! ```text
//! send(request)
//!   └─ tokio::spawn ──► POST {api_url} (stream: true)
//!                        SSE 줄 읽기: "data: {...}" → token 메시지
//!                        "data: [DONE]" → 종료
//!                        report::parse_report() → complete 또는 error 메시지
//!                           │
//!                       mpsc 채널
//!                           ▼
//! next_message()  ◄──── rx.recv()
//! ```
//!
//! HTTP 오류, 타임아웃, 빈 응답, 파싱 실패는 모두 `error` 메시지로 전달됩니다.

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::GenerationConfig;
use crate::models::{GenerationRequest, StreamMessage};
use crate::services::generation::{GenerationError, GenerationStream, Generator};
use crate::services::report;

/// 채널 버퍼 크기 (토큰 메시지 수)
const CHANNEL_CAPACITY: usize = 100;

/// SSE 한 줄을 해석한 결과
#[derive(Debug, Clone, PartialEq, Eq)]
enum SseEvent {
    /// 본문 조각
    Token(String),
    /// `data: [DONE]`
    Done,
}

/// 언어 모델 API 생성기
#[derive(Debug, Clone)]
pub struct LlmGenerator {
    client: reqwest::Client,
    config: GenerationConfig,
}

impl LlmGenerator {
    /// HTTP 클라이언트를 만듭니다. 타임아웃은 응답 본문을 다 읽을 때까지 적용됩니다.
    pub fn new(config: GenerationConfig) -> Result<Self, GenerationError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GenerationError::Transport(e.to_string()))?;
        Ok(Self { client, config })
    }

    pub fn is_configured(&self) -> bool {
        self.config.api_key.is_some()
    }
}

#[async_trait]
impl Generator for LlmGenerator {
    async fn open(&self) -> Result<Box<dyn GenerationStream>, GenerationError> {
        let api_key = self
            .config
            .api_key
            .clone()
            .ok_or(GenerationError::NotConfigured)?;

        Ok(Box::new(LlmStream {
            client: self.client.clone(),
            config: self.config.clone(),
            api_key,
            rx: None,
            task: None,
        }))
    }
}

/// 요청 하나에 대한 스트림. 실제 HTTP 호출은 백그라운드 태스크에서 합니다.
struct LlmStream {
    client: reqwest::Client,
    config: GenerationConfig,
    api_key: String,
    rx: Option<mpsc::Receiver<StreamMessage>>,
    task: Option<JoinHandle<()>>,
}

#[async_trait]
impl GenerationStream for LlmStream {
    async fn send(&mut self, request: GenerationRequest) -> Result<(), GenerationError> {
        if self.task.is_some() {
            return Err(GenerationError::AlreadySent);
        }

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let call = Completion {
            client: self.client.clone(),
            config: self.config.clone(),
            api_key: self.api_key.clone(),
        };
        self.task = Some(tokio::spawn(call.stream(request, tx)));
        self.rx = Some(rx);
        Ok(())
    }

    async fn next_message(&mut self) -> Option<Result<StreamMessage, GenerationError>> {
        let rx = self.rx.as_mut()?;
        rx.recv().await.map(Ok)
    }

    async fn close(&mut self) {
        // 아직 진행 중인 HTTP 요청이 있으면 중단합니다.
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.rx = None;
    }
}

impl Drop for LlmStream {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// 백그라운드 태스크가 소유하는 호출 정보
struct Completion {
    client: reqwest::Client,
    config: GenerationConfig,
    api_key: String,
}

impl Completion {
    /// 요청을 보내고 결과를 채널로 흘려보냅니다. 마지막 메시지는 항상 complete 또는 error입니다.
    async fn stream(self, request: GenerationRequest, tx: mpsc::Sender<StreamMessage>) {
        let request_id = uuid::Uuid::now_v7();
        tracing::info!(
            "Generation {} started for {} ({} fields)",
            request_id,
            request.document_type,
            request.fields.len()
        );

        let terminal = match self.run(&request, &tx).await {
            Ok(message) => message,
            Err(message) => StreamMessage::error(message),
        };

        if let StreamMessage::Error { error } = &terminal {
            tracing::warn!("Generation {} failed: {}", request_id, error);
        } else {
            tracing::info!("Generation {} completed", request_id);
        }
        // 받는 쪽이 이미 닫혔으면 보낼 곳이 없으므로 결과를 무시합니다.
        let _ = tx.send(terminal).await;
    }

    /// 성공하면 complete 메시지, 실패하면 사용자에게 보여줄 에러 문장
    async fn run(
        &self,
        request: &GenerationRequest,
        tx: &mpsc::Sender<StreamMessage>,
    ) -> Result<StreamMessage, String> {
        let _ = tx
            .send(StreamMessage::status(
                "processing",
                "Starting document generation...",
            ))
            .await;

        let response = self
            .client
            .post(&self.config.api_url)
            .bearer_auth(&self.api_key)
            .header("Accept", "text/event-stream")
            .json(&build_payload(&self.config, request))
            .send()
            .await
            .map_err(describe_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(format!("AI API error: {} {}", status.as_u16(), body.trim()));
        }

        // 청크 경계가 줄 경계와 다르므로, 줄바꿈이 나올 때까지 버퍼에 모읍니다.
        let mut byte_stream = response.bytes_stream();
        let mut lines = SseLineBuffer::default();
        let mut complete = String::new();
        let mut finished = false;

        'read: while let Some(chunk) = byte_stream.next().await {
            let bytes = chunk.map_err(describe_transport_error)?;
            lines.push(&bytes);

            while let Some(line) = lines.next_line() {
                if forward_line(&line, &mut complete, tx).await? {
                    finished = true;
                    break 'read;
                }
            }
        }

        // 마지막 줄에 줄바꿈이 없을 수도 있습니다.
        if !finished {
            if let Some(line) = lines.take_rest() {
                forward_line(&line, &mut complete, tx).await?;
            }
        }

        if complete.trim().is_empty() {
            return Err("No response received from API".to_string());
        }

        let _ = tx
            .send(StreamMessage::status("parsing", "Parsing response data..."))
            .await;

        let parsed = report::parse_report(&complete).map_err(|err| {
            tracing::debug!("Unparseable generation output: {}", err.raw_excerpt);
            err.to_string()
        })?;

        if let Some(message) = parsed.warning {
            let _ = tx.send(StreamMessage::Warning { message }).await;
        }

        let mut metadata = BTreeMap::new();
        metadata.insert("document_type".to_string(), request.document_type.clone());
        metadata.insert("generated_at".to_string(), chrono::Utc::now().to_rfc3339());
        metadata.insert(
            "total_sections".to_string(),
            parsed.sections.len().to_string(),
        );
        metadata.insert("word_count".to_string(), parsed.word_count.to_string());

        Ok(StreamMessage::Complete {
            content: parsed.content,
            word_count: parsed.word_count,
            sections: parsed.sections,
            metadata,
        })
    }
}

/// SSE 한 줄을 처리합니다. `[DONE]`을 만나면 true를 돌려줍니다.
async fn forward_line(
    line: &str,
    complete: &mut String,
    tx: &mpsc::Sender<StreamMessage>,
) -> Result<bool, String> {
    match parse_sse_line(line.trim()) {
        Some(SseEvent::Token(content)) => {
            complete.push_str(&content);
            if tx.send(StreamMessage::Token { content }).await.is_err() {
                // 받는 쪽이 사라짐 → 더 읽을 이유가 없음
                return Err("stream receiver closed".to_string());
            }
            Ok(false)
        }
        Some(SseEvent::Done) => {
            let _ = tx
                .send(StreamMessage::status(
                    "processing_complete",
                    "Generation complete, processing response...",
                ))
                .await;
            Ok(true)
        }
        None => Ok(false),
    }
}

/// 바이트 단위 줄 버퍼
///
/// 네트워크 청크는 UTF-8 문자 한가운데서 끊길 수 있습니다.
/// 그래서 바이트를 그대로 모아 두고, `\n`까지 완성된 줄만 문자열로 바꿉니다.
#[derive(Debug, Default)]
struct SseLineBuffer {
    bytes: Vec<u8>,
}

impl SseLineBuffer {
    fn push(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
    }

    /// 완성된 다음 줄 (줄바꿈 포함). 아직 없으면 None
    fn next_line(&mut self) -> Option<String> {
        let end = self.bytes.iter().position(|b| *b == b'\n')?;
        let line: Vec<u8> = self.bytes.drain(..=end).collect();
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// 스트림이 끝났을 때 남은 조각
    fn take_rest(&mut self) -> Option<String> {
        if self.bytes.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.bytes);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

fn describe_transport_error(err: reqwest::Error) -> String {
    if err.is_timeout() {
        "Request to AI API timed out".to_string()
    } else {
        format!("Error during streaming: {err}")
    }
}

/// SSE 한 줄 해석
///
/// - `data: [DONE]` → `Done`
/// - `data: {"choices":[{"delta":{"content":"..."}}]}` → `Token`
/// - 빈 내용, 주석(`: keep-alive`), 깨진 JSON → None (건너뜀)
fn parse_sse_line(line: &str) -> Option<SseEvent> {
    let data = line.strip_prefix("data:")?.trim_start();
    if data == "[DONE]" {
        return Some(SseEvent::Done);
    }

    let chunk: Value = serde_json::from_str(data).ok()?;
    let content = chunk
        .get("choices")?
        .get(0)?
        .get("delta")?
        .get("content")?
        .as_str()?;

    if content.is_empty() {
        None
    } else {
        Some(SseEvent::Token(content.to_string()))
    }
}

/// chat completions 요청 본문
fn build_payload(config: &GenerationConfig, request: &GenerationRequest) -> Value {
    json!({
        "model": config.model,
        "messages": [
            { "role": "system", "content": system_prompt() },
            { "role": "user", "content": user_prompt(request) }
        ],
        "max_tokens": config.max_tokens,
        "temperature": config.temperature,
        "stream": true,
        "response_format": { "type": "json_object" }
    })
}

// 문서 종류별 섹션 구조: (섹션 제목, 작성 지침)
const MINUTES_SECTIONS: &[(&str, &str)] = &[
    ("Meeting Details", "Specify the date, time, venue, and attendees. Ensure at least 40-50 words."),
    ("Meeting Agenda", "Outline the main topics covered. Ensure at least 40-50 words."),
    ("Key Discussions", "Summarize the main points discussed. Ensure at least 40-50 words."),
    ("Decisions Taken", "Detail the resolutions made during the meeting. Ensure at least 40-50 words."),
    ("Action Items and Responsibilities", "List the tasks assigned and who is responsible. Ensure at least 30-40 words."),
    ("Conclusion and Next Steps", "Summarize outcomes and mention follow-up actions. Ensure at least 30-40 words."),
];
const LAB_SESSION_SECTIONS: &[(&str, &str)] = &[
    ("Session Overview", "Include details such as date, duration, and participants. Ensure at least 40-50 words."),
    ("Experiments Conducted", "Describe the experiments performed. Ensure at least 40-50 words."),
    ("Procedures Followed", "Summarize the methodology used. Ensure at least 40-50 words."),
    ("Observations and Results", "Describe key findings and recorded data. Ensure at least 40-50 words."),
    ("Challenges and Issues Faced", "Mention any difficulties encountered. Ensure at least 30-40 words."),
    ("Learning Outcomes", "Summarize key takeaways from the session. Ensure at least 30-40 words."),
    ("Recommendations and Improvements", "Suggest enhancements for future sessions. Ensure at least 30-40 words."),
];
const GUEST_LECTURE_SECTIONS: &[(&str, &str)] = &[
    ("Event Summary", "Provide an overview, including the date, time, and location. Ensure at least 40-50 words."),
    ("Speaker Details", "Give background information about the speaker. Ensure at least 40-50 words."),
    ("Topic Summary", "Summarize the key aspects of the lecture. Ensure at least 40-50 words."),
    ("Key Discussions and Insights", "Detail the main discussions and takeaways. Ensure at least 40-50 words."),
    ("Audience Engagement and Feedback", "Describe interactions and participant responses. Ensure at least 30-40 words."),
    ("Impact and Learning Outcomes", "Summarize key learnings and benefits for attendees. Ensure at least 30-40 words."),
    ("Future Recommendations", "Suggest improvements for future guest lectures. Ensure at least 30-40 words."),
    ("Acknowledgments", "Thank contributors, sponsors, and organizers. Ensure at least 20-30 words."),
];

/// 문서 종류별 섹션 구조를 알려주는 시스템 프롬프트
fn system_prompt() -> String {
    let structures = [
        ("Minutes of Department Meeting", MINUTES_SECTIONS),
        ("Lab Session Report", LAB_SESSION_SECTIONS),
        ("Guest Lecture Report", GUEST_LECTURE_SECTIONS),
    ];

    let mut prompt = String::from(
        "You are an expert in creating formal academic and professional reports.\n\
         Generate a comprehensive and detailed report based on the selected event type. \
         All content describes a completed event and is written in the past tense. \
         Use the following section structures:\n",
    );

    for (title, sections) in structures {
        let body: serde_json::Map<String, Value> = sections
            .iter()
            .map(|(name, guide)| (name.to_string(), Value::String(guide.to_string())))
            .collect();
        let shape = json!({ "sections": body });
        prompt.push_str(&format!("\n- '{title}':\n{shape:#}\n"));
    }

    prompt.push_str(
        "\nThe report must be formal and professional, exceeding 300 words where necessary.\n\
         Do not include markdown formatting, code blocks, or triple backticks.\n\
         Return only the raw JSON object, with no explanations outside it.\n\
         Ensure all JSON syntax is correct with proper use of commas, quotes, and braces.\n",
    );
    prompt
}

/// 수집된 필드를 나열한 사용자 프롬프트
fn user_prompt(request: &GenerationRequest) -> String {
    let fields_text: String = request
        .fields
        .iter()
        .map(|(name, value)| match value {
            Value::String(text) => format!("# {name}:\n{text}\n"),
            other => format!("# {name}:\n{other}\n"),
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Please generate a detailed {} document using these details:\n\n{}\n\
         Requirements:\n\
         - Format the response as a JSON object with sections as specified in the system prompt\n\
         - Only return the JSON object, with no explanation or markdown around it\n\
         - Use formal academic language\n\
         - Include specific details from the provided information\n\
         - The total document should be at least 300-350 words\n\
         - Develop each section with relevant context and concrete examples\n",
        request.document_type, fields_text
    )
}
