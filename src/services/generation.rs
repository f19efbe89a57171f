//! # 생성 트리거 (Generation Trigger)
//!
//! 콘텐츠 생성기와의 연결을 **메시지 스트림 추상화**로 다룹니다.
//!
//! ```text
//! Generator::open() → GenerationStream
//!     stream.send(request)
//!     loop { stream.next_message() }   // token*, 그 다음 complete 또는 error
//!     stream.close()
//! ```
//!
//! 실제 구현(`llm::LlmGenerator`)은 HTTP SSE를 쓰지만, 이 모듈은 트레이트만 보므로
//! 테스트에서는 미리 정해 둔 메시지를 내보내는 가짜 생성기로 바꿔 끼울 수 있습니다.
//!
//! ## async_trait
//! 트레이트 안의 `async fn`을 `Box<dyn Trait>`로 쓰려면 `#[async_trait]` 매크로가 필요합니다.
//! 매크로가 반환 타입을 `Pin<Box<dyn Future + Send>>`로 바꿔 줍니다.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;

use crate::models::{GenerationOutcome, GenerationRequest, StreamMessage};

/// 종료 메시지 없이 연결이 끊겼을 때 사용자에게 보여줄 문구
pub const TRANSPORT_FAILURE_MESSAGE: &str =
    "The connection to the generation service was lost before the document was finished";

/// 생성기 연결 자체의 실패 (생성기가 보내는 `error` 메시지와는 다름)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    /// API 키가 없음
    #[error("generation service is not configured")]
    NotConfigured,

    /// 같은 스트림에 요청을 두 번 보냄
    #[error("a request was already sent on this stream")]
    AlreadySent,

    /// 네트워크/프로토콜 오류
    #[error("transport error: {0}")]
    Transport(String),
}

/// 생성기와 열린 연결 하나
#[async_trait]
pub trait GenerationStream: Send {
    /// 요청 메시지를 보냅니다 (스트림당 한 번).
    async fn send(&mut self, request: GenerationRequest) -> Result<(), GenerationError>;

    /// 다음 수신 메시지. 연결이 닫히면 None입니다.
    async fn next_message(&mut self) -> Option<Result<StreamMessage, GenerationError>>;

    /// 연결을 닫습니다. 여러 번 불러도 됩니다.
    async fn close(&mut self);
}

/// 스트림을 여는 쪽
///
/// `Send + Sync`: `Arc<dyn Generator>`로 여러 태스크가 공유하기 위한 경계
#[async_trait]
pub trait Generator: Send + Sync {
    async fn open(&self) -> Result<Box<dyn GenerationStream>, GenerationError>;
}

/// 스트림을 열고 요청까지 보냅니다. 보내기에 실패하면 스트림을 닫고 에러를 돌려줍니다.
pub async fn open_stream(
    generator: &dyn Generator,
    request: GenerationRequest,
) -> Result<Box<dyn GenerationStream>, GenerationError> {
    let mut stream = generator.open().await?;
    if let Err(err) = stream.send(request).await {
        stream.close().await;
        return Err(err);
    }
    Ok(stream)
}

/// 토큰 조각을 도착 순서대로 이어 붙이는 버퍼
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TokenAccumulator {
    buffer: String,
}

impl TokenAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 조각을 덧붙이고 지금까지의 버퍼를 돌려줍니다.
    pub fn push(&mut self, fragment: &str) -> &str {
        self.buffer.push_str(fragment);
        &self.buffer
    }

    pub fn as_str(&self) -> &str {
        &self.buffer
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

/// 생성 한 번을 끝까지 실행합니다.
///
/// - `token`: 버퍼에 덧붙이고 `progress`로 현재 버퍼를 알립니다.
/// - `complete`: 최종 내용이 버퍼를 대체합니다.
/// - `error`: 버퍼를 버리고 실패로 끝냅니다.
/// - 수신 오류나 종료 메시지 없는 끊김: 일반 전송 실패 메시지로 실패
///
/// 어떤 경우든 스트림은 닫고 돌아갑니다. 자동 재시도는 하지 않습니다.
pub async fn run_generation(
    generator: &dyn Generator,
    request: GenerationRequest,
    progress: &watch::Sender<String>,
) -> GenerationOutcome {
    let document_type = request.document_type.clone();
    let mut stream = match open_stream(generator, request).await {
        Ok(stream) => stream,
        Err(err) => {
            tracing::warn!("Could not start generation for {}: {}", document_type, err);
            return GenerationOutcome::Failed {
                message: err.to_string(),
            };
        }
    };

    let mut buffer = TokenAccumulator::new();
    progress.send_replace(String::new());

    let outcome = loop {
        match stream.next_message().await {
            Some(Ok(StreamMessage::Token { content })) => {
                let partial = buffer.push(&content).to_string();
                // send_replace: 구독자가 없어도 값을 바꿉니다 (send는 에러를 돌려줌).
                progress.send_replace(partial);
            }
            Some(Ok(StreamMessage::Complete {
                content,
                word_count,
                sections,
                ..
            })) => {
                progress.send_replace(content.clone());
                break GenerationOutcome::Completed {
                    content,
                    word_count,
                    sections,
                };
            }
            Some(Ok(StreamMessage::Error { error })) => {
                buffer.clear();
                progress.send_replace(String::new());
                break GenerationOutcome::Failed { message: error };
            }
            Some(Ok(StreamMessage::Status { status, message })) => {
                tracing::debug!("Generation status {}: {}", status, message);
            }
            Some(Ok(StreamMessage::Warning { message })) => {
                tracing::warn!("Generation warning: {}", message);
            }
            Some(Err(err)) => {
                tracing::warn!("Generation stream failed: {}", err);
                progress.send_replace(String::new());
                break GenerationOutcome::Failed {
                    message: TRANSPORT_FAILURE_MESSAGE.to_string(),
                };
            }
            None => {
                tracing::warn!("Generation stream closed without a terminal message");
                progress.send_replace(String::new());
                break GenerationOutcome::Failed {
                    message: TRANSPORT_FAILURE_MESSAGE.to_string(),
                };
            }
        }
    };

    stream.close().await;
    outcome
}

/// 테스트용 가짜 생성기
///
/// 미리 정해 둔 메시지를 순서대로 내보냅니다. 다른 모듈의 테스트에서도 씁니다.
#[cfg(test)]
pub mod scripted {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::*;

    /// 스크립트 한 단계
    #[derive(Debug, Clone)]
    pub enum Step {
        Message(StreamMessage),
        /// 수신 오류
        Fail(String),
        /// 잠깐 멈춤 (취소 테스트용)
        Pause(Duration),
    }

    /// 열릴 때마다 같은 스크립트를 재생하는 생성기
    #[derive(Debug, Clone, Default)]
    pub struct ScriptedGenerator {
        script: Vec<Step>,
        /// 받은 요청들 (검증용)
        pub requests: Arc<Mutex<Vec<GenerationRequest>>>,
        /// 닫힌 스트림 수
        pub closed: Arc<Mutex<usize>>,
        pub refuse: Option<GenerationError>,
    }

    impl ScriptedGenerator {
        pub fn new(script: Vec<Step>) -> Self {
            Self {
                script,
                ..Self::default()
            }
        }

        /// `open()`부터 실패하는 생성기
        pub fn refusing(err: GenerationError) -> Self {
            Self {
                refuse: Some(err),
                ..Self::default()
            }
        }

        pub fn tokens_then(tokens: &[&str], terminal: StreamMessage) -> Self {
            let mut script: Vec<Step> = tokens
                .iter()
                .map(|t| {
                    Step::Message(StreamMessage::Token {
                        content: t.to_string(),
                    })
                })
                .collect();
            script.push(Step::Message(terminal));
            Self::new(script)
        }

        pub fn request_count(&self) -> usize {
            self.requests.lock().map(|r| r.len()).unwrap_or(0)
        }

        pub fn closed_count(&self) -> usize {
            self.closed.lock().map(|c| *c).unwrap_or(0)
        }
    }

    struct ScriptedStream {
        pending: VecDeque<Step>,
        sent: bool,
        requests: Arc<Mutex<Vec<GenerationRequest>>>,
        closed: Arc<Mutex<usize>>,
    }

    #[async_trait]
    impl Generator for ScriptedGenerator {
        async fn open(&self) -> Result<Box<dyn GenerationStream>, GenerationError> {
            if let Some(err) = &self.refuse {
                return Err(err.clone());
            }
            Ok(Box::new(ScriptedStream {
                pending: self.script.iter().cloned().collect(),
                sent: false,
                requests: Arc::clone(&self.requests),
                closed: Arc::clone(&self.closed),
            }))
        }
    }

    #[async_trait]
    impl GenerationStream for ScriptedStream {
        async fn send(&mut self, request: GenerationRequest) -> Result<(), GenerationError> {
            if self.sent {
                return Err(GenerationError::AlreadySent);
            }
            self.sent = true;
            self.requests.lock().unwrap().push(request);
            Ok(())
        }

        async fn next_message(&mut self) -> Option<Result<StreamMessage, GenerationError>> {
            loop {
                match self.pending.pop_front()? {
                    Step::Message(message) => return Some(Ok(message)),
                    Step::Fail(reason) => return Some(Err(GenerationError::Transport(reason))),
                    Step::Pause(duration) => tokio::time::sleep(duration).await,
                }
            }
        }

        async fn close(&mut self) {
            self.pending.clear();
            *self.closed.lock().unwrap() += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::Map;

    use super::scripted::{ScriptedGenerator, Step};
    use super::*;

    fn request() -> GenerationRequest {
        let mut fields = Map::new();
        fields.insert("Topic".to_string(), "Machine Learning".into());
        GenerationRequest {
            document_type: "GuestLecture".to_string(),
            fields,
        }
    }

    fn complete(content: &str) -> StreamMessage {
        StreamMessage::Complete {
            content: content.to_string(),
            word_count: content.split_whitespace().count() as u64,
            sections: Map::new(),
            metadata: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn complete_payload_replaces_token_buffer() {
        // 토큰 순서와 최종 내용이 달라도 최종 내용이 이깁니다.
        let generator = ScriptedGenerator::tokens_then(&["World", " ", "Hello"], complete("Hello World"));
        let (tx, rx) = watch::channel(String::new());

        let outcome = run_generation(&generator, request(), &tx).await;

        match outcome {
            GenerationOutcome::Completed {
                content,
                word_count,
                ..
            } => {
                assert_eq!(content, "Hello World");
                assert_eq!(word_count, 2);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(*rx.borrow(), "Hello World");
        assert_eq!(generator.request_count(), 1);
        assert_eq!(generator.closed_count(), 1);
    }

    #[tokio::test]
    async fn partial_buffer_is_observable_after_each_token() {
        let generator = ScriptedGenerator::new(vec![
            Step::Message(StreamMessage::Token {
                content: "Hello".to_string(),
            }),
            Step::Message(StreamMessage::Token {
                content: " ".to_string(),
            }),
            Step::Message(StreamMessage::Token {
                content: "World".to_string(),
            }),
            Step::Pause(std::time::Duration::from_millis(200)),
            Step::Message(complete("Hello World")),
        ]);
        let (tx, mut rx) = watch::channel(String::new());

        let task = tokio::spawn(async move { run_generation(&generator, request(), &tx).await });

        // 마지막 토큰 뒤 멈춘 사이에 누적 버퍼를 볼 수 있어야 합니다.
        rx.wait_for(|partial| partial == "Hello World").await.unwrap();
        let outcome = task.await.unwrap();
        assert!(matches!(outcome, GenerationOutcome::Completed { .. }));
    }

    #[tokio::test]
    async fn error_message_discards_buffer() {
        let generator = ScriptedGenerator::tokens_then(&["Hel", "lo"], StreamMessage::error("AI API error: quota exceeded"));
        let (tx, rx) = watch::channel(String::new());

        let outcome = run_generation(&generator, request(), &tx).await;

        assert_eq!(
            outcome,
            GenerationOutcome::Failed {
                message: "AI API error: quota exceeded".to_string()
            }
        );
        assert_eq!(*rx.borrow(), "");
        assert_eq!(generator.closed_count(), 1);
    }

    #[tokio::test]
    async fn close_without_terminal_is_transport_failure() {
        let generator = ScriptedGenerator::new(vec![Step::Message(StreamMessage::Token {
            content: "partial".to_string(),
        })]);
        let (tx, _rx) = watch::channel(String::new());

        let outcome = run_generation(&generator, request(), &tx).await;
        assert_eq!(
            outcome,
            GenerationOutcome::Failed {
                message: TRANSPORT_FAILURE_MESSAGE.to_string()
            }
        );
    }

    #[tokio::test]
    async fn receive_error_is_transport_failure() {
        let generator = ScriptedGenerator::new(vec![Step::Fail("connection reset".to_string())]);
        let (tx, _rx) = watch::channel(String::new());

        let outcome = run_generation(&generator, request(), &tx).await;
        assert_eq!(
            outcome,
            GenerationOutcome::Failed {
                message: TRANSPORT_FAILURE_MESSAGE.to_string()
            }
        );
        assert_eq!(generator.closed_count(), 1);
    }

    #[tokio::test]
    async fn status_and_warning_are_skipped() {
        let generator = ScriptedGenerator::new(vec![
            Step::Message(StreamMessage::status("processing", "Starting document generation...")),
            Step::Message(StreamMessage::Warning {
                message: "Response format was incorrect".to_string(),
            }),
            Step::Message(complete("Done")),
        ]);
        let (tx, _rx) = watch::channel(String::new());

        let outcome = run_generation(&generator, request(), &tx).await;
        assert!(matches!(outcome, GenerationOutcome::Completed { .. }));
    }

    #[tokio::test]
    async fn unconfigured_generator_fails_with_its_message() {
        let generator = ScriptedGenerator::refusing(GenerationError::NotConfigured);
        let (tx, _rx) = watch::channel(String::new());

        let outcome = run_generation(&generator, request(), &tx).await;
        assert_eq!(
            outcome,
            GenerationOutcome::Failed {
                message: "generation service is not configured".to_string()
            }
        );
        assert_eq!(generator.request_count(), 0);
    }

    #[test]
    fn accumulator_appends_in_order() {
        let mut acc = TokenAccumulator::new();
        acc.push("Hello");
        assert_eq!(acc.push(" World"), "Hello World");
        acc.clear();
        assert_eq!(acc.as_str(), "");
    }
}
