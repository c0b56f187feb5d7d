//! Generation backend seam.
//!
//! The session engine and the verifier only see [`GenerationBackend`]; the
//! Gemini client is one implementation, tests supply scripted ones.
pub mod gemini;

pub use gemini::GeminiBackend;

use crate::registry::{FunctionDeclaration, Schema};
use crate::transcript::{FunctionCall, Turn};
use async_trait::async_trait;
use futures_util::stream::BoxStream;

pub const CHAT_TEMPERATURE: f32 = 0.5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: i64,
    pub output_tokens: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GenerationEvent {
    Text(String),
    FunctionCall(FunctionCall),
    /// Token counts for the whole request. Sent once, after the last chunk.
    Usage(Usage),
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub model: String,
    pub system_instruction: Option<String>,
    pub turns: Vec<Turn>,
    /// `None` withholds tools entirely, so the model has to answer in text.
    pub tools: Option<Vec<FunctionDeclaration>>,
    pub temperature: f32,
    /// Constrains the reply to JSON of this shape.
    pub response_schema: Option<Schema>,
}

impl GenerationRequest {
    pub fn chat(model: &str, system_instruction: String, turns: Vec<Turn>) -> Self {
        Self {
            model: model.to_string(),
            system_instruction: Some(system_instruction),
            turns,
            tools: None,
            temperature: CHAT_TEMPERATURE,
            response_schema: None,
        }
    }

    pub fn with_tools(mut self, tools: Vec<FunctionDeclaration>) -> Self {
        self.tools = Some(tools);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationResponse {
    pub text: String,
    pub usage: Usage,
}

pub type EventStream = BoxStream<'static, anyhow::Result<GenerationEvent>>;

#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Start a streamed generation. Errors before the first chunk come back
    /// here; errors mid-stream come through the stream.
    async fn stream(&self, request: GenerationRequest) -> anyhow::Result<EventStream>;

    async fn generate(&self, request: GenerationRequest) -> anyhow::Result<GenerationResponse>;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Replays canned streams and single-shot replies in order, recording
    /// every request it receives.
    #[derive(Default)]
    pub struct ScriptedBackend {
        streams: Mutex<VecDeque<Vec<Result<GenerationEvent, String>>>>,
        replies: Mutex<VecDeque<anyhow::Result<GenerationResponse>>>,
        requests: Mutex<Vec<GenerationRequest>>,
        generate_delay: Option<Duration>,
    }

    impl ScriptedBackend {
        pub fn with_streams(streams: Vec<Vec<GenerationEvent>>) -> Self {
            let streams = streams
                .into_iter()
                .map(|events| events.into_iter().map(Ok).collect())
                .collect();
            Self {
                streams: Mutex::new(streams),
                ..Self::default()
            }
        }

        /// Queue a stream that yields `events` and then fails.
        pub fn then_fail(self, events: Vec<GenerationEvent>, message: &str) -> Self {
            let mut stream: Vec<_> = events.into_iter().map(Ok).collect();
            stream.push(Err(message.to_string()));
            self.streams.lock().unwrap().push_back(stream);
            self
        }

        pub fn reply(self, reply: anyhow::Result<GenerationResponse>) -> Self {
            self.replies.lock().unwrap().push_back(reply);
            self
        }

        pub fn delay_generate(mut self, delay: Duration) -> Self {
            self.generate_delay = Some(delay);
            self
        }

        pub fn requests(&self) -> Vec<GenerationRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl GenerationBackend for ScriptedBackend {
        async fn stream(&self, request: GenerationRequest) -> anyhow::Result<EventStream> {
            self.requests.lock().unwrap().push(request);
            let events = self
                .streams
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| anyhow::anyhow!("no scripted stream left"))?;
            Ok(Box::pin(futures_util::stream::iter(
                events.into_iter().map(|event| event.map_err(anyhow::Error::msg)),
            )))
        }

        async fn generate(&self, request: GenerationRequest) -> anyhow::Result<GenerationResponse> {
            self.requests.lock().unwrap().push(request);
            if let Some(delay) = self.generate_delay {
                tokio::time::sleep(delay).await;
            }
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(anyhow::anyhow!("no scripted reply left")))
        }
    }
}
