//! Gemini generation client.
//!
//! Streams `streamGenerateContent` as server-sent events and turns each
//! chunk into [`GenerationEvent`]s. Token usage is cumulative across chunks,
//! so only the last report is forwarded, once the stream ends.

use super::{EventStream, GenerationBackend, GenerationEvent, GenerationRequest, GenerationResponse, Usage};
use crate::registry::{FunctionDeclaration, Schema, SchemaType};
use crate::transcript::{FunctionCall, Turn};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolSet>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_call: Option<WireFunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_response: Option<WireFunctionResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireFunctionResponse {
    name: String,
    response: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolSet {
    function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    candidate_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<Schema>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: i64,
    #[serde(default)]
    candidates_token_count: i64,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

impl From<&UsageMetadata> for Usage {
    fn from(meta: &UsageMetadata) -> Self {
        Usage {
            input_tokens: meta.prompt_token_count,
            output_tokens: meta.candidates_token_count,
        }
    }
}

fn text_part(text: &str) -> Part {
    Part {
        text: Some(text.to_string()),
        ..Part::default()
    }
}

/// Map transcript turns onto `contents`, merging consecutive turns with the
/// same role into one entry.
fn to_contents(turns: &[Turn]) -> Vec<Content> {
    let mut contents: Vec<Content> = Vec::new();
    for turn in turns {
        let part = match turn {
            Turn::User { text } | Turn::ModelText { text } => text_part(text),
            Turn::ModelCall { call } => Part {
                function_call: Some(WireFunctionCall {
                    name: call.name.clone(),
                    args: call.args.clone(),
                }),
                ..Part::default()
            },
            Turn::Function { name, response } => {
                let response = match response {
                    Value::Object(_) => response.clone(),
                    other => json!({ "result": other }),
                };
                Part {
                    function_response: Some(WireFunctionResponse {
                        name: name.clone(),
                        response,
                    }),
                    ..Part::default()
                }
            }
        };
        let role = turn.role();
        match contents.last_mut() {
            Some(last) if last.role.as_deref() == Some(role) => last.parts.push(part),
            _ => contents.push(Content {
                role: Some(role.to_string()),
                parts: vec![part],
            }),
        }
    }
    contents
}

/// Parameterless object schemas are rejected by the API; declare those
/// functions without parameters instead.
fn to_wire_declaration(declaration: &FunctionDeclaration) -> FunctionDeclaration {
    let mut declaration = declaration.clone();
    if let Some(params) = &declaration.parameters {
        if params.schema_type == SchemaType::Object && params.properties.is_empty() {
            declaration.parameters = None;
        }
    }
    declaration
}

fn build_body(request: &GenerationRequest) -> GenerateContentRequest {
    let tools = match &request.tools {
        Some(declarations) if !declarations.is_empty() => vec![ToolSet {
            function_declarations: declarations.iter().map(to_wire_declaration).collect(),
        }],
        _ => Vec::new(),
    };
    GenerateContentRequest {
        contents: to_contents(&request.turns),
        system_instruction: request.system_instruction.as_deref().map(|text| Content {
            role: None,
            parts: vec![text_part(text)],
        }),
        tools,
        generation_config: GenerationConfig {
            temperature: request.temperature,
            candidate_count: 1,
            response_mime_type: request.response_schema.as_ref().map(|_| "application/json".to_string()),
            response_schema: request.response_schema.clone(),
        },
    }
}

/// Events carried by one response chunk, in part order.
fn chunk_events(chunk: &GenerateContentResponse) -> anyhow::Result<Vec<GenerationEvent>> {
    if let Some(error) = &chunk.error {
        return Err(anyhow::anyhow!("Gemini error {}: {}", error.code, error.message));
    }
    let mut events = Vec::new();
    let Some(candidate) = chunk.candidates.first() else {
        return Ok(events);
    };
    if let Some(reason) = &candidate.finish_reason {
        debug!("Gemini finished with {}", reason);
    }
    for part in candidate.content.iter().flat_map(|c| c.parts.iter()) {
        if let Some(text) = part.text.as_deref().filter(|t| !t.is_empty()) {
            events.push(GenerationEvent::Text(text.to_string()));
        }
        if let Some(call) = &part.function_call {
            events.push(GenerationEvent::FunctionCall(FunctionCall {
                name: call.name.clone(),
                args: call.args.clone(),
            }));
        }
    }
    Ok(events)
}

fn sse_data(line: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(line);
    let line = line.trim();
    line.strip_prefix("data:").map(|data| data.trim_start().to_string())
}

pub struct GeminiBackend {
    base_url: String,
    api_key: String,
    http_client: reqwest::Client,
}

impl GeminiBackend {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            http_client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    fn model_url(&self, model: &str, method: &str) -> String {
        format!("{}/v1beta/models/{}:{}", self.base_url, model, method)
    }

    async fn post(&self, url: String, query: &[(&str, &str)], body: &GenerateContentRequest) -> anyhow::Result<reqwest::Response> {
        let response = self
            .http_client
            .post(url)
            .query(query)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Gemini request failed: {}", e))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("Gemini returned {}: {}", status, body));
        }
        Ok(response)
    }
}

#[async_trait]
impl GenerationBackend for GeminiBackend {
    async fn stream(&self, request: GenerationRequest) -> anyhow::Result<EventStream> {
        debug!(model = %request.model, turns = request.turns.len(), "starting streamed generation");
        let body = build_body(&request);
        let response = self
            .post(self.model_url(&request.model, "streamGenerateContent"), &[("alt", "sse")], &body)
            .await?;

        let byte_stream = response.bytes_stream();
        let events = async_stream::try_stream! {
            let mut buffer: Vec<u8> = Vec::new();
            let mut usage: Option<Usage> = None;
            futures_util::pin_mut!(byte_stream);
            loop {
                let next = byte_stream.next().await;
                let finished = next.is_none();
                match next {
                    Some(chunk) => {
                        let chunk = chunk.map_err(|e| anyhow::anyhow!("Stream read error: {}", e))?;
                        buffer.extend_from_slice(&chunk);
                    }
                    // Flush a final line with no trailing newline.
                    None => buffer.push(b'\n'),
                }
                while let Some(newline) = buffer.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=newline).collect();
                    let Some(data) = sse_data(&line) else {
                        continue;
                    };
                    if data.is_empty() || data == "[DONE]" {
                        continue;
                    }
                    let parsed: GenerateContentResponse = serde_json::from_str(&data)
                        .map_err(|e| anyhow::anyhow!("Failed to parse Gemini chunk: {}", e))?;
                    if let Some(meta) = &parsed.usage_metadata {
                        usage = Some(meta.into());
                    }
                    for event in chunk_events(&parsed)? {
                        yield event;
                    }
                }
                if finished {
                    break;
                }
            }
            match usage {
                Some(usage) => yield GenerationEvent::Usage(usage),
                None => warn!("Gemini stream ended without usage metadata"),
            }
        };
        Ok(Box::pin(events))
    }

    async fn generate(&self, request: GenerationRequest) -> anyhow::Result<GenerationResponse> {
        let body = build_body(&request);
        let response = self
            .post(self.model_url(&request.model, "generateContent"), &[], &body)
            .await?;
        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to parse Gemini response: {}", e))?;

        let mut text = String::new();
        for event in chunk_events(&parsed)? {
            if let GenerationEvent::Text(chunk) = event {
                text.push_str(&chunk);
            }
        }
        Ok(GenerationResponse {
            text,
            usage: parsed.usage_metadata.as_ref().map(Usage::from).unwrap_or_default(),
        })
    }
}
