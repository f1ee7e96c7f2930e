//! DeepSeek backend implementation.
//!
//! Speaks the OpenAI-compatible `/chat/completions` endpoint with
//! DeepSeek's streaming extensions:
//! - `delta.reasoning_content` carries the reasoning channel for
//!   `deepseek-reasoner`, interleaved with `delta.content`
//! - the final usage chunk reports `prompt_cache_hit_tokens` and
//!   `completion_tokens_details.reasoning_tokens`
//!
//! The stream is parsed line-by-line as SSE; `data: [DONE]` ends it.

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use tracing::{debug, trace, warn};

use chatrelay_core::{BackendError, GenerationEvent, GenerationRequest, TextGenerator, TokenUsage};

const DEFAULT_BASE_URL: &str = "https://api.deepseek.com";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// DeepSeek chat completions backend.
pub struct DeepSeekGenerator {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl DeepSeekGenerator {
    /// Create a new DeepSeek backend.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_timeout(api_key, std::time::Duration::from_secs(300))
    }

    /// Create with a custom request timeout.
    pub fn with_timeout(api_key: impl Into<String>, timeout: std::time::Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            name: "deepseek".into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            client,
        }
    }

    /// Create with a custom base URL (e.g., for testing or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl TextGenerator for DeepSeekGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> std::result::Result<tokio::sync::mpsc::Receiver<GenerationEvent>, BackendError> {
        let url = format!("{}/chat/completions", self.base_url);
        let model = request.model.clone();

        let body = serde_json::json!({
            "model": request.model,
            "messages": request
                .messages
                .iter()
                .map(|m| serde_json::json!({
                    "role": m.role.as_str(),
                    "content": m.content,
                }))
                .collect::<Vec<_>>(),
            "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "temperature": request.temperature,
            "stream": true,
            "stream_options": { "include_usage": true },
        });

        debug!(backend = "deepseek", model = %model, "Opening generation stream");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BackendError::Timeout(e.to_string())
                } else {
                    BackendError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();

        if status == 429 {
            return Err(BackendError::RateLimited {
                retry_after_secs: 5,
            });
        }
        if status == 401 || status == 403 {
            return Err(BackendError::AuthenticationFailed(
                "Invalid DeepSeek API key".into(),
            ));
        }
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "DeepSeek API error");
            return Err(BackendError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        let (tx, rx) = tokio::sync::mpsc::channel(64);

        tokio::spawn(pump_sse(response.bytes_stream(), model, tx));

        Ok(rx)
    }
}

/// Consume one SSE byte stream and emit generation events.
///
/// The stream is complete only once `data: [DONE]` arrives; a stream
/// that ends without it was cut off, so the accumulated partial output
/// is reported as an `Error` event and never as `Finish`. Downstream
/// treats that as "discard, do not persist".
async fn pump_sse<B, E>(
    mut byte_stream: impl futures::Stream<Item = std::result::Result<B, E>> + Unpin,
    model: String,
    tx: tokio::sync::mpsc::Sender<GenerationEvent>,
) where
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut buffer = String::new();

    // Accumulated for the terminal Finish event
    let mut text = String::new();
    let mut reasoning = String::new();
    let mut model_id = model;
    let mut usage: Option<TokenUsage> = None;
    let mut done = false;

    'outer: while let Some(chunk_result) = byte_stream.next().await {
        let bytes = match chunk_result {
            Ok(b) => b,
            Err(e) => {
                let _ = tx
                    .send(GenerationEvent::Error {
                        message: format!("stream interrupted: {e}"),
                    })
                    .await;
                return;
            }
        };

        buffer.push_str(&String::from_utf8_lossy(bytes.as_ref()));

        while let Some(line_end) = buffer.find('\n') {
            let line = buffer[..line_end].trim_end_matches('\r').to_string();
            buffer = buffer[line_end + 1..].to_string();

            if line.is_empty() || line.starts_with(':') {
                continue;
            }

            let Some(data) = line.strip_prefix("data: ") else {
                continue;
            };
            let data = data.trim();
            if data.is_empty() {
                continue;
            }
            if data == "[DONE]" {
                done = true;
                break 'outer;
            }

            let chunk: StreamChunk = match serde_json::from_str(data) {
                Ok(c) => c,
                Err(e) => {
                    trace!(error = %e, data = %data, "Ignoring unparseable DeepSeek SSE");
                    continue;
                }
            };

            if !chunk.model.is_empty() {
                model_id = chunk.model;
            }

            if let Some(u) = chunk.usage {
                usage = Some(u.into_token_usage());
            }

            let Some(choice) = chunk.choices.into_iter().next() else {
                continue;
            };

            if let Some(r) = choice.delta.reasoning_content {
                if !r.is_empty() {
                    reasoning.push_str(&r);
                    if tx
                        .send(GenerationEvent::ReasoningDelta { text: r })
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
            }

            if let Some(t) = choice.delta.content {
                if !t.is_empty() {
                    text.push_str(&t);
                    if tx.send(GenerationEvent::TextDelta { text: t }).await.is_err() {
                        return;
                    }
                }
            }
        }
    }

    if !done {
        warn!("DeepSeek stream ended without [DONE]; discarding partial output");
        let _ = tx
            .send(GenerationEvent::Error {
                message: "stream ended before completion".into(),
            })
            .await;
        return;
    }

    let _ = tx
        .send(GenerationEvent::Finish {
            text,
            reasoning,
            model_id,
            usage,
        })
        .await;
}

// --- DeepSeek wire types ---

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    model: String,
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
    #[serde(default)]
    prompt_cache_hit_tokens: u32,
    #[serde(default)]
    completion_tokens_details: Option<CompletionTokensDetails>,
}

#[derive(Debug, Deserialize)]
struct CompletionTokensDetails {
    #[serde(default)]
    reasoning_tokens: u32,
}

impl ApiUsage {
    fn into_token_usage(self) -> TokenUsage {
        TokenUsage {
            input_tokens: self.prompt_tokens,
            output_tokens: self.completion_tokens,
            total_tokens: self.total_tokens,
            cached_input_tokens: self.prompt_cache_hit_tokens,
            reasoning_tokens: self
                .completion_tokens_details
                .map(|d| d.reasoning_tokens)
                .unwrap_or(0),
        }
    }
}
