use eventsource_stream::Eventsource;
use futures_util::{future, StreamExt};
use reqwest::{header, Client, Response};
use serde::{Deserialize, Serialize};

use crate::config::UpstreamConfig;
use crate::connectors::{Connector, ConnectorResponse};
use crate::core::entities::{Completion, StreamEvent, UpstreamMessage, UpstreamRequest, Usage};
use crate::error::RelayError;
use crate::metrics;

pub const SYSTEM_PROMPT: &str =
    "You are a helpful, harmless, and honest AI assistant. Provide clear and accurate responses.";

pub struct AnthropicConnector {
    client: Client,
    api_key: String,
    base_url: String,
    api_version: String,
    request_timeout: std::time::Duration,
}

impl AnthropicConnector {
    pub fn new(cfg: &UpstreamConfig, api_key: String) -> Result<Self, RelayError> {
        // Client-wide timeout stays unset so long streams survive; blocking calls set one per request.
        let client = Client::builder()
            .connect_timeout(cfg.connect_timeout())
            .read_timeout(cfg.stream_idle_timeout())
            .build()
            .map_err(|e| RelayError::Internal(e.to_string()))?;

        tracing::info!(base_url = %cfg.base_url, "Anthropic connector initialized");

        Ok(Self {
            client,
            api_key,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_version: cfg.api_version.clone(),
            request_timeout: cfg.request_timeout(),
        })
    }

    fn request(&self, body: &MessagesRequest<'_>) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}/v1/messages", self.base_url))
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", &self.api_version)
            .json(body)
    }
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: &'static str,
    messages: &'a [UpstreamMessage],
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ResponseBlock>,
    usage: Usage,
}

#[derive(Deserialize)]
struct ResponseBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ApiError,
}

#[derive(Deserialize)]
struct ApiError {
    message: String,
}

/// Turns a non-2xx response into an upstream error carrying the provider's message.
async fn upstream_failure(resp: Response) -> RelayError {
    let status = resp.status();
    let text = resp.text().await.unwrap_or_default();
    metrics::UPSTREAM_ERRORS
        .with_label_values(&[status.as_str()])
        .inc();
    match serde_json::from_str::<ErrorEnvelope>(&text) {
        Ok(env) => RelayError::Upstream(env.error.message),
        Err(_) => RelayError::Upstream(format!("status {status}: {text}")),
    }
}

#[async_trait::async_trait]
impl Connector for AnthropicConnector {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    async fn invoke(&self, req: UpstreamRequest) -> Result<ConnectorResponse, RelayError> {
        let body = MessagesRequest {
            model: &req.model,
            max_tokens: req.max_tokens,
            temperature: req.temperature,
            system: SYSTEM_PROMPT,
            messages: &req.messages,
            stream: req.stream,
        };

        if req.stream {
            let resp = self.request(&body).send().await?;
            if !resp.status().is_success() {
                return Err(upstream_failure(resp).await);
            }

            let mut decoder = StreamDecoder::default();
            let stream = resp
                .bytes_stream()
                .eventsource()
                .filter_map(move |item| {
                    let out = match item {
                        Ok(event) => decoder.decode(&event.data),
                        Err(e) => {
                            metrics::UPSTREAM_ERRORS.with_label_values(&["stream"]).inc();
                            Some(StreamEvent::Error(e.to_string()))
                        }
                    };
                    future::ready(out)
                })
                // Transport errors can repeat on every poll; nothing follows the first one.
                .scan(false, |failed, event| {
                    if *failed {
                        return future::ready(None);
                    }
                    *failed = matches!(event, StreamEvent::Error(_));
                    future::ready(Some(event))
                });
            Ok(ConnectorResponse::Streaming(Box::pin(stream)))
        } else {
            let resp = self
                .request(&body)
                .timeout(self.request_timeout)
                .send()
                .await?;
            if !resp.status().is_success() {
                return Err(upstream_failure(resp).await);
            }
            let parsed: MessagesResponse = resp.json().await?;
            let text = parsed
                .content
                .into_iter()
                .filter_map(|block| block.text)
                .collect::<String>();
            Ok(ConnectorResponse::NonStreaming(Completion {
                text,
                usage: parsed.usage,
            }))
        }
    }
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireEvent {
    MessageStart { message: WireMessage },
    ContentBlockDelta { delta: WireDelta },
    MessageDelta {
        #[serde(default)]
        usage: Option<WireUsage>,
    },
    MessageStop,
    Error { error: ApiError },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct WireMessage {
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireDelta {
    TextDelta { text: String },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct WireUsage {
    #[serde(default)]
    input_tokens: Option<u64>,
    #[serde(default)]
    output_tokens: Option<u64>,
}

/// Maps Messages API stream events onto relay events.
///
/// Input tokens arrive with `message_start`, output tokens with `message_delta`.
/// A `Usage` is produced only once both are known.
#[derive(Default)]
pub(crate) struct StreamDecoder {
    input_tokens: Option<u64>,
}

impl StreamDecoder {
    pub(crate) fn decode(&mut self, data: &str) -> Option<StreamEvent> {
        let event: WireEvent = match serde_json::from_str(data) {
            Ok(ev) => ev,
            Err(e) => {
                tracing::warn!(error = %e, "skipping malformed upstream event");
                return None;
            }
        };
        match event {
            WireEvent::MessageStart { message } => {
                self.input_tokens = message.usage.and_then(|u| u.input_tokens);
                None
            }
            WireEvent::ContentBlockDelta {
                delta: WireDelta::TextDelta { text },
            } => Some(StreamEvent::Token(text)),
            WireEvent::ContentBlockDelta { .. } => None,
            WireEvent::MessageDelta { usage } => {
                let usage = usage?;
                let input_tokens = usage.input_tokens.or(self.input_tokens)?;
                Some(StreamEvent::Usage(Usage {
                    input_tokens,
                    output_tokens: usage.output_tokens?,
                }))
            }
            WireEvent::MessageStop => Some(StreamEvent::Done),
            WireEvent::Error { error } => {
                metrics::UPSTREAM_ERRORS.with_label_values(&["stream"]).inc();
                Some(StreamEvent::Error(error.message))
            }
            WireEvent::Other => None,
        }
    }
}
