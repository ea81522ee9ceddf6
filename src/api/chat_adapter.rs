use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::config::{ChatDefaults, Limits};
use crate::core::entities::{
    Attachment, ChatRequest, Completion, ContentBlock, ConversationTurn, ImageSource,
    MessageContent, Role, UpstreamMessage, UpstreamRequest, Usage,
};
use crate::error::RelayError;

const DEFAULT_FILE_TYPE: &str = "image/png";
const SUPPORTED_IMAGE_TYPES: &[&str] = &["image/jpeg", "image/png", "image/gif", "image/webp"];

/// Body of `POST /api/chat` as the frontend sends it.
#[derive(Debug, Default, Deserialize)]
pub struct ChatPayload {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub conversation_history: Vec<ConversationTurn>,
    #[serde(default)]
    pub file_data: Option<String>,
    #[serde(default)]
    pub file_type: Option<String>,
    #[serde(default)]
    pub stream: bool,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub response: String,
    pub model: String,
    pub usage: Usage,
}

/// Applies defaults and checks the payload. No upstream call happens on failure.
pub fn to_chat_request(
    payload: ChatPayload,
    defaults: &ChatDefaults,
    limits: &Limits,
) -> Result<ChatRequest, RelayError> {
    let message = payload.message.filter(|m| !m.is_empty());
    let file_data = payload.file_data.filter(|d| !d.is_empty());

    if message.is_none() && file_data.is_none() {
        return Err(RelayError::Validation("Message or file is required".into()));
    }

    let attachment = match file_data {
        Some(data) => {
            let media_type = payload
                .file_type
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| DEFAULT_FILE_TYPE.to_string());
            Some(check_attachment(media_type, data, limits)?)
        }
        None => None,
    };

    let max_output_tokens = payload.max_tokens.unwrap_or(defaults.max_tokens);
    if max_output_tokens == 0 {
        return Err(RelayError::Validation("max_tokens must be positive".into()));
    }

    let temperature = payload.temperature.unwrap_or(defaults.temperature);
    if !(0.0..=2.0).contains(&temperature) {
        return Err(RelayError::Validation(format!(
            "temperature must be between 0 and 2, got {temperature}"
        )));
    }

    let model = payload
        .model
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| defaults.model.clone());

    Ok(ChatRequest {
        message,
        model,
        max_output_tokens,
        temperature,
        history: payload.conversation_history,
        attachment,
        stream: payload.stream,
    })
}

fn check_attachment(
    media_type: String,
    data: String,
    limits: &Limits,
) -> Result<Attachment, RelayError> {
    if !SUPPORTED_IMAGE_TYPES.contains(&media_type.as_str()) {
        return Err(RelayError::Validation(format!(
            "Error processing file: unsupported file type '{media_type}'"
        )));
    }
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(data.as_bytes())
        .map_err(|e| RelayError::Validation(format!("Error processing file: {e}")))?;
    if decoded.len() > limits.max_attachment_bytes {
        return Err(RelayError::Validation(format!(
            "Error processing file: attachment is {} bytes, limit is {}",
            decoded.len(),
            limits.max_attachment_bytes
        )));
    }
    Ok(Attachment { media_type, data })
}

/// Builds the upstream message list: history in order, then the current user turn.
pub fn normalize(req: ChatRequest) -> Result<UpstreamRequest, RelayError> {
    if req.message.as_deref().unwrap_or("").is_empty() && req.attachment.is_none() {
        return Err(RelayError::Validation("Message or file is required".into()));
    }

    let mut messages: Vec<UpstreamMessage> = req
        .history
        .into_iter()
        .map(|turn| UpstreamMessage {
            role: turn.role,
            content: turn.content.into(),
        })
        .collect();

    messages.push(UpstreamMessage {
        role: Role::User,
        content: current_turn_content(req.message, req.attachment),
    });

    Ok(UpstreamRequest {
        model: req.model,
        max_tokens: req.max_output_tokens,
        temperature: req.temperature,
        messages,
        stream: req.stream,
    })
}

fn current_turn_content(message: Option<String>, attachment: Option<Attachment>) -> MessageContent {
    let mut blocks = Vec::with_capacity(2);
    if let Some(text) = message.as_ref().filter(|m| !m.is_empty()) {
        blocks.push(ContentBlock::Text { text: text.clone() });
    }
    if let Some(att) = attachment {
        blocks.push(ContentBlock::Image {
            source: ImageSource::Base64 {
                media_type: att.media_type,
                data: att.data,
            },
        });
    }

    if blocks.is_empty() {
        return MessageContent::Text(message.unwrap_or_default());
    }
    // A lone text block collapses to a bare string, like plain history turns.
    if let [ContentBlock::Text { text }] = blocks.as_slice() {
        return MessageContent::Text(text.clone());
    }
    MessageContent::Blocks(blocks)
}

pub fn final_response(model: String, completion: Completion) -> ChatResponse {
    ChatResponse {
        response: completion.text,
        model,
        usage: completion.usage,
    }
}
