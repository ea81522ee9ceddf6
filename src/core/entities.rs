use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Assistant,
}

/// Content of a prior turn, exactly as the client sent it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TurnContent {
    PlainText(String),
    BlockList(Vec<serde_json::Value>),
}

impl Default for TurnContent {
    fn default() -> Self {
        TurnContent::PlainText(String::new())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub content: TurnContent,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ImageSource {
    Base64 { media_type: String, data: String },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    Image { source: ImageSource },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Attachment {
    pub media_type: String,
    pub data: String,
}

/// A validated chat request. `message` and `attachment` are never both `None`.
#[derive(Clone, Debug)]
pub struct ChatRequest {
    pub message: Option<String>,
    pub model: String,
    pub max_output_tokens: u32,
    pub temperature: f32,
    pub history: Vec<ConversationTurn>,
    pub attachment: Option<Attachment>,
    pub stream: bool,
}

/// Message content in the shape the upstream accepts: a bare string or a block list.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
    Passthrough(Vec<serde_json::Value>),
}

impl From<TurnContent> for MessageContent {
    fn from(content: TurnContent) -> Self {
        match content {
            TurnContent::PlainText(text) => MessageContent::Text(text),
            TurnContent::BlockList(blocks) => MessageContent::Passthrough(blocks),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct UpstreamMessage {
    pub role: Role,
    pub content: MessageContent,
}

#[derive(Clone, Debug)]
pub struct UpstreamRequest {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub messages: Vec<UpstreamMessage>,
    pub stream: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Completion {
    pub text: String,
    pub usage: Usage,
}

#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    Token(String),
    Usage(Usage),
    Error(String),
    Done,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub id: String,
    #[serde(rename = "name")]
    pub display_name: String,
    pub description: String,
}
