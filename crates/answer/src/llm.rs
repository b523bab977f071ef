use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;

pub const DEFAULT_TEMPERATURE: f32 = 0.3;

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";
const INVOKE_TIMEOUT: Duration = Duration::from_secs(120);
const OLLAMA_NUM_CTX: u32 = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One model-ready message. `image` is a data URI and only meaningful on
/// the final user message; each provider maps it to its own wire shape.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    pub image: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            image: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            image: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            image: None,
        }
    }

    pub fn user_with_image(content: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            image: Some(image.into()),
        }
    }
}

/// The model-provider seam: one call for a full answer, one for an
/// incremental token stream.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn invoke(&self, messages: &[ChatMessage]) -> Result<String>;
    async fn stream(&self, messages: &[ChatMessage])
    -> Result<BoxStream<'static, Result<String>>>;
}

/// Default model settings, overridable per request.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub model_type: String,
    pub model_name: String,
    pub ollama_base_url: String,
    pub openai_api_key: String,
    pub temperature: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_type: "ollama".to_string(),
            model_name: "llama3".to_string(),
            ollama_base_url: "http://localhost:11434".to_string(),
            openai_api_key: String::new(),
            temperature: DEFAULT_TEMPERATURE,
        }
    }
}

/// Per-request model override as sent by clients. `address` replaces the
/// API key for OpenAI and the base URL for Ollama; `temp` arrives as a
/// number or a string depending on the client.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelOverride {
    #[serde(rename = "type")]
    pub model_type: Option<String>,
    pub name: Option<String>,
    pub address: Option<String>,
    pub temp: Option<Value>,
}

impl ModelOverride {
    pub fn apply(&self, base: &ModelConfig) -> ModelConfig {
        let mut config = base.clone();
        if let Some(model_type) = &self.model_type {
            if !model_type.is_empty() {
                config.model_type = model_type.clone();
            }
        }
        if let Some(name) = &self.name {
            if !name.is_empty() {
                config.model_name = name.clone();
            }
        }
        if let Some(address) = &self.address {
            if !address.is_empty() {
                if config.model_type == "openai" {
                    config.openai_api_key = address.clone();
                } else {
                    config.ollama_base_url = address.clone();
                }
            }
        }
        if let Some(temp) = &self.temp {
            config.temperature = parse_temperature(temp);
        }
        config
    }
}

/// An unparsable temperature falls back to the default rather than
/// failing the request.
pub fn parse_temperature(value: &Value) -> f32 {
    match value {
        Value::Number(n) => n.as_f64().map_or(DEFAULT_TEMPERATURE, |f| f as f32),
        Value::String(s) => s.trim().parse().unwrap_or(DEFAULT_TEMPERATURE),
        _ => DEFAULT_TEMPERATURE,
    }
}

/// Pick the concrete provider for a config. Fails on an unknown model
/// type so a bad override can fall back to the default model.
pub fn build_model(config: &ModelConfig) -> Result<Box<dyn ChatModel>> {
    match config.model_type.as_str() {
        "openai" => Ok(Box::new(OpenAiChat::new(
            config.openai_api_key.clone(),
            config.model_name.clone(),
            config.temperature,
        ))),
        "ollama" => Ok(Box::new(OllamaChat::new(
            config.ollama_base_url.clone(),
            config.model_name.clone(),
            config.temperature,
        ))),
        other => anyhow::bail!("Unknown model type: {}", other),
    }
}

pub struct OllamaChat {
    base_url: String,
    model: String,
    temperature: f32,
    client: reqwest::Client,
}

impl OllamaChat {
    pub fn new(base_url: String, model: String, temperature: f32) -> Self {
        Self {
            base_url,
            model,
            temperature,
            client: reqwest::Client::new(),
        }
    }

    fn request_body(&self, messages: &[ChatMessage], stream: bool) -> Value {
        let messages: Vec<Value> = messages.iter().map(to_ollama_message).collect();
        json!({
            "model": self.model,
            "messages": messages,
            "stream": stream,
            "options": {
                "temperature": self.temperature,
                "num_ctx": OLLAMA_NUM_CTX,
            },
        })
    }
}

fn to_ollama_message(message: &ChatMessage) -> Value {
    let mut value = json!({
        "role": message.role.as_str(),
        "content": message.content,
    });
    if let Some(image) = &message.image {
        // Ollama takes raw base64 without the data-URI prefix.
        value["images"] = json!([strip_data_uri(image)]);
    }
    value
}

/// Drop a `data:image/...;base64,` prefix if present.
pub fn strip_data_uri(image: &str) -> &str {
    match image.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => image,
    }
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: OllamaChatMessage,
}

#[derive(Deserialize)]
struct OllamaChatMessage {
    content: String,
}

#[async_trait]
impl ChatModel for OllamaChat {
    async fn invoke(&self, messages: &[ChatMessage]) -> Result<String> {
        let url = format!("{}/api/chat", self.base_url);

        let response = self
            .client
            .post(&url)
            .timeout(INVOKE_TIMEOUT)
            .json(&self.request_body(messages, false))
            .send()
            .await
            .context("Failed to send request to Ollama")?;

        if !response.status().is_success() {
            anyhow::bail!("Ollama request failed: {}", response.status());
        }

        let chat_response: OllamaChatResponse = response
            .json()
            .await
            .context("Failed to parse Ollama response")?;

        Ok(chat_response.message.content)
    }

    async fn stream(
        &self,
        messages: &[ChatMessage],
    ) -> Result<BoxStream<'static, Result<String>>> {
        let url = format!("{}/api/chat", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&self.request_body(messages, true))
            .send()
            .await
            .context("Failed to send request to Ollama")?;

        if !response.status().is_success() {
            anyhow::bail!("Ollama request failed: {}", response.status());
        }

        // NDJSON: one chat fragment per line.
        let tokens = line_stream(response)
            .filter_map(|line| async move {
                match line {
                    Ok(line) => parse_ollama_line(&line).transpose(),
                    Err(e) => Some(Err(e)),
                }
            })
            .boxed();
        Ok(tokens)
    }
}

fn parse_ollama_line(line: &str) -> Result<Option<String>> {
    let value: Value = serde_json::from_str(line).context("Malformed Ollama stream line")?;
    if let Some(error) = value["error"].as_str() {
        anyhow::bail!("Ollama stream error: {}", error);
    }
    Ok(value["message"]["content"]
        .as_str()
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string()))
}

pub struct OpenAiChat {
    api_key: String,
    model: String,
    temperature: f32,
    client: reqwest::Client,
}

impl OpenAiChat {
    pub fn new(api_key: String, model: String, temperature: f32) -> Self {
        Self {
            api_key,
            model,
            temperature,
            client: reqwest::Client::new(),
        }
    }

    fn request_body(&self, messages: &[ChatMessage], stream: bool) -> Value {
        let messages: Vec<Value> = messages.iter().map(to_openai_message).collect();
        json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
            "stream": stream,
        })
    }
}

fn to_openai_message(message: &ChatMessage) -> Value {
    match &message.image {
        Some(image) => json!({
            "role": message.role.as_str(),
            "content": [
                { "type": "text", "text": message.content },
                { "type": "image_url", "image_url": { "url": image } },
            ],
        }),
        None => json!({
            "role": message.role.as_str(),
            "content": message.content,
        }),
    }
}

#[async_trait]
impl ChatModel for OpenAiChat {
    async fn invoke(&self, messages: &[ChatMessage]) -> Result<String> {
        let response = self
            .client
            .post(OPENAI_CHAT_URL)
            .bearer_auth(&self.api_key)
            .timeout(INVOKE_TIMEOUT)
            .json(&self.request_body(messages, false))
            .send()
            .await
            .context("Failed to send request to OpenAI")?;

        if !response.status().is_success() {
            anyhow::bail!("OpenAI request failed: {}", response.status());
        }

        let value: Value = response
            .json()
            .await
            .context("Failed to parse OpenAI response")?;

        value["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.to_string())
            .context("OpenAI response contained no content")
    }

    async fn stream(
        &self,
        messages: &[ChatMessage],
    ) -> Result<BoxStream<'static, Result<String>>> {
        let response = self
            .client
            .post(OPENAI_CHAT_URL)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(messages, true))
            .send()
            .await
            .context("Failed to send request to OpenAI")?;

        if !response.status().is_success() {
            anyhow::bail!("OpenAI request failed: {}", response.status());
        }

        // SSE: `data: {json}` lines, terminated by `data: [DONE]`.
        let tokens = line_stream(response)
            .filter_map(|line| async move {
                match line {
                    Ok(line) => parse_openai_line(&line).transpose(),
                    Err(e) => Some(Err(e)),
                }
            })
            .boxed();
        Ok(tokens)
    }
}

fn parse_openai_line(line: &str) -> Result<Option<String>> {
    let Some(data) = line.strip_prefix("data: ") else {
        return Ok(None);
    };
    if data.trim() == "[DONE]" {
        return Ok(None);
    }
    let value: Value = serde_json::from_str(data).context("Malformed OpenAI stream line")?;
    Ok(value["choices"][0]["delta"]["content"]
        .as_str()
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string()))
}

// Append a network chunk to `buf` and drain every complete line. Bytes
// after the last newline stay buffered, so a multi-byte character split
// across two chunks is never decoded in half.
fn drain_lines(buf: &mut Vec<u8>, chunk: &[u8]) -> Vec<String> {
    buf.extend_from_slice(chunk);
    let mut lines = Vec::new();
    while let Some(i) = buf.iter().position(|&b| b == b'\n') {
        let line: Vec<u8> = buf.drain(..=i).collect();
        let line = String::from_utf8_lossy(&line);
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            lines.push(trimmed.to_string());
        }
    }
    lines
}

// Split a byte stream into trimmed non-empty lines, buffering partial
// lines across network chunks.
fn line_stream(response: reqwest::Response) -> impl Stream<Item = Result<String>> + Send + 'static {
    response
        .bytes_stream()
        .scan(Vec::new(), |buf, item| {
            let lines: Vec<Result<String>> = match item {
                Ok(bytes) => drain_lines(buf, &bytes).into_iter().map(Ok).collect(),
                Err(e) => vec![Err(anyhow::Error::from(e))],
            };
            futures::future::ready(Some(stream::iter(lines)))
        })
        .flatten()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temperature_parses_numbers_and_strings() {
        assert_eq!(parse_temperature(&json!(0.7)), 0.7);
        assert_eq!(parse_temperature(&json!("0.5")), 0.5);
    }

    #[test]
    fn invalid_temperature_falls_back_to_default() {
        assert_eq!(parse_temperature(&json!("hot")), DEFAULT_TEMPERATURE);
        assert_eq!(parse_temperature(&json!(null)), DEFAULT_TEMPERATURE);
        assert_eq!(parse_temperature(&json!([1.0])), DEFAULT_TEMPERATURE);
    }

    #[test]
    fn override_routes_address_by_model_type() {
        let base = ModelConfig::default();

        let to_openai = ModelOverride {
            model_type: Some("openai".to_string()),
            address: Some("sk-test".to_string()),
            ..Default::default()
        };
        let config = to_openai.apply(&base);
        assert_eq!(config.model_type, "openai");
        assert_eq!(config.openai_api_key, "sk-test");
        assert_eq!(config.ollama_base_url, base.ollama_base_url);

        let to_ollama = ModelOverride {
            address: Some("http://gpu-box:11434".to_string()),
            ..Default::default()
        };
        let config = to_ollama.apply(&base);
        assert_eq!(config.ollama_base_url, "http://gpu-box:11434");
    }

    #[test]
    fn empty_override_fields_keep_defaults() {
        let base = ModelConfig::default();
        let noop = ModelOverride {
            model_type: Some(String::new()),
            name: Some(String::new()),
            address: Some(String::new()),
            temp: None,
        };
        let config = noop.apply(&base);
        assert_eq!(config.model_type, base.model_type);
        assert_eq!(config.model_name, base.model_name);
    }

    #[test]
    fn unknown_model_type_is_rejected() {
        let config = ModelConfig {
            model_type: "mainframe".to_string(),
            ..Default::default()
        };
        assert!(build_model(&config).is_err());
        assert!(build_model(&ModelConfig::default()).is_ok());
    }

    #[test]
    fn data_uri_prefix_is_stripped_for_ollama() {
        assert_eq!(strip_data_uri("data:image/png;base64,AAAA"), "AAAA");
        assert_eq!(strip_data_uri("AAAA"), "AAAA");
    }

    #[test]
    fn ollama_message_carries_image_as_base64() {
        let message = ChatMessage::user_with_image("what is this", "data:image/png;base64,QkM=");
        let value = to_ollama_message(&message);
        assert_eq!(value["images"][0], "QkM=");
        assert_eq!(value["content"], "what is this");
    }

    #[test]
    fn openai_message_with_image_uses_content_blocks() {
        let message = ChatMessage::user_with_image("what is this", "data:image/png;base64,QkM=");
        let value = to_openai_message(&message);
        assert_eq!(value["content"][0]["type"], "text");
        assert_eq!(value["content"][1]["type"], "image_url");

        let plain = to_openai_message(&ChatMessage::user("hello"));
        assert_eq!(plain["content"], "hello");
    }

    #[test]
    fn multibyte_chars_split_across_chunks_decode_intact() {
        let payload = "{\"message\":{\"content\":\"ご\"},\"done\":false}\n".as_bytes();
        // Cut between the first and second byte of the 3-byte ご.
        let cut = payload.iter().position(|&b| b >= 0x80).unwrap() + 1;

        let mut buf = Vec::new();
        assert!(drain_lines(&mut buf, &payload[..cut]).is_empty());

        let lines = drain_lines(&mut buf, &payload[cut..]);
        assert_eq!(lines.len(), 1);
        assert!(buf.is_empty());

        let token = parse_ollama_line(&lines[0]).unwrap();
        assert_eq!(token.as_deref(), Some("ご"));
    }

    #[test]
    fn stream_line_parsers_extract_tokens() {
        let token = parse_ollama_line(r#"{"message":{"content":"ご"},"done":false}"#).unwrap();
        assert_eq!(token.as_deref(), Some("ご"));

        let done = parse_ollama_line(r#"{"message":{"content":""},"done":true}"#).unwrap();
        assert!(done.is_none());

        assert!(parse_ollama_line(r#"{"error":"model not found"}"#).is_err());

        let token =
            parse_openai_line(r#"data: {"choices":[{"delta":{"content":"Hi"}}]}"#).unwrap();
        assert_eq!(token.as_deref(), Some("Hi"));
        assert!(parse_openai_line("data: [DONE]").unwrap().is_none());
        assert!(parse_openai_line(": keep-alive").unwrap().is_none());
    }
}
