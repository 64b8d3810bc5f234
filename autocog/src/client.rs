use serde_json::json;

use crate::session::Turn;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("rate limited by the text-generation service")]
    RateLimited,
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("text-generation service error ({status}): {body}")]
    Api { status: u16, body: String },
    #[error("empty response from the text-generation service")]
    Empty,
}

fn default_openai_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_anthropic_base() -> String {
    "https://api.anthropic.com".to_string()
}

/// Which chat API to speak. Both stream; both carry the system prompt
/// separately from the turn list.
#[derive(Clone, Debug)]
pub enum Provider {
    OpenAi { api_key: String, base_url: String },
    Anthropic { api_key: String, base_url: String },
}

impl Provider {
    pub fn openai(api_key: impl Into<String>) -> Self {
        Provider::OpenAi {
            api_key: api_key.into(),
            base_url: default_openai_base(),
        }
    }

    pub fn anthropic(api_key: impl Into<String>) -> Self {
        Provider::Anthropic {
            api_key: api_key.into(),
            base_url: default_anthropic_base(),
        }
    }

    /// Default model for this provider.
    pub fn default_model(&self) -> &str {
        match self {
            Provider::OpenAi { .. } => "gpt-4o",
            Provider::Anthropic { .. } => "claude-3-5-sonnet-20240620",
        }
    }
}

/// Sender for streamed response fragments.
pub type ChunkSender = tokio::sync::mpsc::UnboundedSender<String>;

/// Stateless text-generation client: ordered turns in, generated text out.
/// Responses are streamed and consumed fully before returning.
pub struct TextClient {
    http: reqwest::Client,
    provider: Provider,
    model: String,
    temperature: f32,
}

impl TextClient {
    pub fn new(provider: Provider, model: Option<String>) -> Self {
        let model = model.unwrap_or_else(|| provider.default_model().to_string());
        Self {
            http: reqwest::Client::new(),
            provider,
            model,
            temperature: 0.5,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send the conversation and collect the full response.
    pub async fn send(&self, system: &str, turns: &[Turn]) -> Result<String, ClientError> {
        self.send_streaming(system, turns, None).await
    }

    /// Send the conversation, forwarding each text fragment through `chunks`
    /// as it arrives while accumulating the full response.
    pub async fn send_streaming(
        &self,
        system: &str,
        turns: &[Turn],
        chunks: Option<&ChunkSender>,
    ) -> Result<String, ClientError> {
        let request = match &self.provider {
            Provider::OpenAi { api_key, base_url } => {
                let mut messages = vec![json!({"role": "system", "content": system})];
                messages.extend(turns.iter().map(turn_json));
                self.http
                    .post(format!("{base_url}/chat/completions"))
                    .bearer_auth(api_key)
                    .json(&json!({
                        "model": self.model,
                        "messages": messages,
                        "temperature": self.temperature,
                        "stream": true,
                    }))
            }
            Provider::Anthropic { api_key, base_url } => {
                let messages: Vec<_> = turns.iter().map(turn_json).collect();
                self.http
                    .post(format!("{base_url}/v1/messages"))
                    .header("x-api-key", api_key)
                    .header("anthropic-version", "2023-06-01")
                    .json(&json!({
                        "model": self.model,
                        "system": system,
                        "messages": messages,
                        "temperature": self.temperature,
                        "max_tokens": 8192,
                        "stream": true,
                    }))
            }
        };

        let mut response = request.send().await?;
        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ClientError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if body.to_lowercase().contains("rate limit") {
                return Err(ClientError::RateLimited);
            }
            return Err(ClientError::Api {
                status: status.as_u16(),
                body,
            });
        }

        // Consume the SSE stream line by line. Frames may split mid-chunk, so
        // buffer raw bytes and only decode complete lines.
        let mut text = String::new();
        let mut raw: Vec<u8> = Vec::new();
        while let Some(bytes) = response.chunk().await? {
            raw.extend_from_slice(&bytes);
            while let Some(pos) = raw.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = raw.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&line);
                if let Some(delta) = Self::delta_from_line(&self.provider, line.trim()) {
                    if let Some(tx) = chunks {
                        let _ = tx.send(delta.clone());
                    }
                    text.push_str(&delta);
                }
            }
        }

        if text.is_empty() {
            return Err(ClientError::Empty);
        }
        Ok(text)
    }

    /// Pull the text delta out of one SSE line, if it carries one.
    fn delta_from_line(provider: &Provider, line: &str) -> Option<String> {
        let data = line.strip_prefix("data:")?.trim();
        if data == "[DONE]" {
            return None;
        }
        let value: serde_json::Value = serde_json::from_str(data).ok()?;
        extract_delta(provider, &value)
    }
}

fn turn_json(turn: &Turn) -> serde_json::Value {
    json!({"role": turn.role.as_str(), "content": turn.content})
}

/// Text delta from one parsed stream event, per provider shape.
fn extract_delta(provider: &Provider, event: &serde_json::Value) -> Option<String> {
    match provider {
        Provider::OpenAi { .. } => event["choices"][0]["delta"]["content"]
            .as_str()
            .map(str::to_string),
        Provider::Anthropic { .. } => {
            if event["type"].as_str() == Some("content_block_delta") {
                event["delta"]["text"].as_str().map(str::to_string)
            } else {
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Role;

    fn openai() -> Provider {
        Provider::openai("test-key")
    }

    fn anthropic() -> Provider {
        Provider::anthropic("test-key")
    }

    #[test]
    fn default_models() {
        assert_eq!(openai().default_model(), "gpt-4o");
        assert_eq!(anthropic().default_model(), "claude-3-5-sonnet-20240620");
    }

    #[test]
    fn model_override() {
        let c = TextClient::new(openai(), Some("gpt-4".into()));
        assert_eq!(c.model(), "gpt-4");
        let c = TextClient::new(anthropic(), None);
        assert_eq!(c.model(), "claude-3-5-sonnet-20240620");
    }

    #[test]
    fn turn_json_shape() {
        let v = turn_json(&Turn::user("hello"));
        assert_eq!(v["role"], "user");
        assert_eq!(v["content"], "hello");
        let v = turn_json(&Turn {
            role: Role::Assistant,
            content: "hi".into(),
        });
        assert_eq!(v["role"], "assistant");
    }

    #[test]
    fn openai_delta_extraction() {
        let event = json!({"choices": [{"delta": {"content": "abc"}}]});
        assert_eq!(extract_delta(&openai(), &event).as_deref(), Some("abc"));
        let no_content = json!({"choices": [{"delta": {}}]});
        assert_eq!(extract_delta(&openai(), &no_content), None);
    }

    #[test]
    fn anthropic_delta_extraction() {
        let event = json!({"type": "content_block_delta", "delta": {"text": "xyz"}});
        assert_eq!(extract_delta(&anthropic(), &event).as_deref(), Some("xyz"));
        let other = json!({"type": "message_start"});
        assert_eq!(extract_delta(&anthropic(), &other), None);
    }

    #[test]
    fn sse_line_parsing() {
        let line = r#"data: {"choices": [{"delta": {"content": "hi"}}]}"#;
        assert_eq!(
            TextClient::delta_from_line(&openai(), line).as_deref(),
            Some("hi")
        );
        assert_eq!(TextClient::delta_from_line(&openai(), "data: [DONE]"), None);
        assert_eq!(TextClient::delta_from_line(&openai(), "event: ping"), None);
        assert_eq!(TextClient::delta_from_line(&openai(), ""), None);
    }
}
