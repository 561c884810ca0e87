use futures_util::StreamExt;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::message::ChatTurn;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("{0}")]
    Http(#[from] reqwest::Error),

    #[error("{message}")]
    Status { status: StatusCode, message: String },

    #[error("Invalid response from Ollama: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Model '{0}' is not available. Pull it with: ollama pull {0}")]
    ModelUnavailable(String),

    #[error("{0}")]
    Server(String),
}

impl ChatError {
    /// True when the endpoint itself is missing, i.e. worth trying `/api/generate`
    pub fn is_not_found(&self) -> bool {
        matches!(self, ChatError::Status { status, .. } if *status == StatusCode::NOT_FOUND)
    }
}

pub type ChatResult<T> = std::result::Result<T, ChatError>;

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatTurn],
    stream: bool,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Deserialize, Default)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
}

/// One response object, either the whole single-shot body or one NDJSON line
#[derive(Deserialize, Default)]
pub struct ReplyChunk {
    #[serde(default)]
    message: Option<ChunkMessage>,
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

impl ReplyChunk {
    /// `message.content`, else `response`, else empty
    pub fn fragment(&self) -> &str {
        match (&self.message, &self.response) {
            (Some(m), _) if !m.content.is_empty() => &m.content,
            (_, Some(r)) => r,
            _ => "",
        }
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

#[derive(Deserialize)]
struct OllamaModel {
    name: String,
}

#[derive(Deserialize)]
struct OllamaModelsResponse {
    models: Vec<OllamaModel>,
}

/// Splits a byte stream into newline-delimited lines.
///
/// Partial lines (and partial UTF-8 sequences) are kept until the rest of the
/// line arrives in a later chunk.
#[derive(Debug, Default)]
pub struct NdjsonDecoder {
    buffer: Vec<u8>,
}

impl NdjsonDecoder {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(line_end) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=line_end).collect();
            let line = String::from_utf8_lossy(&raw).trim().to_string();
            if !line.is_empty() {
                lines.push(line);
            }
        }
        lines
    }

    /// Whatever is left once the body ends without a trailing newline
    pub fn finish(&mut self) -> Option<String> {
        let raw = std::mem::take(&mut self.buffer);
        let line = String::from_utf8_lossy(&raw).trim().to_string();
        (!line.is_empty()).then_some(line)
    }
}

#[derive(Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: String,
}

impl OllamaClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `POST /api/chat`. `on_fragment` receives the running text after every
    /// streamed fragment; the full reply is returned.
    pub async fn chat<F>(
        &self,
        model: &str,
        messages: &[ChatTurn],
        stream: bool,
        on_fragment: F,
    ) -> ChatResult<String>
    where
        F: FnMut(&str),
    {
        let url = format!("{}/api/chat", self.base_url);
        let request = ChatRequest {
            model,
            messages,
            stream,
        };

        debug!(%url, model, stream, turns = messages.len(), "sending chat request");
        let response = self.client.post(&url).json(&request).send().await?;
        let response = check_status(response).await?;

        if stream {
            read_stream(response, on_fragment).await
        } else {
            read_single(response).await
        }
    }

    /// `POST /api/generate` with a bare prompt
    pub async fn generate<F>(
        &self,
        model: &str,
        prompt: &str,
        stream: bool,
        on_fragment: F,
    ) -> ChatResult<String>
    where
        F: FnMut(&str),
    {
        let url = format!("{}/api/generate", self.base_url);
        let request = GenerateRequest {
            model,
            prompt,
            stream,
        };

        debug!(%url, model, stream, "sending generate request");
        let response = self.client.post(&url).json(&request).send().await?;
        let response = check_status(response).await?;

        if stream {
            read_stream(response, on_fragment).await
        } else {
            read_single(response).await
        }
    }

    pub async fn list_models(&self) -> ChatResult<Vec<String>> {
        let url = format!("{}/api/tags", self.base_url);

        let response = self.client.get(&url).send().await?;
        let response = check_status(response).await?;

        let models_response: OllamaModelsResponse = serde_json::from_str(&response.text().await?)?;
        Ok(models_response
            .models
            .into_iter()
            .map(|model| model.name)
            .collect())
    }

    /// An untagged name also matches its `:latest` tag
    pub async fn has_model(&self, name: &str) -> ChatResult<bool> {
        let models = self.list_models().await?;
        let latest = format!("{}:latest", name);
        Ok(models.iter().any(|m| m == name || *m == latest))
    }
}

async fn check_status(response: Response) -> ChatResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response
        .json::<ErrorBody>()
        .await
        .ok()
        .and_then(|body| body.error)
        .unwrap_or_else(|| format!("API error: {}", status.as_u16()));

    Err(ChatError::Status { status, message })
}

async fn read_single(response: Response) -> ChatResult<String> {
    let body = response.text().await?;
    let chunk: ReplyChunk = serde_json::from_str(&body)?;
    if let Some(error) = chunk.error {
        return Err(ChatError::Server(error));
    }
    Ok(chunk.fragment().to_string())
}

async fn read_stream<F>(response: Response, mut on_fragment: F) -> ChatResult<String>
where
    F: FnMut(&str),
{
    let mut body = response.bytes_stream();
    let mut decoder = NdjsonDecoder::default();
    let mut text = String::new();

    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        for line in decoder.push(&chunk) {
            if apply_line(&line, &mut text, &mut on_fragment)? {
                return Ok(text);
            }
        }
    }

    if let Some(line) = decoder.finish() {
        apply_line(&line, &mut text, &mut on_fragment)?;
    }

    Ok(text)
}

/// Returns true once the server marks the stream as done
fn apply_line<F>(line: &str, text: &mut String, on_fragment: &mut F) -> ChatResult<bool>
where
    F: FnMut(&str),
{
    let chunk = match serde_json::from_str::<ReplyChunk>(line) {
        Ok(chunk) => chunk,
        Err(e) => {
            warn!(error = %e, line, "skipping unparseable stream line");
            return Ok(false);
        }
    };

    if let Some(error) = chunk.error {
        return Err(ChatError::Server(error));
    }

    let fragment = chunk.fragment();
    if !fragment.is_empty() {
        text.push_str(fragment);
        on_fragment(text);
    }

    Ok(chunk.done)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_decoder_joins_lines_across_chunks() {
        let mut decoder = NdjsonDecoder::default();
        assert!(decoder.push(b"{\"response\":\"He").is_empty());
        let lines = decoder.push(b"llo\"}\n\n{\"response\":\" world\"}\n{\"do");
        assert_eq!(lines, vec![r#"{"response":"Hello"}"#, r#"{"response":" world"}"#]);
        assert_eq!(decoder.finish().as_deref(), Some(r#"{"do"#));
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn test_decoder_keeps_split_utf8() {
        let mut decoder = NdjsonDecoder::default();
        let text = "olá\n".as_bytes();
        assert!(decoder.push(&text[..3]).is_empty());
        assert_eq!(decoder.push(&text[3..]), vec!["olá"]);
    }

    #[test]
    fn test_fragment_prefers_message_content() {
        let chunk: ReplyChunk =
            serde_json::from_str(r#"{"message":{"role":"assistant","content":"a"},"response":"b"}"#).unwrap();
        assert_eq!(chunk.fragment(), "a");

        let chunk: ReplyChunk =
            serde_json::from_str(r#"{"message":{"content":""},"response":"b"}"#).unwrap();
        assert_eq!(chunk.fragment(), "b");

        let chunk: ReplyChunk = serde_json::from_str(r#"{"done":true}"#).unwrap();
        assert_eq!(chunk.fragment(), "");
    }

    #[test]
    fn test_apply_line_skips_garbage() {
        let mut text = String::new();
        let mut seen = Vec::new();
        let done = apply_line("not json", &mut text, &mut |t: &str| seen.push(t.to_string())).unwrap();
        assert!(!done);
        assert!(text.is_empty());
        assert!(seen.is_empty());
    }

    #[tokio::test]
    async fn test_chat_stream_accumulates_fragments() {
        let server = MockServer::start().await;
        let body = concat!(
            "{\"message\":{\"role\":\"assistant\",\"content\":\"Hello\"},\"done\":false}\n",
            "{\"message\":{\"role\":\"assistant\",\"content\":\", there\"},\"done\":false}\n",
            "{\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":true}\n",
        );
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(serde_json::json!({"model": "gemma:7b", "stream": true})))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let client = OllamaClient::new(&server.uri());
        let mut updates = Vec::new();
        let reply = client
            .chat("gemma:7b", &[ChatTurn::user("hi")], true, |t| updates.push(t.to_string()))
            .await
            .unwrap();

        assert_eq!(reply, "Hello, there");
        assert_eq!(updates, vec!["Hello", "Hello, there"]);
    }

    #[tokio::test]
    async fn test_chat_single_shot() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(serde_json::json!({"stream": false})))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"message":{"role":"assistant","content":"Hi!"},"done":true}"#,
            ))
            .mount(&server)
            .await;

        let client = OllamaClient::new(&server.uri());
        let reply = client
            .chat("gemma:7b", &[ChatTurn::user("hi")], false, |_| {})
            .await
            .unwrap();
        assert_eq!(reply, "Hi!");
    }

    #[tokio::test]
    async fn test_single_shot_bad_json_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let client = OllamaClient::new(&server.uri());
        let err = client.generate("gemma:7b", "hi", false, |_| {}).await.unwrap_err();
        assert!(matches!(err, ChatError::Decode(_)));
    }

    #[tokio::test]
    async fn test_status_error_uses_server_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(
                ResponseTemplate::new(404).set_body_string(r#"{"error":"model 'gemma:7b' not found"}"#),
            )
            .mount(&server)
            .await;

        let client = OllamaClient::new(&server.uri());
        let err = client
            .chat("gemma:7b", &[ChatTurn::user("hi")], true, |_| {})
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "model 'gemma:7b' not found");
    }

    #[tokio::test]
    async fn test_status_error_without_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = OllamaClient::new(&server.uri());
        let err = client
            .chat("gemma:7b", &[ChatTurn::user("hi")], true, |_| {})
            .await
            .unwrap_err();
        assert!(!err.is_not_found());
        assert_eq!(err.to_string(), "API error: 500");
    }

    #[tokio::test]
    async fn test_stream_error_line_fails() {
        let server = MockServer::start().await;
        let body = "{\"response\":\"par\"}\n{\"error\":\"out of memory\"}\n";
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let client = OllamaClient::new(&server.uri());
        let err = client.generate("gemma:7b", "hi", true, |_| {}).await.unwrap_err();
        assert_eq!(err.to_string(), "out of memory");
    }

    #[tokio::test]
    async fn test_list_and_has_model() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"models":[{"name":"gemma:7b"},{"name":"llama3.2:latest"}]}"#,
            ))
            .mount(&server)
            .await;

        let client = OllamaClient::new(&format!("{}/", server.uri()));
        assert_eq!(
            client.list_models().await.unwrap(),
            vec!["gemma:7b".to_string(), "llama3.2:latest".to_string()]
        );
        assert!(client.has_model("gemma:7b").await.unwrap());
        assert!(client.has_model("llama3.2").await.unwrap());
        assert!(!client.has_model("mistral").await.unwrap());
    }
}
