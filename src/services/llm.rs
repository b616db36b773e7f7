use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use log::{error, info};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::pin::Pin;
use std::sync::Arc;
use url::Url;

use crate::core::config::Config;

/// One streamed piece of backend output, whatever the wire shape was.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenFragment {
    pub text: Option<String>,
    pub done: bool,
}

impl TokenFragment {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            done: false,
        }
    }

    pub fn done() -> Self {
        Self {
            text: None,
            done: true,
        }
    }

    /// Normalizes one line of a streamed response. Accepts newline-delimited
    /// JSON as well as SSE `data:` lines. Blank lines and SSE comments yield
    /// `None`.
    pub fn parse_line(line: &str) -> Result<Option<Self>> {
        let mut line = line.trim();
        if line.is_empty() || line.starts_with(':') || line.starts_with("event:") {
            return Ok(None);
        }
        if let Some(data) = line.strip_prefix("data:") {
            line = data.trim();
        }
        if line == "[DONE]" {
            return Ok(Some(Self::done()));
        }

        let chunk: WireChunk = serde_json::from_str(line)
            .with_context(|| format!("Unrecognized stream chunk: {}", line))?;
        chunk.into_fragment().map(Some)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireChunk {
    Generate {
        response: String,
        #[serde(default)]
        done: bool,
    },
    Chat {
        message: WireMessage,
        #[serde(default)]
        done: bool,
    },
    Delta {
        choices: Vec<WireChoice>,
    },
    Failure {
        error: serde_json::Value,
    },
}

#[derive(Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct WireChoice {
    #[serde(default)]
    delta: WireDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct WireDelta {
    #[serde(default)]
    content: Option<String>,
}

impl WireChunk {
    fn into_fragment(self) -> Result<TokenFragment> {
        match self {
            WireChunk::Generate { response, done } => Ok(TokenFragment {
                text: Some(response),
                done,
            }),
            WireChunk::Chat { message, done } => Ok(TokenFragment {
                text: message.content,
                done,
            }),
            WireChunk::Delta { choices } => {
                let first = choices.into_iter().next();
                Ok(TokenFragment {
                    done: first.as_ref().is_some_and(|c| c.finish_reason.is_some()),
                    text: first.and_then(|c| c.delta.content),
                })
            }
            WireChunk::Failure { error } => Err(anyhow!("Backend reported error: {}", error)),
        }
    }
}

pub type TokenStream = Pin<Box<dyn Stream<Item = Result<TokenFragment>> + Send>>;

#[derive(Debug, Clone, PartialEq)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    pub temperature: f32,
}

#[async_trait]
pub trait TextBackend: Send + Sync + Debug {
    /// Opens a streamed generation. Transport failures and responses that
    /// cannot be streamed are errors; the stream itself is not drained here.
    async fn generate(&self, request: &GenerateRequest) -> Result<TokenStream>;
}

pub fn create_backend(config: &Config) -> Result<Arc<dyn TextBackend>> {
    let base_url = Url::parse(&config.llm.base_url)
        .with_context(|| format!("Invalid LLM base_url: {}", config.llm.base_url))?;

    match config.llm.provider.as_str() {
        "ollama" => Ok(Arc::new(OllamaBackend::new(base_url))),
        "openai" => Ok(Arc::new(OpenAiBackend::new(base_url, config.llm.api_key.clone()))),
        _ => Err(anyhow!("Unknown LLM provider: {}", config.llm.provider)),
    }
}

/// Sends a short prompt and reports whether anything came back.
pub async fn test_connection(backend: &dyn TextBackend, model: &str) -> bool {
    let request = GenerateRequest {
        model: model.to_string(),
        prompt: "Reply with the single word: ready".to_string(),
        temperature: 0.7,
    };

    let outcome: Result<()> = async {
        let mut stream = backend.generate(&request).await?;
        while let Some(fragment) = stream.next().await {
            if fragment?.done {
                break;
            }
        }
        Ok(())
    }
    .await;

    match outcome {
        Ok(()) => {
            info!("LLM connection test succeeded for model {}", model);
            true
        }
        Err(e) => {
            error!("LLM connection test failed for model {}: {:#}", model, e);
            false
        }
    }
}

fn split_lines(pending: &mut Vec<u8>) -> Vec<Result<TokenFragment>> {
    let mut fragments = Vec::new();
    while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
        let line: Vec<u8> = pending.drain(..=pos).collect();
        match TokenFragment::parse_line(&String::from_utf8_lossy(&line)) {
            Ok(Some(fragment)) => fragments.push(Ok(fragment)),
            Ok(None) => {}
            Err(e) => fragments.push(Err(e)),
        }
    }
    fragments
}

/// Turns a line-oriented HTTP body into fragments, buffering partial lines
/// across chunk boundaries.
fn fragment_stream(response: reqwest::Response) -> TokenStream {
    let stream = response
        .bytes_stream()
        .scan(Vec::new(), |pending: &mut Vec<u8>, chunk| {
            let fragments = match chunk {
                Ok(bytes) => {
                    pending.extend_from_slice(&bytes);
                    split_lines(pending)
                }
                Err(e) => vec![Err(anyhow!("Stream error: {}", e))],
            };
            futures_util::future::ready(Some(fragments))
        })
        .flat_map(futures_util::stream::iter);
    Box::pin(stream)
}

async fn check_status(resp: reqwest::Response, provider: &str) -> Result<reqwest::Response> {
    if !resp.status().is_success() {
        let status = resp.status();
        let error_text = resp.text().await.unwrap_or_default();
        return Err(anyhow!("{} API error ({}): {}", provider, status, error_text));
    }
    Ok(resp)
}

// --- Ollama ---

#[derive(Debug)]
pub struct OllamaBackend {
    base_url: Url,
    client: reqwest::Client,
}

impl OllamaBackend {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[async_trait]
impl TextBackend for OllamaBackend {
    async fn generate(&self, request: &GenerateRequest) -> Result<TokenStream> {
        let url = self.base_url.join("api/generate")?;
        let body = OllamaRequest {
            model: &request.model,
            prompt: &request.prompt,
            stream: true,
            options: OllamaOptions {
                temperature: request.temperature,
            },
        };

        let resp = self.client.post(url).json(&body).send().await?;
        let resp = check_status(resp, "Ollama").await?;
        Ok(fragment_stream(resp))
    }
}

// --- OpenAI-compatible ---

#[derive(Debug)]
pub struct OpenAiBackend {
    base_url: Url,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAiBackend {
    pub fn new(base_url: Url, api_key: Option<String>) -> Self {
        Self {
            base_url,
            api_key,
            client: reqwest::Client::new(),
        }
    }

    fn endpoint(&self) -> Result<Url> {
        let base = self.base_url.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!("{}/chat/completions", base))?)
    }
}

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAiMessage<'a>>,
    temperature: f32,
    stream: bool,
}

#[derive(Serialize)]
struct OpenAiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[async_trait]
impl TextBackend for OpenAiBackend {
    async fn generate(&self, request: &GenerateRequest) -> Result<TokenStream> {
        let body = OpenAiRequest {
            model: &request.model,
            messages: vec![OpenAiMessage {
                role: "user",
                content: &request.prompt,
            }],
            temperature: request.temperature,
            stream: true,
        };

        let mut req = self.client.post(self.endpoint()?).json(&body);
        if let Some(api_key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {}", api_key));
        }

        let resp = check_status(req.send().await?, "OpenAI").await?;
        Ok(fragment_stream(resp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_generate_shape() -> Result<()> {
        let fragment = TokenFragment::parse_line(r#"{"model":"m","response":"Hel","done":false}"#)?;
        assert_eq!(fragment, Some(TokenFragment::text("Hel")));

        let last = TokenFragment::parse_line(r#"{"model":"m","response":"","done":true}"#)?;
        assert_eq!(last.map(|f| f.done), Some(true));
        Ok(())
    }

    #[test]
    fn test_parse_chat_shape() -> Result<()> {
        let fragment =
            TokenFragment::parse_line(r#"{"message":{"role":"assistant","content":"lo"},"done":false}"#)?;
        assert_eq!(fragment, Some(TokenFragment::text("lo")));
        Ok(())
    }

    #[test]
    fn test_parse_sse_delta_shape() -> Result<()> {
        let fragment =
            TokenFragment::parse_line(r#"data: {"choices":[{"index":0,"delta":{"content":" world"}}]}"#)?;
        assert_eq!(fragment, Some(TokenFragment::text(" world")));

        let role_only = TokenFragment::parse_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#)?;
        assert_eq!(role_only.and_then(|f| f.text), None);

        assert_eq!(TokenFragment::parse_line("data: [DONE]")?, Some(TokenFragment::done()));
        assert_eq!(TokenFragment::parse_line(": keep-alive")?, None);
        assert_eq!(TokenFragment::parse_line("   ")?, None);
        Ok(())
    }

    #[test]
    fn test_backend_error_chunk_is_error() {
        assert!(TokenFragment::parse_line(r#"{"error":"model not found"}"#).is_err());
        assert!(TokenFragment::parse_line("not json").is_err());
    }

    #[test]
    fn test_split_lines_buffers_partial_chunks() {
        let mut pending = Vec::new();
        pending.extend_from_slice(b"{\"response\":\"a\"}\n{\"resp");
        let first = split_lines(&mut pending);
        assert_eq!(first.len(), 1);
        assert_eq!(pending, b"{\"resp".to_vec());

        pending.extend_from_slice(b"onse\":\"b\"}\n\n");
        let second: Vec<_> = split_lines(&mut pending)
            .into_iter()
            .filter_map(|r| r.ok().and_then(|f| f.text))
            .collect();
        assert_eq!(second, vec!["b".to_string()]);
        assert!(pending.is_empty());
    }

    #[test]
    fn test_create_backend_validates_config() {
        let config = Config::default_with_llm("ollama", "http://localhost:11434");
        assert!(create_backend(&config).is_ok());

        let bad_url = Config::default_with_llm("ollama", "not a url");
        assert!(create_backend(&bad_url).is_err());

        let unknown = Config::default_with_llm("gemini", "http://localhost:1");
        assert!(create_backend(&unknown).is_err());
    }

    #[test]
    fn test_openai_endpoint_keeps_path() -> Result<()> {
        let backend = OpenAiBackend::new(Url::parse("https://api.example.com/v1/")?, None);
        assert_eq!(backend.endpoint()?.as_str(), "https://api.example.com/v1/chat/completions");
        Ok(())
    }
}
