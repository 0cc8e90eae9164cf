use crate::core::config::Config;
use crate::core::error::GenerationError;
use crate::services::prompt::Prompt;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::warn;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LlmConfig {
    pub provider: String, // "openai", "ollama" or "inference"
    #[serde(default)]
    pub retry_delay_ms: u64,
    pub openai: Option<OpenAIConfig>,
    pub ollama: Option<OllamaConfig>,
    pub inference: Option<InferenceConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OpenAIConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OllamaConfig {
    pub base_url: String,
    pub model: String,
}

/// Raw text-generation endpoint (text-generation-inference style).
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct InferenceConfig {
    pub endpoint: String,
    pub token: Option<String>,
    #[serde(default = "default_base_new_tokens")]
    pub base_new_tokens: u32,
    #[serde(default = "default_new_tokens_per_panel")]
    pub new_tokens_per_panel: u32,
}

fn default_base_new_tokens() -> u32 {
    200
}
fn default_new_tokens_per_panel() -> u32 {
    130
}

impl LlmConfig {
    pub fn validate(&self) -> Result<()> {
        match self.provider.as_str() {
            "openai" => {
                let cfg = self.openai.as_ref().context("OpenAI config missing")?;
                if let Some(base_url) = &cfg.base_url {
                    check_url(base_url)?;
                }
            }
            "ollama" => {
                let cfg = self.ollama.as_ref().context("Ollama config missing")?;
                check_url(&cfg.base_url)?;
            }
            "inference" => {
                let cfg = self.inference.as_ref().context("Inference config missing")?;
                check_url(&cfg.endpoint)?;
            }
            other => return Err(anyhow!("Unknown LLM provider: {}", other)),
        }
        Ok(())
    }
}

fn check_url(raw: &str) -> Result<()> {
    url::Url::parse(raw).with_context(|| format!("Invalid URL: {}", raw))?;
    Ok(())
}

#[async_trait]
pub trait LlmClient: Send + Sync + Debug {
    /// One call to the backend. `nb_panels` is a sizing hint for the reply.
    async fn complete(&self, prompt: &Prompt, nb_panels: usize) -> Result<String>;
}

pub fn create_llm(config: &Config) -> Result<Arc<dyn LlmClient>> {
    match config.llm.provider.as_str() {
        "openai" => {
            let cfg = config.llm.openai.as_ref().context("OpenAI config missing")?;
            Ok(Arc::new(OpenAIClient::new(&cfg.api_key, &cfg.model, cfg.base_url.as_deref())))
        }
        "ollama" => {
            let cfg = config.llm.ollama.as_ref().context("Ollama config missing")?;
            Ok(Arc::new(OllamaClient::new(&cfg.base_url, &cfg.model)))
        }
        "inference" => {
            let cfg = config.llm.inference.as_ref().context("Inference config missing")?;
            Ok(Arc::new(InferenceClient::new(cfg.clone())))
        }
        _ => Err(anyhow!("Unknown LLM provider: {}", config.llm.provider)),
    }
}

/// Calls the backend, retrying once with a perturbed prompt.
///
/// An empty (or blank) reply counts as a failure. The returned text is trimmed.
pub async fn predict_with_retry(
    llm: &dyn LlmClient,
    prompt: &Prompt,
    nb_panels: usize,
    retry_delay: Duration,
) -> Result<String, GenerationError> {
    match attempt(llm, prompt, nb_panels).await {
        Ok(text) => return Ok(text),
        Err(e) => warn!("Prediction of the story failed ({}), trying again..", e),
    }

    if !retry_delay.is_zero() {
        tokio::time::sleep(retry_delay).await;
    }

    attempt(llm, &prompt.perturbed(), nb_panels)
        .await
        .map_err(|e| {
            warn!("Prediction of the story failed again: {}", e);
            GenerationError::Exhausted {
                attempts: 2,
                last: Box::new(e),
            }
        })
}

async fn attempt(llm: &dyn LlmClient, prompt: &Prompt, nb_panels: usize) -> Result<String, GenerationError> {
    let text = llm
        .complete(prompt, nb_panels)
        .await
        .map_err(|e| GenerationError::Backend(format!("{:#}", e)))?;
    let text = text.trim();
    if text.is_empty() {
        return Err(GenerationError::EmptyResponse);
    }
    Ok(text.to_string())
}

// --- OpenAI ---

#[derive(Debug)]
struct OpenAIClient {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAIClient {
    fn new(api_key: &str, model: &str, base_url: Option<&str>) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: base_url.unwrap_or("https://api.openai.com/v1").trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }
}

/// Sends the request; a non-2xx status becomes an error carrying the body.
async fn send_checked(request: reqwest::RequestBuilder, backend: &str) -> Result<reqwest::Response> {
    let resp = request
        .send()
        .await
        .with_context(|| format!("{} API unreachable", backend))?;

    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let error_text = resp.text().await.unwrap_or_default();
    Err(anyhow!("{} API error ({}): {}", backend, status, error_text))
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

fn chat_messages(prompt: &Prompt) -> Vec<ChatMessage> {
    vec![
        ChatMessage { role: "system".to_string(), content: prompt.system.clone() },
        ChatMessage { role: "user".to_string(), content: prompt.user_with_primer() },
    ]
}

#[derive(Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<ChatMessage>,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessageResponse,
}

#[derive(Deserialize)]
struct OpenAIMessageResponse {
    content: Option<String>,
}

#[async_trait]
impl LlmClient for OpenAIClient {
    async fn complete(&self, prompt: &Prompt, _nb_panels: usize) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);

        let request_body = OpenAIRequest {
            model: self.model.clone(),
            messages: chat_messages(prompt),
        };

        let request = self.client.post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request_body);
        let resp = send_checked(request, "OpenAI").await?;

        let result: OpenAIResponse = resp.json().await?;
        result
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| anyhow!("OpenAI response empty or missing content"))
    }
}

// --- Ollama ---

#[derive(Debug)]
struct OllamaClient {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl OllamaClient {
    fn new(base_url: &str, model: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Serialize)]
struct OllamaRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
}

#[derive(Deserialize)]
struct OllamaResponse {
    message: OllamaMessageResponse,
}

#[derive(Deserialize)]
struct OllamaMessageResponse {
    content: String,
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn complete(&self, prompt: &Prompt, _nb_panels: usize) -> Result<String> {
        let url = format!("{}/api/chat", self.base_url);

        let request_body = OllamaRequest {
            model: self.model.clone(),
            messages: chat_messages(prompt),
            stream: false,
        };

        let resp = send_checked(self.client.post(&url).json(&request_body), "Ollama").await?;

        let result: OllamaResponse = resp.json().await?;
        Ok(result.message.content)
    }
}

// --- Raw text generation ---

#[derive(Debug)]
struct InferenceClient {
    config: InferenceConfig,
    client: reqwest::Client,
}

impl InferenceClient {
    fn new(config: InferenceConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn max_new_tokens(&self, nb_panels: usize) -> u32 {
        let per_panel = self.config.new_tokens_per_panel.saturating_mul(nb_panels as u32);
        self.config.base_new_tokens.saturating_add(per_panel)
    }
}

#[derive(Serialize)]
struct InferenceRequest {
    inputs: String,
    parameters: InferenceParameters,
}

#[derive(Serialize)]
struct InferenceParameters {
    max_new_tokens: u32,
    return_full_text: bool,
}

#[derive(Deserialize)]
struct InferenceOutput {
    generated_text: String,
}

#[async_trait]
impl LlmClient for InferenceClient {
    async fn complete(&self, prompt: &Prompt, nb_panels: usize) -> Result<String> {
        let request_body = InferenceRequest {
            inputs: prompt.to_zephyr(),
            parameters: InferenceParameters {
                max_new_tokens: self.max_new_tokens(nb_panels),
                return_full_text: false,
            },
        };

        let mut request = self.client.post(&self.config.endpoint).json(&request_body);
        if let Some(token) = &self.config.token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }
        let resp = send_checked(request, "Inference").await?;

        let response_text = resp.text().await?;
        let outputs: Vec<InferenceOutput> = serde_json::from_str(&response_text)
            .with_context(|| format!("Failed to parse inference response: {}", response_text))?;

        outputs
            .into_iter()
            .next()
            .map(|o| o.generated_text)
            .ok_or_else(|| anyhow!("Inference response empty. Body: {}", response_text))
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned replies in order and records every prompt it receives.
    #[derive(Debug, Default)]
    pub struct ScriptedLlm {
        replies: Mutex<VecDeque<Result<String, String>>>,
        pub calls: Mutex<Vec<(Prompt, usize)>>,
    }

    impl ScriptedLlm {
        pub fn new(replies: Vec<Result<&str, &str>>) -> Self {
            Self {
                replies: Mutex::new(
                    replies
                        .into_iter()
                        .map(|r| r.map(str::to_string).map_err(str::to_string))
                        .collect(),
                ),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn complete(&self, prompt: &Prompt, nb_panels: usize) -> Result<String> {
            self.calls.lock().unwrap().push((prompt.clone(), nb_panels));
            match self.replies.lock().unwrap().pop_front() {
                Some(Ok(text)) => Ok(text),
                Some(Err(e)) => Err(anyhow!(e)),
                None => Err(anyhow!("no scripted reply left")),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::ScriptedLlm;
    use super::*;
    use crate::services::prompt::JSON_PRIMER;

    fn prompt() -> Prompt {
        Prompt {
            system: "sys".to_string(),
            user: "usr".to_string(),
            primer: JSON_PRIMER.to_string(),
        }
    }

    #[tokio::test]
    async fn test_first_attempt_success_is_trimmed() {
        let llm = ScriptedLlm::new(vec![Ok("  [] \n")]);
        let text = predict_with_retry(&llm, &prompt(), 2, Duration::ZERO).await.unwrap();

        assert_eq!(text, "[]");
        assert_eq!(llm.call_count(), 1);
    }

    #[tokio::test]
    async fn test_retry_uses_perturbed_prompt() {
        let llm = ScriptedLlm::new(vec![Err("boom"), Ok("[]")]);
        let text = predict_with_retry(&llm, &prompt(), 2, Duration::ZERO).await.unwrap();

        assert_eq!(text, "[]");
        let calls = llm.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].0, prompt());
        assert_eq!(calls[1].0.primer, "\n[{.");
        assert_eq!(calls[1].1, 2);
    }

    #[tokio::test]
    async fn test_blank_reply_triggers_retry() {
        let llm = ScriptedLlm::new(vec![Ok("   "), Ok("text")]);
        let text = predict_with_retry(&llm, &prompt(), 1, Duration::ZERO).await.unwrap();

        assert_eq!(text, "text");
        assert_eq!(llm.call_count(), 2);
    }

    #[tokio::test]
    async fn test_two_failures_surface_exhausted() {
        let llm = ScriptedLlm::new(vec![Err("boom"), Ok("")]);
        let err = predict_with_retry(&llm, &prompt(), 2, Duration::ZERO).await.unwrap_err();

        match err {
            GenerationError::Exhausted { attempts, last } => {
                assert_eq!(attempts, 2);
                assert!(matches!(*last, GenerationError::EmptyResponse));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(llm.call_count(), 2);
    }

    #[test]
    fn test_validate_rejects_bad_url_and_provider() {
        let mut config = LlmConfig {
            provider: "ollama".to_string(),
            retry_delay_ms: 0,
            openai: None,
            ollama: Some(OllamaConfig {
                base_url: "not a url".to_string(),
                model: "zephyr".to_string(),
            }),
            inference: None,
        };
        assert!(config.validate().is_err());

        config.ollama.as_mut().unwrap().base_url = "http://localhost:11434".to_string();
        assert!(config.validate().is_ok());

        config.provider = "gemini".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_max_new_tokens_scales_with_panels() {
        let client = InferenceClient::new(InferenceConfig {
            endpoint: "http://localhost:8080".to_string(),
            token: None,
            base_new_tokens: default_base_new_tokens(),
            new_tokens_per_panel: default_new_tokens_per_panel(),
        });

        assert_eq!(client.max_new_tokens(2), 460);
    }

    #[test]
    fn test_inference_response_parsing() {
        let json = r#"[{"generated_text": "\"panel\": 1, \"instructions\": \"a\", \"caption\": \"b\"}]"}]"#;
        let outputs: Vec<InferenceOutput> = serde_json::from_str(json).unwrap();
        assert!(outputs[0].generated_text.starts_with("\"panel\""));
    }

    #[test]
    fn test_openai_response_parsing_missing_content() {
        let json = r#"{"choices": [{"index": 0, "message": {"role": "assistant", "content": null}}]}"#;
        let result: OpenAIResponse = serde_json::from_str(json).unwrap();
        assert!(result.choices[0].message.content.is_none());
    }

    /// Answers a single HTTP request with the given status line and body.
    async fn one_shot_server(status: &'static str, body: &'static str) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request);
                if let Some(head_end) = text.find("\r\n\r\n") {
                    let length = text[..head_end]
                        .lines()
                        .find_map(|l| l.to_ascii_lowercase().strip_prefix("content-length:").map(|v| v.trim().to_string()))
                        .and_then(|v| v.parse::<usize>().ok())
                        .unwrap_or(0);
                    if request.len() >= head_end + 4 + length {
                        break;
                    }
                }
            }
            let response = format!(
                "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_error_status_carries_backend_and_body() {
        let url = one_shot_server("503 Service Unavailable", "model is loading").await;
        let client = OllamaClient::new(&url, "zephyr");

        let err = client.complete(&prompt(), 2).await.unwrap_err().to_string();
        assert!(err.starts_with("Ollama API error (503"), "{}", err);
        assert!(err.ends_with("model is loading"), "{}", err);
    }

    #[tokio::test]
    async fn test_success_status_reaches_the_parser() {
        let url = one_shot_server("200 OK", r#"{"message": {"role": "assistant", "content": "[]"}}"#).await;
        let client = OllamaClient::new(&url, "zephyr");

        assert_eq!(client.complete(&prompt(), 2).await.unwrap(), "[]");
    }
}
