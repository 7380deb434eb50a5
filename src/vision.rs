use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, error, info};

use crate::{config::ModelConfig, error::AnalyzeError, prompt::AnalysisPrompt};

/// One analysis call: fixed prompt, the user's text segment and the image.
pub struct VisionRequest<'a> {
    pub prompt: &'a AnalysisPrompt,
    pub user_text: &'a str,
    pub image_data_url: &'a str,
}

/// A hosted multimodal model that answers with free text.
#[async_trait]
pub trait VisionModel: Send + Sync {
    async fn complete(&self, request: &VisionRequest<'_>) -> Result<String, AnalyzeError>;

    fn model_name(&self) -> &str;
}

/// Chat-completion client for an Azure-style deployment endpoint.
pub struct ChatCompletionClient {
    client: Client,
    url: String,
    api_key: String,
    deployment: String,
    temperature: f32,
    max_tokens: u32,
}

impl ChatCompletionClient {
    /// `None` when the endpoint or key is not configured.
    pub fn from_config(config: &ModelConfig) -> Result<Option<Self>, AnalyzeError> {
        let Some((endpoint, api_key)) = config.credentials() else {
            return Ok(None);
        };
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AnalyzeError::Configuration(format!("http client: {e}")))?;
        let url = format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            endpoint, config.deployment, config.api_version
        );
        Ok(Some(Self {
            client,
            url,
            api_key: api_key.to_string(),
            deployment: config.deployment.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }))
    }

    fn request_body(&self, request: &VisionRequest<'_>) -> Value {
        json!({
            "messages": [
                { "role": "system", "content": request.prompt.system },
                {
                    "role": "user",
                    "content": [
                        { "type": "text", "text": request.user_text },
                        { "type": "image_url", "image_url": { "url": request.image_data_url, "detail": "low" } }
                    ]
                }
            ],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "stream": false
        })
    }
}

#[async_trait]
impl VisionModel for ChatCompletionClient {
    async fn complete(&self, request: &VisionRequest<'_>) -> Result<String, AnalyzeError> {
        let body = self.request_body(request);

        let mut logged = body.clone();
        truncate_data_urls(&mut logged);
        debug!("📤 Request body: {}", logged);
        info!("🔗 Calling deployment '{}' (prompt {})", self.deployment, request.prompt.version);

        let response = self
            .client
            .post(&self.url)
            .header("api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AnalyzeError::Upstream(format!("request failed: {e}")))?;

        let status = response.status();
        info!("📥 Response status: {}", status);

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            error!("❌ API error response: {}", error_body);
            if status == StatusCode::TOO_MANY_REQUESTS {
                return Err(AnalyzeError::RateLimited(format!("status={status}")));
            }
            return Err(AnalyzeError::Upstream(format!("status={} body={}", status, error_body)));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| AnalyzeError::Upstream(format!("decode response: {e}")))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| AnalyzeError::Upstream("no message content in response".into()))?;

        info!("📥 Model reply ({} chars)", text.len());
        Ok(text)
    }

    fn model_name(&self) -> &str {
        &self.deployment
    }
}

// Replaces inline image payloads so request logs stay readable.
fn truncate_data_urls(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, val) in map.iter_mut() {
                match val {
                    Value::String(s) if key == "url" && s.starts_with("data:") && s.len() > 100 => {
                        let head: String = s.chars().take(40).collect();
                        let replacement = format!("{}...[truncated {} chars]", head, s.len() - head.len());
                        *val = Value::String(replacement);
                    }
                    _ => truncate_data_urls(val),
                }
            }
        }
        Value::Array(arr) => arr.iter_mut().for_each(truncate_data_urls),
        _ => {}
    }
}

// --- Response Parsing Helpers ---

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}
