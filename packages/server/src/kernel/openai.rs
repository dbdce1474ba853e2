//! Report generation via the OpenAI chat completions API.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use voc_pipeline::{PipelineError, ReportGenerator, SynthesisRequest};

const SYSTEM_PROMPT: &str = "You are a voice-of-customer analyst. Using only the evidence \
provided, write a structured markdown report covering customer demographics, pain points, \
desires, objections, and the exact language customers use. Cite which source each finding \
comes from. Do not invent data that is not in the evidence.";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

impl Message {
    fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponseRaw {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Report generator backed by a chat model.
#[derive(Clone)]
pub struct OpenAiReportGenerator {
    http_client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiReportGenerator {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http_client: Client::new(),
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: model.into(),
        }
    }

    /// Set a custom base URL (for Azure, proxies, etc.).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn chat_completion(&self, messages: Vec<Message>) -> Result<String, PipelineError> {
        let start = std::time::Instant::now();
        let request = ChatRequest {
            model: &self.model,
            messages,
            temperature: Some(0.3),
        };

        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "OpenAI request failed");
                PipelineError::Report(format!("network error: {e}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            warn!(status = %status, error = %error_text, "OpenAI API error");
            return Err(PipelineError::Report(format!(
                "OpenAI API error ({status}): {error_text}"
            )));
        }

        let chat_response: ChatResponseRaw = response
            .json()
            .await
            .map_err(|e| PipelineError::Report(format!("invalid OpenAI response: {e}")))?;

        let content = chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| PipelineError::Report("No response from OpenAI".into()))?;

        debug!(
            model = %self.model,
            duration_ms = start.elapsed().as_millis() as u64,
            "OpenAI chat completion"
        );
        Ok(content)
    }
}

/// User prompt carrying the job context and evidence.
fn user_prompt(request: &SynthesisRequest) -> Result<String, PipelineError> {
    let evidence = serde_json::to_string_pretty(&request.evidence)?;
    let mut prompt = format!(
        "Target: {}\nKeywords: {}\nConfidence: {}\n",
        request.target_url,
        request.keywords.join(", "),
        request.confidence.as_str(),
    );
    if !request.notes.is_empty() {
        prompt.push_str("\nData notes:\n");
        for note in &request.notes {
            prompt.push_str("- ");
            prompt.push_str(note);
            prompt.push('\n');
        }
    }
    prompt.push_str("\nEvidence (JSON):\n");
    prompt.push_str(&evidence);
    Ok(prompt)
}

#[async_trait]
impl ReportGenerator for OpenAiReportGenerator {
    async fn generate(&self, request: &SynthesisRequest) -> voc_pipeline::Result<String> {
        let prompt = user_prompt(request)?;
        debug!(
            job_id = %request.job_id,
            items = request.item_count(),
            prompt_chars = prompt.len(),
            "requesting report"
        );
        self.chat_completion(vec![Message::system(SYSTEM_PROMPT), Message::user(prompt)])
            .await
    }
}
