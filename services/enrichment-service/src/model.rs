use std::sync::Arc;

use openai::chat::{ChatCompletionMessage, ChatCompletionMessageRole};
use shared::config::Settings;
use shared::dto::NetworkReport;
use shared::openai_client::{msg, ChatBackend, ChatRequest, ModelError};
use tracing::debug;

const SYSTEM_PROMPT: &str = "You are an AI that analyzes network quality reports. \
Analyze both overall sentiment and specific aspects:
- Overall sentiment: -1 (very negative) to 1 (very positive)
- Network quality: 0 (very poor) to 10 (excellent)
- Aspect-specific sentiment (-1 to 1 for each):
  * Speed satisfaction: analyzing user satisfaction with network speed
  * Reliability satisfaction: analyzing network stability and consistency
  * Value satisfaction: analyzing if user feels service is worth the cost
  * Service satisfaction: analyzing user's experience with provider service
Return a valid JSON object without markdown formatting.";

const OUTPUT_FORMAT: &str = r#"Return ONLY JSON in this format:
{
  "sentiment_score": number,
  "quality_score": number,
  "analysis": string,
  "sentiment_aspects": {
    "speed_satisfaction": number,
    "reliability_satisfaction": number,
    "value_satisfaction": number,
    "service_satisfaction": number,
    "aspects_analysis": string
  }
}"#;

/// Sampling parameters sent with every enrichment call.
#[derive(Debug, Clone)]
pub struct ModelParams {
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
}

impl ModelParams {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            model: settings.model_name.clone(),
            temperature: settings.model_temperature,
            top_p: settings.model_top_p,
            top_k: settings.model_top_k,
        }
    }
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            model: "meta-llama/Llama-3.3-70B-Instruct-Turbo".into(),
            temperature: 0.7,
            top_p: 0.7,
            top_k: 50,
        }
    }
}

/// One model call per report with a fixed prompt. Does not retry.
#[derive(Clone)]
pub struct EnrichmentModel {
    backend: Arc<dyn ChatBackend>,
    params: ModelParams,
}

impl EnrichmentModel {
    pub fn new(backend: Arc<dyn ChatBackend>, params: ModelParams) -> Self {
        Self { backend, params }
    }

    pub fn model_name(&self) -> &str {
        &self.params.model
    }

    /// Raw text of the first completion choice for `report`.
    pub async fn analyze(&self, report: &NetworkReport) -> Result<String, ModelError> {
        let req = ChatRequest {
            model: self.params.model.clone(),
            messages: build_messages(report),
            temperature: self.params.temperature,
            top_p: self.params.top_p,
            top_k: self.params.top_k,
        };
        let res = self.backend.create_chat_completion(&req).await?;
        match res.first_content() {
            Some(content) if !content.is_empty() => {
                debug!(report_id = report.id, len = content.len(), "model answered");
                Ok(content.to_string())
            }
            _ => Err(ModelError::EmptyResponse),
        }
    }
}

pub fn build_messages(report: &NetworkReport) -> Vec<ChatCompletionMessage> {
    let user = format!(
        "Analyze this network report in detail:\n\
         Comment: {}\n\
         Download Speed: {} Mbps\n\
         Upload Speed: {} Mbps\n\n\
         {}",
        report.comment, report.download_speed, report.upload_speed, OUTPUT_FORMAT
    );
    vec![
        msg(ChatCompletionMessageRole::System, SYSTEM_PROMPT),
        msg(ChatCompletionMessageRole::User, &user),
    ]
}
