//! Report synthesis through an OpenAI-compatible Responses API.

use super::format::build_user_prompt;
use super::template::PromptTemplates;
use crate::config::LlmConfig;
use crate::models::{AggregatedDataset, ReportDay};
use anyhow::{bail, Context, Result};
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

/// Stored prompt reference.
#[derive(Debug, Serialize, PartialEq)]
pub struct StoredPrompt<'a> {
    pub id: &'a str,
}

/// Body of `POST /responses`.
#[derive(Debug, Serialize)]
pub struct ResponsesRequest<'a> {
    pub model: &'a str,
    pub input: &'a str,
    pub store: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<StoredPrompt<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<&'a str>,
}

/// Turns a dataset into the narrative report.
pub struct ReportSynthesizer {
    http_client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    prompt_id: Option<String>,
    timeout_seconds: u64,
}

impl ReportSynthesizer {
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let Some(api_key) = config.api_key.clone() else {
            bail!("OPENAI_API_KEY is not set");
        };

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http_client,
            api_key,
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            prompt_id: config.prompt_id.clone(),
            timeout_seconds: config.timeout_seconds,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// A stored prompt replaces the local system role.
    pub fn build_request<'a>(
        &'a self,
        input: &'a str,
        system_role: &'a str,
    ) -> ResponsesRequest<'a> {
        match self.prompt_id.as_deref() {
            Some(id) => ResponsesRequest {
                model: &self.model,
                input,
                store: false,
                prompt: Some(StoredPrompt { id }),
                instructions: None,
            },
            None => ResponsesRequest {
                model: &self.model,
                input,
                store: false,
                prompt: None,
                instructions: Some(system_role),
            },
        }
    }

    /// Generate the report text for `dataset`, disclaimer included.
    pub async fn generate(
        &self,
        dataset: &AggregatedDataset,
        templates: &PromptTemplates,
        day: &ReportDay,
    ) -> Result<String> {
        let input = build_user_prompt(dataset, &templates.render_prompt(&day.iso_date()));
        let request = self.build_request(&input, &templates.system_role);

        info!("Generating report with model {}", self.model);
        if let Some(id) = &self.prompt_id {
            info!("Using stored prompt {}", id);
        }
        debug!("Prompt is {} characters", input.chars().count());

        let response = self.send(&request).await?;
        let Some(report) = extract_response_text(&response) else {
            bail!("Empty response from model {}", self.model);
        };

        info!("Report generated ({} characters)", report.chars().count());
        Ok(with_disclaimer(&report, &self.model))
    }

    async fn send(&self, request: &ResponsesRequest<'_>) -> Result<Value> {
        let url = format!("{}/responses", self.base_url);

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    anyhow::anyhow!("Request timed out after {}s", self.timeout_seconds)
                } else if e.is_connect() {
                    anyhow::anyhow!("Cannot connect to the LLM API at {}", self.base_url)
                } else {
                    anyhow::anyhow!("Failed to send request: {}", e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if request.prompt.is_some() && is_prompt_not_found(status, &body) {
                bail!(
                    "Invalid OPENAI_PROMPT_ID: prompt not found. \
                     Remove it or create the prompt first"
                );
            }
            bail!("LLM API error {}: {}", status, body);
        }

        response
            .json()
            .await
            .context("Failed to parse LLM response")
    }
}

/// The generated text: `output_text`, else the first text block under
/// `output[].content[]`, else `choices[0].message.content`.
pub fn extract_response_text(response: &Value) -> Option<String> {
    let non_empty = |text: &str| {
        let text = text.trim();
        (!text.is_empty()).then(|| text.to_string())
    };

    if let Some(text) = response["output_text"].as_str().and_then(non_empty) {
        return Some(text);
    }

    if let Some(blocks) = response["output"].as_array() {
        let found = blocks
            .iter()
            .filter_map(|block| block["content"].as_array())
            .flatten()
            .find_map(|content| content["text"].as_str().and_then(non_empty));
        if found.is_some() {
            return found;
        }
    }

    response["choices"][0]["message"]["content"]
        .as_str()
        .and_then(non_empty)
}

fn is_prompt_not_found(status: StatusCode, body: &str) -> bool {
    let body = body.to_lowercase();
    (status == StatusCode::NOT_FOUND || status == StatusCode::BAD_REQUEST)
        && body.contains("prompt")
        && body.contains("not found")
}

pub fn with_disclaimer(report: &str, model: &str) -> String {
    format!(
        "{}\n\n---\n\
         *This report was generated using AI from time tracking, task and commit data.*\n\
         Model used: OpenAI {}\n\
         Generated by dayreport {}",
        report.trim_end(),
        model,
        env!("CARGO_PKG_VERSION")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn synthesizer(prompt_id: Option<&str>) -> ReportSynthesizer {
        ReportSynthesizer::from_config(&LlmConfig {
            api_key: Some("sk-test".to_string()),
            prompt_id: prompt_id.map(String::from),
            ..LlmConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_request_with_local_instructions() {
        let s = synthesizer(None);
        let body = serde_json::to_value(s.build_request("data", "You write reports.")).unwrap();
        assert_eq!(body["model"], "gpt-5.2-mini");
        assert_eq!(body["input"], "data");
        assert_eq!(body["store"], false);
        assert_eq!(body["instructions"], "You write reports.");
        assert!(body.get("prompt").is_none());
    }

    #[test]
    fn test_request_with_stored_prompt() {
        let s = synthesizer(Some("pmpt_123"));
        let body = serde_json::to_value(s.build_request("data", "ignored")).unwrap();
        assert_eq!(body["prompt"], json!({"id": "pmpt_123"}));
        assert!(body.get("instructions").is_none());
    }

    #[test]
    fn test_extract_output_text() {
        let response = json!({"output_text": "  Report body \n", "output": []});
        assert_eq!(extract_response_text(&response).as_deref(), Some("Report body"));
    }

    #[test]
    fn test_extract_from_output_blocks() {
        let response = json!({
            "output": [
                {"type": "reasoning", "summary": []},
                {"type": "message", "content": [
                    {"type": "output_text", "text": ""},
                    {"type": "output_text", "text": "Daily report"}
                ]}
            ]
        });
        assert_eq!(extract_response_text(&response).as_deref(), Some("Daily report"));
    }

    #[test]
    fn test_extract_chat_fallback_and_empty() {
        let chat = json!({"choices": [{"message": {"content": "From chat"}}]});
        assert_eq!(extract_response_text(&chat).as_deref(), Some("From chat"));
        assert!(extract_response_text(&json!({"output_text": "   "})).is_none());
        assert!(extract_response_text(&json!({})).is_none());
    }

    #[test]
    fn test_prompt_not_found_detection() {
        assert!(is_prompt_not_found(
            StatusCode::NOT_FOUND,
            r#"{"error": {"message": "Prompt with id 'pmpt_1' not found."}}"#
        ));
        assert!(!is_prompt_not_found(StatusCode::NOT_FOUND, "model not found"));
        assert!(!is_prompt_not_found(StatusCode::UNAUTHORIZED, "prompt not found"));
    }

    #[test]
    fn test_disclaimer() {
        let report = with_disclaimer("Report\n", "gpt-5.2-mini");
        assert!(report.starts_with("Report\n\n---\n"));
        assert!(report.contains("Model used: OpenAI gpt-5.2-mini"));
    }

    #[test]
    fn test_missing_api_key() {
        assert!(ReportSynthesizer::from_config(&LlmConfig::default()).is_err());
    }
}
