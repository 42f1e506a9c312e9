//! Extraction oracle: turns an email prompt into candidate tasks.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::ExtractionError;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};

/// Max tokens for one extraction call.
const EXTRACTION_MAX_TOKENS: u32 = 1024;

/// Temperature for extraction (near-deterministic).
const EXTRACTION_TEMPERATURE: f32 = 0.1;

/// A task the oracle believes the email asks for.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CandidateTask {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub confidence: Option<f32>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ExtractionResult {
    #[serde(default)]
    pub has_tasks: bool,
    #[serde(default)]
    pub tasks: Vec<CandidateTask>,
}

/// Anything that can answer "what tasks does this text contain?".
#[async_trait]
pub trait ExtractionOracle: Send + Sync {
    async fn extract(&self, prompt: &str) -> Result<ExtractionResult, ExtractionError>;
}

/// Oracle backed by a chat-completion model.
pub struct LlmOracle {
    llm: Arc<dyn LlmProvider>,
}

impl LlmOracle {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl ExtractionOracle for LlmOracle {
    async fn extract(&self, prompt: &str) -> Result<ExtractionResult, ExtractionError> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(build_extraction_system_prompt()),
            ChatMessage::user(prompt),
        ])
        .with_temperature(EXTRACTION_TEMPERATURE)
        .with_max_tokens(EXTRACTION_MAX_TOKENS);

        let response = self.llm.complete(request).await?;
        debug!(
            model = self.llm.model_name(),
            input_tokens = response.input_tokens,
            output_tokens = response.output_tokens,
            "Extraction completion received"
        );

        parse_extraction_response(&response.content).inspect_err(|e| {
            warn!(raw_response = %response.content, error = %e, "Unparseable extraction response");
        })
    }
}

fn build_extraction_system_prompt() -> String {
    "You extract actionable tasks from emails for a project task list.\n\n\
     A task is something the mailbox owner must do: reply with information, send a document, \
     schedule a meeting, make a payment, review something. Newsletters, receipts and FYI \
     messages contain no tasks.\n\n\
     Respond with ONLY a JSON object:\n\
     {\"has_tasks\": true, \"tasks\": [{\"title\": \"...\", \"description\": \"...\", \
     \"priority\": \"low|medium|high|urgent\", \"due_date\": \"YYYY-MM-DD\", \"confidence\": 0.0}]}\n\n\
     Rules:\n\
     - Titles are short imperatives (max 10 words)\n\
     - Omit due_date unless the email states or clearly implies one\n\
     - confidence is 0.0-1.0; use >0.8 only for explicit requests\n\
     - If there is nothing to do, respond {\"has_tasks\": false, \"tasks\": []}"
        .to_string()
}

/// Parse the model output, tolerating markdown fences and surrounding prose.
pub(crate) fn parse_extraction_response(raw: &str) -> Result<ExtractionResult, ExtractionError> {
    let json_str = extract_json_object(raw);
    let mut result: ExtractionResult = serde_json::from_str(&json_str)
        .map_err(|e| ExtractionError::MalformedResponse(format!("JSON parse error: {e}")))?;

    result.tasks.retain(|t| !t.title.trim().is_empty());
    if !result.has_tasks {
        result.tasks.clear();
    }
    Ok(result)
}

fn extract_json_object(text: &str) -> String {
    let trimmed = text.trim();

    if trimmed.starts_with('{') {
        return trimmed.to_string();
    }

    // Wrapped in markdown code block
    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if inner.starts_with('{') {
                return inner.to_string();
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && end > start
    {
        return trimmed[start..=end].to_string();
    }

    trimmed.to_string()
}
