//! Bridges a rig-core `CompletionModel` to [`LlmProvider`].

use async_trait::async_trait;
use rig::completion::{AssistantContent, CompletionModel, Message};

use crate::error::LlmError;
use crate::llm::provider::{
    ChatMessage, CompletionRequest, CompletionResponse, FinishReason, LlmProvider, Role,
};

pub struct RigAdapter<M> {
    model: M,
    model_name: String,
}

impl<M: CompletionModel> RigAdapter<M> {
    pub fn new(model: M, model_name: impl Into<String>) -> Self {
        Self {
            model,
            model_name: model_name.into(),
        }
    }
}

/// Split chat messages into (preamble, history, prompt) the way rig expects.
///
/// System messages are joined into the preamble; the last non-system
/// message becomes the prompt and everything before it the history.
fn split_messages(messages: Vec<ChatMessage>) -> Result<(String, Vec<Message>, Message), LlmError> {
    let mut preamble = Vec::new();
    let mut turns = Vec::new();
    for message in messages {
        match message.role {
            Role::System => preamble.push(message.content),
            Role::User => turns.push(Message::user(message.content)),
            Role::Assistant => turns.push(Message::assistant(message.content)),
        }
    }
    let prompt = turns.pop().ok_or_else(|| LlmError::RequestFailed {
        provider: "rig".to_string(),
        reason: "completion request has no user message".to_string(),
    })?;
    Ok((preamble.join("\n\n"), turns, prompt))
}

#[async_trait]
impl<M> LlmProvider for RigAdapter<M>
where
    M: CompletionModel + Send + Sync + 'static,
{
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let (preamble, history, prompt) = split_messages(request.messages)?;

        let mut builder = self.model.completion_request(prompt).messages(history);
        if !preamble.is_empty() {
            builder = builder.preamble(preamble);
        }
        if let Some(temperature) = request.temperature {
            builder = builder.temperature(f64::from(temperature));
        }
        if let Some(max_tokens) = request.max_tokens {
            builder = builder.max_tokens(u64::from(max_tokens));
        }

        let response = builder.send().await.map_err(|e| LlmError::RequestFailed {
            provider: self.model_name.clone(),
            reason: e.to_string(),
        })?;

        let content = response
            .choice
            .iter()
            .filter_map(|c| match c {
                AssistantContent::Text(text) => Some(text.text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("");

        Ok(CompletionResponse {
            content,
            input_tokens: u32::try_from(response.usage.input_tokens).unwrap_or(u32::MAX),
            output_tokens: u32::try_from(response.usage.output_tokens).unwrap_or(u32::MAX),
            finish_reason: FinishReason::Stop,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_moves_system_messages_to_preamble() {
        let (preamble, history, _prompt) = split_messages(vec![
            ChatMessage::system("Rule one."),
            ChatMessage::user("First"),
            ChatMessage::assistant("Reply"),
            ChatMessage::system("Rule two."),
            ChatMessage::user("Second"),
        ])
        .unwrap();

        assert_eq!(preamble, "Rule one.\n\nRule two.");
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn split_without_user_message_fails() {
        let err = split_messages(vec![ChatMessage::system("Only rules.")]).unwrap_err();
        assert!(matches!(err, LlmError::RequestFailed { .. }));
    }
}
