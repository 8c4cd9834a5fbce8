//! # Conversation history
//!
//! A linear FIFO of user/assistant turns with a token budget. Every push
//! re-counts the whole history with `tiktoken_rs::cl100k_base` and evicts
//! from the front until the budget is met, so the prompt the engine builds
//! from it can never grow without bound in interactive mode.

use std::collections::VecDeque;

use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessage, ChatCompletionRequestAssistantMessageContent,
    ChatCompletionRequestMessage, ChatCompletionRequestUserMessage,
    ChatCompletionRequestUserMessageContent, Role,
};
use once_cell::sync::Lazy;
use tiktoken_rs::{CoreBPE, cl100k_base};
use tracing::debug;

static BPE: Lazy<CoreBPE> = Lazy::new(|| cl100k_base().expect("bundled cl100k_base data"));

/// One past exchange half: who said it and what.
#[derive(Debug, Clone)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

/// Token-budgeted linear conversation history, oldest turn at the front.
#[derive(Debug)]
pub struct History {
    turns: VecDeque<Turn>,
    max_tokens: usize,
}

impl History {
    pub fn new(max_tokens: usize) -> Self {
        Self {
            turns: VecDeque::new(),
            max_tokens,
        }
    }

    /// Append a turn, then evict oldest turns until the history fits the
    /// budget again. The freshly pushed turn is kept even if it alone
    /// exceeds the budget.
    pub fn push(&mut self, role: Role, content: impl Into<String>) {
        self.turns.push_back(Turn {
            role,
            content: content.into(),
        });
        while self.turns.len() > 1 && self.token_count() > self.max_tokens {
            let evicted = self.turns.pop_front();
            debug!(role = ?evicted.map(|t| t.role), "evicted oldest turn over token budget");
        }
    }

    pub fn reset(&mut self) {
        self.turns.clear();
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    fn token_count(&self) -> usize {
        self.turns
            .iter()
            .map(|t| BPE.encode_with_special_tokens(&t.content).len())
            .sum()
    }

    /// The history as chat-completion request messages, oldest first.
    #[allow(deprecated)]
    pub fn as_messages(&self) -> Vec<ChatCompletionRequestMessage> {
        self.turns
            .iter()
            .map(|turn| match turn.role {
                Role::Assistant => ChatCompletionRequestMessage::Assistant(
                    ChatCompletionRequestAssistantMessage {
                        content: Some(ChatCompletionRequestAssistantMessageContent::Text(
                            turn.content.clone(),
                        )),
                        name: None,
                        refusal: None,
                        audio: None,
                        tool_calls: None,
                        function_call: None,
                    },
                ),
                _ => ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
                    content: ChatCompletionRequestUserMessageContent::Text(turn.content.clone()),
                    name: None,
                }),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_turns_within_budget() {
        let mut history = History::new(10_000);
        history.push(Role::User, "how do I upload?");
        history.push(Role::Assistant, "Open the upload panel.");
        assert_eq!(history.len(), 2);
        assert_eq!(history.as_messages().len(), 2);
    }

    #[test]
    fn evicts_oldest_when_over_budget() {
        // a budget small enough that two long turns cannot coexist
        let mut history = History::new(30);
        let long = "word ".repeat(25);
        history.push(Role::User, long.clone());
        history.push(Role::Assistant, long.clone());
        assert_eq!(history.len(), 1);
        assert!(matches!(
            history.as_messages()[0],
            ChatCompletionRequestMessage::Assistant(_)
        ));
    }

    #[test]
    fn single_oversized_turn_is_kept() {
        let mut history = History::new(5);
        history.push(Role::User, "word ".repeat(50));
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn reset_clears_everything() {
        let mut history = History::new(100);
        history.push(Role::User, "hi");
        history.reset();
        assert!(history.is_empty());
    }
}
