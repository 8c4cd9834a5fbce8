//! # Chat templates
//!
//! A template is a small YAML document steering the assistant:
//! - a `system_prompt` establishing the support persona,
//! - an ordered list of seed `messages` (serialized
//!   [`async_openai::types::ChatCompletionRequestMessage`]),
//! - optional `pre_user_message_content` / `post_user_message_content`
//!   strings wrapped around every user message at send time.
//!
//! Templates live under `<config_dir>/templates/<name>.yaml`. When no
//! template is named, [`ChatTemplate::support_default`] supplies the
//! built-in support persona, so a fresh install works without any files.
//!
//! ```yaml
//! system_prompt: "You are the Assetflow support assistant."
//! messages:
//!   - role: "user"
//!     content: "How do I get help?"
//!   - role: "assistant"
//!     content: "Ask me about any Assetflow task and I'll walk you through it."
//! post_user_message_content: "Answer in plain English."
//! ```

use std::fs;
use std::path::Path;

use async_openai::types::chat::ChatCompletionRequestMessage;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;

const DEFAULT_SYSTEM_PROMPT: &str = "You are the Assetflow support assistant. You help users of \
the Assetflow digital asset management platform complete tasks like uploading, tagging, \
searching and sharing assets. Be concise and friendly. When you are given an official process \
guide, present it faithfully and never invent steps that are not in it.";

/// A reusable chat template: persona plus optional seed conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTemplate {
    /// Session-level instruction used as the system message.
    pub system_prompt: String,

    /// Seed messages inserted before live conversation turns.
    #[serde(default)]
    pub messages: Vec<ChatCompletionRequestMessage>,

    /// Text prepended to each user message at send time.
    #[serde(default)]
    pub pre_user_message_content: Option<String>,

    /// Text appended to each user message at send time.
    #[serde(default)]
    pub post_user_message_content: Option<String>,
}

impl ChatTemplate {
    /// The built-in support persona used when no template is configured.
    pub fn support_default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            messages: Vec::new(),
            pre_user_message_content: None,
            post_user_message_content: None,
        }
    }

    /// Apply the pre/post decorations to a user message body.
    pub fn decorate_user_content(&self, content: &str) -> String {
        match (
            self.pre_user_message_content.as_deref(),
            self.post_user_message_content.as_deref(),
        ) {
            (None, None) => content.to_string(),
            (pre, post) => format!(
                "{}{}{}",
                pre.map(|p| format!("{p}\n")).unwrap_or_default(),
                content,
                post.map(|p| format!("\n{p}")).unwrap_or_default(),
            ),
        }
    }
}

/// Load a template by name from the user's config directory.
pub fn load_template(name: &str) -> Result<ChatTemplate> {
    let dir = crate::config_dir()?.join("templates");
    load_template_at(&dir, name)
}

/// Load `<dir>/<name>.yaml` as a template.
pub fn load_template_at(dir: &Path, name: &str) -> Result<ChatTemplate> {
    let path = dir.join(format!("{name}.yaml"));
    info!(path = %path.display(), "loading template");
    let content = fs::read_to_string(&path)?;
    Ok(serde_yaml::from_str(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn loads_valid_template() {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join("support.yaml"),
            r#"
system_prompt: "You are a helpful assistant."
messages:
  - role: "user"
    content: "What can you do?"
post_user_message_content: "Keep it short."
"#,
        )
        .unwrap();

        let template = load_template_at(tmp.path(), "support").unwrap();
        assert_eq!(template.system_prompt, "You are a helpful assistant.");
        assert_eq!(template.messages.len(), 1);
        assert_eq!(
            template.decorate_user_content("hi"),
            "hi\nKeep it short."
        );
    }

    #[test]
    fn missing_template_is_an_error() {
        let tmp = TempDir::new().unwrap();
        assert!(load_template_at(tmp.path(), "nope").is_err());
    }

    #[test]
    fn malformed_template_is_an_error() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("bad.yaml"), "system_prompt: [not, a, string]").unwrap();
        assert!(load_template_at(tmp.path(), "bad").is_err());
    }

    #[test]
    fn default_persona_mentions_the_platform() {
        let template = ChatTemplate::support_default();
        assert!(template.system_prompt.contains("Assetflow"));
        assert!(template.messages.is_empty());
        assert_eq!(template.decorate_user_content("q"), "q");
    }
}
