//! Conversation messages and prompts.

use serde::{Deserialize, Serialize};

/// One turn of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: text.into(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: text.into(),
        }
    }
}

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// What the caller asks the model: a single text or an ordered conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Prompt {
    Text(String),
    Conversation(Vec<Message>),
}

impl Prompt {
    /// Builds a conversation from plain turns, alternating user and assistant
    /// starting with the user.
    pub fn alternating<I, S>(turns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let messages = turns
            .into_iter()
            .enumerate()
            .map(|(i, text)| {
                if i % 2 == 0 {
                    Message::user(text)
                } else {
                    Message::assistant(text)
                }
            })
            .collect();
        Prompt::Conversation(messages)
    }

    /// Messages as sent to a chat-style provider, with the system prompt first when given.
    pub fn to_messages(&self, system_prompt: Option<&str>) -> Vec<Message> {
        let mut out = Vec::new();
        if let Some(system) = system_prompt {
            out.push(Message::system(system));
        }
        match self {
            Prompt::Text(text) => out.push(Message::user(text.clone())),
            Prompt::Conversation(messages) => out.extend(messages.iter().cloned()),
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Prompt::Text(text) => text.is_empty(),
            Prompt::Conversation(messages) => messages.is_empty(),
        }
    }

    /// Short human-readable preview used in logs and cache metadata.
    pub fn preview(&self, max_chars: usize) -> String {
        match self {
            Prompt::Text(text) => truncate(text, max_chars),
            Prompt::Conversation(messages) => {
                format!("[Conversation with {} messages]", messages.len())
            }
        }
    }
}

impl From<&str> for Prompt {
    fn from(s: &str) -> Self {
        Prompt::Text(s.to_string())
    }
}

impl From<String> for Prompt {
    fn from(s: String) -> Self {
        Prompt::Text(s)
    }
}

impl From<Vec<Message>> for Prompt {
    fn from(messages: Vec<Message>) -> Self {
        Prompt::Conversation(messages)
    }
}

pub(crate) fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let head: String = text.chars().take(max_chars).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alternating_roles_start_with_user() {
        let prompt = Prompt::alternating(["hi", "hello", "how are you?"]);
        let messages = prompt.to_messages(Some("be brief"));
        let roles: Vec<MessageRole> = messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![
                MessageRole::System,
                MessageRole::User,
                MessageRole::Assistant,
                MessageRole::User
            ]
        );
    }

    #[test]
    fn preview_truncates_on_char_boundary() {
        let prompt = Prompt::from("héllo wörld");
        assert_eq!(prompt.preview(5), "héllo...");
        assert_eq!(Prompt::from("short").preview(100), "short");
        assert_eq!(
            Prompt::alternating(["a", "b"]).preview(100),
            "[Conversation with 2 messages]"
        );
    }
}
