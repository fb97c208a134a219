use derive_new::new;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum ChatRole {
    System,
    #[default]
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ChatMessagePart {
    Text { text: String },
    ImageBase64 { base64: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, new)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: Vec<ChatMessagePart>,
}

impl ChatMessage {
    pub fn text(role: ChatRole, text: impl Into<String>) -> Self {
        Self::new(role, vec![ChatMessagePart::Text { text: text.into() }])
    }
}

/// Short-hand conversation entry, expanded to a full [`ChatMessage`] before sending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, new)]
pub struct ConversationItem {
    pub role: ChatRole,
    #[new(into)]
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, new)]
pub struct LlmContext {
    pub history: Vec<ChatMessage>,
}

impl LlmContext {
    /// A single user text message.
    pub fn from_prompt(prompt: impl Into<String>) -> Self {
        Self::new(vec![ChatMessage::text(ChatRole::User, prompt)])
    }

    pub fn from_conversation(conversation: &[ConversationItem]) -> Self {
        let history = conversation
            .iter()
            .map(|item| ChatMessage::text(item.role, item.content.clone()))
            .collect();
        Self::new(history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn prompt_becomes_single_user_text_message() {
        let context = LlmContext::from_prompt("Hi");
        assert_eq!(
            serde_json::to_value(&context).unwrap(),
            json!({"history": [{"role": "user", "content": [{"type": "text", "text": "Hi"}]}]})
        );
    }

    #[test]
    fn conversation_keeps_roles_and_order() {
        let context = LlmContext::from_conversation(&[
            ConversationItem::new(ChatRole::System, "be brief"),
            ConversationItem::new(ChatRole::User, "hello"),
            ConversationItem::new(ChatRole::Assistant, "hi"),
        ]);
        let roles: Vec<_> = context.history.iter().map(|m| m.role).collect();
        assert_eq!(roles, [ChatRole::System, ChatRole::User, ChatRole::Assistant]);
        assert_eq!(
            context.history[1].content,
            vec![ChatMessagePart::Text {
                text: "hello".to_string()
            }]
        );
    }
}
