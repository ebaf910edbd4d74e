// ABOUTME: Builds the ordered conversation handed to the model for one inbound event.
// ABOUTME: System prompt, optional priming turn, history in sort-key order, then the user turn.

use crate::history::{HistoryItem, HistoryRole};
use maria_agent::ChatTurn;

/// Everything the builder needs for one turn
#[derive(Debug, Clone, Default)]
pub struct ConversationContext<'a> {
    pub system_text: &'a str,
    pub assistant_text: Option<&'a str>,
    pub display_name: Option<&'a str>,
    pub history_summary: Option<&'a str>,
    pub history: &'a [HistoryItem],
    pub user_text: &'a str,
    /// Text extracted from attachments, already labelled
    pub attachment_texts: &'a [String],
    pub image_urls: &'a [String],
}

pub trait ConversationBuilder: Send + Sync {
    fn build(&self, context: &ConversationContext<'_>) -> Vec<ChatTurn>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultConversationBuilder;

impl DefaultConversationBuilder {
    fn system_turn(context: &ConversationContext<'_>) -> ChatTurn {
        let mut system = context.system_text.trim().to_string();
        if let Some(name) = context.display_name.filter(|n| !n.trim().is_empty()) {
            system.push_str(&format!("\n\nYou are talking with {}.", name.trim()));
        }
        if let Some(summary) = context.history_summary.filter(|s| !s.trim().is_empty()) {
            system.push_str(&format!(
                "\n\nSummary of the earlier conversation:\n{}",
                summary.trim()
            ));
        }
        ChatTurn::system(system)
    }

    fn user_turn(context: &ConversationContext<'_>) -> ChatTurn {
        let mut text = context.user_text.to_string();
        for attachment in context.attachment_texts {
            if !text.is_empty() {
                text.push_str("\n\n");
            }
            text.push_str(attachment);
        }
        if context.image_urls.is_empty() {
            ChatTurn::user(text)
        } else {
            ChatTurn::user_with_images(text, context.image_urls.to_vec())
        }
    }
}

impl ConversationBuilder for DefaultConversationBuilder {
    fn build(&self, context: &ConversationContext<'_>) -> Vec<ChatTurn> {
        let mut turns = Vec::with_capacity(context.history.len() + 3);
        turns.push(Self::system_turn(context));

        if let Some(priming) = context.assistant_text.filter(|t| !t.trim().is_empty()) {
            turns.push(ChatTurn::assistant(priming));
        }

        let mut history: Vec<&HistoryItem> = context.history.iter().collect();
        history.sort_by_key(|item| item.sort_key);
        turns.extend(history.into_iter().map(|item| match item.role {
            HistoryRole::User if !item.image_urls.is_empty() => {
                ChatTurn::user_with_images(item.message.clone(), item.image_urls.clone())
            }
            HistoryRole::User => ChatTurn::user(item.message.clone()),
            HistoryRole::Assistant => ChatTurn::assistant(item.message.clone()),
        }));

        turns.push(Self::user_turn(context));
        turns
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maria_agent::Role;

    fn item(sort_key: i64, role: HistoryRole, message: &str) -> HistoryItem {
        HistoryItem {
            platform: "telegram".into(),
            chat_id: "c".into(),
            sort_key,
            role,
            message: message.into(),
            thread: None,
            image_urls: vec![],
        }
    }

    #[test]
    fn test_build_orders_turns() {
        let history = vec![
            item(7, HistoryRole::Assistant, "second"),
            item(3, HistoryRole::User, "first"),
        ];
        let context = ConversationContext {
            system_text: "You are Maria.",
            assistant_text: Some("How can I help?"),
            display_name: Some("Ada"),
            history_summary: Some("Talked about rain."),
            history: &history,
            user_text: "What now?",
            ..Default::default()
        };

        let turns = DefaultConversationBuilder.build(&context);
        let roles: Vec<Role> = turns.iter().map(|t| t.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::Assistant, Role::User, Role::Assistant, Role::User]
        );
        let system = turns[0].content.as_deref().unwrap();
        assert!(system.contains("Ada"));
        assert!(system.contains("Talked about rain."));
        assert_eq!(turns[2].content.as_deref(), Some("first"));
        assert_eq!(turns[3].content.as_deref(), Some("second"));
        assert_eq!(turns[4].content.as_deref(), Some("What now?"));
    }

    #[test]
    fn test_user_turn_carries_attachments_and_images() {
        let attachments = vec!["[Attachment voice.ogg]\nhello there".to_string()];
        let images = vec!["https://img/cat.png".to_string()];
        let context = ConversationContext {
            system_text: "sys",
            user_text: "see attached",
            attachment_texts: &attachments,
            image_urls: &images,
            ..Default::default()
        };

        let turns = DefaultConversationBuilder.build(&context);
        assert_eq!(turns.len(), 2);
        let user = &turns[1];
        assert!(user.content.as_deref().unwrap().contains("hello there"));
        assert_eq!(user.image_urls, images);
    }

    #[test]
    fn test_blank_optional_parts_are_skipped() {
        let context = ConversationContext {
            system_text: "sys",
            assistant_text: Some("  "),
            display_name: Some(""),
            user_text: "hi",
            ..Default::default()
        };
        let turns = DefaultConversationBuilder.build(&context);
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].content.as_deref(), Some("sys"));
    }
}
