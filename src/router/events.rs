use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of a personal notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    Like,
    Comment,
    Follow,
    NewPost,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Like => "LIKE",
            NotificationKind::Comment => "COMMENT",
            NotificationKind::Follow => "FOLLOW",
            NotificationKind::NewPost => "NEW_POST",
        }
    }
}

/// A notification derived from one client event, addressed to one user.
///
/// Built, forwarded or dropped immediately; never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationEvent {
    pub kind: NotificationKind,
    pub actor_name: String,
    pub recipient_id: String,
    /// Entity the notification is about (like, comment, follow, post)
    pub payload: Value,
}

impl NotificationEvent {
    pub fn new(
        kind: NotificationKind,
        actor_name: impl Into<String>,
        recipient_id: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            kind,
            actor_name: actor_name.into(),
            recipient_id: recipient_id.into(),
            payload,
        }
    }

    /// Localized message shown to the recipient
    pub fn message(&self) -> String {
        match self.kind {
            NotificationKind::Like => format!("{} আপনার পোস্টটি লাইক করেছেন", self.actor_name),
            NotificationKind::Comment => format!("{} আপনার পোস্টে মন্তব্য করেছেন", self.actor_name),
            NotificationKind::Follow => format!("{} আপনাকে ফলো করেছেন", self.actor_name),
            NotificationKind::NewPost => format!("{} একটি নতুন পোস্ট করেছেন", self.actor_name),
        }
    }
}

/// Read `entity.<field>.name` as the acting user's display name
pub(crate) fn display_name<'a>(entity: &'a Value, field: &str) -> Option<&'a str> {
    entity
        .get(field)?
        .get("name")?
        .as_str()
        .filter(|name| !name.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_messages() {
        let like = NotificationEvent::new(NotificationKind::Like, "রহিম", "b", json!({}));
        assert_eq!(like.message(), "রহিম আপনার পোস্টটি লাইক করেছেন");

        let follow = NotificationEvent::new(NotificationKind::Follow, "করিম", "b", json!({}));
        assert_eq!(follow.message(), "করিম আপনাকে ফলো করেছেন");

        let post = NotificationEvent::new(NotificationKind::NewPost, "সালমা", "b", json!({}));
        assert!(post.message().starts_with("সালমা "));
    }

    #[test]
    fn test_kind_serialization() {
        assert_eq!(serde_json::to_value(NotificationKind::NewPost).unwrap(), "NEW_POST");
        assert_eq!(serde_json::to_value(NotificationKind::Comment).unwrap(), "COMMENT");
        assert_eq!(NotificationKind::Like.as_str(), "LIKE");
    }

    #[test]
    fn test_display_name() {
        let like = json!({"actor": {"name": "Rahim"}});
        assert_eq!(display_name(&like, "actor"), Some("Rahim"));
        assert_eq!(display_name(&like, "author"), None);
        assert_eq!(display_name(&json!({"actor": {"name": ""}}), "actor"), None);
        assert_eq!(display_name(&json!({"actor": {"name": 7}}), "actor"), None);
        assert_eq!(display_name(&json!("scalar"), "actor"), None);
    }
}
