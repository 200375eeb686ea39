use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::router::{NotificationEvent, NotificationKind};

/// Greeting sent as soon as a socket opens
pub const GREETING: &str = "সোশ্যালমিডিয়া রিয়েল-টাইম সার্ভিসে সংযুক্ত হয়েছেন!";

/// Events sent from client to server.
///
/// Wire form is `{"event": "<name>", "data": <payload>}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Bare user id, asserted by the client
    Authenticate(String),
    NewPost(NewPostPayload),
    PostLiked(PostLikedPayload),
    PostCommented(PostCommentedPayload),
    UserFollowed(UserFollowedPayload),
    Typing(TypingPayload),
    StopTyping(StopTypingPayload),
    PostUpdated(PostUpdatedPayload),
    Ping,
}

impl ClientEvent {
    /// Event name as it appears on the wire
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Authenticate(_) => "authenticate",
            ClientEvent::NewPost(_) => "new_post",
            ClientEvent::PostLiked(_) => "post_liked",
            ClientEvent::PostCommented(_) => "post_commented",
            ClientEvent::UserFollowed(_) => "user_followed",
            ClientEvent::Typing(_) => "typing",
            ClientEvent::StopTyping(_) => "stop_typing",
            ClientEvent::PostUpdated(_) => "post_updated",
            ClientEvent::Ping => "ping",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPostPayload {
    pub author_id: String,
    /// Post entity; `post.author.name` names the actor
    pub post: Value,
    #[serde(default)]
    pub followers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostLikedPayload {
    pub post_id: String,
    pub liker_id: String,
    pub author_id: String,
    /// Like entity; `like.actor.name` names the actor
    pub like: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostCommentedPayload {
    pub post_id: String,
    pub commenter_id: String,
    pub author_id: String,
    pub comment: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserFollowedPayload {
    pub follower_id: String,
    pub following_id: String,
    pub follow: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub post_id: String,
    pub user_id: String,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopTypingPayload {
    pub post_id: String,
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostUpdatedPayload {
    pub post_id: String,
    pub update: Value,
}

/// Events sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    Connected(ConnectedPayload),
    Notification(NotificationMessage),
    UserTyping(TypingPayload),
    UserStoppedTyping(StopTypingPayload),
    PostUpdated(PostUpdatedPayload),
    Pong,
    Heartbeat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectedPayload {
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Body of the `notification` event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationMessage {
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub message: String,
    pub data: Value,
}

impl ServerEvent {
    pub fn connected() -> Self {
        Self::Connected(ConnectedPayload {
            message: GREETING.to_string(),
            timestamp: Utc::now(),
        })
    }

    pub fn notification(event: NotificationEvent) -> Self {
        Self::Notification(event.into())
    }

    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Connected(_) => "connected",
            ServerEvent::Notification(_) => "notification",
            ServerEvent::UserTyping(_) => "user_typing",
            ServerEvent::UserStoppedTyping(_) => "user_stopped_typing",
            ServerEvent::PostUpdated(_) => "post_updated",
            ServerEvent::Pong => "pong",
            ServerEvent::Heartbeat => "heartbeat",
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl From<NotificationEvent> for NotificationMessage {
    fn from(event: NotificationEvent) -> Self {
        Self {
            kind: event.kind,
            message: event.message(),
            data: event.payload,
        }
    }
}
