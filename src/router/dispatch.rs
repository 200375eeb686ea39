use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::directory::ConnectionDirectory;
use crate::metrics::{EventMetrics, NotificationMetrics};
use crate::websocket::{
    ClientEvent, NewPostPayload, PostCommentedPayload, PostLikedPayload, ServerEvent,
    UserFollowedPayload,
};

use super::events::{display_name, NotificationEvent, NotificationKind};

/// Why a single inbound event could not be routed. Never fatal to the connection.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("malformed event: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("missing actor name at `{0}.name`")]
    MissingActor(&'static str),
}

/// What happened to one inbound event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RouteOutcome {
    /// Outbound events handed to a live connection
    pub delivered: usize,
    /// Recipients that were not connected
    pub dropped: usize,
    /// Recipients skipped because they are the actor
    pub suppressed: usize,
    /// Live recipients whose outbound buffer was full or closed
    pub failed: usize,
}

impl RouteOutcome {
    fn merge(&mut self, other: RouteOutcome) {
        self.delivered += other.delivered;
        self.dropped += other.dropped;
        self.suppressed += other.suppressed;
        self.failed += other.failed;
    }

    fn delivered() -> Self {
        Self { delivered: 1, ..Default::default() }
    }

    fn dropped() -> Self {
        Self { dropped: 1, ..Default::default() }
    }

    fn suppressed() -> Self {
        Self { suppressed: 1, ..Default::default() }
    }

    fn failed() -> Self {
        Self { failed: 1, ..Default::default() }
    }
}

#[derive(Debug, Default)]
pub struct RouterStats {
    pub events_received: AtomicU64,
    pub events_malformed: AtomicU64,
    pub notifications_delivered: AtomicU64,
    pub notifications_dropped: AtomicU64,
    pub notifications_suppressed: AtomicU64,
    pub delivery_failed: AtomicU64,
    pub broadcasts: AtomicU64,
    pub authentications: AtomicU64,
}

impl RouterStats {
    pub fn snapshot(&self) -> RouterStatsSnapshot {
        RouterStatsSnapshot {
            events_received: self.events_received.load(Ordering::Relaxed),
            events_malformed: self.events_malformed.load(Ordering::Relaxed),
            notifications_delivered: self.notifications_delivered.load(Ordering::Relaxed),
            notifications_dropped: self.notifications_dropped.load(Ordering::Relaxed),
            notifications_suppressed: self.notifications_suppressed.load(Ordering::Relaxed),
            delivery_failed: self.delivery_failed.load(Ordering::Relaxed),
            broadcasts: self.broadcasts.load(Ordering::Relaxed),
            authentications: self.authentications.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RouterStatsSnapshot {
    pub events_received: u64,
    pub events_malformed: u64,
    pub notifications_delivered: u64,
    pub notifications_dropped: u64,
    pub notifications_suppressed: u64,
    pub delivery_failed: u64,
    pub broadcasts: u64,
    pub authentications: u64,
}

/// Translates inbound client events into outbound events for the relevant
/// connections. Delivery is best effort: an absent recipient is a silent
/// no-op and nothing is queued or retried.
pub struct EventRouter {
    directory: Arc<ConnectionDirectory>,
    stats: RouterStats,
}

impl EventRouter {
    pub fn new(directory: Arc<ConnectionDirectory>) -> Self {
        Self {
            directory,
            stats: RouterStats::default(),
        }
    }

    pub fn directory(&self) -> &Arc<ConnectionDirectory> {
        &self.directory
    }

    pub fn stats(&self) -> RouterStatsSnapshot {
        self.stats.snapshot()
    }

    /// Parse a raw text frame and route it
    pub fn route_text(&self, origin: Uuid, text: &str) -> Result<RouteOutcome, RouteError> {
        let event: ClientEvent = serde_json::from_str(text).map_err(|e| {
            self.stats.events_malformed.fetch_add(1, Ordering::Relaxed);
            EventMetrics::record_malformed();
            RouteError::from(e)
        })?;

        self.route(origin, event)
    }

    /// Route one inbound event from connection `origin`
    #[tracing::instrument(
        name = "router.route",
        skip(self, origin, event),
        fields(connection_id = %origin, event = event.name())
    )]
    pub fn route(&self, origin: Uuid, event: ClientEvent) -> Result<RouteOutcome, RouteError> {
        self.stats.events_received.fetch_add(1, Ordering::Relaxed);
        EventMetrics::record_received(event.name());

        let result = match event {
            ClientEvent::Authenticate(user_id) => Ok(self.authenticate(origin, &user_id)),
            ClientEvent::NewPost(payload) => self.new_post(payload),
            ClientEvent::PostLiked(payload) => self.post_liked(payload),
            ClientEvent::PostCommented(payload) => self.post_commented(payload),
            ClientEvent::UserFollowed(payload) => self.user_followed(payload),
            ClientEvent::Typing(payload) => {
                Ok(self.broadcast_except(origin, ServerEvent::UserTyping(payload)))
            }
            ClientEvent::StopTyping(payload) => {
                Ok(self.broadcast_except(origin, ServerEvent::UserStoppedTyping(payload)))
            }
            ClientEvent::PostUpdated(payload) => {
                Ok(self.broadcast_except(origin, ServerEvent::PostUpdated(payload)))
            }
            ClientEvent::Ping => Ok(self.reply(origin, ServerEvent::Pong)),
        };

        if let Err(RouteError::MissingActor(_)) = &result {
            self.stats.events_malformed.fetch_add(1, Ordering::Relaxed);
            EventMetrics::record_malformed();
        }

        result
    }

    fn authenticate(&self, origin: Uuid, user_id: &str) -> RouteOutcome {
        if self.directory.authenticate(user_id, origin) {
            self.stats.authentications.fetch_add(1, Ordering::Relaxed);
        }
        RouteOutcome::default()
    }

    /// Fan out to every listed follower except the author
    fn new_post(&self, payload: NewPostPayload) -> Result<RouteOutcome, RouteError> {
        let mut outcome = RouteOutcome::default();
        let mut seen = HashSet::new();
        let mut author_name: Option<String> = None;

        for follower_id in &payload.followers {
            if !seen.insert(follower_id.as_str()) {
                continue;
            }
            if *follower_id == payload.author_id {
                outcome.merge(self.suppress(NotificationKind::NewPost));
                continue;
            }
            if self.directory.lookup(follower_id).is_none() {
                outcome.merge(self.drop_offline(NotificationKind::NewPost, follower_id));
                continue;
            }

            let name = match &author_name {
                Some(name) => name.clone(),
                None => {
                    let name = display_name(&payload.post, "author")
                        .ok_or(RouteError::MissingActor("post.author"))?
                        .to_string();
                    author_name = Some(name.clone());
                    name
                }
            };

            outcome.merge(self.notify(NotificationEvent::new(
                NotificationKind::NewPost,
                name,
                follower_id.as_str(),
                payload.post.clone(),
            )));
        }

        Ok(outcome)
    }

    fn post_liked(&self, payload: PostLikedPayload) -> Result<RouteOutcome, RouteError> {
        if payload.liker_id == payload.author_id {
            return Ok(self.suppress(NotificationKind::Like));
        }
        if self.directory.lookup(&payload.author_id).is_none() {
            return Ok(self.drop_offline(NotificationKind::Like, &payload.author_id));
        }

        let actor = display_name(&payload.like, "actor")
            .ok_or(RouteError::MissingActor("like.actor"))?
            .to_string();

        Ok(self.notify(NotificationEvent::new(
            NotificationKind::Like,
            actor,
            payload.author_id,
            payload.like,
        )))
    }

    fn post_commented(&self, payload: PostCommentedPayload) -> Result<RouteOutcome, RouteError> {
        if payload.commenter_id == payload.author_id {
            return Ok(self.suppress(NotificationKind::Comment));
        }
        if self.directory.lookup(&payload.author_id).is_none() {
            return Ok(self.drop_offline(NotificationKind::Comment, &payload.author_id));
        }

        let actor = display_name(&payload.comment, "actor")
            .ok_or(RouteError::MissingActor("comment.actor"))?
            .to_string();

        Ok(self.notify(NotificationEvent::new(
            NotificationKind::Comment,
            actor,
            payload.author_id,
            payload.comment,
        )))
    }

    /// Self-follow is rejected upstream, so there is no suppression here
    fn user_followed(&self, payload: UserFollowedPayload) -> Result<RouteOutcome, RouteError> {
        if self.directory.lookup(&payload.following_id).is_none() {
            return Ok(self.drop_offline(NotificationKind::Follow, &payload.following_id));
        }

        let actor = display_name(&payload.follow, "actor")
            .ok_or(RouteError::MissingActor("follow.actor"))?
            .to_string();

        Ok(self.notify(NotificationEvent::new(
            NotificationKind::Follow,
            actor,
            payload.following_id,
            payload.follow,
        )))
    }

    /// Deliver a notification to its recipient's current connection, if any
    pub fn notify(&self, event: NotificationEvent) -> RouteOutcome {
        let kind = event.kind;
        let Some(handle) = self.directory.lookup(&event.recipient_id) else {
            return self.drop_offline(kind, &event.recipient_id);
        };

        let recipient_id = event.recipient_id.clone();
        match handle.deliver(ServerEvent::notification(event)) {
            Ok(()) => {
                self.stats.notifications_delivered.fetch_add(1, Ordering::Relaxed);
                NotificationMetrics::record_delivered(kind.as_str());
                tracing::debug!(
                    recipient_id = %recipient_id,
                    connection_id = %handle.id,
                    kind = kind.as_str(),
                    "Notification delivered"
                );
                RouteOutcome::delivered()
            }
            Err(e) => {
                self.stats.delivery_failed.fetch_add(1, Ordering::Relaxed);
                NotificationMetrics::record_dropped(e.as_str());
                tracing::warn!(
                    recipient_id = %recipient_id,
                    connection_id = %handle.id,
                    kind = kind.as_str(),
                    error = %e,
                    "Notification not delivered"
                );
                RouteOutcome::failed()
            }
        }
    }

    /// Relay an event to every live connection except the sender
    fn broadcast_except(&self, origin: Uuid, event: ServerEvent) -> RouteOutcome {
        self.stats.broadcasts.fetch_add(1, Ordering::Relaxed);

        let mut outcome = RouteOutcome::default();
        for handle in self.directory.connections_except(origin) {
            match handle.deliver(event.clone()) {
                Ok(()) => outcome.delivered += 1,
                Err(e) => {
                    outcome.failed += 1;
                    tracing::debug!(connection_id = %handle.id, error = %e, "Broadcast send failed");
                }
            }
        }

        tracing::debug!(
            event = event.name(),
            delivered = outcome.delivered,
            failed = outcome.failed,
            "Broadcast relayed"
        );
        outcome
    }

    fn reply(&self, origin: Uuid, event: ServerEvent) -> RouteOutcome {
        match self.directory.get_connection(origin) {
            Some(handle) => match handle.deliver(event) {
                Ok(()) => RouteOutcome::delivered(),
                Err(_) => RouteOutcome::failed(),
            },
            None => RouteOutcome::dropped(),
        }
    }

    fn suppress(&self, kind: NotificationKind) -> RouteOutcome {
        self.stats.notifications_suppressed.fetch_add(1, Ordering::Relaxed);
        NotificationMetrics::record_dropped("self");
        tracing::trace!(kind = kind.as_str(), "Self-notification suppressed");
        RouteOutcome::suppressed()
    }

    fn drop_offline(&self, kind: NotificationKind, recipient_id: &str) -> RouteOutcome {
        self.stats.notifications_dropped.fetch_add(1, Ordering::Relaxed);
        NotificationMetrics::record_dropped("offline");
        tracing::trace!(kind = kind.as_str(), recipient_id = %recipient_id, "Recipient offline, dropped");
        RouteOutcome::dropped()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    use crate::directory::ConnectionHandle;

    fn setup() -> (Arc<ConnectionDirectory>, EventRouter) {
        let directory = Arc::new(ConnectionDirectory::new());
        let router = EventRouter::new(directory.clone());
        (directory, router)
    }

    fn connect(
        directory: &ConnectionDirectory,
        user_id: &str,
    ) -> (Arc<ConnectionHandle>, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(8);
        let handle = directory.open(tx);
        directory.authenticate(user_id, handle.id);
        (handle, rx)
    }

    fn like(liker: &str, author: &str, name: &str) -> ClientEvent {
        ClientEvent::PostLiked(PostLikedPayload {
            post_id: "post-1".into(),
            liker_id: liker.into(),
            author_id: author.into(),
            like: json!({"id": "like-1", "actor": {"name": name}}),
        })
    }

    #[test]
    fn test_like_reaches_author_only() {
        let (directory, router) = setup();
        let (a, mut rx_a) = connect(&directory, "a");
        let (_b, mut rx_b) = connect(&directory, "b");

        let outcome = router.route(a.id, like("a", "b", "Anika")).unwrap();
        assert_eq!(outcome.delivered, 1);

        match rx_b.try_recv().unwrap() {
            ServerEvent::Notification(n) => {
                assert_eq!(n.kind, NotificationKind::Like);
                assert!(n.message.contains("Anika"));
                assert_eq!(n.data["id"], "like-1");
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(rx_a.try_recv().is_err());
    }

    #[test]
    fn test_self_like_suppressed() {
        let (directory, router) = setup();
        let (a, mut rx_a) = connect(&directory, "a");

        let outcome = router.route(a.id, like("a", "a", "Anika")).unwrap();
        assert_eq!(outcome.suppressed, 1);
        assert_eq!(outcome.delivered, 0);
        assert!(rx_a.try_recv().is_err());
        assert_eq!(router.stats().notifications_suppressed, 1);
    }

    #[test]
    fn test_offline_recipient_is_silent() {
        let (directory, router) = setup();
        let (a, _rx_a) = connect(&directory, "a");

        let outcome = router.route(a.id, like("a", "nobody", "Anika")).unwrap();
        assert_eq!(outcome, RouteOutcome { dropped: 1, ..Default::default() });
        assert_eq!(router.stats().notifications_dropped, 1);
    }

    #[test]
    fn test_missing_actor_is_event_error() {
        let (directory, router) = setup();
        let (a, _rx_a) = connect(&directory, "a");
        let (_b, mut rx_b) = connect(&directory, "b");

        let event = ClientEvent::PostCommented(PostCommentedPayload {
            post_id: "p".into(),
            commenter_id: "a".into(),
            author_id: "b".into(),
            comment: json!({"content": "hi"}),
        });

        let err = router.route(a.id, event).unwrap_err();
        assert!(matches!(err, RouteError::MissingActor("comment.actor")));
        assert!(rx_b.try_recv().is_err());
        assert_eq!(router.stats().events_malformed, 1);
    }

    #[test]
    fn test_new_post_fans_out_to_online_followers() {
        let (directory, router) = setup();
        let (author, mut rx_author) = connect(&directory, "author");
        let (_f1, mut rx_f1) = connect(&directory, "f1");
        let (_f2, mut rx_f2) = connect(&directory, "f2");

        let event = ClientEvent::NewPost(NewPostPayload {
            author_id: "author".into(),
            post: json!({"id": "p1", "author": {"name": "Sultana"}}),
            followers: vec![
                "f1".into(),
                "f2".into(),
                "f1".into(),
                "offline".into(),
                "author".into(),
            ],
        });

        let outcome = router.route(author.id, event).unwrap();
        assert_eq!(outcome.delivered, 2);
        assert_eq!(outcome.dropped, 1);
        assert_eq!(outcome.suppressed, 1);

        for rx in [&mut rx_f1, &mut rx_f2] {
            match rx.try_recv().unwrap() {
                ServerEvent::Notification(n) => {
                    assert_eq!(n.kind, NotificationKind::NewPost);
                    assert_eq!(n.message, "Sultana একটি নতুন পোস্ট করেছেন");
                }
                other => panic!("unexpected event: {:?}", other),
            }
            assert!(rx.try_recv().is_err());
        }
        assert!(rx_author.try_recv().is_err());
    }

    #[test]
    fn test_follow_notifies_followed_user() {
        let (directory, router) = setup();
        let (a, _rx_a) = connect(&directory, "a");
        let (_b, mut rx_b) = connect(&directory, "b");

        let event = ClientEvent::UserFollowed(UserFollowedPayload {
            follower_id: "a".into(),
            following_id: "b".into(),
            follow: json!({"actor": {"name": "Tanvir"}}),
        });

        assert_eq!(router.route(a.id, event).unwrap().delivered, 1);
        assert!(matches!(
            rx_b.try_recv().unwrap(),
            ServerEvent::Notification(ref n) if n.kind == NotificationKind::Follow
        ));
    }

    #[test]
    fn test_typing_broadcast_skips_sender() {
        let (directory, router) = setup();
        let (a, mut rx_a) = connect(&directory, "a");
        let (_b, mut rx_b) = connect(&directory, "b");
        // Unauthenticated sockets still see typing indicators
        let (tx, mut rx_anon) = mpsc::channel(8);
        directory.open(tx);

        let payload = crate::websocket::TypingPayload {
            post_id: "p1".into(),
            user_id: "a".into(),
            username: "anika".into(),
        };
        let outcome = router.route(a.id, ClientEvent::Typing(payload.clone())).unwrap();

        assert_eq!(outcome.delivered, 2);
        assert!(rx_a.try_recv().is_err());
        for rx in [&mut rx_b, &mut rx_anon] {
            assert!(matches!(rx.try_recv().unwrap(), ServerEvent::UserTyping(ref p) if *p == payload));
        }
    }

    #[test]
    fn test_ping_replies_to_origin() {
        let (directory, router) = setup();
        let (a, mut rx_a) = connect(&directory, "a");

        router.route(a.id, ClientEvent::Ping).unwrap();
        assert!(matches!(rx_a.try_recv().unwrap(), ServerEvent::Pong));
    }

    #[test]
    fn test_route_text_malformed() {
        let (directory, router) = setup();
        let (a, _rx) = connect(&directory, "a");

        assert!(matches!(
            router.route_text(a.id, "not json"),
            Err(RouteError::Malformed(_))
        ));
        assert!(matches!(
            router.route_text(a.id, r#"{"event":"post_liked","data":{"postId":"p"}}"#),
            Err(RouteError::Malformed(_))
        ));
        assert_eq!(router.stats().events_malformed, 2);
    }

    #[test]
    fn test_authenticate_via_route_text() {
        let (directory, router) = setup();
        let (tx, _rx) = mpsc::channel(8);
        let handle = directory.open(tx);

        router
            .route_text(handle.id, r#"{"event":"authenticate","data":"user-9"}"#)
            .unwrap();
        assert_eq!(directory.lookup("user-9").unwrap().id, handle.id);
        assert_eq!(router.stats().authentications, 1);
    }

    #[test]
    fn test_full_buffer_counts_failure() {
        let (directory, router) = setup();
        let (a, _rx_a) = connect(&directory, "a");
        let (tx, _rx_b) = mpsc::channel(1);
        let b = directory.open(tx);
        directory.authenticate("b", b.id);

        assert_eq!(router.route(a.id, like("a", "b", "Anika")).unwrap().delivered, 1);
        let outcome = router.route(a.id, like("a", "b", "Anika")).unwrap();
        assert_eq!(outcome.failed, 1);
        assert_eq!(router.stats().delivery_failed, 1);
    }

    #[test]
    fn test_outcome_merge() {
        let mut outcome = RouteOutcome::delivered();
        outcome.merge(RouteOutcome::dropped());
        outcome.merge(RouteOutcome::delivered());
        assert_eq!(outcome.delivered, 2);
        assert_eq!(outcome.dropped, 1);
    }
}
