mod handler;
mod message;

pub use handler::{ws_handler, WsQuery};
pub use message::{
    ClientEvent, ConnectedPayload, NewPostPayload, NotificationMessage, PostCommentedPayload,
    PostLikedPayload, PostUpdatedPayload, ServerEvent, StopTypingPayload, TypingPayload,
    UserFollowedPayload, GREETING,
};
