//! Event routing: one inbound client event in, notifications out.
//!
//! | inbound          | recipient                        | suppressed when       |
//! |------------------|----------------------------------|-----------------------|
//! | `new_post`       | each listed follower             | follower == author    |
//! | `post_liked`     | post author                      | liker == author       |
//! | `post_commented` | post author                      | commenter == author   |
//! | `user_followed`  | followed user                    | never                 |
//! | `typing`, `stop_typing`, `post_updated` | every connection but the sender | n/a |

mod dispatch;
mod events;

pub use dispatch::{EventRouter, RouteError, RouteOutcome, RouterStats, RouterStatsSnapshot};
pub use events::{NotificationEvent, NotificationKind};
