//! Connection directory for live WebSocket connections
//!
//! This module provides:
//! - Connection handles with fire-and-forget delivery
//! - The user id -> connection binding (one connection per user, last wins)
//! - Idle connection detection for the heartbeat task

mod handle;
mod registry;

pub use handle::{ConnectionHandle, DeliveryError};
pub use registry::{ConnectionDirectory, DirectoryEntry, DirectoryStats};
