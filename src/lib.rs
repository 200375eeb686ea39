// Shared infrastructure
pub mod config;
pub mod error;
pub mod metrics;
pub mod telemetry;

// Domain
pub mod directory;
pub mod router;

// Application layer
pub mod api;
pub mod server;
pub mod websocket;

// Background tasks
pub mod tasks;
