//! HTTP/WebSocket front end for the status relay.
//!
//! - `POST /upload` stores an artifact and answers `{"imageID": "..."}`.
//! - `POST /imageStatus` receives the worker's status notifications.
//! - `GET /imageStatus/{id}/ws` streams `{"status": "..."}` frames until the
//!   lifecycle ends.

pub mod api;
pub mod app;
pub mod config;
pub mod publisher;
pub mod storage;
pub mod types;
pub mod websocket;

pub use app::{build_router, AppState, RouterOptions};
pub use config::{CliArgs, ServerConfig, SnsTopics};
