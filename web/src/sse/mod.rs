//! SSE HTTP handlers for the web layer.
//!
//! This module contains only the Axum handlers for live stream endpoints.
//! The streaming core (StreamingService, StreamManager, framing) lives in the
//! `sse` crate to avoid circular dependencies.

pub mod handler;
