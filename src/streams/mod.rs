//! Live input sources.
//!
//! Backfill reads history over JSON-RPC; once caught up, each worker follows
//! its program through a WebSocket log subscription.

pub mod websocket;

pub use websocket::LogStream;
