//! tempdeck-bridge library crate.
//!
//! Subscribes to one MQTT topic and relays every payload to all connected
//! browser charts over WebSocket.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! MQTT broker ──TCP──▶ infrastructure::broker ──publish()──▶ application::Relay
//!                                                              │   │   │
//!                                   per-session queues ────────┘   │   └──▶ ...
//!                                                                  ▼
//!                               infrastructure::http_server (/ws) ──▶ browser
//! ```
//!
//! - `domain/`          Pure types: Message, SessionId/SessionState, BridgeConfig
//! - `application/`     Relay core: session registry and drop-oldest queues
//! - `infrastructure/`  Broker subscription, reconnect loop, HTTP/WebSocket server
//!
//! # Layer rules
//!
//! - `domain` has no I/O and no async runtime.
//! - `application` depends on `domain` only; it never awaits on a socket.
//! - `infrastructure` depends on all other layers plus `tokio` and `axum`.

/// Domain layer: pure types (no I/O).
pub mod domain;

/// Application layer: the relay core.
pub mod application;

/// Infrastructure layer: broker connection and HTTP server.
pub mod infrastructure;
