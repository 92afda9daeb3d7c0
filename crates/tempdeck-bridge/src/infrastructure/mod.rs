//! Infrastructure layer for tempdeck-bridge.
//!
//! Everything that touches a socket lives here: the MQTT connection to the
//! broker, the reconnect supervisor, and the HTTP server that hosts the chart
//! page and the viewer WebSockets.

pub mod broker;
pub mod http_server;
pub mod page;
pub mod runner;
pub mod subscription;

pub use broker::{BrokerConnection, BrokerError};
pub use runner::{start_bridge, RunningBridge};
pub use subscription::{Subscription, SubscriptionState};
