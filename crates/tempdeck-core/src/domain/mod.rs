//! Domain rules shared by every tempdeck component.
//!
//! Nothing in here performs I/O.

/// Topic naming and validation.
pub mod topic;

pub use topic::{build_topic, validate_topic_name, TopicError};
