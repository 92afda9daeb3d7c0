//! Topic naming rules.
//!
//! A tempdeck device publishes readings on `<prefix>/<serial>`, e.g.
//! `tempdeck/espruino/18fe34da-fa4a`.  The relay subscribes to exactly that
//! name, so the string must be a valid MQTT topic *name* (not a filter):
//! non-empty, at most 65535 bytes, and free of the `+`/`#` wildcards and NUL.

use thiserror::Error;

/// Longest topic the 2-byte string length prefix can carry.
pub const MAX_TOPIC_LEN: usize = u16::MAX as usize;

/// Reasons a topic name is rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TopicError {
    #[error("topic must not be empty")]
    Empty,

    #[error("topic is {0} bytes, the limit is 65535")]
    TooLong(usize),

    #[error("topic name must not contain the wildcard {0:?}")]
    Wildcard(char),

    #[error("topic must not contain a NUL character")]
    NulCharacter,
}

/// Joins a topic prefix and a device serial into the subscribed topic name.
///
/// Trailing slashes on the prefix are trimmed so that both
/// `tempdeck/espruino` and `tempdeck/espruino/` produce the same topic.  An
/// empty prefix yields the bare serial.
///
/// # Errors
///
/// Returns a [`TopicError`] if the resulting name fails
/// [`validate_topic_name`].
///
/// # Examples
///
/// ```rust
/// use tempdeck_core::domain::topic::build_topic;
///
/// let topic = build_topic("tempdeck/espruino/", "18fe34da-fa4a").unwrap();
/// assert_eq!(topic, "tempdeck/espruino/18fe34da-fa4a");
/// ```
pub fn build_topic(prefix: &str, serial: &str) -> Result<String, TopicError> {
    let prefix = prefix.trim_end_matches('/');
    let topic = if prefix.is_empty() {
        serial.to_string()
    } else {
        format!("{prefix}/{serial}")
    };
    validate_topic_name(&topic)?;
    Ok(topic)
}

/// Checks that `topic` may be used as a concrete topic name.
///
/// # Errors
///
/// Returns the first rule the name breaks.
pub fn validate_topic_name(topic: &str) -> Result<(), TopicError> {
    if topic.is_empty() {
        return Err(TopicError::Empty);
    }
    if topic.len() > MAX_TOPIC_LEN {
        return Err(TopicError::TooLong(topic.len()));
    }
    if let Some(c) = topic.chars().find(|c| matches!(c, '+' | '#')) {
        return Err(TopicError::Wildcard(c));
    }
    if topic.contains('\0') {
        return Err(TopicError::NulCharacter);
    }
    Ok(())
}
