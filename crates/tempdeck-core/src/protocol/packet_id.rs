//! Thread-safe packet identifier allocation.
//!
//! SUBSCRIBE, UNSUBSCRIBE and QoS > 0 PUBLISH packets carry a 16-bit packet
//! identifier that the broker echoes back in the matching acknowledgement.
//! MQTT forbids the value 0, so the counter runs 1, 2, ..., 65535, 1, ...

use std::sync::atomic::{AtomicU16, Ordering};

/// A lock-free, wrapping allocator for MQTT packet identifiers.
///
/// # Examples
///
/// ```rust
/// use tempdeck_core::protocol::PacketIdCounter;
///
/// let ids = PacketIdCounter::new();
/// assert_eq!(ids.next(), 1);
/// assert_eq!(ids.next(), 2);
/// ```
#[derive(Debug)]
pub struct PacketIdCounter {
    /// The identifier the next call to [`PacketIdCounter::next`] returns.
    inner: AtomicU16,
}

impl PacketIdCounter {
    /// Creates a counter whose first identifier is 1.
    pub fn new() -> Self {
        Self {
            inner: AtomicU16::new(1),
        }
    }

    /// Returns the next identifier, skipping 0 on wrap-around.
    ///
    /// `Relaxed` ordering is enough: identifiers only need to be distinct,
    /// they do not publish any other memory.
    pub fn next(&self) -> u16 {
        let advance = |id: u16| Some(if id == u16::MAX { 1 } else { id + 1 });
        // The closure never returns `None`, so both arms carry the old value.
        match self
            .inner
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, advance)
        {
            Ok(id) | Err(id) => id,
        }
    }
}

impl Default for PacketIdCounter {
    fn default() -> Self {
        Self::new()
    }
}
