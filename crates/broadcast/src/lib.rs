//! Event broadcast fabric.
//!
//! Room-scoped pub/sub with historical replay for transcript subscribers,
//! plus the small TTL key-value surface used for pending-join reservations
//! and named locks. The in-memory broker is the default; a Redis-style
//! broker slots in behind the same trait.

mod broadcaster;
mod pubsub;

pub use broadcaster::EventBroadcaster;
pub use pubsub::{MemoryPubSub, PubSub};

/// Room carrying every event of one transcript.
pub fn transcript_room(transcript_id: &str) -> String {
    format!("ts:{transcript_id}")
}

/// Reservation key held while a participant is mid-handshake.
pub fn pending_join_key(meeting_id: &str, connection_id: &str) -> String {
    format!("pending_join:{meeting_id}:{connection_id}")
}

/// Prefix matching every pending join of a meeting.
pub fn pending_join_prefix(meeting_id: &str) -> String {
    format!("pending_join:{meeting_id}:")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_and_key_formats() {
        assert_eq!(transcript_room("t-1"), "ts:t-1");
        assert_eq!(pending_join_key("m-1", "c-9"), "pending_join:m-1:c-9");
        assert!(pending_join_key("m-1", "c-9").starts_with(&pending_join_prefix("m-1")));
    }
}
