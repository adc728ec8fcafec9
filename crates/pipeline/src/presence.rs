//! Presence reconciliation.
//!
//! The platform's room-presence API is the source of truth; local session
//! rows can be stale in either direction. Pending-join reservations keep a
//! meeting alive through the WebRTC handshake window.

use std::sync::Arc;

use async_trait::async_trait;

use rf_broadcast::EventBroadcaster;
use rf_domain::Result;
use rf_store::Stores;

/// Real-time occupancy of a platform room.
#[derive(Debug, Clone, Default)]
pub struct RoomPresence {
    pub total_count: u32,
}

/// The conferencing platform as presence reconciliation sees it.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    async fn get_room_presence(&self, room_name: &str) -> Result<RoomPresence>;

    /// Delete the platform room. A missing room is a success.
    async fn delete_room(&self, room_name: &str) -> Result<()>;
}

pub struct PresenceReconciler {
    stores: Stores,
    broadcaster: EventBroadcaster,
    platform: Arc<dyn PlatformClient>,
}

impl PresenceReconciler {
    pub fn new(
        stores: Stores,
        broadcaster: EventBroadcaster,
        platform: Arc<dyn PlatformClient>,
    ) -> Self {
        Self {
            stores,
            broadcaster,
            platform,
        }
    }

    /// Reconcile every active meeting once.
    pub async fn process_meetings(&self) -> Result<()> {
        for meeting in self.stores.meetings.list_active() {
            if let Err(e) = self.process_one(&meeting.id, &meeting.room_name).await {
                tracing::error!(meeting_id = %meeting.id, error = %e, "presence reconcile failed");
            }
        }
        Ok(())
    }

    async fn process_one(&self, meeting_id: &str, room_name: &str) -> Result<()> {
        match self.platform.get_room_presence(room_name).await {
            Ok(presence) if presence.total_count > 0 => {
                self.stores
                    .meetings
                    .set_num_clients(meeting_id, presence.total_count);
                Ok(())
            }
            Ok(_) => self.deactivate_if_quiet(meeting_id, room_name).await,
            Err(e) => {
                // Platform unavailable: fall back to the session rows and
                // keep the meeting alive while any look open.
                tracing::warn!(
                    meeting_id = %meeting_id,
                    error = %e,
                    "presence API failed, falling back to session rows"
                );
                let open = self.stores.sessions.get_active_by_meeting(meeting_id);
                if open.is_empty() {
                    self.deactivate_if_quiet(meeting_id, room_name).await
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Deactivate when the meeting has hosted someone and no join is in
    /// flight; the platform room goes away best-effort.
    async fn deactivate_if_quiet(&self, meeting_id: &str, room_name: &str) -> Result<()> {
        if !self.stores.sessions.has_any_by_meeting(meeting_id) {
            return Ok(());
        }
        if self.broadcaster.has_pending_join(meeting_id).await {
            tracing::debug!(meeting_id = %meeting_id, "pending join, keeping meeting active");
            return Ok(());
        }

        self.stores.meetings.deactivate(meeting_id);
        if let Err(e) = self.platform.delete_room(room_name).await {
            tracing::warn!(room_name = %room_name, error = %e, "platform room deletion failed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use parking_lot::Mutex;
    use rf_broadcast::MemoryPubSub;
    use rf_domain::Error;
    use rf_store::{Meeting, ParticipantSession};

    struct StubPlatform {
        presence: Mutex<Result<RoomPresence>>,
        deleted: Mutex<Vec<String>>,
        delete_result: Mutex<Result<()>>,
    }

    impl StubPlatform {
        fn reporting(count: u32) -> Arc<Self> {
            Arc::new(Self {
                presence: Mutex::new(Ok(RoomPresence { total_count: count })),
                deleted: Mutex::new(Vec::new()),
                delete_result: Mutex::new(Ok(())),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                presence: Mutex::new(Err(Error::Http("API unavailable".into()))),
                deleted: Mutex::new(Vec::new()),
                delete_result: Mutex::new(Ok(())),
            })
        }
    }

    #[async_trait]
    impl PlatformClient for StubPlatform {
        async fn get_room_presence(&self, _room_name: &str) -> Result<RoomPresence> {
            match &*self.presence.lock() {
                Ok(p) => Ok(p.clone()),
                Err(_) => Err(Error::Http("API unavailable".into())),
            }
        }

        async fn delete_room(&self, room_name: &str) -> Result<()> {
            self.deleted.lock().push(room_name.to_string());
            match &*self.delete_result.lock() {
                Ok(()) => Ok(()),
                Err(_) => Err(Error::NotFound("room".into())),
            }
        }
    }

    struct Fixture {
        reconciler: PresenceReconciler,
        stores: Stores,
        broadcaster: EventBroadcaster,
        platform: Arc<StubPlatform>,
        _dir: tempfile::TempDir,
    }

    fn fixture(platform: Arc<StubPlatform>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let stores = Stores::open(dir.path()).unwrap();
        let broadcaster = EventBroadcaster::new(
            stores.transcripts.clone(),
            Arc::new(MemoryPubSub::new()),
        );
        let reconciler =
            PresenceReconciler::new(stores.clone(), broadcaster.clone(), platform.clone());
        Fixture {
            reconciler,
            stores,
            broadcaster,
            platform,
            _dir: dir,
        }
    }

    fn active_meeting(stores: &Stores, id: &str, room_name: &str) -> Meeting {
        stores.meetings.create(Meeting {
            id: id.into(),
            room_name: room_name.into(),
            start_date: Utc::now(),
            end_date: None,
            num_clients: 1,
            is_active: true,
            room_id: Some("room-1".into()),
            platform: "daily".into(),
            cloud_recording_key: None,
            cloud_recording_duration: None,
        })
    }

    fn stale_session(stores: &Stores, meeting_id: &str) {
        stores.sessions.upsert_joined(ParticipantSession {
            meeting_id: meeting_id.into(),
            session_id: "stale-session".into(),
            user_id: Some("stale-user".into()),
            user_name: "Stale User".into(),
            joined_at: Utc::now() - chrono::Duration::minutes(5),
            left_at: None,
        });
    }

    #[tokio::test]
    async fn empty_room_deactivates_despite_stale_db_session() {
        let fx = fixture(StubPlatform::reporting(0));
        active_meeting(&fx.stores, "m1", "daily-room-20260131");
        stale_session(&fx.stores, "m1");

        fx.reconciler.process_meetings().await.unwrap();

        assert!(!fx.stores.meetings.get("m1").unwrap().is_active);
        assert_eq!(*fx.platform.deleted.lock(), vec!["daily-room-20260131"]);
    }

    #[tokio::test]
    async fn room_deletion_404_is_not_an_error() {
        let fx = fixture(StubPlatform::reporting(0));
        *fx.platform.delete_result.lock() = Err(Error::NotFound("room".into()));
        active_meeting(&fx.stores, "m1", "gone-room");
        stale_session(&fx.stores, "m1");

        fx.reconciler.process_meetings().await.unwrap();
        assert!(!fx.stores.meetings.get("m1").unwrap().is_active);
    }

    #[tokio::test]
    async fn occupied_room_stays_active() {
        let fx = fixture(StubPlatform::reporting(2));
        active_meeting(&fx.stores, "m1", "busy-room");
        stale_session(&fx.stores, "m1");

        fx.reconciler.process_meetings().await.unwrap();

        let meeting = fx.stores.meetings.get("m1").unwrap();
        assert!(meeting.is_active);
        assert_eq!(meeting.num_clients, 2);
        assert!(fx.platform.deleted.lock().is_empty());
    }

    #[tokio::test]
    async fn meeting_without_any_sessions_is_left_alone() {
        let fx = fixture(StubPlatform::reporting(0));
        active_meeting(&fx.stores, "m1", "never-used");

        fx.reconciler.process_meetings().await.unwrap();
        assert!(fx.stores.meetings.get("m1").unwrap().is_active);
    }

    #[tokio::test]
    async fn pending_join_blocks_deactivation() {
        let fx = fixture(StubPlatform::reporting(0));
        active_meeting(&fx.stores, "m1", "handshake-room");
        stale_session(&fx.stores, "m1");
        fx.broadcaster
            .create_pending_join("m1", "conn-42", std::time::Duration::from_secs(60))
            .await;

        fx.reconciler.process_meetings().await.unwrap();
        assert!(fx.stores.meetings.get("m1").unwrap().is_active);

        // Grace expired (key deleted on join or by TTL): next pass closes it.
        fx.broadcaster.clear_pending_join("m1", "conn-42").await;
        fx.reconciler.process_meetings().await.unwrap();
        assert!(!fx.stores.meetings.get("m1").unwrap().is_active);
    }

    #[tokio::test]
    async fn api_failure_with_open_sessions_stays_active() {
        let fx = fixture(StubPlatform::failing());
        active_meeting(&fx.stores, "m1", "dark-room");
        stale_session(&fx.stores, "m1");

        fx.reconciler.process_meetings().await.unwrap();
        assert!(fx.stores.meetings.get("m1").unwrap().is_active);
    }

    #[tokio::test]
    async fn api_failure_with_all_sessions_closed_deactivates() {
        let fx = fixture(StubPlatform::failing());
        active_meeting(&fx.stores, "m1", "dark-room");
        stale_session(&fx.stores, "m1");
        fx.stores.sessions.mark_left("m1", "stale-session");

        fx.reconciler.process_meetings().await.unwrap();
        assert!(!fx.stores.meetings.get("m1").unwrap().is_active);
    }
}
