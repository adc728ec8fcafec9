//! Durable entity stores.
//!
//! Each store keeps its rows in an RwLock'd map and snapshots them to a
//! JSON file under the state path. Uniqueness and first-write-wins
//! guarantees are enforced under the write lock, which is what the
//! concurrent pollers and duplicate-dispatch paths lean on.

mod consents;
mod meetings;
mod persist;
mod recordings;
mod requests;
mod rooms;
mod sessions;
mod transcripts;

pub use consents::{ConsentStore, MeetingConsent};
pub use meetings::{Meeting, MeetingStore};
pub use recordings::{Recording, RecordingStatus, RecordingStore};
pub use requests::RequestStore;
pub use rooms::{Room, RoomStore};
pub use sessions::{ParticipantSession, SessionStore};
pub use transcripts::{NewTranscript, Transcript, TranscriptStore};

use std::path::Path;
use std::sync::Arc;

use rf_domain::Result;

/// Bundle of every store, constructed once at bootstrap and injected into
/// request handlers and pipeline tasks.
#[derive(Clone)]
pub struct Stores {
    pub transcripts: Arc<TranscriptStore>,
    pub meetings: Arc<MeetingStore>,
    pub recordings: Arc<RecordingStore>,
    pub requests: Arc<RequestStore>,
    pub sessions: Arc<SessionStore>,
    pub consents: Arc<ConsentStore>,
    pub rooms: Arc<RoomStore>,
}

impl Stores {
    pub fn open(state_path: &Path) -> Result<Self> {
        std::fs::create_dir_all(state_path)?;
        Ok(Self {
            transcripts: Arc::new(TranscriptStore::open(state_path)?),
            meetings: Arc::new(MeetingStore::open(state_path)?),
            recordings: Arc::new(RecordingStore::open(state_path)?),
            requests: Arc::new(RequestStore::open(state_path)?),
            sessions: Arc::new(SessionStore::open(state_path)?),
            consents: Arc::new(ConsentStore::open(state_path)?),
            rooms: Arc::new(RoomStore::open(state_path)?),
        })
    }

    /// Persist every store. Called on shutdown and after sweeps.
    pub fn flush(&self) -> Result<()> {
        self.transcripts.flush()?;
        self.meetings.flush()?;
        self.recordings.flush()?;
        self.requests.flush()?;
        self.sessions.flush()?;
        self.consents.flush()?;
        self.rooms.flush()?;
        Ok(())
    }
}
