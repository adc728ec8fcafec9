//! Consent-driven audio deletion and the public-mode retention sweep.

use chrono::{Duration, Utc};

use rf_domain::Result;

use crate::PipelineDeps;

/// Destroy raw audio when any participant denied consent.
///
/// Multitrack recordings delete every track key; single-file recordings
/// delete the object key. `audio_deleted` is only set when every delete
/// succeeded, so a partial failure leaves the flag unset and a retry can
/// finish the job.
pub async fn cleanup_consent(deps: &PipelineDeps, transcript_id: &str) -> Result<()> {
    let Some(transcript) = deps.stores.transcripts.get(transcript_id) else {
        return Ok(());
    };
    let Some(meeting_id) = &transcript.meeting_id else {
        return Ok(());
    };
    if !deps.stores.consents.any_denied(meeting_id) {
        return Ok(());
    }
    let Some(recording_id) = &transcript.recording_id else {
        return Ok(());
    };
    let Some(recording) = deps.stores.recordings.get(recording_id) else {
        return Ok(());
    };

    let keys: Vec<String> = match &recording.track_keys {
        Some(track_keys) if !track_keys.is_empty() => track_keys.clone(),
        _ => vec![recording.object_key.clone()],
    };

    tracing::info!(
        transcript_id = %transcript_id,
        meeting_id = %meeting_id,
        keys = keys.len(),
        bucket = %recording.bucket_name,
        "consent denied, deleting raw audio"
    );

    let mut all_deleted = true;
    for key in &keys {
        if let Err(e) = deps
            .storage
            .delete(key, Some(&recording.bucket_name))
            .await
        {
            tracing::error!(key = %key, error = %e, "failed to delete raw audio object");
            all_deleted = false;
        }
    }

    if all_deleted {
        deps.stores.transcripts.set_audio_deleted(transcript_id)?;
    }

    Ok(())
}

/// Hard-delete anonymous transcripts past the retention window, cascading
/// their meeting, recording, session, and consent rows.
pub async fn retention_sweep(deps: &PipelineDeps, retention_days: u32) -> Result<usize> {
    let cutoff = Utc::now() - Duration::days(retention_days as i64);
    let expired = deps.stores.transcripts.list_expired_anonymous(cutoff);
    let count = expired.len();

    for transcript in expired {
        tracing::info!(
            transcript_id = %transcript.id,
            created_at = %transcript.created_at,
            "retention sweep deleting transcript"
        );

        if let Some(meeting_id) = &transcript.meeting_id {
            deps.stores.sessions.delete_by_meeting(meeting_id);
            deps.stores.consents.delete_by_meeting(meeting_id);
            deps.stores.requests.delete_by_meeting_id(meeting_id);
            deps.stores.meetings.delete(meeting_id);
        }
        if let Some(recording_id) = &transcript.recording_id {
            deps.stores.recordings.delete(recording_id);
        }
        deps.stores.transcripts.delete(&transcript.id);
    }

    if count > 0 {
        deps.stores.flush()?;
    }
    Ok(count)
}
