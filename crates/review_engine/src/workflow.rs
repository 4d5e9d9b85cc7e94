use shared::{domain::TalkStatus, error::ApiError};
use storage::StoredTalk;
use tracing::info;

use crate::{notify::Notification, ApiContext};

/// Moves `talk` to `next`. Any status may follow any other; setting the
/// current status again writes nothing and notifies nobody.
///
/// Returns whether a change was committed.
pub async fn apply_status(
    ctx: &ApiContext,
    talk: &StoredTalk,
    next: Option<TalkStatus>,
) -> Result<bool, ApiError> {
    if talk.status == next {
        return Ok(false);
    }

    ctx.storage
        .set_talk_status(talk.talk_id, next)
        .await
        .map_err(crate::internal)?;
    info!(
        talk_id = talk.talk_id.0,
        from = ?talk.status,
        to = ?next,
        "talk status changed"
    );

    if let Some(status) = next {
        ctx.outbox.emit(Notification::StatusChanged {
            recipient: talk.speaker_email.clone(),
            talk_id: talk.talk_id,
            talk_title: talk.title.clone(),
            status,
        });
    }
    Ok(true)
}
