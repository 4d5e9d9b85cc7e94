use shared::{domain::Actor, error::ApiError};
use storage::StoredTalk;

/// Administrators may touch any talk, speakers only their own.
pub fn can_mutate_talk(actor: &Actor, talk: &StoredTalk) -> bool {
    actor.admin || actor.reviewer_id == talk.speaker_id
}

pub fn can_administer(actor: &Actor) -> bool {
    actor.admin
}

pub fn require(allowed: bool) -> Result<(), ApiError> {
    if allowed {
        Ok(())
    } else {
        Err(ApiError::unauthorized())
    }
}
