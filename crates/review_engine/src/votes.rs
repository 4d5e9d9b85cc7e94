use shared::{
    domain::{Actor, ReviewerId, TalkId, VotePhase, MAX_SCORE, MIN_SCORE},
    error::ApiError,
    protocol::VoteSummary,
};
use storage::{StoredTalk, StoredVote};
use tracing::info;

use crate::{guard, ApiContext};

/// Records `score` as the actor's vote on `talk`, replacing any earlier one.
pub async fn cast_vote(
    ctx: &ApiContext,
    actor: &Actor,
    talk: &StoredTalk,
    score: i64,
) -> Result<VoteSummary, ApiError> {
    guard::require(guard::can_administer(actor))?;

    ctx.phase
        .with_phase(VotePhase::Open, "voting", move || async move {
            if !(MIN_SCORE..=MAX_SCORE).contains(&score) {
                return Err(ApiError::invalid_field(
                    "score",
                    format!("score must be between {MIN_SCORE} and {MAX_SCORE}"),
                ));
            }

            let vote_id = ctx
                .storage
                .upsert_vote(actor.reviewer_id, talk.talk_id, score)
                .await
                .map_err(crate::internal)?;
            info!(
                talk_id = talk.talk_id.0,
                reviewer_id = actor.reviewer_id.0,
                score,
                "vote recorded"
            );
            Ok(VoteSummary {
                vote_id,
                reviewer_id: actor.reviewer_id,
                talk_id: talk.talk_id,
                score,
            })
        })
        .await
}

pub async fn vote_of(
    ctx: &ApiContext,
    reviewer_id: ReviewerId,
    talk_id: TalkId,
) -> Result<Option<VoteSummary>, ApiError> {
    let vote = ctx
        .storage
        .vote_for(reviewer_id, talk_id)
        .await
        .map_err(crate::internal)?;
    Ok(vote.map(summary))
}

/// Mean score of a talk. Refused until voting is closed so that nobody sees
/// the running tally mid-vote; `None` when the talk got no votes.
pub async fn average_for(ctx: &ApiContext, talk_id: TalkId) -> Result<Option<f64>, ApiError> {
    ctx.phase.ensure(VotePhase::Closed, "reading averages").await?;
    ctx.storage
        .average_score(talk_id)
        .await
        .map_err(crate::internal)
}

fn summary(vote: StoredVote) -> VoteSummary {
    VoteSummary {
        vote_id: vote.vote_id,
        reviewer_id: vote.reviewer_id,
        talk_id: vote.talk_id,
        score: vote.score,
    }
}
