use shared::{
    domain::{
        Actor, CommentId, ReviewerId, TalkId, TalkStatus, VotePhase, MAX_COMMENT_CHARS,
    },
    error::{ApiError, ErrorCode, FieldErrors},
    protocol::{CommentPayload, TagSummary, TalkForm, TalkPayload, VoteSummary},
};
use storage::{is_unique_violation, Storage, StoredTalk};
use tracing::info;

pub mod guard;
pub mod notify;
pub mod phase;
pub mod tags;
pub mod votes;
pub mod workflow;

use notify::{Notification, NotificationOutbox};
use phase::VotePhaseGate;

const DUPLICATE_TITLE: &str = "a talk with this title already exists";

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
    pub phase: VotePhaseGate,
    pub outbox: NotificationOutbox,
}

impl ApiContext {
    /// Wires the engine to a store. Fails when the stored vote phase cannot
    /// be read.
    pub async fn bootstrap(storage: Storage, outbox: NotificationOutbox) -> anyhow::Result<Self> {
        let phase = VotePhaseGate::new(storage.clone());
        let current = phase.current_phase().await?;
        info!(phase = %current, "vote phase restored");
        Ok(Self {
            storage,
            phase,
            outbox,
        })
    }
}

pub async fn get_talk(
    ctx: &ApiContext,
    actor: &Actor,
    talk_id: TalkId,
) -> Result<TalkPayload, ApiError> {
    let talk = load_talk(ctx, talk_id).await?;
    talk_payload(ctx, talk, Some(actor), true).await
}

pub async fn list_my_talks(ctx: &ApiContext, actor: &Actor) -> Result<Vec<TalkPayload>, ApiError> {
    list_talks_by_speaker(ctx, actor.reviewer_id, None).await
}

pub async fn list_talks_by_speaker(
    ctx: &ApiContext,
    speaker_id: ReviewerId,
    status: Option<TalkStatus>,
) -> Result<Vec<TalkPayload>, ApiError> {
    ctx.storage
        .reviewer(speaker_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("speaker"))?;
    let talks = ctx
        .storage
        .list_talks_for_speaker(speaker_id, status)
        .await
        .map_err(internal)?;

    let mut payloads = Vec::with_capacity(talks.len());
    for talk in talks {
        payloads.push(talk_payload(ctx, talk, None, false).await?);
    }
    Ok(payloads)
}

/// Every talk, each carrying the administrator's own vote and, once voting
/// is closed, the average.
pub async fn list_all_talks(ctx: &ApiContext, actor: &Actor) -> Result<Vec<TalkPayload>, ApiError> {
    guard::require(guard::can_administer(actor))?;
    let talks = ctx.storage.list_talks().await.map_err(internal)?;

    let mut payloads = Vec::with_capacity(talks.len());
    for talk in talks {
        payloads.push(talk_payload(ctx, talk, Some(actor), false).await?);
    }
    Ok(payloads)
}

/// Creates a talk when the form has no id, otherwise updates title and
/// description. Tags are reconciled from `tagsname` in both cases.
pub async fn create_or_update_talk(
    ctx: &ApiContext,
    actor: &Actor,
    form: TalkForm,
) -> Result<TalkPayload, ApiError> {
    let (title, description, tag_names) = validate_form(&form)?;

    let talk_id = match form.id {
        None => {
            ensure_title_free(ctx, title).await?;
            let talk_id = ctx
                .storage
                .insert_talk(actor.reviewer_id, title, description)
                .await
                .map_err(title_conflict)?;
            info!(talk_id = talk_id.0, speaker_id = actor.reviewer_id.0, "talk created");
            talk_id
        }
        Some(talk_id) => {
            let existing = load_talk(ctx, talk_id).await?;
            guard::require(guard::can_mutate_talk(actor, &existing))?;
            if existing.title != title {
                ensure_title_free(ctx, title).await?;
            }
            ctx.storage
                .update_talk_text(talk_id, title, description)
                .await
                .map_err(title_conflict)?;
            info!(talk_id = talk_id.0, "talk updated");
            talk_id
        }
    };

    tags::reconcile(&ctx.storage, talk_id, tag_names).await?;
    let talk = load_talk(ctx, talk_id).await?;
    talk_payload(ctx, talk, Some(actor), false).await
}

pub async fn update_tags(
    ctx: &ApiContext,
    actor: &Actor,
    talk_id: TalkId,
    tag_names: Option<&str>,
) -> Result<(), ApiError> {
    let talk = load_talk(ctx, talk_id).await?;
    guard::require(guard::can_mutate_talk(actor, &talk))?;
    let tag_names = tag_names.ok_or_else(|| ApiError::invalid_field("tags", "required"))?;
    tags::reconcile(&ctx.storage, talk.talk_id, tag_names).await?;
    Ok(())
}

/// Deletes a talk with its comments, votes and tag links. Only allowed
/// before voting has started.
pub async fn delete_talk(ctx: &ApiContext, actor: &Actor, talk_id: TalkId) -> Result<(), ApiError> {
    let talk = load_talk(ctx, talk_id).await?;
    guard::require(guard::can_administer(actor))?;

    ctx.phase
        .with_phase(VotePhase::NotBegin, "deleting a talk", move || async move {
            let deleted = ctx
                .storage
                .delete_talk_cascade(talk.talk_id)
                .await
                .map_err(internal)?;
            if !deleted {
                return Err(ApiError::not_found("talk"));
            }
            info!(talk_id = talk_id.0, "talk deleted");
            Ok(())
        })
        .await
}

pub async fn add_comment(
    ctx: &ApiContext,
    actor: &Actor,
    talk_id: TalkId,
    comment: Option<&str>,
) -> Result<CommentId, ApiError> {
    let talk = load_talk(ctx, talk_id).await?;
    let comment = comment.ok_or_else(|| ApiError::invalid_field("comment", "required"))?;
    guard::require(guard::can_mutate_talk(actor, &talk))?;

    let length = comment.chars().count();
    if length == 0 || length > MAX_COMMENT_CHARS {
        return Err(ApiError::invalid_field(
            "comment",
            format!("comment must be between 1 and {MAX_COMMENT_CHARS} characters"),
        ));
    }

    let comment_id = ctx
        .storage
        .insert_comment(talk.talk_id, actor.reviewer_id, comment)
        .await
        .map_err(internal)?;
    info!(talk_id = talk_id.0, comment_id = comment_id.0, "comment added");

    for recipient in comment_recipients(ctx, actor, &talk).await? {
        ctx.outbox.emit(Notification::CommentAdded {
            recipient,
            talk_id: talk.talk_id,
            talk_title: talk.title.clone(),
            author_name: actor.full_name.clone(),
            comment: comment.to_string(),
        });
    }
    Ok(comment_id)
}

pub async fn set_talk_status(
    ctx: &ApiContext,
    actor: &Actor,
    talk_id: TalkId,
    status: Option<TalkStatus>,
) -> Result<(), ApiError> {
    let talk = load_talk(ctx, talk_id).await?;
    guard::require(guard::can_administer(actor))?;
    workflow::apply_status(ctx, &talk, status).await?;
    Ok(())
}

pub async fn cast_vote(
    ctx: &ApiContext,
    actor: &Actor,
    talk_id: TalkId,
    score: i64,
) -> Result<VoteSummary, ApiError> {
    let talk = load_talk(ctx, talk_id).await?;
    votes::cast_vote(ctx, actor, &talk, score).await
}

pub async fn current_phase(ctx: &ApiContext) -> Result<VotePhase, ApiError> {
    ctx.phase.current_phase().await.map_err(internal)
}

pub async fn set_vote_phase(
    ctx: &ApiContext,
    actor: &Actor,
    phase: VotePhase,
) -> Result<VotePhase, ApiError> {
    guard::require(guard::can_administer(actor))?;
    ctx.phase.transition(phase).await.map_err(internal)?;
    Ok(phase)
}

async fn load_talk(ctx: &ApiContext, talk_id: TalkId) -> Result<StoredTalk, ApiError> {
    ctx.storage
        .load_talk(talk_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("talk"))
}

fn validate_form(form: &TalkForm) -> Result<(&str, &str, &str), ApiError> {
    let mut errors = FieldErrors::new();
    let title = required(&mut errors, "title", form.title.as_deref());
    let description = required(&mut errors, "description", form.description.as_deref());
    let tag_names = required(&mut errors, "tagsname", form.tagsname.as_deref());

    if errors.is_empty() {
        Ok((title, description, tag_names))
    } else {
        Err(ApiError::from_fields(errors))
    }
}

fn required<'a>(errors: &mut FieldErrors, field: &str, value: Option<&'a str>) -> &'a str {
    match value {
        Some(value) if !value.trim().is_empty() => value,
        _ => {
            errors.insert(field.to_string(), vec!["required".to_string()]);
            ""
        }
    }
}

async fn ensure_title_free(ctx: &ApiContext, title: &str) -> Result<(), ApiError> {
    let taken = ctx
        .storage
        .talk_id_by_title(title)
        .await
        .map_err(internal)?
        .is_some();
    if taken {
        Err(ApiError::invalid_field("title", DUPLICATE_TITLE))
    } else {
        Ok(())
    }
}

/// A concurrent writer can still win the title between the check and the
/// write; the UNIQUE constraint catches that case.
fn title_conflict(err: anyhow::Error) -> ApiError {
    if is_unique_violation(&err) {
        ApiError::invalid_field("title", DUPLICATE_TITLE)
    } else {
        internal(err)
    }
}

/// Speakers' comments go to the administrators, everyone else's to the speaker.
async fn comment_recipients(
    ctx: &ApiContext,
    actor: &Actor,
    talk: &StoredTalk,
) -> Result<Vec<String>, ApiError> {
    if actor.reviewer_id != talk.speaker_id {
        return Ok(vec![talk.speaker_email.clone()]);
    }
    let admins = ctx.storage.admin_emails().await.map_err(internal)?;
    Ok(admins
        .into_iter()
        .filter(|email| *email != actor.email)
        .collect())
}

/// Builds the wire view of a talk. Votes and averages are only attached
/// for administrators, and the average only once voting is closed.
async fn talk_payload(
    ctx: &ApiContext,
    talk: StoredTalk,
    viewer: Option<&Actor>,
    with_comments: bool,
) -> Result<TalkPayload, ApiError> {
    let tags = ctx
        .storage
        .tags_for_talk(talk.talk_id)
        .await
        .map_err(internal)?
        .into_iter()
        .map(|tag| TagSummary {
            tag_id: tag.tag_id,
            name: tag.name,
        })
        .collect();

    let mut vote = None;
    let mut average = None;
    if let Some(admin) = viewer.filter(|actor| guard::can_administer(actor)) {
        vote = votes::vote_of(ctx, admin.reviewer_id, talk.talk_id).await?;
        match votes::average_for(ctx, talk.talk_id).await {
            Ok(mean) => average = mean,
            Err(err) if err.code == ErrorCode::PhaseViolation => {}
            Err(err) => return Err(err),
        }
    }

    let comments = if with_comments {
        ctx.storage
            .comments_for_talk(talk.talk_id)
            .await
            .map_err(internal)?
            .into_iter()
            .map(|comment| CommentPayload {
                comment_id: comment.comment_id,
                author_id: comment.author_id,
                author_name: comment.author_name,
                comment: comment.body,
                created_at: comment.created_at,
            })
            .collect()
    } else {
        Vec::new()
    };

    Ok(TalkPayload {
        talk_id: talk.talk_id,
        title: talk.title,
        description: talk.description,
        status: talk.status,
        speaker_id: talk.speaker_id,
        speaker_name: talk.speaker_name,
        tags,
        average,
        vote,
        comments,
    })
}

pub(crate) fn internal(err: anyhow::Error) -> ApiError {
    ApiError::new(ErrorCode::Internal, err.to_string())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
