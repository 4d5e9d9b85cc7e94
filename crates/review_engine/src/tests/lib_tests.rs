use shared::domain::{MAX_SCORE, MIN_SCORE};
use tokio::sync::mpsc;

use super::*;

struct Fixture {
    ctx: ApiContext,
    outbox: mpsc::Receiver<Notification>,
    admin: Actor,
    speaker: Actor,
    stranger: Actor,
}

async fn reviewer(storage: &Storage, email: &str, name: &str, admin: bool) -> Actor {
    let id = storage
        .create_reviewer(email, name, admin)
        .await
        .expect("reviewer");
    storage.reviewer(id).await.expect("load").expect("some")
}

async fn setup() -> Fixture {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let admin = reviewer(&storage, "admin@example.org", "Ada Admin", true).await;
    let speaker = reviewer(&storage, "speaker@example.org", "Sam Speaker", false).await;
    let stranger = reviewer(&storage, "other@example.org", "Otto Other", false).await;
    let (outbox, rx) = NotificationOutbox::channel(32);
    let ctx = ApiContext::bootstrap(storage, outbox).await.expect("ctx");
    Fixture {
        ctx,
        outbox: rx,
        admin,
        speaker,
        stranger,
    }
}

fn form(title: &str, tags: &str) -> TalkForm {
    TalkForm {
        id: None,
        title: Some(title.to_string()),
        description: Some("A walk through real-world code".to_string()),
        tagsname: Some(tags.to_string()),
    }
}

async fn submit(fx: &Fixture, title: &str, tags: &str) -> TalkId {
    create_or_update_talk(&fx.ctx, &fx.speaker, form(title, tags))
        .await
        .expect("create talk")
        .talk_id
}

async fn move_to_phase(fx: &Fixture, phase: VotePhase) {
    set_vote_phase(&fx.ctx, &fx.admin, phase)
        .await
        .expect("phase");
}

async fn tag_names(fx: &Fixture, talk_id: TalkId) -> Vec<String> {
    fx.ctx
        .storage
        .tags_for_talk(talk_id)
        .await
        .expect("tags")
        .into_iter()
        .map(|t| t.name)
        .collect()
}

async fn revision(fx: &Fixture, talk_id: TalkId) -> i64 {
    fx.ctx
        .storage
        .load_talk(talk_id)
        .await
        .expect("load")
        .expect("talk")
        .revision
}

#[tokio::test]
async fn create_assigns_speaker_and_tags() {
    let fx = setup().await;
    let created = create_or_update_talk(&fx.ctx, &fx.speaker, form("Async Rust", "rust,async"))
        .await
        .expect("create");
    assert_eq!(created.speaker_id, fx.speaker.reviewer_id);
    assert_eq!(created.status, None);
    let names: Vec<_> = created.tags.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["RUST", "ASYNC"]);
}

#[tokio::test]
async fn duplicate_title_is_rejected_without_creating_a_talk() {
    let fx = setup().await;
    submit(&fx, "Async Rust", "rust").await;

    let err = create_or_update_talk(&fx.ctx, &fx.stranger, form("Async Rust", "web"))
        .await
        .expect_err("duplicate");
    assert_eq!(err.code, ErrorCode::Validation);
    assert!(err.fields.contains_key("title"));
    assert_eq!(fx.ctx.storage.list_talks().await.expect("talks").len(), 1);

    create_or_update_talk(&fx.ctx, &fx.stranger, form("async rust", "web"))
        .await
        .expect("titles compare case-sensitively");
}

#[tokio::test]
async fn missing_form_fields_are_reported_per_field() {
    let fx = setup().await;
    let err = create_or_update_talk(
        &fx.ctx,
        &fx.speaker,
        TalkForm {
            title: Some("   ".into()),
            ..TalkForm::default()
        },
    )
    .await
    .expect_err("invalid");
    assert_eq!(err.code, ErrorCode::Validation);
    let fields: Vec<_> = err.fields.keys().map(String::as_str).collect();
    assert_eq!(fields, vec!["description", "tagsname", "title"]);
    assert!(fx.ctx.storage.list_talks().await.expect("talks").is_empty());
}

#[tokio::test]
async fn update_keeps_own_title_and_guards_ownership() {
    let fx = setup().await;
    let talk_id = submit(&fx, "Async Rust", "rust").await;

    let mut update = form("Async Rust", "rust,tokio");
    update.id = Some(talk_id);
    update.description = Some("Now with executors".into());
    let updated = create_or_update_talk(&fx.ctx, &fx.speaker, update.clone())
        .await
        .expect("speaker updates own talk");
    assert_eq!(updated.description, "Now with executors");
    assert_eq!(tag_names(&fx, talk_id).await, vec!["RUST", "TOKIO"]);

    let err = create_or_update_talk(&fx.ctx, &fx.stranger, update)
        .await
        .expect_err("stranger");
    assert_eq!(err.code, ErrorCode::Unauthorized);
}

#[tokio::test]
async fn renaming_onto_another_title_is_rejected() {
    let fx = setup().await;
    submit(&fx, "First", "a").await;
    let second = submit(&fx, "Second", "b").await;

    let mut rename = form("First", "b");
    rename.id = Some(second);
    let err = create_or_update_talk(&fx.ctx, &fx.speaker, rename)
        .await
        .expect_err("taken");
    assert_eq!(err.code, ErrorCode::Validation);
    let talk = get_talk(&fx.ctx, &fx.speaker, second).await.expect("talk");
    assert_eq!(talk.title, "Second");
}

#[tokio::test]
async fn update_tags_applies_the_delta() {
    let fx = setup().await;
    let talk_id = submit(&fx, "Tags", "A,B").await;

    update_tags(&fx.ctx, &fx.speaker, talk_id, Some("B,C"))
        .await
        .expect("update");
    assert_eq!(tag_names(&fx, talk_id).await, vec!["B", "C"]);

    update_tags(&fx.ctx, &fx.admin, talk_id, Some("go"))
        .await
        .expect("admin update");
    update_tags(&fx.ctx, &fx.admin, talk_id, Some("GO"))
        .await
        .expect("same tag");
    assert_eq!(tag_names(&fx, talk_id).await, vec!["GO"]);
}

#[tokio::test]
async fn strangers_cannot_mutate_anything() {
    let fx = setup().await;
    let talk_id = submit(&fx, "Guarded", "A").await;
    move_to_phase(&fx, VotePhase::Open).await;
    let before = revision(&fx, talk_id).await;

    let err = update_tags(&fx.ctx, &fx.stranger, talk_id, Some("X"))
        .await
        .expect_err("tags");
    assert_eq!(err.code, ErrorCode::Unauthorized);

    let err = set_talk_status(&fx.ctx, &fx.stranger, talk_id, Some(TalkStatus::Accepted))
        .await
        .expect_err("status");
    assert_eq!(err.code, ErrorCode::Unauthorized);

    let err = cast_vote(&fx.ctx, &fx.stranger, talk_id, 5)
        .await
        .expect_err("vote");
    assert_eq!(err.code, ErrorCode::Unauthorized);

    let err = add_comment(&fx.ctx, &fx.stranger, talk_id, Some("hi"))
        .await
        .expect_err("comment");
    assert_eq!(err.code, ErrorCode::Unauthorized);

    assert_eq!(revision(&fx, talk_id).await, before);
    assert_eq!(tag_names(&fx, talk_id).await, vec!["A"]);
    assert_eq!(
        fx.ctx.storage.count_votes_for_talk(talk_id).await.expect("count"),
        0
    );
}

#[tokio::test]
async fn speaker_cannot_set_status_or_vote() {
    let fx = setup().await;
    let talk_id = submit(&fx, "Own talk", "A").await;
    move_to_phase(&fx, VotePhase::Open).await;

    let err = set_talk_status(&fx.ctx, &fx.speaker, talk_id, Some(TalkStatus::Accepted))
        .await
        .expect_err("status");
    assert_eq!(err.code, ErrorCode::Unauthorized);
    let err = cast_vote(&fx.ctx, &fx.speaker, talk_id, 5)
        .await
        .expect_err("vote");
    assert_eq!(err.code, ErrorCode::Unauthorized);
}

#[tokio::test]
async fn status_change_persists_and_notifies_speaker() {
    let mut fx = setup().await;
    let talk_id = submit(&fx, "Status", "A").await;
    let before = revision(&fx, talk_id).await;

    set_talk_status(&fx.ctx, &fx.admin, talk_id, Some(TalkStatus::Accepted))
        .await
        .expect("accept");
    assert_eq!(revision(&fx, talk_id).await, before + 1);

    let notification = fx.outbox.try_recv().expect("notification");
    assert_eq!(
        notification,
        Notification::StatusChanged {
            recipient: "speaker@example.org".into(),
            talk_id,
            talk_title: "Status".into(),
            status: TalkStatus::Accepted,
        }
    );

    let accepted = list_talks_by_speaker(
        &fx.ctx,
        fx.speaker.reviewer_id,
        Some(TalkStatus::Accepted),
    )
    .await
    .expect("accepted");
    assert_eq!(accepted.len(), 1);
}

#[tokio::test]
async fn setting_the_current_status_is_a_no_op() {
    let mut fx = setup().await;
    let talk_id = submit(&fx, "Idempotent", "A").await;
    set_talk_status(&fx.ctx, &fx.admin, talk_id, Some(TalkStatus::Rejected))
        .await
        .expect("reject");
    fx.outbox.try_recv().expect("first notification");
    let before = revision(&fx, talk_id).await;

    set_talk_status(&fx.ctx, &fx.admin, talk_id, Some(TalkStatus::Rejected))
        .await
        .expect("again");
    assert_eq!(revision(&fx, talk_id).await, before);
    assert!(fx.outbox.try_recv().is_err());
}

#[tokio::test]
async fn clearing_status_writes_without_notifying() {
    let mut fx = setup().await;
    let talk_id = submit(&fx, "Undecided", "A").await;
    set_talk_status(&fx.ctx, &fx.admin, talk_id, Some(TalkStatus::Waitlisted))
        .await
        .expect("waitlist");
    fx.outbox.try_recv().expect("notification");

    set_talk_status(&fx.ctx, &fx.admin, talk_id, None)
        .await
        .expect("clear");
    let talk = get_talk(&fx.ctx, &fx.admin, talk_id).await.expect("talk");
    assert_eq!(talk.status, None);
    assert!(fx.outbox.try_recv().is_err());
}

#[tokio::test]
async fn status_change_survives_a_closed_outbox() {
    let mut fx = setup().await;
    let talk_id = submit(&fx, "Lonely", "A").await;
    fx.outbox.close();

    set_talk_status(&fx.ctx, &fx.admin, talk_id, Some(TalkStatus::Accepted))
        .await
        .expect("status still applied");
    let talk = get_talk(&fx.ctx, &fx.admin, talk_id).await.expect("talk");
    assert_eq!(talk.status, Some(TalkStatus::Accepted));
}

#[tokio::test]
async fn vote_upsert_keeps_one_vote_per_pair() {
    let fx = setup().await;
    let talk_id = submit(&fx, "Votes", "A").await;
    move_to_phase(&fx, VotePhase::Open).await;

    for score in MIN_SCORE..=MAX_SCORE {
        cast_vote(&fx.ctx, &fx.admin, talk_id, score)
            .await
            .expect("vote");
        let vote = votes::vote_of(&fx.ctx, fx.admin.reviewer_id, talk_id)
            .await
            .expect("lookup")
            .expect("vote");
        assert_eq!(vote.score, score);
        assert_eq!(
            fx.ctx.storage.count_votes_for_talk(talk_id).await.expect("count"),
            1
        );
    }
}

#[tokio::test]
async fn out_of_range_scores_are_validation_errors() {
    let fx = setup().await;
    let talk_id = submit(&fx, "Range", "A").await;
    move_to_phase(&fx, VotePhase::Open).await;

    for score in [0, 6, -1] {
        let err = cast_vote(&fx.ctx, &fx.admin, talk_id, score)
            .await
            .expect_err("out of range");
        assert_eq!(err.code, ErrorCode::Validation);
    }
    assert_eq!(
        fx.ctx.storage.count_votes_for_talk(talk_id).await.expect("count"),
        0
    );
}

#[tokio::test]
async fn votes_outside_open_phase_are_phase_violations() {
    let fx = setup().await;
    let talk_id = submit(&fx, "Gate", "A").await;

    let err = cast_vote(&fx.ctx, &fx.admin, talk_id, 3)
        .await
        .expect_err("not begun");
    assert_eq!(err.code, ErrorCode::PhaseViolation);

    move_to_phase(&fx, VotePhase::Open).await;
    cast_vote(&fx.ctx, &fx.admin, talk_id, 3).await.expect("open");

    move_to_phase(&fx, VotePhase::Closed).await;
    let err = cast_vote(&fx.ctx, &fx.admin, talk_id, 5)
        .await
        .expect_err("closed");
    assert_eq!(err.code, ErrorCode::PhaseViolation);

    let vote = votes::vote_of(&fx.ctx, fx.admin.reviewer_id, talk_id)
        .await
        .expect("lookup")
        .expect("vote");
    assert_eq!(vote.score, 3);
}

#[tokio::test]
async fn average_is_hidden_until_voting_closes() {
    let fx = setup().await;
    let talk_id = submit(&fx, "Average", "A").await;
    let second_admin = reviewer(&fx.ctx.storage, "root@example.org", "Root", true).await;

    let err = votes::average_for(&fx.ctx, talk_id)
        .await
        .expect_err("not begun");
    assert_eq!(err.code, ErrorCode::PhaseViolation);

    move_to_phase(&fx, VotePhase::Open).await;
    cast_vote(&fx.ctx, &fx.admin, talk_id, 4).await.expect("vote");
    cast_vote(&fx.ctx, &second_admin, talk_id, 1).await.expect("vote");

    let err = votes::average_for(&fx.ctx, talk_id)
        .await
        .expect_err("open");
    assert_eq!(err.code, ErrorCode::PhaseViolation);
    let listed = list_all_talks(&fx.ctx, &fx.admin).await.expect("list");
    assert_eq!(listed[0].average, None);
    assert_eq!(listed[0].vote.as_ref().map(|v| v.score), Some(4));

    move_to_phase(&fx, VotePhase::Closed).await;
    let first = votes::average_for(&fx.ctx, talk_id).await.expect("closed");
    let second = votes::average_for(&fx.ctx, talk_id).await.expect("closed");
    assert_eq!(first, Some(2.5));
    assert_eq!(first, second);

    let listed = list_all_talks(&fx.ctx, &fx.admin).await.expect("list");
    assert_eq!(listed[0].average, Some(2.5));
}

#[tokio::test]
async fn speakers_never_see_votes_or_averages() {
    let fx = setup().await;
    let talk_id = submit(&fx, "Private", "A").await;
    move_to_phase(&fx, VotePhase::Open).await;
    cast_vote(&fx.ctx, &fx.admin, talk_id, 5).await.expect("vote");
    move_to_phase(&fx, VotePhase::Closed).await;

    let talk = get_talk(&fx.ctx, &fx.speaker, talk_id).await.expect("talk");
    assert_eq!(talk.vote, None);
    assert_eq!(talk.average, None);

    let err = list_all_talks(&fx.ctx, &fx.speaker)
        .await
        .expect_err("admin only");
    assert_eq!(err.code, ErrorCode::Unauthorized);
}

#[tokio::test]
async fn delete_only_before_voting_begins() {
    let fx = setup().await;
    let talk_id = submit(&fx, "Doomed", "KEEP").await;
    add_comment(&fx.ctx, &fx.speaker, talk_id, Some("draft"))
        .await
        .expect("comment");

    for phase in [VotePhase::Open, VotePhase::Closed] {
        move_to_phase(&fx, phase).await;
        let err = delete_talk(&fx.ctx, &fx.admin, talk_id)
            .await
            .expect_err("phase");
        assert_eq!(err.code, ErrorCode::PhaseViolation);

        let talk = get_talk(&fx.ctx, &fx.admin, talk_id).await.expect("still there");
        assert_eq!(talk.comments.len(), 1);
        assert_eq!(tag_names(&fx, talk_id).await, vec!["KEEP"]);
    }

    move_to_phase(&fx, VotePhase::NotBegin).await;
    let err = delete_talk(&fx.ctx, &fx.speaker, talk_id)
        .await
        .expect_err("speakers cannot delete");
    assert_eq!(err.code, ErrorCode::Unauthorized);

    delete_talk(&fx.ctx, &fx.admin, talk_id).await.expect("delete");
    let err = get_talk(&fx.ctx, &fx.admin, talk_id)
        .await
        .expect_err("gone");
    assert_eq!(err.code, ErrorCode::NotFound);
    assert!(fx
        .ctx
        .storage
        .comments_for_talk(talk_id)
        .await
        .expect("comments")
        .is_empty());
    assert!(fx.ctx.storage.find_tag("KEEP").await.expect("tag").is_some());
}

#[tokio::test]
async fn comment_validation() {
    let fx = setup().await;
    let talk_id = submit(&fx, "Comments", "A").await;

    let err = add_comment(&fx.ctx, &fx.speaker, talk_id, None)
        .await
        .expect_err("missing");
    assert_eq!(err.fields.get("comment"), Some(&vec!["required".to_string()]));

    let err = add_comment(&fx.ctx, &fx.speaker, talk_id, Some(""))
        .await
        .expect_err("empty");
    assert_eq!(err.code, ErrorCode::Validation);

    let too_long = "x".repeat(141);
    let err = add_comment(&fx.ctx, &fx.speaker, talk_id, Some(&too_long))
        .await
        .expect_err("too long");
    assert_eq!(err.code, ErrorCode::Validation);

    let exactly = "é".repeat(140);
    add_comment(&fx.ctx, &fx.speaker, talk_id, Some(&exactly))
        .await
        .expect("140 characters fit");
}

#[tokio::test]
async fn comment_notifications_cross_sides() {
    let mut fx = setup().await;
    let talk_id = submit(&fx, "Dialogue", "A").await;

    add_comment(&fx.ctx, &fx.admin, talk_id, Some("Please add an outline"))
        .await
        .expect("admin comment");
    let to_speaker = fx.outbox.try_recv().expect("notification");
    assert_eq!(to_speaker.recipient(), "speaker@example.org");

    add_comment(&fx.ctx, &fx.speaker, talk_id, Some("Outline added"))
        .await
        .expect("speaker comment");
    let to_admin = fx.outbox.try_recv().expect("notification");
    assert_eq!(to_admin.recipient(), "admin@example.org");
    assert!(fx.outbox.try_recv().is_err());

    let talk = get_talk(&fx.ctx, &fx.speaker, talk_id).await.expect("talk");
    let authors: Vec<_> = talk.comments.iter().map(|c| c.author_name.as_str()).collect();
    assert_eq!(authors, vec!["Ada Admin", "Sam Speaker"]);
}

#[tokio::test]
async fn missing_talk_is_not_found() {
    let fx = setup().await;
    let err = cast_vote(&fx.ctx, &fx.admin, TalkId(404), 3)
        .await
        .expect_err("missing");
    assert_eq!(err.code, ErrorCode::NotFound);
    let err = list_talks_by_speaker(&fx.ctx, ReviewerId(404), None)
        .await
        .expect_err("missing speaker");
    assert_eq!(err.code, ErrorCode::NotFound);
}

#[tokio::test]
async fn only_admins_change_the_phase() {
    let fx = setup().await;
    let err = set_vote_phase(&fx.ctx, &fx.speaker, VotePhase::Open)
        .await
        .expect_err("speaker");
    assert_eq!(err.code, ErrorCode::Unauthorized);
    assert_eq!(current_phase(&fx.ctx).await.expect("phase"), VotePhase::NotBegin);

    let phase = set_vote_phase(&fx.ctx, &fx.admin, VotePhase::Open)
        .await
        .expect("admin");
    assert_eq!(phase, VotePhase::Open);
    assert_eq!(
        fx.ctx.storage.load_vote_phase().await.expect("persisted"),
        VotePhase::Open
    );
}

#[tokio::test]
async fn stored_phase_is_honored_without_a_restart() {
    let fx = setup().await;
    let talk_id = submit(&fx, "Out of band", "A").await;

    fx.ctx
        .storage
        .store_vote_phase(VotePhase::Open)
        .await
        .expect("store");
    assert_eq!(current_phase(&fx.ctx).await.expect("phase"), VotePhase::Open);
    cast_vote(&fx.ctx, &fx.admin, talk_id, 4)
        .await
        .expect("vote in stored OPEN phase");
    let err = delete_talk(&fx.ctx, &fx.admin, talk_id)
        .await
        .expect_err("voting has begun");
    assert_eq!(err.code, ErrorCode::PhaseViolation);

    fx.ctx
        .storage
        .store_vote_phase(VotePhase::Closed)
        .await
        .expect("store");
    let err = cast_vote(&fx.ctx, &fx.admin, talk_id, 1)
        .await
        .expect_err("closed");
    assert_eq!(err.code, ErrorCode::PhaseViolation);
    assert_eq!(
        votes::average_for(&fx.ctx, talk_id).await.expect("average"),
        Some(4.0)
    );
}

#[tokio::test]
async fn votes_racing_a_close_never_move_the_average_afterwards() {
    let fx = setup().await;
    let talk_id = submit(&fx, "Race", "A").await;
    move_to_phase(&fx, VotePhase::Open).await;

    let mut voters = Vec::new();
    for n in 0..8 {
        let admin = reviewer(
            &fx.ctx.storage,
            &format!("judge{n}@example.org"),
            &format!("Judge {n}"),
            true,
        )
        .await;
        let ctx = fx.ctx.clone();
        voters.push(tokio::spawn(async move {
            cast_vote(&ctx, &admin, talk_id, 1 + n % 5).await
        }));
    }
    set_vote_phase(&fx.ctx, &fx.admin, VotePhase::Closed)
        .await
        .expect("close");
    let settled = votes::average_for(&fx.ctx, talk_id).await.expect("average");

    for voter in voters {
        match voter.await.expect("join") {
            Ok(_) => {}
            Err(err) => assert_eq!(err.code, ErrorCode::PhaseViolation),
        }
    }
    assert_eq!(
        votes::average_for(&fx.ctx, talk_id).await.expect("average"),
        settled
    );
}
