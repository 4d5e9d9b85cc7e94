use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{CommentId, ReviewerId, TagId, TalkId, TalkStatus, VoteId, VotePhase};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagSummary {
    pub tag_id: TagId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteSummary {
    pub vote_id: VoteId,
    pub reviewer_id: ReviewerId,
    pub talk_id: TalkId,
    pub score: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentPayload {
    pub comment_id: CommentId,
    pub author_id: ReviewerId,
    pub author_name: String,
    pub comment: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TalkPayload {
    pub talk_id: TalkId,
    pub title: String,
    pub description: String,
    pub status: Option<TalkStatus>,
    pub speaker_id: ReviewerId,
    pub speaker_name: String,
    pub tags: Vec<TagSummary>,
    /// Only present once voting is closed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average: Option<f64>,
    /// The viewing administrator's own vote.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vote: Option<VoteSummary>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub comments: Vec<CommentPayload>,
}

/// Submission form. A missing `id` creates a talk, a present one updates it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TalkForm {
    #[serde(default)]
    pub id: Option<TalkId>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tagsname: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateTagsRequest {
    #[serde(default)]
    pub tags: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentRequest {
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusRequest {
    pub status: Option<TalkStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VotePhasePayload {
    pub phase: VotePhase,
}
