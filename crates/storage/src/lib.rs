use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use shared::domain::{
    Actor, CommentId, ReviewerId, TagId, TalkId, TalkStatus, VoteId, VotePhase,
};

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone)]
pub struct StoredTalk {
    pub talk_id: TalkId,
    pub title: String,
    pub description: String,
    pub status: Option<TalkStatus>,
    pub speaker_id: ReviewerId,
    pub speaker_email: String,
    pub speaker_name: String,
    /// Bumped on every write to the talk row or its tag set.
    pub revision: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredTag {
    pub tag_id: TagId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredVote {
    pub vote_id: VoteId,
    pub reviewer_id: ReviewerId,
    pub talk_id: TalkId,
    pub score: i64,
}

#[derive(Debug, Clone)]
pub struct StoredComment {
    pub comment_id: CommentId,
    pub talk_id: TalkId,
    pub author_id: ReviewerId,
    pub author_name: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

const TALK_COLUMNS: &str = "t.id, t.title, t.description, t.status, t.speaker_id, r.email, r.full_name, t.revision, t.created_at, t.updated_at
     FROM talks t
     INNER JOIN reviewers r ON r.id = t.speaker_id";

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        create_database_dir(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn create_reviewer(
        &self,
        email: &str,
        full_name: &str,
        admin: bool,
    ) -> Result<ReviewerId> {
        let rec = sqlx::query(
            "INSERT INTO reviewers (email, full_name, admin) VALUES (?, ?, ?)
             ON CONFLICT(email) DO UPDATE SET full_name=excluded.full_name, admin=excluded.admin
             RETURNING id",
        )
        .bind(email)
        .bind(full_name)
        .bind(admin)
        .fetch_one(&self.pool)
        .await?;
        Ok(ReviewerId(rec.get::<i64, _>(0)))
    }

    pub async fn reviewer(&self, reviewer_id: ReviewerId) -> Result<Option<Actor>> {
        let row = sqlx::query("SELECT id, email, full_name, admin FROM reviewers WHERE id = ?")
            .bind(reviewer_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| actor_from_row(&r)))
    }

    pub async fn admin_emails(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT email FROM reviewers WHERE admin = 1 ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|r| r.get::<String, _>(0)).collect())
    }

    /// Inserts a talk. A duplicate title surfaces as a unique violation,
    /// see [`is_unique_violation`].
    pub async fn insert_talk(
        &self,
        speaker_id: ReviewerId,
        title: &str,
        description: &str,
    ) -> Result<TalkId> {
        let rec = sqlx::query(
            "INSERT INTO talks (title, description, speaker_id) VALUES (?, ?, ?) RETURNING id",
        )
        .bind(title)
        .bind(description)
        .bind(speaker_id.0)
        .fetch_one(&self.pool)
        .await?;
        Ok(TalkId(rec.get::<i64, _>(0)))
    }

    pub async fn talk_id_by_title(&self, title: &str) -> Result<Option<TalkId>> {
        let row = sqlx::query("SELECT id FROM talks WHERE title = ?")
            .bind(title)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| TalkId(r.get::<i64, _>(0))))
    }

    pub async fn load_talk(&self, talk_id: TalkId) -> Result<Option<StoredTalk>> {
        let row = sqlx::query(&format!("SELECT {TALK_COLUMNS} WHERE t.id = ?"))
            .bind(talk_id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| talk_from_row(&r)).transpose()
    }

    pub async fn list_talks(&self) -> Result<Vec<StoredTalk>> {
        let rows = sqlx::query(&format!("SELECT {TALK_COLUMNS} ORDER BY t.id ASC"))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(talk_from_row).collect()
    }

    pub async fn list_talks_for_speaker(
        &self,
        speaker_id: ReviewerId,
        status: Option<TalkStatus>,
    ) -> Result<Vec<StoredTalk>> {
        let rows = if let Some(status) = status {
            sqlx::query(&format!(
                "SELECT {TALK_COLUMNS} WHERE t.speaker_id = ? AND t.status = ? ORDER BY t.id ASC"
            ))
            .bind(speaker_id.0)
            .bind(status.as_wire())
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(&format!(
                "SELECT {TALK_COLUMNS} WHERE t.speaker_id = ? ORDER BY t.id ASC"
            ))
            .bind(speaker_id.0)
            .fetch_all(&self.pool)
            .await?
        };
        rows.iter().map(talk_from_row).collect()
    }

    pub async fn update_talk_text(
        &self,
        talk_id: TalkId,
        title: &str,
        description: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE talks
             SET title = ?, description = ?, revision = revision + 1, updated_at = CURRENT_TIMESTAMP
             WHERE id = ?",
        )
        .bind(title)
        .bind(description)
        .bind(talk_id.0)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_talk_status(&self, talk_id: TalkId, status: Option<TalkStatus>) -> Result<()> {
        sqlx::query(
            "UPDATE talks
             SET status = ?, revision = revision + 1, updated_at = CURRENT_TIMESTAMP
             WHERE id = ?",
        )
        .bind(status.map(TalkStatus::as_wire))
        .bind(talk_id.0)
        .execute(&self.pool)
        .await
        .context("failed to update talk status")?;
        Ok(())
    }

    /// Removes the talk together with its comments, votes and tag links.
    /// Tags themselves are shared and stay.
    pub async fn delete_talk_cascade(&self, talk_id: TalkId) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        for statement in [
            "DELETE FROM comments WHERE talk_id = ?",
            "DELETE FROM talk_tags WHERE talk_id = ?",
            "DELETE FROM votes WHERE talk_id = ?",
        ] {
            sqlx::query(statement)
                .bind(talk_id.0)
                .execute(&mut *tx)
                .await?;
        }

        let deleted = sqlx::query("DELETE FROM talks WHERE id = ?")
            .bind(talk_id.0)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        Ok(deleted > 0)
    }

    pub async fn find_tag(&self, name: &str) -> Result<Option<StoredTag>> {
        let row = sqlx::query("SELECT id, name FROM tags WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| tag_from_row(&r)))
    }

    /// Returns the tag with exactly this name, creating it if needed. The
    /// UNIQUE(name) conflict path makes concurrent first uses converge on
    /// one row.
    pub async fn resolve_tag(&self, name: &str) -> Result<StoredTag> {
        let row = sqlx::query(
            "INSERT INTO tags (name) VALUES (?)
             ON CONFLICT(name) DO UPDATE SET name=excluded.name
             RETURNING id, name",
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("failed to resolve tag '{name}'"))?;
        Ok(tag_from_row(&row))
    }

    pub async fn tags_for_talk(&self, talk_id: TalkId) -> Result<Vec<StoredTag>> {
        let rows = sqlx::query(
            "SELECT g.id, g.name
             FROM talk_tags tt
             INNER JOIN tags g ON g.id = tt.tag_id
             WHERE tt.talk_id = ?
             ORDER BY tt.rowid ASC",
        )
        .bind(talk_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(tag_from_row).collect())
    }

    /// Applies a tag-link delta and bumps the talk revision in one transaction.
    pub async fn apply_tag_delta(
        &self,
        talk_id: TalkId,
        remove: &[TagId],
        add: &[TagId],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for tag_id in remove {
            sqlx::query("DELETE FROM talk_tags WHERE talk_id = ? AND tag_id = ?")
                .bind(talk_id.0)
                .bind(tag_id.0)
                .execute(&mut *tx)
                .await?;
        }

        for tag_id in add {
            sqlx::query("INSERT OR IGNORE INTO talk_tags (talk_id, tag_id) VALUES (?, ?)")
                .bind(talk_id.0)
                .bind(tag_id.0)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query(
            "UPDATE talks SET revision = revision + 1, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
        )
        .bind(talk_id.0)
        .execute(&mut *tx)
        .await?;

        tx.commit()
            .await
            .with_context(|| format!("failed to commit tag delta for talk {}", talk_id.0))?;
        Ok(())
    }

    /// One row per (reviewer, talk): a second cast overwrites the score.
    pub async fn upsert_vote(
        &self,
        reviewer_id: ReviewerId,
        talk_id: TalkId,
        score: i64,
    ) -> Result<VoteId> {
        let rec = sqlx::query(
            "INSERT INTO votes (reviewer_id, talk_id, score) VALUES (?, ?, ?)
             ON CONFLICT(reviewer_id, talk_id) DO UPDATE SET score=excluded.score
             RETURNING id",
        )
        .bind(reviewer_id.0)
        .bind(talk_id.0)
        .bind(score)
        .fetch_one(&self.pool)
        .await?;
        Ok(VoteId(rec.get::<i64, _>(0)))
    }

    pub async fn vote_for(
        &self,
        reviewer_id: ReviewerId,
        talk_id: TalkId,
    ) -> Result<Option<StoredVote>> {
        let row = sqlx::query(
            "SELECT id, reviewer_id, talk_id, score FROM votes WHERE reviewer_id = ? AND talk_id = ?",
        )
        .bind(reviewer_id.0)
        .bind(talk_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| StoredVote {
            vote_id: VoteId(r.get::<i64, _>(0)),
            reviewer_id: ReviewerId(r.get::<i64, _>(1)),
            talk_id: TalkId(r.get::<i64, _>(2)),
            score: r.get::<i64, _>(3),
        }))
    }

    pub async fn count_votes_for_talk(&self, talk_id: TalkId) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM votes WHERE talk_id = ?")
            .bind(talk_id.0)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Mean score for a talk, `None` when nobody voted.
    pub async fn average_score(&self, talk_id: TalkId) -> Result<Option<f64>> {
        let average: Option<f64> =
            sqlx::query_scalar("SELECT AVG(CAST(score AS REAL)) FROM votes WHERE talk_id = ?")
                .bind(talk_id.0)
                .fetch_one(&self.pool)
                .await?;
        Ok(average)
    }

    pub async fn insert_comment(
        &self,
        talk_id: TalkId,
        author_id: ReviewerId,
        body: &str,
    ) -> Result<CommentId> {
        let rec = sqlx::query(
            "INSERT INTO comments (talk_id, author_id, body) VALUES (?, ?, ?) RETURNING id",
        )
        .bind(talk_id.0)
        .bind(author_id.0)
        .bind(body)
        .fetch_one(&self.pool)
        .await?;
        Ok(CommentId(rec.get::<i64, _>(0)))
    }

    pub async fn comments_for_talk(&self, talk_id: TalkId) -> Result<Vec<StoredComment>> {
        let rows = sqlx::query(
            "SELECT c.id, c.talk_id, c.author_id, r.full_name, c.body, c.created_at
             FROM comments c
             INNER JOIN reviewers r ON r.id = c.author_id
             WHERE c.talk_id = ?
             ORDER BY c.id ASC",
        )
        .bind(talk_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| StoredComment {
                comment_id: CommentId(r.get::<i64, _>(0)),
                talk_id: TalkId(r.get::<i64, _>(1)),
                author_id: ReviewerId(r.get::<i64, _>(2)),
                author_name: r.get::<String, _>(3),
                body: r.get::<String, _>(4),
                created_at: r.get::<DateTime<Utc>, _>(5),
            })
            .collect())
    }

    pub async fn load_vote_phase(&self) -> Result<VotePhase> {
        let raw: Option<String> = sqlx::query_scalar("SELECT phase FROM vote_phase WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;
        match raw {
            Some(raw) => raw
                .parse()
                .context("stored vote phase is not a known value"),
            None => Ok(VotePhase::default()),
        }
    }

    pub async fn store_vote_phase(&self, phase: VotePhase) -> Result<()> {
        sqlx::query(
            "INSERT INTO vote_phase (id, phase) VALUES (1, ?)
             ON CONFLICT(id) DO UPDATE SET phase=excluded.phase",
        )
        .bind(phase.as_wire())
        .execute(&self.pool)
        .await
        .context("failed to persist vote phase")?;
        Ok(())
    }
}

/// True when the error chain carries a SQLite UNIQUE constraint failure.
pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<sqlx::Error>(),
        Some(sqlx::Error::Database(db)) if db.is_unique_violation()
    )
}

fn actor_from_row(r: &SqliteRow) -> Actor {
    Actor {
        reviewer_id: ReviewerId(r.get::<i64, _>(0)),
        email: r.get::<String, _>(1),
        full_name: r.get::<String, _>(2),
        admin: r.get::<bool, _>(3),
    }
}

fn tag_from_row(r: &SqliteRow) -> StoredTag {
    StoredTag {
        tag_id: TagId(r.get::<i64, _>(0)),
        name: r.get::<String, _>(1),
    }
}

fn talk_from_row(r: &SqliteRow) -> Result<StoredTalk> {
    let status = r
        .get::<Option<String>, _>(3)
        .map(|raw| raw.parse::<TalkStatus>())
        .transpose()?;
    Ok(StoredTalk {
        talk_id: TalkId(r.get::<i64, _>(0)),
        title: r.get::<String, _>(1),
        description: r.get::<String, _>(2),
        status,
        speaker_id: ReviewerId(r.get::<i64, _>(4)),
        speaker_email: r.get::<String, _>(5),
        speaker_name: r.get::<String, _>(6),
        revision: r.get::<i64, _>(7),
        created_at: r.get::<DateTime<Utc>, _>(8),
        updated_at: r.get::<DateTime<Utc>, _>(9),
    })
}

/// File backing a `sqlite:` url. In-memory databases have none.
pub fn sqlite_file_path(database_url: &str) -> Option<PathBuf> {
    let rest = database_url.strip_prefix("sqlite:")?;
    if rest.starts_with(":memory:") {
        return None;
    }
    let path = rest
        .trim_start_matches("//")
        .split('?')
        .next()
        .unwrap_or_default();
    (!path.is_empty()).then(|| PathBuf::from(path))
}

fn create_database_dir(database_url: &str) -> Result<()> {
    let path = sqlite_file_path(database_url);
    if let Some(parent) = path.as_deref().and_then(Path::parent) {
        fs::create_dir_all(parent).with_context(|| {
            format!("creating directory '{}' for {database_url}", parent.display())
        })?;
    }
    Ok(())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
