// SQLite-backed post store for the moderation pipeline.
//
// Tables:
// - posts: Posts and their moderation status
// - comments: System comments explaining moderation decisions
// - flags: Audit flags raised when moderation gives up
// - notifications: Author notifications (human users or agents)

use crate::core::moderation::{
    AuthorType, CollaboratorError, CommentCreator, Flag, FlagCreator, ModerationInput,
    ModerationJob, ModerationNotice, ModerationNotifier, PendingPostSource, PostStatus,
    PostStatusUpdater, SystemComment, MODERATION_FAILED_REASON,
};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Row, Sqlite};
use uuid::Uuid;

/// A post as the HTTP layer hands it over at creation time.
#[cfg(test)]
#[derive(Debug, Clone)]
pub struct NewPost {
    pub post_type: String,
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub author_type: AuthorType,
    pub author_id: String,
}

/// Moderation-relevant columns of a stored post.
#[cfg(test)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostModerationState {
    pub status: PostStatus,
    pub original_language: Option<String>,
}

/// A stored notification row.
#[cfg(test)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredNotification {
    pub user_id: Option<String>,
    pub agent_id: Option<String>,
    pub notification_type: String,
    pub title: String,
    pub body: String,
    pub link: String,
}

pub struct SqlitePostStore {
    pool: Pool<Sqlite>,
}

fn storage(e: sqlx::Error) -> CollaboratorError {
    CollaboratorError::Storage(e.to_string())
}

impl SqlitePostStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Run database migrations to create required tables.
    pub async fn migrate(&self) -> Result<(), CollaboratorError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS posts (
                id TEXT PRIMARY KEY,
                post_type TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT NOT NULL,
                tags TEXT NOT NULL DEFAULT '[]',
                posted_by_type TEXT NOT NULL,
                posted_by_id TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending_review',
                original_language TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                deleted_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_posts_status_created
                ON posts(status, created_at);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS comments (
                id TEXT PRIMARY KEY,
                target_type TEXT NOT NULL,
                target_id TEXT NOT NULL,
                author_type TEXT NOT NULL,
                author_id TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS flags (
                id TEXT PRIMARY KEY,
                target_type TEXT NOT NULL,
                target_id TEXT NOT NULL,
                reporter_type TEXT NOT NULL,
                reporter_id TEXT NOT NULL,
                reason TEXT NOT NULL,
                details TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_flags_target
                ON flags(target_id, reason, status);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS notifications (
                id TEXT PRIMARY KEY,
                user_id TEXT,
                agent_id TEXT,
                notification_type TEXT NOT NULL,
                title TEXT NOT NULL,
                body TEXT NOT NULL,
                link TEXT NOT NULL,
                read_at TEXT,
                created_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        Ok(())
    }
}

// Read and write helpers the HTTP layer owns in production; tests seed and
// inspect the database through them.
#[cfg(test)]
impl SqlitePostStore {
    /// Insert a post awaiting moderation.
    pub async fn create_post(&self, post: &NewPost) -> Result<Uuid, CollaboratorError> {
        let id = Uuid::new_v4();
        let now = Utc::now().to_rfc3339();
        let tags = serde_json::to_string(&post.tags)
            .map_err(|e| CollaboratorError::Storage(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO posts (id, post_type, title, description, tags, posted_by_type,
                               posted_by_id, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(&post.post_type)
        .bind(&post.title)
        .bind(&post.description)
        .bind(tags)
        .bind(post.author_type.as_str())
        .bind(&post.author_id)
        .bind(PostStatus::PendingReview.as_str())
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        Ok(id)
    }

    pub async fn get_moderation_state(
        &self,
        post_id: Uuid,
    ) -> Result<Option<PostModerationState>, CollaboratorError> {
        let row = sqlx::query("SELECT status, original_language FROM posts WHERE id = ?")
            .bind(post_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let status: String = row.get("status");
        Ok(Some(PostModerationState {
            status: status.parse().map_err(CollaboratorError::Storage)?,
            original_language: row.get("original_language"),
        }))
    }

    pub async fn list_notifications(&self) -> Result<Vec<StoredNotification>, CollaboratorError> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, agent_id, notification_type, title, body, link
            FROM notifications
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        Ok(rows
            .into_iter()
            .map(|row| StoredNotification {
                user_id: row.get("user_id"),
                agent_id: row.get("agent_id"),
                notification_type: row.get("notification_type"),
                title: row.get("title"),
                body: row.get("body"),
                link: row.get("link"),
            })
            .collect())
    }

    /// Mark a post deleted. Deleted posts are invisible to moderation.
    pub async fn soft_delete(&self, post_id: Uuid) -> Result<(), CollaboratorError> {
        sqlx::query("UPDATE posts SET deleted_at = ? WHERE id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(post_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(())
    }
}

#[async_trait]
impl PostStatusUpdater for SqlitePostStore {
    async fn update_status(
        &self,
        post_id: Uuid,
        status: PostStatus,
    ) -> Result<(), CollaboratorError> {
        let result = sqlx::query(
            r#"
            UPDATE posts SET status = ?, updated_at = ?
            WHERE id = ? AND deleted_at IS NULL
            "#,
        )
        .bind(status.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(post_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        if result.rows_affected() == 0 {
            return Err(CollaboratorError::NotFound(post_id.to_string()));
        }
        Ok(())
    }

    async fn update_original_language(
        &self,
        post_id: Uuid,
        language: &str,
    ) -> Result<(), CollaboratorError> {
        let result = sqlx::query(
            r#"
            UPDATE posts SET status = ?, original_language = ?, updated_at = ?
            WHERE id = ? AND deleted_at IS NULL
            "#,
        )
        .bind(PostStatus::Draft.as_str())
        .bind(language)
        .bind(Utc::now().to_rfc3339())
        .bind(post_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        if result.rows_affected() == 0 {
            return Err(CollaboratorError::NotFound(post_id.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl FlagCreator for SqlitePostStore {
    async fn create_flag(&self, flag: &Flag) -> Result<Uuid, CollaboratorError> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO flags (id, target_type, target_id, reporter_type, reporter_id,
                               reason, details, status, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(&flag.target_type)
        .bind(flag.target_id.to_string())
        .bind(&flag.reporter_type)
        .bind(&flag.reporter_id)
        .bind(&flag.reason)
        .bind(&flag.details)
        .bind(&flag.status)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(id)
    }
}

#[async_trait]
impl CommentCreator for SqlitePostStore {
    async fn create_comment(&self, comment: &SystemComment) -> Result<Uuid, CollaboratorError> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO comments (id, target_type, target_id, author_type, author_id,
                                  content, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(&comment.target_type)
        .bind(comment.target_id.to_string())
        .bind(comment.author_type.as_str())
        .bind(&comment.author_id)
        .bind(&comment.content)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(id)
    }
}

#[async_trait]
impl ModerationNotifier for SqlitePostStore {
    async fn notify_on_moderation_result(
        &self,
        notice: &ModerationNotice,
    ) -> Result<(), CollaboratorError> {
        if notice.author_id.trim().is_empty() {
            return Err(CollaboratorError::InvalidRecipient(
                "post has no author id".to_string(),
            ));
        }
        let (user_id, agent_id) = match notice.author_type {
            AuthorType::Human => (Some(notice.author_id.as_str()), None),
            AuthorType::Agent => (None, Some(notice.author_id.as_str())),
            AuthorType::System => {
                return Err(CollaboratorError::InvalidRecipient(format!(
                    "system author {} cannot be notified",
                    notice.author_id
                )))
            }
        };

        let (notification_type, title, body) = if notice.approved {
            (
                "post.approved",
                "Post approved",
                format!("Your post \"{}\" is now live on Solvr", notice.post_title),
            )
        } else {
            (
                "post.rejected",
                "Post needs changes",
                format!(
                    "Your post \"{}\" was not approved: {}. Edit and resubmit.",
                    notice.post_title, notice.explanation
                ),
            )
        };

        sqlx::query(
            r#"
            INSERT INTO notifications (id, user_id, agent_id, notification_type, title,
                                       body, link, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(user_id)
        .bind(agent_id)
        .bind(notification_type)
        .bind(title)
        .bind(body)
        .bind(format!("/{}s/{}", notice.post_type, notice.post_id))
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }
}

#[async_trait]
impl PendingPostSource for SqlitePostStore {
    async fn list_pending(&self, limit: u32) -> Result<Vec<ModerationJob>, CollaboratorError> {
        let rows = sqlx::query(
            r#"
            SELECT p.id, p.post_type, p.title, p.description, p.tags,
                   p.posted_by_type, p.posted_by_id
            FROM posts p
            WHERE p.status = ?
              AND p.deleted_at IS NULL
              AND NOT EXISTS (
                  SELECT 1 FROM flags f
                  WHERE f.target_id = p.id AND f.reason = ? AND f.status = 'pending'
              )
            ORDER BY p.created_at ASC
            LIMIT ?
            "#,
        )
        .bind(PostStatus::PendingReview.as_str())
        .bind(MODERATION_FAILED_REASON)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        let mut jobs = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.get("id");
            let author_type: String = row.get("posted_by_type");
            let tags: String = row.get("tags");

            let post_id = match Uuid::parse_str(&id) {
                Ok(post_id) => post_id,
                Err(e) => {
                    tracing::warn!(post_id = %id, error = %e, "Skipping post with invalid id");
                    continue;
                }
            };
            let author_type = match author_type.parse::<AuthorType>() {
                Ok(author_type) => author_type,
                Err(e) => {
                    tracing::warn!(%post_id, error = %e, "Skipping post with unknown author type");
                    continue;
                }
            };

            jobs.push(ModerationJob {
                post_id,
                post_type: row.get("post_type"),
                author_type,
                author_id: row.get("posted_by_id"),
                input: ModerationInput {
                    title: row.get("title"),
                    description: row.get("description"),
                    tags: serde_json::from_str(&tags).unwrap_or_default(),
                },
            });
        }
        Ok(jobs)
    }
}
