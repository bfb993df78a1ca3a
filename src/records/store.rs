/// Record persistence using runtime queries
use super::{
    Comment, Friend, MediaItem, NewComment, NewPost, NewReaction, Place, Post, Reaction, Tag,
};
use crate::decoder::RawFriend;
use crate::error::{AppError, AppResult};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::collections::{HashMap, HashSet};
use tracing::debug;
use uuid::Uuid;

/// Rows per multi-row INSERT; keeps bound parameters well under SQLite's limit
const BULK_INSERT_CHUNK: usize = 200;

/// Result of writing one complex record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComplexWrite {
    pub id: Uuid,
    /// A row with the same `(owner, timestamp)` already existed
    pub conflict: bool,
}

#[derive(Clone)]
pub struct RecordStore {
    db: SqlitePool,
}

impl RecordStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Insert friends, ignoring names the owner already has; returns rows inserted
    pub async fn insert_friends(&self, owner: &str, friends: &[RawFriend]) -> AppResult<u64> {
        let mut seen = HashSet::new();
        let unique: Vec<&RawFriend> = friends
            .iter()
            .filter(|f| !f.name.is_empty() && seen.insert(f.name.as_str()))
            .collect();

        let mut inserted = 0;
        for chunk in unique.chunks(BULK_INSERT_CHUNK) {
            let mut builder: QueryBuilder<Sqlite> =
                QueryBuilder::new("INSERT OR IGNORE INTO friend (id, owner, name, timestamp) ");
            builder.push_values(chunk, |mut row, friend| {
                row.push_bind(Uuid::new_v4().to_string())
                    .push_bind(owner)
                    .push_bind(friend.name.as_str())
                    .push_bind(friend.timestamp);
            });
            inserted += builder.build().execute(&self.db).await?.rows_affected();
        }

        debug!(owner, inserted, "Friends inserted");
        Ok(inserted)
    }

    pub async fn friends(&self, owner: &str) -> AppResult<Vec<Friend>> {
        let rows = sqlx::query("SELECT id, name, timestamp FROM friend WHERE owner = ?1 ORDER BY name")
            .bind(owner)
            .fetch_all(&self.db)
            .await?;

        rows.iter()
            .map(|row| {
                Ok(Friend {
                    id: parse_id(row, "id")?,
                    name: row.get("name"),
                    timestamp: row.get("timestamp"),
                })
            })
            .collect()
    }

    /// Friend name to id, for tag resolution
    pub async fn friend_ids(&self, owner: &str) -> AppResult<HashMap<String, Uuid>> {
        Ok(self
            .friends(owner)
            .await?
            .into_iter()
            .map(|f| (f.name, f.id))
            .collect())
    }

    /// Bulk insert posts without children; colliding timestamps are skipped
    pub async fn insert_plain_posts(&self, owner: &str, posts: &[NewPost]) -> AppResult<u64> {
        let mut inserted = 0;
        for chunk in posts.chunks(BULK_INSERT_CHUNK) {
            let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
                "INSERT OR IGNORE INTO post (id, owner, timestamp, update_timestamp, title, post,
                 external_context_url, external_context_source, external_context_name,
                 event_name, event_start_timestamp, event_end_timestamp, media_attached) ",
            );
            builder.push_values(chunk, |mut row, post| {
                row.push_bind(Uuid::new_v4().to_string())
                    .push_bind(owner)
                    .push_bind(post.timestamp)
                    .push_bind(post.update_timestamp)
                    .push_bind(post.title.as_str())
                    .push_bind(post.post.as_str())
                    .push_bind(post.external_context_url.as_str())
                    .push_bind(post.external_context_source.as_str())
                    .push_bind(post.external_context_name.as_str())
                    .push_bind(post.event_name.as_str())
                    .push_bind(post.event_start_timestamp)
                    .push_bind(post.event_end_timestamp)
                    .push_bind(!post.media.is_empty());
            });
            inserted += builder.build().execute(&self.db).await?.rows_affected();
        }
        Ok(inserted)
    }

    /// Upsert one post with its media, places and tags
    ///
    /// A timestamp collision flags the existing row instead of inserting.
    /// Media rows are upserted by natural key either way; places and tags are
    /// only attached to freshly inserted posts. Tags naming an unknown friend
    /// are dropped.
    pub async fn insert_complex_post(
        &self,
        owner: &str,
        post: &NewPost,
        friend_ids: &HashMap<String, Uuid>,
    ) -> AppResult<ComplexWrite> {
        let mut tx = self.db.begin().await?;

        let row = sqlx::query(
            "INSERT INTO post (id, owner, timestamp, update_timestamp, title, post,
                 external_context_url, external_context_source, external_context_name,
                 event_name, event_start_timestamp, event_end_timestamp, media_attached)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
             ON CONFLICT(owner, timestamp) DO UPDATE SET conflict = 1
             RETURNING id, conflict",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(owner)
        .bind(post.timestamp)
        .bind(post.update_timestamp)
        .bind(&post.title)
        .bind(&post.post)
        .bind(&post.external_context_url)
        .bind(&post.external_context_source)
        .bind(&post.external_context_name)
        .bind(&post.event_name)
        .bind(post.event_start_timestamp)
        .bind(post.event_end_timestamp)
        .bind(!post.media.is_empty())
        .fetch_one(&mut *tx)
        .await?;

        let write = ComplexWrite {
            id: parse_id(&row, "id")?,
            conflict: row.get("conflict"),
        };

        for media in &post.media {
            sqlx::query(
                "INSERT INTO post_media (id, owner, post_id, timestamp, media_index, media_uri, filename_extension)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(timestamp, media_index, owner, post_id) DO UPDATE SET
                     media_uri = excluded.media_uri,
                     filename_extension = excluded.filename_extension",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(owner)
            .bind(write.id.to_string())
            .bind(media.timestamp)
            .bind(media.media_index)
            .bind(&media.media_uri)
            .bind(&media.filename_extension)
            .execute(&mut *tx)
            .await?;
        }

        if !write.conflict {
            for place in &post.places {
                sqlx::query(
                    "INSERT INTO place (id, owner, post_id, name, address, latitude, longitude)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                )
                .bind(Uuid::new_v4().to_string())
                .bind(owner)
                .bind(write.id.to_string())
                .bind(&place.name)
                .bind(&place.address)
                .bind(place.latitude)
                .bind(place.longitude)
                .execute(&mut *tx)
                .await?;
            }

            for name in &post.tags {
                let Some(friend_id) = friend_ids.get(name) else {
                    debug!(owner, friend = %name, "Dropping tag of unknown friend");
                    continue;
                };
                sqlx::query(
                    "INSERT INTO tag (id, owner, post_id, friend_id, friend_name)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )
                .bind(Uuid::new_v4().to_string())
                .bind(owner)
                .bind(write.id.to_string())
                .bind(friend_id.to_string())
                .bind(name)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(write)
    }

    pub async fn insert_plain_comments(&self, owner: &str, comments: &[NewComment]) -> AppResult<u64> {
        let mut inserted = 0;
        for chunk in comments.chunks(BULK_INSERT_CHUNK) {
            let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
                "INSERT OR IGNORE INTO comment (id, owner, timestamp, title, comment, author, group_name) ",
            );
            builder.push_values(chunk, |mut row, comment| {
                row.push_bind(Uuid::new_v4().to_string())
                    .push_bind(owner)
                    .push_bind(comment.timestamp)
                    .push_bind(comment.title.as_str())
                    .push_bind(comment.comment.as_str())
                    .push_bind(comment.author.as_str())
                    .push_bind(comment.group_name.as_str());
            });
            inserted += builder.build().execute(&self.db).await?.rows_affected();
        }
        Ok(inserted)
    }

    /// Upsert one comment with its media; see [`RecordStore::insert_complex_post`]
    pub async fn insert_complex_comment(&self, owner: &str, comment: &NewComment) -> AppResult<ComplexWrite> {
        let mut tx = self.db.begin().await?;

        let row = sqlx::query(
            "INSERT INTO comment (id, owner, timestamp, title, comment, author, group_name, media_attached)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(owner, timestamp) DO UPDATE SET conflict = 1
             RETURNING id, conflict",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(owner)
        .bind(comment.timestamp)
        .bind(&comment.title)
        .bind(&comment.comment)
        .bind(&comment.author)
        .bind(&comment.group_name)
        .bind(!comment.media.is_empty())
        .fetch_one(&mut *tx)
        .await?;

        let write = ComplexWrite {
            id: parse_id(&row, "id")?,
            conflict: row.get("conflict"),
        };

        for media in &comment.media {
            sqlx::query(
                "INSERT INTO comment_media (id, owner, comment_id, timestamp, media_index, media_uri, filename_extension)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(timestamp, media_index, owner, comment_id) DO UPDATE SET
                     media_uri = excluded.media_uri,
                     filename_extension = excluded.filename_extension",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(owner)
            .bind(write.id.to_string())
            .bind(media.timestamp)
            .bind(media.media_index)
            .bind(&media.media_uri)
            .bind(&media.filename_extension)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(write)
    }

    pub async fn insert_reactions(&self, owner: &str, reactions: &[NewReaction]) -> AppResult<u64> {
        let mut inserted = 0;
        for chunk in reactions.chunks(BULK_INSERT_CHUNK) {
            let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
                "INSERT OR IGNORE INTO reaction (id, owner, timestamp, title, actor, reaction) ",
            );
            builder.push_values(chunk, |mut row, reaction| {
                row.push_bind(Uuid::new_v4().to_string())
                    .push_bind(owner)
                    .push_bind(reaction.timestamp)
                    .push_bind(reaction.title.as_str())
                    .push_bind(reaction.actor.as_str())
                    .push_bind(reaction.reaction.as_str());
            });
            inserted += builder.build().execute(&self.db).await?.rows_affected();
        }
        Ok(inserted)
    }

    /// All posts of an owner with children, oldest first
    pub async fn posts(&self, owner: &str) -> AppResult<Vec<Post>> {
        let rows = sqlx::query(
            "SELECT id, timestamp, update_timestamp, title, post, external_context_url,
                    external_context_source, external_context_name, event_name,
                    media_attached, conflict
             FROM post WHERE owner = ?1 ORDER BY timestamp ASC",
        )
        .bind(owner)
        .fetch_all(&self.db)
        .await?;

        let mut media = self.post_media(owner).await?;
        let mut places = self.places(owner).await?;
        let mut tags = self.tags(owner).await?;

        rows.iter()
            .map(|row| {
                let id = parse_id(row, "id")?;
                Ok(Post {
                    id,
                    timestamp: row.get("timestamp"),
                    update_timestamp: row.get("update_timestamp"),
                    title: row.get("title"),
                    post: row.get("post"),
                    external_context_url: row.get("external_context_url"),
                    external_context_source: row.get("external_context_source"),
                    external_context_name: row.get("external_context_name"),
                    event_name: row.get("event_name"),
                    media_attached: row.get("media_attached"),
                    conflict: row.get("conflict"),
                    media: media.remove(&id).unwrap_or_default(),
                    places: places.remove(&id).unwrap_or_default(),
                    tags: tags.remove(&id).unwrap_or_default(),
                })
            })
            .collect()
    }

    async fn post_media(&self, owner: &str) -> AppResult<HashMap<Uuid, Vec<MediaItem>>> {
        let rows = sqlx::query(
            "SELECT post_id, timestamp, media_index, media_uri, filename_extension
             FROM post_media WHERE owner = ?1 ORDER BY timestamp, media_index",
        )
        .bind(owner)
        .fetch_all(&self.db)
        .await?;

        let mut by_post: HashMap<Uuid, Vec<MediaItem>> = HashMap::new();
        for row in &rows {
            by_post.entry(parse_id(row, "post_id")?).or_default().push(MediaItem {
                timestamp: row.get("timestamp"),
                media_index: row.get("media_index"),
                media_uri: row.get("media_uri"),
                filename_extension: row.get("filename_extension"),
            });
        }
        Ok(by_post)
    }

    async fn places(&self, owner: &str) -> AppResult<HashMap<Uuid, Vec<Place>>> {
        let rows = sqlx::query(
            "SELECT post_id, name, address, latitude, longitude FROM place WHERE owner = ?1 ORDER BY rowid",
        )
        .bind(owner)
        .fetch_all(&self.db)
        .await?;

        let mut by_post: HashMap<Uuid, Vec<Place>> = HashMap::new();
        for row in &rows {
            by_post.entry(parse_id(row, "post_id")?).or_default().push(Place {
                name: row.get("name"),
                address: row.get("address"),
                latitude: row.get("latitude"),
                longitude: row.get("longitude"),
            });
        }
        Ok(by_post)
    }

    async fn tags(&self, owner: &str) -> AppResult<HashMap<Uuid, Vec<Tag>>> {
        let rows = sqlx::query(
            "SELECT post_id, friend_id, friend_name FROM tag WHERE owner = ?1 ORDER BY rowid",
        )
        .bind(owner)
        .fetch_all(&self.db)
        .await?;

        let mut by_post: HashMap<Uuid, Vec<Tag>> = HashMap::new();
        for row in &rows {
            by_post.entry(parse_id(row, "post_id")?).or_default().push(Tag {
                friend_id: parse_id(row, "friend_id")?,
                friend_name: row.get("friend_name"),
            });
        }
        Ok(by_post)
    }

    /// All reactions of an owner, oldest first
    pub async fn reactions(&self, owner: &str) -> AppResult<Vec<Reaction>> {
        let rows = sqlx::query(
            "SELECT id, timestamp, title, actor, reaction
             FROM reaction WHERE owner = ?1 ORDER BY timestamp ASC",
        )
        .bind(owner)
        .fetch_all(&self.db)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(Reaction {
                    id: parse_id(row, "id")?,
                    timestamp: row.get("timestamp"),
                    title: row.get("title"),
                    actor: row.get("actor"),
                    reaction: row.get("reaction"),
                })
            })
            .collect()
    }

    /// All comments of an owner, oldest first
    pub async fn comments(&self, owner: &str) -> AppResult<Vec<Comment>> {
        let rows = sqlx::query(
            "SELECT id, timestamp, title, comment, author, group_name, media_attached, conflict
             FROM comment WHERE owner = ?1 ORDER BY timestamp ASC",
        )
        .bind(owner)
        .fetch_all(&self.db)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(Comment {
                    id: parse_id(row, "id")?,
                    timestamp: row.get("timestamp"),
                    title: row.get("title"),
                    comment: row.get("comment"),
                    author: row.get("author"),
                    group_name: row.get("group_name"),
                    media_attached: row.get("media_attached"),
                    conflict: row.get("conflict"),
                })
            })
            .collect()
    }

    /// Delete every record of an owner; returns rows removed across tables
    pub async fn delete_owner(&self, owner: &str) -> AppResult<u64> {
        let mut tx = self.db.begin().await?;
        let mut removed = 0;

        // Children first so the result does not depend on foreign key enforcement
        for table in [
            "tag",
            "place",
            "post_media",
            "comment_media",
            "post",
            "comment",
            "reaction",
            "friend",
        ] {
            removed += sqlx::query(&format!("DELETE FROM {} WHERE owner = ?1", table))
                .bind(owner)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }

        tx.commit().await?;
        Ok(removed)
    }
}

fn parse_id(row: &SqliteRow, column: &str) -> AppResult<Uuid> {
    let id: String = row.get(column);
    Uuid::parse_str(&id).map_err(|e| AppError::Internal(format!("Corrupt {} {}: {}", column, id, e)))
}
