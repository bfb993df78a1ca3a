/// Parse stage
///
/// Decodes a stored archive and writes its entities in a fixed order:
/// friends, posts, reactions, comments, media, files. Friends go first so
/// tags on posts resolve against them. A failing entity kind is logged and
/// counted; the remaining kinds are still written.
use super::StageOutcome;
use crate::archive::{ArchiveChanges, ArchiveStatus};
use crate::blob_store::{content_type_for, BlobBody};
use crate::context::WorkerContext;
use crate::decoder::{ArchiveDecoder, DecodedArchive, ExtractedFile};
use crate::error::{AppError, AppResult, ArchiveErrorCode, ArchiveFailure, PipelineResult};
use crate::jobs::ArchiveRef;
use crate::metrics;
use crate::records::{MediaNamespace, NewComment, NewPost, NewReaction};
use std::collections::HashMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Counts of what one parse run wrote
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ParseSummary {
    pub friends: u64,
    pub posts: u64,
    pub reactions: u64,
    pub comments: u64,
    pub media: u64,
    pub failed_steps: Vec<&'static str>,
}

impl ParseSummary {
    fn record(&mut self, entity: &'static str, result: AppResult<u64>) -> u64 {
        match result {
            Ok(count) => count,
            Err(e) => {
                warn!(entity, error = %e, "Parse step failed");
                metrics::record_parse_step_failure(entity);
                self.failed_steps.push(entity);
                0
            }
        }
    }
}

impl WorkerContext {
    pub(crate) async fn parse_archive(&self, archive: &ArchiveRef) -> PipelineResult<StageOutcome> {
        let id = archive.archive_id;
        let record = self
            .archives
            .transition(id, ArchiveStatus::Processing, ArchiveChanges::default())
            .await?;

        let path = self
            .local_archive(&record, ArchiveErrorCode::FailToParseArchive)
            .await?;

        let media_dir = self.work_dir(id).join("data");
        let decoded = {
            let path = path.clone();
            let media_dir = media_dir.clone();
            tokio::task::spawn_blocking(move || ArchiveDecoder::decode_all(&path, &media_dir))
                .await
                .map_err(AppError::from)
                .and_then(|result| result)
                .archive_failure(id, ArchiveErrorCode::FailToParseArchive)?
        };

        let namespace = MediaNamespace {
            account: archive.account.clone(),
            archive_type: record.archive_type.clone(),
            archive_id: id,
        };
        let summary = self.write_entities(&archive.account, &namespace, decoded).await;

        if let Err(e) = tokio::fs::remove_dir_all(&media_dir).await {
            debug!(archive_id = %id, error = %e, "Could not remove extracted media");
        }

        info!(
            archive_id = %id,
            friends = summary.friends,
            posts = summary.posts,
            reactions = summary.reactions,
            comments = summary.comments,
            media = summary.media,
            failed_steps = ?summary.failed_steps,
            "Archive parsed"
        );
        Ok(StageOutcome::Continue)
    }

    /// Write every decoded entity kind for `owner`
    pub(crate) async fn write_entities(
        &self,
        owner: &str,
        namespace: &MediaNamespace,
        decoded: DecodedArchive,
    ) -> ParseSummary {
        let mut summary = ParseSummary::default();

        let inserted = match decoded.friends {
            Ok(friends) => self.records.insert_friends(owner, &friends).await,
            Err(e) => Err(e),
        };
        summary.friends = summary.record("friends", inserted);

        let friend_ids = match self.records.friend_ids(owner).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "Friend lookup failed, tags will be dropped");
                HashMap::new()
            }
        };

        let inserted = match decoded.posts {
            Ok(raw) => {
                let posts: Vec<NewPost> = raw.iter().map(|p| NewPost::from_raw(p, namespace)).collect();
                self.write_posts(owner, &posts, &friend_ids).await
            }
            Err(e) => Err(e),
        };
        summary.posts = summary.record("posts", inserted);

        let inserted = match decoded.reactions {
            Ok(raw) => {
                let reactions: Vec<NewReaction> = raw.iter().map(NewReaction::from).collect();
                self.records.insert_reactions(owner, &reactions).await
            }
            Err(e) => Err(e),
        };
        summary.reactions = summary.record("reactions", inserted);

        let inserted = match decoded.comments {
            Ok(raw) => {
                let comments: Vec<NewComment> =
                    raw.iter().map(|c| NewComment::from_raw(c, namespace)).collect();
                self.write_comments(owner, &comments).await
            }
            Err(e) => Err(e),
        };
        summary.comments = summary.record("comments", inserted);

        let uploaded = match decoded.media {
            Ok(files) => self.upload_files(namespace, &files).await,
            Err(e) => Err(e),
        };
        summary.media = summary.record("media", uploaded);

        let uploaded = match decoded.files {
            Ok(files) => self.upload_files(namespace, &files).await,
            Err(e) => Err(e),
        };
        let files = summary.record("files", uploaded);
        summary.media += files;

        summary
    }

    /// Bulk insert plain posts, upsert complex ones one at a time
    async fn write_posts(
        &self,
        owner: &str,
        posts: &[NewPost],
        friend_ids: &HashMap<String, Uuid>,
    ) -> AppResult<u64> {
        let (complex, plain): (Vec<&NewPost>, Vec<&NewPost>) =
            posts.iter().partition(|p| p.is_complex());

        let plain: Vec<NewPost> = plain.into_iter().cloned().collect();
        let mut written = self.records.insert_plain_posts(owner, &plain).await?;

        let mut conflicts = 0;
        for post in complex {
            let write = self.records.insert_complex_post(owner, post, friend_ids).await?;
            if write.conflict {
                conflicts += 1;
            } else {
                written += 1;
            }
        }

        if conflicts > 0 {
            debug!(owner, conflicts, "Posts collided with existing timestamps");
        }
        Ok(written)
    }

    async fn write_comments(&self, owner: &str, comments: &[NewComment]) -> AppResult<u64> {
        let (complex, plain): (Vec<&NewComment>, Vec<&NewComment>) =
            comments.iter().partition(|c| c.is_complex());

        let plain: Vec<NewComment> = plain.into_iter().cloned().collect();
        let mut written = self.records.insert_plain_comments(owner, &plain).await?;

        for comment in complex {
            if !self.records.insert_complex_comment(owner, comment).await?.conflict {
                written += 1;
            }
        }
        Ok(written)
    }

    async fn upload_files(&self, namespace: &MediaNamespace, files: &[ExtractedFile]) -> AppResult<u64> {
        for file in files {
            self.blobs
                .put(
                    &namespace.key(&file.name),
                    BlobBody::File(file.path.clone()),
                    content_type_for(&file.name),
                )
                .await?;
        }
        Ok(files.len() as u64)
    }
}
