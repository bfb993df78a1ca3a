/// Parsed archive records
///
/// Rows are keyed by `(owner, timestamp)`; re-parsing an archive inserts
/// nothing new and flags colliding complex records instead of duplicating them.

mod store;

pub use store::{ComplexWrite, RecordStore};

use crate::archive::media_blob_key;
use crate::decoder::{RawComment, RawPost, RawReaction};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

/// Where an archive's media files live in the blob store
#[derive(Debug, Clone)]
pub struct MediaNamespace {
    pub account: String,
    pub archive_type: String,
    pub archive_id: Uuid,
}

impl MediaNamespace {
    pub fn key(&self, uri: &str) -> String {
        media_blob_key(&self.account, &self.archive_type, self.archive_id, uri)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Friend {
    pub id: Uuid,
    pub name: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaItem {
    pub timestamp: i64,
    pub media_index: i64,
    pub media_uri: String,
    /// Extension including the dot, e.g. `.jpg`
    pub filename_extension: String,
}

impl MediaItem {
    pub fn media_type(&self) -> &'static str {
        if self.filename_extension.eq_ignore_ascii_case(".mp4") {
            "video"
        } else {
            "photo"
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub name: String,
    pub address: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub friend_id: Uuid,
    pub friend_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewPost {
    pub timestamp: i64,
    pub update_timestamp: Option<i64>,
    pub title: String,
    pub post: String,
    pub external_context_url: String,
    pub external_context_source: String,
    pub external_context_name: String,
    pub event_name: String,
    pub event_start_timestamp: Option<i64>,
    pub event_end_timestamp: Option<i64>,
    pub media: Vec<MediaItem>,
    pub places: Vec<Place>,
    /// Friend names; resolved to friend rows on insert
    pub tags: Vec<String>,
}

impl NewPost {
    pub fn from_raw(raw: &RawPost, namespace: &MediaNamespace) -> Self {
        let mut post = NewPost {
            timestamp: raw.timestamp,
            update_timestamp: raw.update_timestamp(),
            title: raw.title.to_string(),
            post: raw.text().unwrap_or_default().to_string(),
            tags: raw
                .tags
                .iter()
                .map(|t| t.to_string())
                .filter(|t| !t.is_empty())
                .collect(),
            ..Default::default()
        };

        for item in raw.attachment_items() {
            if let Some(media) = &item.media {
                let timestamp = match media.creation_timestamp {
                    0 => raw.timestamp,
                    ts => ts,
                };
                post.media.push(MediaItem {
                    timestamp,
                    media_index: post.media.len() as i64,
                    media_uri: namespace.key(media.uri.as_str()),
                    filename_extension: filename_extension(media.uri.as_str()),
                });
            }
            if let Some(context) = &item.external_context {
                post.external_context_url = context.url.to_string();
                post.external_context_source = context.source.to_string();
                post.external_context_name = context.name.to_string();
            }
            if let Some(event) = &item.event {
                post.event_name = event.name.to_string();
                post.event_start_timestamp = Some(event.start_timestamp);
                post.event_end_timestamp = Some(event.end_timestamp);
            }
            if let Some(place) = &item.place {
                post.places.push(Place {
                    name: place.name.to_string(),
                    address: place.address.to_string(),
                    latitude: place.coordinate.map(|c| c.latitude),
                    longitude: place.coordinate.map(|c| c.longitude),
                });
            }
        }

        post
    }

    /// Posts with attachments or tags are written one by one with their children
    pub fn is_complex(&self) -> bool {
        !self.media.is_empty()
            || !self.places.is_empty()
            || !self.tags.is_empty()
            || !self.event_name.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: Uuid,
    pub timestamp: i64,
    pub update_timestamp: Option<i64>,
    pub title: String,
    pub post: String,
    pub external_context_url: String,
    pub external_context_source: String,
    pub external_context_name: String,
    pub event_name: String,
    pub media_attached: bool,
    pub conflict: bool,
    pub media: Vec<MediaItem>,
    pub places: Vec<Place>,
    pub tags: Vec<Tag>,
}

impl Post {
    /// `media`, `link` or `update`; `None` for posts with nothing to show
    pub fn post_type(&self) -> Option<&'static str> {
        if self.media_attached {
            Some("media")
        } else if !self.external_context_url.is_empty() {
            Some("link")
        } else if !self.post.is_empty() {
            Some("update")
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewComment {
    pub timestamp: i64,
    pub title: String,
    pub comment: String,
    pub author: String,
    pub group_name: String,
    pub media: Vec<MediaItem>,
}

impl NewComment {
    pub fn from_raw(raw: &RawComment, namespace: &MediaNamespace) -> Self {
        let mut comment = NewComment {
            timestamp: raw.timestamp,
            title: raw.title.to_string(),
            ..Default::default()
        };

        if let Some(body) = raw.body() {
            comment.comment = body.comment.to_string();
            comment.author = body.author.to_string();
            comment.group_name = body.group.to_string();
        }

        for media in raw.attachment_items().filter_map(|item| item.media.as_ref()) {
            let timestamp = match media.creation_timestamp {
                0 => raw.timestamp,
                ts => ts,
            };
            comment.media.push(MediaItem {
                timestamp,
                media_index: comment.media.len() as i64,
                media_uri: namespace.key(media.uri.as_str()),
                filename_extension: filename_extension(media.uri.as_str()),
            });
        }

        comment
    }

    pub fn is_complex(&self) -> bool {
        !self.media.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: Uuid,
    pub timestamp: i64,
    pub title: String,
    pub comment: String,
    pub author: String,
    pub group_name: String,
    pub media_attached: bool,
    pub conflict: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewReaction {
    pub timestamp: i64,
    pub title: String,
    pub actor: String,
    pub reaction: String,
}

impl From<&RawReaction> for NewReaction {
    fn from(raw: &RawReaction) -> Self {
        let (actor, reaction) = raw
            .body()
            .map(|b| (b.actor.to_string(), b.reaction.clone()))
            .unwrap_or_default();

        NewReaction {
            timestamp: raw.timestamp,
            title: raw.title.to_string(),
            actor,
            reaction,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reaction {
    pub id: Uuid,
    pub timestamp: i64,
    pub title: String,
    pub actor: String,
    pub reaction: String,
}

fn filename_extension(uri: &str) -> String {
    Path::new(uri)
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::schema::RawPosts;

    fn namespace() -> MediaNamespace {
        MediaNamespace {
            account: "acct".to_string(),
            archive_type: "facebook".to_string(),
            archive_id: Uuid::nil(),
        }
    }

    fn raw_post(json: &str) -> RawPost {
        serde_json::from_str::<RawPosts>(&format!("[{}]", json))
            .unwrap()
            .items
            .remove(0)
    }

    #[test]
    fn test_post_from_raw_collects_attachments() {
        let raw = raw_post(
            r#"{"timestamp": 100, "data": [{"post": "hi"}],
                "attachments": [{"data": [
                    {"media": {"uri": "photos_and_videos/a.jpg"}},
                    {"media": {"uri": "photos_and_videos/b.mp4", "creation_timestamp": 90}},
                    {"place": {"name": "Home", "address": "1 Road", "coordinate": {"latitude": 1.5, "longitude": 2.5}}},
                    {"event": {"name": "Party", "start_timestamp": 1, "end_timestamp": 2}}
                ]}],
                "tags": ["Bob", ""]}"#,
        );

        let post = NewPost::from_raw(&raw, &namespace());
        assert!(post.is_complex());
        assert_eq!(post.post, "hi");
        assert_eq!(post.media.len(), 2);
        assert_eq!(post.media[0].timestamp, 100);
        assert_eq!(post.media[1].timestamp, 90);
        assert_eq!(post.media[1].media_index, 1);
        assert_eq!(post.media[1].media_type(), "video");
        assert_eq!(post.media[0].media_type(), "photo");
        assert_eq!(
            post.media[0].media_uri,
            "acct/facebook/archives/00000000-0000-0000-0000-000000000000/data/photos_and_videos/a.jpg"
        );
        assert_eq!(post.places[0].latitude, Some(1.5));
        assert_eq!(post.event_name, "Party");
        assert_eq!(post.tags, vec!["Bob".to_string()]);
    }

    #[test]
    fn test_plain_post_is_not_complex() {
        let raw = raw_post(r#"{"timestamp": 100, "data": [{"post": "hi"}],
            "attachments": [{"data": [{"external_context": {"url": "https://example.com"}}]}]}"#);
        let post = NewPost::from_raw(&raw, &namespace());
        assert!(!post.is_complex());
        assert_eq!(post.external_context_url, "https://example.com");
    }

    #[test]
    fn test_post_type() {
        let mut post = Post {
            id: Uuid::nil(),
            timestamp: 1,
            update_timestamp: None,
            title: String::new(),
            post: String::new(),
            external_context_url: String::new(),
            external_context_source: String::new(),
            external_context_name: String::new(),
            event_name: String::new(),
            media_attached: false,
            conflict: false,
            media: vec![],
            places: vec![],
            tags: vec![],
        };
        assert_eq!(post.post_type(), None);

        post.post = "text".to_string();
        assert_eq!(post.post_type(), Some("update"));

        post.external_context_url = "https://example.com".to_string();
        assert_eq!(post.post_type(), Some("link"));

        post.media_attached = true;
        assert_eq!(post.post_type(), Some("media"));
    }
}
