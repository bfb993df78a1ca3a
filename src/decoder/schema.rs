/// Raw entity shapes found in a data export
///
/// Unknown fields are ignored. Text fields go through [`MojibakeString`].
use super::mojibake::MojibakeString;
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RawFriends {
    #[validate(nested)]
    pub friends: Vec<RawFriend>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RawFriend {
    #[validate(range(min = 0))]
    pub timestamp: i64,
    pub name: MojibakeString,
    #[serde(default)]
    pub contact_info: MojibakeString,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RawPost {
    #[validate(range(min = 0))]
    pub timestamp: i64,
    #[serde(default)]
    pub title: MojibakeString,
    #[serde(default)]
    #[validate(length(max = 2))]
    pub data: Vec<PostData>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub tags: Vec<MojibakeString>,
}

/// Posts are exported as a bare array per file
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(transparent)]
pub struct RawPosts {
    #[validate(nested)]
    pub items: Vec<RawPost>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PostData {
    #[serde(default)]
    pub post: MojibakeString,
    #[serde(default)]
    pub update_timestamp: i64,
    #[serde(default)]
    pub backdated_timestamp: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Attachment {
    #[serde(default)]
    pub data: Vec<AttachmentData>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AttachmentData {
    pub external_context: Option<ExternalContext>,
    pub event: Option<Event>,
    pub media: Option<Media>,
    pub place: Option<Location>,
    #[serde(default)]
    pub name: MojibakeString,
    #[serde(default)]
    pub text: MojibakeString,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExternalContext {
    #[serde(default)]
    pub name: MojibakeString,
    #[serde(default)]
    pub source: MojibakeString,
    #[serde(default)]
    pub url: MojibakeString,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Event {
    pub name: MojibakeString,
    pub start_timestamp: i64,
    pub end_timestamp: i64,
    pub place: Option<Location>,
    #[serde(default)]
    pub description: MojibakeString,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Location {
    #[serde(default)]
    pub name: MojibakeString,
    pub coordinate: Option<Coordinate>,
    #[serde(default)]
    pub address: MojibakeString,
    #[serde(default)]
    pub url: MojibakeString,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Media {
    pub uri: MojibakeString,
    #[serde(default)]
    pub creation_timestamp: i64,
    pub thumbnail: Option<MediaThumbnail>,
    #[serde(default)]
    pub title: MojibakeString,
    #[serde(default)]
    pub description: MojibakeString,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaThumbnail {
    pub uri: MojibakeString,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RawReactions {
    #[validate(nested)]
    pub reactions: Vec<RawReaction>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RawReaction {
    #[validate(range(min = 0))]
    pub timestamp: i64,
    pub title: MojibakeString,
    #[serde(default)]
    pub data: Vec<ReactionWrapper>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReactionWrapper {
    pub reaction: ReactionData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReactionData {
    pub reaction: String,
    pub actor: MojibakeString,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RawComments {
    #[validate(nested)]
    pub comments: Vec<RawComment>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RawComment {
    #[validate(range(min = 0))]
    pub timestamp: i64,
    #[serde(default)]
    pub title: MojibakeString,
    #[serde(default)]
    pub data: Vec<CommentWrapper>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommentWrapper {
    pub comment: CommentData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommentData {
    #[serde(default)]
    pub timestamp: i64,
    pub comment: MojibakeString,
    #[serde(default)]
    pub author: MojibakeString,
    #[serde(default)]
    pub group: MojibakeString,
}

impl RawPost {
    /// Text body, if any data entry carries one
    pub fn text(&self) -> Option<&str> {
        self.data
            .iter()
            .map(|d| d.post.as_str())
            .find(|text| !text.is_empty())
    }

    pub fn update_timestamp(&self) -> Option<i64> {
        self.data
            .iter()
            .map(|d| d.update_timestamp)
            .find(|ts| *ts != 0)
    }

    pub fn attachment_items(&self) -> impl Iterator<Item = &AttachmentData> {
        self.attachments.iter().flat_map(|a| a.data.iter())
    }
}

impl RawComment {
    pub fn body(&self) -> Option<&CommentData> {
        self.data.first().map(|w| &w.comment)
    }

    pub fn attachment_items(&self) -> impl Iterator<Item = &AttachmentData> {
        self.attachments.iter().flat_map(|a| a.data.iter())
    }
}

impl RawReaction {
    pub fn body(&self) -> Option<&ReactionData> {
        self.data.first().map(|w| &w.reaction)
    }
}
