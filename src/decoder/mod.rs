/// Archive decoder
///
/// Opens a zipped data export, checks its directory shape and yields typed
/// entity batches. Everything here is blocking; callers run it on
/// `spawn_blocking`.

pub mod mojibake;
pub mod schema;

pub use mojibake::MojibakeString;
pub use schema::{RawComment, RawFriend, RawPost, RawReaction};

use crate::error::{AppError, AppResult};
use schema::{RawComments, RawFriends, RawPosts, RawReactions};
use serde::de::DeserializeOwned;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use tracing::debug;
use validator::Validate;
use zip::ZipArchive;

/// Top-level folders every export must contain
pub const REQUIRED_ENTRIES: [&str; 3] = ["photos_and_videos/", "posts/", "friends/"];

const FRIENDS_FILE: &str = "friends/friends.json";
const REACTIONS_FILE: &str = "likes_and_reactions/posts_and_comments.json";
const COMMENTS_FILE: &str = "comments/comments.json";
const MEDIA_DIRECTORY: &str = "photos_and_videos/";
const FILES_DIRECTORY: &str = "files/";

/// A file copied out of the archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedFile {
    /// Path inside the archive, e.g. `photos_and_videos/album/1.jpg`
    pub name: String,
    pub path: PathBuf,
}

/// Every entity batch of an archive
///
/// Each kind decodes independently so one malformed file does not hide the rest.
#[derive(Debug)]
pub struct DecodedArchive {
    pub friends: AppResult<Vec<RawFriend>>,
    pub posts: AppResult<Vec<RawPost>>,
    pub reactions: AppResult<Vec<RawReaction>>,
    pub comments: AppResult<Vec<RawComment>>,
    pub media: AppResult<Vec<ExtractedFile>>,
    pub files: AppResult<Vec<ExtractedFile>>,
}

pub struct ArchiveDecoder {
    zip: ZipArchive<BufReader<File>>,
}

impl ArchiveDecoder {
    pub fn open(path: &Path) -> AppResult<Self> {
        let file = File::open(path)?;
        let zip = ZipArchive::new(BufReader::new(file))?;
        Ok(Self { zip })
    }

    pub fn entry_names(&self) -> impl Iterator<Item = &str> {
        self.zip.file_names()
    }

    /// Check the export has every required top-level folder
    pub fn validate_structure(&self) -> AppResult<()> {
        let missing: Vec<&str> = REQUIRED_ENTRIES
            .iter()
            .copied()
            .filter(|dir| !self.entry_names().any(|name| name.starts_with(dir)))
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(AppError::Validation(format!(
                "Archive is missing required entries: {}",
                missing.join(", ")
            )))
        }
    }

    pub fn friends(&mut self) -> AppResult<Vec<RawFriend>> {
        Ok(self
            .read_validated::<RawFriends>(FRIENDS_FILE)?
            .map(|f| f.friends)
            .unwrap_or_default())
    }

    /// Posts from every `posts/your_posts_<n>.json`, in file order
    pub fn posts(&mut self) -> AppResult<Vec<RawPost>> {
        let mut files: Vec<(u32, String)> = self
            .entry_names()
            .filter_map(|name| post_file_index(name).map(|index| (index, name.to_string())))
            .collect();
        files.sort();

        let mut posts = Vec::new();
        for (_, name) in files {
            if let Some(batch) = self.read_validated::<RawPosts>(&name)? {
                posts.extend(batch.items);
            }
        }
        Ok(posts)
    }

    pub fn reactions(&mut self) -> AppResult<Vec<RawReaction>> {
        Ok(self
            .read_validated::<RawReactions>(REACTIONS_FILE)?
            .map(|r| r.reactions)
            .unwrap_or_default())
    }

    pub fn comments(&mut self) -> AppResult<Vec<RawComment>> {
        Ok(self
            .read_validated::<RawComments>(COMMENTS_FILE)?
            .map(|c| c.comments)
            .unwrap_or_default())
    }

    /// Copy every file under `directory` into `destination`, keeping archive paths
    pub fn extract_directory(
        &mut self,
        directory: &str,
        destination: &Path,
    ) -> AppResult<Vec<ExtractedFile>> {
        let mut extracted = Vec::new();

        for index in 0..self.zip.len() {
            let mut entry = self.zip.by_index(index)?;
            if entry.is_dir() || !entry.name().starts_with(directory) {
                continue;
            }

            let Some(relative) = entry.enclosed_name() else {
                debug!(name = entry.name(), "Skipping entry with unsafe path");
                continue;
            };

            let path = destination.join(&relative);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut out = File::create(&path)?;
            io::copy(&mut entry, &mut out)?;

            extracted.push(ExtractedFile {
                name: entry.name().to_string(),
                path,
            });
        }

        Ok(extracted)
    }

    /// Decode every entity kind, extracting media files into `media_dir`
    pub fn decode_all(path: &Path, media_dir: &Path) -> AppResult<DecodedArchive> {
        let mut decoder = Self::open(path)?;
        decoder.validate_structure()?;

        Ok(DecodedArchive {
            friends: decoder.friends(),
            posts: decoder.posts(),
            reactions: decoder.reactions(),
            comments: decoder.comments(),
            media: decoder.extract_directory(MEDIA_DIRECTORY, media_dir),
            files: decoder.extract_directory(FILES_DIRECTORY, media_dir),
        })
    }

    /// Deserialize and validate one JSON entry; `None` when the entry is absent
    fn read_validated<T>(&mut self, name: &str) -> AppResult<Option<T>>
    where
        T: DeserializeOwned + Validate,
    {
        let entry = match self.zip.by_name(name) {
            Ok(entry) => entry,
            Err(zip::result::ZipError::FileNotFound) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let value: T = serde_json::from_reader(BufReader::new(entry))
            .map_err(|e| AppError::Decode(format!("{}: {}", name, e)))?;
        value
            .validate()
            .map_err(|e| AppError::Validation(format!("{}: {}", name, e)))?;

        Ok(Some(value))
    }
}

/// Validate an archive file's structure without decoding it
pub fn validate_archive(path: &Path) -> AppResult<()> {
    ArchiveDecoder::open(path)
        .map_err(|e| AppError::Validation(format!("Archive cannot be opened: {}", e)))?
        .validate_structure()
}

fn post_file_index(name: &str) -> Option<u32> {
    name.strip_prefix("posts/")?
        .strip_prefix("your_posts_")?
        .strip_suffix(".json")?
        .parse()
        .ok()
}
