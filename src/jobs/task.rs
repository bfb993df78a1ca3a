/// Typed job payloads
///
/// Every pipeline stage is one [`Task`] variant carrying exactly the arguments
/// its handler needs. The order in which stages follow each other is declared
/// in [`TaskKind::next`].
use crate::account::validate_account_number;
use crate::error::{AppError, AppResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::ValidateUrl;

/// The archive a stage works on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveRef {
    pub archive_id: Uuid,
    pub account: String,
}

impl ArchiveRef {
    pub fn new(archive_id: Uuid, account: impl Into<String>) -> Self {
        Self {
            archive_id,
            account: account.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "task", content = "args", rename_all = "snake_case")]
pub enum Task {
    /// Fetch an archive from a user supplied link
    DownloadArchive {
        archive: ArchiveRef,
        url: String,
        /// Raw `Cookie` header forwarded to the source
        cookie: Option<String>,
    },
    /// Pick up an archive the client uploaded straight to the blob store
    ProcessUpload(ArchiveRef),
    ParseArchive(ArchiveRef),
    SubmitAnalysis(ArchiveRef),
    /// Poll the analysis task until it reaches a terminal status
    CheckAnalysis(ArchiveRef),
    ExtractPosts(ArchiveRef),
    ExtractReactions(ArchiveRef),
    ExtractSentiments(ArchiveRef),
    ExtractTimeMetadata { account: String },
    NotifyFinished { account: String },
    DeleteAccountData { account: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    DownloadArchive,
    ProcessUpload,
    ParseArchive,
    SubmitAnalysis,
    CheckAnalysis,
    ExtractPosts,
    ExtractReactions,
    ExtractSentiments,
    ExtractTimeMetadata,
    NotifyFinished,
    DeleteAccountData,
}

impl TaskKind {
    pub fn name(&self) -> &'static str {
        match self {
            TaskKind::DownloadArchive => "download_archive",
            TaskKind::ProcessUpload => "process_upload",
            TaskKind::ParseArchive => "parse_archive",
            TaskKind::SubmitAnalysis => "submit_analysis",
            TaskKind::CheckAnalysis => "check_analysis",
            TaskKind::ExtractPosts => "extract_posts",
            TaskKind::ExtractReactions => "extract_reactions",
            TaskKind::ExtractSentiments => "extract_sentiments",
            TaskKind::ExtractTimeMetadata => "extract_time_metadata",
            TaskKind::NotifyFinished => "notify_finished",
            TaskKind::DeleteAccountData => "delete_account_data",
        }
    }

    /// Stages enqueued when this stage succeeds
    pub fn next(&self) -> &'static [TaskKind] {
        match self {
            TaskKind::DownloadArchive | TaskKind::ProcessUpload => &[TaskKind::ParseArchive],
            TaskKind::ParseArchive => &[TaskKind::SubmitAnalysis],
            TaskKind::SubmitAnalysis => &[TaskKind::CheckAnalysis],
            TaskKind::CheckAnalysis => &[TaskKind::ExtractPosts],
            TaskKind::ExtractPosts => &[TaskKind::ExtractReactions],
            TaskKind::ExtractReactions => &[TaskKind::ExtractSentiments],
            TaskKind::ExtractSentiments => {
                &[TaskKind::ExtractTimeMetadata, TaskKind::NotifyFinished]
            }
            TaskKind::ExtractTimeMetadata
            | TaskKind::NotifyFinished
            | TaskKind::DeleteAccountData => &[],
        }
    }
}

impl Task {
    pub fn kind(&self) -> TaskKind {
        match self {
            Task::DownloadArchive { .. } => TaskKind::DownloadArchive,
            Task::ProcessUpload(_) => TaskKind::ProcessUpload,
            Task::ParseArchive(_) => TaskKind::ParseArchive,
            Task::SubmitAnalysis(_) => TaskKind::SubmitAnalysis,
            Task::CheckAnalysis(_) => TaskKind::CheckAnalysis,
            Task::ExtractPosts(_) => TaskKind::ExtractPosts,
            Task::ExtractReactions(_) => TaskKind::ExtractReactions,
            Task::ExtractSentiments(_) => TaskKind::ExtractSentiments,
            Task::ExtractTimeMetadata { .. } => TaskKind::ExtractTimeMetadata,
            Task::NotifyFinished { .. } => TaskKind::NotifyFinished,
            Task::DeleteAccountData { .. } => TaskKind::DeleteAccountData,
        }
    }

    pub fn archive(&self) -> Option<&ArchiveRef> {
        match self {
            Task::DownloadArchive { archive, .. } => Some(archive),
            Task::ProcessUpload(archive)
            | Task::ParseArchive(archive)
            | Task::SubmitAnalysis(archive)
            | Task::CheckAnalysis(archive)
            | Task::ExtractPosts(archive)
            | Task::ExtractReactions(archive)
            | Task::ExtractSentiments(archive) => Some(archive),
            Task::ExtractTimeMetadata { .. }
            | Task::NotifyFinished { .. }
            | Task::DeleteAccountData { .. } => None,
        }
    }

    pub fn account(&self) -> &str {
        match self {
            Task::ExtractTimeMetadata { account }
            | Task::NotifyFinished { account }
            | Task::DeleteAccountData { account } => account,
            other => other
                .archive()
                .map(|archive| archive.account.as_str())
                .unwrap_or_default(),
        }
    }

    /// Build a task of `kind` for the same archive and account
    ///
    /// Returns `None` for kinds that need arguments this task cannot supply.
    pub fn follow_up(&self, kind: TaskKind) -> Option<Task> {
        let account = self.account().to_string();
        let archive = self.archive().cloned();

        match kind {
            TaskKind::ParseArchive => archive.map(Task::ParseArchive),
            TaskKind::SubmitAnalysis => archive.map(Task::SubmitAnalysis),
            TaskKind::CheckAnalysis => archive.map(Task::CheckAnalysis),
            TaskKind::ExtractPosts => archive.map(Task::ExtractPosts),
            TaskKind::ExtractReactions => archive.map(Task::ExtractReactions),
            TaskKind::ExtractSentiments => archive.map(Task::ExtractSentiments),
            TaskKind::ProcessUpload => archive.map(Task::ProcessUpload),
            TaskKind::ExtractTimeMetadata => Some(Task::ExtractTimeMetadata { account }),
            TaskKind::NotifyFinished => Some(Task::NotifyFinished { account }),
            TaskKind::DeleteAccountData => Some(Task::DeleteAccountData { account }),
            TaskKind::DownloadArchive => None,
        }
    }

    /// Tasks to enqueue after this one succeeds
    pub fn successors(&self) -> Vec<Task> {
        self.kind()
            .next()
            .iter()
            .filter_map(|kind| self.follow_up(*kind))
            .collect()
    }

    /// Reject payloads no handler could act on
    pub fn validate(&self) -> AppResult<()> {
        validate_account_number(self.account())?;

        if let Task::DownloadArchive { url, .. } = self {
            if !url.validate_url() {
                return Err(AppError::Validation(format!("Invalid archive URL: {}", url)));
            }
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(AppError::Validation(format!(
                    "Archive URL must be http(s): {}",
                    url
                )));
            }
        }

        Ok(())
    }
}

/// A queued task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub task: Task,
    pub enqueued_at: DateTime<Utc>,
}

impl Job {
    pub fn new(task: Task) -> Self {
        Self {
            id: Uuid::new_v4(),
            task,
            enqueued_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn archive() -> ArchiveRef {
        ArchiveRef::new(Uuid::nil(), "acct1")
    }

    #[test]
    fn test_task_serializes_tagged() {
        let task = Task::ParseArchive(archive());
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["task"], "parse_archive");
        assert_eq!(json["args"]["account"], "acct1");

        let back: Task = serde_json::from_value(json).unwrap();
        assert_eq!(back, task);
    }

    #[test]
    fn test_pipeline_chain() {
        let mut chain = vec![TaskKind::DownloadArchive];
        let mut current = TaskKind::DownloadArchive;
        while let [next] = current.next() {
            chain.push(*next);
            current = *next;
        }

        assert_eq!(
            chain,
            vec![
                TaskKind::DownloadArchive,
                TaskKind::ParseArchive,
                TaskKind::SubmitAnalysis,
                TaskKind::CheckAnalysis,
                TaskKind::ExtractPosts,
                TaskKind::ExtractReactions,
                TaskKind::ExtractSentiments,
            ]
        );
        assert_eq!(
            TaskKind::ExtractSentiments.next(),
            &[TaskKind::ExtractTimeMetadata, TaskKind::NotifyFinished]
        );
        assert!(TaskKind::DeleteAccountData.next().is_empty());
    }

    #[test]
    fn test_successors_carry_arguments() {
        let successors = Task::ExtractSentiments(archive()).successors();
        assert_eq!(
            successors,
            vec![
                Task::ExtractTimeMetadata {
                    account: "acct1".to_string()
                },
                Task::NotifyFinished {
                    account: "acct1".to_string()
                },
            ]
        );

        let download = Task::DownloadArchive {
            archive: archive(),
            url: "https://example.com/a.zip".to_string(),
            cookie: None,
        };
        assert_eq!(download.successors(), vec![Task::ParseArchive(archive())]);
    }

    #[test]
    fn test_validate() {
        let bad_url = Task::DownloadArchive {
            archive: archive(),
            url: "not a url".to_string(),
            cookie: None,
        };
        assert!(bad_url.validate().is_err());

        let ftp = Task::DownloadArchive {
            archive: archive(),
            url: "ftp://example.com/a.zip".to_string(),
            cookie: None,
        };
        assert!(ftp.validate().is_err());

        let bad_account = Task::NotifyFinished {
            account: "../etc".to_string(),
        };
        assert!(bad_account.validate().is_err());

        assert!(Task::ParseArchive(archive()).validate().is_ok());
    }
}
