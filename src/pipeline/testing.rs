//! Fakes and a context builder shared by pipeline tests
use crate::archive::{ArchiveChanges, ArchiveStatus, NewArchive};
use crate::blob_store::{BlobBackend, DiskBlobBackend};
use crate::config::{
    AnalysisConfig, BlobstoreConfig, LoggingConfig, MetricsConfig, StatStoreConfig,
    StorageConfig, WorkerConfig, WorkerSettings,
};
use crate::context::{Services, WorkerContext};
use crate::db;
use crate::error::{AppError, AppResult};
use crate::external::{AnalysisService, AnalysisStatus, NotificationKind, Notifier, RecordKind, RecordRef};
use crate::jobs::{ArchiveRef, MemoryBroker};
use crate::stat_store::MemoryStatStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::Mutex;

#[derive(Default)]
pub(crate) struct FakeAnalysis {
    pub status: Mutex<Option<AnalysisStatus>>,
    pub records: Mutex<HashMap<(String, &'static str), (i64, i64)>>,
    pub scores: Mutex<HashMap<i64, f64>>,
    pub submitted: Mutex<Vec<String>>,
    pub deleted: Mutex<Vec<String>>,
    pub fail_delete: bool,
    pub fail_sentiment: bool,
}

fn kind_name(kind: RecordKind) -> &'static str {
    match kind {
        RecordKind::Post => "post",
        RecordKind::Reaction => "reaction",
    }
}

impl FakeAnalysis {
    pub async fn set_status(&self, status: AnalysisStatus) {
        *self.status.lock().await = Some(status);
    }

    pub async fn set_range(&self, account: &str, kind: RecordKind, first: i64, last: i64) {
        self.records
            .lock()
            .await
            .insert((account.to_string(), kind_name(kind)), (first, last));
    }
}

#[async_trait]
impl AnalysisService for FakeAnalysis {
    async fn submit(&self, account: &str, archive: &Path) -> AppResult<String> {
        if !archive.exists() {
            return Err(AppError::External("archive file missing".to_string()));
        }
        self.submitted.lock().await.push(account.to_string());
        Ok(format!("task-{}", account))
    }

    async fn status(&self, _task_id: &str) -> AppResult<AnalysisStatus> {
        Ok(self
            .status
            .lock()
            .await
            .clone()
            .unwrap_or(AnalysisStatus::Finished))
    }

    async fn first_record(&self, account: &str, kind: RecordKind) -> AppResult<Option<RecordRef>> {
        Ok(self
            .records
            .lock()
            .await
            .get(&(account.to_string(), kind_name(kind)))
            .map(|(first, _)| RecordRef { timestamp: *first }))
    }

    async fn last_record(&self, account: &str, kind: RecordKind) -> AppResult<Option<RecordRef>> {
        Ok(self
            .records
            .lock()
            .await
            .get(&(account.to_string(), kind_name(kind)))
            .map(|(_, last)| RecordRef { timestamp: *last }))
    }

    async fn sentiment_for_week(&self, _account: &str, week_end: i64) -> AppResult<f64> {
        if self.fail_sentiment {
            return Err(AppError::External("sentiment endpoint returned 500".to_string()));
        }
        Ok(self.scores.lock().await.get(&week_end).copied().unwrap_or(0.0))
    }

    async fn delete_owner(&self, account: &str) -> AppResult<()> {
        if self.fail_delete {
            return Err(AppError::External("analysis service down".to_string()));
        }
        self.deleted.lock().await.push(account.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct RecordingNotifier {
    pub sent: Mutex<Vec<(String, NotificationKind)>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, account: &str, kind: NotificationKind) -> AppResult<()> {
        self.sent.lock().await.push((account.to_string(), kind));
        Ok(())
    }
}

pub(crate) struct TestHarness {
    pub ctx: WorkerContext,
    pub broker: Arc<MemoryBroker>,
    pub stats: Arc<MemoryStatStore>,
    pub analysis: Arc<FakeAnalysis>,
    pub notifier: Arc<RecordingNotifier>,
    pub blobs: Arc<DiskBlobBackend>,
    pub dir: TempDir,
}

impl TestHarness {
    pub async fn new() -> Self {
        Self::with_analysis(FakeAnalysis::default()).await
    }

    pub async fn with_analysis(analysis: FakeAnalysis) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());

        let broker = Arc::new(MemoryBroker::new());
        let stats = Arc::new(MemoryStatStore::new());
        let analysis = Arc::new(analysis);
        let notifier = Arc::new(RecordingNotifier::default());
        let blobs = Arc::new(DiskBlobBackend::new(
            dir.path().join("blobs"),
            "http://localhost:9464/blobs".to_string(),
            "0123456789abcdef".to_string(),
        ));

        let pool = db::create_memory_pool().await.unwrap();
        let ctx = WorkerContext::from_parts(
            config,
            pool,
            Services {
                stats: stats.clone(),
                blobs: blobs.clone() as Arc<dyn BlobBackend>,
                analysis: analysis.clone(),
                notifier: notifier.clone(),
                geocoder: None,
                broker: broker.clone(),
            },
        )
        .unwrap();

        Self {
            ctx,
            broker,
            stats,
            analysis,
            notifier,
            blobs,
            dir,
        }
    }

    /// An archive that reached `processing`, as the parse stage leaves it
    pub async fn processing_archive(&self, account: &str, fingerprint: Option<&str>) -> ArchiveRef {
        let archives = &self.ctx.archives;
        self.ctx.accounts.ensure(account).await.unwrap();
        let archive = archives
            .create(NewArchive {
                account_number: account.to_string(),
                archive_type: "facebook".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        let steps = [
            (ArchiveStatus::Submitted, None),
            (ArchiveStatus::Stored, fingerprint.map(str::to_string)),
            (ArchiveStatus::Processing, None),
        ];
        for (status, fingerprint) in steps {
            archives
                .transition(
                    archive.id,
                    status,
                    ArchiveChanges {
                        fingerprint,
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
        }
        ArchiveRef::new(archive.id, account)
    }
}

pub(crate) fn test_config(root: &Path) -> WorkerConfig {
    WorkerConfig {
        worker: WorkerSettings {
            first_poll_delay_secs: 0,
            poll_interval_secs: 600,
            ..WorkerSettings::default()
        },
        storage: StorageConfig {
            database: root.join("insights.sqlite"),
            work_directory: root.join("work"),
            archive_type: "facebook".to_string(),
            blobstore: BlobstoreConfig::Disk {
                location: root.join("blobs"),
                public_url: "http://localhost:9464/blobs".to_string(),
                signing_secret: "0123456789abcdef".to_string(),
            },
            stat_store: StatStoreConfig::Memory,
        },
        analysis: AnalysisConfig {
            endpoint: "http://localhost:8000".to_string(),
            client_token: "token".to_string(),
            request_timeout_secs: 5,
        },
        notification: None,
        geocoder: None,
        metrics: MetricsConfig {
            enabled: false,
            bind_address: "127.0.0.1:0".to_string(),
        },
        logging: LoggingConfig {
            level: "debug".to_string(),
            json: false,
        },
    }
}
