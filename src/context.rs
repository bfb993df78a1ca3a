/// Worker context and dependency injection
///
/// Every pipeline stage is a method on [`WorkerContext`]; it bundles the
/// stores, external clients and the job client handlers use to chain stages.
use crate::{
    account::AccountStore,
    archive::ArchiveStore,
    blob_store::{self, BlobBackend},
    config::{StatStoreConfig, WorkerConfig},
    db::{self, DatabaseOptions},
    error::AppResult,
    external::{
        AnalysisService, Geocoder, HttpAnalysisClient, HttpGeocoder, LogNotifier, Notifier,
        PushNotifier,
    },
    jobs::{self, Broker, JobClient},
    records::RecordStore,
    stat_store::{MemoryStatStore, RedisStatStore, StatStore},
};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// External collaborators of a context
pub struct Services {
    pub stats: Arc<dyn StatStore>,
    pub blobs: Arc<dyn BlobBackend>,
    pub analysis: Arc<dyn AnalysisService>,
    pub notifier: Arc<dyn Notifier>,
    pub geocoder: Option<Arc<dyn Geocoder>>,
    pub broker: Arc<dyn Broker>,
}

/// Shared state handed to every job handler
#[derive(Clone)]
pub struct WorkerContext {
    pub config: Arc<WorkerConfig>,
    pub db: SqlitePool,
    pub accounts: AccountStore,
    pub archives: ArchiveStore,
    pub records: RecordStore,
    pub stats: Arc<dyn StatStore>,
    pub blobs: Arc<dyn BlobBackend>,
    pub analysis: Arc<dyn AnalysisService>,
    pub notifier: Arc<dyn Notifier>,
    pub geocoder: Option<Arc<dyn Geocoder>>,
    /// Client for fetching archives from user supplied links
    pub http: reqwest::Client,
    pub jobs: JobClient,
}

impl WorkerContext {
    /// Create a context from configuration, connecting every backend
    pub async fn new(config: WorkerConfig) -> AppResult<Self> {
        config.validate()?;

        let db = db::create_pool(&config.storage.database, DatabaseOptions::default()).await?;
        db::run_migrations(&db).await?;
        db::test_connection(&db).await?;

        let stats: Arc<dyn StatStore> = match &config.storage.stat_store {
            StatStoreConfig::Memory => Arc::new(MemoryStatStore::new()),
            StatStoreConfig::Redis { url, key_prefix } => {
                Arc::new(RedisStatStore::new(url, key_prefix).await?)
            }
        };

        let blobs = blob_store::create_backend(&config.storage.blobstore).await?;
        let analysis = Arc::new(HttpAnalysisClient::new(&config.analysis)?);

        let notifier: Arc<dyn Notifier> = match &config.notification {
            Some(notification) => Arc::new(PushNotifier::new(notification.clone())?),
            None => {
                tracing::info!("No notification endpoint configured, notifications are logged only");
                Arc::new(LogNotifier)
            }
        };

        let geocoder = match &config.geocoder {
            Some(geocoder) => Some(Arc::new(HttpGeocoder::new(geocoder)?) as Arc<dyn Geocoder>),
            None => None,
        };

        let broker = jobs::create_broker(&config.worker.queue).await?;

        Self::from_parts(
            config,
            db,
            Services {
                stats,
                blobs,
                analysis,
                notifier,
                geocoder,
                broker,
            },
        )
    }

    /// Assemble a context from an existing pool and services
    pub fn from_parts(config: WorkerConfig, db: SqlitePool, services: Services) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .connect_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            config: Arc::new(config),
            accounts: AccountStore::new(db.clone()),
            archives: ArchiveStore::new(db.clone()),
            records: RecordStore::new(db.clone()),
            db,
            stats: services.stats,
            blobs: services.blobs,
            analysis: services.analysis,
            notifier: services.notifier,
            geocoder: services.geocoder,
            http,
            jobs: JobClient::new(services.broker),
        })
    }

    /// Scratch directory of one archive
    pub fn work_dir(&self, archive_id: Uuid) -> PathBuf {
        self.config
            .storage
            .work_directory
            .join(archive_id.to_string())
    }

    /// Local copy of an archive file
    pub fn archive_path(&self, archive_id: Uuid) -> PathBuf {
        self.work_dir(archive_id).join("archive.zip")
    }
}
