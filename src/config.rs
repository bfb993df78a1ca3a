/// Configuration management for the archive insights worker
use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Main worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub worker: WorkerSettings,
    pub storage: StorageConfig,
    pub analysis: AnalysisConfig,
    pub notification: Option<NotificationConfig>,
    pub geocoder: Option<GeocoderConfig>,
    pub metrics: MetricsConfig,
    pub logging: LoggingConfig,
}

/// Job runtime settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSettings {
    /// Maximum number of jobs executing at once
    pub concurrency: usize,
    pub queue: QueueConfig,
    /// Delay before the first analysis status check
    pub first_poll_delay_secs: u64,
    /// Delay between subsequent analysis status checks
    pub poll_interval_secs: u64,
    /// Sleep between queue polls when nothing is ready
    pub idle_poll_millis: u64,
    /// How long shutdown waits for in-flight jobs
    pub drain_timeout_secs: u64,
}

impl WorkerSettings {
    pub fn first_poll_delay(&self) -> Duration {
        Duration::from_secs(self.first_poll_delay_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_millis)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            concurrency: 4,
            queue: QueueConfig::Memory,
            first_poll_delay_secs: 120,
            poll_interval_secs: 600,
            idle_poll_millis: 500,
            drain_timeout_secs: 10,
        }
    }
}

/// Job queue backend
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum QueueConfig {
    Memory,
    Redis { url: String, key_prefix: String },
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub database: PathBuf,
    /// Scratch space for downloaded and extracted archives
    pub work_directory: PathBuf,
    pub archive_type: String,
    pub blobstore: BlobstoreConfig,
    pub stat_store: StatStoreConfig,
}

/// Blob storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BlobstoreConfig {
    Disk {
        location: PathBuf,
        /// Base URL used when signing download/upload links
        public_url: String,
        signing_secret: String,
    },
    S3 {
        bucket: String,
        region: String,
        access_key_id: String,
        secret_access_key: String,
        endpoint: Option<String>,
    },
}

/// Time-series stat store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StatStoreConfig {
    Memory,
    Redis { url: String, key_prefix: String },
}

/// External analysis service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    pub endpoint: String,
    pub client_token: String,
    pub request_timeout_secs: u64,
}

/// Push notification service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    pub endpoint: String,
    pub app_id: String,
    pub api_key: String,
}

/// Reverse geocoding service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeocoderConfig {
    pub endpoint: String,
}

/// Metrics endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub bind_address: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl WorkerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> AppResult<Self> {
        dotenv::dotenv().ok();

        let queue = match env::var("WORKER_REDIS_URL") {
            Ok(url) => QueueConfig::Redis {
                url,
                key_prefix: env::var("WORKER_QUEUE_PREFIX")
                    .unwrap_or_else(|_| "insights:jobs:".to_string()),
            },
            Err(_) => QueueConfig::Memory,
        };

        let defaults = WorkerSettings::default();
        let worker = WorkerSettings {
            concurrency: parse_var("WORKER_CONCURRENCY", defaults.concurrency)?,
            queue,
            first_poll_delay_secs: parse_var(
                "WORKER_FIRST_POLL_DELAY_SECS",
                defaults.first_poll_delay_secs,
            )?,
            poll_interval_secs: parse_var("WORKER_POLL_INTERVAL_SECS", defaults.poll_interval_secs)?,
            idle_poll_millis: parse_var("WORKER_IDLE_POLL_MILLIS", defaults.idle_poll_millis)?,
            drain_timeout_secs: parse_var("WORKER_DRAIN_TIMEOUT_SECS", defaults.drain_timeout_secs)?,
        };

        let data_directory: PathBuf = env::var("INSIGHTS_DATA_DIRECTORY")
            .unwrap_or_else(|_| "./data".to_string())
            .into();
        let database = env::var("INSIGHTS_DB_LOCATION")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_directory.join("insights.sqlite"));
        let work_directory = env::var("INSIGHTS_WORK_DIRECTORY")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_directory.join("work"));

        let blobstore = if let Ok(bucket) = env::var("INSIGHTS_BLOBSTORE_S3_BUCKET") {
            BlobstoreConfig::S3 {
                bucket,
                region: env::var("INSIGHTS_BLOBSTORE_S3_REGION")
                    .unwrap_or_else(|_| "us-east-1".to_string()),
                access_key_id: env::var("INSIGHTS_BLOBSTORE_S3_ACCESS_KEY_ID")
                    .map_err(|_| AppError::Config("S3 access key required".to_string()))?,
                secret_access_key: env::var("INSIGHTS_BLOBSTORE_S3_SECRET_ACCESS_KEY")
                    .map_err(|_| AppError::Config("S3 secret key required".to_string()))?,
                endpoint: env::var("INSIGHTS_BLOBSTORE_S3_ENDPOINT").ok(),
            }
        } else {
            BlobstoreConfig::Disk {
                location: env::var("INSIGHTS_BLOBSTORE_DISK_LOCATION")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| data_directory.join("blobs")),
                public_url: env::var("INSIGHTS_BLOBSTORE_PUBLIC_URL")
                    .unwrap_or_else(|_| "http://localhost:9464/blobs".to_string()),
                signing_secret: env::var("INSIGHTS_BLOBSTORE_SIGNING_SECRET")
                    .unwrap_or_default(),
            }
        };

        let stat_store = match env::var("INSIGHTS_STAT_STORE_REDIS_URL") {
            Ok(url) => StatStoreConfig::Redis {
                url,
                key_prefix: env::var("INSIGHTS_STAT_STORE_PREFIX")
                    .unwrap_or_else(|_| "insights:stats:".to_string()),
            },
            Err(_) => StatStoreConfig::Memory,
        };

        let storage = StorageConfig {
            database,
            work_directory,
            archive_type: env::var("INSIGHTS_ARCHIVE_TYPE").unwrap_or_else(|_| "facebook".to_string()),
            blobstore,
            stat_store,
        };

        let analysis = AnalysisConfig {
            endpoint: env::var("ANALYSIS_ENDPOINT")
                .map_err(|_| AppError::Config("ANALYSIS_ENDPOINT required".to_string()))?,
            client_token: env::var("ANALYSIS_CLIENT_TOKEN")
                .map_err(|_| AppError::Config("ANALYSIS_CLIENT_TOKEN required".to_string()))?,
            request_timeout_secs: parse_var("ANALYSIS_REQUEST_TIMEOUT_SECS", 300)?,
        };

        let notification = match env::var("NOTIFICATION_ENDPOINT") {
            Ok(endpoint) => Some(NotificationConfig {
                endpoint,
                app_id: env::var("NOTIFICATION_APP_ID").unwrap_or_default(),
                api_key: env::var("NOTIFICATION_API_KEY").unwrap_or_default(),
            }),
            Err(_) => None,
        };

        let geocoder = env::var("GEOCODER_ENDPOINT")
            .ok()
            .map(|endpoint| GeocoderConfig { endpoint });

        let metrics = MetricsConfig {
            enabled: parse_var("METRICS_ENABLED", true)?,
            bind_address: env::var("METRICS_BIND_ADDRESS")
                .unwrap_or_else(|_| "0.0.0.0:9464".to_string()),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            json: env::var("LOG_FORMAT").map(|f| f == "json").unwrap_or(false),
        };

        Ok(Self {
            worker,
            storage,
            analysis,
            notification,
            geocoder,
            metrics,
            logging,
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> AppResult<()> {
        if self.worker.concurrency == 0 {
            return Err(AppError::Config(
                "Worker concurrency must be at least 1".to_string(),
            ));
        }

        if self.worker.poll_interval_secs == 0 {
            return Err(AppError::Config(
                "Analysis poll interval must be positive".to_string(),
            ));
        }

        if self.storage.work_directory.as_os_str().is_empty() {
            return Err(AppError::Config("Work directory cannot be empty".to_string()));
        }

        if self.storage.archive_type.is_empty() || self.storage.archive_type.contains('/') {
            return Err(AppError::Config(format!(
                "Invalid archive type: {:?}",
                self.storage.archive_type
            )));
        }

        match &self.storage.blobstore {
            BlobstoreConfig::S3 { bucket, .. } if bucket.is_empty() => {
                return Err(AppError::Config("S3 bucket cannot be empty".to_string()));
            }
            BlobstoreConfig::Disk { signing_secret, .. } if signing_secret.len() < 16 => {
                return Err(AppError::Config(
                    "Blob signing secret must be at least 16 characters".to_string(),
                ));
            }
            _ => {}
        }

        if !self.analysis.endpoint.starts_with("http://")
            && !self.analysis.endpoint.starts_with("https://")
        {
            return Err(AppError::Config(
                "Analysis endpoint must be an http(s) URL".to_string(),
            ));
        }

        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> AppResult<T> {
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| AppError::Config(format!("Invalid value for {}: {}", name, raw))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> WorkerConfig {
        WorkerConfig {
            worker: WorkerSettings::default(),
            storage: StorageConfig {
                database: PathBuf::from("./data/insights.sqlite"),
                work_directory: PathBuf::from("./data/work"),
                archive_type: "facebook".to_string(),
                blobstore: BlobstoreConfig::Disk {
                    location: PathBuf::from("./data/blobs"),
                    public_url: "http://localhost:9464/blobs".to_string(),
                    signing_secret: "0123456789abcdef".to_string(),
                },
                stat_store: StatStoreConfig::Memory,
            },
            analysis: AnalysisConfig {
                endpoint: "http://localhost:8000".to_string(),
                client_token: "token".to_string(),
                request_timeout_secs: 30,
            },
            notification: None,
            geocoder: None,
            metrics: MetricsConfig {
                enabled: false,
                bind_address: "127.0.0.1:0".to_string(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                json: false,
            },
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(sample_config().validate().is_ok());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let mut config = sample_config();
        config.worker.concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_short_signing_secret_rejected() {
        let mut config = sample_config();
        config.storage.blobstore = BlobstoreConfig::Disk {
            location: PathBuf::from("./data/blobs"),
            public_url: "http://localhost".to_string(),
            signing_secret: "short".to_string(),
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_archive_type_cannot_contain_slash() {
        let mut config = sample_config();
        config.storage.archive_type = "face/book".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_poll_durations() {
        let settings = WorkerSettings::default();
        assert_eq!(settings.first_poll_delay(), Duration::from_secs(120));
        assert_eq!(settings.poll_interval(), Duration::from_secs(600));
    }
}
