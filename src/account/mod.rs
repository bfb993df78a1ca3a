/// Account state
///
/// Accounts own every archive, parsed record, stat and blob; they are the
/// unit of deletion. Derived insight fields live in the free-form metadata map.

mod store;

pub use store::{validate_account_number, AccountStore};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Metadata fields written by the pipeline
pub mod metadata_keys {
    pub const FIRST_ACTIVITY_TIMESTAMP: &str = "first_activity_timestamp";
    pub const LAST_ACTIVITY_TIMESTAMP: &str = "last_activity_timestamp";
    pub const LAST_POST_TIMESTAMP: &str = "last_post_timestamp";
    pub const LAST_REACTION_TIMESTAMP: &str = "last_reaction_timestamp";
    pub const ORIGINAL_LOCATION: &str = "original_location";
}

/// Account record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub account_number: String,
    pub metadata: Map<String, Value>,
    pub deleting: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn metadata_i64(&self, key: &str) -> Option<i64> {
        self.metadata.get(key).and_then(Value::as_i64)
    }

    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }
}
