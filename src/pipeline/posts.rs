/// Post extraction
///
/// Streams the account's persisted posts in timestamp order through the post
/// aggregator, publishes each raw post, and derives the last post time and
/// an approximate location from the most recent tagged place.
use super::{save_stats, StageOutcome};
use crate::account::metadata_keys;
use crate::context::WorkerContext;
use crate::error::{AppResult, ArchiveErrorCode, ArchiveFailure, PipelineResult};
use crate::jobs::ArchiveRef;
use crate::records::Place;
use crate::stat_store::BatchWriter;
use crate::stats::{record_key, Aggregator, CountRecord, Section};
use serde_json::{Map, Value};
use tracing::{info, warn};

#[derive(Debug, Default)]
struct PostSummary {
    published: u64,
    last_timestamp: Option<i64>,
    location: Option<String>,
}

impl WorkerContext {
    pub(crate) async fn extract_posts(&self, archive: &ArchiveRef) -> PipelineResult<StageOutcome> {
        let id = archive.archive_id;
        let summary = self
            .aggregate_posts(&archive.account)
            .await
            .archive_failure(id, ArchiveErrorCode::FailToExtractPost)?;

        let mut metadata = Map::new();
        if let Some(timestamp) = summary.last_timestamp {
            metadata.insert(metadata_keys::LAST_POST_TIMESTAMP.to_string(), Value::from(timestamp));
        }
        if let Some(location) = &summary.location {
            metadata.insert(metadata_keys::ORIGINAL_LOCATION.to_string(), Value::from(location.as_str()));
        }
        self.accounts
            .merge_metadata(&archive.account, metadata)
            .await
            .archive_failure(id, ArchiveErrorCode::FailToExtractPost)?;

        info!(
            archive_id = %id,
            account = %archive.account,
            published = summary.published,
            "Posts extracted"
        );
        Ok(StageOutcome::Continue)
    }

    async fn aggregate_posts(&self, account: &str) -> AppResult<PostSummary> {
        let posts = self.records.posts(account).await?;
        let raw_key = record_key(account, "post");

        let mut writer = BatchWriter::new(self.stats.clone());
        let mut aggregator = Aggregator::new(Section::Post);
        let mut summary = PostSummary::default();
        let mut last_place: Option<&Place> = None;

        for post in &posts {
            // Nothing to show
            let Some(kind) = post.post_type() else {
                continue;
            };
            if let Some(place) = post.places.first() {
                last_place = Some(place);
            }

            if summary.last_timestamp == Some(post.timestamp) {
                continue;
            }
            summary.last_timestamp = Some(post.timestamp);

            writer.save(&raw_key, post.timestamp, serde_json::to_vec(post)?).await?;
            summary.published += 1;

            let record = CountRecord {
                timestamp: post.timestamp,
                kind: kind.to_string(),
                friends: post.tags.iter().map(|tag| tag.friend_name.clone()).collect(),
                place: post.places.first().map(|place| place.name.clone()),
            };
            save_stats(&mut writer, account, aggregator.push(&record)).await?;
        }

        save_stats(&mut writer, account, aggregator.finish()).await?;
        writer.flush().await?;

        if let Some(place) = last_place {
            summary.location = self.locate(place).await;
        }
        Ok(summary)
    }

    /// Country code of a place when it can be geocoded, else its name
    async fn locate(&self, place: &Place) -> Option<String> {
        if let (Some(geocoder), Some(latitude), Some(longitude)) =
            (&self.geocoder, place.latitude, place.longitude)
        {
            match geocoder.country_code(latitude, longitude).await {
                Ok(Some(code)) => return Some(code),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Reverse geocoding failed, using place name"),
            }
        }

        if place.name.is_empty() {
            None
        } else {
            Some(place.name.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::external::Geocoder;
    use crate::pipeline::testing::TestHarness;
    use crate::records::NewPost;
    use crate::stats::{Granularity, StatsReader};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Arc;
    use uuid::Uuid;

    // Sunday 2020-03-15 00:00 UTC
    const WEEK0: i64 = 1_584_230_400;
    const WEEK: i64 = 7 * 86_400;

    /// Answers with a fixed country code; `None` simulates an outage
    struct FixedGeocoder(Option<&'static str>);

    #[async_trait]
    impl Geocoder for FixedGeocoder {
        async fn country_code(&self, _latitude: f64, _longitude: f64) -> AppResult<Option<String>> {
            match self.0 {
                Some(code) => Ok(Some(code.to_string())),
                None => Err(AppError::External("geocoder down".to_string())),
            }
        }
    }

    fn berlin() -> Place {
        Place {
            name: "Berlin".to_string(),
            address: String::new(),
            latitude: Some(52.52),
            longitude: Some(13.40),
        }
    }

    async fn seed_posts(harness: &TestHarness) {
        let records = &harness.ctx.records;
        harness.ctx.accounts.ensure("acct1").await.unwrap();
        records
            .insert_plain_posts(
                "acct1",
                &[
                    NewPost {
                        timestamp: WEEK0 + 100,
                        post: "hello".to_string(),
                        ..Default::default()
                    },
                    NewPost {
                        timestamp: WEEK0 + 200,
                        external_context_url: "https://example.com".to_string(),
                        ..Default::default()
                    },
                    // Nothing to show; neither published nor counted
                    NewPost {
                        timestamp: WEEK0 + 300,
                        ..Default::default()
                    },
                ],
            )
            .await
            .unwrap();
        records
            .insert_complex_post(
                "acct1",
                &NewPost {
                    timestamp: WEEK0 + WEEK + 100,
                    post: "checked in".to_string(),
                    places: vec![berlin()],
                    ..Default::default()
                },
                &HashMap::new(),
            )
            .await
            .unwrap();
        // A later untyped post does not move the location or the last post time
        records
            .insert_complex_post(
                "acct1",
                &NewPost {
                    timestamp: WEEK0 + WEEK + 200,
                    places: vec![Place {
                        name: "Lisbon".to_string(),
                        address: String::new(),
                        latitude: None,
                        longitude: None,
                    }],
                    ..Default::default()
                },
                &HashMap::new(),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_extract_posts_aggregates_and_publishes() {
        let harness = TestHarness::new().await;
        seed_posts(&harness).await;
        let archive = ArchiveRef::new(Uuid::new_v4(), "acct1");

        let outcome = harness.ctx.extract_posts(&archive).await.unwrap();
        assert_eq!(outcome, StageOutcome::Continue);

        let reader = StatsReader::new(harness.stats.clone());
        let weeks = reader
            .range("acct1", Section::Post, Granularity::Week, 0, i64::MAX, None)
            .await
            .unwrap();
        assert_eq!(weeks.len(), 2);
        // Newest first
        assert_eq!(weeks[0].quantity, 1);
        assert_eq!(weeks[1].quantity, 2);
        assert_eq!(weeks[0].diff_from_previous, -0.5);
        assert_eq!(weeks[0].groups.place[0].name, "Berlin");
        assert_eq!(weeks[0].groups.place[0].data.get("update"), Some(&1));

        let years = reader
            .range("acct1", Section::Post, Granularity::Year, 0, i64::MAX, None)
            .await
            .unwrap();
        assert_eq!(years.iter().map(|s| s.quantity).sum::<i64>(), 3);

        assert_eq!(harness.stats.len(&record_key("acct1", "post")).await, 3);

        let account = harness.ctx.accounts.get("acct1").await.unwrap().unwrap();
        assert_eq!(
            account.metadata_i64(metadata_keys::LAST_POST_TIMESTAMP),
            Some(WEEK0 + WEEK + 100)
        );
        assert_eq!(account.metadata_str(metadata_keys::ORIGINAL_LOCATION), Some("Berlin"));
    }

    #[tokio::test]
    async fn test_extract_posts_without_posts() {
        let harness = TestHarness::new().await;
        harness.ctx.accounts.ensure("acct1").await.unwrap();
        let archive = ArchiveRef::new(Uuid::new_v4(), "acct1");

        harness.ctx.extract_posts(&archive).await.unwrap();
        assert!(harness.stats.keys().await.is_empty());

        let account = harness.ctx.accounts.get("acct1").await.unwrap().unwrap();
        assert!(account.metadata_i64(metadata_keys::LAST_POST_TIMESTAMP).is_none());
    }

    #[tokio::test]
    async fn test_locate_prefers_country_code() {
        let mut harness = TestHarness::new().await;
        harness.ctx.geocoder = Some(Arc::new(FixedGeocoder(Some("de"))));
        assert_eq!(harness.ctx.locate(&berlin()).await.as_deref(), Some("de"));

        harness.ctx.geocoder = Some(Arc::new(FixedGeocoder(None)));
        assert_eq!(harness.ctx.locate(&berlin()).await.as_deref(), Some("Berlin"));

        let unnamed = Place {
            name: String::new(),
            address: String::new(),
            latitude: None,
            longitude: None,
        };
        assert_eq!(harness.ctx.locate(&unnamed).await, None);
    }
}
