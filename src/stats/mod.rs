/// Usage statistics
///
/// Rolling per-period statistics derived from an account's posts, reactions
/// and weekly sentiment scores. Stats are produced by the [`Aggregator`] and
/// stored in the time-series store under `{account}/{section}-{period}-stat`.

pub mod aggregator;
pub mod reader;

pub use aggregator::{Aggregator, CountRecord};
pub use reader::StatsReader;

use crate::timeutil;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Independently counted statistic streams
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Section {
    Post,
    Reaction,
    Sentiment,
}

impl Section {
    pub const ALL: [Section; 3] = [Section::Post, Section::Reaction, Section::Sentiment];

    pub fn as_str(&self) -> &'static str {
        match self {
            Section::Post => "post",
            Section::Reaction => "reaction",
            Section::Sentiment => "sentiment",
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Period sizes a stat is rolled up at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Week,
    Year,
    Decade,
}

impl Granularity {
    pub const ALL: [Granularity; 3] = [Granularity::Week, Granularity::Year, Granularity::Decade];

    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Week => "week",
            Granularity::Year => "year",
            Granularity::Decade => "decade",
        }
    }

    /// Start of the period containing `timestamp`
    pub fn period_start(&self, timestamp: i64) -> i64 {
        match self {
            Granularity::Week => timeutil::abs_week(timestamp),
            Granularity::Year => timeutil::abs_year(timestamp),
            Granularity::Decade => timeutil::abs_decade(timestamp),
        }
    }

    /// Start of the sub-period bucket (day of week, month of year, year of decade)
    pub fn sub_period_start(&self, timestamp: i64) -> i64 {
        match self {
            Granularity::Week => timeutil::abs_day(timestamp),
            Granularity::Year => timeutil::abs_month(timestamp),
            Granularity::Decade => timeutil::abs_year(timestamp),
        }
    }

    /// Start of the period immediately before the one starting at `period_start`
    pub fn previous_period_start(&self, period_start: i64) -> i64 {
        self.period_start(period_start - 1)
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named bucket of per-type counts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeriodData {
    pub name: String,
    pub data: BTreeMap<String, i64>,
}

/// Breakdowns attached to a usage stat
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatGroups {
    #[serde(rename = "type")]
    pub by_type: BTreeMap<String, i64>,
    pub sub_period: Vec<PeriodData>,
    pub friend: Vec<PeriodData>,
    pub place: Vec<PeriodData>,
}

/// One finalized statistic for a (section, granularity, period) key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageStat {
    pub section: Section,
    pub granularity: Granularity,
    pub period_started_at: i64,
    pub quantity: i64,
    pub diff_from_previous: f64,
    pub groups: StatGroups,
}

impl UsageStat {
    pub fn encode(&self) -> Result<Vec<u8>, serde_cbor::Error> {
        serde_cbor::to_vec(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, serde_cbor::Error> {
        serde_cbor::from_slice(bytes)
    }
}

/// Time-series key for a stat stream
pub fn stat_key(account: &str, section: Section, granularity: Granularity) -> String {
    format!("{}/{}-{}-stat", account, section, granularity)
}

/// Time-series key for raw published records of one kind
pub fn record_key(account: &str, kind: &str) -> String {
    format!("{}/{}", account, kind)
}

/// Every stat key owned by an account
pub fn all_stat_keys(account: &str) -> Vec<String> {
    Section::ALL
        .iter()
        .flat_map(|section| {
            Granularity::ALL
                .iter()
                .map(move |granularity| stat_key(account, *section, *granularity))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stat_key_layout() {
        assert_eq!(
            stat_key("acct1", Section::Post, Granularity::Week),
            "acct1/post-week-stat"
        );
        assert_eq!(
            stat_key("acct1", Section::Sentiment, Granularity::Decade),
            "acct1/sentiment-decade-stat"
        );
        assert_eq!(record_key("acct1", "reaction"), "acct1/reaction");
    }

    #[test]
    fn test_all_stat_keys_cover_every_section_and_granularity() {
        let keys = all_stat_keys("a");
        assert_eq!(keys.len(), 9);
        assert!(keys.contains(&"a/reaction-year-stat".to_string()));
    }

    #[test]
    fn test_previous_period_start() {
        let week = timeutil::abs_week(1_584_539_110);
        assert_eq!(
            Granularity::Week.previous_period_start(week),
            week - timeutil::SECONDS_PER_WEEK
        );
        // 2020 -> 2019
        assert_eq!(Granularity::Year.previous_period_start(1_577_836_800), 1_546_300_800);
        // 2020s -> 2010s
        assert_eq!(Granularity::Decade.previous_period_start(1_577_836_800), 1_262_304_000);
    }

    #[test]
    fn test_usage_stat_cbor_encoding() {
        let stat = UsageStat {
            section: Section::Reaction,
            granularity: Granularity::Year,
            period_started_at: 1_577_836_800,
            quantity: 3,
            diff_from_previous: -0.25,
            groups: StatGroups::default(),
        };
        let decoded = UsageStat::decode(&stat.encode().unwrap()).unwrap();
        assert_eq!(decoded, stat);
    }
}
