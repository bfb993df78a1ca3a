/// Single-pass incremental statistics aggregation
///
/// Consumes a timestamp-ascending record stream for one section and keeps an
/// open accumulator per granularity. When a record falls into a new period the
/// open accumulator is finalized into a [`UsageStat`] and returned to the
/// caller, which persists it. [`Aggregator::finish`] force-flushes whatever is
/// still open at end of stream.
use super::{Granularity, PeriodData, Section, StatGroups, UsageStat};
use crate::timeutil;
use std::collections::BTreeMap;

/// A countable record fed into a post or reaction aggregator
#[derive(Debug, Clone, PartialEq)]
pub struct CountRecord {
    pub timestamp: i64,
    /// Post type (`media`, `link`, `update`) or reaction name
    pub kind: String,
    pub friends: Vec<String>,
    pub place: Option<String>,
}

impl CountRecord {
    pub fn new(timestamp: i64, kind: impl Into<String>) -> Self {
        Self {
            timestamp,
            kind: kind.into(),
            friends: Vec::new(),
            place: None,
        }
    }
}

enum Observation<'a> {
    Count(&'a CountRecord),
    Score(f64),
}

#[derive(Debug)]
struct Accumulator {
    period_start: i64,
    total: i64,
    scores: Vec<f64>,
    by_type: BTreeMap<String, i64>,
    sub_periods: Vec<PeriodData>,
    friends: BTreeMap<String, BTreeMap<String, i64>>,
    places: BTreeMap<String, BTreeMap<String, i64>>,
}

impl Accumulator {
    fn open(period_start: i64) -> Self {
        Self {
            period_start,
            total: 0,
            scores: Vec::new(),
            by_type: BTreeMap::new(),
            sub_periods: Vec::new(),
            friends: BTreeMap::new(),
            places: BTreeMap::new(),
        }
    }

    fn add(&mut self, granularity: Granularity, timestamp: i64, observation: &Observation<'_>) {
        match observation {
            Observation::Score(score) => self.scores.push(*score),
            Observation::Count(record) => {
                self.total += 1;
                increment(&mut self.by_type, &record.kind);

                // Buckets are appended in stream order; a new one opens only
                // when the sub-period differs from the last appended bucket.
                let bucket = granularity.sub_period_start(timestamp).to_string();
                let needs_bucket = self
                    .sub_periods
                    .last()
                    .map_or(true, |last| last.name != bucket);
                if needs_bucket {
                    self.sub_periods.push(PeriodData {
                        name: bucket,
                        data: BTreeMap::new(),
                    });
                }
                if let Some(last) = self.sub_periods.last_mut() {
                    increment(&mut last.data, &record.kind);
                }

                for friend in &record.friends {
                    increment(self.friends.entry(friend.clone()).or_default(), &record.kind);
                }
                if let Some(place) = &record.place {
                    increment(self.places.entry(place.clone()).or_default(), &record.kind);
                }
            }
        }
    }

    fn quantity(&self, section: Section) -> i64 {
        match section {
            Section::Sentiment => {
                if self.scores.is_empty() {
                    0
                } else {
                    let mean = self.scores.iter().sum::<f64>() / self.scores.len() as f64;
                    mean.round() as i64
                }
            }
            Section::Post | Section::Reaction => self.total,
        }
    }
}

fn increment(map: &mut BTreeMap<String, i64>, key: &str) {
    *map.entry(key.to_string()).or_insert(0) += 1;
}

fn into_period_data(map: BTreeMap<String, BTreeMap<String, i64>>) -> Vec<PeriodData> {
    map.into_iter()
        .map(|(name, data)| PeriodData { name, data })
        .collect()
}

#[derive(Debug)]
struct Window {
    granularity: Granularity,
    current: Option<Accumulator>,
    /// Start and quantity of the last finalized period
    previous: Option<(i64, i64)>,
}

impl Window {
    fn new(granularity: Granularity) -> Self {
        Self {
            granularity,
            current: None,
            previous: None,
        }
    }

    fn flush(&mut self, section: Section) -> Option<UsageStat> {
        let acc = self.current.take()?;
        let quantity = acc.quantity(section);

        let contiguous_previous = self
            .previous
            .filter(|(start, _)| *start == self.granularity.previous_period_start(acc.period_start));
        let diff_from_previous = match contiguous_previous {
            Some((_, previous_quantity)) => timeutil::diff(quantity as f64, previous_quantity as f64),
            None => 1.0,
        };
        self.previous = Some((acc.period_start, quantity));

        Some(UsageStat {
            section,
            granularity: self.granularity,
            period_started_at: acc.period_start,
            quantity,
            diff_from_previous,
            groups: StatGroups {
                by_type: acc.by_type,
                sub_period: acc.sub_periods,
                friend: into_period_data(acc.friends),
                place: into_period_data(acc.places),
            },
        })
    }
}

/// Rolling week/year/decade aggregation for one section of one account
#[derive(Debug)]
pub struct Aggregator {
    section: Section,
    last_timestamp: Option<i64>,
    windows: [Window; 3],
}

impl Aggregator {
    pub fn new(section: Section) -> Self {
        Self {
            section,
            last_timestamp: None,
            windows: Granularity::ALL.map(Window::new),
        }
    }

    pub fn section(&self) -> Section {
        self.section
    }

    /// Count one record; returns the stats of any periods it closed
    pub fn push(&mut self, record: &CountRecord) -> Vec<UsageStat> {
        self.observe(record.timestamp, Observation::Count(record))
    }

    /// Add one weekly sentiment score observed at `timestamp`
    pub fn push_score(&mut self, timestamp: i64, score: f64) -> Vec<UsageStat> {
        self.observe(timestamp, Observation::Score(score))
    }

    /// Finalize every open period
    pub fn finish(&mut self) -> Vec<UsageStat> {
        let section = self.section;
        self.windows
            .iter_mut()
            .filter_map(|window| window.flush(section))
            .collect()
    }

    fn observe(&mut self, timestamp: i64, observation: Observation<'_>) -> Vec<UsageStat> {
        // Same timestamp as the immediately preceding record: already counted
        if self.last_timestamp == Some(timestamp) {
            return Vec::new();
        }
        self.last_timestamp = Some(timestamp);

        let section = self.section;
        let mut flushed = Vec::new();
        for window in self.windows.iter_mut() {
            let period_start = window.granularity.period_start(timestamp);
            let rolled = window
                .current
                .as_ref()
                .map_or(false, |acc| acc.period_start != period_start);
            if rolled {
                flushed.extend(window.flush(section));
            }

            window
                .current
                .get_or_insert_with(|| Accumulator::open(period_start))
                .add(window.granularity, timestamp, &observation);
        }
        flushed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeutil::{SECONDS_PER_DAY, SECONDS_PER_WEEK};

    // Sunday 2020-03-15 00:00:00 UTC
    const W0: i64 = 1_584_230_400;

    fn post(timestamp: i64, kind: &str) -> CountRecord {
        CountRecord::new(timestamp, kind)
    }

    fn only(stats: &[UsageStat], granularity: Granularity) -> Vec<&UsageStat> {
        stats.iter().filter(|s| s.granularity == granularity).collect()
    }

    #[test]
    fn test_rolls_week_and_diffs_against_previous() {
        let mut agg = Aggregator::new(Section::Post);
        assert!(agg.push(&post(W0, "update")).is_empty());
        assert!(agg.push(&post(W0 + 1, "update")).is_empty());

        let closed = agg.push(&post(W0 + SECONDS_PER_WEEK, "link"));
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].granularity, Granularity::Week);
        assert_eq!(closed[0].period_started_at, W0);
        assert_eq!(closed[0].quantity, 2);
        assert_eq!(closed[0].diff_from_previous, 1.0);

        let rest = agg.finish();
        let weeks = only(&rest, Granularity::Week);
        assert_eq!(weeks.len(), 1);
        assert_eq!(weeks[0].quantity, 1);
        assert_eq!(weeks[0].diff_from_previous, -0.5);

        let years = only(&rest, Granularity::Year);
        assert_eq!(years[0].quantity, 3);
        assert_eq!(only(&rest, Granularity::Decade)[0].quantity, 3);
    }

    #[test]
    fn test_duplicate_timestamp_counted_once() {
        let mut agg = Aggregator::new(Section::Reaction);
        agg.push(&post(W0 + 10, "LIKE"));
        agg.push(&post(W0 + 10, "LIKE"));
        let stats = agg.finish();
        assert!(stats.iter().all(|s| s.quantity == 1));
    }

    #[test]
    fn test_single_record_yields_one_stat_per_granularity() {
        let mut agg = Aggregator::new(Section::Post);
        agg.push(&post(W0, "media"));
        let stats = agg.finish();
        assert_eq!(stats.len(), 3);
        for granularity in Granularity::ALL {
            assert_eq!(only(&stats, granularity).len(), 1);
        }
        // Nothing left open
        assert!(agg.finish().is_empty());
    }

    #[test]
    fn test_non_contiguous_period_diff_is_one() {
        let mut agg = Aggregator::new(Section::Post);
        agg.push(&post(W0, "update"));
        agg.push(&post(W0 + 1, "update"));
        agg.push(&post(W0 + 2, "update"));
        let closed = agg.push(&post(W0 + 3 * SECONDS_PER_WEEK, "update"));
        assert_eq!(closed[0].quantity, 3);

        let weeks = agg.finish();
        let last_week = only(&weeks, Granularity::Week)[0];
        assert_eq!(last_week.quantity, 1);
        assert_eq!(last_week.diff_from_previous, 1.0);
    }

    #[test]
    fn test_groups_by_type_sub_period_friend_and_place() {
        let mut agg = Aggregator::new(Section::Post);
        let mut tagged = post(W0 + 100, "media");
        tagged.friends = vec!["Alice".to_string(), "Bob".to_string()];
        tagged.place = Some("Taipei".to_string());
        agg.push(&tagged);
        agg.push(&post(W0 + 200, "update"));
        let mut next_day = post(W0 + SECONDS_PER_DAY + 5, "media");
        next_day.friends = vec!["Alice".to_string()];
        agg.push(&next_day);

        let stats = agg.finish();
        let week = only(&stats, Granularity::Week)[0];
        assert_eq!(week.quantity, 3);
        assert_eq!(week.groups.by_type.get("media"), Some(&2));
        assert_eq!(week.groups.by_type.get("update"), Some(&1));

        assert_eq!(week.groups.sub_period.len(), 2);
        assert_eq!(week.groups.sub_period[0].name, W0.to_string());
        assert_eq!(week.groups.sub_period[0].data.get("media"), Some(&1));
        assert_eq!(week.groups.sub_period[0].data.get("update"), Some(&1));
        assert_eq!(
            week.groups.sub_period[1].name,
            (W0 + SECONDS_PER_DAY).to_string()
        );

        let alice = week.groups.friend.iter().find(|f| f.name == "Alice").unwrap();
        assert_eq!(alice.data.get("media"), Some(&2));
        assert_eq!(week.groups.friend.len(), 2);
        assert_eq!(week.groups.place.len(), 1);
        assert_eq!(week.groups.place[0].name, "Taipei");

        // Year buckets are months
        let year = only(&stats, Granularity::Year)[0];
        assert_eq!(year.groups.sub_period.len(), 1);
        assert_eq!(year.groups.sub_period[0].name, "1583020800");
    }

    #[test]
    fn test_sentiment_uses_rounded_mean() {
        let mut agg = Aggregator::new(Section::Sentiment);
        agg.push_score(W0, 1.0);
        agg.push_score(W0 + SECONDS_PER_WEEK, 2.0);
        agg.push_score(W0 + 2 * SECONDS_PER_WEEK, 2.0);
        let stats = agg.finish();

        let year = only(&stats, Granularity::Year)[0];
        // mean 5/3 rounds to 2
        assert_eq!(year.quantity, 2);
        assert_eq!(year.diff_from_previous, 1.0);

        let last_week = only(&stats, Granularity::Week)[0];
        assert_eq!(last_week.quantity, 2);
        assert_eq!(last_week.diff_from_previous, 0.0);
        assert!(last_week.groups.sub_period.is_empty());
    }
}
