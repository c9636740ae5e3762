use std::collections::BTreeMap;

use crate::record::{CanonicalDayRecord, DaySeries, DedupKey, MetricTotals, RawRecord};

/// Named metric extractor used by [`dedupe`].
pub type MetricFn<'a> = (&'a str, &'a dyn Fn(&RawRecord) -> f64);

/// Max-wins merge of metric maps keyed by `K`.
///
/// Iteration order is the key order, so the output does not depend on the
/// order in which values were offered.
#[derive(Debug, Clone)]
pub struct MaxMerge<K: Ord> {
    entries: BTreeMap<K, MetricTotals>,
}

impl<K: Ord> Default for MaxMerge<K> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<K: Ord> MaxMerge<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn offer(&mut self, key: K, metrics: &MetricTotals) {
        self.entries.entry(key).or_default().max_all(metrics);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_entries(self) -> impl Iterator<Item = (K, MetricTotals)> {
        self.entries.into_iter()
    }
}

impl MaxMerge<DedupKey> {
    pub fn into_records(self) -> Vec<CanonicalDayRecord> {
        self.into_entries()
            .map(|(key, metric_values)| CanonicalDayRecord {
                day: key.day,
                campaign_key: key.campaign_key,
                metric_values,
            })
            .collect()
    }
}

/// Collapses raw rows into one record per `(day, campaign)` with the largest
/// observed value per metric. Rows for which `key_fn` returns `None` are
/// skipped.
pub fn dedupe<F>(rows: &[RawRecord], key_fn: F, metric_fns: &[MetricFn<'_>]) -> Vec<CanonicalDayRecord>
where
    F: Fn(&RawRecord) -> Option<DedupKey>,
{
    let mut merge = MaxMerge::new();
    for row in rows {
        let Some(key) = key_fn(row) else {
            continue;
        };
        let metrics: MetricTotals = metric_fns
            .iter()
            .map(|(name, extract)| (name.to_string(), extract(row)))
            .collect();
        merge.offer(key, &metrics);
    }
    merge.into_records()
}

/// Re-applies the max-wins merge to records that may share keys.
pub fn merge_records<I>(records: I) -> Vec<CanonicalDayRecord>
where
    I: IntoIterator<Item = CanonicalDayRecord>,
{
    let mut merge = MaxMerge::new();
    for record in records {
        let key = record.key();
        merge.offer(key, &record.metric_values);
    }
    merge.into_records()
}

/// Sums records from different sources sharing a `(day, campaign)` key.
/// Sources measure disjoint things, so their contributions add up.
pub fn combine_sources<'a, I>(records: I) -> Vec<CanonicalDayRecord>
where
    I: IntoIterator<Item = &'a CanonicalDayRecord>,
{
    let mut combined: BTreeMap<DedupKey, MetricTotals> = BTreeMap::new();
    for record in records {
        combined
            .entry(record.key())
            .or_default()
            .add_all(&record.metric_values);
    }
    combined
        .into_iter()
        .map(|(key, metric_values)| CanonicalDayRecord {
            day: key.day,
            campaign_key: key.campaign_key,
            metric_values,
        })
        .collect()
}

/// Folds every campaign of a day into day-level totals.
pub fn sum_by_day(records: &[CanonicalDayRecord]) -> DaySeries {
    let mut series = DaySeries::new();
    for record in records {
        series
            .entry(record.day)
            .or_default()
            .add_all(&record.metric_values);
    }
    series
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::amount::parse_amount;
    use crate::date::parse_day;
    use crate::record::CellValue;

    fn row(day: &str, campaign: &str, spend: f64, clicks: f64) -> RawRecord {
        RawRecord::new()
            .with("day", day)
            .with("campaign", campaign)
            .with("spend", spend)
            .with("clicks", clicks)
    }

    fn key_fn(row: &RawRecord) -> Option<DedupKey> {
        let day = parse_day(row.get("day")?)?;
        let campaign = row
            .get("campaign")
            .and_then(CellValue::trimmed_text)
            .unwrap_or_default();
        Some(DedupKey::new(day, campaign))
    }

    fn run(rows: &[RawRecord]) -> Vec<CanonicalDayRecord> {
        let spend = |r: &RawRecord| r.get("spend").map(parse_amount).unwrap_or(0.0);
        let clicks = |r: &RawRecord| r.get("clicks").map(parse_amount).unwrap_or(0.0);
        let metrics: [MetricFn<'_>; 2] = [("spend", &spend), ("clicks", &clicks)];
        dedupe(rows, key_fn, &metrics)
    }

    fn corpus() -> Vec<RawRecord> {
        vec![
            row("2025-03-01", "Brand", 10.0, 4.0),
            row("2025-03-01", "Brand", 12.0, 3.0),
            row("2025-03-01", "Search", 7.0, 1.0),
            row("2025-03-02", "Brand", 5.0, 2.0),
            row("2025-03-01", "Brand", 11.0, 6.0),
            row("not a date", "Brand", 100.0, 100.0),
        ]
    }

    #[test]
    fn duplicate_keys_keep_max_per_metric() {
        let records = run(&corpus());
        assert_eq!(records.len(), 3);
        let brand = &records[0];
        assert_eq!(brand.campaign_key, "Brand");
        assert_eq!(brand.metric_values.get("spend"), 12.0);
        assert_eq!(brand.metric_values.get("clicks"), 6.0);
    }

    #[test]
    fn dedupe_is_idempotent() {
        let once = run(&corpus());
        let raw_again: Vec<RawRecord> = once.iter().map(CanonicalDayRecord::to_raw).collect();
        let twice = run(&raw_again);
        assert_eq!(once, twice);
        assert_eq!(merge_records(once.clone()), once);
    }

    #[test]
    fn dedupe_is_permutation_invariant() {
        let base = corpus();
        let expected = run(&base);
        let mut reversed = base.clone();
        reversed.reverse();
        assert_eq!(run(&reversed), expected);
        for shift in 1..base.len() {
            let mut rotated = base.clone();
            rotated.rotate_left(shift);
            assert_eq!(run(&rotated), expected, "rotation {shift}");
        }
    }

    #[test]
    fn day_totals_sum_campaigns() {
        let series = sum_by_day(&run(&corpus()));
        let day = NaiveDate::from_ymd_opt(2025, 3, 1).expect("date");
        assert_eq!(series[&day].get("spend"), 19.0);
        assert_eq!(series.len(), 2);
    }

    #[test]
    fn combine_sources_adds_matching_keys() {
        let a = run(&[row("2025-03-01", "Brand", 10.0, 1.0)]);
        let b = run(&[row("2025-03-01", "Brand", 5.0, 2.0)]);
        let combined = combine_sources(a.iter().chain(b.iter()));
        assert_eq!(combined.len(), 1);
        assert_eq!(combined[0].metric_values.get("spend"), 15.0);
        assert_eq!(combined[0].metric_values.get("clicks"), 3.0);
    }
}
