// src/series/mod.rs

pub mod date_parser;

pub use date_parser::parse_timestamp;

use chrono::{Datelike, NaiveDateTime};
use std::collections::BTreeMap;

/// Column label for one fetched series: `<var>_<scenario>_<percentile>`.
pub fn column_label(var: &str, scenario: &str, percentile: &str) -> String {
    format!("{}_{}_{}", var, scenario, percentile)
}

/// Where a rolling window sits relative to the year it is labelled with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Alignment {
    /// Window ends at the labelled year.
    Trailing,
    /// Window is centred on the labelled year.
    Centered,
}

/// A contiguous yearly series. `None` marks a year without data.
#[derive(Clone, Debug, PartialEq)]
pub struct AnnualSeries {
    pub label: String,
    pub first_year: i32,
    pub values: Vec<Option<f64>>,
}

impl AnnualSeries {
    pub fn new(label: impl Into<String>, first_year: i32, values: Vec<Option<f64>>) -> Self {
        Self {
            label: label.into(),
            first_year,
            values,
        }
    }

    pub fn empty(label: impl Into<String>) -> Self {
        Self::new(label, 0, Vec::new())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn last_year(&self) -> Option<i32> {
        if self.values.is_empty() {
            None
        } else {
            Some(self.first_year + self.values.len() as i32 - 1)
        }
    }

    /// Value at `year`, `None` when the year is outside the span or missing.
    pub fn get(&self, year: i32) -> Option<f64> {
        let idx = year.checked_sub(self.first_year)?;
        if idx < 0 {
            return None;
        }
        self.values.get(idx as usize).copied().flatten()
    }

    pub fn iter(&self) -> impl Iterator<Item = (i32, Option<f64>)> + '_ {
        self.values
            .iter()
            .enumerate()
            .map(move |(i, v)| (self.first_year + i as i32, *v))
    }

    /// Rolling mean with `min_periods == window`: any gap inside the window
    /// yields `None`, as do windows that run past either end of the series.
    pub fn rolling_mean(&self, window: usize, alignment: Alignment) -> AnnualSeries {
        let n = self.values.len();
        if window == 0 {
            return AnnualSeries::new(self.label.clone(), self.first_year, vec![None; n]);
        }
        let lead = match alignment {
            Alignment::Trailing => 0,
            Alignment::Centered => (window - 1) / 2,
        };

        let values = (0..n)
            .map(|i| {
                let end = i + lead;
                if end >= n || end + 1 < window {
                    return None;
                }
                let start = end + 1 - window;
                let mut sum = 0.0;
                for v in &self.values[start..=end] {
                    sum += (*v)?;
                }
                Some(sum / window as f64)
            })
            .collect();

        AnnualSeries::new(self.label.clone(), self.first_year, values)
    }

    /// Maximal runs of consecutive years that carry a value.
    pub fn segments(&self) -> Vec<Vec<(i32, f64)>> {
        let mut out = Vec::new();
        let mut current = Vec::new();
        for (year, value) in self.iter() {
            match value {
                Some(v) => current.push((year, v)),
                None if !current.is_empty() => out.push(std::mem::take(&mut current)),
                None => {}
            }
        }
        if !current.is_empty() {
            out.push(current);
        }
        out
    }

    /// `(min, max)` over present values.
    pub fn value_range(&self) -> Option<(f64, f64)> {
        self.values.iter().flatten().fold(None, |acc, &v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
    }
}

/// Group irregular samples by calendar year and take the arithmetic mean of
/// each year's present values. Every year between the first and last sample
/// appears in the output; years with nothing to average are `None`.
pub fn resample_annual<I>(label: impl Into<String>, points: I) -> AnnualSeries
where
    I: IntoIterator<Item = (NaiveDateTime, Option<f64>)>,
{
    let mut buckets: BTreeMap<i32, (f64, usize)> = BTreeMap::new();
    let mut span: Option<(i32, i32)> = None;

    for (ts, value) in points {
        let year = ts.year();
        span = Some(match span {
            None => (year, year),
            Some((lo, hi)) => (lo.min(year), hi.max(year)),
        });
        if let Some(v) = value.filter(|v| v.is_finite()) {
            let bucket = buckets.entry(year).or_insert((0.0, 0));
            bucket.0 += v;
            bucket.1 += 1;
        }
    }

    let label = label.into();
    let Some((first, last)) = span else {
        return AnnualSeries::empty(label);
    };

    let values = (first..=last)
        .map(|year| {
            buckets
                .get(&year)
                .map(|(sum, count)| sum / *count as f64)
        })
        .collect();

    AnnualSeries::new(label, first, values)
}

/// Outer join of several annual series on year.
#[derive(Clone, Debug, Default)]
pub struct SeriesFrame {
    columns: Vec<AnnualSeries>,
}

impl SeriesFrame {
    /// Concatenate side by side. Each column is re-indexed onto the union of
    /// all spans, so every column shares `first_year` and length.
    pub fn concat(series: Vec<AnnualSeries>) -> Self {
        let first = series
            .iter()
            .filter(|s| !s.is_empty())
            .map(|s| s.first_year)
            .min();
        let last = series.iter().filter_map(|s| s.last_year()).max();

        let (first, last) = match (first, last) {
            (Some(f), Some(l)) => (f, l),
            _ => {
                return Self {
                    columns: series
                        .into_iter()
                        .map(|s| AnnualSeries::empty(s.label))
                        .collect(),
                }
            }
        };

        let columns = series
            .into_iter()
            .map(|s| {
                let values = (first..=last).map(|year| s.get(year)).collect();
                AnnualSeries::new(s.label, first, values)
            })
            .collect();

        Self { columns }
    }

    pub fn columns(&self) -> &[AnnualSeries] {
        &self.columns
    }

    pub fn column(&self, label: &str) -> Option<&AnnualSeries> {
        self.columns.iter().find(|c| c.label == label)
    }

    pub fn value(&self, label: &str, year: i32) -> Option<f64> {
        self.column(label)?.get(year)
    }

    /// Years covered by the frame, in order.
    pub fn years(&self) -> Vec<i32> {
        self.columns
            .iter()
            .find(|c| !c.is_empty())
            .map(|c| c.iter().map(|(y, _)| y).collect())
            .unwrap_or_default()
    }

    pub fn rolling_mean(&self, window: usize, alignment: Alignment) -> Self {
        Self {
            columns: self
                .columns
                .iter()
                .map(|c| c.rolling_mean(window, alignment))
                .collect(),
        }
    }
}

/// One `(year, value)` row every ten years from `start` to `end` inclusive.
pub fn decade_rows(series: &AnnualSeries, start: i32, end: i32) -> Vec<(i32, Option<f64>)> {
    (start..=end)
        .step_by(10)
        .map(|year| (year, series.get(year)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn series(first: i32, values: &[f64]) -> AnnualSeries {
        AnnualSeries::new("s", first, values.iter().map(|v| Some(*v)).collect())
    }

    #[test]
    fn resample_daily_to_annual_mean() {
        // three days in 2000, two six-hourly samples in 2001
        let points = vec![
            (at(2000, 1, 1, 0), Some(1.0)),
            (at(2000, 6, 1, 0), Some(2.0)),
            (at(2000, 12, 31, 0), Some(6.0)),
            (at(2001, 3, 1, 0), Some(10.0)),
            (at(2001, 3, 1, 6), Some(20.0)),
        ];
        let s = resample_annual("tas_historical_mean", points);
        assert_eq!(s.first_year, 2000);
        assert_eq!(s.len(), 2);
        assert_eq!(s.get(2000), Some(3.0));
        assert_eq!(s.get(2001), Some(15.0));
    }

    #[test]
    fn resample_keeps_one_row_per_spanned_year() {
        let points = vec![
            (at(1950, 7, 1, 0), Some(4.0)),
            (at(1953, 7, 1, 0), Some(8.0)),
            (at(1952, 7, 1, 0), None),
        ];
        let s = resample_annual("x", points);
        assert_eq!(s.first_year, 1950);
        assert_eq!(s.last_year(), Some(1953));
        assert_eq!(s.values, vec![Some(4.0), None, None, Some(8.0)]);
    }

    #[test]
    fn resample_empty_input() {
        let s = resample_annual("x", Vec::new());
        assert!(s.is_empty());
        assert_eq!(s.last_year(), None);
    }

    #[test]
    fn trailing_rolling_mean_needs_full_window() {
        let s = series(2000, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let r = s.rolling_mean(5, Alignment::Trailing);
        assert_eq!(r.values, vec![None, None, None, None, Some(3.0), Some(4.0)]);
    }

    #[test]
    fn centered_rolling_mean_matches_pandas_offsets() {
        let s = series(2000, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
        let r = s.rolling_mean(5, Alignment::Centered);
        assert_eq!(
            r.values,
            vec![None, None, Some(3.0), Some(4.0), Some(5.0), None, None]
        );

        // even window: earlier side gets the extra element
        let r = s.rolling_mean(4, Alignment::Centered);
        assert_eq!(r.get(2002), Some(2.5));
        assert_eq!(r.get(2001), None);
        assert_eq!(r.get(2005), Some(5.5));
        assert_eq!(r.get(2006), None);
    }

    #[test]
    fn rolling_mean_gap_poisons_window() {
        let s = AnnualSeries::new(
            "g",
            2000,
            vec![Some(1.0), Some(1.0), None, Some(1.0), Some(1.0), Some(1.0), Some(1.0)],
        );
        let r = s.rolling_mean(3, Alignment::Trailing);
        assert_eq!(
            r.values,
            vec![None, None, None, None, None, Some(1.0), Some(1.0)]
        );
    }

    #[test]
    fn concat_aligns_on_union_of_years() {
        let hist = AnnualSeries::new("h", 2012, vec![Some(1.0), Some(2.0), Some(3.0)]);
        let fut = AnnualSeries::new("f", 2015, vec![Some(10.0), Some(11.0)]);
        let frame = SeriesFrame::concat(vec![hist, fut]);

        assert_eq!(frame.years(), vec![2012, 2013, 2014, 2015, 2016]);
        assert_eq!(frame.value("h", 2014), Some(3.0));
        assert_eq!(frame.value("h", 2015), None);
        assert_eq!(frame.value("f", 2014), None);
        assert_eq!(frame.value("f", 2016), Some(11.0));
        assert!(frame.column("missing").is_none());
    }

    #[test]
    fn frame_rolling_matches_per_column_rolling() {
        let a = series(2015, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let b = AnnualSeries::new("b", 2010, vec![Some(0.0); 4]);
        let frame = SeriesFrame::concat(vec![a.clone(), b]).rolling_mean(5, Alignment::Trailing);
        let direct = a.rolling_mean(5, Alignment::Trailing);
        for year in 2015..=2020 {
            assert_eq!(frame.value("s", year), direct.get(year), "{year}");
        }
    }

    #[test]
    fn decade_rows_sample_series_values() {
        let values: Vec<f64> = (1950..=2020).map(|y| y as f64 / 10.0).collect();
        let s = series(1950, &values);
        let rows = decade_rows(&s, 1950, 2020);
        assert_eq!(rows.len(), 8);
        for (year, value) in rows {
            assert_eq!(value, s.get(year));
            assert_eq!(value, Some(year as f64 / 10.0));
        }
        let rows = decade_rows(&s, 2020, 2040);
        assert_eq!(rows, vec![(2020, Some(202.0)), (2030, None), (2040, None)]);
    }

    #[test]
    fn segments_split_on_gaps() {
        let s = AnnualSeries::new("g", 1990, vec![Some(1.0), None, Some(2.0), Some(3.0), None]);
        assert_eq!(
            s.segments(),
            vec![vec![(1990, 1.0)], vec![(1992, 2.0), (1993, 3.0)]]
        );
        assert_eq!(s.value_range(), Some((1.0, 3.0)));
        assert_eq!(column_label("tas", "ssp126", "median"), "tas_ssp126_median");
    }
}
