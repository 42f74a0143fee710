// src/fetch/mod.rs

pub mod client;
pub mod request;

pub use client::CckpClient;
pub use request::{Percentile, Scenario, SeriesRequest};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::{stream, StreamExt, TryStreamExt};
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::{debug, instrument};

use crate::series::{
    parse_timestamp, resample_annual, Alignment, AnnualSeries, SeriesFrame,
};

/// Anything that can turn a request into an annual series.
#[async_trait]
pub trait SeriesSource: Send + Sync {
    async fn fetch(&self, request: &SeriesRequest) -> Result<AnnualSeries>;
}

#[derive(Deserialize)]
struct ApiResponse {
    data: BTreeMap<String, BTreeMap<String, Option<f64>>>,
}

/// Decode a CCKP JSON body and resample the region's values to annual means.
pub fn parse_response(body: &str, request: &SeriesRequest) -> Result<AnnualSeries> {
    let resp: ApiResponse = serde_json::from_str(body)?;
    let values = resp.data.get(&request.region_code).ok_or_else(|| {
        anyhow!(
            "response has no data for region `{}` ({} other keys)",
            request.region_code,
            resp.data.len()
        )
    })?;

    let mut points = Vec::with_capacity(values.len());
    for (raw, value) in values {
        let ts = parse_timestamp(raw).ok_or_else(|| anyhow!("unparseable timestamp `{}`", raw))?;
        points.push((ts, *value));
    }
    let series = resample_annual(request.label(), points);
    debug!(label = %series.label, years = series.len(), "resampled");
    Ok(series)
}

/// One band of the CMIP6 ensemble.
#[derive(Clone, Debug)]
pub struct EnsembleMember {
    pub scenario: Scenario,
    pub percentile: Percentile,
    pub series: AnnualSeries,
}

/// All scenario × percentile series for one variable.
#[derive(Clone, Debug)]
pub struct EnsembleSeries {
    pub var: String,
    pub members: Vec<EnsembleMember>,
}

impl EnsembleSeries {
    pub fn member(&self, scenario: Scenario, percentile: Percentile) -> Option<&AnnualSeries> {
        self.members
            .iter()
            .find(|m| m.scenario == scenario && m.percentile == percentile)
            .map(|m| &m.series)
    }

    /// Every member side by side on a shared year axis.
    pub fn frame(&self) -> SeriesFrame {
        SeriesFrame::concat(self.members.iter().map(|m| m.series.clone()).collect())
    }

    /// The joined frame with each column smoothed by a trailing rolling mean.
    pub fn smoothed(&self, window: usize) -> SeriesFrame {
        self.frame().rolling_mean(window, Alignment::Trailing)
    }
}

/// Requests for every ensemble band of `var`, scenario-major.
pub fn ensemble_requests(var: &str, region_code: &str) -> Vec<(Scenario, Percentile, SeriesRequest)> {
    Scenario::ALL
        .iter()
        .flat_map(|&s| {
            Percentile::ALL
                .iter()
                .map(move |&p| (s, p, SeriesRequest::cmip6(var, s, p, region_code)))
        })
        .collect()
}

/// Fetch all ensemble bands with at most `concurrency` requests in flight.
/// Members come back in request order.
#[instrument(level = "info", skip(source))]
pub async fn fetch_ensemble(
    source: &dyn SeriesSource,
    var: &str,
    region_code: &str,
    concurrency: usize,
) -> Result<EnsembleSeries> {
    let requests = ensemble_requests(var, region_code);
    let members: Vec<EnsembleMember> = stream::iter(requests)
        .map(|(scenario, percentile, req)| async move {
            let series = source.fetch(&req).await?;
            Ok::<_, anyhow::Error>(EnsembleMember {
                scenario,
                percentile,
                series,
            })
        })
        .buffered(concurrency.max(1))
        .try_collect()
        .await?;

    Ok(EnsembleSeries {
        var: var.to_string(),
        members,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Deterministic source: value = base(var) + scenario offset + percentile offset + year step.
    #[derive(Default)]
    pub(crate) struct StubSource {
        pub calls: Mutex<Vec<SeriesRequest>>,
        pub in_flight: AtomicUsize,
        pub max_in_flight: AtomicUsize,
    }

    pub(crate) fn stub_value(req: &SeriesRequest, year: i32) -> f64 {
        let scenario = match req.scenario.as_str() {
            "ssp126" => 1.0,
            "ssp245" => 2.0,
            "ssp585" => 3.0,
            _ => 0.0,
        };
        let band = match req.percentile.as_str() {
            "p10" => -0.5,
            "p90" => 0.5,
            _ => 0.0,
        };
        10.0 + scenario + band + (year - 1950) as f64 * 0.01
    }

    #[async_trait]
    impl SeriesSource for StubSource {
        async fn fetch(&self, request: &SeriesRequest) -> Result<AnnualSeries> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.calls.lock().unwrap().push(request.clone());

            let (first, last): (i32, i32) = {
                let mut parts = request.period.split('-');
                let a = parts.next().unwrap().parse().unwrap();
                let b = parts.next().unwrap().parse().unwrap();
                (a, b)
            };
            let values = (first..=last).map(|y| Some(stub_value(request, y))).collect();
            Ok(AnnualSeries::new(request.label(), first, values))
        }
    }

    #[test]
    fn parse_response_resamples_region_values() -> Result<()> {
        let req = SeriesRequest::era5("tas", "KEN.1");
        let body = r#"{
            "metadata": {"status": "success"},
            "data": {
                "KEN.1": {"1950-07": 20.0, "1951-01": 21.0, "1951-07": 23.0, "1953-07": null}
            }
        }"#;
        let s = parse_response(body, &req)?;
        assert_eq!(s.label, "tas_historical_mean");
        assert_eq!(s.first_year, 1950);
        assert_eq!(s.values, vec![Some(20.0), Some(22.0), None, None]);
        Ok(())
    }

    #[test]
    fn parse_response_errors() {
        let req = SeriesRequest::era5("tas", "KEN.1");
        assert!(parse_response("not json", &req).is_err());
        let err = parse_response(r#"{"data": {"KEN.2": {}}}"#, &req).unwrap_err();
        assert!(err.to_string().contains("KEN.1"));
        assert!(parse_response(r#"{"data": {"KEN.1": {"yesterday": 1.0}}}"#, &req).is_err());
    }

    #[test]
    fn ensemble_requests_cover_all_bands() {
        let reqs = ensemble_requests("tas", "KEN.1");
        assert_eq!(reqs.len(), 12);
        assert_eq!(reqs[0].2.label(), "tas_historical_median");
        assert_eq!(reqs[1].2.label(), "tas_historical_p10");
        assert_eq!(reqs[11].2.label(), "tas_ssp585_p90");
    }

    #[tokio::test]
    async fn fetch_ensemble_bounds_concurrency_and_keeps_order() -> Result<()> {
        let source = StubSource::default();
        let ens = fetch_ensemble(&source, "tas", "KEN.1", 3).await?;

        assert_eq!(ens.members.len(), 12);
        assert!(source.max_in_flight.load(Ordering::SeqCst) <= 3);
        let labels: Vec<String> = ens.members.iter().map(|m| m.series.label.clone()).collect();
        let expected: Vec<String> = ensemble_requests("tas", "KEN.1")
            .into_iter()
            .map(|(_, _, r)| r.label())
            .collect();
        assert_eq!(labels, expected);

        let hist = ens.member(Scenario::Historical, Percentile::Median).unwrap();
        assert_eq!(hist.last_year(), Some(2014));
        let frame = ens.frame();
        assert_eq!(frame.years().first(), Some(&1950));
        assert_eq!(frame.years().last(), Some(&2100));
        assert_eq!(frame.value("tas_ssp126_median", 2014), None);
        Ok(())
    }
}
