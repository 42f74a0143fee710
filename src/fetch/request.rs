// src/fetch/request.rs

use anyhow::{Context, Result};
use std::fmt;
use url::Url;

use crate::series::column_label;

/// Emission scenario of a CMIP6 series. `Historical` covers the modelled past.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Scenario {
    Historical,
    Ssp126,
    Ssp245,
    Ssp585,
}

impl Scenario {
    pub const ALL: [Scenario; 4] = [
        Scenario::Historical,
        Scenario::Ssp126,
        Scenario::Ssp245,
        Scenario::Ssp585,
    ];

    /// The three future pathways, in table column order.
    pub const FUTURE: [Scenario; 3] = [Scenario::Ssp126, Scenario::Ssp245, Scenario::Ssp585];

    pub fn code(&self) -> &'static str {
        match self {
            Scenario::Historical => "historical",
            Scenario::Ssp126 => "ssp126",
            Scenario::Ssp245 => "ssp245",
            Scenario::Ssp585 => "ssp585",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Scenario::Historical => "Historical",
            Scenario::Ssp126 => "SSP 1-2.6",
            Scenario::Ssp245 => "SSP 2-4.5",
            Scenario::Ssp585 => "SSP 5-8.5",
        }
    }

    pub fn period(&self) -> &'static str {
        match self {
            Scenario::Historical => "1950-2014",
            _ => "2015-2100",
        }
    }
}

/// Ensemble member band.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Percentile {
    Median,
    P10,
    P90,
}

impl Percentile {
    pub const ALL: [Percentile; 3] = [Percentile::Median, Percentile::P10, Percentile::P90];

    pub fn code(&self) -> &'static str {
        match self {
            Percentile::Median => "median",
            Percentile::P10 => "p10",
            Percentile::P90 => "p90",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Percentile::Median => "Median",
            Percentile::P10 => "Lower",
            Percentile::P90 => "Upper",
        }
    }
}

/// One CCKP timeseries dataset for one region.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeriesRequest {
    pub collection: String,
    pub var: String,
    pub aggregation: String,
    pub period: String,
    pub percentile: String,
    pub scenario: String,
    pub model: String,
    pub calculation: String,
    pub statistic: String,
    pub region_code: String,
}

impl SeriesRequest {
    /// ERA5 reanalysis annual mean, 1950-2020.
    pub fn era5(var: &str, region_code: &str) -> Self {
        Self {
            collection: "era5-x0.5".into(),
            var: var.into(),
            aggregation: "annual".into(),
            period: "1950-2020".into(),
            percentile: "mean".into(),
            scenario: "historical".into(),
            model: "era5".into(),
            calculation: "era5".into(),
            statistic: "mean".into(),
            region_code: region_code.into(),
        }
    }

    /// CMIP6 multi-model ensemble band for one scenario.
    pub fn cmip6(var: &str, scenario: Scenario, percentile: Percentile, region_code: &str) -> Self {
        Self {
            collection: "cmip6-x0.25".into(),
            var: var.into(),
            aggregation: "annual".into(),
            period: scenario.period().into(),
            percentile: percentile.code().into(),
            scenario: scenario.code().into(),
            model: "ensemble".into(),
            calculation: "all".into(),
            statistic: "mean".into(),
            region_code: region_code.into(),
        }
    }

    /// Dataset identifier used as the first path segment.
    pub fn dataset_id(&self) -> String {
        format!(
            "{}_timeseries_{}_timeseries_{}_{}_{}_{}_{}_{}_{}",
            self.collection,
            self.var,
            self.aggregation,
            self.period,
            self.percentile,
            self.scenario,
            self.model,
            self.calculation,
            self.statistic
        )
    }

    pub fn url(&self, base: &str) -> Result<Url> {
        let raw = format!(
            "{}/{}/{}",
            base.trim_end_matches('/'),
            self.dataset_id(),
            self.region_code
        );
        let mut url = Url::parse(&raw).with_context(|| format!("building URL from `{}`", raw))?;
        url.query_pairs_mut().append_pair("_format", "json");
        Ok(url)
    }

    /// Column label of the resulting series.
    pub fn label(&self) -> String {
        column_label(&self.var, &self.scenario, &self.percentile)
    }
}

impl fmt::Display for SeriesRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.dataset_id(), self.region_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_API_BASE;

    #[test]
    fn era5_url_matches_api_layout() -> Result<()> {
        let req = SeriesRequest::era5("tas", "KEN.1");
        assert_eq!(
            req.url(DEFAULT_API_BASE)?.as_str(),
            "https://cckpapi.worldbank.org/cckp/v1/era5-x0.5_timeseries_tas_timeseries_annual_1950-2020_mean_historical_era5_era5_mean/KEN.1?_format=json"
        );
        assert_eq!(req.label(), "tas_historical_mean");
        Ok(())
    }

    #[test]
    fn cmip6_period_follows_scenario() -> Result<()> {
        let hist = SeriesRequest::cmip6("fd", Scenario::Historical, Percentile::P10, "PER.8");
        assert_eq!(
            hist.dataset_id(),
            "cmip6-x0.25_timeseries_fd_timeseries_annual_1950-2014_p10_historical_ensemble_all_mean"
        );
        let fut = SeriesRequest::cmip6("fd", Scenario::Ssp585, Percentile::Median, "PER.8");
        assert_eq!(fut.period, "2015-2100");
        assert_eq!(fut.label(), "fd_ssp585_median");
        // trailing slash on the base is tolerated
        assert_eq!(
            fut.url("http://localhost:9000/v1/")?.as_str(),
            "http://localhost:9000/v1/cmip6-x0.25_timeseries_fd_timeseries_annual_2015-2100_median_ssp585_ensemble_all_mean/PER.8?_format=json"
        );
        Ok(())
    }
}
