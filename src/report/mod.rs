// src/report/mod.rs

pub mod docx;

pub use docx::{Block, Document, Run, Table, DOCX_MIME};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task;
use tracing::{info, instrument};

use crate::export::ParquetExporter;
use crate::fetch::{fetch_ensemble, Percentile, Scenario, SeriesRequest, SeriesSource};
use crate::plot::{Chart, ChartRenderer, ROLLING_WINDOW};
use crate::reference::{Dataset, References, VariableInfo};
use crate::series::{column_label, decade_rows, SeriesFrame};

pub const REPORT_TITLE: &str = "Climate and Climate Change";
pub const TABLE_STYLE: &str = "ColorfulList";

const ERA5_TABLE_YEARS: (i32, i32) = (1950, 2020);
const CMIP6_TABLE_YEARS: (i32, i32) = (2020, 2100);

/// What the user asked for: a region and the variables per dataset.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub country: String,
    pub region: String,
    #[serde(default)]
    pub era5: Vec<String>,
    #[serde(default)]
    pub cmip6: Vec<String>,
}

impl Selection {
    /// Check every code against its dataset and return the region code.
    pub fn resolve<'a>(&self, refs: &'a References) -> Result<&'a str> {
        let code = refs.regions.region_code(&self.country, &self.region)?;
        for (dataset, codes) in [(Dataset::Era5, &self.era5), (Dataset::Cmip6, &self.cmip6)] {
            for var in codes {
                if !dataset.variable_codes().contains(&var.as_str()) {
                    bail!("`{}` is not offered for {}", var, dataset.as_str());
                }
                refs.variables.by_code(var)?;
            }
        }
        Ok(code)
    }

    pub fn file_name(&self) -> String {
        report_file_name(&self.country, &self.region)
    }
}

pub fn report_file_name(country: &str, region: &str) -> String {
    format!("{}_{}.docx", country, region)
}

/// Table cell text: six wide with two decimals, `-` when missing.
pub fn format_value(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{:6.2}", v),
        None => "-".to_string(),
    }
}

/// Runs the whole pipeline for one selection and assembles the document.
#[derive(Clone)]
pub struct ReportBuilder {
    source: Arc<dyn SeriesSource>,
    renderer: Arc<dyn ChartRenderer>,
    refs: Arc<References>,
    concurrency: usize,
    exporter: Option<ParquetExporter>,
}

impl ReportBuilder {
    pub fn new(
        source: Arc<dyn SeriesSource>,
        renderer: Arc<dyn ChartRenderer>,
        refs: Arc<References>,
    ) -> Self {
        Self {
            source,
            renderer,
            refs,
            concurrency: 4,
            exporter: None,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_exporter(mut self, exporter: ParquetExporter) -> Self {
        self.exporter = Some(exporter);
        self
    }

    pub fn references(&self) -> &References {
        &self.refs
    }

    #[instrument(level = "info", skip_all, fields(country = %selection.country, region = %selection.region))]
    pub async fn build(&self, selection: &Selection) -> Result<Document> {
        let region_code = selection.resolve(&self.refs)?;
        let mut doc = Document::new(selection.file_name().trim_end_matches(".docx"));
        doc.add_heading(REPORT_TITLE, 1);

        doc.add_heading(Dataset::Era5.as_str(), 2);
        for code in &selection.era5 {
            let var = self.refs.variables.by_code(code)?;
            self.era5_section(&mut doc, var, region_code)
                .await
                .with_context(|| format!("ERA5 section for `{}`", code))?;
        }

        doc.add_heading(Dataset::Cmip6.as_str(), 2);
        for code in &selection.cmip6 {
            let var = self.refs.variables.by_code(code)?;
            self.cmip6_section(&mut doc, var, region_code)
                .await
                .with_context(|| format!("CMIP6 section for `{}`", code))?;
        }

        info!(
            era5 = selection.era5.len(),
            cmip6 = selection.cmip6.len(),
            "report assembled"
        );
        Ok(doc)
    }

    async fn era5_section(
        &self,
        doc: &mut Document,
        var: &VariableInfo,
        region_code: &str,
    ) -> Result<()> {
        let series = self
            .source
            .fetch(&SeriesRequest::era5(&var.code, region_code))
            .await?;
        if let Some(exporter) = &self.exporter {
            let frame = SeriesFrame::concat(vec![series.clone()]);
            exporter.export(&frame, region_code, &var.code, Dataset::Era5.as_str())?;
        }

        let mut table = Table::new(
            TABLE_STYLE,
            vec!["Year".to_string(), format!("ERA5 value [{}]", var.unit)],
        );
        let (start, end) = ERA5_TABLE_YEARS;
        for (year, value) in decade_rows(&series, start, end) {
            table.add_row(vec![year.to_string(), format_value(value)]);
        }

        let renderer = self.renderer.clone();
        let info = var.clone();
        let chart = task::spawn_blocking(move || renderer.render_single(&series, &info))
            .await
            .context("chart task failed")??;

        append_section(doc, var, chart, table);
        Ok(())
    }

    async fn cmip6_section(
        &self,
        doc: &mut Document,
        var: &VariableInfo,
        region_code: &str,
    ) -> Result<()> {
        let ensemble =
            fetch_ensemble(self.source.as_ref(), &var.code, region_code, self.concurrency).await?;
        if let Some(exporter) = &self.exporter {
            exporter.export(&ensemble.frame(), region_code, &var.code, Dataset::Cmip6.as_str())?;
        }

        let smoothed = ensemble.smoothed(ROLLING_WINDOW);
        let mut header = vec!["Year".to_string()];
        header.extend(
            Scenario::FUTURE
                .iter()
                .map(|s| format!("{} [{}]", s.display_name(), var.unit)),
        );
        let mut table = Table::new(TABLE_STYLE, header);
        let (start, end) = CMIP6_TABLE_YEARS;
        for year in (start..=end).step_by(10) {
            let mut row = vec![year.to_string()];
            for scenario in Scenario::FUTURE {
                let label = column_label(&var.code, scenario.code(), Percentile::Median.code());
                row.push(format_value(smoothed.value(&label, year)));
            }
            table.add_row(row);
        }

        let renderer = self.renderer.clone();
        let info = var.clone();
        let chart = task::spawn_blocking(move || renderer.render_ensemble(&ensemble, &info))
            .await
            .context("chart task failed")??;

        append_section(doc, var, chart, table);
        Ok(())
    }
}

/// Name, figure, description and decade table for one variable.
fn append_section(doc: &mut Document, var: &VariableInfo, chart: Chart, table: Table) {
    doc.add_paragraph(vec![Run::bold_italic(var.name.as_str())]);
    doc.add_picture(chart.png, chart.width_px, chart.height_px, chart.dpi);
    doc.add_paragraph(vec![Run::plain(var.description.as_str())]);
    doc.add_table(table);
}
