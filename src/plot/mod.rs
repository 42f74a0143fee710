// src/plot/mod.rs

use anyhow::{Context, Result};
use plotters::prelude::*;
use plotters::style::{FontDesc, FontFamily, FontStyle};
use std::{fs, path::Path};
use tracing::{debug, instrument};

use crate::fetch::{EnsembleSeries, Percentile, Scenario};
use crate::reference::VariableInfo;
use crate::series::{Alignment, AnnualSeries};

/// Smoothing window, in years, for every chart.
pub const ROLLING_WINDOW: usize = 5;

/// A rendered PNG and the resolution it was drawn at.
#[derive(Clone, Debug, PartialEq)]
pub struct Chart {
    pub png: Vec<u8>,
    pub width_px: u32,
    pub height_px: u32,
    pub dpi: u32,
}

/// Turns series into report figures.
pub trait ChartRenderer: Send + Sync {
    /// Yearly values with a centred rolling mean on top (ERA5).
    fn render_single(&self, series: &AnnualSeries, var: &VariableInfo) -> Result<Chart>;
    /// All scenario bands, each smoothed with a trailing rolling mean (CMIP6).
    fn render_ensemble(&self, ensemble: &EnsembleSeries, var: &VariableInfo) -> Result<Chart>;
}

/// `plotters` bitmap renderer. Defaults to a 6 × 3 in figure at 300 dpi.
#[derive(Clone, Debug)]
pub struct PlottersRenderer {
    pub width_px: u32,
    pub height_px: u32,
    pub dpi: u32,
}

impl Default for PlottersRenderer {
    fn default() -> Self {
        Self {
            width_px: 1800,
            height_px: 900,
            dpi: 300,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Stroke {
    Solid,
    Dashed { size: u32, spacing: u32 },
}

struct Line {
    series: AnnualSeries,
    color: RGBColor,
    width: u32,
    stroke: Stroke,
    label: Option<&'static str>,
}

struct LegendKey {
    label: &'static str,
    width: u32,
}

const THIN: u32 = 2;
const THICK: u32 = 6;
const DOTTED: Stroke = Stroke::Dashed {
    size: 3,
    spacing: 6,
};
const DASHED: Stroke = Stroke::Dashed {
    size: 14,
    spacing: 8,
};

pub fn scenario_color(scenario: Scenario) -> RGBColor {
    match scenario {
        Scenario::Historical => RGBColor(0, 0, 255),
        Scenario::Ssp126 => RGBColor(0, 128, 0),
        Scenario::Ssp245 => RGBColor(255, 165, 0),
        Scenario::Ssp585 => RGBColor(255, 0, 0),
    }
}

fn percentile_stroke(percentile: Percentile) -> (u32, Stroke) {
    match percentile {
        Percentile::Median => (THICK, Stroke::Solid),
        Percentile::P10 => (THIN, DOTTED),
        Percentile::P90 => (THIN, DASHED),
    }
}

/// First and last year with a value across all lines.
fn year_span(lines: &[Line]) -> Option<(i32, i32)> {
    lines
        .iter()
        .flat_map(|l| l.series.iter().filter(|(_, v)| v.is_some()).map(|(y, _)| y))
        .fold(None, |acc, y| match acc {
            None => Some((y, y)),
            Some((lo, hi)) => Some((lo.min(y), hi.max(y))),
        })
}

/// Value range across all lines with 5 % head room on both sides.
fn padded_range(lines: &[Line]) -> Option<(f64, f64)> {
    let (lo, hi) = lines
        .iter()
        .filter_map(|l| l.series.value_range())
        .fold(None, |acc: Option<(f64, f64)>, (lo, hi)| match acc {
            None => Some((lo, hi)),
            Some((a, b)) => Some((a.min(lo), b.max(hi))),
        })?;
    if (hi - lo).abs() < f64::EPSILON {
        return Some((lo - 1.0, hi + 1.0));
    }
    let pad = (hi - lo) * 0.05;
    Some((lo - pad, hi + pad))
}

/// Axis extents for `lines`. Lines without any value still get a frame:
/// their year span (or a placeholder decade) over 0..1.
fn axis_ranges(lines: &[Line]) -> ((i32, i32), (f64, f64)) {
    let (x0, mut x1) = year_span(lines).unwrap_or_else(|| {
        let first = lines
            .iter()
            .filter(|l| !l.series.is_empty())
            .map(|l| l.series.first_year)
            .min();
        let last = lines.iter().filter_map(|l| l.series.last_year()).max();
        match (first, last) {
            (Some(f), Some(l)) => (f, l),
            _ => (2000, 2010),
        }
    });
    if x1 <= x0 {
        x1 = x0 + 1;
    }
    let y = padded_range(lines).unwrap_or((0.0, 1.0));
    ((x0, x1), y)
}

/// Yearly values in thin black, centred rolling mean in thick red.
fn single_lines(series: &AnnualSeries) -> Vec<Line> {
    vec![
        Line {
            series: series.clone(),
            color: BLACK,
            width: THIN,
            stroke: Stroke::Solid,
            label: Some("Yearly value"),
        },
        Line {
            series: series.rolling_mean(ROLLING_WINDOW, Alignment::Centered),
            color: RGBColor(255, 0, 0),
            width: THICK,
            stroke: Stroke::Solid,
            label: Some("5yr rolling mean"),
        },
    ]
}

/// One trailing-smoothed line per member; only medians carry a legend entry.
fn ensemble_lines(ensemble: &EnsembleSeries) -> Vec<Line> {
    ensemble
        .members
        .iter()
        .map(|m| {
            let (width, stroke) = percentile_stroke(m.percentile);
            Line {
                series: m.series.rolling_mean(ROLLING_WINDOW, Alignment::Trailing),
                color: scenario_color(m.scenario),
                width,
                stroke,
                label: (m.percentile == Percentile::Median).then(|| m.scenario.display_name()),
            }
        })
        .collect()
}

fn percentile_keys() -> Vec<LegendKey> {
    Percentile::ALL
        .iter()
        .map(|p| LegendKey {
            label: p.display_name(),
            width: percentile_stroke(*p).0,
        })
        .collect()
}

impl PlottersRenderer {
    fn scale(&self, px: u32) -> u32 {
        (px * self.width_px / 1800).max(1)
    }

    fn font(&self, size: u32) -> FontDesc<'static> {
        FontDesc::new(FontFamily::SansSerif, self.scale(size) as f64, FontStyle::Normal)
    }

    /// Draw `lines` into a temporary PNG and return its bytes.
    fn render(
        &self,
        title: &str,
        y_desc: &str,
        lines: &[Line],
        keys: &[LegendKey],
    ) -> Result<Chart> {
        let tmp = tempfile::Builder::new()
            .prefix("chart-")
            .suffix(".png")
            .tempfile()
            .context("creating chart file")?;
        self.draw(tmp.path(), title, y_desc, lines, keys)?;
        let png = fs::read(tmp.path()).context("reading rendered chart")?;
        debug!(bytes = png.len(), title, "rendered chart");

        Ok(Chart {
            png,
            width_px: self.width_px,
            height_px: self.height_px,
            dpi: self.dpi,
        })
    }

    fn draw(
        &self,
        path: &Path,
        title: &str,
        y_desc: &str,
        lines: &[Line],
        keys: &[LegendKey],
    ) -> Result<()> {
        let ((x0, x1), (y0, y1)) = axis_ranges(lines);
        if year_span(lines).is_none() {
            debug!(title, "no values, drawing empty axes");
        }

        let root = BitMapBackend::new(path, (self.width_px, self.height_px)).into_drawing_area();
        root.fill(&WHITE)?;

        let mut chart = ChartBuilder::on(&root)
            .caption(title, self.font(44))
            .margin(self.scale(30))
            .set_label_area_size(LabelAreaPosition::Left, self.scale(140))
            .set_label_area_size(LabelAreaPosition::Bottom, self.scale(80))
            .build_cartesian_2d(x0..x1, y0..y1)?;

        chart
            .configure_mesh()
            .y_desc(y_desc)
            .x_label_formatter(&|y| format!("{}", y))
            .y_label_formatter(&|v| format!("{:.1}", v))
            .label_style(self.font(28))
            .axis_desc_style(self.font(32))
            .light_line_style(WHITE)
            .bold_line_style(BLACK.mix(0.15))
            .draw()?;

        for line in lines {
            let style = line.color.stroke_width(line.width);
            for (i, segment) in line.series.segments().into_iter().enumerate() {
                let anno = match line.stroke {
                    Stroke::Solid => chart.draw_series(LineSeries::new(segment, style))?,
                    Stroke::Dashed { size, spacing } => chart.draw_series(
                        DashedLineSeries::new(segment, size, spacing, style),
                    )?,
                };
                if let (0, Some(label)) = (i, line.label) {
                    let legend_len = self.scale(50) as i32;
                    anno.label(label).legend(move |(x, y)| {
                        PathElement::new(vec![(x, y), (x + legend_len, y)], style)
                    });
                }
            }
        }

        for key in keys {
            let style = BLACK.stroke_width(key.width);
            let legend_len = self.scale(50) as i32;
            chart
                .draw_series(LineSeries::new(Vec::<(i32, f64)>::new(), style))?
                .label(key.label)
                .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + legend_len, y)], style));
        }

        chart
            .configure_series_labels()
            .position(SeriesLabelPosition::UpperLeft)
            .label_font(self.font(24))
            .background_style(WHITE.mix(0.8))
            .border_style(TRANSPARENT)
            .draw()?;

        root.present()?;
        Ok(())
    }
}

impl ChartRenderer for PlottersRenderer {
    #[instrument(level = "debug", skip_all, fields(var = %var.code))]
    fn render_single(&self, series: &AnnualSeries, var: &VariableInfo) -> Result<Chart> {
        self.render(&var.name, &var.unit, &single_lines(series), &[])
    }

    #[instrument(level = "debug", skip_all, fields(var = %var.code))]
    fn render_ensemble(&self, ensemble: &EnsembleSeries, var: &VariableInfo) -> Result<Chart> {
        self.render(
            &var.name,
            &var.unit,
            &ensemble_lines(ensemble),
            &percentile_keys(),
        )
    }
}
