// src/export.rs

use anyhow::{Context, Result};
use arrow::array::{ArrayRef, Float64Array, Int32Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::series::SeriesFrame;

/// Writes fetched frames as Parquet files into one directory.
#[derive(Clone, Debug)]
pub struct ParquetExporter {
    dir: PathBuf,
}

impl ParquetExporter {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
        Ok(Self { dir })
    }

    /// `<region>_<var>_<dataset>.parquet`, lower-cased dataset.
    pub fn file_name(region_code: &str, var: &str, dataset: &str) -> String {
        format!(
            "{}_{}_{}.parquet",
            region_code,
            var,
            dataset.to_ascii_lowercase()
        )
    }

    pub fn export(
        &self,
        frame: &SeriesFrame,
        region_code: &str,
        var: &str,
        dataset: &str,
    ) -> Result<PathBuf> {
        let path = self.dir.join(Self::file_name(region_code, var, dataset));
        write_frame(frame, &path)?;
        Ok(path)
    }
}

/// One `year` column plus one nullable Float64 column per series.
pub fn frame_to_batch(frame: &SeriesFrame) -> Result<RecordBatch> {
    let years = frame.years();

    let mut fields = vec![Field::new("year", DataType::Int32, false)];
    let mut columns: Vec<ArrayRef> = vec![Arc::new(Int32Array::from(years.clone()))];
    for series in frame.columns() {
        fields.push(Field::new(&series.label, DataType::Float64, true));
        let values: Float64Array = years.iter().map(|y| series.get(*y)).collect();
        columns.push(Arc::new(values));
    }

    RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)
        .context("building series record batch")
}

pub fn write_frame(frame: &SeriesFrame, path: &Path) -> Result<()> {
    let batch = frame_to_batch(frame)?;
    let file = File::create(path).with_context(|| format!("creating {:?}", path))?;
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))
        .context("creating Arrow writer")?;
    writer.write(&batch).context("writing series batch")?;
    writer.close().context("closing Parquet writer")?;
    debug!(path = %path.display(), rows = batch.num_rows(), "exported frame");
    Ok(())
}
