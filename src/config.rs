// src/config.rs

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::debug;

pub const DEFAULT_API_BASE: &str = "https://cckpapi.worldbank.org/cckp/v1";
pub const MAX_RETRIES_LIMIT: u32 = 10;

/// Runtime settings, read from an optional YAML file and then overridden by
/// command-line flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Base URL of the CCKP API, without a trailing slash.
    pub api_base: String,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub request_timeout_secs: u64,
    /// Concurrent requests per variable.
    pub concurrency: usize,
    /// Workbook with the `Regions` and `Variables` sheets.
    pub references: PathBuf,
    pub output_dir: PathBuf,
    /// Also write every fetched frame as Parquet next to the report.
    pub export_parquet: bool,
    /// ERA5 variable codes to report; `None` means the default selection.
    pub era5: Option<Vec<String>>,
    /// CMIP6 variable codes to report; `None` means the default selection.
    pub cmip6: Option<Vec<String>>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            max_retries: 3,
            initial_backoff_ms: 500,
            request_timeout_secs: 60,
            concurrency: 4,
            references: PathBuf::from("geonames.xlsx"),
            output_dir: PathBuf::from("reports"),
            export_parquet: false,
            era5: None,
            cmip6: None,
        }
    }
}

impl Settings {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text =
            fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let settings: Settings = serde_yaml::from_str(&text)
            .with_context(|| format!("parsing settings {}", path.display()))?;
        settings.validate()?;
        debug!(?settings, "loaded settings");
        Ok(settings)
    }

    /// Settings from `path` when given, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            bail!("concurrency must be at least 1");
        }
        if self.max_retries > MAX_RETRIES_LIMIT {
            bail!(
                "max_retries {} exceeds the limit of {}",
                self.max_retries,
                MAX_RETRIES_LIMIT
            );
        }
        url::Url::parse(&self.api_base)
            .with_context(|| format!("api_base `{}` is not a URL", self.api_base))?;
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn partial_yaml_keeps_defaults() -> Result<()> {
        let mut tmp = NamedTempFile::new()?;
        writeln!(tmp, "max_retries: 7")?;
        writeln!(tmp, "cmip6: [tas, hd35]")?;

        let s = Settings::load(tmp.path())?;
        assert_eq!(s.max_retries, 7);
        assert_eq!(s.cmip6, Some(vec!["tas".to_string(), "hd35".to_string()]));
        assert_eq!(s.era5, None);
        assert_eq!(s.api_base, DEFAULT_API_BASE);
        assert_eq!(s.concurrency, 4);
        Ok(())
    }

    #[test]
    fn rejects_unknown_keys_and_bad_values() -> Result<()> {
        let mut tmp = NamedTempFile::new()?;
        writeln!(tmp, "retries: 2")?;
        assert!(Settings::load(tmp.path()).is_err());

        let mut tmp = NamedTempFile::new()?;
        writeln!(tmp, "concurrency: 0")?;
        assert!(Settings::load(tmp.path()).is_err());

        let mut tmp = NamedTempFile::new()?;
        writeln!(tmp, "api_base: not a url")?;
        assert!(Settings::load(tmp.path()).is_err());

        let mut tmp = NamedTempFile::new()?;
        writeln!(tmp, "max_retries: 4000000000")?;
        let err = Settings::load(tmp.path()).unwrap_err();
        assert!(err.to_string().contains("max_retries"));
        Ok(())
    }

    #[test]
    fn missing_path_means_defaults() -> Result<()> {
        assert_eq!(Settings::load_or_default(None)?, Settings::default());
        Ok(())
    }
}
