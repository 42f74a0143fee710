// src/reference/mod.rs

pub mod xlsx;

use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::Path;
use tracing::{info, instrument};

pub use xlsx::{Sheet, Workbook};

/// Variables offered for the ERA5 reanalysis, all selected by default.
pub static ERA5_VARIABLES: &[&str] = &[
    "tas", "tasmax", "tasmin", "tnn", "tr", "txx", "fd", "pr", "rx1day", "rx5day",
];

/// Variables offered for the CMIP6 ensemble. Only those shared with ERA5 are
/// selected by default.
pub static CMIP6_VARIABLES: &[&str] = &[
    "tas", "tasmax", "tasmin", "tnn", "tr", "txx", "fd", "hd30", "hd35", "hd40", "hd45", "hdd65",
    "id", "cdd65", "sd", "tr23", "tr26", "tr29", "pr", "rx1day", "rx5day", "cdd", "cwd",
    "prpercnt", "r20mm", "r50mm",
];

const REGIONS_SHEET: &str = "Regions";
const VARIABLES_SHEET: &str = "Variables";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Dataset {
    Era5,
    Cmip6,
}

impl Dataset {
    pub fn as_str(&self) -> &str {
        match self {
            Dataset::Era5 => "ERA5",
            Dataset::Cmip6 => "CMIP6",
        }
    }

    pub fn variable_codes(&self) -> &'static [&'static str] {
        match self {
            Dataset::Era5 => ERA5_VARIABLES,
            Dataset::Cmip6 => CMIP6_VARIABLES,
        }
    }

    /// Whether `code` starts out ticked in the selection form.
    pub fn selected_by_default(&self, code: &str) -> bool {
        match self {
            Dataset::Era5 => ERA5_VARIABLES.contains(&code),
            Dataset::Cmip6 => CMIP6_VARIABLES.contains(&code) && ERA5_VARIABLES.contains(&code),
        }
    }

    pub fn default_selection(&self) -> Vec<String> {
        self.variable_codes()
            .iter()
            .filter(|c| self.selected_by_default(c))
            .map(|c| c.to_string())
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegionEntry {
    pub country: String,
    pub state: String,
    pub code: String,
}

/// Country → state → region code.
#[derive(Clone, Debug, Default)]
pub struct RegionTable {
    entries: Vec<RegionEntry>,
}

impl RegionTable {
    pub fn new(entries: Vec<RegionEntry>) -> Self {
        Self { entries }
    }

    pub fn from_sheet(sheet: &Sheet) -> Result<Self> {
        let country = sheet.column("Country")?;
        let state = sheet.column("State")?;
        let code = sheet.column("State Code")?;
        let entries = sheet
            .rows
            .iter()
            .map(|row| RegionEntry {
                country: sheet.cell(row, country).to_string(),
                state: sheet.cell(row, state).to_string(),
                code: sheet.cell(row, code).to_string(),
            })
            .filter(|e| !e.country.is_empty() && !e.code.is_empty())
            .collect();
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Distinct countries in first-seen order.
    pub fn countries(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for e in &self.entries {
            if !out.contains(&e.country.as_str()) {
                out.push(&e.country);
            }
        }
        out
    }

    /// Distinct states of `country` in first-seen order.
    pub fn regions(&self, country: &str) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for e in self.entries.iter().filter(|e| e.country == country) {
            if !out.contains(&e.state.as_str()) {
                out.push(&e.state);
            }
        }
        out
    }

    /// Code of the first row matching `country` and `state`.
    pub fn region_code(&self, country: &str, state: &str) -> Result<&str> {
        self.entries
            .iter()
            .find(|e| e.country == country && e.state == state)
            .map(|e| e.code.as_str())
            .ok_or_else(|| anyhow!("unknown region `{}` in `{}`", state, country))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VariableInfo {
    pub code: String,
    pub name: String,
    pub unit: String,
    pub description: String,
}

#[derive(Clone, Debug, Default)]
pub struct VariableCatalog {
    vars: Vec<VariableInfo>,
}

impl VariableCatalog {
    pub fn new(vars: Vec<VariableInfo>) -> Self {
        Self { vars }
    }

    pub fn from_sheet(sheet: &Sheet) -> Result<Self> {
        let code = sheet.column("Code")?;
        let name = sheet.column("Variable")?;
        let unit = sheet.column("Unit")?;
        let description = sheet.column("Description")?;
        let vars = sheet
            .rows
            .iter()
            .map(|row| VariableInfo {
                code: sheet.cell(row, code).to_string(),
                name: sheet.cell(row, name).to_string(),
                unit: sheet.cell(row, unit).to_string(),
                description: sheet.cell(row, description).to_string(),
            })
            .filter(|v| !v.code.is_empty())
            .collect();
        Ok(Self { vars })
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn by_code(&self, code: &str) -> Result<&VariableInfo> {
        self.vars
            .iter()
            .find(|v| v.code == code)
            .ok_or_else(|| anyhow!("unknown variable code `{}`", code))
    }

    pub fn by_name(&self, name: &str) -> Result<&VariableInfo> {
        self.vars
            .iter()
            .find(|v| v.name == name)
            .ok_or_else(|| anyhow!("unknown variable `{}`", name))
    }

    /// Catalog entries for every variable `dataset` offers, in offer order.
    pub fn for_dataset(&self, dataset: Dataset) -> Result<Vec<&VariableInfo>> {
        dataset
            .variable_codes()
            .iter()
            .map(|code| {
                self.by_code(code)
                    .with_context(|| format!("{} variable list", dataset.as_str()))
            })
            .collect()
    }
}

/// Both lookup tables, loaded once at startup.
#[derive(Clone, Debug, Default)]
pub struct References {
    pub regions: RegionTable,
    pub variables: VariableCatalog,
}

impl References {
    #[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        let refs = Self::from_xlsx(bytes).with_context(|| format!("loading {}", path.display()))?;
        info!(
            regions = refs.regions.len(),
            variables = refs.variables.len(),
            "loaded reference tables"
        );
        Ok(refs)
    }

    pub fn from_xlsx(bytes: Vec<u8>) -> Result<Self> {
        let mut workbook = Workbook::from_bytes(bytes)?;
        let regions = RegionTable::from_sheet(&workbook.sheet(REGIONS_SHEET)?)?;
        let variables = VariableCatalog::from_sheet(&workbook.sheet(VARIABLES_SHEET)?)?;

        // both dataset lists must resolve, as the selection form is built from them
        variables.for_dataset(Dataset::Era5)?;
        variables.for_dataset(Dataset::Cmip6)?;

        Ok(Self { regions, variables })
    }
}
