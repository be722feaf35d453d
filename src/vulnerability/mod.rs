//! Vulnerability model
//!
//! A [`VulnerabilitySet`] groups the [`VulnerabilityFunction`]s sharing an
//! intensity measure and loss category. Sets come from a
//! [`VulnerabilitySource`]; [`RealisedCurves`] turns a set plus a column of
//! per-asset function ids into per-asset curves ready for look-up.

pub mod function;
pub mod realised;

pub use function::VulnerabilityFunction;
pub use realised::RealisedCurves;

use anyhow::{Context, Result};
use rustc_hash::FxHashMap;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// How a representative loss-ratio array is drawn from a function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariabilityMethod {
    /// Mean loss ratios, unmodified
    Mean,
    /// Per-level log-normal draw with the function's mean and cov
    LogNormal,
    /// Per-level normal draw (sigma = mean * cov), truncated at zero
    Normal,
}

impl FromStr for VariabilityMethod {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mean" => Ok(Self::Mean),
            "lognormal" | "lognormal_sampling" => Ok(Self::LogNormal),
            "normal" | "normal_sampling" => Ok(Self::Normal),
            other => anyhow::bail!(
                "Unknown variability method '{}' (expected mean, lognormal or normal)",
                other
            ),
        }
    }
}

impl fmt::Display for VariabilityMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Mean => "mean",
            Self::LogNormal => "lognormal",
            Self::Normal => "normal",
        };
        f.write_str(name)
    }
}

/// Named collection of vulnerability functions
#[derive(Debug, Clone)]
pub struct VulnerabilitySet {
    pub id: String,
    /// Exposure column holding the hazard intensity, e.g. `0.2s gust at 10m height m/s`
    pub intensity_measure_type: String,
    /// Exposure column receiving the looked-up loss ratio
    pub loss_category: String,
    pub asset_category: Option<String>,
    functions: Vec<VulnerabilityFunction>,
    index: FxHashMap<String, usize>,
}

impl VulnerabilitySet {
    pub fn new(
        id: impl Into<String>,
        intensity_measure_type: impl Into<String>,
        loss_category: impl Into<String>,
        functions: Vec<VulnerabilityFunction>,
    ) -> Result<Self> {
        let id = id.into();
        let mut index = FxHashMap::default();
        for (i, function) in functions.iter().enumerate() {
            if index.insert(function.id.clone(), i).is_some() {
                anyhow::bail!("Set '{}' defines function '{}' twice", id, function.id);
            }
        }

        Ok(Self {
            id,
            intensity_measure_type: intensity_measure_type.into(),
            loss_category: loss_category.into(),
            asset_category: None,
            functions,
            index,
        })
    }

    pub fn with_asset_category(mut self, category: Option<String>) -> Self {
        self.asset_category = category;
        self
    }

    pub fn function(&self, id: &str) -> Option<&VulnerabilityFunction> {
        self.index.get(id).map(|&i| &self.functions[i])
    }

    pub fn functions(&self) -> &[VulnerabilityFunction] {
        &self.functions
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

/// Anything that can yield vulnerability sets
pub trait VulnerabilitySource {
    fn load_sets(&self) -> Result<Vec<VulnerabilitySet>>;
}

#[derive(Deserialize)]
struct VulnerabilityDocument {
    vulnerability_sets: Vec<SetRecord>,
}

#[derive(Deserialize)]
struct SetRecord {
    id: String,
    intensity_measure_type: String,
    loss_category: String,
    #[serde(default)]
    asset_category: Option<String>,
    #[serde(default)]
    intensity_levels: Option<Vec<f64>>,
    functions: Vec<FunctionRecord>,
}

#[derive(Deserialize)]
struct FunctionRecord {
    id: serde_json::Value,
    #[serde(default)]
    intensity_levels: Option<Vec<f64>>,
    mean_loss: Vec<f64>,
    #[serde(default)]
    cov: Option<Vec<f64>>,
}

/// Function ids may be written as strings or bare numbers
fn id_text(value: &serde_json::Value) -> Result<String> {
    match value {
        serde_json::Value::String(s) => Ok(s.clone()),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => anyhow::bail!("Function id must be a string or number, got {}", other),
    }
}

impl SetRecord {
    fn into_set(self) -> Result<VulnerabilitySet> {
        let set_id = self.id;
        let functions = self
            .functions
            .into_iter()
            .map(|record| {
                let id = id_text(&record.id)?;
                let levels = record
                    .intensity_levels
                    .or_else(|| self.intensity_levels.clone())
                    .ok_or_else(|| anyhow::anyhow!("Function '{}' has no intensity levels", id))?;
                VulnerabilityFunction::new(id, levels, record.mean_loss, record.cov)
            })
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("Invalid function in set '{}'", set_id))?;

        Ok(VulnerabilitySet::new(
            set_id,
            self.intensity_measure_type,
            self.loss_category,
            functions,
        )?
        .with_asset_category(self.asset_category))
    }
}

/// JSON file holding one or more vulnerability sets
#[derive(Debug, Clone)]
pub struct JsonVulnerabilityFile {
    path: PathBuf,
}

impl JsonVulnerabilityFile {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl VulnerabilitySource for JsonVulnerabilityFile {
    fn load_sets(&self) -> Result<Vec<VulnerabilitySet>> {
        let text = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read vulnerability file {:?}", self.path))?;

        let document: VulnerabilityDocument = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse vulnerability file {:?}", self.path))?;

        let sets = document
            .vulnerability_sets
            .into_iter()
            .map(SetRecord::into_set)
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("Invalid vulnerability file {:?}", self.path))?;

        for set in &sets {
            tracing::debug!(
                "Loaded vulnerability set {} ({} functions, {} -> {})",
                set.id, set.len(), set.intensity_measure_type, set.loss_category
            );
        }

        Ok(sets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const FILE: &str = r#"{
        "vulnerability_sets": [{
            "id": "domestic_wind_2012",
            "intensity_measure_type": "0.2s gust at 10m height m/s",
            "loss_category": "structural_loss_ratio",
            "asset_category": "building",
            "intensity_levels": [17.0, 20.0, 22.0],
            "functions": [
                {"id": "dw1", "mean_loss": [0.0, 0.1, 0.3], "cov": [0.0, 0.3, 0.3]},
                {"id": 7, "intensity_levels": [10.0, 30.0], "mean_loss": [0.0, 1.0]}
            ]
        }]
    }"#;

    #[test]
    fn test_json_source_loads_sets() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vul.json");
        std::fs::write(&path, FILE).unwrap();

        let sets = JsonVulnerabilityFile::new(&path).load_sets().unwrap();
        assert_eq!(sets.len(), 1);
        let set = &sets[0];
        assert_eq!(set.loss_category, "structural_loss_ratio");
        assert_eq!(set.asset_category.as_deref(), Some("building"));
        assert_eq!(set.function("dw1").unwrap().intensity_levels, vec![17.0, 20.0, 22.0]);
        assert_eq!(set.function("7").unwrap().cov, vec![0.0, 0.0]);
        assert!(set.function("dw2").is_none());
    }

    #[test]
    fn test_duplicate_function_rejected() {
        let f = VulnerabilityFunction::new("a", vec![0.0], vec![0.0], None).unwrap();
        let err = VulnerabilitySet::new("s", "imt", "loss", vec![f.clone(), f]).unwrap_err();
        assert!(err.to_string().contains("twice"));
    }

    #[test]
    fn test_non_increasing_levels_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        let bad = FILE.replace("[17.0, 20.0, 22.0]", "[17.0, 17.0, 22.0]");
        std::fs::write(&path, bad).unwrap();
        let err = JsonVulnerabilityFile::new(&path).load_sets().unwrap_err();
        assert!(format!("{:#}", err).contains("strictly increasing"));
    }

    #[test]
    fn test_method_names() {
        assert_eq!("mean".parse::<VariabilityMethod>().unwrap(), VariabilityMethod::Mean);
        assert_eq!("LogNormal".parse::<VariabilityMethod>().unwrap(), VariabilityMethod::LogNormal);
        assert!("beta".parse::<VariabilityMethod>().is_err());
    }
}
