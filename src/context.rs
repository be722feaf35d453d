//! Per-run state shared by every job of a pipeline
//!
//! The exposure table lives in one polars DataFrame with one row per site.
//! Location columns are renamed on load to [`LATITUDE`] / [`LONGITUDE`] and
//! every row carries its global position in [`INTERNAL_ID`], which is what
//! the partitioner uses to put gathered rows back in order. In a
//! distributed run each rank's context holds only its partition.

use crate::error::RunError;
use crate::partition::{self, LocalTransport, Partition, Transport};
use crate::raster::Extent;
use crate::utils::{f64_values, string_values};
use crate::vulnerability::{RealisedCurves, VulnerabilitySet};
use anyhow::{Context as _, Result};
use polars::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const LATITUDE: &str = "exposure_latitude";
pub const LONGITUDE: &str = "exposure_longitude";
pub const INTERNAL_ID: &str = "internal_id";

#[derive(Clone)]
pub struct Context {
    exposure: Option<DataFrame>,
    /// Loaded sets keyed by set id
    pub vulnerability_sets: BTreeMap<String, VulnerabilitySet>,
    /// Set id -> exposure column holding per-site function ids
    pub links: BTreeMap<String, String>,
    /// Realised curves keyed by set id
    pub curves: BTreeMap<String, RealisedCurves>,
    /// Output of the last aggregation (coordinator only)
    pub aggregate: Option<DataFrame>,
    transport: Arc<dyn Transport>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    /// Single-process context
    pub fn new() -> Self {
        Self::with_transport(Arc::new(LocalTransport))
    }

    pub fn with_transport(transport: Arc<dyn Transport>) -> Self {
        Self {
            exposure: None,
            vulnerability_sets: BTreeMap::new(),
            links: BTreeMap::new(),
            curves: BTreeMap::new(),
            aggregate: None,
            transport,
        }
    }

    pub fn rank(&self) -> usize {
        self.transport.rank()
    }

    pub fn size(&self) -> usize {
        self.transport.size()
    }

    pub fn is_coordinator(&self) -> bool {
        self.rank() == 0
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    /// Install this rank's exposure rows.
    ///
    /// The frame must already carry [`LATITUDE`], [`LONGITUDE`] and
    /// [`INTERNAL_ID`]. Replacing the exposure discards realised curves.
    pub fn set_exposure(&mut self, frame: DataFrame) -> Result<()> {
        crate::utils::require_columns(&frame, &[LATITUDE, LONGITUDE, INTERNAL_ID], "exposure")?;
        self.exposure = Some(frame);
        self.curves.clear();
        Ok(())
    }

    pub fn exposure(&self) -> Result<&DataFrame> {
        self.exposure.as_ref().ok_or_else(|| RunError::NoExposure.into())
    }

    fn exposure_mut(&mut self) -> Result<&mut DataFrame> {
        self.exposure.as_mut().ok_or_else(|| RunError::NoExposure.into())
    }

    /// Number of sites held by this rank (0 before load)
    pub fn site_count(&self) -> usize {
        self.exposure.as_ref().map_or(0, DataFrame::height)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.exposure
            .as_ref()
            .map_or(false, |df| df.get_column_index(name).is_some())
    }

    fn require_column(&self, name: &str) -> Result<&DataFrame> {
        let df = self.exposure()?;
        if df.get_column_index(name).is_none() {
            return Err(RunError::MissingColumn(name.to_string()).into());
        }
        Ok(df)
    }

    pub fn column(&self, name: &str) -> Result<&Column> {
        Ok(self.require_column(name)?.column(name)?)
    }

    pub fn f64_column(&self, name: &str) -> Result<Vec<f64>> {
        f64_values(self.require_column(name)?, name, "exposure")
    }

    pub fn string_column(&self, name: &str) -> Result<Vec<String>> {
        string_values(self.require_column(name)?, name, "exposure")
    }

    pub fn longitudes(&self) -> Result<Vec<f64>> {
        self.f64_column(LONGITUDE)
    }

    pub fn latitudes(&self) -> Result<Vec<f64>> {
        self.f64_column(LATITUDE)
    }

    /// Add or replace a column; its length must equal the site count
    pub fn set_column(&mut self, column: impl IntoColumn) -> Result<()> {
        let column = column.into_column();
        let expected = self.site_count();
        if column.len() != expected {
            return Err(RunError::RowCountMismatch {
                column: column.name().to_string(),
                expected,
                actual: column.len(),
            }
            .into());
        }
        let name = column.name().to_string();
        self.exposure_mut()?
            .with_column(column)
            .with_context(|| format!("Failed to set exposure column '{}'", name))?;
        Ok(())
    }

    /// Drop every site outside `extent` (inclusive bounds) from all columns.
    ///
    /// Not allowed once curves are realised, since realised curves are
    /// indexed by site.
    pub fn clip_exposure(&mut self, extent: &Extent) -> Result<()> {
        if !self.curves.is_empty() {
            anyhow::bail!("Cannot clip exposure after vulnerability curves are realised");
        }

        let lon = self.longitudes()?;
        let lat = self.latitudes()?;
        let mask: BooleanChunked = lon
            .iter()
            .zip(&lat)
            .map(|(&x, &y)| extent.contains(x, y))
            .collect();

        let before = lon.len();
        let exposure = self.exposure_mut()?;
        let clipped = exposure.filter(&mask).context("Failed to clip exposure")?;
        let after = clipped.height();
        *exposure = clipped;

        if after == 0 && before > 0 {
            tracing::warn!("Clipping to {:?} removed every site", extent.to_array());
        } else {
            tracing::debug!("Clipped exposure from {} to {} sites", before, after);
        }
        Ok(())
    }

    /// This rank's exposure as a partition keyed by global row
    pub fn exposure_partition(&self) -> Result<Partition> {
        let frame = self.exposure()?.clone();
        let indices = frame
            .column(INTERNAL_ID)?
            .cast(&DataType::UInt64)?
            .u64()?
            .into_no_null_iter()
            .map(|i| i as IdxSize)
            .collect();
        Ok(Partition { indices, frame })
    }

    /// Full exposure table on the coordinator, `None` on other ranks
    pub fn gather_exposure(&self) -> Result<Option<DataFrame>> {
        let part = self.exposure_partition()?;
        partition::gather(self.transport(), part)
    }
}
