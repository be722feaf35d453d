//! Point sampling of hazard rasters
//!
//! A raster is described by its upper-left corner, pixel size (y usually
//! negative, "north up"), dimensions and an optional NODATA sentinel. Query
//! points resolve to a cell by floor-division of their offset from the
//! upper-left corner; points outside the grid or on NODATA cells read NaN.
//!
//! Reads are point-wise: cost follows the number of query points, not the
//! grid size. Each sampling call runs on a bounded rayon pool and every
//! worker opens its own [`CellReader`] on the source, so no file handle is
//! shared between threads. Results land in a preallocated vector indexed by
//! query position, so output order never depends on completion order.

pub mod ascii_grid;
pub mod float_grid;

pub use ascii_grid::read_ascii_grid;
pub use float_grid::FloatGrid;

use anyhow::{anyhow, Context, Result};
use rayon::prelude::*;
use std::path::Path;
use std::sync::Arc;

/// Georeferencing of a north-up grid
#[derive(Debug, Clone, PartialEq)]
pub struct GridGeometry {
    /// Longitude of the upper-left corner of the top-left pixel
    pub ul_x: f64,
    /// Latitude of the upper-left corner of the top-left pixel
    pub ul_y: f64,
    /// Pixel width (w-e resolution)
    pub x_pixel: f64,
    /// Pixel height (n-s resolution), negative for north-up grids
    pub y_pixel: f64,
    pub ncols: usize,
    pub nrows: usize,
    pub no_data: Option<f64>,
}

impl GridGeometry {
    /// Cell `(row, col)` containing the point, or None when outside the grid
    pub fn cell_of(&self, lon: f64, lat: f64) -> Option<(usize, usize)> {
        if !lon.is_finite() || !lat.is_finite() {
            return None;
        }

        let col = ((lon - self.ul_x) / self.x_pixel).floor();
        let row = ((lat - self.ul_y) / self.y_pixel).floor();

        if col < 0.0 || row < 0.0 || col >= self.ncols as f64 || row >= self.nrows as f64 {
            return None;
        }

        Some((row as usize, col as usize))
    }

    pub fn is_no_data(&self, value: f64) -> bool {
        self.no_data.map_or(false, |nd| value == nd)
    }

    /// Bounding box of the grid
    pub fn extent(&self) -> Extent {
        let far_x = self.ul_x + self.x_pixel * self.ncols as f64;
        let far_y = self.ul_y + self.y_pixel * self.nrows as f64;

        Extent {
            min_lon: self.ul_x.min(far_x),
            min_lat: self.ul_y.min(far_y),
            max_lon: self.ul_x.max(far_x),
            max_lat: self.ul_y.max(far_y),
        }
    }
}

/// Axis-aligned bounding box `[min_lon, min_lat, max_lon, max_lat]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extent {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl Extent {
    pub fn from_array(bounds: [f64; 4]) -> Self {
        Self {
            min_lon: bounds[0],
            min_lat: bounds[1],
            max_lon: bounds[2],
            max_lat: bounds[3],
        }
    }

    pub fn to_array(&self) -> [f64; 4] {
        [self.min_lon, self.min_lat, self.max_lon, self.max_lat]
    }

    /// Widen each bound independently so `other` is also covered.
    ///
    /// This is an expanding bounding box, not a geometric union: two
    /// disjoint grids produce a box covering the gap between them.
    pub fn expand(&self, other: &Extent) -> Extent {
        Extent {
            min_lon: self.min_lon.min(other.min_lon),
            min_lat: self.min_lat.min(other.min_lat),
            max_lon: self.max_lon.max(other.max_lon),
            max_lat: self.max_lat.max(other.max_lat),
        }
    }

    /// Inclusive containment test
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        lon >= self.min_lon && lon <= self.max_lon && lat >= self.min_lat && lat <= self.max_lat
    }
}

/// Combined extent of several rasters, None for an empty list
pub fn reconcile_extents<'a, I>(extents: I) -> Option<Extent>
where
    I: IntoIterator<Item = &'a Extent>,
{
    extents.into_iter().fold(None, |acc, ext| match acc {
        None => Some(*ext),
        Some(max_extent) => Some(max_extent.expand(ext)),
    })
}

/// An independent handle on a raster's cells.
///
/// Handles are opened per worker thread and never shared.
pub trait CellReader {
    fn read(&mut self, row: usize, col: usize) -> Result<f64>;
}

/// A decoded raster that can hand out per-thread readers
pub trait RasterSource: Send + Sync {
    /// Label used in logs and errors (usually the file path)
    fn name(&self) -> &str;

    fn geometry(&self) -> &GridGeometry;

    fn open_reader(&self) -> Result<Box<dyn CellReader + '_>>;
}

/// Raster held in memory, row-major from the top row
#[derive(Debug, Clone)]
pub struct MemoryGrid {
    name: String,
    geometry: GridGeometry,
    cells: Arc<Vec<f64>>,
}

impl MemoryGrid {
    pub fn new(name: impl Into<String>, geometry: GridGeometry, cells: Vec<f64>) -> Result<Self> {
        let expected = geometry.ncols * geometry.nrows;
        if cells.len() != expected {
            anyhow::bail!(
                "Grid has {} cells, header describes {} ({} x {})",
                cells.len(), expected, geometry.nrows, geometry.ncols
            );
        }
        Ok(Self {
            name: name.into(),
            geometry,
            cells: Arc::new(cells),
        })
    }
}

struct MemoryReader {
    ncols: usize,
    cells: Arc<Vec<f64>>,
}

impl CellReader for MemoryReader {
    fn read(&mut self, row: usize, col: usize) -> Result<f64> {
        self.cells
            .get(row * self.ncols + col)
            .copied()
            .ok_or_else(|| anyhow!("Cell ({}, {}) outside grid", row, col))
    }
}

impl RasterSource for MemoryGrid {
    fn name(&self) -> &str {
        &self.name
    }

    fn geometry(&self) -> &GridGeometry {
        &self.geometry
    }

    fn open_reader(&self) -> Result<Box<dyn CellReader + '_>> {
        Ok(Box::new(MemoryReader {
            ncols: self.geometry.ncols,
            cells: Arc::clone(&self.cells),
        }))
    }
}

/// Open a raster file, choosing the decoder from the extension
///
/// - `.asc`: ESRI ASCII grid, decoded into memory
/// - `.flt`: ESRI binary float grid with a sibling `.hdr`, read point-wise
pub fn open_raster(path: &Path) -> Result<Box<dyn RasterSource>> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "asc" => Ok(Box::new(read_ascii_grid(path)?)),
        "flt" => Ok(Box::new(FloatGrid::open(path)?)),
        other => anyhow::bail!("Unsupported raster format '{}' for {:?}", other, path),
    }
}

/// Tunables for one sampling call
#[derive(Debug, Clone, Default)]
pub struct SampleOptions {
    /// Worker threads for point reads; None uses one per core
    pub threads: Option<usize>,
    /// Multiplier applied to every valid sample
    pub scaling_factor: Option<f64>,
}

/// Sample one raster at every query point
pub fn sample_points(
    source: &dyn RasterSource,
    lon: &[f64],
    lat: &[f64],
    options: &SampleOptions,
) -> Result<Vec<f64>> {
    if lon.len() != lat.len() {
        anyhow::bail!(
            "{}: {} longitudes but {} latitudes",
            source.name(), lon.len(), lat.len()
        );
    }

    let geometry = source.geometry();
    let mut values = vec![f64::NAN; lon.len()];

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.threads.unwrap_or(0))
        .build()
        .with_context(|| format!("{}: Failed to build sampling thread pool", source.name()))?;

    tracing::debug!(
        "Sampling {} at {} points on {} threads",
        source.name(), lon.len(), pool.current_num_threads()
    );

    pool.install(|| {
        values.par_iter_mut().enumerate().try_for_each_init(
            || source.open_reader(),
            |reader, (i, slot)| -> Result<()> {
                let Some((row, col)) = geometry.cell_of(lon[i], lat[i]) else {
                    return Ok(());
                };
                let reader = reader
                    .as_mut()
                    .map_err(|e| anyhow!("{}: Failed to open reader: {:#}", source.name(), e))?;
                let value = reader
                    .read(row, col)
                    .with_context(|| format!("{}: Failed to read cell ({}, {})", source.name(), row, col))?;
                if !geometry.is_no_data(value) {
                    *slot = value;
                }
                Ok(())
            },
        )
    })?;

    if let Some(factor) = options.scaling_factor {
        values.iter_mut().for_each(|v| *v *= factor);
    }

    Ok(values)
}

/// Samples from an ordered list of rasters
#[derive(Debug, Clone, PartialEq)]
pub enum SampledValues {
    /// Exactly one raster: one value per point
    Single(Vec<f64>),
    /// Several rasters: per point, one value per raster in list order
    Stacked(Vec<Vec<f64>>),
}

impl SampledValues {
    pub fn n_points(&self) -> usize {
        match self {
            SampledValues::Single(values) => values.len(),
            SampledValues::Stacked(rows) => rows.len(),
        }
    }

    /// Replace `no_data` with NaN in place
    pub fn mask_value(&mut self, no_data: f64) {
        let mask = |v: &mut f64| {
            if *v == no_data {
                *v = f64::NAN;
            }
        };
        match self {
            SampledValues::Single(values) => values.iter_mut().for_each(mask),
            SampledValues::Stacked(rows) => rows.iter_mut().flatten().for_each(mask),
        }
    }
}

/// Sample every raster at every point and reconcile their extents.
///
/// Returns `(samples, extent)`; the extent is the per-axis widest bounds of
/// all rasters, None only when `sources` is empty.
pub fn sample_rasters(
    sources: &[Box<dyn RasterSource>],
    lon: &[f64],
    lat: &[f64],
    options: &SampleOptions,
) -> Result<(SampledValues, Option<Extent>)> {
    let mut per_raster = Vec::with_capacity(sources.len());
    let mut extents = Vec::with_capacity(sources.len());

    for source in sources {
        per_raster.push(sample_points(source.as_ref(), lon, lat, options)?);
        extents.push(source.geometry().extent());
    }

    let extent = reconcile_extents(&extents);

    let samples = if per_raster.len() == 1 {
        SampledValues::Single(per_raster.pop().unwrap_or_default())
    } else {
        let stacked = (0..lon.len())
            .map(|i| per_raster.iter().map(|values| values[i]).collect())
            .collect();
        SampledValues::Stacked(stacked)
    };

    Ok((samples, extent))
}
