//! ESRI ASCII grid reader (`.asc`)
//!
//! The header shares its keys with the `.hdr` sidecar of binary float
//! grids, so [`GridHeader`] is reused by [`super::float_grid`].

use super::{GridGeometry, MemoryGrid};
use anyhow::{Context, Result};
use rustc_hash::FxHashMap;
use std::path::Path;

/// Key/value pairs of a grid header, keys lower-cased
#[derive(Debug, Default)]
pub(crate) struct GridHeader {
    fields: FxHashMap<String, String>,
}

impl GridHeader {
    /// Record a `key value` line. Returns false if the line is not a header line.
    pub(crate) fn push_line(&mut self, line: &str) -> bool {
        let mut tokens = line.split_whitespace();
        let (Some(key), Some(value)) = (tokens.next(), tokens.next()) else {
            return false;
        };
        if !key.starts_with(|c: char| c.is_ascii_alphabetic()) {
            return false;
        }
        self.fields.insert(key.to_ascii_lowercase(), value.to_string());
        true
    }

    pub(crate) fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    fn number(&self, key: &str) -> Result<Option<f64>> {
        self.get(key)
            .map(|v| v.parse::<f64>().with_context(|| format!("Header '{}' is not a number: {}", key, v)))
            .transpose()
    }

    fn required(&self, key: &str) -> Result<f64> {
        self.number(key)?
            .ok_or_else(|| anyhow::anyhow!("Header is missing '{}'", key))
    }

    fn count(&self, key: &str) -> Result<usize> {
        let value = self.required(key)?;
        if value < 1.0 || value.fract() != 0.0 {
            anyhow::bail!("Header '{}' must be a positive integer, got {}", key, value);
        }
        Ok(value as usize)
    }

    /// Convert lower-left corner/centre georeferencing to upper-left corner
    pub(crate) fn geometry(&self) -> Result<GridGeometry> {
        let ncols = self.count("ncols")?;
        let nrows = self.count("nrows")?;
        let cellsize = self.required("cellsize")?;
        if cellsize <= 0.0 {
            anyhow::bail!("Header 'cellsize' must be positive, got {}", cellsize);
        }

        let half = cellsize / 2.0;
        let left = match (self.number("xllcorner")?, self.number("xllcenter")?) {
            (Some(corner), _) => corner,
            (None, Some(centre)) => centre - half,
            (None, None) => anyhow::bail!("Header is missing 'xllcorner' or 'xllcenter'"),
        };
        let bottom = match (self.number("yllcorner")?, self.number("yllcenter")?) {
            (Some(corner), _) => corner,
            (None, Some(centre)) => centre - half,
            (None, None) => anyhow::bail!("Header is missing 'yllcorner' or 'yllcenter'"),
        };

        Ok(GridGeometry {
            ul_x: left,
            ul_y: bottom + cellsize * nrows as f64,
            x_pixel: cellsize,
            y_pixel: -cellsize,
            ncols,
            nrows,
            no_data: self.number("nodata_value")?,
        })
    }
}

/// Decode an ASCII grid into memory
pub fn read_ascii_grid(path: &Path) -> Result<MemoryGrid> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read ASCII grid {:?}", path))?;

    let mut header = GridHeader::default();
    let mut lines = text.lines().peekable();
    while let Some(line) = lines.peek() {
        if !header.push_line(line) {
            break;
        }
        lines.next();
    }

    let geometry = header
        .geometry()
        .with_context(|| format!("Invalid ASCII grid header in {:?}", path))?;

    let cells = lines
        .flat_map(str::split_whitespace)
        .map(|token| token.parse::<f64>())
        .collect::<Result<Vec<f64>, _>>()
        .with_context(|| format!("Non-numeric cell in {:?}", path))?;

    let name = path.display().to_string();
    tracing::debug!("Loaded {} ({} x {})", name, geometry.nrows, geometry.ncols);

    MemoryGrid::new(name, geometry, cells)
        .with_context(|| format!("Malformed ASCII grid {:?}", path))
}
