//! ESRI binary float grid reader (`.flt` + `.hdr`)
//!
//! Cells are never loaded as a whole. Each reader owns its own file handle
//! and seeks to `(row * ncols + col) * 4` for every point read.

use super::ascii_grid::GridHeader;
use super::{CellReader, GridGeometry, RasterSource};
use anyhow::{Context, Result};
use byteorder::{BigEndian, LittleEndian, ReadBytesExt};
use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ByteOrder {
    Lsb,
    Msb,
}

#[derive(Debug, Clone)]
pub struct FloatGrid {
    name: String,
    path: PathBuf,
    geometry: GridGeometry,
    byte_order: ByteOrder,
}

impl FloatGrid {
    /// Open `<stem>.flt`, reading georeferencing from `<stem>.hdr`
    pub fn open(path: &Path) -> Result<Self> {
        let header_path = path.with_extension("hdr");
        let text = std::fs::read_to_string(&header_path)
            .with_context(|| format!("Failed to read grid header {:?}", header_path))?;

        let mut header = GridHeader::default();
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            header.push_line(line);
        }

        let mut geometry = header
            .geometry()
            .with_context(|| format!("Invalid grid header {:?}", header_path))?;
        // Cells are f32, so NODATA must compare at f32 precision
        geometry.no_data = geometry.no_data.map(|nd| nd as f32 as f64);

        let byte_order = match header.get("byteorder").map(|v| v.to_ascii_uppercase()) {
            None => ByteOrder::Lsb,
            Some(order) if order == "LSBFIRST" => ByteOrder::Lsb,
            Some(order) if order == "MSBFIRST" => ByteOrder::Msb,
            Some(order) => anyhow::bail!("Unknown byteorder '{}' in {:?}", order, header_path),
        };

        let expected = (geometry.ncols * geometry.nrows * 4) as u64;
        let actual = std::fs::metadata(path)
            .with_context(|| format!("Failed to stat float grid {:?}", path))?
            .len();
        if actual < expected {
            anyhow::bail!(
                "Float grid {:?} holds {} bytes, header describes {}",
                path, actual, expected
            );
        }

        Ok(Self {
            name: path.display().to_string(),
            path: path.to_path_buf(),
            geometry,
            byte_order,
        })
    }
}

struct FloatReader {
    file: File,
    ncols: usize,
    byte_order: ByteOrder,
}

impl CellReader for FloatReader {
    fn read(&mut self, row: usize, col: usize) -> Result<f64> {
        let offset = ((row * self.ncols + col) * 4) as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        let value = match self.byte_order {
            ByteOrder::Lsb => self.file.read_f32::<LittleEndian>()?,
            ByteOrder::Msb => self.file.read_f32::<BigEndian>()?,
        };
        Ok(value as f64)
    }
}

impl RasterSource for FloatGrid {
    fn name(&self) -> &str {
        &self.name
    }

    fn geometry(&self) -> &GridGeometry {
        &self.geometry
    }

    fn open_reader(&self) -> Result<Box<dyn CellReader + '_>> {
        let file = File::open(&self.path)
            .with_context(|| format!("Failed to open float grid {:?}", self.path))?;
        Ok(Box::new(FloatReader {
            file,
            ncols: self.geometry.ncols,
            byte_order: self.byte_order,
        }))
    }
}
