//! Hazard jobs

use super::{Job, JobParams, ParamSpec};
use crate::context::Context;
use crate::raster::{open_raster, sample_rasters, RasterSource, SampleOptions, SampledValues};
use crate::utils::list_column;
use anyhow::{Context as _, Result};
use polars::prelude::*;
use std::path::Path;

/// One f64 column for a single raster, a `List(f64)` column otherwise
fn samples_to_column(name: &str, samples: SampledValues) -> Column {
    match samples {
        SampledValues::Single(values) => Column::new(name.into(), values),
        SampledValues::Stacked(rows) => list_column(name, &rows),
    }
}

/// `load_raster`: sample hazard rasters at every site
///
/// With several files the column holds one value per raster, in
/// `file_list` order. With `clip_exposure2all_hazards` the exposure is
/// then clipped to the combined extent of all rasters.
pub struct LoadRaster;

impl Job for LoadRaster {
    fn name(&self) -> &'static str {
        "load_raster"
    }

    fn params(&self) -> ParamSpec {
        ParamSpec::new()
            .required("attribute_label")
            .required("file_list")
            .optional("no_data_value")
            .optional("scaling_factor")
            .optional("threads")
            .defaulted("clip_exposure2all_hazards", false)
    }

    fn execute(&self, ctx: &mut Context, params: &JobParams) -> Result<()> {
        let label: String = params.get("attribute_label")?;
        let files = params.string_list("file_list")?;
        let no_data: Option<f64> = params.get_opt("no_data_value")?;
        let clip: bool = params.get_opt("clip_exposure2all_hazards")?.unwrap_or(false);
        let options = SampleOptions {
            threads: params.get_opt("threads")?,
            scaling_factor: params.get_opt("scaling_factor")?,
        };

        if files.is_empty() {
            return Err(params.reject("file_list", "no raster files given"));
        }

        let sources = files
            .iter()
            .map(|f| open_raster(Path::new(f)).with_context(|| format!("Failed to open raster {}", f)))
            .collect::<Result<Vec<Box<dyn RasterSource>>>>()?;

        let lon = ctx.longitudes()?;
        let lat = ctx.latitudes()?;
        let (mut samples, extent) = sample_rasters(&sources, &lon, &lat, &options)?;

        if let Some(no_data) = no_data {
            samples.mask_value(no_data);
        }

        tracing::debug!(
            "Sampled {} raster(s) into '{}' at {} sites",
            sources.len(), label, samples.n_points()
        );
        ctx.set_column(samples_to_column(&label, samples))?;

        if clip {
            if let Some(extent) = extent {
                ctx.clip_exposure(&extent)?;
            }
        }
        Ok(())
    }
}
