//! Hazard impact engine
//!
//! Estimates loss to geolocated assets from a natural hazard by combining
//! per-site exposure attributes, hazard intensity sampled from rasters, and
//! probabilistic vulnerability curves. A run is a flat, ordered job list
//! executed once against a shared [`Context`]:
//!
//! - `raster/`: point sampling of hazard grids
//! - `vulnerability/`: vulnerability sets, curve realisation and look-up
//! - `partition/`: round-robin scatter/gather of the exposure across ranks
//! - `jobs/`: the job interface, registry and built-in jobs
//! - `pipeline`: validation and sequential execution of a job list
//! - `data`: CSV/Parquet table I/O with Polars

pub mod config;
pub mod context;
pub mod data;
pub mod error;
pub mod jobs;
pub mod partition;
pub mod pipeline;
pub mod raster;
pub mod utils;
pub mod vulnerability;

// Re-export commonly used types
pub use config::{read_job_list, JobEntry};
pub use context::Context;
pub use error::{ConfigError, RunError};
pub use jobs::{Job, JobParams, JobRegistry, ParamSpec};
pub use partition::{ChannelTransport, LocalTransport, Transport};
pub use pipeline::Pipeline;
pub use vulnerability::{RealisedCurves, VariabilityMethod, VulnerabilityFunction, VulnerabilitySet};
