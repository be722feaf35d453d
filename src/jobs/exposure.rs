//! Exposure jobs: loading sites and deriving attribute columns

use super::{Job, JobParams, ParamSpec};
use crate::context::{Context, INTERNAL_ID, LATITUDE, LONGITUDE};
use crate::data::read_table;
use crate::partition::{scatter, Partition};
use crate::utils::{
    f64_values, is_list_column, is_numeric_column, list_column, list_values, require_columns,
    rng_from_seed, weighted_indices,
};
use anyhow::{Context as _, Result};
use polars::prelude::*;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

/// Read the exposure file, normalise its location columns and number the rows
fn prepare_exposure(path: &Path, lat_column: &str, lon_column: &str) -> Result<DataFrame> {
    let mut df = read_table(path)?;
    require_columns(&df, &[lat_column, lon_column], "load_exposure")?;

    let lat = f64_values(&df, lat_column, "load_exposure")?;
    let lon = f64_values(&df, lon_column, "load_exposure")?;
    let _ = df.drop_in_place(lat_column)?;
    let _ = df.drop_in_place(lon_column)?;

    let n = df.height().max(lat.len());
    let ids: Vec<u64> = (0..n as u64).collect();
    let mut columns = vec![
        Column::new(LATITUDE.into(), lat),
        Column::new(LONGITUDE.into(), lon),
    ];
    columns.extend(df.take_columns());
    columns.push(Column::new(INTERNAL_ID.into(), ids));

    DataFrame::new(columns).context("Failed to assemble exposure table")
}

/// `load_exposure`: read the site table and share it across ranks
pub struct LoadExposure;

impl Job for LoadExposure {
    fn name(&self) -> &'static str {
        "load_exposure"
    }

    fn params(&self) -> ParamSpec {
        ParamSpec::new()
            .required("file_name")
            .optional("exposure_latitude")
            .optional("exposure_longitude")
            .defaulted("use_parallel", true)
    }

    fn execute(&self, ctx: &mut Context, params: &JobParams) -> Result<()> {
        let file_name: String = params.get("file_name")?;
        let lat_column: String = params
            .get_opt("exposure_latitude")?
            .unwrap_or_else(|| "LATITUDE".to_string());
        let lon_column: String = params
            .get_opt("exposure_longitude")?
            .unwrap_or_else(|| "LONGITUDE".to_string());
        let use_parallel: bool = params.get_opt("use_parallel")?.unwrap_or(true);
        if lat_column == lon_column {
            return Err(params.reject(
                "exposure_longitude",
                format!("must differ from exposure_latitude ('{}')", lat_column),
            ));
        }

        let distributed = use_parallel && ctx.size() > 1;
        let path = Path::new(&file_name);

        let frame = if ctx.is_coordinator() || !distributed {
            let frame = prepare_exposure(path, &lat_column, &lon_column)
                .with_context(|| format!("Failed to load exposure {:?}", path))?;
            tracing::info!("Loaded {} sites from {}", frame.height(), file_name);
            Some(frame)
        } else {
            None
        };

        let partition = match (distributed, frame) {
            (true, frame) => scatter(ctx.transport(), frame)?,
            (false, Some(frame)) => Partition::whole(frame),
            (false, None) => anyhow::bail!("No exposure loaded from {}", file_name),
        };

        tracing::debug!("Rank {} holds {} sites", ctx.rank(), partition.frame.height());
        ctx.set_exposure(partition.frame)
    }
}

/// Column repeating one JSON value (number, string or bool)
fn constant_column(name: &str, value: &Value, n: usize) -> Option<Column> {
    let column = match value {
        Value::Number(v) if v.is_i64() => Column::new(name.into(), vec![v.as_i64()?; n]),
        Value::Number(v) => Column::new(name.into(), vec![v.as_f64()?; n]),
        Value::String(s) => Column::new(name.into(), vec![s.as_str(); n]),
        Value::Bool(b) => Column::new(name.into(), vec![*b; n]),
        _ => return None,
    };
    Some(column)
}

/// `constant`: add a column holding one value at every site
pub struct Constant;

impl Job for Constant {
    fn name(&self) -> &'static str {
        "constant"
    }

    fn params(&self) -> ParamSpec {
        ParamSpec::new().required("var").required("value")
    }

    fn execute(&self, ctx: &mut Context, params: &JobParams) -> Result<()> {
        let var: String = params.get("var")?;
        let value = params
            .raw("value")
            .ok_or_else(|| params.reject("value", "must not be null"))?;
        let column = constant_column(&var, value, ctx.site_count())
            .ok_or_else(|| params.reject("value", "must be a number, string or bool"))?;
        ctx.set_column(column)
    }
}

/// `random_constant`: give each site one of several values at random
///
/// `values` maps each candidate value to its probability. Candidates are
/// taken in sorted order and drawn through `WeightedIndex`. Each rank offsets the
/// seed by its rank so partitions do not repeat each other's draws.
pub struct RandomConstant;

impl Job for RandomConstant {
    fn name(&self) -> &'static str {
        "random_constant"
    }

    fn params(&self) -> ParamSpec {
        ParamSpec::new().required("var").required("values").optional("seed")
    }

    fn execute(&self, ctx: &mut Context, params: &JobParams) -> Result<()> {
        let var: String = params.get("var")?;
        let values: BTreeMap<String, f64> = params.get("values")?;
        let seed: Option<u64> = params.get_opt("seed")?;

        let keys: Vec<&String> = values.keys().collect();
        let probabilities: Vec<f64> = values.values().copied().collect();

        let mut rng = rng_from_seed(seed.map(|s| s.wrapping_add(ctx.rank() as u64)));
        let picks = weighted_indices(&probabilities, ctx.site_count(), &mut rng)
            .map_err(|e| params.reject("values", e))?;

        let numeric: Option<Vec<f64>> = keys.iter().map(|k| k.parse::<f64>().ok()).collect();
        let column = match numeric {
            Some(numbers) => {
                let picked: Vec<f64> = picks.iter().map(|&i| numbers[i]).collect();
                Column::new(var.as_str().into(), picked)
            }
            None => {
                let picked: Vec<&str> = picks.iter().map(|&i| keys[i].as_str()).collect();
                Column::new(var.as_str().into(), picked)
            }
        };
        ctx.set_column(column)
    }
}

/// `add`: sum two numeric columns, or concatenate if either holds text
pub struct Add;

impl Job for Add {
    fn name(&self) -> &'static str {
        "add"
    }

    fn params(&self) -> ParamSpec {
        ParamSpec::new().required("var1").required("var2").required("var_out")
    }

    fn execute(&self, ctx: &mut Context, params: &JobParams) -> Result<()> {
        let var1: String = params.get("var1")?;
        let var2: String = params.get("var2")?;
        let var_out: String = params.get("var_out")?;

        // Resolve both columns first so a missing one is reported by name
        ctx.column(&var1)?;
        ctx.column(&var2)?;

        let exposure = ctx.exposure()?;
        let numeric = is_numeric_column(exposure, &var1)? && is_numeric_column(exposure, &var2)?;

        let column = if numeric {
            let a = ctx.f64_column(&var1)?;
            let b = ctx.f64_column(&var2)?;
            let sum: Vec<f64> = a.iter().zip(&b).map(|(x, y)| x + y).collect();
            Column::new(var_out.as_str().into(), sum)
        } else {
            let a = ctx.string_column(&var1)?;
            let b = ctx.string_column(&var2)?;
            let joined: Vec<String> = a.iter().zip(&b).map(|(x, y)| format!("{}{}", x, y)).collect();
            Column::new(var_out.as_str().into(), joined)
        };
        ctx.set_column(column)
    }
}

/// `mult`: multiply two numeric columns
pub struct Mult;

impl Job for Mult {
    fn name(&self) -> &'static str {
        "mult"
    }

    fn params(&self) -> ParamSpec {
        ParamSpec::new().required("var1").required("var2").required("var_out")
    }

    fn execute(&self, ctx: &mut Context, params: &JobParams) -> Result<()> {
        let var1: String = params.get("var1")?;
        let var2: String = params.get("var2")?;
        let var_out: String = params.get("var_out")?;

        let a = ctx.f64_column(&var1)?;
        let b = ctx.f64_column(&var2)?;
        let product: Vec<f64> = a.iter().zip(&b).map(|(x, y)| x * y).collect();
        ctx.set_column(Column::new(var_out.as_str().into(), product))
    }
}

/// `mdmult`: scale every entry of a per-site list column by a per-site factor
///
/// `var1` is usually the stacked column `load_raster` writes for several
/// rasters; a plain numeric `var1` is treated as a one-entry list. The
/// result is always a list column.
pub struct MultipleDimensionMult;

impl Job for MultipleDimensionMult {
    fn name(&self) -> &'static str {
        "mdmult"
    }

    fn params(&self) -> ParamSpec {
        ParamSpec::new().required("var1").required("var2").required("var_out")
    }

    fn execute(&self, ctx: &mut Context, params: &JobParams) -> Result<()> {
        let var1: String = params.get("var1")?;
        let var2: String = params.get("var2")?;
        let var_out: String = params.get("var_out")?;

        ctx.column(&var1)?;
        let factors = ctx.f64_column(&var2)?;

        let exposure = ctx.exposure()?;
        let rows = if is_list_column(exposure, &var1)? {
            list_values(exposure, &var1, "mdmult")?
        } else {
            ctx.f64_column(&var1)?.into_iter().map(|v| vec![v]).collect()
        };

        let scaled: Vec<Vec<f64>> = rows
            .into_iter()
            .zip(&factors)
            .map(|(row, factor)| row.into_iter().map(|v| v * factor).collect())
            .collect();
        ctx.set_column(list_column(&var_out, &scaled))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::sample_context;
    use crate::error::ConfigError;
    use serde_json::json;
    use tempfile::TempDir;

    fn params(job: &dyn Job, values: Value) -> JobParams {
        let values = job.params().with_defaults(values.as_object().cloned().unwrap());
        JobParams::new(job.name(), values)
    }

    #[test]
    fn test_load_exposure_renames_and_numbers_rows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sites.csv");
        std::fs::write(&path, "lat,lon,WALL_TYPE\n-30.0,150.0,brick\n-31.0,151.0,timber\n").unwrap();

        let mut ctx = Context::new();
        let job = LoadExposure;
        let p = params(&job, json!({
            "file_name": path.to_str().unwrap(),
            "exposure_latitude": "lat",
            "exposure_longitude": "lon",
        }));
        job.execute(&mut ctx, &p).unwrap();

        let names: Vec<String> = ctx.exposure().unwrap().get_column_names()
            .into_iter().map(|s| s.to_string()).collect();
        assert_eq!(names, vec![LATITUDE, LONGITUDE, "WALL_TYPE", INTERNAL_ID]);
        assert_eq!(ctx.latitudes().unwrap(), vec![-30.0, -31.0]);
        assert_eq!(ctx.exposure_partition().unwrap().indices, vec![0, 1]);
    }

    #[test]
    fn test_load_exposure_missing_location_column() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sites.csv");
        std::fs::write(&path, "LATITUDE,X\n-30.0,1\n").unwrap();

        let job = LoadExposure;
        let p = params(&job, json!({"file_name": path.to_str().unwrap()}));
        let err = job.execute(&mut Context::new(), &p).unwrap_err();
        assert!(format!("{:#}", err).contains("LONGITUDE"));
    }

    #[test]
    fn test_load_exposure_rejects_shared_location_column() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sites.csv");
        std::fs::write(&path, "coord,X\n-30.0,1\n").unwrap();

        let job = LoadExposure;
        let p = params(&job, json!({
            "file_name": path.to_str().unwrap(),
            "exposure_latitude": "coord",
            "exposure_longitude": "coord",
        }));
        let err = job.execute(&mut Context::new(), &p).unwrap_err();
        match err.downcast_ref::<ConfigError>() {
            Some(ConfigError::InvalidParameter { job, param, .. }) => {
                assert_eq!(job, "load_exposure");
                assert_eq!(param, "exposure_longitude");
            }
            other => panic!("expected invalid parameter, got {:?}", other),
        }
    }

    #[test]
    fn test_constant_types() {
        let mut ctx = sample_context();
        for (var, value) in [("n", json!(3)), ("x", json!(0.5)), ("s", json!("brick")), ("b", json!(true))] {
            Constant.execute(&mut ctx, &params(&Constant, json!({"var": var, "value": value}))).unwrap();
        }
        let df = ctx.exposure().unwrap();
        assert_eq!(df.column("n").unwrap().dtype(), &DataType::Int64);
        assert_eq!(ctx.f64_column("x").unwrap(), vec![0.5; 4]);
        assert_eq!(ctx.string_column("s").unwrap(), vec!["brick"; 4]);
        assert_eq!(df.column("b").unwrap().dtype(), &DataType::Boolean);
    }

    #[test]
    fn test_random_constant_seeded() {
        let run = || {
            let mut ctx = sample_context();
            let p = params(&RandomConstant, json!({
                "var": "floor_height",
                "values": {"0.3": 0.5, "1.2": 0.5},
                "seed": 42,
            }));
            RandomConstant.execute(&mut ctx, &p).unwrap();
            ctx.f64_column("floor_height").unwrap()
        };
        let first = run();
        assert_eq!(first, run());
        assert!(first.iter().all(|v| *v == 0.3 || *v == 1.2));
    }

    #[test]
    fn test_random_constant_text_values_and_bad_weights() {
        let mut ctx = sample_context();
        let p = params(&RandomConstant, json!({"var": "roof", "values": {"tile": 1.0}}));
        RandomConstant.execute(&mut ctx, &p).unwrap();
        assert_eq!(ctx.string_column("roof").unwrap(), vec!["tile"; 4]);

        let p = params(&RandomConstant, json!({"var": "roof", "values": {"tile": 0.4}}));
        assert!(RandomConstant.execute(&mut ctx, &p).is_err());
    }

    #[test]
    fn test_add_and_mult() {
        let mut ctx = sample_context();
        ctx.set_column(Column::new("a".into(), vec![1.0, 2.0, 3.0, 4.0])).unwrap();
        ctx.set_column(Column::new("b".into(), vec![10i64, 20, 30, 40])).unwrap();

        Add.execute(&mut ctx, &params(&Add, json!({"var1": "a", "var2": "b", "var_out": "sum"}))).unwrap();
        assert_eq!(ctx.f64_column("sum").unwrap(), vec![11.0, 22.0, 33.0, 44.0]);

        Mult.execute(&mut ctx, &params(&Mult, json!({"var1": "a", "var2": "b", "var_out": "prod"}))).unwrap();
        assert_eq!(ctx.f64_column("prod").unwrap(), vec![10.0, 40.0, 90.0, 160.0]);

        let p = params(&Add, json!({
            "var1": "wind_vulnerability_function_id", "var2": "b", "var_out": "label",
        }));
        Add.execute(&mut ctx, &p).unwrap();
        assert_eq!(ctx.string_column("label").unwrap(), vec!["A10", "B20", "A30", "B40"]);

        let p = params(&Mult, json!({"var1": "a", "var2": "missing", "var_out": "z"}));
        assert!(Mult.execute(&mut ctx, &p).is_err());
    }
}
