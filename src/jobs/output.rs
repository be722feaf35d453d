//! Output jobs: aggregation and saving
//!
//! In a distributed run these gather the exposure onto the coordinator;
//! only rank 0 aggregates and writes files.

use super::{Job, JobParams, ParamSpec};
use crate::context::{Context, INTERNAL_ID, LATITUDE, LONGITUDE};
use crate::data::write_table;
use crate::utils::{is_list_column, list_values, materialize_with_columns, nan_mean};
use anyhow::{Context as _, Result};
use polars::prelude::*;
use std::collections::BTreeMap;
use std::path::Path;

/// The whole exposure on the coordinator, `None` on other ranks
fn collect_exposure(ctx: &Context, use_parallel: bool) -> Result<Option<DataFrame>> {
    if use_parallel && ctx.size() > 1 {
        return ctx.gather_exposure();
    }
    if !ctx.is_coordinator() {
        return Ok(None);
    }
    Ok(Some(ctx.exposure()?.clone()))
}

/// Replace every list column with its per-row mean
fn flatten_list_columns(mut df: DataFrame) -> Result<DataFrame> {
    let list_names: Vec<String> = df
        .get_columns()
        .iter()
        .filter(|c| matches!(c.dtype(), DataType::List(_)))
        .map(|c| c.name().to_string())
        .collect();

    for name in list_names {
        let means: Vec<f64> = list_values(&df, &name, "save")?
            .iter()
            .map(|row| nan_mean(row))
            .collect();
        df.with_column(Column::new(name.as_str().into(), means))?;
    }
    Ok(df)
}

/// Exposure as written to disk: location first, no internal row ids
fn prepare_for_save(df: DataFrame) -> Result<DataFrame> {
    let mut df = flatten_list_columns(df)?;
    if df.get_column_index(INTERNAL_ID).is_some() {
        let _ = df.drop_in_place(INTERNAL_ID)?;
    }

    let mut order = vec![LATITUDE.to_string(), LONGITUDE.to_string()];
    order.extend(
        df.get_column_names()
            .into_iter()
            .map(|n| n.to_string())
            .filter(|n| n != LATITUDE && n != LONGITUDE),
    );
    Ok(df.select(order)?)
}

fn reduction(field: &str, name: &str) -> Option<Expr> {
    let expr = col(field);
    let expr = match name {
        "sum" => expr.sum(),
        "mean" => expr.mean(),
        "min" => expr.min(),
        "max" => expr.max(),
        "count" => expr.count(),
        _ => return None,
    };
    Some(expr.alias(format!("{}_{}", field, name)))
}

/// `aggregate_loss`: reduce exposure columns by group
///
/// `fields` maps a column to the reductions applied to it (sum, mean, min,
/// max, count); results are named `<column>_<reduction>`. Groups keep the
/// order in which they first appear.
pub struct AggregateLoss;

impl Job for AggregateLoss {
    fn name(&self) -> &'static str {
        "aggregate_loss"
    }

    fn params(&self) -> ParamSpec {
        ParamSpec::new()
            .required("groupby")
            .required("fields")
            .defaulted("use_parallel", true)
    }

    fn execute(&self, ctx: &mut Context, params: &JobParams) -> Result<()> {
        let groupby: String = params.get("groupby")?;
        let fields: BTreeMap<String, Vec<String>> = params.get("fields")?;
        let use_parallel: bool = params.get_opt("use_parallel")?.unwrap_or(true);

        let mut exprs = Vec::new();
        for (field, reductions) in &fields {
            for name in reductions {
                let expr = reduction(field, name)
                    .ok_or_else(|| params.reject("fields", format!("unknown reduction '{}'", name)))?;
                exprs.push(expr);
            }
        }

        let Some(exposure) = collect_exposure(ctx, use_parallel)? else {
            return Ok(());
        };

        let mut columns: Vec<&str> = vec![groupby.as_str()];
        columns.extend(fields.keys().map(String::as_str).filter(|f| *f != groupby));
        let selected = materialize_with_columns(&exposure.lazy(), &columns, "aggregate_loss")?;

        for field in fields.keys() {
            if is_list_column(&selected, field)? {
                anyhow::bail!("aggregate_loss: Column '{}' holds several values per site", field);
            }
        }

        let aggregate = selected
            .lazy()
            .group_by_stable([col(groupby.as_str())])
            .agg(exprs)
            .collect()
            .context("aggregate_loss: Failed to aggregate")?;

        tracing::info!("Aggregated {} groups by {}", aggregate.height(), groupby);
        ctx.aggregate = Some(aggregate);
        Ok(())
    }
}

/// `save_all`: write every exposure column
pub struct SaveAll;

impl Job for SaveAll {
    fn name(&self) -> &'static str {
        "save_all"
    }

    fn params(&self) -> ParamSpec {
        ParamSpec::new()
            .required("file_name")
            .output("file_name")
            .defaulted("use_parallel", true)
    }

    fn execute(&self, ctx: &mut Context, params: &JobParams) -> Result<()> {
        let file_name: String = params.get("file_name")?;
        let use_parallel: bool = params.get_opt("use_parallel")?.unwrap_or(true);

        let Some(exposure) = collect_exposure(ctx, use_parallel)? else {
            return Ok(());
        };

        let mut df = prepare_for_save(exposure)?;
        write_table(&mut df, Path::new(&file_name))?;
        tracing::info!("Saved {} sites to {}", df.height(), file_name);
        Ok(())
    }
}

/// `save_agg`: write the table produced by `aggregate_loss`
pub struct SaveAgg;

impl Job for SaveAgg {
    fn name(&self) -> &'static str {
        "save_agg"
    }

    fn params(&self) -> ParamSpec {
        ParamSpec::new().required("file_name").output("file_name")
    }

    fn execute(&self, ctx: &mut Context, params: &JobParams) -> Result<()> {
        let file_name: String = params.get("file_name")?;
        if !ctx.is_coordinator() {
            return Ok(());
        }

        let mut aggregate = ctx
            .aggregate
            .clone()
            .context("save_agg: No aggregation to save, run aggregate_loss first")?;
        write_table(&mut aggregate, Path::new(&file_name))?;
        tracing::info!("Saved {} groups to {}", aggregate.height(), file_name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::sample_context;
    use crate::data::read_table;
    use crate::utils::list_column;
    use serde_json::json;
    use tempfile::TempDir;

    fn params(job: &dyn Job, values: serde_json::Value) -> JobParams {
        let values = job.params().with_defaults(values.as_object().cloned().unwrap());
        JobParams::new(job.name(), values)
    }

    fn loss_context() -> Context {
        let mut ctx = sample_context();
        ctx.set_column(Column::new("SA1".into(), vec!["s2", "s1", "s2", "s1"])).unwrap();
        ctx.set_column(Column::new("loss".into(), vec![0.1, 0.2, 0.3, 0.5])).unwrap();
        ctx
    }

    #[test]
    fn test_aggregate_in_first_appearance_order() {
        let mut ctx = loss_context();
        let p = params(&AggregateLoss, json!({"groupby": "SA1", "fields": {"loss": ["mean", "max", "count"]}}));
        AggregateLoss.execute(&mut ctx, &p).unwrap();

        let agg = ctx.aggregate.as_ref().unwrap();
        let groups: Vec<Option<&str>> = agg.column("SA1").unwrap().str().unwrap().into_iter().collect();
        assert_eq!(groups, vec![Some("s2"), Some("s1")]);

        let mean: Vec<Option<f64>> = agg.column("loss_mean").unwrap().f64().unwrap().into_iter().collect();
        approx::assert_relative_eq!(mean[0].unwrap(), 0.2, epsilon = 1e-12);
        approx::assert_relative_eq!(mean[1].unwrap(), 0.35, epsilon = 1e-12);
        assert_eq!(agg.column("loss_max").unwrap().f64().unwrap().get(1), Some(0.5));
        assert!(agg.column("loss_count").is_ok());
    }

    #[test]
    fn test_unknown_reduction() {
        let mut ctx = loss_context();
        let p = params(&AggregateLoss, json!({"groupby": "SA1", "fields": {"loss": ["median"]}}));
        assert!(AggregateLoss.execute(&mut ctx, &p).is_err());
    }

    #[test]
    fn test_save_all_layout() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out/impact.csv");
        let mut ctx = loss_context();
        let rows = vec![vec![1.0, 3.0], vec![2.0, 2.0], vec![0.0, f64::NAN], vec![4.0, 6.0]];
        ctx.set_column(list_column("gust", &rows)).unwrap();

        let p = params(&SaveAll, json!({"file_name": path.to_str().unwrap()}));
        SaveAll.execute(&mut ctx, &p).unwrap();

        let saved = read_table(&path).unwrap();
        let names: Vec<String> = saved.get_column_names().into_iter().map(|s| s.to_string()).collect();
        assert_eq!(&names[..2], &[LATITUDE, LONGITUDE]);
        assert!(!names.iter().any(|n| n == INTERNAL_ID));

        let gust: Vec<Option<f64>> = saved.column("gust").unwrap().f64().unwrap().into_iter().collect();
        assert_eq!(gust, vec![Some(2.0), Some(2.0), Some(0.0), Some(5.0)]);
    }

    #[test]
    fn test_save_agg_requires_aggregation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("agg.csv");
        let mut ctx = loss_context();
        let p = params(&SaveAgg, json!({"file_name": path.to_str().unwrap()}));
        assert!(SaveAgg.execute(&mut ctx, &p).is_err());

        let agg = params(&AggregateLoss, json!({"groupby": "SA1", "fields": {"loss": ["sum"]}}));
        AggregateLoss.execute(&mut ctx, &agg).unwrap();
        SaveAgg.execute(&mut ctx, &p).unwrap();
        assert_eq!(read_table(&path).unwrap().shape(), (2, 2));
    }
}
