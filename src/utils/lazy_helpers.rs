//! Column access helpers with validation
//!
//! Provides safe, explicit patterns for reading exposure columns out of
//! polars frames, so a missing column surfaces as an error naming the
//! column and the caller instead of a bare polars message.

use polars::prelude::*;
use anyhow::{Context, Result, anyhow};
use std::collections::HashSet;

/// Materialize LazyFrame with explicit column list and validation
///
/// # Errors
/// Returns error if:
/// - Materialization fails
/// - Any required column is missing from result
pub fn materialize_with_columns(
    lazy: &LazyFrame,
    columns: &[&str],
    context: &str,
) -> Result<DataFrame> {
    let col_exprs: Vec<Expr> = columns.iter()
        .map(|&name| col(name))
        .collect();

    let df = lazy
        .clone()
        .select(&col_exprs)
        .collect()
        .with_context(|| format!("{}: Failed to materialize columns {:?}", context, columns))?;

    require_columns(&df, columns, context)?;
    Ok(df)
}

/// Check every name in `columns` is present in `df`
pub fn require_columns(df: &DataFrame, columns: &[&str], context: &str) -> Result<()> {
    let actual_cols: HashSet<String> = df.get_column_names()
        .into_iter()
        .map(|s| s.to_string())
        .collect();

    for &expected in columns {
        if !actual_cols.contains(expected) {
            return Err(anyhow!(
                "{}: Missing expected column '{}'. Available columns: {:?}",
                context, expected, actual_cols
            ));
        }
    }

    Ok(())
}

/// Read a column as `f64`, nulls becoming NaN
///
/// Integer columns are cast; string columns are an error.
pub fn f64_values(df: &DataFrame, name: &str, context: &str) -> Result<Vec<f64>> {
    let column = df.column(name)
        .with_context(|| format!("{}: Missing {} column", context, name))?;

    if column.dtype() == &DataType::String {
        anyhow::bail!("{}: Column '{}' is not numeric", context, name);
    }

    let column = column
        .cast(&DataType::Float64)
        .with_context(|| format!("{}: Column '{}' is not numeric", context, name))?;

    let values = column.f64()?
        .into_iter()
        .map(|v| v.unwrap_or(f64::NAN))
        .collect();

    Ok(values)
}

/// Read a column as strings, nulls becoming empty strings
///
/// Numeric columns are cast, so integer function ids such as `3`
/// come back as `"3"`.
pub fn string_values(df: &DataFrame, name: &str, context: &str) -> Result<Vec<String>> {
    let column = df.column(name)
        .with_context(|| format!("{}: Missing {} column", context, name))?
        .cast(&DataType::String)
        .with_context(|| format!("{}: Column '{}' cannot be read as text", context, name))?;

    let values = column.str()?
        .into_iter()
        .map(|v| v.unwrap_or_default().to_string())
        .collect();

    Ok(values)
}

/// Read a `List(f64)` column as one vector per row, nulls becoming NaN
pub fn list_values(df: &DataFrame, name: &str, context: &str) -> Result<Vec<Vec<f64>>> {
    let column = df.column(name)
        .with_context(|| format!("{}: Missing {} column", context, name))?;
    let lists = column.list()
        .with_context(|| format!("{}: Column '{}' is not a list column", context, name))?;

    lists.into_iter()
        .map(|row| -> Result<Vec<f64>> {
            let Some(series) = row else {
                return Ok(Vec::new());
            };
            let series = series.cast(&DataType::Float64)?;
            Ok(series.f64()?.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
        })
        .collect()
}

/// Build a `List(f64)` column from one vector per row
pub fn list_column(name: &str, rows: &[Vec<f64>]) -> Column {
    let width = rows.first().map_or(0, Vec::len);
    let mut builder = ListPrimitiveChunkedBuilder::<Float64Type>::new(
        name.into(),
        rows.len(),
        rows.len() * width,
        DataType::Float64,
    );
    for row in rows {
        builder.append_slice(row);
    }
    builder.finish().into_series().into_column()
}

/// True when the column is a list column
pub fn is_list_column(df: &DataFrame, name: &str) -> Result<bool> {
    let dtype = df.column(name)
        .with_context(|| format!("Missing {} column", name))?
        .dtype();
    Ok(matches!(dtype, DataType::List(_)))
}

/// True when the column holds numbers (integers or floats)
pub fn is_numeric_column(df: &DataFrame, name: &str) -> Result<bool> {
    let dtype = df.column(name)
        .with_context(|| format!("Missing {} column", name))?
        .dtype();
    Ok(dtype.is_integer() || dtype.is_float())
}
