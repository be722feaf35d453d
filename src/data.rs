//! Table loading and saving
//!
//! Exposure and aggregation tables are read and written with polars. The
//! format follows the file extension: `.parquet` is Parquet (ZSTD), anything
//! else is CSV with a header row. `NA` cells in CSV input are read as null.

use anyhow::{Context, Result};
use polars::prelude::*;
use std::fs::File;
use std::path::Path;

fn is_parquet(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| e.eq_ignore_ascii_case("parquet"))
}

/// Load a CSV or Parquet table
pub fn read_table(path: &Path) -> Result<DataFrame> {
    if is_parquet(path) {
        return LazyFrame::scan_parquet(path, Default::default())
            .with_context(|| format!("Failed to scan parquet: {:?}", path))?
            .collect()
            .with_context(|| format!("Failed to load parquet: {:?}", path));
    }

    let parse_options = CsvParseOptions::default()
        .with_null_values(Some(NullValues::AllColumnsSingle("NA".into())));

    CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(None)
        .with_parse_options(parse_options)
        .try_into_reader_with_file_path(Some(path.to_path_buf()))
        .with_context(|| format!("Failed to create CSV reader: {:?}", path))?
        .finish()
        .with_context(|| format!("Failed to load CSV: {:?}", path))
}

/// Write a table as CSV or Parquet, creating parent directories
pub fn write_table(df: &mut DataFrame, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {:?}", parent))?;
    }

    let file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;

    if is_parquet(path) {
        ParquetWriter::new(file)
            .with_compression(ParquetCompression::Zstd(None))
            .finish(df)
            .with_context(|| format!("Failed to write parquet: {:?}", path))?;
    } else {
        let mut file = file;
        CsvWriter::new(&mut file)
            .include_header(true)
            .finish(df)
            .with_context(|| format!("Failed to write CSV: {:?}", path))?;
    }

    tracing::debug!("Wrote {} rows x {} columns to {:?}", df.height(), df.width(), path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_csv_round_trip_with_na() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("exposure.csv");
        std::fs::write(&path, "LATITUDE,LONGITUDE,WALL\n-30.1,150.2,brick\n-30.2,NA,NA\n").unwrap();

        let df = read_table(&path).unwrap();
        assert_eq!(df.shape(), (2, 3));
        assert_eq!(df.column("LONGITUDE").unwrap().null_count(), 1);

        let out = dir.path().join("nested/out.csv");
        write_table(&mut df.clone(), &out).unwrap();
        let back = read_table(&out).unwrap();
        assert!(back.equals_missing(&df));
    }

    #[test]
    fn test_parquet_by_extension() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("agg.parquet");
        let mut df = df!["SA1" => &["a", "b"], "loss_mean" => &[0.1, 0.2]].unwrap();
        write_table(&mut df, &path).unwrap();
        assert!(read_table(&path).unwrap().equals(&df));
    }
}
