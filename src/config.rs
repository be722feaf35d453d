//! Job-list configuration
//!
//! A run is a YAML or JSON sequence of single-key maps, each naming a job
//! and its parameters:
//!
//! ```yaml
//! - load_exposure:
//!     file_name: sites.csv
//! - look_up:
//! - save_all:
//!     file_name: impact.csv
//! ```
//!
//! Order is kept exactly as written. A job with no parameters may have a
//! null body.

use crate::error::ConfigError;
use anyhow::{Context, Result};
use serde_json::{Map, Value};
use std::path::Path;

/// One entry of the job list
#[derive(Debug, Clone, PartialEq)]
pub struct JobEntry {
    pub name: String,
    pub params: Map<String, Value>,
}

/// Turn a parsed document into job entries
pub fn parse_job_list(document: Value) -> Result<Vec<JobEntry>, ConfigError> {
    let Value::Array(entries) = document else {
        return Err(ConfigError::MalformedEntry(
            "the job list must be a sequence".to_string(),
        ));
    };

    entries
        .into_iter()
        .enumerate()
        .map(|(position, entry)| {
            let map = match entry {
                Value::Object(map) => map,
                other => {
                    return Err(ConfigError::MalformedEntry(format!(
                        "entry {} is not a map: {}",
                        position + 1,
                        other
                    )))
                }
            };
            if map.len() != 1 {
                return Err(ConfigError::MalformedEntry(format!(
                    "entry {} must name exactly one job, found {}",
                    position + 1,
                    map.len()
                )));
            }

            let Some((name, body)) = map.into_iter().next() else {
                return Err(ConfigError::MalformedEntry(format!("entry {} is empty", position + 1)));
            };
            let params = match body {
                Value::Null => Map::new(),
                Value::Object(params) => params,
                other => {
                    return Err(ConfigError::MalformedEntry(format!(
                        "parameters of '{}' must be a map, found {}",
                        name, other
                    )))
                }
            };
            Ok(JobEntry { name, params })
        })
        .collect()
}

/// Parse a YAML job list (JSON is valid YAML)
pub fn parse_yaml(text: &str) -> Result<Vec<JobEntry>> {
    let document: Value = serde_yaml::from_str(text).context("Failed to parse job list")?;
    Ok(parse_job_list(document)?)
}

/// Read a job-list file; `.json` is parsed as JSON, anything else as YAML
pub fn read_job_list(path: &Path) -> Result<Vec<JobEntry>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {:?}", path))?;

    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| e.eq_ignore_ascii_case("json"));

    let entries = if is_json {
        let document: Value = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config {:?}", path))?;
        parse_job_list(document)?
    } else {
        parse_yaml(&text).with_context(|| format!("Invalid config {:?}", path))?
    };

    tracing::debug!("Read {} jobs from {:?}", entries.len(), path);
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_yaml_keeps_order_and_null_bodies() {
        let entries = parse_yaml(
            "- load_exposure:\n    file_name: sites.csv\n    exposure_latitude: LAT\n- look_up:\n- save_all:\n    file_name: out.csv\n",
        )
        .unwrap();

        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["load_exposure", "look_up", "save_all"]);
        assert_eq!(entries[0].params.get("exposure_latitude"), Some(&json!("LAT")));
        assert!(entries[1].params.is_empty());
    }

    #[test]
    fn test_malformed_entries() {
        let two_keys = json!([{"a": null, "b": null}]);
        assert!(matches!(parse_job_list(two_keys), Err(ConfigError::MalformedEntry(_))));

        let not_map = json!(["load_exposure"]);
        assert!(matches!(parse_job_list(not_map), Err(ConfigError::MalformedEntry(_))));

        let scalar_body = json!([{"constant": 3}]);
        assert!(matches!(parse_job_list(scalar_body), Err(ConfigError::MalformedEntry(_))));

        assert!(matches!(parse_job_list(json!({"a": 1})), Err(ConfigError::MalformedEntry(_))));
    }

    #[test]
    fn test_json_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("run.json");
        std::fs::write(&path, r#"[{"constant": {"var": "x", "value": 1}}]"#).unwrap();
        let entries = read_job_list(&path).unwrap();
        assert_eq!(entries[0].name, "constant");
        assert_eq!(entries[0].params.get("value"), Some(&json!(1)));
    }
}
