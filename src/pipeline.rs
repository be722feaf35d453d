//! Ordered, one-shot execution of a job list
//!
//! Building a [`Pipeline`] resolves every job name and checks parameters
//! against each job's manifest; [`Pipeline::validate`] additionally checks
//! that input files exist. Both happen before any job runs, and
//! [`Pipeline::run`] validates again before the first job. Jobs then run
//! strictly in order against one [`Context`]; the first failure stops the
//! run.

use crate::config::{read_job_list, JobEntry};
use crate::context::Context;
use crate::error::ConfigError;
use crate::jobs::{Job, JobParams, JobRegistry};
use anyhow::{Context as _, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Parameters whose values are file paths
const PATH_PARAMS: [&str; 2] = ["file_name", "file_list"];

struct Step {
    job: Arc<dyn Job>,
    params: JobParams,
}

pub struct Pipeline {
    steps: Vec<Step>,
}

/// Every path held by a string or list-of-strings parameter
fn paths_in(value: &Value) -> Vec<PathBuf> {
    match value {
        Value::String(s) => vec![PathBuf::from(s)],
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(PathBuf::from)
            .collect(),
        _ => Vec::new(),
    }
}

impl Pipeline {
    /// Resolve job names and check parameters; defaults are filled in
    pub fn build(registry: &JobRegistry, entries: Vec<JobEntry>) -> Result<Self, ConfigError> {
        let steps = entries
            .into_iter()
            .map(|entry| -> Result<Step, ConfigError> {
                let job = registry.get(&entry.name)?;
                let spec = job.params();
                spec.check(job.name(), &entry.params)?;
                let params = JobParams::new(job.name(), spec.with_defaults(entry.params));
                Ok(Step { job, params })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(Self { steps })
    }

    /// Read, build and validate a pipeline from a job-list file
    pub fn from_config(path: &Path, registry: &JobRegistry) -> Result<Self> {
        let entries = read_job_list(path)?;
        let pipeline = Self::build(registry, entries)
            .with_context(|| format!("Invalid job list {:?}", path))?;
        pipeline
            .validate()
            .with_context(|| format!("Invalid job list {:?}", path))?;
        Ok(pipeline)
    }

    /// Check every input path parameter names an openable file
    pub fn validate(&self) -> Result<(), ConfigError> {
        for step in &self.steps {
            let spec = step.job.params();
            for param in PATH_PARAMS {
                if spec.is_output(param) {
                    continue;
                }
                let Some(value) = step.params.raw(param) else {
                    continue;
                };
                for path in paths_in(value) {
                    if std::fs::File::open(&path).is_err() {
                        return Err(ConfigError::MissingFile {
                            job: step.job.name().to_string(),
                            param: param.to_string(),
                            path,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn job_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.job.name()).collect()
    }

    /// Run every job in order; the first error aborts the run
    pub fn run(&self, ctx: &mut Context) -> Result<()> {
        self.validate()?;

        for step in &self.steps {
            let name = step.job.name();
            tracing::info!("Executing {}", name);
            step.job
                .execute(ctx, &step.params)
                .with_context(|| format!("Job '{}' failed", name))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_yaml;
    use crate::jobs::ParamSpec;
    use std::sync::Mutex;

    /// Records the order jobs run in
    struct Recorder(&'static str, Arc<Mutex<Vec<&'static str>>>);

    impl Job for Recorder {
        fn name(&self) -> &'static str {
            self.0
        }

        fn params(&self) -> ParamSpec {
            ParamSpec::new().optional("fail")
        }

        fn execute(&self, _ctx: &mut Context, params: &JobParams) -> Result<()> {
            self.1.lock().unwrap().push(self.0);
            if params.contains("fail") {
                anyhow::bail!("asked to fail");
            }
            Ok(())
        }
    }

    fn recording_registry() -> (JobRegistry, Arc<Mutex<Vec<&'static str>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = JobRegistry::new();
        for name in ["first", "second", "third"] {
            registry.register(Box::new(Recorder(name, log.clone()))).unwrap();
        }
        (registry, log)
    }

    #[test]
    fn test_runs_in_order_and_stops_at_failure() {
        let (registry, log) = recording_registry();
        let entries = parse_yaml("- second:\n- first:\n    fail: true\n- third:\n").unwrap();
        let pipeline = Pipeline::build(&registry, entries).unwrap();
        assert_eq!(pipeline.job_names(), vec!["second", "first", "third"]);

        let err = pipeline.run(&mut Context::new()).unwrap_err();
        assert!(format!("{:#}", err).contains("Job 'first' failed"));
        assert_eq!(*log.lock().unwrap(), vec!["second", "first"]);
    }

    #[test]
    fn test_unknown_job_and_parameter() {
        let (registry, _) = recording_registry();

        let entries = parse_yaml("- first:\n- fourth:\n").unwrap();
        assert_eq!(
            Pipeline::build(&registry, entries).err(),
            Some(ConfigError::UnknownJob("fourth".into()))
        );

        let entries = parse_yaml("- first:\n    fial: true\n").unwrap();
        assert_eq!(
            Pipeline::build(&registry, entries).err(),
            Some(ConfigError::UnknownParameter { job: "first".into(), param: "fial".into() })
        );
    }

    #[test]
    fn test_missing_input_file_fails_before_any_job() {
        let registry = JobRegistry::builtin().unwrap();
        let entries = parse_yaml(
            "- constant:\n    var: a\n    value: 1\n- load_vulnerability:\n    file_name: [no_such_file.json]\n- save_all:\n    file_name: not_yet_written.csv\n",
        )
        .unwrap();
        let pipeline = Pipeline::build(&registry, entries).unwrap();

        match pipeline.validate() {
            Err(ConfigError::MissingFile { job, param, path }) => {
                assert_eq!(job, "load_vulnerability");
                assert_eq!(param, "file_name");
                assert_eq!(path, PathBuf::from("no_such_file.json"));
            }
            other => panic!("expected missing file, got {:?}", other),
        }

        let mut ctx = Context::new();
        assert!(pipeline.run(&mut ctx).is_err());
        assert_eq!(ctx.site_count(), 0);
    }
}
