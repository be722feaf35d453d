//! Jobs: the units a pipeline runs
//!
//! Every job declares a name and a [`ParamSpec`] manifest, and executes
//! against the shared [`Context`] with the parameters from the job list.
//! The shared state is passed explicitly, so no manifest may name it.
//!
//! Built-in jobs are registered from a fixed constructor table; see
//! [`JobRegistry::builtin`].

pub mod exposure;
pub mod hazard;
pub mod output;
pub mod vulnerability;

use crate::context::Context;
use crate::error::ConfigError;
use anyhow::Result;
use rustc_hash::FxHashMap;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Parameter name reserved for the shared state
pub const CONTEXT_PARAM: &str = "context";

/// A job's parameter contract
#[derive(Debug, Clone, Default)]
pub struct ParamSpec {
    required: Vec<&'static str>,
    optional: Vec<&'static str>,
    defaults: Vec<(&'static str, Value)>,
    outputs: Vec<&'static str>,
}

impl ParamSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(mut self, name: &'static str) -> Self {
        self.required.push(name);
        self
    }

    pub fn optional(mut self, name: &'static str) -> Self {
        self.optional.push(name);
        self
    }

    /// Optional parameter filled with `value` when absent
    pub fn defaulted(mut self, name: &'static str, value: impl Into<Value>) -> Self {
        self.defaults.push((name, value.into()));
        self
    }

    /// Mark a declared path parameter as written by the job, so it is not
    /// required to exist before the run
    pub fn output(mut self, name: &'static str) -> Self {
        self.outputs.push(name);
        self
    }

    pub fn is_output(&self, name: &str) -> bool {
        self.outputs.iter().any(|n| *n == name)
    }

    pub fn required_names(&self) -> &[&'static str] {
        &self.required
    }

    /// Every declared name: required, then optional, then defaulted
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.required
            .iter()
            .chain(&self.optional)
            .copied()
            .chain(self.defaults.iter().map(|(name, _)| *name))
    }

    pub fn accepts(&self, name: &str) -> bool {
        self.names().any(|n| n == name)
    }

    /// Check `values` against the manifest: every required parameter
    /// present, nothing undeclared.
    pub fn check(&self, job: &str, values: &Map<String, Value>) -> Result<(), ConfigError> {
        if let Some(missing) = self.required.iter().find(|name| !values.contains_key(**name)) {
            return Err(ConfigError::MissingParameter {
                job: job.to_string(),
                param: missing.to_string(),
            });
        }
        // Sorted so the reported parameter does not depend on map order
        let mut given: Vec<&String> = values.keys().collect();
        given.sort();
        if let Some(unknown) = given.into_iter().find(|name| !self.accepts(name)) {
            return Err(ConfigError::UnknownParameter {
                job: job.to_string(),
                param: unknown.clone(),
            });
        }
        Ok(())
    }

    /// Fill in defaults for parameters the job list left out
    pub fn with_defaults(&self, mut values: Map<String, Value>) -> Map<String, Value> {
        for (name, value) in &self.defaults {
            values
                .entry(name.to_string())
                .or_insert_with(|| value.clone());
        }
        values
    }
}

/// The parameters one job runs with, read through typed getters
#[derive(Debug, Clone)]
pub struct JobParams {
    job: String,
    values: Map<String, Value>,
}

impl JobParams {
    pub fn new(job: impl Into<String>, values: Map<String, Value>) -> Self {
        Self {
            job: job.into(),
            values,
        }
    }

    pub fn job(&self) -> &str {
        &self.job
    }

    pub fn raw(&self, name: &str) -> Option<&Value> {
        self.values.get(name).filter(|v| !v.is_null())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.raw(name).is_some()
    }

    fn invalid(&self, name: &str, reason: impl ToString) -> anyhow::Error {
        ConfigError::InvalidParameter {
            job: self.job.clone(),
            param: name.to_string(),
            reason: reason.to_string(),
        }
        .into()
    }

    /// Required parameter deserialized as `T`
    pub fn get<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        self.get_opt(name)?.ok_or_else(|| {
            ConfigError::MissingParameter {
                job: self.job.clone(),
                param: name.to_string(),
            }
            .into()
        })
    }

    /// Optional parameter; absent or null yields `None`
    pub fn get_opt<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        self.raw(name)
            .map(|value| serde_json::from_value(value.clone()).map_err(|e| self.invalid(name, e)))
            .transpose()
    }

    /// A string, or a list of strings
    pub fn string_list(&self, name: &str) -> Result<Vec<String>> {
        match self.raw(name) {
            Some(Value::String(s)) => Ok(vec![s.clone()]),
            Some(_) => self.get(name),
            None => self.get::<Vec<String>>(name),
        }
    }

    /// Raise an invalid-parameter error naming this job
    pub fn reject(&self, name: &str, reason: impl ToString) -> anyhow::Error {
        self.invalid(name, reason)
    }
}

/// One unit of work in a pipeline
pub trait Job: Send + Sync {
    /// Unique name used in job lists
    fn name(&self) -> &'static str;

    /// Parameter manifest, excluding the shared state
    fn params(&self) -> ParamSpec {
        ParamSpec::new()
    }

    fn execute(&self, ctx: &mut Context, params: &JobParams) -> Result<()>;
}

pub type JobConstructor = fn() -> Box<dyn Job>;

const BUILTIN_JOBS: &[JobConstructor] = &[
    || Box::new(exposure::LoadExposure),
    || Box::new(exposure::Constant),
    || Box::new(exposure::RandomConstant),
    || Box::new(exposure::Add),
    || Box::new(exposure::Mult),
    || Box::new(exposure::MultipleDimensionMult),
    || Box::new(hazard::LoadRaster),
    || Box::new(vulnerability::LoadVulnerability),
    || Box::new(vulnerability::SimpleLinker),
    || Box::new(vulnerability::SelectVulnerabilityFunctions),
    || Box::new(vulnerability::LookUp),
    || Box::new(vulnerability::PermutateExposure),
    || Box::new(output::AggregateLoss),
    || Box::new(output::SaveAll),
    || Box::new(output::SaveAgg),
];

/// Jobs indexed by name
#[derive(Default, Clone)]
pub struct JobRegistry {
    jobs: FxHashMap<&'static str, Arc<dyn Job>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in job
    pub fn builtin() -> Result<Self, ConfigError> {
        let mut registry = Self::new();
        for constructor in BUILTIN_JOBS {
            registry.register(constructor())?;
        }
        Ok(registry)
    }

    /// Add a job; names must be unique and manifests must not name the
    /// shared state.
    pub fn register(&mut self, job: Box<dyn Job>) -> Result<(), ConfigError> {
        let name = job.name();
        if self.jobs.contains_key(name) {
            return Err(ConfigError::DuplicateJob(name.to_string()));
        }
        if job.params().accepts(CONTEXT_PARAM) {
            return Err(ConfigError::ReservedParameter {
                job: name.to_string(),
                param: CONTEXT_PARAM.to_string(),
            });
        }
        self.jobs.insert(name, Arc::from(job));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Job>, ConfigError> {
        self.jobs
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownJob(name.to_string()))
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.jobs.keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
