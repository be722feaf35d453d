//! Vulnerability jobs: load sets, link them to exposure columns, realise
//! per-site curves and look up losses.

use super::{Job, JobParams, ParamSpec};
use crate::context::Context;
use crate::error::RunError;
use crate::utils::{is_list_column, list_column, list_values, nan_mean, quantile, rng_from_seed};
use crate::vulnerability::{
    JsonVulnerabilityFile, RealisedCurves, VariabilityMethod, VulnerabilitySource,
};
use anyhow::Result;
use polars::prelude::*;
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::BTreeMap;

/// `load_vulnerability`: read one or more vulnerability files
pub struct LoadVulnerability;

impl Job for LoadVulnerability {
    fn name(&self) -> &'static str {
        "load_vulnerability"
    }

    fn params(&self) -> ParamSpec {
        ParamSpec::new().required("file_name")
    }

    fn execute(&self, ctx: &mut Context, params: &JobParams) -> Result<()> {
        for file in params.string_list("file_name")? {
            for set in JsonVulnerabilityFile::new(&file).load_sets()? {
                if ctx.vulnerability_sets.contains_key(&set.id) {
                    tracing::warn!("Vulnerability set {} from {} replaces an earlier set", set.id, file);
                }
                ctx.vulnerability_sets.insert(set.id.clone(), set);
            }
        }
        tracing::debug!("{} vulnerability sets loaded", ctx.vulnerability_sets.len());
        Ok(())
    }
}

/// `simple_linker`: name the exposure column holding each set's function ids
pub struct SimpleLinker;

impl Job for SimpleLinker {
    fn name(&self) -> &'static str {
        "simple_linker"
    }

    fn params(&self) -> ParamSpec {
        ParamSpec::new().required("vul_functions_in_exposure")
    }

    fn execute(&self, ctx: &mut Context, params: &JobParams) -> Result<()> {
        let links: BTreeMap<String, String> = params.get("vul_functions_in_exposure")?;
        for (set_id, column) in links {
            if ctx.links.contains_key(&set_id) {
                return Err(params.reject(
                    "vul_functions_in_exposure",
                    format!("vulnerability set '{}' is already linked", set_id),
                ));
            }
            ctx.links.insert(set_id, column);
        }
        Ok(())
    }
}

/// Function ids linked to `set_id`, one per site
fn linked_function_ids(ctx: &Context, set_id: &str) -> Result<Vec<String>> {
    if !ctx.vulnerability_sets.contains_key(set_id) {
        return Err(RunError::UnknownSet(set_id.to_string()).into());
    }
    let column = ctx
        .links
        .get(set_id)
        .ok_or_else(|| RunError::UnlinkedSet(set_id.to_string()))?;
    ctx.string_column(column)
}

/// `select_vulnerability_functions`: realise per-site curves for each set
///
/// `variability_method` maps set id to method name. Sets are realised in
/// sorted id order from one RNG, seeded with `seed + rank` when given.
pub struct SelectVulnerabilityFunctions;

impl Job for SelectVulnerabilityFunctions {
    fn name(&self) -> &'static str {
        "select_vulnerability_functions"
    }

    fn params(&self) -> ParamSpec {
        ParamSpec::new().required("variability_method").optional("seed")
    }

    fn execute(&self, ctx: &mut Context, params: &JobParams) -> Result<()> {
        let methods: BTreeMap<String, String> = params.get("variability_method")?;
        let seed: Option<u64> = params.get_opt("seed")?;
        let mut rng = rng_from_seed(seed.map(|s| s.wrapping_add(ctx.rank() as u64)));

        for (set_id, method) in methods {
            let method: VariabilityMethod = method
                .parse()
                .map_err(|e| params.reject("variability_method", e))?;
            let ids = linked_function_ids(ctx, &set_id)?;
            let set = ctx
                .vulnerability_sets
                .get(&set_id)
                .ok_or_else(|| RunError::UnknownSet(set_id.clone()))?;

            let curves = RealisedCurves::realise(set, &ids, method, &mut rng)?;
            ctx.curves.insert(set_id, curves);
        }
        Ok(())
    }
}

/// Loss per site for one set; list intensities give list losses
fn look_up_set(ctx: &Context, curves: &RealisedCurves) -> Result<Column> {
    let intensity = &curves.intensity_measure_type;
    if !ctx.has_column(intensity) {
        return Err(RunError::MissingIntensity {
            set: curves.set_id.clone(),
            column: intensity.clone(),
        }
        .into());
    }

    let exposure = ctx.exposure()?;
    if !is_list_column(exposure, intensity)? {
        let loss = curves.look_up(&ctx.f64_column(intensity)?)?;
        return Ok(Column::new(curves.loss_category.as_str().into(), loss));
    }

    // One look-up per raster, then restack per site
    let rows = list_values(exposure, intensity, "look_up")?;
    let width = rows.iter().map(Vec::len).max().unwrap_or(0);
    let mut losses = vec![Vec::with_capacity(width); rows.len()];
    for k in 0..width {
        let slice: Vec<f64> = rows.iter().map(|r| r.get(k).copied().unwrap_or(f64::NAN)).collect();
        for (site, loss) in curves.look_up(&slice)?.into_iter().enumerate() {
            losses[site].push(loss);
        }
    }
    Ok(list_column(&curves.loss_category, &losses))
}

/// `look_up`: loss ratio per site for every realised set
///
/// Each set reads its intensity measure column and writes its loss
/// category column.
pub struct LookUp;

impl Job for LookUp {
    fn name(&self) -> &'static str {
        "look_up"
    }

    fn execute(&self, ctx: &mut Context, _params: &JobParams) -> Result<()> {
        let state: &Context = ctx;
        let columns = state
            .curves
            .values()
            .map(|curves| look_up_set(state, curves))
            .collect::<Result<Vec<_>>>()?;

        for column in columns {
            ctx.set_column(column)?;
        }
        Ok(())
    }
}

/// Sites grouped by label, each group in row order
fn site_groups(labels: Option<Vec<String>>, n_sites: usize) -> Vec<Vec<usize>> {
    let Some(labels) = labels else {
        return vec![(0..n_sites).collect()];
    };
    let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (site, label) in labels.into_iter().enumerate() {
        groups.entry(label).or_default().push(site);
    }
    groups.into_values().collect()
}

/// Shuffle function ids among the sites of each group
fn permute_ids<R: Rng + ?Sized>(ids: &[String], groups: &[Vec<usize>], rng: &mut R) -> Vec<String> {
    let mut permuted = ids.to_vec();
    for group in groups {
        let mut members: Vec<&String> = group.iter().map(|&site| &ids[site]).collect();
        members.shuffle(rng);
        for (&site, id) in group.iter().zip(members) {
            permuted[site] = id.clone();
        }
    }
    permuted
}

/// `permutate_exposure`: loss spread from reassigning building types
///
/// For the first realised set, shuffles its function ids among sites
/// (within `groupby` groups when given) `iterations` times, using mean
/// curves each time. Writes the per-site mean loss over all iterations to
/// the loss column, and to `<loss>_max` the losses of the iteration whose
/// mean loss is closest to the `quantile` of iteration means. The
/// function-id column itself is left unchanged.
pub struct PermutateExposure;

impl Job for PermutateExposure {
    fn name(&self) -> &'static str {
        "permutate_exposure"
    }

    fn params(&self) -> ParamSpec {
        ParamSpec::new()
            .optional("groupby")
            .optional("seed")
            .defaulted("iterations", 1000)
            .defaulted("quantile", 0.95)
    }

    fn execute(&self, ctx: &mut Context, params: &JobParams) -> Result<()> {
        let groupby: Option<String> = params.get_opt("groupby")?;
        let seed: Option<u64> = params.get_opt("seed")?;
        let iterations: usize = params.get_opt("iterations")?.unwrap_or(1000);
        let q: f64 = params.get_opt("quantile")?.unwrap_or(0.95);

        if iterations == 0 {
            return Err(params.reject("iterations", "must be at least 1"));
        }
        if !(0.0..=1.0).contains(&q) {
            return Err(params.reject("quantile", "must be between 0 and 1"));
        }

        let Some(set_id) = ctx.curves.keys().next().cloned() else {
            anyhow::bail!("permutate_exposure needs realised vulnerability curves");
        };
        let ids = linked_function_ids(ctx, &set_id)?;
        let set = ctx
            .vulnerability_sets
            .get(&set_id)
            .ok_or_else(|| RunError::UnknownSet(set_id.clone()))?;
        let intensity_column = set.intensity_measure_type.clone();
        let loss_column = set.loss_category.clone();

        if !ctx.has_column(&intensity_column) {
            return Err(RunError::MissingIntensity { set: set_id, column: intensity_column }.into());
        }
        let intensity = ctx.f64_column(&intensity_column)?;
        let labels = groupby.map(|g| ctx.string_column(&g)).transpose()?;
        let groups = site_groups(labels, ids.len());

        let mut rng = rng_from_seed(seed.map(|s| s.wrapping_add(ctx.rank() as u64)));
        let start = rng.clone();

        let mut site_sum = vec![0.0; ids.len()];
        let mut iteration_means = Vec::with_capacity(iterations);
        for _ in 0..iterations {
            let permuted = permute_ids(&ids, &groups, &mut rng);
            let curves = RealisedCurves::realise(set, &permuted, VariabilityMethod::Mean, &mut rng)?;
            let loss = curves.look_up(&intensity)?;
            site_sum.iter_mut().zip(&loss).for_each(|(s, l)| *s += l);
            iteration_means.push(nan_mean(&loss));
        }

        // Iteration whose mean is nearest the requested quantile
        let target = quantile(&iteration_means, q);
        let chosen = iteration_means
            .iter()
            .enumerate()
            .filter(|(_, m)| !m.is_nan())
            .min_by(|a, b| (a.1 - target).abs().total_cmp(&(b.1 - target).abs()))
            .map_or(0, |(i, _)| i);

        // Replay the RNG stream up to the chosen iteration
        let mut rng = start;
        let mut chosen_loss = Vec::new();
        for i in 0..=chosen {
            let permuted = permute_ids(&ids, &groups, &mut rng);
            if i == chosen {
                let curves = RealisedCurves::realise(set, &permuted, VariabilityMethod::Mean, &mut rng)?;
                chosen_loss = curves.look_up(&intensity)?;
            }
        }

        tracing::debug!(
            "Permuted {} {} times; iteration {} is nearest the {} quantile",
            set_id, iterations, chosen, q
        );

        let mean_loss: Vec<f64> = site_sum.iter().map(|s| s / iterations as f64).collect();
        let max_column = format!("{}_max", loss_column);
        ctx.set_column(Column::new(loss_column.as_str().into(), mean_loss))?;
        ctx.set_column(Column::new(max_column.as_str().into(), chosen_loss))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::sample_context;
    use crate::vulnerability::{VulnerabilityFunction, VulnerabilitySet};
    use approx::assert_relative_eq;
    use serde_json::json;

    const ID_COLUMN: &str = "wind_vulnerability_function_id";

    fn params(job: &dyn Job, values: serde_json::Value) -> JobParams {
        let values = job.params().with_defaults(values.as_object().cloned().unwrap());
        JobParams::new(job.name(), values)
    }

    /// Sample context with set "wind" (A: 0..1, B: 0..0.1 over 0..10 m/s) linked and gust loaded
    fn wind_context() -> Context {
        let mut ctx = sample_context();
        let a = VulnerabilityFunction::new("A", vec![0.0, 5.0, 10.0], vec![0.0, 0.5, 1.0], None).unwrap();
        let b = VulnerabilityFunction::new("B", vec![0.0, 5.0, 10.0], vec![0.0, 0.05, 0.1], None).unwrap();
        let set = VulnerabilitySet::new("wind", "gust", "structural_loss_ratio", vec![a, b]).unwrap();
        ctx.vulnerability_sets.insert("wind".into(), set);
        ctx.set_column(Column::new("gust".into(), vec![4.0, 5.0, 12.0, f64::NAN])).unwrap();
        SimpleLinker
            .execute(&mut ctx, &params(&SimpleLinker, json!({"vul_functions_in_exposure": {"wind": ID_COLUMN}})))
            .unwrap();
        ctx
    }

    fn select(ctx: &mut Context, method: &str) -> Result<()> {
        SelectVulnerabilityFunctions.execute(
            ctx,
            &params(&SelectVulnerabilityFunctions, json!({"variability_method": {"wind": method}})),
        )
    }

    #[test]
    fn test_mean_look_up() {
        let mut ctx = wind_context();
        select(&mut ctx, "mean").unwrap();
        LookUp.execute(&mut ctx, &params(&LookUp, json!({}))).unwrap();

        let loss = ctx.f64_column("structural_loss_ratio").unwrap();
        assert_relative_eq!(loss[0], 0.4, epsilon = 1e-12);
        assert_relative_eq!(loss[1], 0.05, epsilon = 1e-12);
        assert_eq!(loss[2], 1.0);
        assert!(loss[3].is_nan());
    }

    #[test]
    fn test_look_up_without_intensity_column() {
        let mut ctx = wind_context();
        select(&mut ctx, "mean").unwrap();
        ctx.curves.get_mut("wind").unwrap().intensity_measure_type = "flood_depth".into();

        let err = LookUp.execute(&mut ctx, &params(&LookUp, json!({}))).unwrap_err();
        assert_eq!(
            err.downcast_ref::<RunError>(),
            Some(&RunError::MissingIntensity { set: "wind".into(), column: "flood_depth".into() })
        );
    }

    #[test]
    fn test_list_intensity_gives_list_loss() {
        let mut ctx = wind_context();
        let rows = vec![vec![4.0, 10.0], vec![5.0, 0.0], vec![1.0, 1.0], vec![2.0, 2.0]];
        ctx.set_column(list_column("gust", &rows)).unwrap();
        select(&mut ctx, "mean").unwrap();
        LookUp.execute(&mut ctx, &params(&LookUp, json!({}))).unwrap();

        let losses = list_values(ctx.exposure().unwrap(), "structural_loss_ratio", "test").unwrap();
        assert_relative_eq!(losses[0][0], 0.4, epsilon = 1e-12);
        assert_eq!(losses[0][1], 1.0);
        assert_relative_eq!(losses[1][0], 0.05, epsilon = 1e-12);
        assert_eq!(losses[1][1], 0.0);
    }

    #[test]
    fn test_unlinked_and_unknown_sets() {
        let mut ctx = wind_context();
        let err = SelectVulnerabilityFunctions
            .execute(&mut ctx, &params(&SelectVulnerabilityFunctions, json!({"variability_method": {"flood": "mean"}})))
            .unwrap_err();
        assert_eq!(err.downcast_ref::<RunError>(), Some(&RunError::UnknownSet("flood".into())));

        ctx.links.clear();
        let err = select(&mut ctx, "mean").unwrap_err();
        assert_eq!(err.downcast_ref::<RunError>(), Some(&RunError::UnlinkedSet("wind".into())));
    }

    #[test]
    fn test_link_twice_rejected() {
        let mut ctx = wind_context();
        let err = SimpleLinker
            .execute(&mut ctx, &params(&SimpleLinker, json!({"vul_functions_in_exposure": {"wind": "other"}})))
            .unwrap_err();
        assert!(err.to_string().contains("already linked"));
    }

    #[test]
    fn test_bad_method_name() {
        let mut ctx = wind_context();
        assert!(select(&mut ctx, "beta").is_err());
    }

    #[test]
    fn test_permutation_within_groups() {
        let groups = site_groups(Some(vec!["x".into(), "y".into(), "x".into(), "y".into()]), 4);
        assert_eq!(groups, vec![vec![0, 2], vec![1, 3]]);

        let ids: Vec<String> = ["A", "B", "C", "D"].iter().map(|s| s.to_string()).collect();
        let mut rng = rng_from_seed(Some(5));
        for _ in 0..20 {
            let permuted = permute_ids(&ids, &groups, &mut rng);
            let mut first = vec![permuted[0].as_str(), permuted[2].as_str()];
            first.sort();
            assert_eq!(first, vec!["A", "C"]);
        }
    }

    #[test]
    fn test_permutate_exposure() {
        let mut ctx = wind_context();
        select(&mut ctx, "mean").unwrap();
        let before = ctx.string_column(ID_COLUMN).unwrap();

        let p = params(&PermutateExposure, json!({"iterations": 50, "seed": 3}));
        PermutateExposure.execute(&mut ctx, &p).unwrap();

        assert_eq!(ctx.string_column(ID_COLUMN).unwrap(), before);
        let mean = ctx.f64_column("structural_loss_ratio").unwrap();
        let max = ctx.f64_column("structural_loss_ratio_max").unwrap();
        // Site 2 (12 m/s) is above both curves: loss 1.0 or 0.1 per iteration
        assert!(mean[2] >= 0.1 && mean[2] <= 1.0);
        assert!(max[2] == 1.0 || max[2] == 0.1);
        assert!(mean[3].is_nan());
    }

    #[test]
    fn test_permutate_needs_curves() {
        let mut ctx = wind_context();
        let p = params(&PermutateExposure, json!({}));
        assert!(PermutateExposure.execute(&mut ctx, &p).is_err());
    }
}
