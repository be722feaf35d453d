//! Per-asset curves realised from a vulnerability set, and loss look-up
//!
//! Each distinct function id is realised once and every asset carrying
//! that id points at the same curve.

use super::{VariabilityMethod, VulnerabilitySet};
use crate::error::RunError;
use crate::utils::interp;
use anyhow::Result;
use rand::Rng;
use std::collections::BTreeMap;

/// Per-asset curves realised from one vulnerability set.
///
/// One loss-ratio array is drawn per distinct function id (in sorted id
/// order, so a seeded run is reproducible); each asset points at the
/// curve of its function.
#[derive(Debug, Clone)]
pub struct RealisedCurves {
    pub set_id: String,
    pub intensity_measure_type: String,
    pub loss_category: String,
    pub method: VariabilityMethod,
    curves: Vec<Curve>,
    asset_curve: Vec<usize>,
}

#[derive(Debug, Clone)]
struct Curve {
    intensity_levels: Vec<f64>,
    loss_ratios: Vec<f64>,
}

impl RealisedCurves {
    /// Realise curves for `function_ids` (one per asset).
    ///
    /// # Errors
    /// [`RunError::UnknownFunction`] if an asset references an id that is
    /// not in `set`.
    pub fn realise<R: Rng + ?Sized>(
        set: &VulnerabilitySet,
        function_ids: &[String],
        method: VariabilityMethod,
        rng: &mut R,
    ) -> Result<Self> {
        let mut distinct: BTreeMap<&str, usize> = BTreeMap::new();
        for id in function_ids {
            if set.function(id).is_none() {
                return Err(RunError::UnknownFunction {
                    set: set.id.clone(),
                    id: id.clone(),
                }
                .into());
            }
            distinct.insert(id.as_str(), 0);
        }

        let mut curves = Vec::with_capacity(distinct.len());
        for (position, (id, slot)) in distinct.iter_mut().enumerate() {
            let Some(function) = set.function(id) else {
                continue;
            };
            curves.push(Curve {
                intensity_levels: function.intensity_levels.clone(),
                loss_ratios: function.realise(method, rng),
            });
            *slot = position;
        }

        let asset_curve = function_ids
            .iter()
            .map(|id| distinct.get(id.as_str()).copied().unwrap_or_default())
            .collect();

        tracing::debug!(
            "Realised {} curves for {} assets from set {} ({})",
            curves.len(), function_ids.len(), set.id, method
        );

        Ok(Self {
            set_id: set.id.clone(),
            intensity_measure_type: set.intensity_measure_type.clone(),
            loss_category: set.loss_category.clone(),
            method,
            curves,
            asset_curve,
        })
    }

    pub fn n_assets(&self) -> usize {
        self.asset_curve.len()
    }

    /// Loss ratio per asset at the observed intensities.
    ///
    /// Interpolates linearly between bracketing levels. Intensities outside
    /// the curve clamp to the boundary loss ratio; NaN stays NaN.
    pub fn look_up(&self, intensities: &[f64]) -> Result<Vec<f64>> {
        if intensities.len() != self.asset_curve.len() {
            return Err(RunError::RowCountMismatch {
                column: self.intensity_measure_type.clone(),
                expected: self.asset_curve.len(),
                actual: intensities.len(),
            }
            .into());
        }

        Ok(intensities
            .iter()
            .zip(&self.asset_curve)
            .map(|(&x, &c)| {
                let curve = &self.curves[c];
                interp(x, &curve.intensity_levels, &curve.loss_ratios)
            })
            .collect())
    }

    /// Keep only the assets at `rows`, in that order
    pub fn select_assets(&self, rows: &[usize]) -> Self {
        let mut selected = self.clone();
        selected.asset_curve = rows.iter().map(|&r| self.asset_curve[r]).collect();
        selected
    }
}
