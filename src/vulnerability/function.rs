//! Discrete vulnerability functions and per-level loss sampling

use super::VariabilityMethod;
use crate::utils::standard_normal;
use anyhow::Result;
use rand::Rng;

/// One discrete vulnerability curve: loss ratio (mean and coefficient of
/// variation) at strictly increasing intensity levels.
#[derive(Debug, Clone, PartialEq)]
pub struct VulnerabilityFunction {
    pub id: String,
    pub intensity_levels: Vec<f64>,
    pub mean_loss: Vec<f64>,
    pub cov: Vec<f64>,
}

impl VulnerabilityFunction {
    /// Build and validate a function. `cov` defaults to zeros.
    pub fn new(
        id: impl Into<String>,
        intensity_levels: Vec<f64>,
        mean_loss: Vec<f64>,
        cov: Option<Vec<f64>>,
    ) -> Result<Self> {
        let cov = cov.unwrap_or_else(|| vec![0.0; mean_loss.len()]);
        let function = Self {
            id: id.into(),
            intensity_levels,
            mean_loss,
            cov,
        };
        function.validate()?;
        Ok(function)
    }

    fn validate(&self) -> Result<()> {
        let n = self.intensity_levels.len();
        if n == 0 {
            anyhow::bail!("Function '{}' has no intensity levels", self.id);
        }
        if self.mean_loss.len() != n || self.cov.len() != n {
            anyhow::bail!(
                "Function '{}': {} intensity levels, {} mean loss ratios, {} cov values",
                self.id, n, self.mean_loss.len(), self.cov.len()
            );
        }
        if self.intensity_levels.iter().any(|v| !v.is_finite()) {
            anyhow::bail!("Function '{}' has non-finite intensity levels", self.id);
        }
        if self.intensity_levels.windows(2).any(|w| w[1] <= w[0]) {
            anyhow::bail!(
                "Function '{}': intensity levels must be strictly increasing, got {:?}",
                self.id, self.intensity_levels
            );
        }
        if self.cov.iter().any(|c| c.is_nan() || *c < 0.0) {
            anyhow::bail!("Function '{}' has negative coefficient of variation", self.id);
        }
        Ok(())
    }

    /// Draw one representative loss-ratio array.
    ///
    /// Levels with zero mean or zero cov keep their mean exactly and consume
    /// no randomness.
    pub fn realise<R: Rng + ?Sized>(&self, method: VariabilityMethod, rng: &mut R) -> Vec<f64> {
        match method {
            VariabilityMethod::Mean => self.mean_loss.clone(),
            VariabilityMethod::LogNormal | VariabilityMethod::Normal => self
                .mean_loss
                .iter()
                .zip(&self.cov)
                .map(|(&mean, &cov)| {
                    if mean <= 0.0 || cov <= 0.0 {
                        return mean;
                    }
                    let z = standard_normal(rng);
                    match method {
                        VariabilityMethod::LogNormal => {
                            let sigma2 = (1.0 + cov * cov).ln();
                            let mu = mean.ln() - sigma2 / 2.0;
                            (mu + sigma2.sqrt() * z).exp()
                        }
                        _ => (mean + mean * cov * z).max(0.0),
                    }
                })
                .collect(),
        }
    }
}
