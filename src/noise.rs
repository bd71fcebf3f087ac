use blake3::Hasher;
use rand::{rngs::StdRng, Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use rand_distr::{Cauchy, Distribution, Exp};
use tracing::warn;

use crate::errors::{NodeDpError, NodeDpResult};

pub const DEFAULT_MAX_RESAMPLE_ATTEMPTS: u32 = 16;

pub struct NoiseCalibrator<R: RngCore = ChaCha20Rng> {
    rng: R,
    max_attempts: u32,
}

impl NoiseCalibrator<ChaCha20Rng> {
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self::with_rng(ChaCha20Rng::from_seed(seed))
    }

    /// Seeds the stream from OS entropy; the default for real releases.
    pub fn from_entropy() -> Self {
        let mut seed = [0u8; 32];
        StdRng::from_entropy().fill_bytes(&mut seed);
        Self::from_seed(seed)
    }

    /// Deterministic stream derived from a label, for reproducible runs.
    pub fn from_label(label: impl AsRef<[u8]>) -> Self {
        Self::from_seed(derive_seed(b"nodedp/noise/", label.as_ref()))
    }
}

impl<R: RngCore> NoiseCalibrator<R> {
    pub fn with_rng(rng: R) -> Self {
        Self {
            rng,
            max_attempts: DEFAULT_MAX_RESAMPLE_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// One draw from Laplace(0, `scale`), as the difference of two
    /// Exp(1/scale) draws.
    pub fn laplace(&mut self, scale: f64) -> NodeDpResult<f64> {
        validate_scale(scale)?;
        let exp = Exp::new(1.0 / scale).map_err(|_| NodeDpError::InvalidScale(scale))?;
        self.finite_draw(|rng| exp.sample(rng) - exp.sample(rng))
    }

    /// One draw from Cauchy(0, `scale`).
    pub fn cauchy(&mut self, scale: f64) -> NodeDpResult<f64> {
        validate_scale(scale)?;
        let cauchy = Cauchy::new(0.0, scale).map_err(|_| NodeDpError::InvalidScale(scale))?;
        self.finite_draw(|rng| cauchy.sample(rng))
    }

    /// Uniform index in `0..len`; `len` must be non-zero.
    pub fn uniform_index(&mut self, len: usize) -> usize {
        self.rng.gen_range(0..len)
    }

    fn finite_draw<F>(&mut self, mut draw: F) -> NodeDpResult<f64>
    where
        F: FnMut(&mut R) -> f64,
    {
        for attempt in 1..=self.max_attempts {
            let value = draw(&mut self.rng);
            if value.is_finite() {
                return Ok(value);
            }
            warn!(attempt, "discarding non-finite noise draw");
        }
        Err(NodeDpError::InvalidNoiseDraw {
            attempts: self.max_attempts,
        })
    }
}

/// Domain-separated 32-byte seed from a label.
pub fn derive_seed(domain: &[u8], label: &[u8]) -> [u8; 32] {
    let mut hasher = Hasher::new();
    hasher.update(domain);
    hasher.update(label);
    let mut out = [0u8; 32];
    out.copy_from_slice(hasher.finalize().as_bytes());
    out
}

pub fn validate_scale(scale: f64) -> NodeDpResult<()> {
    if !scale.is_finite() || scale <= 0.0 {
        return Err(NodeDpError::InvalidScale(scale));
    }
    Ok(())
}

pub fn validate_epsilon(epsilon: f64) -> NodeDpResult<()> {
    if !epsilon.is_finite() || epsilon <= 0.0 {
        return Err(NodeDpError::InvalidEpsilon(epsilon));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn median(mut values: Vec<f64>) -> f64 {
        values.sort_by(|a, b| a.total_cmp(b));
        values[values.len() / 2]
    }

    #[test]
    fn laplace_moments_track_scale() {
        let mut noise = NoiseCalibrator::from_label("laplace-moments");
        let draws: Vec<f64> = (0..20_000).map(|_| noise.laplace(2.0).unwrap()).collect();
        let mean = draws.iter().sum::<f64>() / draws.len() as f64;
        let mean_abs = draws.iter().map(|d| d.abs()).sum::<f64>() / draws.len() as f64;
        assert!(mean.abs() < 0.1, "mean {mean}");
        // E|X| = b for Laplace(0, b).
        assert!((mean_abs - 2.0).abs() < 0.1, "mean |x| {mean_abs}");
    }

    #[test]
    fn cauchy_is_centered_with_scale_as_half_iqr() {
        let mut noise = NoiseCalibrator::from_label("cauchy-median");
        let draws: Vec<f64> = (0..20_000).map(|_| noise.cauchy(3.0).unwrap()).collect();
        assert!(median(draws.clone()).abs() < 0.2);
        let abs: Vec<f64> = draws.iter().map(|d| d.abs()).collect();
        // Median of |X| is the scale for Cauchy(0, c).
        assert!((median(abs) - 3.0).abs() < 0.2);
    }

    #[test]
    fn rejects_degenerate_scales_before_drawing() {
        let mut noise = NoiseCalibrator::from_label("scales");
        for scale in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(noise.laplace(scale), Err(NodeDpError::InvalidScale(_))));
            assert!(matches!(noise.cauchy(scale), Err(NodeDpError::InvalidScale(_))));
        }
    }

    #[test]
    fn independent_streams_differ() {
        let mut a = NoiseCalibrator::from_label("release-a");
        let mut b = NoiseCalibrator::from_label("release-b");
        assert_ne!(a.laplace(1.0).unwrap(), b.laplace(1.0).unwrap());

        let mut left = NoiseCalibrator::from_label("same");
        let mut right = NoiseCalibrator::from_label("same");
        assert_eq!(left.cauchy(1.0).unwrap(), right.cauchy(1.0).unwrap());
    }

    #[test]
    fn epsilon_validation() {
        assert!(validate_epsilon(0.5).is_ok());
        assert!(validate_epsilon(0.0).is_err());
        assert!(validate_epsilon(f64::NAN).is_err());
    }
}
