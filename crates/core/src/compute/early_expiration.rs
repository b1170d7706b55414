//! Probabilistic early expiration ("XFetch").
//!
//! A hit is recomputed ahead of its expiry when
//! `expiry <= now - ctime * beta * ln(sample)` with `sample` uniform on
//! `(0, 1]`. The closer `now` gets to `expiry`, the likelier the check
//! fires; slow computations (large `ctime`) start refreshing earlier.

use cachette_domain::ItemMetadata;
use rand::Rng;

/// Decide whether a hit should be recomputed before it expires.
///
/// `now` is seconds since UNIX epoch and `sample` must lie in `(0, 1]`.
/// `beta = INFINITY` always recomputes, `beta = 0` never does, and items
/// without both an expiry and a computation time are never refreshed
/// early.
#[must_use]
pub fn should_recompute_early(metadata: &ItemMetadata, beta: f64, now: f64, sample: f64) -> bool {
    if beta.is_infinite() && beta.is_sign_positive() {
        return true;
    }
    if beta <= 0.0 {
        return false;
    }
    let (Some(expiry), Some(ctime_ms)) = (metadata.expiry, metadata.ctime_ms) else {
        return false;
    };
    expiry <= now - f64::from(ctime_ms) / 1000.0 * beta * sample.ln()
}

/// Uniform sample on `(0, 1]`, never zero so its logarithm is finite.
pub fn sample(rng: &mut impl Rng) -> f64 {
    1.0 - rng.gen::<f64>()
}

#[cfg(test)]
mod tests {
    //! Unit tests for compute::early_expiration.
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    fn metadata(expiry: f64, ctime_ms: u32) -> ItemMetadata {
        ItemMetadata { expiry: Some(expiry), ctime_ms: Some(ctime_ms), ..ItemMetadata::default() }
    }

    #[allow(clippy::cast_precision_loss)]
    fn recompute_rate(meta: &ItemMetadata, now: f64, trials: usize) -> f64 {
        let mut rng = StdRng::seed_from_u64(7);
        let fired = (0..trials)
            .filter(|_| should_recompute_early(meta, 1.0, now, sample(&mut rng)))
            .count();
        fired as f64 / trials as f64
    }

    /// Validates the probabilistic early expiration monotonicity scenario.
    ///
    /// Assertions:
    /// - Ensures the recompute rate closer to expiry is at least the rate
    ///   further away.
    /// - Confirms the rate far from expiry is small and near expiry is
    ///   large.
    #[test]
    fn test_rate_rises_towards_expiry() {
        let meta = metadata(1_000.0, 1_000);
        let far = recompute_rate(&meta, 995.0, 20_000);
        let near = recompute_rate(&meta, 999.5, 20_000);
        assert!(near >= far, "near={near} far={far}");
        assert!(far < 0.02, "far={far}");
        assert!(near > 0.5, "near={near}");
    }

    /// Validates `should_recompute_early` for the beta extremes.
    ///
    /// Assertions:
    /// - Ensures infinite beta always recomputes, even without metadata.
    /// - Ensures zero beta never recomputes, even past expiry.
    #[test]
    fn test_beta_extremes() {
        let meta = metadata(1_000.0, 500);
        assert!(should_recompute_early(&ItemMetadata::default(), f64::INFINITY, 0.0, 0.5));
        assert!(!should_recompute_early(&meta, 0.0, 2_000.0, 0.5));
    }

    /// Validates `should_recompute_early` without computation metadata.
    ///
    /// Assertions:
    /// - Ensures items lacking ctime or expiry are never refreshed early.
    #[test]
    fn test_missing_metadata() {
        let no_ctime = ItemMetadata { expiry: Some(1_000.0), ..ItemMetadata::default() };
        assert!(!should_recompute_early(&no_ctime, 1.0, 999.999, 1e-9));
        assert!(!should_recompute_early(&ItemMetadata::default(), 1.0, 999.0, 1e-9));
    }

    /// Validates `sample` stays within `(0, 1]`.
    ///
    /// Assertions:
    /// - Ensures no sample is zero or above one.
    #[test]
    fn test_sample_range() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..10_000 {
            let s = sample(&mut rng);
            assert!(s > 0.0 && s <= 1.0);
        }
    }
}
