/// Zero-current output of an ideal 12-bit sensor, used until calibration runs.
pub const NOMINAL_OFFSET: f64 = 2048.0;

/// Tracks the DC offset of the current sensor with an exponential moving average.
///
/// The sensor's zero-current output drifts with temperature, so the estimate
/// keeps adapting on every sample taken during normal operation, not only
/// during the start-up calibration.
#[derive(Debug, Clone)]
pub struct CurrentOffsetEstimator {
    value: f64,
    decay: f64,
}

impl CurrentOffsetEstimator {
    /// Creates an estimator seeded at `initial`, normally the ADC midpoint.
    /// `decay` is the weight kept by the previous estimate on each update.
    pub fn new(initial: f64, decay: f64) -> Self {
        Self {
            value: initial,
            decay,
        }
    }

    /// Replaces the estimate outright, used by the start-up calibration.
    pub fn seed(&mut self, offset: f64) {
        self.value = offset;
    }

    /// Folds a raw sample into the estimate and returns the new estimate.
    pub fn update(&mut self, raw: f64) -> f64 {
        self.value = self.decay * self.value + (1.0 - self.decay) * raw;
        self.value
    }

    pub fn value(&self) -> f64 {
        self.value
    }
}

impl Default for CurrentOffsetEstimator {
    fn default() -> Self {
        Self::new(NOMINAL_OFFSET, 0.999)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_estimator_starts_at_midpoint() {
        let estimator = CurrentOffsetEstimator::default();
        assert_eq!(estimator.value(), NOMINAL_OFFSET);
    }

    #[test]
    fn test_new_estimator_starts_at_given_offset() {
        let estimator = CurrentOffsetEstimator::new(512.0, 0.999);
        assert_eq!(estimator.value(), 512.0);
    }

    #[test]
    fn test_seed_replaces_estimate() {
        let mut estimator = CurrentOffsetEstimator::default();
        estimator.seed(1875.5);
        assert_eq!(estimator.value(), 1875.5);
    }

    #[test]
    fn test_single_update_weights() {
        let mut estimator = CurrentOffsetEstimator::new(NOMINAL_OFFSET, 0.999);
        estimator.seed(2000.0);
        let result = estimator.update(3000.0);
        // 0.999 * 2000 + 0.001 * 3000
        assert!((result - 2001.0).abs() < 1e-9);
    }

    #[test]
    fn test_update_with_current_value_is_stable() {
        let mut estimator = CurrentOffsetEstimator::default();
        estimator.seed(1990.0);
        for _ in 0..1000 {
            estimator.update(1990.0);
        }
        assert!((estimator.value() - 1990.0).abs() < 1e-6);
    }

    #[test]
    fn test_converges_on_noisy_stream() {
        let true_offset = 1960.0;
        let mut estimator = CurrentOffsetEstimator::default();

        // Bounded noise oscillating around the true offset
        for i in 0..20_000 {
            let noise = match i % 4 {
                0 => 6.0,
                1 => -3.0,
                2 => -6.0,
                _ => 3.0,
            };
            estimator.update(true_offset + noise);
        }

        assert!(
            (estimator.value() - true_offset).abs() < 0.1,
            "estimate {} did not converge on {}",
            estimator.value(),
            true_offset
        );
    }

    #[test]
    fn test_faster_decay_tracks_step_sooner() {
        let mut slow = CurrentOffsetEstimator::new(NOMINAL_OFFSET, 0.999);
        let mut fast = CurrentOffsetEstimator::new(NOMINAL_OFFSET, 0.99);

        for _ in 0..500 {
            slow.update(2100.0);
            fast.update(2100.0);
        }

        assert!((fast.value() - 2100.0).abs() < (slow.value() - 2100.0).abs());
    }
}
