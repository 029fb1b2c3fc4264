use std::collections::VecDeque;
use std::fmt;

/// Which leg of the pair is priced rich relative to the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Regime {
    EtfRich,
    FutureRich,
    Neutral,
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Regime::EtfRich => write!(f, "etf_rich"),
            Regime::FutureRich => write!(f, "future_rich"),
            Regime::Neutral => write!(f, "neutral"),
        }
    }
}

/// Rolling window of mid-price divergences (ETF mid minus future mid),
/// capacity-bounded with FIFO eviction.
///
/// Classification compares the newest divergence against the mean and
/// population standard deviation of the trailing samples, which exclude the
/// newest value from its own baseline. The comparison is done directly
/// against the sigma band rather than as a z-ratio, so a constant trailing
/// window (zero deviation) degenerates to a raw comparison with the mean.
#[derive(Debug)]
pub struct DivergenceTracker {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl DivergenceTracker {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, etf_mid: i64, future_mid: i64) {
        if self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back((etf_mid - future_mid) as f64);
    }

    pub fn latest(&self) -> Option<f64> {
        self.samples.back().copied()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Classifies the newest divergence against the trailing window. With
    /// fewer than two trailing samples there is no baseline and the regime
    /// stays neutral.
    pub fn classify(&self, k_sigma: f64) -> Regime {
        if self.samples.len() < 3 {
            return Regime::Neutral;
        }
        let latest = *self.samples.back().unwrap();
        let trailing: Vec<f64> = self
            .samples
            .iter()
            .take(self.samples.len() - 1)
            .copied()
            .collect();
        let (mean, std) = match mean_std(&trailing) {
            Some(stats) => stats,
            None => return Regime::Neutral,
        };
        if latest > mean + k_sigma * std {
            Regime::EtfRich
        } else if latest < mean - k_sigma * std {
            Regime::FutureRich
        } else {
            Regime::Neutral
        }
    }
}

fn mean_std(values: &[f64]) -> Option<(f64, f64)> {
    if values.is_empty() {
        return None;
    }
    let mean = values.iter().copied().sum::<f64>() / values.len() as f64;
    let var = values
        .iter()
        .map(|v| {
            let d = v - mean;
            d * d
        })
        .sum::<f64>()
        / values.len() as f64;
    Some((mean, var.sqrt()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker_with(samples: &[(i64, i64)], capacity: usize) -> DivergenceTracker {
        let mut tracker = DivergenceTracker::new(capacity);
        for &(etf, fut) in samples {
            tracker.push(etf, fut);
        }
        tracker
    }

    #[test]
    fn too_few_trailing_samples_stay_neutral() {
        let tracker = tracker_with(&[(10_030, 10_000)], 8);
        assert_eq!(tracker.classify(1.0), Regime::Neutral);
        // one trailing sample is still not a baseline
        let tracker = tracker_with(&[(10_000, 10_000), (10_030, 10_000)], 8);
        assert_eq!(tracker.classify(1.0), Regime::Neutral);
    }

    #[test]
    fn constant_baseline_with_jump_classifies_etf_rich() {
        // trailing mean 0, trailing std 0, latest divergence 30 cents
        let tracker = tracker_with(
            &[
                (10_000, 10_000),
                (10_000, 10_000),
                (10_000, 10_000),
                (10_000, 10_000),
                (10_030, 10_000),
            ],
            5,
        );
        assert_eq!(tracker.classify(1.0), Regime::EtfRich);
    }

    #[test]
    fn negative_jump_classifies_future_rich() {
        let tracker = tracker_with(
            &[
                (10_000, 10_000),
                (10_000, 10_000),
                (10_000, 10_000),
                (9_970, 10_000),
            ],
            5,
        );
        assert_eq!(tracker.classify(1.0), Regime::FutureRich);
    }

    #[test]
    fn divergence_inside_sigma_band_is_neutral() {
        // trailing samples alternate +-10, std 10; latest +10 sits on the band
        let tracker = tracker_with(
            &[
                (10_010, 10_000),
                (9_990, 10_000),
                (10_010, 10_000),
                (9_990, 10_000),
                (10_010, 10_000),
            ],
            8,
        );
        assert_eq!(tracker.classify(1.0), Regime::Neutral);
    }

    #[test]
    fn classification_is_deterministic() {
        let tracker = tracker_with(&[(10_000, 10_000), (10_000, 10_000), (10_030, 10_000)], 8);
        let first = tracker.classify(1.0);
        assert_eq!(first, tracker.classify(1.0));
    }

    #[test]
    fn history_is_bounded_with_fifo_eviction() {
        let mut tracker = DivergenceTracker::new(3);
        for i in 0..10 {
            tracker.push(10_000 + i, 10_000);
        }
        assert_eq!(tracker.len(), 3);
        assert_eq!(tracker.latest(), Some(9.0));
    }

    #[test]
    fn mean_std_matches_population_formula() {
        let (mean, std) = mean_std(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert!((mean - 5.0).abs() < 1e-12);
        assert!((std - 2.0).abs() < 1e-12);
    }
}
