//! Robust weighted consensus over route-progress samples.

/// One report reduced to a position and a recency weight.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub progress: f64,
    pub weight: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Consensus {
    pub progress: f64,
    pub confidence: f64,
    pub inliers: usize,
    pub discarded: usize,
}

/// Gates applied around the consensus centre, in stops.
#[derive(Debug, Clone, Copy)]
pub struct Gates {
    /// Maximum distance ahead of the centre.
    pub ahead: f64,
    /// Maximum distance behind the centre.
    pub behind: f64,
}

/// Weight after `age_secs` with the given half-life.
pub fn recency_weight(age_secs: f64, half_life_secs: f64) -> f64 {
    0.5_f64.powf(age_secs.max(0.0) / half_life_secs)
}

/// Lower weighted median: the smallest value at which the cumulative weight
/// reaches half the total.
pub fn weighted_median(samples: &[Sample]) -> Option<f64> {
    let mut sorted: Vec<Sample> = samples
        .iter()
        .copied()
        .filter(|s| s.weight > 0.0)
        .collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(|a, b| a.progress.total_cmp(&b.progress));

    let half = sorted.iter().map(|s| s.weight).sum::<f64>() / 2.0;
    let mut cumulative = 0.0;
    for sample in &sorted {
        cumulative += sample.weight;
        if cumulative >= half {
            return Some(sample.progress);
        }
    }
    sorted.last().map(|s| s.progress)
}

fn split(samples: &[Sample], centre: f64, gates: Gates) -> (Vec<Sample>, Vec<Sample>) {
    samples
        .iter()
        .copied()
        .filter(|s| s.weight > 0.0)
        .partition(|s| {
            let delta = s.progress - centre;
            delta <= gates.ahead && -delta <= gates.behind
        })
}

/// Weighted mean of the samples that survive the gates.
///
/// The gates are centred on `anchor`, the running estimate, as long as at
/// least as many reports agree with it as disagree. Otherwise, or with no
/// anchor, they are centred on the weighted median.
///
/// `confidence` grows with the inlier count, shrinks with their spread and
/// with the share of weight that had to be thrown away.
pub fn consensus(samples: &[Sample], gates: Gates, anchor: Option<f64>) -> Option<Consensus> {
    let anchored = anchor
        .map(|centre| split(samples, centre, gates))
        .filter(|(inliers, outliers)| !inliers.is_empty() && inliers.len() >= outliers.len());

    let (inliers, outliers) = match anchored {
        Some(parts) => parts,
        None => split(samples, weighted_median(samples)?, gates),
    };

    let inlier_weight: f64 = inliers.iter().map(|s| s.weight).sum();
    let outlier_weight: f64 = outliers.iter().map(|s| s.weight).sum();
    if inlier_weight <= 0.0 {
        return None;
    }

    let mean = inliers.iter().map(|s| s.progress * s.weight).sum::<f64>() / inlier_weight;
    let variance = inliers
        .iter()
        .map(|s| s.weight * (s.progress - mean).powi(2))
        .sum::<f64>()
        / inlier_weight;

    let n = inliers.len() as f64;
    let corroboration = 1.0 - (-n / 2.0).exp();
    let agreement = 1.0 / (1.0 + variance.sqrt());
    let support = inlier_weight / (inlier_weight + outlier_weight);

    Some(Consensus {
        progress: mean,
        confidence: (corroboration * agreement * support).clamp(0.0, 1.0),
        inliers: inliers.len(),
        discarded: outliers.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const GATES: Gates = Gates {
        ahead: 2.0,
        behind: 0.5,
    };

    fn sample(progress: f64, weight: f64) -> Sample {
        Sample { progress, weight }
    }

    #[test]
    fn test_recency_weight_halves() {
        assert!((recency_weight(0.0, 120.0) - 1.0).abs() < 1e-12);
        assert!((recency_weight(120.0, 120.0) - 0.5).abs() < 1e-12);
        assert!((recency_weight(240.0, 120.0) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_weighted_median_follows_weight() {
        let samples = [sample(1.0, 1.0), sample(5.0, 3.0)];
        assert_eq!(weighted_median(&samples), Some(5.0));
        assert_eq!(weighted_median(&[]), None);
    }

    #[test]
    fn test_single_far_report_is_discarded() {
        let samples = [
            sample(3.0, 1.0),
            sample(3.1, 1.0),
            sample(2.9, 1.0),
            sample(9.0, 1.0),
        ];
        let result = consensus(&samples, GATES, None).unwrap();
        assert_eq!(result.inliers, 3);
        assert_eq!(result.discarded, 1);
        assert!((result.progress - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_backwards_report_is_discarded() {
        let samples = [sample(2.0, 1.0), sample(2.0, 1.0), sample(1.0, 1.0)];
        let result = consensus(&samples, GATES, None).unwrap();
        assert_eq!(result.discarded, 1);
        assert!((result.progress - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_confidence_grows_with_corroboration() {
        let one = consensus(&[sample(1.0, 1.0)], GATES, None).unwrap();
        let three = consensus(
            &[sample(1.0, 1.0), sample(1.0, 1.0), sample(1.0, 1.0)],
            GATES,
            None,
        )
        .unwrap();
        assert!(three.confidence > one.confidence);
    }

    #[test]
    fn test_confidence_drops_with_spread() {
        let tight = consensus(
            &[sample(2.0, 1.0), sample(2.0, 1.0), sample(2.1, 1.0)],
            GATES,
            None,
        )
        .unwrap();
        let loose = consensus(
            &[sample(2.0, 1.0), sample(2.4, 1.0), sample(3.8, 1.0)],
            GATES,
            None,
        )
        .unwrap();
        assert!(tight.confidence > loose.confidence);
    }

    #[test]
    fn test_anchor_outweighs_single_fresh_report() {
        // An aged cluster around 1.3 and one fresh claim at 0.
        let samples = [
            sample(1.0, 0.18),
            sample(1.0, 0.19),
            sample(2.0, 0.2),
            sample(0.0, 1.0),
        ];
        assert_eq!(weighted_median(&samples), Some(0.0));

        let result = consensus(&samples, GATES, Some(1.35)).unwrap();
        assert_eq!(result.inliers, 3);
        assert_eq!(result.discarded, 1);
        assert!(result.progress > 1.0);
    }

    #[test]
    fn test_majority_moves_away_from_anchor() {
        let samples = [sample(1.0, 1.0), sample(1.0, 1.0), sample(4.0, 0.5)];
        let result = consensus(&samples, GATES, Some(4.0)).unwrap();
        assert_eq!(result.inliers, 2);
        assert!((result.progress - 1.0).abs() < 1e-9);
    }
}
