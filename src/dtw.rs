//! Dynamic Time Warping variants and their ensemble.
//!
//! Three scorers run over `(frames, 63)` feature arrays: standard DTW with a
//! Sakoe-Chiba band, direction-similarity DTW that mixes velocity cosine
//! distance into the cell cost, and multi-feature DTW over position,
//! velocity, and acceleration. The ensemble converts each distance to a
//! similarity against a fixed ceiling and emits the weighted sum directly.

use ndarray::{Array2, ArrayView1, ArrayView2};

/// Empirical distance ceiling. Post-Procrustes distances for genuine matches
/// cluster well below 100; anything past this is not a match. Thresholds
/// calibrated against the legacy 1000.0 ceiling are invalid.
pub const MAX_DISTANCE: f64 = 150.0;

pub const DIRECTION_ALPHA: f64 = 0.6;
const FRAME_DT: f64 = 1.0 / 30.0;
const VELOCITY_EPSILON: f64 = 1e-6;

#[derive(Clone, Copy, Debug)]
pub struct FeatureWeights {
    pub position: f64,
    pub velocity: f64,
    pub acceleration: f64,
}

impl Default for FeatureWeights {
    fn default() -> Self {
        Self {
            position: 0.45,
            velocity: 0.40,
            acceleration: 0.15,
        }
    }
}

#[derive(Clone, Debug)]
pub struct EnhancedDtw {
    max_distance: f64,
    sakoe_chiba_radius: Option<usize>,
}

impl Default for EnhancedDtw {
    fn default() -> Self {
        Self {
            max_distance: MAX_DISTANCE,
            sakoe_chiba_radius: None,
        }
    }
}

impl EnhancedDtw {
    pub fn new(max_distance: f64, sakoe_chiba_radius: Option<usize>) -> Self {
        Self {
            max_distance,
            sakoe_chiba_radius,
        }
    }

    /// Standard DTW distance. With `use_band`, cells outside the Sakoe-Chiba
    /// band stay at infinity; the radius defaults to 10% of the longer
    /// sequence.
    pub fn dtw_distance(&self, a: ArrayView2<f64>, b: ArrayView2<f64>, use_band: bool) -> f64 {
        let n = a.nrows();
        let m = b.nrows();
        if n == 0 || m == 0 {
            return f64::INFINITY;
        }

        let radius = if use_band {
            self.sakoe_chiba_radius
                .unwrap_or_else(|| ((0.1 * n.max(m) as f64) as usize).max(1))
        } else {
            n.max(m)
        };

        let mut matrix = vec![f64::INFINITY; (n + 1) * (m + 1)];
        let idx = |i: usize, j: usize| i * (m + 1) + j;
        matrix[idx(0, 0)] = 0.0;

        for i in 1..=n {
            let j_start = i.saturating_sub(radius).max(1);
            let j_end = (i + radius).min(m);
            for j in j_start..=j_end {
                let cost = euclidean(a.row(i - 1), b.row(j - 1));
                let best = matrix[idx(i - 1, j)]
                    .min(matrix[idx(i, j - 1)])
                    .min(matrix[idx(i - 1, j - 1)]);
                matrix[idx(i, j)] = cost + best;
            }
        }

        matrix[idx(n, m)]
    }

    /// Direction-similarity DTW: cell cost blends positional distance with
    /// one minus the cosine of the two velocities.
    pub fn direction_similarity_dtw(
        &self,
        a: ArrayView2<f64>,
        b: ArrayView2<f64>,
        alpha: f64,
    ) -> f64 {
        let n = a.nrows();
        let m = b.nrows();
        if n == 0 || m == 0 {
            return f64::INFINITY;
        }

        let vel_a = velocity(a);
        let vel_b = velocity(b);

        let mut matrix = vec![f64::INFINITY; (n + 1) * (m + 1)];
        let idx = |i: usize, j: usize| i * (m + 1) + j;
        matrix[idx(0, 0)] = 0.0;

        for i in 1..=n {
            for j in 1..=m {
                let pos_dist = euclidean(a.row(i - 1), b.row(j - 1));

                let dir_dist = if i > 1 && j > 1 {
                    let va = vel_a.row(i - 2);
                    let vb = vel_b.row(j - 2);
                    let na = va.dot(&va).sqrt();
                    let nb = vb.dot(&vb).sqrt();
                    if na > VELOCITY_EPSILON && nb > VELOCITY_EPSILON {
                        1.0 - va.dot(&vb) / (na * nb)
                    } else {
                        0.0
                    }
                } else {
                    0.0
                };

                let cost = (1.0 - alpha) * pos_dist + alpha * dir_dist;
                let best = matrix[idx(i - 1, j)]
                    .min(matrix[idx(i, j - 1)])
                    .min(matrix[idx(i - 1, j - 1)]);
                matrix[idx(i, j)] = cost + best;
            }
        }

        matrix[idx(n, m)]
    }

    /// Multi-feature DTW: three independent standard passes over position,
    /// velocity, and acceleration, each distance divided by its sequence
    /// length, combined by weight. Empty derivative sequences contribute 0.
    pub fn multi_feature_dtw(
        &self,
        a: ArrayView2<f64>,
        b: ArrayView2<f64>,
        weights: FeatureWeights,
    ) -> f64 {
        let n = a.nrows();
        if n == 0 || b.nrows() == 0 {
            return f64::INFINITY;
        }

        let mut total = 0.0;

        if weights.position > 0.0 {
            let pos_dist = self.dtw_distance(a, b, false) / n as f64;
            total += weights.position * pos_dist;
        }

        let vel_a = velocity(a);
        let vel_b = velocity(b);
        if weights.velocity > 0.0 && vel_a.nrows() > 0 && vel_b.nrows() > 0 {
            let va = pad_rows(&vel_a, 1);
            let vb = pad_rows(&vel_b, 1);
            let vel_dist = self.dtw_distance(va.view(), vb.view(), false) / va.nrows() as f64;
            total += weights.velocity * vel_dist;
        }

        let acc_a = velocity(vel_a.view());
        let acc_b = velocity(vel_b.view());
        if weights.acceleration > 0.0 && acc_a.nrows() > 0 && acc_b.nrows() > 0 {
            let aa = pad_rows(&acc_a, 2);
            let ab = pad_rows(&acc_b, 2);
            let acc_dist = self.dtw_distance(aa.view(), ab.view(), false) / aa.nrows() as f64;
            total += weights.acceleration * acc_dist;
        }

        total
    }

    /// Convert a DTW distance to a similarity in [0, 1].
    pub fn similarity(&self, distance: f64) -> f64 {
        let normalized = (distance / self.max_distance).min(1.0);
        (1.0 - normalized).max(0.0)
    }
}

/// Forward-difference derivative, one fewer row than the input.
pub fn velocity(sequence: ArrayView2<f64>) -> Array2<f64> {
    let n = sequence.nrows();
    let d = sequence.ncols();
    if n < 2 {
        return Array2::zeros((0, d));
    }
    let mut out = Array2::zeros((n - 1, d));
    for i in 0..n - 1 {
        for j in 0..d {
            out[[i, j]] = (sequence[[i + 1, j]] - sequence[[i, j]]) / FRAME_DT;
        }
    }
    out
}

fn pad_rows(sequence: &Array2<f64>, extra: usize) -> Array2<f64> {
    let n = sequence.nrows();
    let d = sequence.ncols();
    let mut out = Array2::zeros((n + extra, d));
    for i in 0..n {
        for j in 0..d {
            out[[i, j]] = sequence[[i, j]];
        }
    }
    for i in n..n + extra {
        for j in 0..d {
            out[[i, j]] = sequence[[n - 1, j]];
        }
    }
    out
}

fn euclidean(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum::<f64>()
        .sqrt()
}

#[derive(Clone, Copy, Debug)]
pub struct EnsembleWeights {
    pub standard: f64,
    pub direction: f64,
    pub multi_feature: f64,
}

impl Default for EnsembleWeights {
    fn default() -> Self {
        Self {
            standard: 0.30,
            direction: 0.35,
            multi_feature: 0.35,
        }
    }
}

/// Weighted combination of the three DTW variants. The output is already a
/// similarity in [0, 1]; callers must never run it through the distance
/// conversion a second time.
#[derive(Clone, Debug, Default)]
pub struct DtwEnsemble {
    dtw: EnhancedDtw,
    weights: EnsembleWeights,
}

impl DtwEnsemble {
    pub fn new(dtw: EnhancedDtw, weights: EnsembleWeights) -> Self {
        Self { dtw, weights }
    }

    pub fn dtw(&self) -> &EnhancedDtw {
        &self.dtw
    }

    pub fn match_similarity(&self, a: ArrayView2<f64>, b: ArrayView2<f64>) -> f64 {
        let mut similarity = 0.0;

        if self.weights.standard > 0.0 {
            let dist = self.dtw.dtw_distance(a, b, true);
            similarity += self.weights.standard * self.dtw.similarity(dist);
        }
        if self.weights.direction > 0.0 {
            let dist = self.dtw.direction_similarity_dtw(a, b, DIRECTION_ALPHA);
            similarity += self.weights.direction * self.dtw.similarity(dist);
        }
        if self.weights.multi_feature > 0.0 {
            let dist = self.dtw.multi_feature_dtw(a, b, FeatureWeights::default());
            similarity += self.weights.multi_feature * self.dtw.similarity(dist);
        }

        similarity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(n: usize, offset: f64, step: f64) -> Array2<f64> {
        let mut out = Array2::zeros((n, 63));
        for i in 0..n {
            for j in 0..63 {
                out[[i, j]] = offset + step * i as f64 + j as f64 * 0.001;
            }
        }
        out
    }

    #[test]
    fn identical_sequences_have_zero_distance() {
        let a = ramp(20, 0.0, 0.01);
        let dtw = EnhancedDtw::default();
        assert!(dtw.dtw_distance(a.view(), a.view(), true).abs() < 1e-12);
        assert!(dtw.dtw_distance(a.view(), a.view(), false).abs() < 1e-12);
    }

    #[test]
    fn band_constrains_but_keeps_the_diagonal_reachable() {
        let a = ramp(60, 0.0, 0.01);
        let b = ramp(60, 0.05, 0.012);
        let dtw = EnhancedDtw::default();
        let banded = dtw.dtw_distance(a.view(), b.view(), true);
        let free = dtw.dtw_distance(a.view(), b.view(), false);
        assert!(banded.is_finite());
        // Restricting the warp path can only raise the distance.
        assert!(free <= banded + 1e-9);
    }

    #[test]
    fn direction_dtw_penalizes_opposite_motion() {
        let forward = ramp(20, 0.0, 0.02);
        let backward = ramp(20, 0.38, -0.02);
        let dtw = EnhancedDtw::default();
        let same = dtw.direction_similarity_dtw(forward.view(), forward.view(), DIRECTION_ALPHA);
        let opposite =
            dtw.direction_similarity_dtw(forward.view(), backward.view(), DIRECTION_ALPHA);
        assert!(opposite > same);
    }

    #[test]
    fn velocity_has_one_fewer_row() {
        let a = ramp(10, 0.0, 0.01);
        assert_eq!(velocity(a.view()).nrows(), 9);
        assert_eq!(velocity(ramp(1, 0.0, 0.0).view()).nrows(), 0);
    }

    #[test]
    fn multi_feature_handles_short_sequences() {
        let a = ramp(2, 0.0, 0.01);
        let b = ramp(2, 0.0, 0.01);
        let dist = EnhancedDtw::default().multi_feature_dtw(a.view(), b.view(), FeatureWeights::default());
        assert!(dist.is_finite());
    }

    #[test]
    fn similarity_is_clamped_to_unit_interval() {
        let dtw = EnhancedDtw::default();
        assert_eq!(dtw.similarity(0.0), 1.0);
        assert_eq!(dtw.similarity(1e9), 0.0);
        let mid = dtw.similarity(75.0);
        assert!(mid > 0.49 && mid < 0.51);
    }

    #[test]
    fn ensemble_self_match_beats_noisy_match() {
        let a = ramp(20, 0.0, 0.01);
        let mut noisy = a.clone();
        for (i, value) in noisy.iter_mut().enumerate() {
            *value += if i % 2 == 0 { 0.05 } else { -0.05 };
        }
        let ensemble = DtwEnsemble::default();
        let self_sim = ensemble.match_similarity(a.view(), a.view());
        let noisy_sim = ensemble.match_similarity(a.view(), noisy.view());
        assert!((0.0..=1.0).contains(&self_sim));
        assert!((0.0..=1.0).contains(&noisy_sim));
        assert!(self_sim > noisy_sim);
        assert!(self_sim > 0.99);
    }
}
