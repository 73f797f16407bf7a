//! Signature-based indexing: k-means clustering plus early-rejection
//! filters, both executed before any DTW work. The index ranks nothing;
//! it only shrinks the candidate set the matcher will score.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::signature::{extract_signature, GestureSignature};
use crate::types::GestureTemplate;

const CLUSTER_FEATURES: usize = 7;
const KMEANS_SEED: u64 = 42;
const KMEANS_INITS: usize = 10;
const KMEANS_MAX_ITERS: usize = 300;
const CLUSTERING_MIN_TEMPLATES: usize = 10;
const TOP_CLUSTERS: usize = 3;

pub const MAX_CANDIDATES: usize = 50;
/// Template count past which strict filtering engages automatically.
pub const STRICT_FILTERING_THRESHOLD: usize = 500;

/// Fast checks that reject obviously dissimilar templates before DTW.
#[derive(Clone, Debug)]
pub struct EarlyRejectionFilter {
    pub frame_count_tolerance: f64,
    pub centroid_distance_threshold: f64,
    pub trajectory_tolerance: f64,
    pub velocity_tolerance: f64,
}

impl Default for EarlyRejectionFilter {
    fn default() -> Self {
        Self {
            frame_count_tolerance: 0.5,
            centroid_distance_threshold: 0.3,
            trajectory_tolerance: 0.6,
            velocity_tolerance: 0.7,
        }
    }
}

impl EarlyRejectionFilter {
    /// Returns the rejection reason, or `None` when the template survives.
    /// Strict mode tightens the frame/trajectory/velocity tolerances by
    /// 0.7/0.8/0.8; handedness and centroid keep factor 1.0.
    pub fn rejection_reason(
        &self,
        input: &GestureSignature,
        stored: &GestureSignature,
        strict: bool,
    ) -> Option<&'static str> {
        let frame_tol = self.frame_count_tolerance * if strict { 0.7 } else { 1.0 };
        let traj_tol = self.trajectory_tolerance * if strict { 0.8 } else { 1.0 };
        let vel_tol = self.velocity_tolerance * if strict { 0.8 } else { 1.0 };

        let frame_diff = input.frame_count.abs_diff(stored.frame_count) as f64;
        let frame_ratio = frame_diff / input.frame_count.max(stored.frame_count) as f64;
        if frame_ratio > frame_tol {
            return Some("frame_count");
        }

        if input.handedness != stored.handedness {
            return Some("handedness");
        }

        let centroid_dist = {
            let dx = input.centroid[0] - stored.centroid[0];
            let dy = input.centroid[1] - stored.centroid[1];
            let dz = input.centroid[2] - stored.centroid[2];
            (dx * dx + dy * dy + dz * dz).sqrt()
        };
        if centroid_dist > self.centroid_distance_threshold {
            return Some("centroid");
        }

        let traj_diff = (input.trajectory_length - stored.trajectory_length).abs();
        let traj_ratio = traj_diff / input.trajectory_length.max(stored.trajectory_length).max(1e-6);
        if traj_ratio > traj_tol {
            return Some("trajectory_length");
        }

        let vel_diff = (input.velocity_mean - stored.velocity_mean).abs();
        let vel_ratio = vel_diff / input.velocity_mean.max(stored.velocity_mean).max(1e-6);
        if vel_ratio > vel_tol {
            return Some("velocity_mean");
        }

        None
    }
}

#[derive(Clone, Debug, Default)]
pub struct IndexStats {
    pub total_templates: usize,
    pub after_clustering: usize,
    pub after_filtering: usize,
    pub final_candidates: usize,
}

struct FittedClusters {
    mean: [f64; CLUSTER_FEATURES],
    std: [f64; CLUSTER_FEATURES],
    centers: Vec<[f64; CLUSTER_FEATURES]>,
}

impl FittedClusters {
    fn standardize(&self, features: &[f64; CLUSTER_FEATURES]) -> [f64; CLUSTER_FEATURES] {
        let mut out = [0.0; CLUSTER_FEATURES];
        for i in 0..CLUSTER_FEATURES {
            out[i] = (features[i] - self.mean[i]) / self.std[i];
        }
        out
    }

    fn closest_clusters(&self, features: &[f64; CLUSTER_FEATURES], top_k: usize) -> Vec<usize> {
        let standardized = self.standardize(features);
        let mut distances: Vec<(usize, f64)> = self
            .centers
            .iter()
            .enumerate()
            .map(|(i, center)| (i, squared_distance(&standardized, center)))
            .collect();
        distances.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        distances
            .into_iter()
            .take(top_k.min(self.centers.len()))
            .map(|(i, _)| i)
            .collect()
    }
}

pub struct GestureIndexer {
    max_candidates: usize,
    strict_filtering: bool,
    filter: EarlyRejectionFilter,
    clusters: Option<FittedClusters>,
    signatures: HashMap<i64, GestureSignature>,
}

impl Default for GestureIndexer {
    fn default() -> Self {
        Self::new()
    }
}

impl GestureIndexer {
    pub fn new() -> Self {
        Self {
            max_candidates: MAX_CANDIDATES,
            strict_filtering: false,
            filter: EarlyRejectionFilter::default(),
            clusters: None,
            signatures: HashMap::new(),
        }
    }

    pub fn strict_filtering(&self) -> bool {
        self.strict_filtering
    }

    pub fn set_strict_filtering(&mut self, strict: bool) {
        self.strict_filtering = strict;
    }

    /// Rebuild the whole index. Called whenever any template is created,
    /// updated, or deleted.
    pub fn rebuild(&mut self, templates: &[GestureTemplate]) {
        self.signatures.clear();
        self.clusters = None;

        let mut signatures = Vec::with_capacity(templates.len());
        for template in templates {
            match extract_signature(template.id, template.frames()) {
                Ok(signature) => signatures.push(signature),
                Err(err) => {
                    log::warn!("skipping signature for template {}: {err}", template.id)
                }
            }
        }

        if signatures.len() >= CLUSTERING_MIN_TEMPLATES {
            let features: Vec<[f64; CLUSTER_FEATURES]> =
                signatures.iter().map(cluster_features).collect();
            let (fitted, labels) = fit_kmeans(&features);
            for (signature, label) in signatures.iter_mut().zip(labels) {
                signature.cluster_id = Some(label);
            }
            log::info!(
                "clustered {} templates into {} clusters",
                signatures.len(),
                fitted.centers.len()
            );
            self.clusters = Some(fitted);
        }

        for signature in signatures {
            self.signatures.insert(signature.gesture_id, signature);
        }
    }

    /// Select candidates for one query. Clustering first (when fitted), then
    /// early rejection, then the size cap in insertion order.
    pub fn candidates<'a>(
        &self,
        input: &GestureSignature,
        templates: &'a [GestureTemplate],
    ) -> (Vec<&'a GestureTemplate>, IndexStats) {
        let mut stats = IndexStats {
            total_templates: templates.len(),
            ..IndexStats::default()
        };

        let mut survivors: Vec<&GestureTemplate> = templates.iter().collect();

        if let Some(clusters) = &self.clusters {
            let closest = clusters.closest_clusters(&cluster_features(input), TOP_CLUSTERS);
            survivors.retain(|template| {
                self.signatures
                    .get(&template.id)
                    .and_then(|sig| sig.cluster_id)
                    .is_some_and(|cluster| closest.contains(&cluster))
            });
        }
        stats.after_clustering = survivors.len();

        let mut filtered = Vec::with_capacity(survivors.len());
        for template in survivors {
            let owned;
            let stored = match self.signatures.get(&template.id) {
                Some(signature) => signature,
                None => match extract_signature(template.id, template.frames()) {
                    Ok(signature) => {
                        owned = signature;
                        &owned
                    }
                    Err(err) => {
                        log::warn!("no signature for template {}: {err}", template.id);
                        continue;
                    }
                },
            };
            match self
                .filter
                .rejection_reason(input, stored, self.strict_filtering)
            {
                Some(reason) => {
                    log::debug!("template {} rejected: {reason}", template.id);
                }
                None => filtered.push(template),
            }
        }
        stats.after_filtering = filtered.len();

        if filtered.len() > self.max_candidates {
            log::warn!(
                "{} candidates survive filtering, capping at {}",
                filtered.len(),
                self.max_candidates
            );
            filtered.truncate(self.max_candidates);
        }
        stats.final_candidates = filtered.len();

        (filtered, stats)
    }
}

fn cluster_features(signature: &GestureSignature) -> [f64; CLUSTER_FEATURES] {
    [
        signature.frame_count as f64 / 100.0,
        signature.centroid[0],
        signature.centroid[1],
        signature.centroid[2],
        signature.trajectory_length,
        signature.velocity_mean,
        signature.velocity_std,
    ]
}

/// Seeded Lloyd k-means: k = clamp(floor(sqrt(N)), 3, 50), 10 restarts, up
/// to 300 iterations each, best inertia wins. Deterministic by seed.
fn fit_kmeans(features: &[[f64; CLUSTER_FEATURES]]) -> (FittedClusters, Vec<usize>) {
    let n = features.len();
    let k = ((n as f64).sqrt().floor() as usize).clamp(3, 50).min(n);

    let (mean, std) = feature_moments(features);
    let standardized: Vec<[f64; CLUSTER_FEATURES]> = features
        .iter()
        .map(|f| {
            let mut out = [0.0; CLUSTER_FEATURES];
            for i in 0..CLUSTER_FEATURES {
                out[i] = (f[i] - mean[i]) / std[i];
            }
            out
        })
        .collect();

    let mut rng = StdRng::seed_from_u64(KMEANS_SEED);
    let mut best: Option<(Vec<[f64; CLUSTER_FEATURES]>, Vec<usize>, f64)> = None;

    for _ in 0..KMEANS_INITS {
        let mut indices: Vec<usize> = (0..n).collect();
        indices.shuffle(&mut rng);
        let mut centers: Vec<[f64; CLUSTER_FEATURES]> =
            indices[..k].iter().map(|&i| standardized[i]).collect();

        let mut labels = vec![0usize; n];
        for _ in 0..KMEANS_MAX_ITERS {
            let mut changed = false;
            for (i, point) in standardized.iter().enumerate() {
                let label = nearest_center(point, &centers);
                if labels[i] != label {
                    labels[i] = label;
                    changed = true;
                }
            }

            let mut sums = vec![[0.0; CLUSTER_FEATURES]; k];
            let mut counts = vec![0usize; k];
            for (point, &label) in standardized.iter().zip(&labels) {
                for d in 0..CLUSTER_FEATURES {
                    sums[label][d] += point[d];
                }
                counts[label] += 1;
            }
            for c in 0..k {
                if counts[c] > 0 {
                    for d in 0..CLUSTER_FEATURES {
                        centers[c][d] = sums[c][d] / counts[c] as f64;
                    }
                }
            }

            if !changed {
                break;
            }
        }

        let inertia: f64 = standardized
            .iter()
            .zip(&labels)
            .map(|(point, &label)| squared_distance(point, &centers[label]))
            .sum();

        if best.as_ref().is_none_or(|(_, _, best_inertia)| inertia < *best_inertia) {
            best = Some((centers, labels, inertia));
        }
    }

    let (centers, labels, _) = best.expect("at least one k-means initialization ran");
    (
        FittedClusters {
            mean,
            std,
            centers,
        },
        labels,
    )
}

fn feature_moments(
    features: &[[f64; CLUSTER_FEATURES]],
) -> ([f64; CLUSTER_FEATURES], [f64; CLUSTER_FEATURES]) {
    let n = features.len() as f64;
    let mut mean = [0.0; CLUSTER_FEATURES];
    for f in features {
        for i in 0..CLUSTER_FEATURES {
            mean[i] += f[i];
        }
    }
    for m in &mut mean {
        *m /= n;
    }

    let mut std = [0.0; CLUSTER_FEATURES];
    for f in features {
        for i in 0..CLUSTER_FEATURES {
            let d = f[i] - mean[i];
            std[i] += d * d;
        }
    }
    for s in &mut std {
        *s = (*s / n).sqrt();
        if *s == 0.0 {
            *s = 1.0;
        }
    }

    (mean, std)
}

fn nearest_center(point: &[f64; CLUSTER_FEATURES], centers: &[[f64; CLUSTER_FEATURES]]) -> usize {
    let mut best = 0;
    let mut best_dist = f64::MAX;
    for (i, center) in centers.iter().enumerate() {
        let dist = squared_distance(point, center);
        if dist < best_dist {
            best_dist = dist;
            best = i;
        }
    }
    best
}

fn squared_distance(a: &[f64; CLUSTER_FEATURES], b: &[f64; CLUSTER_FEATURES]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{swipe_frames, template_from_frames};
    use crate::types::Handedness;

    fn swipe_template(id: i64, from: [f64; 2], to: [f64; 2]) -> GestureTemplate {
        template_from_frames(id, swipe_frames(30, from, to))
    }

    #[test]
    fn small_library_passes_all_similar_templates() {
        let templates: Vec<GestureTemplate> = (0..5)
            .map(|i| swipe_template(i, [0.3, 0.5], [0.7, 0.5]))
            .collect();
        let mut indexer = GestureIndexer::new();
        indexer.rebuild(&templates);

        let input = extract_signature(-1, swipe_frames(30, [0.3, 0.5], [0.7, 0.5]).as_slice())
            .unwrap();
        let (candidates, stats) = indexer.candidates(&input, &templates);
        assert_eq!(candidates.len(), 5);
        assert_eq!(stats.final_candidates, 5);
    }

    #[test]
    fn handedness_mismatch_is_rejected() {
        let input = extract_signature(-1, &swipe_frames(30, [0.3, 0.5], [0.7, 0.5])).unwrap();
        let mut stored = input.clone();
        stored.handedness = Handedness::Left;
        assert_eq!(
            EarlyRejectionFilter::default().rejection_reason(&input, &stored, false),
            Some("handedness")
        );
    }

    #[test]
    fn distant_centroid_is_rejected() {
        let input = extract_signature(-1, &swipe_frames(30, [0.1, 0.1], [0.2, 0.1])).unwrap();
        let stored = extract_signature(-1, &swipe_frames(30, [0.8, 0.9], [0.9, 0.9])).unwrap();
        assert_eq!(
            EarlyRejectionFilter::default().rejection_reason(&input, &stored, false),
            Some("centroid")
        );
    }

    #[test]
    fn strict_mode_tightens_trajectory_tolerance() {
        let input = extract_signature(-1, &swipe_frames(30, [0.3, 0.5], [0.7, 0.5])).unwrap();
        let mut stored = input.clone();
        // Relative difference of 0.5: passes 0.6, fails 0.6 * 0.8.
        stored.trajectory_length = input.trajectory_length * 2.0;
        stored.velocity_mean = input.velocity_mean;
        let filter = EarlyRejectionFilter::default();
        assert_eq!(filter.rejection_reason(&input, &stored, false), None);
        assert_eq!(
            filter.rejection_reason(&input, &stored, true),
            Some("trajectory_length")
        );
    }

    #[test]
    fn candidate_set_is_capped_in_insertion_order() {
        let templates: Vec<GestureTemplate> = (0..60)
            .map(|i| swipe_template(i, [0.3, 0.5], [0.7, 0.5]))
            .collect();
        let mut indexer = GestureIndexer::new();
        // No rebuild: clustering off, early rejection passes everything.
        let input = extract_signature(-1, &swipe_frames(30, [0.3, 0.5], [0.7, 0.5])).unwrap();
        let (candidates, stats) = indexer.candidates(&input, &templates);
        assert_eq!(candidates.len(), MAX_CANDIDATES);
        assert_eq!(candidates[0].id, 0);
        assert_eq!(candidates[MAX_CANDIDATES - 1].id, MAX_CANDIDATES as i64 - 1);
        assert_eq!(stats.after_filtering, 60);
        indexer.set_strict_filtering(true);
        assert!(indexer.strict_filtering());
    }

    #[test]
    fn clustering_keeps_the_matching_family() {
        // Two well-separated families of gestures.
        let mut templates: Vec<GestureTemplate> = (0..10)
            .map(|i| swipe_template(i, [0.1, 0.2], [0.3, 0.2]))
            .collect();
        templates.extend((10..20).map(|i| swipe_template(i, [0.6, 0.8], [0.9, 0.8])));

        let mut indexer = GestureIndexer::new();
        indexer.rebuild(&templates);

        let input = extract_signature(-1, &swipe_frames(30, [0.1, 0.2], [0.3, 0.2])).unwrap();
        let (candidates, _) = indexer.candidates(&input, &templates);
        assert!(!candidates.is_empty());
        assert!(candidates.iter().all(|t| t.id < 10));
    }

    #[test]
    fn kmeans_is_deterministic_for_a_fixed_seed() {
        let features: Vec<[f64; CLUSTER_FEATURES]> = (0..25)
            .map(|i| {
                let v = i as f64;
                [v * 0.01, v * 0.02, 0.5, 0.0, v * 0.03, v * 0.001, 0.01]
            })
            .collect();
        let (_, labels_a) = fit_kmeans(&features);
        let (_, labels_b) = fit_kmeans(&features);
        assert_eq!(labels_a, labels_b);
    }
}
