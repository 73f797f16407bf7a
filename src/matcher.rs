//! Gesture matching orchestration: cache lookups, candidate selection via
//! the indexer, bounded parallel DTW scoring, and the threshold gate.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Instant;

use ndarray::Array2;
use rayon::prelude::*;

use crate::cache::MatchCache;
use crate::dtw::{DtwEnsemble, EnhancedDtw, FeatureWeights, DIRECTION_ALPHA};
use crate::error::{Error, Result};
use crate::filter::LandmarkSmoother;
use crate::index::{GestureIndexer, STRICT_FILTERING_THRESHOLD};
use crate::preprocess::{features_for_matching, features_for_recording, Preprocessor, MIN_FRAMES};
use crate::signature::extract_signature;
use crate::types::{AppContext, Frame, GestureTemplate};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DtwMethod {
    Standard,
    Direction,
    MultiFeature,
    Ensemble,
}

#[derive(Clone, Debug)]
pub struct MatcherSettings {
    /// Global similarity threshold; a template's `adaptive_threshold`
    /// overrides it.
    pub similarity_threshold: f64,
    pub method: DtwMethod,
    /// Bounded worker pool size for candidate scoring.
    pub max_workers: usize,
    /// Candidate count above which scoring fans out to the pool.
    pub parallel_threshold: usize,
    /// Template count above which the indexer is consulted.
    pub indexing_threshold: usize,
}

impl Default for MatcherSettings {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.65,
            method: DtwMethod::Ensemble,
            max_workers: 4,
            parallel_threshold: 10,
            indexing_threshold: 10,
        }
    }
}

#[derive(Clone, Debug)]
pub struct MatchOutcome {
    pub result: Option<(GestureTemplate, f64)>,
    pub candidates_evaluated: usize,
    pub total_time_ms: f64,
}

impl MatchOutcome {
    fn empty(started: Instant) -> Self {
        Self {
            result: None,
            candidates_evaluated: 0,
            total_time_ms: started.elapsed().as_secs_f64() * 1000.0,
        }
    }
}

pub struct GestureMatcher {
    settings: MatcherSettings,
    ensemble: DtwEnsemble,
    dtw: EnhancedDtw,
    preprocessor: Preprocessor,
    pool: rayon::ThreadPool,
}

impl GestureMatcher {
    pub fn new(settings: MatcherSettings) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(settings.max_workers.max(1))
            .build()
            .map_err(|e| Error::Concurrency(format!("failed to build worker pool: {e}")))?;
        Ok(Self {
            settings,
            ensemble: DtwEnsemble::default(),
            dtw: EnhancedDtw::default(),
            preprocessor: Preprocessor::default(),
            pool,
        })
    }

    pub fn settings(&self) -> &MatcherSettings {
        &self.settings
    }

    /// Match an input sequence against the template library.
    ///
    /// `smoother` is the session's live filter bank (matching discipline);
    /// the cache and indexer are injected so the matcher never owns them.
    pub fn match_gesture(
        &self,
        input_frames: &[Frame],
        templates: &[GestureTemplate],
        user_id: i64,
        app_context: AppContext,
        smoother: &mut LandmarkSmoother,
        indexer: &mut GestureIndexer,
        cache: &MatchCache,
    ) -> MatchOutcome {
        let started = Instant::now();

        if templates.is_empty() {
            log::warn!("no stored templates to match against");
            return MatchOutcome::empty(started);
        }
        if input_frames.len() < MIN_FRAMES {
            log::warn!(
                "input gesture too short: {} frames (minimum {MIN_FRAMES})",
                input_frames.len()
            );
            return MatchOutcome::empty(started);
        }

        if let Some(cached) = cache.get_match(input_frames, user_id, app_context) {
            log::info!(
                "match cache hit in {:.1}ms",
                started.elapsed().as_secs_f64() * 1000.0
            );
            return MatchOutcome {
                result: Some(cached),
                candidates_evaluated: 0,
                total_time_ms: started.elapsed().as_secs_f64() * 1000.0,
            };
        }

        let input_features =
            match features_for_matching(input_frames, smoother, &self.preprocessor) {
                Ok(features) => features,
                Err(err) => {
                    log::warn!("input feature extraction failed: {err}");
                    return MatchOutcome::empty(started);
                }
            };

        if templates.len() > STRICT_FILTERING_THRESHOLD && !indexer.strict_filtering() {
            log::info!(
                "large template library ({}), enabling strict filtering",
                templates.len()
            );
            indexer.set_strict_filtering(true);
        }

        let all: Vec<&GestureTemplate> = templates.iter().collect();
        let candidates: Vec<&GestureTemplate> =
            if templates.len() > self.settings.indexing_threshold {
                match extract_signature(-1, input_frames) {
                    Ok(input_sig) => {
                        let (selected, stats) = indexer.candidates(&input_sig, templates);
                        log::info!(
                            "indexing: {} -> {} -> {} candidates",
                            stats.total_templates,
                            stats.after_clustering,
                            stats.final_candidates
                        );
                        selected
                    }
                    Err(err) => {
                        log::warn!("input signature extraction failed: {err}");
                        all
                    }
                }
            } else {
                all
            };

        let candidates_evaluated = candidates.len();
        let best = if candidates_evaluated > self.settings.parallel_threshold {
            self.score_parallel(&input_features, input_frames, &candidates, cache)
        } else {
            self.score_sequential(&input_features, input_frames, &candidates, cache)
        };

        let total_time_ms = started.elapsed().as_secs_f64() * 1000.0;

        let result = best.and_then(|(template, similarity)| {
            let threshold = template
                .adaptive_threshold
                .unwrap_or(self.settings.similarity_threshold);
            if similarity >= threshold {
                log::info!(
                    "matched '{}' at {:.1}% (threshold {:.1}%, {} candidates, {:.1}ms)",
                    template.name,
                    similarity * 100.0,
                    threshold * 100.0,
                    candidates_evaluated,
                    total_time_ms
                );
                Some((template.clone(), similarity))
            } else {
                log::info!(
                    "no match: best '{}' at {:.1}% below threshold {:.1}%",
                    template.name,
                    similarity * 100.0,
                    threshold * 100.0
                );
                None
            }
        });

        if let Some(result) = &result {
            cache.put_match(input_frames, user_id, app_context, result.clone());
        }

        MatchOutcome {
            result,
            candidates_evaluated,
            total_time_ms,
        }
    }

    /// Score every template and return the top `k` by similarity. Bypasses
    /// cache and index; meant for diagnostics and recording feedback.
    pub fn batch_match(
        &self,
        input_frames: &[Frame],
        templates: &[GestureTemplate],
        top_k: usize,
        smoother: &mut LandmarkSmoother,
    ) -> Vec<(GestureTemplate, f64)> {
        if templates.is_empty() || input_frames.len() < MIN_FRAMES {
            return Vec::new();
        }
        let input_features =
            match features_for_matching(input_frames, smoother, &self.preprocessor) {
                Ok(features) => features,
                Err(err) => {
                    log::warn!("input feature extraction failed: {err}");
                    return Vec::new();
                }
            };

        let mut scored: Vec<(GestureTemplate, f64)> = templates
            .iter()
            .map(|template| {
                let similarity = self.score_template(&input_features, template, None);
                (template.clone(), similarity)
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        scored
    }

    fn score_sequential(
        &self,
        input_features: &Array2<f64>,
        input_frames: &[Frame],
        candidates: &[&GestureTemplate],
        cache: &MatchCache,
    ) -> Option<(GestureTemplate, f64)> {
        let mut best: Option<(GestureTemplate, f64)> = None;
        for template in candidates {
            let similarity =
                self.score_candidate(input_features, input_frames, template, cache);
            if best.as_ref().is_none_or(|(_, s)| similarity > *s) {
                best = Some(((*template).clone(), similarity));
            }
        }
        best
    }

    /// Parallel fan-out over the bounded pool. Workers are pure functions
    /// over the input features and read-only cache handles; a panicking
    /// worker contributes no result.
    fn score_parallel(
        &self,
        input_features: &Array2<f64>,
        input_frames: &[Frame],
        candidates: &[&GestureTemplate],
        cache: &MatchCache,
    ) -> Option<(GestureTemplate, f64)> {
        self.pool.install(|| {
            candidates
                .par_iter()
                .map(|template| {
                    let similarity =
                        self.score_candidate(input_features, input_frames, template, cache);
                    ((*template).clone(), similarity)
                })
                .reduce_with(|a, b| if b.1 > a.1 { b } else { a })
        })
    }

    /// Score one candidate; never fails the overall match. Scoring errors
    /// and worker panics log at ERROR and score 0.
    fn score_candidate(
        &self,
        input_features: &Array2<f64>,
        input_frames: &[Frame],
        template: &GestureTemplate,
        cache: &MatchCache,
    ) -> f64 {
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            self.score_template(input_features, template, Some((input_frames, cache)))
        }));
        match outcome {
            Ok(similarity) => similarity,
            Err(_) => {
                log::error!("scoring worker panicked for template {}", template.id);
                0.0
            }
        }
    }

    fn score_template(
        &self,
        input_features: &Array2<f64>,
        template: &GestureTemplate,
        cache_context: Option<(&[Frame], &MatchCache)>,
    ) -> f64 {
        let stored_frames = template.frames();
        if stored_frames.is_empty() {
            log::warn!("template {} has no frames, skipping", template.id);
            return 0.0;
        }

        let cached_distance = cache_context
            .and_then(|(input_frames, cache)| cache.get_dtw_distance(input_frames, stored_frames));

        let (value, is_similarity) = match cached_distance {
            Some(distance) => (distance, false),
            None => {
                let stored_features = match self.stored_features(template, cache_context) {
                    Ok(features) => features,
                    Err(err) => {
                        log::error!("template {} feature extraction failed: {err}", template.id);
                        return 0.0;
                    }
                };

                let (value, is_similarity) =
                    self.evaluate(input_features, &stored_features);

                if !is_similarity {
                    if let Some((input_frames, cache)) = cache_context {
                        cache.put_dtw_distance(input_frames, stored_frames, value);
                    }
                }
                (value, is_similarity)
            }
        };

        let similarity = if is_similarity {
            value.clamp(0.0, 1.0)
        } else {
            self.dtw.similarity(value)
        };
        log::debug!(
            "template {}: value={value:.4} is_similarity={is_similarity} similarity={similarity:.4}",
            template.id
        );
        similarity
    }

    /// Stored templates always use the recording discipline: a fresh filter
    /// bank per extraction, so results never depend on live tracking state.
    fn stored_features(
        &self,
        template: &GestureTemplate,
        cache_context: Option<(&[Frame], &MatchCache)>,
    ) -> Result<Array2<f64>> {
        if let Some((_, cache)) = cache_context {
            if let Some(features) = cache.get_features(template.frames()) {
                return Ok(features);
            }
        }
        let mut smoother = LandmarkSmoother::with_defaults();
        let features =
            features_for_recording(template.frames(), &mut smoother, &self.preprocessor)
                .map_err(|e| Error::Scoring(format!("template {}: {e}", template.id)))?;
        if let Some((_, cache)) = cache_context {
            cache.put_features(template.frames(), features.clone());
        }
        Ok(features)
    }

    /// Returns `(value, is_similarity)`. The ensemble emits a similarity
    /// directly and must not be reconverted; the other methods emit raw
    /// distances.
    fn evaluate(&self, input: &Array2<f64>, stored: &Array2<f64>) -> (f64, bool) {
        match self.settings.method {
            DtwMethod::Ensemble => (
                self.ensemble.match_similarity(input.view(), stored.view()),
                true,
            ),
            DtwMethod::Direction => (
                self.dtw
                    .direction_similarity_dtw(input.view(), stored.view(), DIRECTION_ALPHA),
                false,
            ),
            DtwMethod::MultiFeature => (
                self.dtw
                    .multi_feature_dtw(input.view(), stored.view(), FeatureWeights::default()),
                false,
            ),
            DtwMethod::Standard => (
                self.dtw.dtw_distance(input.view(), stored.view(), true),
                false,
            ),
        }
    }
}
