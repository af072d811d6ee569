//! Accept/reject decisions for both modalities
//!
//! Voice probes are scored by the identity's linear separator (higher is
//! better); ear probes by their distance to the identity's template (lower is
//! better).

use crate::error::{EngineError, Result};
use crate::model::{DistanceMetric, LinearClassifier, Template};
use serde::{Deserialize, Serialize};

/// Ear threshold when neither the caller nor the model supplies one
pub const DEFAULT_EAR_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Accept,
    Reject,
}

impl Decision {
    pub fn accepted(&self) -> bool {
        matches!(self, Decision::Accept)
    }
}

/// Verification result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthOutcome {
    pub user: String,
    pub decision: Decision,
    pub score: f64,
    pub threshold: f64,
}

/// Compute cosine similarity between two vectors (0 for degenerate input)
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f64 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| x * x).sum::<f64>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

pub fn euclidean_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

pub fn distance(metric: DistanceMetric, a: &[f64], b: &[f64]) -> Result<f64> {
    if a.len() != b.len() {
        return Err(EngineError::DimensionMismatch {
            expected: a.len(),
            got: b.len(),
        });
    }
    Ok(match metric {
        DistanceMetric::Cosine => 1.0 - cosine_similarity(a, b),
        DistanceMetric::Euclidean => euclidean_distance(a, b),
    })
}

/// Score a normalized voice probe against the identity's separator.
///
/// Threshold precedence: `override_threshold`, then the class's own
/// threshold, then `global_threshold`.
pub fn verify_voice(
    classifier: &LinearClassifier,
    template: &Template,
    probe: &[f64],
    override_threshold: Option<f64>,
    global_threshold: f64,
) -> Result<AuthOutcome> {
    let class = classifier.resolve(&template.external_id, &template.vector);
    let score = class.score(probe)?;
    let threshold = override_threshold
        .or(class.threshold)
        .unwrap_or(global_threshold);

    let decision = if score > threshold {
        Decision::Accept
    } else {
        Decision::Reject
    };

    log::info!(
        "Voice verification for user '{}': score={:.3}, threshold={:.3}, result={}",
        template.external_id,
        score,
        threshold,
        if decision.accepted() { "PASS" } else { "FAIL" }
    );

    Ok(AuthOutcome {
        user: template.external_id.clone(),
        decision,
        score,
        threshold,
    })
}

/// Distance of a normalized ear probe to the identity's template.
///
/// Threshold precedence: `override_threshold`, then the model's EER
/// threshold (ignored when negative), then `fallback_threshold`.
pub fn verify_ear(
    template: &Template,
    probe: &[f64],
    metric: DistanceMetric,
    override_threshold: Option<f64>,
    eer_threshold: Option<f64>,
    fallback_threshold: f64,
) -> Result<AuthOutcome> {
    let score = distance(metric, &template.vector, probe)?;
    let threshold = override_threshold
        .or(eer_threshold.filter(|t| *t >= 0.0))
        .unwrap_or(fallback_threshold);

    let decision = if score < threshold {
        Decision::Accept
    } else {
        Decision::Reject
    };

    log::info!(
        "Ear verification for user '{}': distance={:.3}, threshold={:.3}, result={}",
        template.external_id,
        score,
        threshold,
        if decision.accepted() { "PASS" } else { "FAIL" }
    );

    Ok(AuthOutcome {
        user: template.external_id.clone(),
        decision,
        score,
        threshold,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ClassOrigin, ClassWeights, Modality};

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-12);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-12);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-12);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_distance_metrics() {
        let d = distance(DistanceMetric::Euclidean, &[0.0, 0.0], &[3.0, 4.0]).unwrap();
        assert!((d - 5.0).abs() < 1e-12);
        let d = distance(DistanceMetric::Cosine, &[1.0, 1.0], &[2.0, 2.0]).unwrap();
        assert!(d.abs() < 1e-12);
        assert!(distance(DistanceMetric::Cosine, &[1.0], &[1.0, 2.0]).is_err());
    }

    #[test]
    fn test_voice_threshold_precedence() {
        let template = Template::new("u1", Modality::Voice, vec![1.0, 0.0]);
        let mut clf = LinearClassifier::default();

        // Nearest-mean score of the template itself is |mu|^2 / 2 = 0.5
        let out = verify_voice(&clf, &template, &[1.0, 0.0], None, 0.0).unwrap();
        assert_eq!(out.decision, Decision::Accept);
        assert!((out.score - 0.5).abs() < 1e-12);
        assert_eq!(out.threshold, 0.0);

        let mut class = ClassWeights::from_template(&[1.0, 0.0]);
        class.threshold = Some(0.6);
        clf.classes.insert("u1".into(), class);
        let out = verify_voice(&clf, &template, &[1.0, 0.0], None, 0.0).unwrap();
        assert_eq!(out.decision, Decision::Reject);
        assert_eq!(out.threshold, 0.6);

        let out = verify_voice(&clf, &template, &[1.0, 0.0], Some(0.4), 0.0).unwrap();
        assert_eq!(out.decision, Decision::Accept);
        assert_eq!(out.threshold, 0.4);
    }

    #[test]
    fn test_voice_uses_trained_class() {
        let template = Template::new("u1", Modality::Voice, vec![1.0, 0.0]);
        let mut clf = LinearClassifier::default();
        clf.classes.insert(
            "u1".into(),
            ClassWeights {
                weights: vec![0.0, 1.0],
                bias: 0.0,
                origin: ClassOrigin::Trained,
                threshold: None,
            },
        );

        let out = verify_voice(&clf, &template, &[1.0, 0.0], None, 0.1).unwrap();
        assert_eq!(out.score, 0.0);
        assert_eq!(out.decision, Decision::Reject);
    }

    #[test]
    fn test_ear_threshold_precedence() {
        let template = Template::new("u1", Modality::Ear, vec![1.0, 0.0]);
        let probe = [1.0, 1.0]; // cosine distance 1 - 1/sqrt(2) ~ 0.293
        let check = |over: Option<f64>, eer: Option<f64>| {
            verify_ear(
                &template,
                &probe,
                DistanceMetric::Cosine,
                over,
                eer,
                DEFAULT_EAR_THRESHOLD,
            )
            .unwrap()
        };

        let out = check(None, None);
        assert_eq!(out.threshold, DEFAULT_EAR_THRESHOLD);
        assert_eq!(out.decision, Decision::Accept);

        assert_eq!(check(None, Some(0.2)).decision, Decision::Reject);

        // A negative EER threshold falls back to the default
        assert_eq!(check(None, Some(-1.0)).threshold, DEFAULT_EAR_THRESHOLD);

        assert_eq!(check(Some(0.3), Some(0.2)).decision, Decision::Accept);
    }
}
