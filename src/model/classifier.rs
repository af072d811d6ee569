//! Per-identity linear separators for the voice modality

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Where a class's weights came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassOrigin {
    /// Shipped in the pretrained model; never overwritten by enrollment
    Trained,
    /// Derived on device from the user's template
    Enrolled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassWeights {
    pub weights: Vec<f64>,
    pub bias: f64,
    pub origin: ClassOrigin,
    #[serde(default)]
    pub threshold: Option<f64>,
}

impl ClassWeights {
    /// Nearest-mean separator: `w = mu`, `b = -|mu|^2 / 2`
    pub fn from_template(template: &[f64]) -> Self {
        let norm_sq: f64 = template.iter().map(|v| v * v).sum();
        Self {
            weights: template.to_vec(),
            bias: -0.5 * norm_sq,
            origin: ClassOrigin::Enrolled,
            threshold: None,
        }
    }

    pub fn score(&self, x: &[f64]) -> Result<f64> {
        if x.len() != self.weights.len() {
            return Err(EngineError::DimensionMismatch {
                expected: self.weights.len(),
                got: x.len(),
            });
        }
        Ok(self.weights.iter().zip(x).map(|(w, v)| w * v).sum::<f64>() + self.bias)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinearClassifier {
    pub classes: BTreeMap<String, ClassWeights>,
}

impl LinearClassifier {
    pub fn get(&self, identity: &str) -> Option<&ClassWeights> {
        self.classes.get(identity)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Separator used to score `identity`: the trained class when one was
    /// shipped, otherwise the nearest-mean class of the current template
    /// (keeping any per-user threshold recorded for it).
    pub fn resolve(&self, identity: &str, template: &[f64]) -> ClassWeights {
        match self.classes.get(identity) {
            Some(existing) if existing.origin == ClassOrigin::Trained => existing.clone(),
            existing => {
                let mut class = ClassWeights::from_template(template);
                class.threshold = existing.and_then(|c| c.threshold);
                class
            }
        }
    }

    pub fn validate(&self, dim: Option<usize>) -> Result<()> {
        for (id, class) in &self.classes {
            if let Some(d) = dim {
                if class.weights.len() != d {
                    return Err(EngineError::DimensionMismatch {
                        expected: d,
                        got: class.weights.len(),
                    });
                }
            }
            if !class.bias.is_finite() || class.weights.iter().any(|w| !w.is_finite()) {
                return Err(EngineError::Format(format!(
                    "class '{}' has non-finite weights",
                    id
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nearest_mean_prefers_own_template() {
        let mu = vec![1.0, 2.0, -1.0];
        let class = ClassWeights::from_template(&mu);

        // score = (|x|^2 - |x - mu|^2) / 2
        let near = class.score(&[1.1, 1.9, -1.0]).unwrap();
        let far = class.score(&[-1.0, -2.0, 1.0]).unwrap();
        assert!(near > far);
        assert!((class.score(&mu).unwrap() - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_trained_class_is_authoritative() {
        let mut clf = LinearClassifier::default();
        clf.classes.insert(
            "alice".into(),
            ClassWeights {
                weights: vec![0.5, 0.5],
                bias: 0.1,
                origin: ClassOrigin::Trained,
                threshold: Some(0.2),
            },
        );

        let alice = clf.resolve("alice", &[9.0, 9.0]);
        assert_eq!(alice.weights, vec![0.5, 0.5]);
        assert_eq!(alice.threshold, Some(0.2));

        let bob = clf.resolve("bob", &[1.0, 0.0]);
        assert_eq!(bob.origin, ClassOrigin::Enrolled);
        assert_eq!(bob.bias, -0.5);
    }

    #[test]
    fn test_enrolled_class_keeps_per_user_threshold() {
        let mut clf = LinearClassifier::default();
        let mut carol = ClassWeights::from_template(&[1.0]);
        carol.threshold = Some(-0.3);
        clf.classes.insert("carol".into(), carol);

        let class = clf.resolve("carol", &[2.0]);
        assert_eq!(class.threshold, Some(-0.3));
        assert_eq!(class.weights, vec![2.0]);
        assert_eq!(class.bias, -2.0);
    }

    #[test]
    fn test_score_dimension_mismatch() {
        let class = ClassWeights::from_template(&[1.0, 2.0]);
        assert!(class.score(&[1.0]).is_err());
    }
}
