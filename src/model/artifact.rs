//! Persisted snapshot units: the process-wide model and the template dataset

use super::{FeatureStats, LinearClassifier, Modality};
use crate::ear::EarProjection;
use crate::error::{EngineError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceModel {
    pub stats: Option<FeatureStats>,
    pub classifier: LinearClassifier,
    pub threshold: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// `1 - cos(a, b)`
    #[default]
    Cosine,
    Euclidean,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EarModel {
    pub stats: Option<FeatureStats>,
    pub projection: Option<EarProjection>,
    pub metric: DistanceMetric,
    /// Equal-error-rate threshold from training, if shipped
    pub eer_threshold: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub revision: u64,
    pub label: String,
    pub created_at: DateTime<Utc>,
    pub voice: VoiceModel,
    pub ear: EarModel,
}

impl ModelArtifact {
    /// Cross-check shapes before the artifact is accepted
    pub fn validate(&self) -> Result<()> {
        if let Some(stats) = &self.voice.stats {
            stats.validate()?;
        }
        let voice_dim = self.voice.stats.as_ref().map(|s| s.dim());
        self.voice.classifier.validate(voice_dim)?;
        if !self.voice.threshold.is_finite() {
            return Err(EngineError::Format("voice threshold is not finite".to_string()));
        }

        if let Some(projection) = &self.ear.projection {
            projection.validate()?;
            if let Some(stats) = &self.ear.stats {
                stats.validate()?;
                if stats.dim() != projection.output_dim() {
                    return Err(EngineError::DimensionMismatch {
                        expected: projection.output_dim(),
                        got: stats.dim(),
                    });
                }
            }
        } else if let Some(stats) = &self.ear.stats {
            stats.validate()?;
        }
        Ok(())
    }
}

/// Aggregated, normalized feature vector for one identity and modality
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub external_id: String,
    pub modality: Modality,
    pub vector: Vec<f64>,
    pub sample_count: u32,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

impl Template {
    pub fn new(external_id: &str, modality: Modality, vector: Vec<f64>) -> Self {
        Self {
            external_id: external_id.to_string(),
            modality,
            vector,
            sample_count: 1,
            version: 1,
            updated_at: Utc::now(),
        }
    }

    /// Running mean: `t += (x - t) / (n + 1)`
    pub fn absorb(&mut self, sample: &[f64]) -> Result<()> {
        if sample.len() != self.vector.len() {
            return Err(EngineError::DimensionMismatch {
                expected: self.vector.len(),
                got: sample.len(),
            });
        }
        let n = self.sample_count as f64;
        for (t, x) in self.vector.iter_mut().zip(sample) {
            *t += (x - *t) / (n + 1.0);
        }
        self.sample_count += 1;
        self.version += 1;
        self.updated_at = Utc::now();
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub version: u64,
    pub templates: BTreeMap<String, Vec<Template>>,
}

impl Dataset {
    pub fn get(&self, external_id: &str, modality: Modality) -> Option<&Template> {
        self.templates
            .get(external_id)?
            .iter()
            .find(|t| t.modality == modality)
    }

    pub fn get_mut(&mut self, external_id: &str, modality: Modality) -> Option<&mut Template> {
        self.templates
            .get_mut(external_id)?
            .iter_mut()
            .find(|t| t.modality == modality)
    }

    /// Insert or replace the template for its key
    pub fn put(&mut self, template: Template) {
        let slot = self.templates.entry(template.external_id.clone()).or_default();
        match slot.iter_mut().find(|t| t.modality == template.modality) {
            Some(existing) => *existing = template,
            None => slot.push(template),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Template> {
        self.templates.values().flatten()
    }

    pub fn count(&self, modality: Modality) -> usize {
        self.iter().filter(|t| t.modality == modality).count()
    }

    pub fn validate(&self) -> Result<()> {
        for (id, templates) in &self.templates {
            for t in templates {
                if &t.external_id != id {
                    return Err(EngineError::Format(format!(
                        "template keyed '{}' carries identity '{}'",
                        id, t.external_id
                    )));
                }
                if t.vector.iter().any(|v| !v.is_finite()) {
                    return Err(EngineError::Format(format!(
                        "template '{}'/{} has non-finite values",
                        id, t.modality
                    )));
                }
            }
            let mut modalities: Vec<_> = templates.iter().map(|t| t.modality).collect();
            modalities.sort();
            modalities.dedup();
            if modalities.len() != templates.len() {
                return Err(EngineError::Format(format!(
                    "duplicate templates for '{}'",
                    id
                )));
            }
        }
        Ok(())
    }
}
