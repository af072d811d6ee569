//! On-disk model and dataset snapshots with atomic replacement

use super::codec::{self, BlobKind};
use super::{Dataset, Modality, ModelArtifact, Template};
use crate::error::{EngineError, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Write `bytes` next to `path` and rename over it
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }

    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        EngineError::Storage(format!("replace {}: {}", path.display(), e))
    })
}

/// Aggregate counters reported through engine statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreSummary {
    pub model_revision: u64,
    pub dataset_version: u64,
    pub voice_templates: usize,
    pub ear_templates: usize,
    pub trained_classes: usize,
}

#[derive(Debug)]
pub struct ArtifactStore {
    model_path: PathBuf,
    dataset_path: PathBuf,
    model: ModelArtifact,
    dataset: Dataset,
}

impl ArtifactStore {
    /// Load the model (required) and the dataset (optional)
    pub fn load(model_path: &Path, dataset_path: &Path) -> Result<Self> {
        let bytes = fs::read(model_path).map_err(|e| {
            EngineError::NotFound(format!("model artifact {}: {}", model_path.display(), e))
        })?;
        let model: ModelArtifact = codec::decode(BlobKind::Model, &bytes)?;
        model.validate()?;

        let dataset = if dataset_path.exists() {
            let bytes = fs::read(dataset_path)?;
            let dataset: Dataset = codec::decode(BlobKind::Dataset, &bytes)?;
            dataset.validate()?;
            dataset
        } else {
            log::info!(
                "No dataset at {}, starting with no templates",
                dataset_path.display()
            );
            Dataset::default()
        };

        log::info!(
            "Model '{}' r{} loaded ({} voice / {} ear templates, dataset v{})",
            model.label,
            model.revision,
            dataset.count(Modality::Voice),
            dataset.count(Modality::Ear),
            dataset.version
        );

        Ok(Self {
            model_path: model_path.to_path_buf(),
            dataset_path: dataset_path.to_path_buf(),
            model,
            dataset,
        })
    }

    pub fn model(&self) -> &ModelArtifact {
        &self.model
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn template(&self, external_id: &str, modality: Modality) -> Option<&Template> {
        self.dataset.get(external_id, modality)
    }

    pub fn export_model(&self) -> Result<Vec<u8>> {
        codec::encode(BlobKind::Model, &self.model)
    }

    pub fn export_dataset(&self) -> Result<Vec<u8>> {
        codec::encode(BlobKind::Dataset, &self.dataset)
    }

    pub fn import_model(&mut self, bytes: &[u8]) -> Result<()> {
        let model: ModelArtifact = codec::decode(BlobKind::Model, bytes)?;
        model.validate()?;

        write_atomic(&self.model_path, bytes)?;
        log::info!(
            "Model imported: '{}' r{} -> r{}",
            model.label,
            self.model.revision,
            model.revision
        );
        self.model = model;
        Ok(())
    }

    pub fn import_dataset(&mut self, bytes: &[u8]) -> Result<()> {
        let dataset: Dataset = codec::decode(BlobKind::Dataset, bytes)?;
        dataset.validate()?;

        write_atomic(&self.dataset_path, bytes)?;
        log::info!(
            "Dataset imported: v{} -> v{} ({} templates)",
            self.dataset.version,
            dataset.version,
            dataset.iter().count()
        );
        self.dataset = dataset;
        Ok(())
    }

    /// Fold a normalized sample into the identity's template and persist
    pub fn apply_enrollment(
        &mut self,
        external_id: &str,
        modality: Modality,
        sample: &[f64],
    ) -> Result<Template> {
        let mut next = self.dataset.clone();
        let template = match next.get_mut(external_id, modality) {
            Some(existing) => {
                existing.absorb(sample)?;
                existing.clone()
            }
            None => {
                let fresh = Template::new(external_id, modality, sample.to_vec());
                next.put(fresh.clone());
                fresh
            }
        };
        next.version += 1;

        self.persist_dataset(next)?;
        log::debug!(
            "Template {}/{} now v{} ({} samples)",
            external_id,
            modality,
            template.version,
            template.sample_count
        );
        Ok(template)
    }

    /// Merge a template received from the server; only a strictly newer
    /// remote copy replaces the local one. Returns whether it was applied.
    pub fn merge_remote_template(&mut self, remote: Template) -> Result<bool> {
        if let Some(local) = self.dataset.get(&remote.external_id, remote.modality) {
            if remote.updated_at <= local.updated_at {
                return Ok(false);
            }
        }

        let mut next = self.dataset.clone();
        let mut incoming = remote;
        if let Some(local) = next.get(&incoming.external_id, incoming.modality) {
            incoming.version = incoming.version.max(local.version + 1);
        }
        next.put(incoming);
        next.version += 1;
        self.persist_dataset(next)?;
        Ok(true)
    }

    fn persist_dataset(&mut self, next: Dataset) -> Result<()> {
        let bytes = codec::encode(BlobKind::Dataset, &next)?;
        write_atomic(&self.dataset_path, &bytes)?;
        self.dataset = next;
        Ok(())
    }

    pub fn summary(&self) -> StoreSummary {
        StoreSummary {
            model_revision: self.model.revision,
            dataset_version: self.dataset.version,
            voice_templates: self.dataset.count(Modality::Voice),
            ear_templates: self.dataset.count(Modality::Ear),
            trained_classes: self
                .model
                .voice
                .classifier
                .classes
                .values()
                .filter(|c| c.origin == super::ClassOrigin::Trained)
                .count(),
        }
    }
}
