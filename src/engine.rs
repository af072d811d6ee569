//! Engine session
//!
//! One `Engine` owns the artifact store, the local row store, the feature
//! extractor and the sync client for a single set of paths. It is
//! `Send + Sync`: feature extraction runs outside any lock, and each store
//! sits behind its own mutex. When both are needed the local store is locked
//! first.

use crate::audio::{self, CaptureInfo, MfccExtractor};
use crate::config::EngineConfig;
use crate::ear::GrayImage;
use crate::error::{EngineError, Result};
use crate::matcher::{self, AuthOutcome};
use crate::model::store::{write_atomic, StoreSummary};
use crate::model::{codec, ArtifactStore, Modality};
use crate::paths::EnginePaths;
use crate::storage::{
    LocalStore, NewPhrase, Phrase, QueueItem, StoreCounts, UserRecord, META_LAST_PULL,
    META_LAST_PUSH,
};
use crate::sync::{HttpTransport, PullReport, PushReport, SyncEngine, SyncOptions, SyncTransport};
use crate::validation::{validate_identifier, validate_server_url, validate_threshold};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::sync::{Arc, Mutex, MutexGuard};

pub const MODEL_ARTIFACT: &str = "model.bin";
pub const DATASET_ARTIFACT: &str = "dataset.bin";

#[derive(Debug, Clone, Serialize)]
pub struct EnrollReport {
    pub user: String,
    pub modality: Modality,
    pub created_user: bool,
    pub sample_ids: Vec<i64>,
    pub template_version: u64,
    pub sample_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capture: Option<CaptureInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelDownload {
    pub artifact: String,
    pub bytes: usize,
    pub sha256: String,
    pub installed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub version: &'static str,
    pub device_id: String,
    pub model_label: String,
    pub model_revision: u64,
    pub dataset_version: u64,
    pub voice_templates: usize,
    pub ear_templates: usize,
    pub trained_classes: usize,
    pub store: StoreCounts,
    pub last_push_at: Option<String>,
    pub last_pull_at: Option<String>,
}

fn lock<'a, T>(mutex: &'a Mutex<T>, what: &str) -> Result<MutexGuard<'a, T>> {
    mutex
        .lock()
        .map_err(|_| EngineError::Storage(format!("{} lock poisoned", what)))
}

pub struct Engine {
    paths: EnginePaths,
    config: EngineConfig,
    extractor: MfccExtractor,
    artifacts: Mutex<ArtifactStore>,
    local: Mutex<LocalStore>,
    sync: SyncEngine,
}

impl Engine {
    /// Open an engine with the HTTP sync client
    pub fn open(paths: EnginePaths) -> Result<Self> {
        let transport = HttpTransport::new()?;
        Self::with_transport(paths, Arc::new(transport))
    }

    /// Open an engine over an explicit sync transport.
    ///
    /// Fails when the model artifact is missing or does not decode.
    pub fn with_transport(paths: EnginePaths, transport: Arc<dyn SyncTransport>) -> Result<Self> {
        log::info!("Initializing biomatch engine v{}", env!("CARGO_PKG_VERSION"));

        paths
            .ensure_directories()
            .map_err(|e| EngineError::Storage(format!("{:#}", e)))?;
        let config = EngineConfig::load_or_default(&paths.config_file())
            .map_err(|e| EngineError::InvalidInput(format!("{:#}", e)))?;
        let extractor = MfccExtractor::new(config.mfcc.clone())?;

        let artifacts = ArtifactStore::load(&paths.model_file(), &paths.dataset)?;
        let local = LocalStore::open(&paths.store)?;
        let sync = SyncEngine::new(transport, config.sync.clone());

        log::info!("✓ Engine ready (transform={:?})", config.mfcc.transform);
        Ok(Self {
            paths,
            config,
            extractor,
            artifacts: Mutex::new(artifacts),
            local: Mutex::new(local),
            sync,
        })
    }

    pub fn paths(&self) -> &EnginePaths {
        &self.paths
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Re-read model and dataset from disk; the in-memory copy is kept if
    /// loading fails
    pub fn reload(&self) -> Result<StoreSummary> {
        let fresh = ArtifactStore::load(&self.paths.model_file(), &self.paths.dataset)?;
        let summary = fresh.summary();
        *lock(&self.artifacts, "artifact store")? = fresh;
        log::info!(
            "Reloaded model r{} / dataset v{}",
            summary.model_revision,
            summary.dataset_version
        );
        Ok(summary)
    }

    // ---- users ----

    pub fn user_id(&self, external_id: &str) -> Result<Option<i64>> {
        let external_id = validate_identifier(external_id)?;
        lock(&self.local, "local store")?.user_id(&external_id)
    }

    pub fn user_exists(&self, external_id: &str) -> Result<bool> {
        Ok(self.user_id(external_id)?.is_some())
    }

    /// Get-or-create; the boolean tells whether the row is new
    pub fn create_user(&self, external_id: &str) -> Result<(UserRecord, bool)> {
        let external_id = validate_identifier(external_id)?;
        lock(&self.local, "local store")?.ensure_user(&external_id)
    }

    // ---- phrases ----

    pub fn random_phrase(&self) -> Result<Phrase> {
        lock(&self.local, "local store")?
            .random_phrase()?
            .ok_or_else(|| EngineError::NotFound("no active phrases".to_string()))
    }

    pub fn phrase(&self, phrase_id: i64) -> Result<Phrase> {
        lock(&self.local, "local store")?
            .phrase(phrase_id)?
            .ok_or_else(|| EngineError::NotFound(format!("phrase {}", phrase_id)))
    }

    pub fn insert_phrases(&self, phrases: &[NewPhrase]) -> Result<usize> {
        lock(&self.local, "local store")?.insert_phrases(phrases)
    }

    // ---- voice ----

    fn voice_features(&self, wav: &[u8]) -> Result<(Vec<f64>, CaptureInfo)> {
        let rate = self.config.mfcc.sample_rate;
        let (samples, capture) = audio::prepare_capture(wav, rate)?;

        let min_ms = self.config.voice.min_duration_ms;
        if capture.duration_ms < min_ms {
            return Err(EngineError::InsufficientAudio {
                needed: (min_ms * rate as u64 / 1000) as usize,
                got: samples.len(),
            });
        }

        let features = self.extractor.extract(&samples)?;
        Ok((features, capture))
    }

    fn check_phrase(local: &LocalStore, phrase_id: Option<i64>) -> Result<()> {
        match phrase_id {
            Some(id) if local.phrase(id)?.is_none() => {
                Err(EngineError::NotFound(format!("phrase {}", id)))
            }
            _ => Ok(()),
        }
    }

    pub fn enroll_voice(
        &self,
        external_id: &str,
        wav: &[u8],
        phrase_id: Option<i64>,
    ) -> Result<EnrollReport> {
        let external_id = validate_identifier(external_id)?;
        let (features, capture) = self.voice_features(wav)?;

        let normalized = {
            let artifacts = lock(&self.artifacts, "artifact store")?;
            artifacts
                .model()
                .voice
                .stats
                .as_ref()
                .ok_or(EngineError::StatisticsUnavailable(Modality::Voice))?
                .normalize(&features)?
        };

        let (created_user, sample_id) = {
            let mut local = lock(&self.local, "local store")?;
            Self::check_phrase(&local, phrase_id)?;
            let (user, created) = local.ensure_user(&external_id)?;
            let sample_id = local.insert_sample(&user, Modality::Voice, &normalized, phrase_id)?;
            (created, sample_id)
        };

        let template = lock(&self.artifacts, "artifact store")?.apply_enrollment(
            &external_id,
            Modality::Voice,
            &normalized,
        )?;

        log::info!(
            "Voice enrollment for '{}': sample {}, template v{} ({} samples)",
            external_id,
            sample_id,
            template.version,
            template.sample_count
        );
        Ok(EnrollReport {
            user: external_id,
            modality: Modality::Voice,
            created_user,
            sample_ids: vec![sample_id],
            template_version: template.version,
            sample_count: template.sample_count,
            capture: Some(capture),
        })
    }

    /// Verify a voice capture against the identity's class.
    ///
    /// `threshold` overrides the class and model thresholds when given.
    pub fn authenticate_voice(
        &self,
        external_id: &str,
        wav: &[u8],
        phrase_id: Option<i64>,
        threshold: Option<f64>,
    ) -> Result<AuthOutcome> {
        let external_id = validate_identifier(external_id)?;
        let threshold = threshold.map(validate_threshold).transpose()?;
        self.require_template(&external_id, Modality::Voice)?;
        Self::check_phrase(&*lock(&self.local, "local store")?, phrase_id)?;

        let (features, _) = self.voice_features(wav)?;

        let artifacts = lock(&self.artifacts, "artifact store")?;
        let template = artifacts
            .template(&external_id, Modality::Voice)
            .ok_or_else(|| unknown(&external_id, Modality::Voice))?;
        let voice = &artifacts.model().voice;
        let probe = voice
            .stats
            .as_ref()
            .ok_or(EngineError::StatisticsUnavailable(Modality::Voice))?
            .normalize(&features)?;

        matcher::verify_voice(&voice.classifier, template, &probe, threshold, voice.threshold)
    }

    // ---- ear ----

    fn ear_features(&self, images: &[GrayImage]) -> Result<Vec<Vec<f64>>> {
        let ear = lock(&self.artifacts, "artifact store")?.model().ear.clone();
        let projection = ear.projection.as_ref().ok_or(EngineError::ModelNotLoaded)?;
        let stats = ear
            .stats
            .as_ref()
            .ok_or(EngineError::StatisticsUnavailable(Modality::Ear))?;

        images
            .iter()
            .map(|img| stats.normalize(&projection.project(img)?))
            .collect()
    }

    pub fn enroll_ear(&self, external_id: &str, images: &[GrayImage]) -> Result<EnrollReport> {
        let external_id = validate_identifier(external_id)?;
        let required = self.config.ear.enroll_images_min;
        if images.len() < required {
            return Err(EngineError::InvalidInput(format!(
                "ear enrollment needs at least {} images, got {}",
                required,
                images.len()
            )));
        }

        let vectors = self.ear_features(images)?;

        let (created_user, sample_ids) = {
            let mut local = lock(&self.local, "local store")?;
            let (user, created) = local.ensure_user(&external_id)?;
            let ids = vectors
                .iter()
                .map(|v| local.insert_sample(&user, Modality::Ear, v, None))
                .collect::<Result<Vec<_>>>()?;
            (created, ids)
        };

        let template = {
            let mut artifacts = lock(&self.artifacts, "artifact store")?;
            let mut last = None;
            for v in &vectors {
                last = Some(artifacts.apply_enrollment(&external_id, Modality::Ear, v)?);
            }
            last.ok_or_else(|| EngineError::InvalidInput("no ear images".to_string()))?
        };

        log::info!(
            "Ear enrollment for '{}': {} images, template v{} ({} samples)",
            external_id,
            sample_ids.len(),
            template.version,
            template.sample_count
        );
        Ok(EnrollReport {
            user: external_id,
            modality: Modality::Ear,
            created_user,
            sample_ids,
            template_version: template.version,
            sample_count: template.sample_count,
            capture: None,
        })
    }

    pub fn authenticate_ear(
        &self,
        external_id: &str,
        image: &GrayImage,
        threshold: Option<f64>,
    ) -> Result<AuthOutcome> {
        let external_id = validate_identifier(external_id)?;
        let threshold = threshold.map(validate_threshold).transpose()?;
        self.require_template(&external_id, Modality::Ear)?;

        let probe = self
            .ear_features(std::slice::from_ref(image))?
            .pop()
            .ok_or_else(|| EngineError::InvalidInput("no ear image".to_string()))?;

        let artifacts = lock(&self.artifacts, "artifact store")?;
        let template = artifacts
            .template(&external_id, Modality::Ear)
            .ok_or_else(|| unknown(&external_id, Modality::Ear))?;
        let ear = &artifacts.model().ear;
        matcher::verify_ear(
            template,
            &probe,
            ear.metric,
            threshold,
            ear.eer_threshold,
            self.config.ear.default_threshold,
        )
    }

    fn require_template(&self, external_id: &str, modality: Modality) -> Result<()> {
        match lock(&self.artifacts, "artifact store")?.template(external_id, modality) {
            Some(_) => Ok(()),
            None => Err(unknown(external_id, modality)),
        }
    }

    // ---- outbox ----

    pub fn pending_items(&self, limit: Option<usize>) -> Result<Vec<QueueItem>> {
        lock(&self.local, "local store")?.pending(limit)
    }

    pub fn pending_count(&self) -> Result<u64> {
        lock(&self.local, "local store")?.pending_count()
    }

    pub fn mark_synced(&self, sync_id: i64) -> Result<bool> {
        lock(&self.local, "local store")?.mark_synced(sync_id)
    }

    // ---- snapshots ----

    pub fn export_model(&self) -> Result<Vec<u8>> {
        lock(&self.artifacts, "artifact store")?.export_model()
    }

    pub fn export_dataset(&self) -> Result<Vec<u8>> {
        lock(&self.artifacts, "artifact store")?.export_dataset()
    }

    pub fn import_model(&self, bytes: &[u8]) -> Result<()> {
        lock(&self.artifacts, "artifact store")?.import_model(bytes)
    }

    pub fn import_dataset(&self, bytes: &[u8]) -> Result<()> {
        lock(&self.artifacts, "artifact store")?.import_dataset(bytes)
    }

    // ---- sync ----

    /// Options with the configured timeout
    pub fn sync_options(&self) -> SyncOptions {
        self.sync.default_options()
    }

    pub fn sync_ping(&self, server: &str, opts: &SyncOptions) -> Result<bool> {
        let url = validate_server_url(server)?;
        self.sync.ping(&url, opts)
    }

    pub fn sync_push(&self, server: &str, opts: &SyncOptions) -> Result<PushReport> {
        let url = validate_server_url(server)?;
        let local = lock(&self.local, "local store")?;
        self.sync.push(&url, &local, opts)
    }

    pub fn sync_pull(
        &self,
        server: &str,
        since: Option<DateTime<Utc>>,
        opts: &SyncOptions,
    ) -> Result<PullReport> {
        let url = validate_server_url(server)?;
        let local = lock(&self.local, "local store")?;
        let mut artifacts = lock(&self.artifacts, "artifact store")?;
        self.sync.pull(&url, since, &local, &mut artifacts, opts)
    }

    /// Download an allow-listed artifact into the cache, installing it when
    /// it is the model or the dataset
    pub fn sync_model(
        &self,
        server: &str,
        filename: &str,
        opts: &SyncOptions,
    ) -> Result<ModelDownload> {
        let url = validate_server_url(server)?;
        let bytes = self.sync.pull_model(&url, filename, opts)?;

        let staged = self.paths.download_file(filename);
        write_atomic(&staged, &bytes)?;

        let installed = match filename {
            MODEL_ARTIFACT => {
                self.import_model(&bytes)?;
                true
            }
            DATASET_ARTIFACT => {
                self.import_dataset(&bytes)?;
                true
            }
            _ => false,
        };
        if installed {
            let _ = fs::remove_file(&staged);
        }

        Ok(ModelDownload {
            artifact: filename.to_string(),
            bytes: bytes.len(),
            sha256: codec::sha256_hex(&bytes),
            installed,
        })
    }

    // ---- housekeeping ----

    pub fn stats(&self) -> Result<EngineStats> {
        let (device_id, store, last_push_at, last_pull_at) = {
            let local = lock(&self.local, "local store")?;
            (
                local.device_id()?,
                local.counts()?,
                local.meta(META_LAST_PUSH)?,
                local.meta(META_LAST_PULL)?,
            )
        };
        let artifacts = lock(&self.artifacts, "artifact store")?;
        let summary = artifacts.summary();

        Ok(EngineStats {
            version: env!("CARGO_PKG_VERSION"),
            device_id,
            model_label: artifacts.model().label.clone(),
            model_revision: summary.model_revision,
            dataset_version: summary.dataset_version,
            voice_templates: summary.voice_templates,
            ear_templates: summary.ear_templates,
            trained_classes: summary.trained_classes,
            store,
            last_push_at,
            last_pull_at,
        })
    }

    /// Delete staged downloads; returns how many files were removed
    pub fn clear_cache(&self) -> Result<usize> {
        let entries = match fs::read_dir(&self.paths.cache) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        for entry in entries {
            let path = entry?.path();
            if path.is_file() {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        log::info!("Cache cleared: {} files", removed);
        Ok(removed)
    }
}

fn unknown(external_id: &str, modality: Modality) -> EngineError {
    EngineError::UnknownIdentity {
        identifier: external_id.to_string(),
        modality,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::wav::tests::wav_bytes;
    use crate::audio::MfccConfig;
    use crate::matcher::Decision;
    use crate::model::{FeatureStats, ModelArtifact};
    use crate::test_support::{fixture_model, sine, striped_ear, write_model, FakeServer};
    use std::path::Path;

    fn open_engine(dir: &Path, model: &ModelArtifact) -> (Engine, Arc<FakeServer>) {
        open_with(dir, model, FakeServer::default())
    }

    fn open_with(dir: &Path, model: &ModelArtifact, fake: FakeServer) -> (Engine, Arc<FakeServer>) {
        let models = dir.join("models");
        fs::create_dir_all(&models).unwrap();
        write_model(&models, model);

        let paths = EnginePaths::new(&dir.join("bio.db"), &models, &dir.join("dataset.bin"));
        let fake = Arc::new(fake);
        let engine = Engine::with_transport(paths, fake.clone()).unwrap();
        (engine, fake)
    }

    fn tone_wav(freq: f64) -> Vec<u8> {
        wav_bytes(&sine(freq, 0.5, 16000), 16000, 1, 16)
    }

    /// Normalizer fitted on a handful of tones spread over the band
    fn tone_stats() -> FeatureStats {
        let ex = MfccExtractor::new(MfccConfig::default()).unwrap();
        let feats: Vec<Vec<f64>> = [300.0, 700.0, 1200.0, 2000.0, 3000.0]
            .iter()
            .map(|&f| ex.extract(&sine(f, 0.5, 16000)).unwrap())
            .collect();

        let n = feats.len() as f64;
        let dim = feats[0].len();
        let mean: Vec<f64> = (0..dim)
            .map(|i| feats.iter().map(|v| v[i]).sum::<f64>() / n)
            .collect();
        let std = (0..dim)
            .map(|i| {
                let var = feats.iter().map(|v| (v[i] - mean[i]).powi(2)).sum::<f64>() / n;
                var.sqrt()
            })
            .collect();
        FeatureStats { mean, std }
    }

    #[test]
    fn test_engine_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Engine>();
    }

    #[test]
    fn test_missing_model_fails_init() {
        let dir = tempfile::tempdir().unwrap();
        let paths = EnginePaths::new(
            &dir.path().join("bio.db"),
            &dir.path().join("models"),
            &dir.path().join("dataset.bin"),
        );
        let result = Engine::with_transport(paths, Arc::new(FakeServer::default()));
        assert!(matches!(result, Err(EngineError::NotFound(_))));
    }

    #[test]
    fn test_ear_enroll_and_authenticate() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _) = open_engine(dir.path(), &fixture_model(None));

        let images: Vec<_> = (0..5).map(|s| striped_ear(true, s)).collect();
        let report = engine.enroll_ear("U1", &images).unwrap();
        assert!(report.created_user);
        assert_eq!(report.sample_ids.len(), 5);
        assert_eq!(report.sample_count, 5);

        let same = engine.authenticate_ear("U1", &images[2], None).unwrap();
        assert_eq!(same.decision, Decision::Accept);
        assert!(same.score < 0.05);

        let other = engine
            .authenticate_ear("U1", &striped_ear(false, 3), None)
            .unwrap();
        assert_eq!(other.decision, Decision::Reject);
        assert!(other.score > 1.5);

        // Tight override rejects even the enrolled image
        let strict = engine
            .authenticate_ear("U1", &images[2], Some(0.0))
            .unwrap();
        assert_eq!(strict.decision, Decision::Reject);
    }

    #[test]
    fn test_ear_enrollment_needs_enough_images() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _) = open_engine(dir.path(), &fixture_model(None));

        let images: Vec<_> = (0..4).map(|s| striped_ear(true, s)).collect();
        assert!(matches!(
            engine.enroll_ear("U1", &images).unwrap_err(),
            EngineError::InvalidInput(_)
        ));
        assert!(!engine.user_exists("U1").unwrap());
    }

    #[test]
    fn test_unknown_identity() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _) = open_engine(dir.path(), &fixture_model(Some(tone_stats())));

        let err = engine
            .authenticate_ear("ghost", &striped_ear(true, 0), None)
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownIdentity { .. }));

        let err = engine
            .authenticate_voice("ghost", &tone_wav(440.0), None, None)
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::UnknownIdentity {
                modality: Modality::Voice,
                ..
            }
        ));
    }

    #[test]
    fn test_voice_enroll_and_authenticate() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _) = open_engine(dir.path(), &fixture_model(Some(tone_stats())));

        let report = engine.enroll_voice("alice", &tone_wav(440.0), None).unwrap();
        assert_eq!(report.template_version, 1);
        assert!(!report.capture.as_ref().unwrap().resampled);

        let same = engine
            .authenticate_voice("alice", &tone_wav(440.0), None, None)
            .unwrap();
        assert_eq!(same.decision, Decision::Accept);
        assert_eq!(same.threshold, 0.0);

        let other = engine
            .authenticate_voice("alice", &tone_wav(2500.0), None, None)
            .unwrap();
        assert_eq!(other.decision, Decision::Reject);
        assert!(other.score < same.score);

        let strict = engine
            .authenticate_voice("alice", &tone_wav(440.0), None, Some(same.score + 1.0))
            .unwrap();
        assert_eq!(strict.decision, Decision::Reject);
    }

    #[test]
    fn test_voice_needs_statistics() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _) = open_engine(dir.path(), &fixture_model(None));
        assert!(matches!(
            engine.enroll_voice("alice", &tone_wav(440.0), None).unwrap_err(),
            EngineError::StatisticsUnavailable(Modality::Voice)
        ));
        // Nothing was written for the failed attempt
        assert_eq!(engine.pending_count().unwrap(), 0);
    }

    #[test]
    fn test_short_utterance_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _) = open_engine(dir.path(), &fixture_model(Some(tone_stats())));
        let short = wav_bytes(&sine(440.0, 0.5, 3200), 16000, 1, 16);
        assert!(matches!(
            engine.enroll_voice("alice", &short, None).unwrap_err(),
            EngineError::InsufficientAudio { .. }
        ));
    }

    #[test]
    fn test_enroll_with_unknown_phrase() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _) = open_engine(dir.path(), &fixture_model(Some(tone_stats())));
        assert!(matches!(
            engine.enroll_voice("alice", &tone_wav(440.0), Some(42)).unwrap_err(),
            EngineError::NotFound(_)
        ));

        engine
            .insert_phrases(&[NewPhrase {
                text: "mi voz es mi clave".into(),
                category: "general".into(),
            }])
            .unwrap();
        let phrase = engine.random_phrase().unwrap();
        engine
            .enroll_voice("alice", &tone_wav(440.0), Some(phrase.phrase_id))
            .unwrap();
    }

    #[test]
    fn test_export_import_between_engines() {
        let dir_a = tempfile::tempdir().unwrap();
        let (a, _) = open_engine(dir_a.path(), &fixture_model(None));
        let images: Vec<_> = (0..5).map(|s| striped_ear(true, s)).collect();
        a.enroll_ear("U1", &images).unwrap();

        let dir_b = tempfile::tempdir().unwrap();
        let mut other_model = fixture_model(None);
        other_model.revision = 7;
        let (b, _) = open_engine(dir_b.path(), &other_model);

        b.import_model(&a.export_model().unwrap()).unwrap();
        b.import_dataset(&a.export_dataset().unwrap()).unwrap();

        assert_eq!(b.stats().unwrap().model_revision, 1);
        let out = b.authenticate_ear("U1", &images[0], None).unwrap();
        assert!(out.decision.accepted());

        // Survives a reload from disk
        let summary = b.reload().unwrap();
        assert_eq!(summary.ear_templates, 1);
    }

    #[test]
    fn test_push_after_enrollment() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, fake) = open_engine(dir.path(), &fixture_model(None));
        let images: Vec<_> = (0..5).map(|s| striped_ear(true, s)).collect();
        engine.enroll_ear("U1", &images).unwrap();
        assert_eq!(engine.pending_count().unwrap(), 6);

        let report = engine
            .sync_push("https://bio.example.org", &engine.sync_options())
            .unwrap();
        assert_eq!(report.sent, 6);
        assert_eq!(report.remaining, 0);
        assert_eq!(fake.pushed().len(), 6);

        let stats = engine.stats().unwrap();
        assert_eq!(stats.store.synced, 6);
        assert!(stats.last_push_at.is_some());
        assert!(stats.last_pull_at.is_none());
    }

    #[test]
    fn test_invalid_server_url() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, fake) = open_engine(dir.path(), &fixture_model(None));
        assert!(matches!(
            engine.sync_ping("ftp://nowhere", &engine.sync_options()).unwrap_err(),
            EngineError::InvalidInput(_)
        ));
        assert_eq!(fake.call_count(), 0);
    }

    #[test]
    fn test_sync_model_installs_dataset() {
        let source_dir = tempfile::tempdir().unwrap();
        let (source, _) = open_engine(source_dir.path(), &fixture_model(None));
        let images: Vec<_> = (0..5).map(|s| striped_ear(true, s)).collect();
        source.enroll_ear("U1", &images).unwrap();
        let artifact = source.export_dataset().unwrap();

        let dir = tempfile::tempdir().unwrap();
        let (engine, _) = open_with(
            dir.path(),
            &fixture_model(None),
            FakeServer {
                artifact: artifact.clone(),
                ..Default::default()
            },
        );

        let download = engine
            .sync_model("https://bio.example.org", DATASET_ARTIFACT, &engine.sync_options())
            .unwrap();
        assert!(download.installed);
        assert_eq!(download.bytes, artifact.len());
        assert_eq!(download.sha256, codec::sha256_hex(&artifact));
        assert!(engine
            .authenticate_ear("U1", &images[1], None)
            .unwrap()
            .decision
            .accepted());
        assert!(!engine.paths().download_file(DATASET_ARTIFACT).exists());
    }

    #[test]
    fn test_sync_model_rejects_bad_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _) = open_with(
            dir.path(),
            &fixture_model(None),
            FakeServer {
                artifact: b"not an artifact".to_vec(),
                ..Default::default()
            },
        );

        assert!(engine
            .sync_model("https://bio.example.org", MODEL_ARTIFACT, &engine.sync_options())
            .is_err());
        assert_eq!(engine.stats().unwrap().model_label, "fixture");

        // The rejected download stays staged until the cache is cleared
        assert!(engine.paths().download_file(MODEL_ARTIFACT).exists());
        assert_eq!(engine.clear_cache().unwrap(), 1);
        assert_eq!(engine.clear_cache().unwrap(), 0);
    }

    #[test]
    fn test_users_and_stats() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _) = open_engine(dir.path(), &fixture_model(None));

        assert_eq!(engine.user_id("alice").unwrap(), None);
        let (user, created) = engine.create_user("alice").unwrap();
        assert!(created);
        let (again, created) = engine.create_user("alice").unwrap();
        assert!(!created);
        assert_eq!(user.user_id, again.user_id);
        assert!(engine.user_id("bad/id").is_err());

        let pending = engine.pending_items(None).unwrap();
        assert_eq!(pending.len(), 1);
        assert!(engine.mark_synced(pending[0].sync_id).unwrap());
        assert!(!engine.mark_synced(pending[0].sync_id).unwrap());

        let stats = engine.stats().unwrap();
        assert_eq!(stats.store.users, 1);
        assert_eq!(stats.store.pending_sync, 0);
        assert_eq!(stats.device_id.len(), 16);
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["store"]["synced"], 1);
    }
}
