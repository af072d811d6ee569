use crate::audio::MfccConfig;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Engine configuration (`engine.toml` next to the model artifact)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub mfcc: MfccConfig,
    pub voice: VoiceConfig,
    pub ear: EarConfig,
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    /// Shortest utterance accepted for enrollment or verification (ms)
    pub min_duration_ms: u64,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            min_duration_ms: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EarConfig {
    /// Images required per enrollment call
    pub enroll_images_min: usize,
    /// Used when neither the caller nor the model gives a threshold
    pub default_threshold: f64,
}

impl Default for EarConfig {
    fn default() -> Self {
        Self {
            enroll_images_min: 5,
            default_threshold: crate::matcher::DEFAULT_EAR_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub timeout_ms: u64,
    pub ping_path: String,
    pub push_path: String,
    pub pull_path: String,
    pub model_path: String,
    /// Remote artifacts `pull_model` may fetch
    pub allowed_artifacts: Vec<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            ping_path: "/api/sync/ping".to_string(),
            push_path: "/api/sync/subida".to_string(),
            pull_path: "/api/sync/descarga".to_string(),
            model_path: "/api/sync/modelo".to_string(),
            allowed_artifacts: vec!["model.bin".to_string(), "dataset.bin".to_string()],
        }
    }
}

impl SyncConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl EngineConfig {
    /// Load config from file, or fall back to defaults when absent
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            log::info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: EngineConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        config
            .mfcc
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid [mfcc] section: {}", e))?;

        log::info!("Config loaded from: {}", path.display());
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::TransformKind;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::load_or_default(&dir.path().join("engine.toml")).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.mfcc.frame_size, 512);
        assert_eq!(config.ear.enroll_images_min, 5);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        fs::write(
            &path,
            "[mfcc]\ntransform = \"fft\"\n\n[sync]\ntimeout_ms = 2500\n",
        )
        .unwrap();

        let config = EngineConfig::load_or_default(&path).unwrap();
        assert_eq!(config.mfcc.transform, TransformKind::Fft);
        assert_eq!(config.mfcc.num_coeffs, 13);
        assert_eq!(config.sync.timeout(), Duration::from_millis(2500));
        assert_eq!(config.sync.push_path, "/api/sync/subida");
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        fs::write(&path, "[mfcc]\nnum_coeffs = 40\n").unwrap();
        assert!(EngineConfig::load_or_default(&path).is_err());

        fs::write(&path, "not = [valid").unwrap();
        assert!(EngineConfig::load_or_default(&path).is_err());
    }

    #[test]
    fn test_serializes_to_toml() {
        let text = toml::to_string_pretty(&EngineConfig::default()).unwrap();
        assert!(text.contains("[sync]"));
        let back: EngineConfig = toml::from_str(&text).unwrap();
        assert_eq!(back, EngineConfig::default());
    }
}
