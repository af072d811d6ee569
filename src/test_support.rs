//! Shared fixtures for unit tests

use crate::ear::{EarProjection, GrayImage};
use crate::model::codec::{self, BlobKind};
use crate::model::{
    DistanceMetric, EarModel, FeatureStats, LinearClassifier, Matrix, ModelArtifact, VoiceModel,
};
use chrono::{TimeZone, Utc};
use std::path::Path;

pub const EAR_SIDE: usize = 8;

/// PCA rows average one image row each; LDA rows contrast row pairs.
/// Images with bright even rows project near `[+a; 4]`, bright odd rows
/// near `[-a; 4]`.
pub fn fixture_projection() -> EarProjection {
    let d = EAR_SIDE * EAR_SIDE;

    let mut pca = vec![0.0; EAR_SIDE * d];
    for r in 0..EAR_SIDE {
        for c in 0..EAR_SIDE {
            pca[r * d + r * EAR_SIDE + c] = 1.0 / EAR_SIDE as f64;
        }
    }

    let mut lda = vec![0.0; 4 * EAR_SIDE];
    for i in 0..4 {
        lda[i * EAR_SIDE + 2 * i] = 1.0;
        lda[i * EAR_SIDE + 2 * i + 1] = -1.0;
    }

    EarProjection {
        width: EAR_SIDE,
        height: EAR_SIDE,
        pca_mean: vec![0.5; d],
        pca: Matrix::new(EAR_SIDE, d, pca).unwrap(),
        lda: Matrix::new(4, EAR_SIDE, lda).unwrap(),
    }
}

pub fn fixture_model(voice_stats: Option<FeatureStats>) -> ModelArtifact {
    ModelArtifact {
        revision: 1,
        label: "fixture".to_string(),
        created_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        voice: VoiceModel {
            stats: voice_stats,
            classifier: LinearClassifier::default(),
            threshold: 0.0,
        },
        ear: EarModel {
            stats: Some(FeatureStats {
                mean: vec![0.0; 4],
                std: vec![1.0; 4],
            }),
            projection: Some(fixture_projection()),
            metric: DistanceMetric::Cosine,
            eer_threshold: None,
        },
    }
}

pub fn write_model(dir: &Path, model: &ModelArtifact) {
    let bytes = codec::encode(BlobKind::Model, model).unwrap();
    std::fs::write(dir.join("model.bin"), bytes).unwrap();
}

/// Striped ear image; `seed` perturbs pixels slightly
pub fn striped_ear(even_rows_bright: bool, seed: u8) -> GrayImage {
    let mut pixels = Vec::with_capacity(EAR_SIDE * EAR_SIDE);
    for r in 0..EAR_SIDE {
        let bright = (r % 2 == 0) == even_rows_bright;
        for c in 0..EAR_SIDE {
            let jitter = ((r * 31 + c * 17 + seed as usize * 7) % 11) as u8;
            pixels.push(if bright { 230 - jitter } else { 20 + jitter });
        }
    }
    GrayImage::new(EAR_SIDE, EAR_SIDE, pixels).unwrap()
}

/// In-process stand-in for the sync server
///
/// Acknowledges every push except the `fail_on`-th one (0-based), answers
/// pulls with `pull_body` and serves `artifact` for binary downloads. Each
/// push takes `push_delay`, failing like a real timeout when the request's
/// budget is shorter.
#[derive(Default)]
pub struct FakeServer {
    pub fail_on: Option<usize>,
    pub push_delay: Option<std::time::Duration>,
    pub pull_body: serde_json::Value,
    pub artifact: Vec<u8>,
    pub calls: std::sync::Mutex<Vec<(String, serde_json::Value)>>,
}

impl FakeServer {
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn pushed(&self) -> Vec<serde_json::Value> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(path, _)| path.ends_with("/subida"))
            .map(|(_, body)| body.clone())
            .collect()
    }

    fn record(&self, url: &url::Url, body: serde_json::Value) -> usize {
        let mut calls = self.calls.lock().unwrap();
        calls.push((url.path().to_string(), body));
        calls.len() - 1
    }
}

impl crate::sync::SyncTransport for FakeServer {
    fn post_json(
        &self,
        url: &url::Url,
        body: &serde_json::Value,
        opts: &crate::sync::SyncOptions,
    ) -> crate::error::Result<serde_json::Value> {
        self.record(url, body.clone());
        if url.path().ends_with("/descarga") {
            return Ok(self.pull_body.clone());
        }

        if let Some(delay) = self.push_delay {
            std::thread::sleep(delay.min(opts.timeout));
            if delay > opts.timeout {
                return Err(crate::error::EngineError::Network("timed out".into()));
            }
        }
        let push_index = self.pushed().len() - 1;
        if Some(push_index) == self.fail_on {
            return Err(crate::error::EngineError::Network("connection reset".into()));
        }
        let creation = &body["creaciones"][0];
        let queue_id = creation["id_cola"].as_i64().unwrap();
        Ok(serde_json::json!({
            "success": true,
            "exitosas": 1,
            "errores": [],
            "mappings": [{
                "local_uuid": creation["local_uuid"],
                "entidad": creation["tipo_entidad"],
                "remote_id": 100 + queue_id,
                "id_cola": queue_id,
            }],
            "timestamp": "2024-05-01T12:00:00Z",
        }))
    }

    fn get_json(
        &self,
        url: &url::Url,
        _opts: &crate::sync::SyncOptions,
    ) -> crate::error::Result<serde_json::Value> {
        self.record(url, serde_json::Value::Null);
        Ok(serde_json::json!({"success": true, "timestamp": "2024-05-01T12:00:00Z"}))
    }

    fn get_bytes(
        &self,
        url: &url::Url,
        _opts: &crate::sync::SyncOptions,
    ) -> crate::error::Result<Vec<u8>> {
        self.record(url, serde_json::Value::Null);
        Ok(self.artifact.clone())
    }
}

/// 16 kHz sine tone, `amplitude` relative to full scale
pub fn sine(freq: f64, amplitude: f64, n: usize) -> Vec<i16> {
    (0..n)
        .map(|i| {
            let t = i as f64 / 16000.0;
            ((2.0 * std::f64::consts::PI * freq * t).sin() * amplitude * 32767.0) as i16
        })
        .collect()
}
