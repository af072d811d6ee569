//! Offline-first synchronization with the remote server
//!
//! Push drains the local outbox one item per request, in creation order, and
//! stops at the first failure. An item is marked synced only when the server
//! acknowledges that exact queue id. The caller's timeout bounds the whole
//! pass. Pull merges users, templates and phrases with last-writer-wins on
//! timestamps; credentials only replace a local template when they carry an
//! aggregated sample count.

pub mod protocol;
pub mod transport;

pub use transport::{CancelToken, HttpTransport, SyncOptions, SyncTransport};

use crate::config::SyncConfig;
use crate::error::{EngineError, Result};
use crate::model::{ArtifactStore, Modality, Template};
use crate::storage::{LocalStore, QueueEntity, QueueItem, META_LAST_PULL, META_LAST_PUSH};
use chrono::{DateTime, Utc};
use protocol::{
    Creation, PullRequest, PullResponse, PushRequest, PushResponse, ENTITY_CREDENTIAL,
    ENTITY_USER,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use url::Url;

const ALGORITHM_VOICE: &str = "mfcc13-mean";
const ALGORITHM_EAR: &str = "pca-lda";

#[derive(Debug, Clone, Default, Serialize)]
pub struct PushReport {
    pub sent: usize,
    pub remaining: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PullReport {
    pub users: usize,
    pub templates: usize,
    pub phrases: usize,
    /// Items that were malformed or older than the local copy
    pub skipped: usize,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Join an endpoint path onto the server URL, keeping any base path
fn endpoint(server: &Url, path: &str) -> Url {
    let mut url = server.clone();
    let joined = format!(
        "{}/{}",
        server.path().trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    url.set_path(&joined);
    url
}

pub struct SyncEngine {
    transport: Arc<dyn SyncTransport>,
    config: SyncConfig,
}

impl SyncEngine {
    pub fn new(transport: Arc<dyn SyncTransport>, config: SyncConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Options with the configured timeout and no cancellation
    pub fn default_options(&self) -> SyncOptions {
        SyncOptions::with_timeout(self.config.timeout())
    }

    /// Server reachability check
    pub fn ping(&self, server: &Url, opts: &SyncOptions) -> Result<bool> {
        let resp = self
            .transport
            .get_json(&endpoint(server, &self.config.ping_path), opts)?;
        let up = resp.get("success").and_then(Value::as_bool).unwrap_or(true);
        log::info!("Ping {}: {}", server, if up { "up" } else { "down" });
        Ok(up)
    }

    pub fn push(&self, server: &Url, store: &LocalStore, opts: &SyncOptions) -> Result<PushReport> {
        let url = endpoint(server, &self.config.push_path);
        let device_id = store.device_id()?;
        let pending = store.pending(None)?;
        log::info!("Push: {} pending items to {}", pending.len(), url);

        let deadline = Instant::now() + opts.timeout;
        let mut report = PushReport::default();
        for item in &pending {
            let step = opts
                .remaining_until(deadline)
                .and_then(|step| self.push_item(&url, &device_id, store, item, &step));
            match step {
                Ok(()) => report.sent += 1,
                Err(EngineError::Storage(e)) => return Err(EngineError::Storage(e)),
                Err(e) => {
                    log::warn!("Push stopped at queue item {}: {}", item.sync_id, e);
                    report.error = Some(e.to_string());
                    break;
                }
            }
        }

        report.remaining = store.pending_count()?;
        if report.error.is_none() {
            store.set_meta(META_LAST_PUSH, &Utc::now().to_rfc3339())?;
        }
        log::info!(
            "Push finished: sent={}, remaining={}",
            report.sent,
            report.remaining
        );
        Ok(report)
    }

    fn push_item(
        &self,
        url: &Url,
        device_id: &str,
        store: &LocalStore,
        item: &QueueItem,
        opts: &SyncOptions,
    ) -> Result<()> {
        opts.check_cancelled()?;

        let (entity, data) = match item.entity {
            QueueEntity::User => (ENTITY_USER, user_data(&item.payload)),
            QueueEntity::Sample => (ENTITY_CREDENTIAL, credential_data(store, &item.payload)?),
        };
        let request = PushRequest {
            device_id: device_id.to_string(),
            creations: vec![Creation {
                entity: entity.to_string(),
                local_uuid: item.payload_ref.clone(),
                queue_id: item.sync_id,
                data,
            }],
        };

        let raw = self
            .transport
            .post_json(url, &serde_json::to_value(&request)?, opts)?;
        let response: PushResponse = serde_json::from_value(raw)?;
        let ack = response.ack_for(item.sync_id).ok_or_else(|| {
            EngineError::Network(
                response
                    .error
                    .clone()
                    .unwrap_or_else(|| format!("no acknowledgement for item {}", item.sync_id)),
            )
        })?;

        if item.entity == QueueEntity::User {
            store.set_remote_id(&item.payload_ref, ack.remote_id)?;
        }
        store.mark_synced(item.sync_id)?;
        log::debug!(
            "Queue item {} ({}) acknowledged as remote {}",
            item.sync_id,
            entity,
            ack.remote_id
        );
        Ok(())
    }

    /// Fetch and merge everything newer than `since` (`None` fetches all)
    pub fn pull(
        &self,
        server: &Url,
        since: Option<DateTime<Utc>>,
        store: &LocalStore,
        artifacts: &mut ArtifactStore,
        opts: &SyncOptions,
    ) -> Result<PullReport> {
        let url = endpoint(server, &self.config.pull_path);
        let request = PullRequest {
            device_id: store.device_id()?,
            since,
        };
        let raw = self
            .transport
            .post_json(&url, &serde_json::to_value(&request)?, opts)?;
        let response: PullResponse = serde_json::from_value(raw)?;
        if !response.success {
            return Err(EngineError::Network(
                response
                    .error
                    .unwrap_or_else(|| "server reported failure".to_string()),
            ));
        }

        let fallback = response.timestamp;
        let mut report = PullReport {
            timestamp: response.timestamp,
            ..Default::default()
        };

        for user in &response.data.users {
            let (Some(external_id), Some(updated_at)) =
                (user.external_id.as_deref(), user.updated_at.or(fallback))
            else {
                report.skipped += 1;
                continue;
            };
            if store.merge_remote_user(external_id, user.remote_id, &user.status, updated_at)? {
                report.users += 1;
            } else {
                report.skipped += 1;
            }
        }

        for credential in &response.data.credentials {
            match remote_template(credential, fallback) {
                Some(template) if fits_local(artifacts, &template) => {
                    if artifacts.merge_remote_template(template)? {
                        report.templates += 1;
                    } else {
                        report.skipped += 1;
                    }
                }
                _ => report.skipped += 1,
            }
        }

        for phrase in &response.data.phrases {
            let Some(updated_at) = phrase.updated_at.or(fallback) else {
                report.skipped += 1;
                continue;
            };
            if crate::validation::validate_phrase(&phrase.text, "general").is_err() {
                report.skipped += 1;
                continue;
            }
            let active = protocol::is_active(&phrase.status);
            if store.merge_remote_phrase(phrase.remote_id, &phrase.text, active, updated_at)? {
                report.phrases += 1;
            } else {
                report.skipped += 1;
            }
        }

        let stamp = response.timestamp.unwrap_or_else(Utc::now);
        store.set_meta(META_LAST_PULL, &stamp.to_rfc3339())?;
        log::info!(
            "Pull finished: users={}, templates={}, phrases={}, skipped={}",
            report.users,
            report.templates,
            report.phrases,
            report.skipped
        );
        Ok(report)
    }

    /// Download an allow-listed artifact
    pub fn pull_model(&self, server: &Url, filename: &str, opts: &SyncOptions) -> Result<Vec<u8>> {
        if !self.config.allowed_artifacts.iter().any(|a| a == filename) {
            return Err(EngineError::ForbiddenArtifact(filename.to_string()));
        }
        let name = crate::validation::validate_artifact_name(filename)?;

        let url = endpoint(
            server,
            &format!("{}/{}", self.config.model_path.trim_end_matches('/'), name),
        );
        let bytes = self.transport.get_bytes(&url, opts)?;
        log::info!("Downloaded '{}' ({} bytes)", name, bytes.len());
        Ok(bytes)
    }
}

fn user_data(payload: &Value) -> Value {
    json!({
        "identificador_unico": payload["external_id"],
        "estado": "activo",
        "fecha_creacion": payload["created_at"],
    })
}

fn credential_data(store: &LocalStore, payload: &Value) -> Result<Value> {
    let external_id = payload["external_id"]
        .as_str()
        .ok_or_else(|| EngineError::Format("sample payload without external_id".to_string()))?;
    let remote_user = store
        .user(external_id)?
        .and_then(|u| u.remote_id)
        .ok_or_else(|| {
            EngineError::Network(format!("user '{}' has no remote id yet", external_id))
        })?;
    let algorithm = match payload["modality"].as_str().and_then(Modality::parse) {
        Some(Modality::Voice) => ALGORITHM_VOICE,
        Some(Modality::Ear) => ALGORITHM_EAR,
        None => {
            return Err(EngineError::Format(
                "sample payload without modality".to_string(),
            ))
        }
    };

    Ok(json!({
        "identificador_unico": external_id,
        "id_usuario_remote": remote_user,
        "tipo_biometria": payload["modality"],
        "template": payload["features"],
        "version_algoritmo": algorithm,
        "estado": "activo",
    }))
}

fn remote_template(
    credential: &protocol::RemoteCredential,
    fallback: Option<DateTime<Utc>>,
) -> Option<Template> {
    if !protocol::is_active(&credential.status) {
        return None;
    }
    let external_id = credential.external_id.as_deref()?;
    let modality = Modality::parse(credential.modality.as_deref()?)?;
    // Without an aggregated count the vector is a single pushed sample
    let sample_count = credential.sample_count.filter(|n| *n > 0)?;
    let vector = credential.template.clone()?;
    if vector.is_empty() || vector.iter().any(|v| !v.is_finite()) {
        return None;
    }

    let mut template = Template::new(external_id, modality, vector);
    template.sample_count = sample_count;
    template.updated_at = credential.updated_at.or(fallback)?;
    Some(template)
}

/// A remote template must match the dimension of any local one it replaces
fn fits_local(artifacts: &ArtifactStore, template: &Template) -> bool {
    artifacts
        .template(&template.external_id, template.modality)
        .map_or(true, |local| local.vector.len() == template.vector.len())
}
