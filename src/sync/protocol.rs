//! Wire types for the server's `/api/sync` routes
//!
//! Field names follow the server's JSON, which is why they are Spanish.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const ENTITY_USER: &str = "usuario";
pub const ENTITY_CREDENTIAL: &str = "credencial";

/// Body of `POST <push_path>`; the engine sends one creation per request
#[derive(Debug, Clone, Serialize)]
pub struct PushRequest {
    #[serde(rename = "dispositivo_id")]
    pub device_id: String,
    #[serde(rename = "creaciones")]
    pub creations: Vec<Creation>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Creation {
    #[serde(rename = "tipo_entidad")]
    pub entity: String,
    pub local_uuid: String,
    #[serde(rename = "id_cola")]
    pub queue_id: i64,
    #[serde(rename = "datos")]
    pub data: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(rename = "exitosas", default)]
    pub succeeded: u64,
    #[serde(rename = "errores", default)]
    pub errors: Option<Vec<Value>>,
    #[serde(default)]
    pub mappings: Vec<Mapping>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Mapping {
    pub local_uuid: Option<String>,
    #[serde(rename = "entidad")]
    pub entity: String,
    pub remote_id: i64,
    #[serde(rename = "id_cola")]
    pub queue_id: Option<i64>,
}

impl PushResponse {
    /// Acknowledgement for exactly this queue item
    pub fn ack_for(&self, queue_id: i64) -> Option<&Mapping> {
        if !self.success || self.errors.as_ref().is_some_and(|e| !e.is_empty()) {
            return None;
        }
        self.mappings.iter().find(|m| m.queue_id == Some(queue_id))
    }
}

/// Body of `POST <pull_path>`
#[derive(Debug, Clone, Serialize)]
pub struct PullRequest {
    #[serde(rename = "dispositivo_id")]
    pub device_id: String,
    #[serde(rename = "ultima_sync")]
    pub since: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullResponse {
    #[serde(default)]
    pub success: bool,
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(rename = "datos", default)]
    pub data: PullData,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PullData {
    #[serde(rename = "usuarios", default)]
    pub users: Vec<RemoteUser>,
    #[serde(rename = "credenciales_biometricas", default)]
    pub credentials: Vec<RemoteCredential>,
    #[serde(rename = "textos_audio", default)]
    pub phrases: Vec<RemotePhrase>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteUser {
    #[serde(rename = "id_usuario")]
    pub remote_id: Option<i64>,
    #[serde(rename = "identificador_unico")]
    pub external_id: Option<String>,
    #[serde(rename = "estado", default = "default_status")]
    pub status: String,
    #[serde(rename = "fecha_actualizacion", default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteCredential {
    #[serde(rename = "id_credencial")]
    pub remote_id: Option<i64>,
    #[serde(rename = "identificador_unico")]
    pub external_id: Option<String>,
    #[serde(rename = "tipo_biometria")]
    pub modality: Option<String>,
    /// Aggregated template vector; credentials without one are metadata only
    pub template: Option<Vec<f64>>,
    #[serde(rename = "cantidad_muestras", default)]
    pub sample_count: Option<u32>,
    #[serde(rename = "estado", default = "default_status")]
    pub status: String,
    #[serde(rename = "fecha_actualizacion", default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemotePhrase {
    #[serde(rename = "id_texto")]
    pub remote_id: i64,
    #[serde(rename = "frase")]
    pub text: String,
    #[serde(rename = "estado_texto", default = "default_status")]
    pub status: String,
    #[serde(rename = "fecha_actualizacion", default)]
    pub updated_at: Option<DateTime<Utc>>,
}

fn default_status() -> String {
    "activo".to_string()
}

/// Server status strings map to "active" unless explicitly inactive
pub fn is_active(status: &str) -> bool {
    !matches!(status, "inactivo" | "inactive" | "bloqueado" | "blocked" | "eliminado")
}
