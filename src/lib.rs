//! biomatch: on-device voice and ear biometrics with offline-first sync
//!
//! The crate builds as a static/dynamic library for mobile hosts (see
//! [`ffi`]) and as an rlib exposing [`Engine`] directly.

pub mod audio;
pub mod config;
pub mod ear;
pub mod engine;
pub mod error;
pub mod ffi;
pub mod matcher;
pub mod model;
pub mod paths;
pub mod storage;
pub mod sync;
pub mod validation;

#[cfg(test)]
mod test_support;

pub use config::EngineConfig;
pub use engine::{EngineStats, EnrollReport, Engine, ModelDownload};
pub use error::{EngineError, Result};
pub use matcher::{AuthOutcome, Decision};
pub use model::Modality;
pub use paths::EnginePaths;
pub use sync::{CancelToken, PullReport, PushReport, SyncOptions};
