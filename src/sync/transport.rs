//! HTTP transport behind a blocking facade
//!
//! Each engine owns a private current-thread tokio runtime; every request is
//! driven to completion on the caller's thread, bounded by the caller's
//! timeout and aborted early when the cancel token fires.

use crate::error::{EngineError, Result};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

const CANCEL_POLL: Duration = Duration::from_millis(25);

/// Cooperative cancellation flag shared with the host
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    async fn cancelled(&self) {
        while !self.is_cancelled() {
            tokio::time::sleep(CANCEL_POLL).await;
        }
    }
}

/// Per-call network options
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub timeout: Duration,
    pub cancel: Option<CancelToken>,
}

impl SyncOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            cancel: None,
        }
    }

    /// Options for one request of a multi-request operation that must finish
    /// by `deadline`; fails once the budget is spent
    pub fn remaining_until(&self, deadline: Instant) -> Result<SyncOptions> {
        let left = deadline.saturating_duration_since(Instant::now());
        if left.is_zero() {
            return Err(EngineError::Network(format!(
                "timed out after {} ms",
                self.timeout.as_millis()
            )));
        }
        Ok(SyncOptions {
            timeout: left,
            cancel: self.cancel.clone(),
        })
    }

    pub fn check_cancelled(&self) -> Result<()> {
        match &self.cancel {
            Some(token) if token.is_cancelled() => Err(EngineError::Cancelled),
            _ => Ok(()),
        }
    }
}

pub trait SyncTransport: Send + Sync {
    fn post_json(&self, url: &Url, body: &Value, opts: &SyncOptions) -> Result<Value>;

    fn get_json(&self, url: &Url, opts: &SyncOptions) -> Result<Value>;

    fn get_bytes(&self, url: &Url, opts: &SyncOptions) -> Result<Vec<u8>>;
}

pub struct HttpTransport {
    client: reqwest::Client,
    runtime: tokio::runtime::Runtime,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| EngineError::Network(format!("runtime: {}", e)))?;
        let client = reqwest::Client::builder()
            .user_agent(concat!("biomatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| EngineError::Network(e.to_string()))?;
        Ok(Self { client, runtime })
    }

    fn run<T, F>(&self, opts: &SyncOptions, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        opts.check_cancelled()?;
        let cancel = opts.cancel.clone().unwrap_or_default();
        let timeout = opts.timeout;

        self.runtime.block_on(async move {
            tokio::select! {
                res = tokio::time::timeout(timeout, fut) => match res {
                    Ok(inner) => inner,
                    Err(_) => Err(EngineError::Network(format!(
                        "timed out after {} ms",
                        timeout.as_millis()
                    ))),
                },
                _ = cancel.cancelled() => Err(EngineError::Cancelled),
            }
        })
    }

    async fn checked(resp: reqwest::Response) -> Result<reqwest::Response> {
        if !resp.status().is_success() {
            return Err(EngineError::Network(format!(
                "server returned status {}",
                resp.status()
            )));
        }
        Ok(resp)
    }
}

fn net_err(e: reqwest::Error) -> EngineError {
    EngineError::Network(e.to_string())
}

impl SyncTransport for HttpTransport {
    fn post_json(&self, url: &Url, body: &Value, opts: &SyncOptions) -> Result<Value> {
        log::debug!("POST {}", url);
        self.run(opts, async {
            let resp = self
                .client
                .post(url.clone())
                .json(body)
                .send()
                .await
                .map_err(net_err)?;
            Self::checked(resp).await?.json().await.map_err(net_err)
        })
    }

    fn get_json(&self, url: &Url, opts: &SyncOptions) -> Result<Value> {
        log::debug!("GET {}", url);
        self.run(opts, async {
            let resp = self.client.get(url.clone()).send().await.map_err(net_err)?;
            Self::checked(resp).await?.json().await.map_err(net_err)
        })
    }

    fn get_bytes(&self, url: &Url, opts: &SyncOptions) -> Result<Vec<u8>> {
        log::debug!("GET {} (binary)", url);
        self.run(opts, async {
            let resp = self.client.get(url.clone()).send().await.map_err(net_err)?;
            let bytes = Self::checked(resp).await?.bytes().await.map_err(net_err)?;
            Ok(bytes.to_vec())
        })
    }
}
