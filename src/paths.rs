use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::fs;
use std::path::{Path, PathBuf};

/// File layout of one engine instance
#[derive(Clone, Debug)]
pub struct EnginePaths {
    /// SQLite row store (users, phrases, samples, sync queue)
    pub store: PathBuf,
    /// Directory holding `model.bin` and the optional `engine.toml`
    pub model_dir: PathBuf,
    /// Template dataset snapshot
    pub dataset: PathBuf,
    /// Scratch space for downloaded artifacts
    pub cache: PathBuf,
}

impl EnginePaths {
    /// Paths supplied by the host app; the cache sits next to the store
    pub fn new(store: &Path, model_dir: &Path, dataset: &Path) -> Self {
        let cache = store
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .join("cache");

        Self {
            store: store.to_path_buf(),
            model_dir: model_dir.to_path_buf(),
            dataset: dataset.to_path_buf(),
            cache,
        }
    }

    /// Resolve OS-specific paths
    ///
    /// # Platform Paths
    ///
    /// ## Linux
    /// - Data: `~/.local/share/biomatch/` → biometrics.db, models/, dataset.bin
    /// - Cache: `~/.cache/biomatch/`
    ///
    /// ## macOS
    /// - Data: `~/Library/Application Support/com.LotusEmberLabs.biomatch/`
    /// - Cache: `~/Library/Caches/com.LotusEmberLabs.biomatch/`
    ///
    /// ## Windows
    /// - Data: `%APPDATA%\LotusEmberLabs\biomatch\data\`
    /// - Cache: `%LOCALAPPDATA%\LotusEmberLabs\biomatch\cache\`
    pub fn platform_default() -> Result<Self> {
        let proj_dirs = ProjectDirs::from("com", "LotusEmberLabs", "biomatch")
            .context("Failed to determine project directories")?;

        let data = proj_dirs.data_dir();
        Ok(Self {
            store: data.join("biometrics.db"),
            model_dir: data.join("models"),
            dataset: data.join("dataset.bin"),
            cache: proj_dirs.cache_dir().to_path_buf(),
        })
    }

    /// Create parent directories for everything the engine writes
    pub fn ensure_directories(&self) -> Result<()> {
        for file in [&self.store, &self.dataset] {
            if let Some(parent) = file.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }
        fs::create_dir_all(&self.cache).context("Failed to create cache directory")?;

        log::debug!("Engine paths:");
        log::debug!("  Store:   {}", self.store.display());
        log::debug!("  Models:  {}", self.model_dir.display());
        log::debug!("  Dataset: {}", self.dataset.display());
        log::debug!("  Cache:   {}", self.cache.display());
        Ok(())
    }

    /// Get path to the model artifact
    pub fn model_file(&self) -> PathBuf {
        self.model_dir.join("model.bin")
    }

    /// Get path to the optional engine config
    pub fn config_file(&self) -> PathBuf {
        self.model_dir.join("engine.toml")
    }

    /// Staging path for a downloaded artifact
    pub fn download_file(&self, name: &str) -> PathBuf {
        self.cache.join(format!("{}.download", name))
    }
}
