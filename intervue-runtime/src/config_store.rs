use anyhow::Context;
use intervue_core::AppConfig;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::defaults::default_app_config;

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> anyhow::Result<AppConfig> {
        let bytes = std::fs::read(&self.path)
            .with_context(|| format!("read config: {}", self.path.display()))?;
        let cfg: AppConfig = serde_json::from_slice(&bytes).context("decode config JSON")?;
        Ok(cfg)
    }

    /// Load the stored config, writing the defaults first when no file exists yet.
    pub fn load_or_init(&self) -> anyhow::Result<AppConfig> {
        if self.path.exists() {
            return self.load();
        }
        let cfg = default_app_config();
        self.save(&cfg)?;
        log::info!("config: wrote defaults to {}", self.path.display());
        Ok(cfg)
    }

    /// Remember whether an STT key was stored in the keyring, without the key itself.
    pub fn record_stt_api_key_present(&self, present: bool) -> anyhow::Result<AppConfig> {
        let mut cfg = self.load_or_init()?;
        cfg.stt_api_key_present = present;
        self.save(&cfg)?;
        Ok(cfg)
    }

    pub fn save(&self, cfg: &AppConfig) -> anyhow::Result<()> {
        let json = serde_json::to_vec_pretty(cfg).context("encode config JSON")?;
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&parent)
            .with_context(|| format!("create config directory: {}", parent.display()))?;

        // Write to a sibling temp file, then rename over the target so readers
        // never observe a half-written config.
        let mut tmp = tempfile::NamedTempFile::new_in(&parent)
            .with_context(|| format!("create temp file in {}", parent.display()))?;
        tmp.write_all(&json).context("write temp config")?;
        tmp.as_file().sync_all().context("flush temp config")?;
        tmp.persist(&self.path)
            .with_context(|| format!("replace file: {}", self.path.display()))?;
        Ok(())
    }
}
