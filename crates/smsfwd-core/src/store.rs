//! Durable, single-writer store for the operator-tunable forwarding record.
//!
//! Every mutation runs under one write lock that covers read-modify-persist,
//! so readers see either the state before a change or after it, never a
//! half-applied patch. The in-memory value is authoritative for the process:
//! a failed save is logged and the change is kept.

use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::{errors::Error, Result};

pub const DEFAULT_POLL_INTERVAL_SECONDS: u64 = 5;

/// The persisted record. Field aliases keep files from older deployments loadable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwardConfig {
    #[serde(alias = "sms_tokens")]
    pub source_tokens: Vec<String>,
    #[serde(alias = "active_sms_token")]
    pub active_source_token: Option<String>,
    #[serde(alias = "target_chat_id")]
    pub destination: Option<i64>,
    pub keywords: Vec<String>,
    #[serde(alias = "last_seen_id")]
    pub high_water_mark: Option<i64>,
    #[serde(alias = "poll_interval")]
    pub poll_interval_seconds: u64,
    pub forwarding_enabled: bool,
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            source_tokens: Vec::new(),
            active_source_token: None,
            destination: None,
            keywords: Vec::new(),
            high_water_mark: None,
            poll_interval_seconds: DEFAULT_POLL_INTERVAL_SECONDS,
            forwarding_enabled: false,
        }
    }
}

impl ForwardConfig {
    /// Both an active token and a destination are set.
    pub fn is_ready(&self) -> bool {
        self.active_source_token.is_some() && self.destination.is_some()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds.max(1))
    }

    pub fn check_invariants(&self) -> Result<()> {
        for (idx, token) in self.source_tokens.iter().enumerate() {
            if self.source_tokens[..idx].contains(token) {
                return Err(Error::Validation(format!("duplicate source token: {token}")));
            }
        }
        if let Some(active) = &self.active_source_token {
            if !self.source_tokens.contains(active) {
                return Err(Error::Validation(format!(
                    "active source token is not configured: {active}"
                )));
            }
        }
        if self.poll_interval_seconds == 0 {
            return Err(Error::Validation(
                "poll interval must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Repair a record loaded from disk so it satisfies the invariants.
    fn normalized(mut self) -> Self {
        let mut seen: Vec<String> = Vec::with_capacity(self.source_tokens.len());
        for token in self.source_tokens.drain(..) {
            if !token.trim().is_empty() && !seen.contains(&token) {
                seen.push(token);
            }
        }
        self.source_tokens = seen;

        if let Some(active) = &self.active_source_token {
            if !self.source_tokens.contains(active) {
                tracing::warn!(%active, "active token missing from token list, clearing");
                self.active_source_token = None;
            }
        }

        self.keywords = self
            .keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        self.poll_interval_seconds = self.poll_interval_seconds.max(1);
        self
    }
}

/// Field-level change set for [`ConfigStore::update`]. `None` leaves a field as is.
#[derive(Clone, Debug, Default)]
pub struct ConfigPatch {
    pub source_tokens: Option<Vec<String>>,
    pub active_source_token: Option<Option<String>>,
    pub destination: Option<Option<i64>>,
    pub keywords: Option<Vec<String>>,
    pub high_water_mark: Option<i64>,
    pub poll_interval_seconds: Option<u64>,
    pub forwarding_enabled: Option<bool>,
}

impl ConfigPatch {
    fn apply(self, cfg: &mut ForwardConfig) {
        if let Some(v) = self.source_tokens {
            cfg.source_tokens = v;
        }
        if let Some(v) = self.active_source_token {
            cfg.active_source_token = v;
        }
        if let Some(v) = self.destination {
            cfg.destination = v;
        }
        if let Some(v) = self.keywords {
            cfg.keywords = v;
        }
        if let Some(v) = self.high_water_mark {
            cfg.high_water_mark = Some(v);
        }
        if let Some(v) = self.poll_interval_seconds {
            cfg.poll_interval_seconds = v;
        }
        if let Some(v) = self.forwarding_enabled {
            cfg.forwarding_enabled = v;
        }
    }
}

pub struct ConfigStore {
    path: PathBuf,
    state: RwLock<ForwardConfig>,
}

impl ConfigStore {
    /// Load the record at `path`; a missing or unreadable file yields the default record.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let cfg = match load_record(&path) {
            Ok(Some(cfg)) => cfg.normalized(),
            Ok(None) => ForwardConfig::default(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "config file corrupt, using defaults");
                ForwardConfig::default()
            }
        };
        Self {
            path,
            state: RwLock::new(cfg),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot of the current record.
    pub async fn read(&self) -> ForwardConfig {
        self.state.read().await.clone()
    }

    /// Apply `patch` atomically and persist the full record.
    pub async fn update(&self, patch: ConfigPatch) -> Result<ForwardConfig> {
        self.mutate(|cfg| {
            patch.apply(cfg);
            Ok(cfg.clone())
        })
        .await
    }

    /// Read-modify-write under the store lock.
    ///
    /// `op` works on a scratch copy; the change is committed only if `op`
    /// succeeds and the result satisfies the record invariants. The
    /// high-water mark is clamped so it never moves backwards.
    pub async fn mutate<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&mut ForwardConfig) -> Result<T>,
    {
        let mut guard = self.state.write().await;
        let mut next = guard.clone();
        let out = op(&mut next)?;

        next.high_water_mark = match (guard.high_water_mark, next.high_water_mark) {
            (Some(prev), Some(new)) => Some(prev.max(new)),
            (prev, new) => new.or(prev),
        };
        next.check_invariants()?;

        *guard = next;
        if let Err(e) = save_record(&self.path, &guard).await {
            tracing::error!(path = %self.path.display(), error = %e, "failed to persist config");
        }

        Ok(out)
    }
}

fn load_record(path: &Path) -> Result<Option<ForwardConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    let txt = std::fs::read_to_string(path)?;
    if txt.trim().is_empty() {
        return Ok(None);
    }
    let cfg: ForwardConfig = serde_json::from_str(&txt)?;
    Ok(Some(cfg))
}

async fn save_record(path: &Path, cfg: &ForwardConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Persistence(format!("failed to create config dir: {e}")))?;
        }
    }

    let payload = serde_json::to_vec_pretty(cfg)?;

    let mut tmp: OsString = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, payload)
        .await
        .map_err(|e| Error::Persistence(format!("failed to write config: {e}")))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| Error::Persistence(format!("failed to finalize config: {e}")))?;

    Ok(())
}
