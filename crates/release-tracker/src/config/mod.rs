use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;
use toml::Value;

use crate::error::{Error, Result};
use crate::model::DEFAULT_ARTISTS;

pub const URL_ENV: &str = "TRACKER_URL";
pub const ANON_KEY_ENV: &str = "TRACKER_ANON_KEY";

fn default_timeout_secs() -> u64 {
    30
}

fn default_log_dir() -> String {
    ".tracker/logs".into()
}

fn default_artists() -> Vec<String> {
    DEFAULT_ARTISTS.iter().map(|s| s.to_string()).collect()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub url: String,
    pub url_env: Option<String>,
    pub anon_key: Option<String>,
    pub anon_key_env: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            url_env: None,
            anon_key: None,
            anon_key_env: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    #[serde(default = "default_artists")]
    pub artists: Vec<String>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            artists: default_artists(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AuditConfig {
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    #[serde(default = "default_log_dir")]
    pub dir: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TrackerConfig {
    pub backend: BackendConfig,
    pub catalog: CatalogConfig,
    pub audit: AuditConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone)]
pub struct ResolvedBackend {
    pub url: String,
    pub anon_key: String,
    pub timeout_secs: u64,
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl TrackerConfig {
    pub fn resolve_backend(&self) -> Result<ResolvedBackend> {
        let b = &self.backend;
        let url = b
            .url_env
            .as_deref()
            .and_then(env_nonempty)
            .or_else(|| env_nonempty(URL_ENV))
            .or_else(|| Some(b.url.trim().to_string()).filter(|s| !s.is_empty()))
            .ok_or_else(|| {
                Error::config(format!("backend url not set (backend.url or {URL_ENV})"))
            })?;
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err(Error::config(format!(
                "backend url must be http(s): {url}"
            )));
        }

        let anon_key = b
            .anon_key_env
            .as_deref()
            .and_then(env_nonempty)
            .or_else(|| env_nonempty(ANON_KEY_ENV))
            .or_else(|| b.anon_key.clone().filter(|s| !s.trim().is_empty()))
            .ok_or_else(|| {
                Error::config(format!(
                    "backend key not set (backend.anon_key or {ANON_KEY_ENV})"
                ))
            })?;
        ensure_public_key(&anon_key)?;

        Ok(ResolvedBackend {
            url,
            anon_key,
            timeout_secs: b.timeout_secs,
        })
    }
}

// Public keys only: no service_role JWT, no sb_secret_ key.
pub fn ensure_public_key(key: &str) -> Result<()> {
    let key = key.trim();
    if key.starts_with("sb_secret_") {
        return Err(Error::config("refusing secret key; configure the public key"));
    }
    let mut parts = key.split('.');
    let (Some(_), Some(payload), Some(_)) = (parts.next(), parts.next(), parts.next()) else {
        // Not a JWT (e.g. `sb_publishable_...`); nothing to inspect.
        return Ok(());
    };
    let Ok(raw) = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')) else {
        return Err(Error::config("backend key is not a decodable JWT"));
    };
    let claims: serde_json::Value = serde_json::from_slice(&raw)
        .map_err(|e| Error::config(format!("backend key payload is not JSON: {e}")))?;
    match claims.get("role").and_then(|r| r.as_str()) {
        Some("service_role") => Err(Error::config(
            "refusing service_role key; configure the anon key",
        )),
        _ => Ok(()),
    }
}

fn merge_values(base: &mut Value, child: Value) {
    match (base, child) {
        (Value::Table(base_tbl), Value::Table(child_tbl)) => {
            for (k, v) in child_tbl {
                match base_tbl.get_mut(&k) {
                    Some(existing) => merge_values(existing, v),
                    None => {
                        base_tbl.insert(k, v);
                    }
                }
            }
        }
        (base_slot, child_val) => {
            *base_slot = child_val;
        }
    }
}

fn resolve_ref_path(from_file: &Path, reference: &str) -> PathBuf {
    let p = PathBuf::from(reference);
    if p.is_absolute() {
        p
    } else {
        from_file.parent().unwrap_or_else(|| Path::new(".")).join(p)
    }
}

fn load_value_inner(path: &Path, stack: &mut HashSet<PathBuf>) -> Result<Value> {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    if !stack.insert(canonical.clone()) {
        return Err(Error::config(format!(
            "config extends cycle detected at {}",
            canonical.display()
        )));
    }

    let data = fs::read_to_string(path)
        .map_err(|e| Error::config(format!("failed to read config {}: {e}", path.display())))?;
    let mut value: Value = toml::from_str(&data)
        .map_err(|e| Error::config(format!("TOML parse error in {}: {e}", path.display())))?;

    // Single-parent `extends`; the child's keys win.
    let mut out = Value::Table(Default::default());
    if let Some(ext) = value.get("extends").and_then(Value::as_str) {
        let base_path = resolve_ref_path(path, ext);
        out = load_value_inner(&base_path, stack)?;
    }
    if let Some(tbl) = value.as_table_mut() {
        tbl.remove("extends");
    }
    merge_values(&mut out, value);

    stack.remove(&canonical);
    Ok(out)
}

pub fn load(path: &Path) -> Result<TrackerConfig> {
    let mut stack = HashSet::<PathBuf>::new();
    let value = load_value_inner(path, &mut stack)?;
    value
        .try_into()
        .map_err(|e| Error::config(format!("invalid config {}: {e}", path.display())))
}

pub fn load_or_default(path: &Path) -> Result<TrackerConfig> {
    if path.exists() {
        load(path)
    } else {
        tracing::debug!(path = %path.display(), "no config file; using defaults");
        Ok(TrackerConfig::default())
    }
}
