//! Environment-derived worker configuration and persisted identity.
//!
//! # Environment variables
//!
//! | Variable            | Default                  | Description                              |
//! |---------------------|--------------------------|------------------------------------------|
//! | `EASEL_API_URL`     | `http://127.0.0.1:5000`  | Coordination server base URL             |
//! | `EASEL_CLIENT_UID`  | settings file / generated| Stable client identity                   |
//! | `EASEL_CLIENT_NAME` | `$HOSTNAME` / `easel-worker` | Human-readable client name           |
//! | `EASEL_TEST_MODE`   | `false`                  | Dry-run generator, no real generation    |
//! | `EASEL_CPU_MODE`    | `false`                  | Single CPU slot instead of GPU pool      |
//! | `EASEL_GPU_VRAM`    | `6`                      | Declared VRAM capacity (GB)              |
//! | `EASEL_MAX_QUEUE`   | `5`                      | Bounded local task queue depth           |
//! | `EASEL_GENERATOR`   | `easel-generate`         | External generator program               |
//! | `EASEL_SETTINGS`    | `easel-settings.json`    | Identity settings file path              |
//!
//! The client UID must survive restarts so the server can correlate
//! this worker across sessions: an explicit env value wins, otherwise
//! the settings file is consulted, otherwise a fresh UUID v4 is
//! generated and written back to the settings file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

const DEFAULT_API_URL: &str = "http://127.0.0.1:5000";
const DEFAULT_CLIENT_NAME: &str = "easel-worker";
const DEFAULT_VRAM_GB: u32 = 6;
const DEFAULT_MAX_QUEUE: usize = 5;
const DEFAULT_GENERATOR: &str = "easel-generate";
const DEFAULT_SETTINGS_PATH: &str = "easel-settings.json";

/// Resolved worker configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: String,
    pub client_uid: String,
    pub client_name: String,
    pub test_mode: bool,
    pub cpu_mode: bool,
    pub vram_gb: u32,
    pub max_queue: usize,
    pub generator_program: String,
    /// True when no UID was supplied anywhere and one was generated
    /// this session; the operator should pin it.
    pub uid_was_generated: bool,
}

/// Identity persisted across restarts, keyed by uid + name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub client_uid: String,
    pub client_name: String,
}

impl Config {
    /// Read configuration from the environment, resolving the client
    /// identity against the settings file.
    pub fn load() -> Self {
        let settings_path =
            PathBuf::from(env_or("EASEL_SETTINGS", DEFAULT_SETTINGS_PATH));

        let client_name = std::env::var("EASEL_CLIENT_NAME")
            .ok()
            .filter(|v| !v.is_empty())
            .or_else(|| std::env::var("HOSTNAME").ok().filter(|v| !v.is_empty()))
            .unwrap_or_else(|| DEFAULT_CLIENT_NAME.to_string());

        let env_uid = std::env::var("EASEL_CLIENT_UID")
            .ok()
            .filter(|v| !v.is_empty());
        let stored = Settings::load(&settings_path);
        let (client_uid, uid_was_generated) = resolve_uid(env_uid, stored.as_ref());

        if uid_was_generated {
            let settings = Settings {
                client_uid: client_uid.clone(),
                client_name: client_name.clone(),
            };
            if let Err(e) = settings.save(&settings_path) {
                tracing::warn!(error = %e, path = %settings_path.display(), "Could not persist client identity");
            }
        }

        Self {
            api_url: env_or("EASEL_API_URL", DEFAULT_API_URL),
            client_uid,
            client_name,
            test_mode: env_flag("EASEL_TEST_MODE"),
            cpu_mode: env_flag("EASEL_CPU_MODE"),
            vram_gb: std::env::var("EASEL_GPU_VRAM")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_VRAM_GB),
            max_queue: std::env::var("EASEL_MAX_QUEUE")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|&n| n > 0)
                .unwrap_or(DEFAULT_MAX_QUEUE),
            generator_program: env_or("EASEL_GENERATOR", DEFAULT_GENERATOR),
            uid_was_generated,
        }
    }
}

impl Settings {
    /// Read persisted identity; any read or decode failure reads as
    /// "no settings yet".
    pub fn load(path: &Path) -> Option<Self> {
        let raw = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(settings) => Some(settings),
            Err(e) => {
                tracing::warn!(error = %e, path = %path.display(), "Ignoring undecodable settings file");
                None
            }
        }
    }

    /// Write persisted identity.
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let raw = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, raw)
    }
}

/// Env UID wins; else the stored one; else a fresh UUID v4 (flagged
/// as generated so it gets persisted and surfaced to the operator).
fn resolve_uid(env_uid: Option<String>, stored: Option<&Settings>) -> (String, bool) {
    if let Some(uid) = env_uid {
        return (uid, false);
    }
    if let Some(settings) = stored {
        if !settings.client_uid.is_empty() {
            return (settings.client_uid.clone(), false);
        }
    }
    (uuid::Uuid::new_v4().to_string(), true)
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_flag(key: &str) -> bool {
    std::env::var(key).map(|v| parse_flag(&v)).unwrap_or(false)
}

/// Truthy spellings accepted for boolean env vars.
fn parse_flag(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "true" | "1" | "yes" | "y")
}
