use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::Result;

/// Typed configuration for the listener.
///
/// Everything has a sensible default so the process can run with an empty
/// environment; a `.env` file next to the binary is honored but never
/// overrides variables already set in the process environment.
#[derive(Clone, Debug)]
pub struct Config {
    /// Directory holding the multi-part session credential files.
    pub auth_dir: PathBuf,

    /// Canonical path of the durable message log (JSON array).
    pub messages_file: PathBuf,

    /// Fixed delay before reconnecting after a non-terminal close.
    pub reconnect_delay: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let auth_dir = env_path("WML_AUTH_DIR").unwrap_or_else(|| PathBuf::from("auth_state"));
        let messages_file = env_path("WML_MESSAGES_FILE")
            .unwrap_or_else(|| PathBuf::from("whatsapp_messages.json"));
        let reconnect_delay =
            Duration::from_millis(env_u64("WML_RECONNECT_DELAY_MS").unwrap_or(5_000));

        Ok(Self {
            auth_dir,
            messages_file,
            reconnect_delay,
        })
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var_os(key).map(PathBuf::from)
}
