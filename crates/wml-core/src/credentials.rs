use std::{collections::BTreeMap, fs, io, path::PathBuf};

use serde_json::Value;

use crate::Result;

/// Opaque multi-part session credentials: one JSON document per part, keyed
/// by file stem (e.g. `creds`, `app-state-sync-key-...`). The listener never
/// looks inside the values; it only round-trips them for the transport.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SessionCredentials {
    pub parts: BTreeMap<String, Value>,
}

impl SessionCredentials {
    /// Empty credentials mean no prior session: the transport will issue a
    /// QR challenge instead of resuming.
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}

/// Loads/saves session credentials from a directory of JSON files.
#[derive(Clone, Debug)]
pub struct CredentialStore {
    dir: PathBuf,
}

impl CredentialStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// A missing directory is a fresh login, not an error.
    pub fn load(&self) -> Result<SessionCredentials> {
        let rd = match fs::read_dir(&self.dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(SessionCredentials::default())
            }
            Err(e) => return Err(e.into()),
        };

        let mut parts = BTreeMap::new();
        for ent in rd.flatten() {
            let path = ent.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let txt = fs::read_to_string(&path)?;
            let value: Value = serde_json::from_str(&txt)?;
            parts.insert(stem.to_string(), value);
        }

        Ok(SessionCredentials { parts })
    }

    /// Persist every part. Called synchronously on each credentials-update
    /// event so a crash never loses more than one update cycle. Each part is
    /// written to a temp path and renamed into place; a stale `.tmp` left by
    /// a crash is skipped on load.
    pub fn save(&self, creds: &SessionCredentials) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        for (name, value) in &creds.parts {
            let path = self.dir.join(format!("{name}.json"));
            let tmp = self.dir.join(format!("{name}.json.tmp"));
            fs::write(&tmp, serde_json::to_string(value)?)?;
            fs::rename(&tmp, &path)?;
        }
        Ok(())
    }
}
