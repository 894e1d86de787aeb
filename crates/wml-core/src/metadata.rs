use std::{collections::HashMap, sync::Arc};

use tokio::sync::Mutex;

use crate::{
    domain::{GroupMetadata, Jid},
    transport::ChatTransport,
};

/// On-demand fetch-and-cache of group metadata, keyed by chat jid.
///
/// Every `get` attempts a fresh fetch; a success replaces the cache entry, a
/// failure falls back to the last successful fetch (stale reads are
/// tolerated) and only then to a degraded raw-jid value. Entries are never
/// evicted; the map is bounded by the number of groups the account is in.
pub struct GroupMetadataCache {
    transport: Arc<dyn ChatTransport>,
    cache: Mutex<HashMap<Jid, GroupMetadata>>,
}

impl GroupMetadataCache {
    pub fn new(transport: Arc<dyn ChatTransport>) -> Self {
        Self {
            transport,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Personal chats need no metadata and return `None`. Group chats always
    /// return `Some`; callers must treat an empty participant list as
    /// "mentions cannot be resolved".
    pub async fn get(&self, jid: &Jid) -> Option<GroupMetadata> {
        if !jid.is_group() {
            return None;
        }

        match self.transport.group_metadata(jid).await {
            Ok(meta) => {
                self.cache.lock().await.insert(jid.clone(), meta.clone());
                Some(meta)
            }
            Err(e) => {
                if let Some(stale) = self.cache.lock().await.get(jid).cloned() {
                    eprintln!("[META] fetch failed for {jid}: {e}; serving cached entry");
                    return Some(stale);
                }
                eprintln!("[META] fetch failed for {jid}: {e}; using degraded fallback");
                Some(GroupMetadata::degraded(jid))
            }
        }
    }
}
