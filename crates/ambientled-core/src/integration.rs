// ── Integration manager ──
//
// Owns one session + bridge per configured account. Setting up an account
// that is already loaded replaces it, so each account has at most one live
// session at a time.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use crate::bridge::{EntityBridge, Host};
use crate::config::SessionConfig;
use crate::error::CoreError;
use crate::session::Session;

/// Registry of loaded accounts.
#[derive(Default)]
pub struct IntegrationManager {
    entries: Mutex<BTreeMap<String, Arc<EntityBridge>>>,
}

impl IntegrationManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a WebSocket session for `account` and bridge it to `host`.
    pub async fn setup_entry(
        &self,
        account: &str,
        config: SessionConfig,
        host: Arc<dyn Host>,
    ) -> Result<Arc<EntityBridge>, CoreError> {
        let session = Session::new(config)?;
        Ok(self.setup_entry_with(account, session, host).await)
    }

    /// Bridge an already constructed session. Replaces any existing entry.
    pub async fn setup_entry_with(
        &self,
        account: &str,
        session: Session,
        host: Arc<dyn Host>,
    ) -> Arc<EntityBridge> {
        let mut entries = self.entries.lock().await;
        if let Some(previous) = entries.remove(account) {
            info!(account, "replacing loaded account");
            previous.unload().await;
        }

        let bridge = Arc::new(EntityBridge::setup(session, host).await);
        entries.insert(account.to_owned(), Arc::clone(&bridge));
        info!(account, "account loaded");
        bridge
    }

    /// Unload one account. Returns `false` if it was not loaded.
    pub async fn unload_entry(&self, account: &str) -> bool {
        let removed = self.entries.lock().await.remove(account);
        match removed {
            Some(bridge) => {
                bridge.unload().await;
                info!(account, "account unloaded");
                true
            }
            None => false,
        }
    }

    pub async fn unload_all(&self) {
        let drained: Vec<(String, Arc<EntityBridge>)> =
            std::mem::take(&mut *self.entries.lock().await).into_iter().collect();
        for (account, bridge) in drained {
            bridge.unload().await;
            info!(account, "account unloaded");
        }
    }

    pub async fn entry(&self, account: &str) -> Option<Arc<EntityBridge>> {
        self.entries.lock().await.get(account).cloned()
    }

    pub async fn accounts(&self) -> Vec<String> {
        self.entries.lock().await.keys().cloned().collect()
    }
}
