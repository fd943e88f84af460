use crate::db::store::Store;
use crate::transport::{Connection, Credentials, Transport};
use anyhow::Result;
use std::collections::HashMap;

/// Per-process cache of live connections, one per sending account. Dead
/// connections are discarded on the next acquire; nothing is closed
/// proactively.
pub struct IdentityPool {
    transport: Box<dyn Transport>,
    connections: HashMap<String, Box<dyn Connection>>,
}

impl IdentityPool {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            transport,
            connections: HashMap::new(),
        }
    }

    /// `None` means the identity cannot be initialized (unknown account or
    /// no stored session) and is not a retryable error.
    pub fn acquire(&mut self, store: &Store, account_id: &str) -> Result<Option<&dyn Connection>> {
        let live = self
            .connections
            .get(account_id)
            .map(|conn| conn.is_connected())
            .unwrap_or(false);
        if !live {
            self.connections.remove(account_id);
            let Some(account) = store.get_account(account_id)? else {
                return Ok(None);
            };
            let Some(session) = account.session else {
                return Ok(None);
            };
            let conn = self.transport.connect(&Credentials {
                account_id: account.id,
                api_id: account.api_id,
                api_hash: account.api_hash,
                session,
                proxy_url: account.proxy_url,
            })?;
            self.connections.insert(account_id.to_string(), conn);
        }
        Ok(self.connections.get(account_id).map(|conn| conn.as_ref()))
    }
}
