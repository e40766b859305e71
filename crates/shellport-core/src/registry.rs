//! Host registry seam.
//!
//! The terminal and file endpoints only ever need to turn a host id into a
//! record carrying its connection credential. Persistence lives behind this
//! trait so handlers can be exercised against an in-memory registry.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::{HostRecord, Result};

#[async_trait]
pub trait HostRegistry: Send + Sync {
    /// Resolve a host by id. `Ok(None)` means the host does not exist.
    async fn get_host(&self, id: i64) -> Result<Option<HostRecord>>;
}

/// Registry backed by a map, used by tests and by embedders that keep
/// their hosts elsewhere.
#[derive(Default)]
pub struct StaticRegistry {
    hosts: RwLock<HashMap<i64, HostRecord>>,
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, host: HostRecord) {
        if let Ok(mut hosts) = self.hosts.write() {
            hosts.insert(host.id, host);
        }
    }
}

#[async_trait]
impl HostRegistry for StaticRegistry {
    async fn get_host(&self, id: i64) -> Result<Option<HostRecord>> {
        let hosts = self
            .hosts
            .read()
            .map_err(|_| anyhow::anyhow!("host registry lock poisoned"))?;
        Ok(hosts.get(&id).cloned())
    }
}
