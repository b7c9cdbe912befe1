//! Peer membership: the current peer set, its hash ring and one client per
//! remote peer.
//!
//! Membership changes replace the whole set. The new ring and client table are
//! built off-lock and swapped in as one `Arc`, so a lookup sees either the old
//! or the new membership, never a mix.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::peers::http::{PeerClient, PeerConnector};
use crate::peers::ring::HashRing;

struct Membership {
    ring: HashRing,
    clients: HashMap<String, Arc<dyn PeerClient>>,
}

/// Tracks which addresses are current peers and routes keys to owners.
pub struct PeerPool {
    self_addr: String,
    replicas: usize,
    connector: Arc<dyn PeerConnector>,
    membership: RwLock<Arc<Membership>>,
}

/// Canonical form of a peer address: trimmed, no trailing slash.
pub fn normalize_addr(addr: &str) -> String {
    addr.trim().trim_end_matches('/').to_string()
}

impl PeerPool {
    /// A pool for the node reachable at `self_addr`, starting with no peers
    /// (every key locally owned).
    pub fn new(self_addr: &str, replicas: usize, connector: Arc<dyn PeerConnector>) -> Self {
        Self {
            self_addr: normalize_addr(self_addr),
            replicas,
            connector,
            membership: RwLock::new(Arc::new(Membership {
                ring: HashRing::empty(replicas),
                clients: HashMap::new(),
            })),
        }
    }

    /// Replace the peer set. The list normally includes this node's own
    /// address; no client is created for it.
    pub fn set_peers<I, S>(&self, addrs: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let addrs: Vec<String> = addrs
            .into_iter()
            .map(|a| normalize_addr(a.as_ref()))
            .filter(|a| !a.is_empty())
            .collect();

        let current = self.membership.read().clone();
        let mut clients = HashMap::new();
        for addr in &addrs {
            if *addr == self.self_addr || clients.contains_key(addr) {
                continue;
            }
            // Keep existing clients (and their connection pools) for peers that stay.
            let client = current
                .clients
                .get(addr)
                .cloned()
                .unwrap_or_else(|| self.connector.connect(addr));
            clients.insert(addr.clone(), client);
        }

        let ring = HashRing::new(self.replicas, addrs);
        info!(
            self_addr = %self.self_addr,
            peers = ?ring.peers(),
            remote = clients.len(),
            "Peer set updated"
        );
        *self.membership.write() = Arc::new(Membership { ring, clients });
    }

    /// The owner of `key`, or None when the peer set is empty.
    pub fn owner(&self, key: &[u8]) -> Option<String> {
        let membership = self.membership.read().clone();
        membership.ring.owner(key).map(str::to_string)
    }

    /// The remote peer that owns `key`, or None if this node owns it (self,
    /// or an empty peer set).
    pub fn pick_peer(&self, key: &[u8]) -> Option<Arc<dyn PeerClient>> {
        let membership = self.membership.read().clone();
        let owner = membership.ring.owner(key)?;
        if owner == self.self_addr {
            return None;
        }
        membership.clients.get(owner).cloned()
    }

    /// Clients for every current peer other than this node.
    pub fn remote_peers(&self) -> Vec<Arc<dyn PeerClient>> {
        let membership = self.membership.read().clone();
        membership.clients.values().cloned().collect()
    }

    /// Whether this node owns `key`.
    pub fn is_local(&self, key: &[u8]) -> bool {
        self.pick_peer(key).is_none()
    }

    pub fn self_addr(&self) -> &str {
        &self.self_addr
    }

    /// Current peer addresses.
    pub fn peers(&self) -> Vec<String> {
        self.membership.read().ring.peers().to_vec()
    }
}
