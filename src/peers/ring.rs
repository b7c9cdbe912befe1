//! Consistent hash ring mapping keys to peer addresses.
//!
//! Each peer is placed on the ring at `replicas` virtual positions to smooth
//! out load and to limit how many keys change owner when membership changes.
//! A key is owned by the first virtual position at or clockwise of its hash.
//!
//! The ring is immutable once built; membership changes build a new ring.

/// Virtual nodes per peer when not configured otherwise.
pub const DEFAULT_REPLICAS: usize = 50;

/// Ring position hash: FNV-1a followed by a murmur3 finalizer so that
/// near-identical inputs (e.g. `0http://a`, `1http://a`) spread over the ring.
pub fn hash_key(data: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for &byte in data {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    fmix32(hash)
}

fn fmix32(mut h: u32) -> u32 {
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^= h >> 16;
    h
}

#[derive(Debug, Clone)]
pub struct HashRing {
    replicas: usize,
    /// (position, index into `peers`), sorted by position.
    points: Vec<(u32, usize)>,
    peers: Vec<String>,
}

impl HashRing {
    /// Build a ring over `peers`. Duplicate addresses are placed once.
    pub fn new<I, S>(replicas: usize, peers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let replicas = replicas.max(1);
        let mut unique: Vec<String> = Vec::new();
        for peer in peers {
            let peer = peer.into();
            if !unique.contains(&peer) {
                unique.push(peer);
            }
        }

        let mut points = Vec::with_capacity(unique.len() * replicas);
        for (idx, peer) in unique.iter().enumerate() {
            for replica in 0..replicas {
                let label = format!("{replica}{peer}");
                points.push((hash_key(label.as_bytes()), idx));
            }
        }
        // Tie-break on the address so equal positions resolve the same way
        // regardless of the order peers were listed in.
        points.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| unique[a.1].cmp(&unique[b.1])));

        Self {
            replicas,
            points,
            peers: unique,
        }
    }

    /// An empty ring owns nothing.
    pub fn empty(replicas: usize) -> Self {
        Self::new(replicas, Vec::<String>::new())
    }

    /// The peer responsible for `key`, or None if the ring is empty.
    pub fn owner(&self, key: &[u8]) -> Option<&str> {
        if self.points.is_empty() {
            return None;
        }
        let hash = hash_key(key);
        let idx = self.points.partition_point(|(pos, _)| *pos < hash);
        let (_, peer) = self.points[idx % self.points.len()];
        Some(&self.peers[peer])
    }

    /// Member addresses in the order given (deduplicated).
    pub fn peers(&self) -> &[String] {
        &self.peers
    }

    pub fn replicas(&self) -> usize {
        self.replicas
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }
}
