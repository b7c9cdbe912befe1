//! Peer routing and transport.
//!
//! - [`ring`]: consistent hash ring (key → owning address)
//! - [`pool`]: peer membership, feeds the ring and holds peer clients
//! - [`http`]: outbound HTTP transport and the `PeerClient` seam
//! - [`protocol`]: wire types shared by client and server

pub mod http;
pub mod pool;
pub mod protocol;
pub mod ring;

pub use http::{HttpConnector, PeerClient, PeerConnector};
pub use pool::PeerPool;
pub use ring::HashRing;
