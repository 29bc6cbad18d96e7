//! Delta replication of world cache changes to remote observers.
//!
//! # Invariants
//! - Every message is tagged with its kind; a decoded body must match its tag.
//! - Per tick, an entity produces at most one position message and one
//!   property message, each only for values that actually changed.
//! - Entities pending destruction are never replicated.
//! - Broadcasts reach joined observers only; answers to explicit chunk and
//!   trigger requests reach only the observers that asked.
//! - A transport failure for one observer never stops delivery to others.

mod codec;
mod config;
mod message;
mod replicator;
mod transport;

pub use codec::{decode, encode, peek_kind, CodecError};
pub use config::ReplicationConfig;
pub use message::{Delivery, Message, MessageKind};
pub use replicator::{ReplicationError, ReplicationReport, Replicator};
pub use transport::{LoopbackTransport, Packet, Transport, TransportError};

pub fn crate_info() -> &'static str {
    "worldcache-replicate v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("replicate"));
    }
}
