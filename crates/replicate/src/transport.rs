use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use worldcache_common::ObserverId;

use crate::codec::{decode, CodecError};
use crate::message::{Delivery, Message};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("observer {0} is not reachable")]
    Unreachable(ObserverId),
    #[error("transport closed")]
    Closed,
}

/// Per-connection delivery of opaque packets. Framing, handshakes and
/// retransmission belong to the implementation.
pub trait Transport: Send + Sync {
    fn send(&self, to: ObserverId, delivery: Delivery, payload: Vec<u8>) -> Result<(), TransportError>;
}

/// One packet recorded by [`LoopbackTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub delivery: Delivery,
    pub payload: Vec<u8>,
}

/// In-process transport that queues packets per observer.
#[derive(Debug, Default)]
pub struct LoopbackTransport {
    queues: Mutex<HashMap<ObserverId, Vec<Packet>>>,
    unreachable: Mutex<HashSet<ObserverId>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make sends to `observer` fail until [`Self::restore`] is called.
    pub fn cut(&self, observer: ObserverId) {
        lock(&self.unreachable).insert(observer);
    }

    pub fn restore(&self, observer: ObserverId) {
        lock(&self.unreachable).remove(&observer);
    }

    /// Take every packet queued for `observer`, oldest first.
    pub fn take(&self, observer: ObserverId) -> Vec<Packet> {
        lock(&self.queues).remove(&observer).unwrap_or_default()
    }

    /// Take and decode every packet queued for `observer`.
    pub fn take_messages(&self, observer: ObserverId) -> Result<Vec<Message>, CodecError> {
        self.take(observer)
            .iter()
            .map(|p| decode(&p.payload))
            .collect()
    }

    /// Packets queued across all observers.
    pub fn pending(&self) -> usize {
        lock(&self.queues).values().map(Vec::len).sum()
    }
}

impl Transport for LoopbackTransport {
    fn send(&self, to: ObserverId, delivery: Delivery, payload: Vec<u8>) -> Result<(), TransportError> {
        if lock(&self.unreachable).contains(&to) {
            return Err(TransportError::Unreachable(to));
        }
        lock(&self.queues)
            .entry(to)
            .or_default()
            .push(Packet { delivery, payload });
        Ok(())
    }
}
