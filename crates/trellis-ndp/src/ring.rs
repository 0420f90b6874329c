//! # Control/graph rings
//!
//! Bounded, non-blocking handoff between the parallel datapath workers and
//! the single control thread, and back again from the control thread into
//! the forwarding graph. A full ring is an intentional load-shedding
//! boundary: `post` returns [`PostError::Again`] and the caller drops the
//! packet — there is no other back-pressure between the planes.
//!
//! Handlers register under a small dense id space at startup; names are
//! resolved to ids once, the way graph edges resolve to indices.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use crate::pkt::Pkt;

// ─── Handler registry ────────────────────────────────────────────────────────

/// Dense id of a registered message handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerId(pub u8);

/// Name-to-id registry, filled once at startup.
#[derive(Debug, Default)]
pub struct HandlerRegistry {
    names: Vec<&'static str>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler name, returning its id. Re-registering a name
    /// returns the existing id.
    pub fn register(&mut self, name: &'static str) -> HandlerId {
        if let Some(id) = self.resolve(name) {
            return id;
        }
        self.names.push(name);
        HandlerId((self.names.len() - 1) as u8)
    }

    pub fn resolve(&self, name: &str) -> Option<HandlerId> {
        self.names
            .iter()
            .position(|n| *n == name)
            .map(|i| HandlerId(i as u8))
    }

    pub fn name(&self, id: HandlerId) -> Option<&'static str> {
        self.names.get(usize::from(id.0)).copied()
    }
}

// ─── Ring ────────────────────────────────────────────────────────────────────

/// A message in flight: the target handler plus the packet it consumes.
#[derive(Debug)]
pub struct StackMsg {
    pub handler: HandlerId,
    pub pkt: Pkt,
}

/// Posting failed; the caller owns the packet again and must drop it.
#[derive(Debug)]
pub enum PostError {
    /// Ring full — shed load.
    Again(Pkt),
    /// Consumer is gone (shutdown).
    Closed(Pkt),
}

/// Producer handle, cheap to clone into every worker.
#[derive(Debug, Clone)]
pub struct StackPort {
    tx: Sender<StackMsg>,
}

impl StackPort {
    /// Non-blocking post. Within one producer, messages stay FIFO.
    pub fn post(&self, handler: HandlerId, pkt: Pkt) -> Result<(), PostError> {
        self.tx
            .try_send(StackMsg { handler, pkt })
            .map_err(|e| match e {
                TrySendError::Full(msg) => PostError::Again(msg.pkt),
                TrySendError::Disconnected(msg) => PostError::Closed(msg.pkt),
            })
    }
}

/// Consumer handle held by the draining thread.
#[derive(Debug)]
pub struct StackConsumer {
    rx: Receiver<StackMsg>,
}

impl StackConsumer {
    pub fn try_recv(&self) -> Option<StackMsg> {
        self.rx.try_recv().ok()
    }

    /// Drain everything currently queued.
    pub fn drain(&self) -> Vec<StackMsg> {
        let mut msgs = Vec::new();
        while let Ok(msg) = self.rx.try_recv() {
            msgs.push(msg);
        }
        msgs
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

/// Create a ring of the given depth.
pub fn stack_ring(depth: usize) -> (StackPort, StackConsumer) {
    let (tx, rx) = bounded(depth);
    (StackPort { tx }, StackConsumer { rx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use trellis_common::types::IfaceId;

    fn pkt(tag: u8) -> Pkt {
        Pkt::new(0, IfaceId(1), BytesMut::from(&[tag][..]))
    }

    #[test]
    fn registry_is_dense_and_idempotent() {
        let mut reg = HandlerRegistry::new();
        let a = reg.register("ip6-output");
        let b = reg.register("ndp-ns-output");
        assert_eq!(a, HandlerId(0));
        assert_eq!(b, HandlerId(1));
        assert_eq!(reg.register("ip6-output"), a);
        assert_eq!(reg.resolve("ndp-ns-output"), Some(b));
        assert_eq!(reg.resolve("nope"), None);
        assert_eq!(reg.name(a), Some("ip6-output"));
    }

    #[test]
    fn post_is_fifo_per_producer() {
        let (port, consumer) = stack_ring(8);
        let h = HandlerId(0);
        for tag in 0..5 {
            port.post(h, pkt(tag)).unwrap();
        }
        let tags: Vec<u8> = consumer.drain().iter().map(|m| m.pkt.data[0]).collect();
        assert_eq!(tags, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn full_ring_returns_again_with_packet() {
        let (port, _consumer) = stack_ring(1);
        let h = HandlerId(0);
        port.post(h, pkt(1)).unwrap();
        match port.post(h, pkt(2)) {
            Err(PostError::Again(p)) => assert_eq!(p.data[0], 2),
            other => panic!("expected Again, got {other:?}"),
        }
    }

    #[test]
    fn closed_ring_returns_packet() {
        let (port, consumer) = stack_ring(1);
        drop(consumer);
        match port.post(HandlerId(0), pkt(1)) {
            Err(PostError::Closed(p)) => assert_eq!(p.data[0], 1),
            other => panic!("expected Closed, got {other:?}"),
        }
    }
}
