//! In-process hub transport.
//!
//! Every node registers with a shared [`MemHub`]; the hub wires links
//! between registered nodes and shuttles byte messages over their event
//! channels. Tests partition and heal links to drive the relay and
//! store-and-forward paths without sockets.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use weft_types::PeerId;

use crate::{ConnectionState, PeerInfo, Result, Transport, TransportError, TransportEvent};

/// Capacity of each node's event channel.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

struct NodeHandle {
    events: mpsc::Sender<TransportEvent>,
    states: Arc<Mutex<HashMap<PeerId, ConnectionState>>>,
}

#[derive(Default)]
struct HubInner {
    nodes: HashMap<PeerId, NodeHandle>,
    links: HashSet<(PeerId, PeerId)>,
}

fn link_key(a: PeerId, b: PeerId) -> (PeerId, PeerId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// The shared fabric connecting [`MemTransport`] instances.
#[derive(Clone, Default)]
pub struct MemHub {
    inner: Arc<Mutex<HubInner>>,
}

impl MemHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport for `peer_id` attached to this hub.
    pub fn transport(&self, peer_id: PeerId) -> MemTransport {
        MemTransport {
            hub: self.clone(),
            local: peer_id,
            started: Arc::new(Mutex::new(false)),
            states: Arc::new(Mutex::new(HashMap::new())),
            buffered_hint: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Link two registered nodes, emitting lifecycle events to both.
    pub fn link(&self, a: PeerId, b: PeerId) -> Result<()> {
        let mut inner = self.inner.lock().expect("hub lock");
        if !inner.nodes.contains_key(&a) {
            return Err(TransportError::Unavailable(format!("{a} not registered")));
        }
        if !inner.nodes.contains_key(&b) {
            return Err(TransportError::Unavailable(format!("{b} not registered")));
        }

        // Link first: a receiver reacting to PeerConnected must be able to
        // send immediately.
        inner.links.insert(link_key(a, b));
        if let Some(node_a) = inner.nodes.get(&a) {
            notify_link_up(node_a, b);
        }
        if let Some(node_b) = inner.nodes.get(&b) {
            notify_link_up(node_b, a);
        }
        Ok(())
    }

    /// Cut the link between two nodes (network partition).
    pub fn partition(&self, a: PeerId, b: PeerId) {
        let mut inner = self.inner.lock().expect("hub lock");
        if !inner.links.remove(&link_key(a, b)) {
            return;
        }
        if let Some(node) = inner.nodes.get(&a) {
            notify_link_down(node, b);
        }
        if let Some(node) = inner.nodes.get(&b) {
            notify_link_down(node, a);
        }
    }

    /// Restore a previously partitioned link.
    pub fn heal(&self, a: PeerId, b: PeerId) -> Result<()> {
        self.link(a, b)
    }

    fn register(
        &self,
        peer_id: PeerId,
        events: mpsc::Sender<TransportEvent>,
        states: Arc<Mutex<HashMap<PeerId, ConnectionState>>>,
    ) {
        self.inner
            .lock()
            .expect("hub lock")
            .nodes
            .insert(peer_id, NodeHandle { events, states });
    }

    fn unregister(&self, peer_id: PeerId) {
        let mut inner = self.inner.lock().expect("hub lock");
        inner.nodes.remove(&peer_id);
        let severed: Vec<(PeerId, PeerId)> = inner
            .links
            .iter()
            .filter(|(a, b)| *a == peer_id || *b == peer_id)
            .copied()
            .collect();
        for (a, b) in severed {
            inner.links.remove(&(a, b));
            let other = if a == peer_id { b } else { a };
            if let Some(node) = inner.nodes.get(&other) {
                notify_link_down(node, peer_id);
            }
        }
    }

    fn deliver(&self, from: PeerId, to: PeerId, bytes: Vec<u8>) -> Result<()> {
        let inner = self.inner.lock().expect("hub lock");
        if !inner.links.contains(&link_key(from, to)) {
            return Err(TransportError::Disconnected(to));
        }
        let node = inner
            .nodes
            .get(&to)
            .ok_or(TransportError::Disconnected(to))?;
        node.events
            .try_send(TransportEvent::Message { from, bytes })
            .map_err(|_| TransportError::SendBufferFull(to))
    }

    fn linked_peers(&self, of: PeerId) -> Vec<PeerId> {
        let inner = self.inner.lock().expect("hub lock");
        inner
            .links
            .iter()
            .filter_map(|(a, b)| {
                if *a == of {
                    Some(*b)
                } else if *b == of {
                    Some(*a)
                } else {
                    None
                }
            })
            .collect()
    }

    fn is_registered(&self, peer: PeerId) -> bool {
        self.inner.lock().expect("hub lock").nodes.contains_key(&peer)
    }
}

fn notify_link_up(node: &NodeHandle, peer: PeerId) {
    node.states
        .lock()
        .expect("state lock")
        .insert(peer, ConnectionState::Connected);
    // StateChange first, then the connected notification.
    let _ = node.events.try_send(TransportEvent::StateChange {
        peer,
        state: ConnectionState::Connected,
    });
    let _ = node.events.try_send(TransportEvent::PeerConnected { peer });
}

fn notify_link_down(node: &NodeHandle, peer: PeerId) {
    node.states
        .lock()
        .expect("state lock")
        .insert(peer, ConnectionState::Disconnected);
    let _ = node.events.try_send(TransportEvent::StateChange {
        peer,
        state: ConnectionState::Disconnected,
    });
    let _ = node
        .events
        .try_send(TransportEvent::PeerDisconnected { peer });
}

/// One node's attachment to a [`MemHub`].
pub struct MemTransport {
    hub: MemHub,
    local: PeerId,
    started: Arc<Mutex<bool>>,
    states: Arc<Mutex<HashMap<PeerId, ConnectionState>>>,
    buffered_hint: Arc<AtomicUsize>,
}

impl MemTransport {
    /// The peer ID this transport is attached as.
    pub fn local_peer(&self) -> PeerId {
        self.local
    }

    /// Simulate outbound-buffer pressure for backpressure tests.
    pub fn set_buffered_hint(&self, bytes: usize) {
        self.buffered_hint.store(bytes, Ordering::Relaxed);
    }
}

#[async_trait]
impl Transport for MemTransport {
    fn name(&self) -> &'static str {
        "mem"
    }

    async fn start(&self, events: mpsc::Sender<TransportEvent>) -> Result<()> {
        let mut started = self.started.lock().expect("start lock");
        if *started {
            return Ok(());
        }
        self.hub
            .register(self.local, events, Arc::clone(&self.states));
        *started = true;
        tracing::debug!(peer = %self.local.short(), "mem transport started");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let mut started = self.started.lock().expect("start lock");
        if !*started {
            return Ok(());
        }
        self.hub.unregister(self.local);
        self.states.lock().expect("state lock").clear();
        *started = false;
        Ok(())
    }

    async fn connect(&self, peer: PeerId, _signaling: Option<Vec<u8>>) -> Result<()> {
        if !self.hub.is_registered(peer) {
            return Err(TransportError::Unavailable(format!(
                "{peer} not reachable on hub"
            )));
        }
        self.hub.link(self.local, peer)
    }

    async fn disconnect(&self, peer: PeerId) -> Result<()> {
        self.hub.partition(self.local, peer);
        Ok(())
    }

    async fn send(&self, peer: PeerId, bytes: Vec<u8>) -> Result<()> {
        self.hub.deliver(self.local, peer, bytes)
    }

    async fn broadcast(&self, bytes: Vec<u8>, except: Option<PeerId>) -> Result<()> {
        for peer in self.hub.linked_peers(self.local) {
            if Some(peer) == except {
                continue;
            }
            // Best effort per link; one dead link must not stop the rest.
            if let Err(e) = self.hub.deliver(self.local, peer, bytes.clone()) {
                tracing::debug!(peer = %peer.short(), error = %e, "broadcast skip");
            }
        }
        Ok(())
    }

    fn connected_peers(&self) -> Vec<PeerId> {
        self.hub.linked_peers(self.local)
    }

    fn peer_info(&self, peer: &PeerId) -> Option<PeerInfo> {
        let state = self.connection_state(peer);
        if state == ConnectionState::New {
            return None;
        }
        Some(PeerInfo {
            peer_id: *peer,
            state,
            endpoint: Some("mem".into()),
        })
    }

    fn connection_state(&self, peer: &PeerId) -> ConnectionState {
        self.states
            .lock()
            .expect("state lock")
            .get(peer)
            .copied()
            .unwrap_or(ConnectionState::New)
    }

    fn buffered_bytes(&self) -> usize {
        self.buffered_hint.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(byte: u8) -> PeerId {
        PeerId::from_bytes([byte; 32])
    }

    async fn started_pair(
        hub: &MemHub,
    ) -> (
        MemTransport,
        MemTransport,
        mpsc::Receiver<TransportEvent>,
        mpsc::Receiver<TransportEvent>,
    ) {
        let ta = hub.transport(pid(1));
        let tb = hub.transport(pid(2));
        let (tx_a, rx_a) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (tx_b, rx_b) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        ta.start(tx_a).await.expect("start a");
        tb.start(tx_b).await.expect("start b");
        (ta, tb, rx_a, rx_b)
    }

    #[tokio::test]
    async fn test_link_emits_state_change_before_connected() {
        let hub = MemHub::new();
        let (ta, _tb, mut rx_a, _rx_b) = started_pair(&hub).await;
        ta.connect(pid(2), None).await.expect("connect");

        match rx_a.recv().await.expect("event") {
            TransportEvent::StateChange { peer, state } => {
                assert_eq!(peer, pid(2));
                assert_eq!(state, ConnectionState::Connected);
            }
            other => panic!("expected StateChange first, got {other:?}"),
        }
        assert!(matches!(
            rx_a.recv().await.expect("event"),
            TransportEvent::PeerConnected { .. }
        ));
    }

    #[tokio::test]
    async fn test_send_receives_in_order() {
        let hub = MemHub::new();
        let (ta, _tb, _rx_a, mut rx_b) = started_pair(&hub).await;
        ta.connect(pid(2), None).await.expect("connect");

        // Drain b's lifecycle events.
        let _ = rx_b.recv().await;
        let _ = rx_b.recv().await;

        ta.send(pid(2), vec![1]).await.expect("send 1");
        ta.send(pid(2), vec![2]).await.expect("send 2");
        ta.send(pid(2), vec![3]).await.expect("send 3");

        for expected in 1u8..=3 {
            match rx_b.recv().await.expect("event") {
                TransportEvent::Message { from, bytes } => {
                    assert_eq!(from, pid(1));
                    assert_eq!(bytes, vec![expected]);
                }
                other => panic!("expected Message, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_send_without_link_fails() {
        let hub = MemHub::new();
        let (ta, _tb, _rx_a, _rx_b) = started_pair(&hub).await;
        assert!(matches!(
            ta.send(pid(2), vec![0]).await,
            Err(TransportError::Disconnected(_))
        ));
    }

    #[tokio::test]
    async fn test_partition_and_heal() {
        let hub = MemHub::new();
        let (ta, _tb, _rx_a, _rx_b) = started_pair(&hub).await;
        ta.connect(pid(2), None).await.expect("connect");
        assert_eq!(ta.connected_peers(), vec![pid(2)]);

        hub.partition(pid(1), pid(2));
        assert!(ta.connected_peers().is_empty());
        assert_eq!(ta.connection_state(&pid(2)), ConnectionState::Disconnected);

        hub.heal(pid(1), pid(2)).expect("heal");
        assert_eq!(ta.connected_peers(), vec![pid(2)]);
    }

    #[tokio::test]
    async fn test_broadcast_skips_excepted_peer() {
        let hub = MemHub::new();
        let ta = hub.transport(pid(1));
        let tb = hub.transport(pid(2));
        let tc = hub.transport(pid(3));
        let (tx_a, _rx_a) = mpsc::channel(64);
        let (tx_b, mut rx_b) = mpsc::channel(64);
        let (tx_c, mut rx_c) = mpsc::channel(64);
        ta.start(tx_a).await.expect("start");
        tb.start(tx_b).await.expect("start");
        tc.start(tx_c).await.expect("start");
        ta.connect(pid(2), None).await.expect("link ab");
        ta.connect(pid(3), None).await.expect("link ac");

        // Drain lifecycle events.
        for rx in [&mut rx_b, &mut rx_c] {
            let _ = rx.recv().await;
            let _ = rx.recv().await;
        }

        ta.broadcast(vec![9], Some(pid(2))).await.expect("broadcast");

        assert!(matches!(
            rx_c.recv().await.expect("event"),
            TransportEvent::Message { .. }
        ));
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_severs_links() {
        let hub = MemHub::new();
        let (ta, tb, _rx_a, mut rx_b) = started_pair(&hub).await;
        ta.connect(pid(2), None).await.expect("connect");
        let _ = rx_b.recv().await;
        let _ = rx_b.recv().await;

        ta.stop().await.expect("stop");
        ta.stop().await.expect("stop again");

        assert!(matches!(
            rx_b.recv().await.expect("event"),
            TransportEvent::StateChange {
                state: ConnectionState::Disconnected,
                ..
            }
        ));
        assert!(tb.connected_peers().is_empty());
    }

    #[tokio::test]
    async fn test_connect_to_unknown_peer_is_unavailable() {
        let hub = MemHub::new();
        let (ta, _tb, _rx_a, _rx_b) = started_pair(&hub).await;
        assert!(matches!(
            ta.connect(pid(99), None).await,
            Err(TransportError::Unavailable(_))
        ));
    }
}
