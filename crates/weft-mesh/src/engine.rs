//! The single-writer engine task.
//!
//! Owns every piece of live mesh state: the router and its dedup window,
//! the directory, the session table, the store-and-forward queue, the peer
//! records, and the SQLite connection that mirrors them. The facade and
//! the transports only talk to it through channels; timers (gossip, queue
//! flush, sweeps, health) fire inside the same `select` loop, so no state
//! is ever mutated concurrently.

use std::collections::HashMap;
use std::sync::Arc;

use rand::Rng;
use rusqlite::Connection;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use weft_crypto::ed25519::SigningKey;
use weft_crypto::hash;
use weft_db::{queries, snapshot};
use weft_transport::{Transport, TransportEvent};
use weft_types::message::{Conversation, DeliveryStatus, StoredMessage};
use weft_types::peer::PeerRecord;
use weft_types::queue::{Priority, QueuedMessage};
use weft_types::snapshot::MergeStrategy;
use weft_types::{MessageId, MessageKind, PeerId};
use weft_wire::packet::Packet;
use weft_wire::payload::{AckBody, FileChunk, FileOffer, GossipAnnouncement, GossipEntry, SecureEnvelope};

use crate::config::MeshConfig;
use crate::events::{EventBus, MeshEvent};
use crate::gossip::Directory;
use crate::health::{
    HealthMonitor, DELTA_CRYPTO_FAIL, DELTA_PROTOCOL_VIOLATION, DELTA_VERIFIED_PACKET,
};
use crate::limiter::RateLimiter;
use crate::now_ms;
use crate::queue::{EnqueueRejected, SendQueue};
use crate::router::{Disposition, RouteContext, Router};
use crate::session::{SessionError, SessionManager, SessionPolicy};
use crate::stats::MeshStats;
use crate::{MeshError, Result};

/// Peers quieter than this are pruned from storage (blacklist excepted).
const PEER_STALE_MS: u64 = 30 * 24 * 60 * 60 * 1000;

/// Payloads at or above this size have their crypto offloaded to the
/// blocking pool instead of running on the event loop.
const OFFLOAD_THRESHOLD_BYTES: usize = 8 * 1024;

/// Deadline for offloaded crypto work.
const OFFLOAD_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// Commands from the facade to the engine.
pub(crate) enum Command {
    SendMessage {
        recipient: PeerId,
        content: Vec<u8>,
        kind: MessageKind,
        priority: Priority,
        reply: oneshot::Sender<Result<MessageId>>,
    },
    MarkRead {
        id: MessageId,
        reply: oneshot::Sender<Result<()>>,
    },
    SetBlacklisted {
        peer: PeerId,
        value: bool,
        reply: oneshot::Sender<Result<()>>,
    },
    CancelQueued {
        id: MessageId,
        reply: oneshot::Sender<bool>,
    },
    ConnectedPeers {
        reply: oneshot::Sender<Vec<PeerId>>,
    },
    DiscoveredPeers {
        reply: oneshot::Sender<Vec<PeerId>>,
    },
    Stats {
        reply: oneshot::Sender<MeshStats>,
    },
    ExportSnapshot {
        reply: oneshot::Sender<Result<Vec<u8>>>,
    },
    ImportSnapshot {
        bytes: Vec<u8>,
        strategy: MergeStrategy,
        reply: oneshot::Sender<Result<()>>,
    },
    Stop,
}

pub(crate) struct Engine {
    config: MeshConfig,
    local: PeerId,
    signing: SigningKey,
    db: Connection,
    transports: Vec<Arc<dyn Transport>>,
    router: Router,
    directory: Directory,
    sessions: SessionManager,
    queue: SendQueue,
    limiter: RateLimiter,
    health: HealthMonitor,
    peers: HashMap<PeerId, PeerRecord>,
    stats: MeshStats,
    events: EventBus,
    /// Backpressure latch: set above high water, cleared below low water.
    deferring: bool,
}

impl Engine {
    /// Build the engine, loading persisted peers, routes, sessions, and
    /// queue entries.
    pub(crate) fn new(
        config: MeshConfig,
        identity: &weft_types::identity::Identity,
        db: Connection,
        transports: Vec<Arc<dyn Transport>>,
        events: EventBus,
    ) -> Result<Self> {
        let (signing, agreement) = crate::identity::keys_of(identity);
        let local = identity.peer_id;
        let now = now_ms();

        let mut directory = Directory::new(config.gossip_entry_ttl_ms, config.max_peers);
        directory.load_routes(&queries::routes::list(&db)?, now);

        let policy = SessionPolicy {
            max_messages: config.session_max_messages,
            max_age_ms: config.session_max_age_sec * 1000,
            grace_ms: config.session_accept_previous_grace_sec * 1000,
            fail_threshold: config.session_fail_threshold,
        };
        let mut sessions = SessionManager::new(agreement, policy);
        sessions.restore(&queries::session_keys::list(&db)?, now);

        let mut queue = SendQueue::new(
            config.queue_max_size,
            config.queue_base_backoff_ms,
            config.queue_cap_backoff_ms,
        );
        queue.load(queries::queue::list(&db)?);

        let peers = queries::peers::list(&db)?
            .into_iter()
            .map(|p| (p.peer_id, p))
            .collect();

        Ok(Self {
            router: Router::new(local, config.dedup_lru_size),
            limiter: RateLimiter::new(config.rate_limit_per_minute, config.rate_limit_per_hour),
            health: HealthMonitor::new(config.heartbeat_timeout_ms),
            directory,
            sessions,
            queue,
            peers,
            stats: MeshStats::default(),
            deferring: false,
            config,
            local,
            signing,
            db,
            transports,
            events,
        })
    }

    /// Run until `Stop` arrives or both channels close.
    pub(crate) async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut transport_events: mpsc::Receiver<TransportEvent>,
    ) {
        self.events.emit(MeshEvent::Started { local_peer: self.local });

        let mut gossip_deadline = next_jittered(self.config.gossip_interval_ms);
        let mut flush_timer = tokio::time::interval(std::time::Duration::from_millis(500));
        flush_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut sweep_timer = tokio::time::interval(std::time::Duration::from_secs(30));
        sweep_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut health_timer = tokio::time::interval(std::time::Duration::from_millis(
            self.config.heartbeat_interval_ms,
        ));
        health_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                command = commands.recv() => {
                    match command {
                        Some(Command::Stop) | None => break,
                        Some(command) => self.handle_command(command).await,
                    }
                }
                event = transport_events.recv() => {
                    match event {
                        Some(event) => self.handle_transport_event(event).await,
                        None => break,
                    }
                }
                _ = tokio::time::sleep_until(gossip_deadline) => {
                    self.send_gossip().await;
                    gossip_deadline = next_jittered(self.config.gossip_interval_ms);
                }
                _ = flush_timer.tick() => self.flush_queue().await,
                _ = sweep_timer.tick() => self.sweep(),
                _ = health_timer.tick() => self.check_health(),
            }
        }

        self.persist_mirrors();
        self.events.emit(MeshEvent::Stopped);
        info!("mesh engine stopped");
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::SendMessage {
                recipient,
                content,
                kind,
                priority,
                reply,
            } => {
                let result = self
                    .send_application_message(recipient, content, kind, priority)
                    .await;
                let _ = reply.send(result);
            }
            Command::MarkRead { id, reply } => {
                let _ = reply.send(self.mark_read(id).await);
            }
            Command::SetBlacklisted { peer, value, reply } => {
                let _ = reply.send(self.set_blacklisted(peer, value));
            }
            Command::CancelQueued { id, reply } => {
                let cancelled = self.queue.cancel(&id).is_some();
                if cancelled {
                    let _ = queries::queue::delete(&self.db, &id);
                }
                let _ = reply.send(cancelled);
            }
            Command::ConnectedPeers { reply } => {
                let _ = reply.send(self.connected_peers());
            }
            Command::DiscoveredPeers { reply } => {
                let now = now_ms();
                let mut discovered: Vec<PeerId> = self
                    .directory
                    .live_entries(now)
                    .into_iter()
                    .map(|(peer, _)| peer)
                    .collect();
                discovered.sort();
                let _ = reply.send(discovered);
            }
            Command::Stats { reply } => {
                let _ = reply.send(self.stats);
            }
            Command::ExportSnapshot { reply } => {
                let _ = reply.send(self.export_snapshot());
            }
            Command::ImportSnapshot {
                bytes,
                strategy,
                reply,
            } => {
                let _ = reply.send(self.import_snapshot(&bytes, strategy));
            }
            Command::Stop => {}
        }
    }

    async fn send_application_message(
        &mut self,
        recipient: PeerId,
        content: Vec<u8>,
        kind: MessageKind,
        priority: Priority,
    ) -> Result<MessageId> {
        if self.peers.get(&recipient).map(|p| p.blacklisted) == Some(true) {
            return Err(MeshError::PeerBlacklisted(recipient));
        }
        let now = now_ms();
        if !self.limiter.try_acquire(recipient, now) {
            self.stats.rate_limited += 1;
            return Err(MeshError::RateLimited(recipient));
        }

        let packet = self.seal_to(recipient, kind, &content, now).await?;
        let message_id = packet.message_id;

        // Conversation bookkeeping before any I/O, so the Pending state is
        // durable whatever happens next. The stored ID is the packet ID;
        // ACKs resolve against it.
        if kind == MessageKind::Text {
            self.store_message(
                message_id,
                recipient,
                self.local,
                recipient,
                kind,
                &content,
                now,
                DeliveryStatus::Pending,
            )?;
        }

        let status = self.dispatch(packet, recipient, priority, now).await?;
        if kind == MessageKind::Text {
            self.advance_status(message_id, status);
        }
        Ok(message_id)
    }

    /// Encrypt, wrap, and sign an application payload for a recipient.
    async fn seal_to(
        &mut self,
        recipient: PeerId,
        kind: MessageKind,
        content: &[u8],
        now: u64,
    ) -> Result<Packet> {
        let peer_pk = self.agreement_pk_for(&recipient);
        let envelope = self
            .sessions
            .encrypt(recipient, peer_pk.as_ref(), content, now)
            .map_err(|e| match e {
                SessionError::NoPeerKey => MeshError::PeerKeyUnknown(recipient),
                SessionError::Crypto(c) => MeshError::Crypto(c),
                _ => MeshError::Crypto(weft_crypto::CryptoError::AuthFail),
            })?;
        let payload = envelope.to_bytes()?;
        if payload.len() > self.config.max_payload_bytes() {
            return Err(MeshError::PayloadTooLarge {
                got: payload.len(),
                limit: self.config.max_payload_bytes(),
            });
        }
        let packet = Packet::seal(kind, self.config.ttl_default, now, payload, &self.signing)?;
        self.router.record_own(packet.message_id);
        Ok(packet)
    }

    /// Transmit now if a path exists, otherwise park in the queue.
    async fn dispatch(
        &mut self,
        packet: Packet,
        destination: PeerId,
        priority: Priority,
        now: u64,
    ) -> Result<DeliveryStatus> {
        let bytes = packet.encode();

        if let Some(next_hop) = self.next_hop_for(&destination, None, now) {
            if self.transmit(next_hop, bytes.clone(), priority).await {
                return Ok(DeliveryStatus::Sent);
            }
        }

        self.enqueue_packet(packet.message_id, destination, bytes, priority, now)?;
        Ok(DeliveryStatus::Queued)
    }

    async fn mark_read(&mut self, id: MessageId) -> Result<()> {
        let message = queries::messages::get(&self.db, &id)?;
        if message.sender == self.local {
            // Read receipts apply to messages we received, not sent.
            return Ok(());
        }
        let body = AckBody { acked: id, read: true }.to_bytes()?;
        let now = now_ms();
        let sender = message.sender;
        let packet = self.seal_to(sender, MessageKind::Ack, &body, now).await?;
        let _ = self.dispatch(packet, sender, Priority::High, now).await?;
        Ok(())
    }

    fn set_blacklisted(&mut self, peer: PeerId, value: bool) -> Result<()> {
        let now = now_ms();
        let record = self
            .peers
            .entry(peer)
            .or_insert_with(|| PeerRecord::sighted(peer, now));
        record.blacklisted = value;
        queries::peers::upsert(&self.db, record)?;
        if value {
            self.sessions.forget(&peer);
            self.directory.remove(&peer);
            self.limiter.forget(&peer);
        }
        info!(peer = %peer.short(), blacklisted = value, "blacklist updated");
        Ok(())
    }

    fn export_snapshot(&mut self) -> Result<Vec<u8>> {
        self.persist_mirrors();
        let snapshot = snapshot::export_all(&self.db, now_ms())?;
        Ok(snapshot::serialize(&snapshot)?)
    }

    fn import_snapshot(&mut self, bytes: &[u8], strategy: MergeStrategy) -> Result<()> {
        let parsed = snapshot::parse(bytes)?;
        snapshot::import(&mut self.db, &parsed, strategy)?;

        // Rebuild in-memory projections from the merged store.
        let now = now_ms();
        self.peers = queries::peers::list(&self.db)?
            .into_iter()
            .map(|p| (p.peer_id, p))
            .collect();
        self.directory = Directory::new(self.config.gossip_entry_ttl_ms, self.config.max_peers);
        self.directory
            .load_routes(&queries::routes::list(&self.db)?, now);
        self.queue.load(queries::queue::list(&self.db)?);
        // Session keys are re-derived lazily on next contact.
        Ok(())
    }

    // ------------------------------------------------------------------
    // Transport events and packet handling
    // ------------------------------------------------------------------

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Message { from, bytes } => {
                self.handle_packet(from, bytes).await;
            }
            TransportEvent::PeerConnected { peer } => {
                let now = now_ms();
                self.touch_peer(peer, now);
                let rep = rep_of(&self.peers);
                self.directory.observe(peer, peer, 1, now, now, rep);
                self.health.record_heard(peer, now);
                self.events.emit(MeshEvent::PeerConnected { peer });
                // A fresh link often unblocks queued traffic.
                self.flush_queue().await;
            }
            TransportEvent::PeerDisconnected { peer } => {
                let lost = self.directory.drop_via(&peer);
                if !lost.is_empty() {
                    let _ = queries::routes::delete_via(&self.db, &peer);
                }
                self.health.forget(&peer);
                self.events.emit(MeshEvent::PeerDisconnected { peer });
            }
            TransportEvent::StateChange { peer, state } => {
                debug!(peer = %peer.short(), ?state, "transport state change");
            }
            TransportEvent::Error { peer, message } => {
                warn!(?peer, %message, "transport error");
            }
        }
    }

    async fn handle_packet(&mut self, inbound: PeerId, bytes: Vec<u8>) {
        let now = now_ms();

        let packet = match Packet::decode(&bytes, self.config.max_packet_bytes) {
            Ok(packet) => packet,
            Err(e) => {
                self.stats.dropped_codec += 1;
                self.penalize(inbound, DELTA_PROTOCOL_VIOLATION);
                debug!(inbound = %inbound.short(), error = %e, "packet decode failed");
                return;
            }
        };

        if let Err(e) = Self::verify_packet(&packet).await {
            self.stats.dropped_crypto += 1;
            self.penalize(inbound, DELTA_CRYPTO_FAIL);
            debug!(inbound = %inbound.short(), error = %e, "packet verification failed");
            return;
        }

        // Envelope destination for unicast kinds (gossip has none).
        let envelope = if packet.kind == MessageKind::Gossip {
            None
        } else {
            match SecureEnvelope::from_bytes(&packet.payload) {
                Ok(envelope) => Some(envelope),
                Err(e) => {
                    self.stats.dropped_codec += 1;
                    self.penalize(inbound, DELTA_PROTOCOL_VIOLATION);
                    debug!(inbound = %inbound.short(), error = %e, "envelope decode failed");
                    return;
                }
            }
        };
        let destination = envelope.as_ref().map(|e| e.to);

        // Liveness and route learning happen on any verified packet.
        self.health.record_heard(inbound, now);
        self.touch_peer(inbound, now);
        if packet.sender != self.local {
            self.touch_peer(packet.sender, now);
            let hops = self.hops_traveled(packet.ttl);
            let rep = rep_of(&self.peers);
            self.directory
                .observe(packet.sender, inbound, hops, now, now, rep);
        }

        let connected = self.connected_peers();
        let ctx = RouteContext {
            connected: &connected,
            directory: &self.directory,
            now_ms: now,
        };
        let peers = &self.peers;
        let blacklisted = |peer: &PeerId| peers.get(peer).map(|p| p.blacklisted).unwrap_or(false);
        let disposition = self.router.dispose(
            packet.sender,
            packet.message_id,
            packet.kind,
            packet.ttl,
            destination,
            inbound,
            &ctx,
            blacklisted,
        );

        match disposition {
            Disposition::DropSelf => self.stats.dropped_self += 1,
            Disposition::DropDuplicate => self.stats.dropped_dedup += 1,
            Disposition::DropBlacklisted => {
                debug!(sender = %packet.sender.short(), "dropped blacklisted traffic");
            }
            Disposition::DropTtl => {
                // A gossip packet at the end of its hop budget still
                // teaches us reachability; only relaying is off the table.
                if packet.kind == MessageKind::Gossip {
                    self.handle_gossip(&packet, inbound, now);
                }
                self.stats.dropped_ttl += 1;
            }
            Disposition::DropMalformed => self.stats.dropped_codec += 1,
            Disposition::DeliverLocal => {
                if let Some(envelope) = envelope {
                    self.deliver_local(&packet, envelope, now).await;
                }
            }
            Disposition::Forward { next_hop } => {
                self.relay_unicast(&packet, next_hop, now).await;
            }
            Disposition::BroadcastRelay => {
                self.handle_gossip(&packet, inbound, now);
                self.relay_broadcast(&packet, inbound).await;
            }
            Disposition::Enqueue { destination } => {
                let mut forwarded = packet.clone();
                forwarded.ttl -= 1;
                if let Err(e) = self.enqueue_packet(
                    forwarded.message_id,
                    destination,
                    forwarded.encode(),
                    Priority::Normal,
                    now,
                ) {
                    debug!(error = %e, "relay enqueue refused");
                }
            }
        }
    }

    async fn deliver_local(&mut self, packet: &Packet, envelope: SecureEnvelope, now: u64) {
        // A handshake envelope also teaches us the sender's static key.
        if let Some(pk) = envelope.sender_agreement_pk {
            self.learn_agreement_pk(packet.sender, pk, now);
        }

        let content = match self.sessions.decrypt(packet.sender, &envelope, now) {
            Ok(content) => content,
            Err(e) => {
                self.stats.dropped_crypto += 1;
                self.penalize(packet.sender, DELTA_CRYPTO_FAIL);
                if let SessionError::AuthFail { reset: true } = e {
                    self.penalize(packet.sender, DELTA_PROTOCOL_VIOLATION);
                }
                debug!(sender = %packet.sender.short(), error = %e, "envelope decrypt failed");
                return;
            }
        };

        self.stats.delivered_local += 1;
        self.reward(packet.sender, DELTA_VERIFIED_PACKET);

        match packet.kind {
            MessageKind::Text => {
                if let Err(e) = self.store_message(
                    packet.message_id,
                    packet.sender,
                    packet.sender,
                    self.local,
                    packet.kind,
                    &content,
                    packet.timestamp_ms,
                    DeliveryStatus::Delivered,
                ) {
                    warn!(error = %e, "failed to persist inbound message");
                }
                self.events.emit(MeshEvent::MessageReceived {
                    from: packet.sender,
                    kind: packet.kind,
                    payload: content,
                    timestamp_ms: packet.timestamp_ms,
                });
                self.send_ack(packet, now).await;
            }
            MessageKind::FileOffer => {
                match FileOffer::from_bytes(&content) {
                    Ok(offer) => self.events.emit(MeshEvent::FileOffered {
                        from: packet.sender,
                        transfer_id: offer.transfer_id,
                        name: offer.name,
                        size: offer.size,
                        chunk_count: offer.chunk_count,
                    }),
                    Err(e) => {
                        self.stats.dropped_codec += 1;
                        debug!(error = %e, "bad file offer body");
                        return;
                    }
                }
                self.send_ack(packet, now).await;
            }
            MessageKind::FileChunk => {
                match FileChunk::from_bytes(&content) {
                    Ok(chunk) => self.events.emit(MeshEvent::FileChunkReceived {
                        from: packet.sender,
                        transfer_id: chunk.transfer_id,
                        index: chunk.index,
                        data: chunk.data,
                    }),
                    Err(e) => {
                        self.stats.dropped_codec += 1;
                        debug!(error = %e, "bad file chunk body");
                        return;
                    }
                }
                self.send_ack(packet, now).await;
            }
            MessageKind::Ack => match AckBody::from_bytes(&content) {
                Ok(ack) => self.handle_ack(ack),
                Err(e) => {
                    self.stats.dropped_codec += 1;
                    debug!(error = %e, "bad ack body");
                }
            },
            MessageKind::Handshake | MessageKind::Rekey => {
                // Key material already consumed by the session layer.
                debug!(sender = %packet.sender.short(), kind = ?packet.kind, "session packet");
            }
            MessageKind::Gossip => {
                // Gossip never arrives here; it has no unicast envelope.
            }
        }
    }

    fn handle_ack(&mut self, ack: AckBody) {
        let status = if ack.read {
            DeliveryStatus::Read
        } else {
            DeliveryStatus::Delivered
        };
        // The ACK may race the queue flush bookkeeping; delivered wins.
        if self.queue.delivered(&ack.acked).is_some() {
            let _ = queries::queue::delete(&self.db, &ack.acked);
        }
        self.advance_status(ack.acked, status);
    }

    async fn send_ack(&mut self, packet: &Packet, now: u64) {
        let body = AckBody {
            acked: packet.message_id,
            read: false,
        };
        let Ok(body_bytes) = body.to_bytes() else { return };
        let recipient = packet.sender;
        match self.seal_to(recipient, MessageKind::Ack, &body_bytes, now).await {
            Ok(ack_packet) => {
                if let Err(e) = self.dispatch(ack_packet, recipient, Priority::High, now).await {
                    debug!(error = %e, "ack dispatch failed");
                }
            }
            Err(e) => debug!(error = %e, "ack seal failed"),
        }
    }

    fn handle_gossip(&mut self, packet: &Packet, inbound: PeerId, now: u64) {
        let announcement = match GossipAnnouncement::from_bytes(&packet.payload) {
            Ok(announcement) => announcement,
            Err(e) => {
                self.stats.dropped_codec += 1;
                debug!(error = %e, "bad gossip body");
                return;
            }
        };

        self.learn_agreement_pk(packet.sender, announcement.agreement_pk, now);

        let hops = self.hops_traveled(packet.ttl);
        let rep = rep_of(&self.peers);
        let discovered = self.directory.merge_announcement(
            packet.sender,
            inbound,
            hops,
            &announcement,
            self.local,
            now,
            rep,
        );
        for peer in discovered {
            self.touch_peer(peer, now);
            self.events.emit(MeshEvent::PeerDiscovered { peer });
        }
        self.reward(packet.sender, DELTA_VERIFIED_PACKET);
    }

    async fn relay_unicast(&mut self, packet: &Packet, next_hop: PeerId, now: u64) {
        let mut forwarded = packet.clone();
        forwarded.ttl -= 1;
        let bytes = forwarded.encode();
        if self.transmit(next_hop, bytes.clone(), Priority::Normal).await {
            self.stats.forwarded += 1;
        } else if let Err(e) = self.enqueue_packet(
            forwarded.message_id,
            self.envelope_destination(packet).unwrap_or(next_hop),
            bytes,
            Priority::Normal,
            now,
        ) {
            debug!(error = %e, "forward fallback enqueue refused");
        }
    }

    async fn relay_broadcast(&mut self, packet: &Packet, inbound: PeerId) {
        let mut forwarded = packet.clone();
        forwarded.ttl -= 1;
        let bytes = forwarded.encode();
        for transport in &self.transports {
            if let Err(e) = transport.broadcast(bytes.clone(), Some(inbound)).await {
                debug!(transport = transport.name(), error = %e, "relay broadcast failed");
            }
        }
        self.stats.broadcast_relayed += 1;
    }

    // ------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------

    async fn send_gossip(&mut self) {
        let now = now_ms();
        let mut entries: Vec<GossipEntry> = self
            .directory
            .live_entries(now)
            .into_iter()
            .filter(|(peer, _)| {
                !self.peers.get(peer).map(|p| p.blacklisted).unwrap_or(false)
            })
            .map(|(peer_id, entry)| GossipEntry {
                peer_id,
                hop_count: entry.hop_count,
                last_seen_ms: entry.last_seen_ms,
            })
            .collect();
        entries.sort_by_key(|e| e.hop_count);
        entries.truncate(self.config.gossip_max_entries);

        let announcement = GossipAnnouncement {
            agreement_pk: self.sessions.local_public().to_bytes(),
            self_clock_ms: now,
            entries,
        };
        let Ok(payload) = announcement.to_bytes() else { return };
        let packet = match Packet::seal(
            MessageKind::Gossip,
            self.config.ttl_default,
            now,
            payload,
            &self.signing,
        ) {
            Ok(packet) => packet,
            Err(e) => {
                warn!(error = %e, "gossip seal failed");
                return;
            }
        };
        self.router.record_own(packet.message_id);

        let bytes = packet.encode();
        for transport in &self.transports {
            if let Err(e) = transport.broadcast(bytes.clone(), None).await {
                debug!(transport = transport.name(), error = %e, "gossip broadcast failed");
            }
        }
    }

    async fn flush_queue(&mut self) {
        let now = now_ms();

        // Expiry first, so dead entries never consume attempts.
        for expired in self
            .queue
            .take_expired(now, self.config.queue_max_attempts)
        {
            self.stats.queue_expired += 1;
            let _ = queries::queue::delete(&self.db, &expired.id);
            self.advance_status(expired.id, DeliveryStatus::Failed);
        }

        let connected = self.connected_peers();
        let directory = &self.directory;
        let reachable = |peer: &PeerId| {
            connected.contains(peer)
                || directory
                    .entry(peer, now)
                    .map(|e| connected.contains(&e.next_hop))
                    .unwrap_or(false)
        };

        let ready = self.queue.ready(now, reachable);
        for entry in ready {
            let Some(next_hop) = self.next_hop_for(&entry.destination, None, now) else {
                continue;
            };
            if self
                .transmit(next_hop, entry.payload.clone(), entry.priority)
                .await
            {
                self.queue.delivered(&entry.id);
                let _ = queries::queue::delete(&self.db, &entry.id);
                self.advance_status(entry.id, DeliveryStatus::Sent);
                debug!(dest = %entry.destination.short(), "queued message flushed");
            } else {
                self.queue.failed_attempt(&entry.id, now);
                if let Some(updated) = self.queue.get(&entry.id) {
                    let _ = queries::queue::upsert(&self.db, updated);
                }
            }
        }
    }

    fn sweep(&mut self) {
        let now = now_ms();

        let expired_routes = self.directory.sweep_expired(now);
        if !expired_routes.is_empty() {
            let _ = queries::routes::prune_expired(&self.db, now);
        }

        let expired_sessions = self.sessions.sweep_expired(now);
        for peer in &expired_sessions {
            let _ = queries::session_keys::delete_for_peer(&self.db, peer);
        }

        let _ = queries::queue::prune_expired(&self.db, now);
        let _ = queries::peers::prune_stale(&self.db, now.saturating_sub(PEER_STALE_MS));
        self.peers.retain(|_, p| {
            p.blacklisted || now.saturating_sub(p.last_seen_ms) < PEER_STALE_MS
        });

        self.persist_mirrors();
    }

    fn check_health(&mut self) {
        let now = now_ms();
        for peer in self.health.take_silent(now) {
            self.directory.remove(&peer);
            let _ = queries::routes::delete(&self.db, &peer);
            self.events.emit(MeshEvent::PeerDisconnected { peer });
            debug!(peer = %peer.short(), "peer silent past heartbeat timeout");
        }
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    /// Verify signature and ID commitment, offloading large packets to the
    /// blocking pool.
    async fn verify_packet(packet: &Packet) -> Result<()> {
        if packet.payload.len() < OFFLOAD_THRESHOLD_BYTES {
            return Ok(packet.verify()?);
        }
        let cloned = packet.clone();
        let verified = tokio::time::timeout(
            OFFLOAD_TIMEOUT,
            tokio::task::spawn_blocking(move || cloned.verify()),
        )
        .await;
        match verified {
            Ok(Ok(result)) => Ok(result?),
            Ok(Err(join_error)) => Err(MeshError::Wire(weft_wire::WireError::Malformed(
                join_error.to_string(),
            ))),
            Err(_) => Err(MeshError::Wire(weft_wire::WireError::Malformed(
                "verification worker timed out".into(),
            ))),
        }
    }

    fn envelope_destination(&self, packet: &Packet) -> Option<PeerId> {
        if packet.kind == MessageKind::Gossip {
            return None;
        }
        SecureEnvelope::from_bytes(&packet.payload)
            .ok()
            .map(|e| e.to)
    }

    /// Hops a packet traveled, assuming it was sealed with the default
    /// hop budget.
    fn hops_traveled(&self, ttl: u8) -> u8 {
        self.config
            .ttl_default
            .saturating_sub(ttl)
            .saturating_add(1)
    }

    fn connected_peers(&self) -> Vec<PeerId> {
        let mut connected: Vec<PeerId> = self
            .transports
            .iter()
            .flat_map(|t| t.connected_peers())
            .collect();
        connected.sort();
        connected.dedup();
        connected
    }

    /// The directly connected peer to hand a packet for `destination` to.
    fn next_hop_for(
        &self,
        destination: &PeerId,
        exclude: Option<PeerId>,
        now: u64,
    ) -> Option<PeerId> {
        let connected = self.connected_peers();
        if Some(*destination) != exclude && connected.contains(destination) {
            return Some(*destination);
        }
        let entry = self.directory.entry(destination, now)?;
        if Some(entry.next_hop) != exclude && connected.contains(&entry.next_hop) {
            return Some(entry.next_hop);
        }
        None
    }

    /// Hand bytes to the transport owning the peer, honoring backpressure.
    async fn transmit(&mut self, peer: PeerId, bytes: Vec<u8>, priority: Priority) -> bool {
        let Some(transport) = self
            .transports
            .iter()
            .find(|t| t.connected_peers().contains(&peer))
            .cloned()
        else {
            return false;
        };

        if !self.backpressure_allows(transport.buffered_bytes(), priority) {
            self.stats.backpressure_deferred += 1;
            return false;
        }

        match transport.send(peer, bytes).await {
            Ok(()) => true,
            Err(e) => {
                debug!(peer = %peer.short(), error = %e, "transmit failed");
                false
            }
        }
    }

    /// High/low-water hysteresis; critical traffic may overshoot by a
    /// bounded amount.
    fn backpressure_allows(&mut self, buffered: usize, priority: Priority) -> bool {
        if self.deferring {
            if buffered <= self.config.send_low_water_bytes {
                self.deferring = false;
            }
        } else if buffered >= self.config.send_high_water_bytes {
            self.deferring = true;
        }

        if !self.deferring {
            return true;
        }
        priority == Priority::Critical
            && buffered < self.config.send_high_water_bytes + self.config.critical_overshoot_bytes
    }

    fn enqueue_packet(
        &mut self,
        id: MessageId,
        destination: PeerId,
        payload: Vec<u8>,
        priority: Priority,
        now: u64,
    ) -> Result<()> {
        let entry = QueuedMessage {
            id,
            destination,
            payload,
            priority,
            attempts: 0,
            last_attempt_at_ms: None,
            created_at_ms: now,
            expires_at_ms: now + self.config.queue_entry_ttl_ms,
        };
        match self.queue.enqueue(entry.clone()) {
            Ok(enqueued) => {
                self.stats.enqueued += 1;
                queries::queue::upsert(&self.db, &entry)?;
                if let Some(evicted) = enqueued.evicted {
                    self.stats.queue_evicted += 1;
                    let _ = queries::queue::delete(&self.db, &evicted.id);
                    self.advance_status(evicted.id, DeliveryStatus::Failed);
                    self.events.emit(MeshEvent::QueueDropped { id: evicted.id });
                }
                Ok(())
            }
            Err(EnqueueRejected::QueueFull) => {
                self.stats.queue_evicted += 1;
                Err(MeshError::QueueFull)
            }
        }
    }

    /// Persist a message under its packet ID and bump the conversation.
    #[allow(clippy::too_many_arguments)]
    fn store_message(
        &mut self,
        id: MessageId,
        conversation_peer: PeerId,
        sender: PeerId,
        recipient: PeerId,
        kind: MessageKind,
        content: &[u8],
        timestamp_ms: u64,
        status: DeliveryStatus,
    ) -> Result<()> {
        let conversation_id = conversation_id(&self.local, &conversation_peer);
        let conversation = Conversation {
            id: conversation_id,
            peer_id: conversation_peer,
            created_at_ms: timestamp_ms,
            last_activity_ms: timestamp_ms,
        };
        queries::conversations::upsert(&self.db, &conversation)?;

        let message = StoredMessage {
            id,
            conversation_id,
            sender,
            recipient,
            kind,
            content: content.to_vec(),
            timestamp_ms,
            status,
        };
        queries::messages::upsert(&self.db, &message)?;
        Ok(())
    }

    fn advance_status(&mut self, id: MessageId, status: DeliveryStatus) {
        match queries::messages::update_status(&self.db, &id, status) {
            Ok(applied) => {
                self.events.emit(MeshEvent::MessageStatus { id, status: applied });
            }
            Err(weft_db::DbError::NotFound(_)) => {
                // Relayed traffic has no stored message; nothing to advance.
            }
            Err(e) => debug!(error = %e, "status update failed"),
        }
    }

    fn agreement_pk_for(&self, peer: &PeerId) -> Option<weft_crypto::x25519::AgreementPublic> {
        let from_directory = self.directory.agreement_pk(peer);
        let from_record = self.peers.get(peer).and_then(|p| p.agreement_key);
        from_directory
            .or(from_record)
            .map(weft_crypto::x25519::AgreementPublic::from_bytes)
    }

    fn learn_agreement_pk(&mut self, peer: PeerId, pk: [u8; 32], now: u64) {
        self.directory.learn_agreement_pk(peer, pk, now);
        let record = self
            .peers
            .entry(peer)
            .or_insert_with(|| PeerRecord::sighted(peer, now));
        if record.agreement_key != Some(pk) {
            record.agreement_key = Some(pk);
            let _ = queries::peers::upsert(&self.db, record);
        }
    }

    fn touch_peer(&mut self, peer: PeerId, now: u64) {
        if peer == self.local {
            return;
        }
        let record = self
            .peers
            .entry(peer)
            .or_insert_with(|| PeerRecord::sighted(peer, now));
        record.last_seen_ms = record.last_seen_ms.max(now);
        let _ = queries::peers::upsert(&self.db, record);
    }

    fn reward(&mut self, peer: PeerId, delta: i8) {
        self.apply_reputation(peer, delta);
    }

    fn penalize(&mut self, peer: PeerId, delta: i8) {
        self.apply_reputation(peer, delta);
    }

    fn apply_reputation(&mut self, peer: PeerId, delta: i8) {
        if peer == self.local {
            return;
        }
        let now = now_ms();
        let record = self
            .peers
            .entry(peer)
            .or_insert_with(|| PeerRecord::sighted(peer, now));
        record.adjust_reputation(delta);
        let _ = queries::peers::upsert(&self.db, record);
    }

    /// Mirror in-memory projections (routes, session keys) to storage.
    fn persist_mirrors(&mut self) {
        let now = now_ms();
        for route in self.directory.to_routes(now) {
            let _ = queries::routes::upsert(&self.db, &route);
        }
        for record in self.sessions.export_records() {
            let _ = queries::session_keys::upsert(&self.db, &record);
        }
    }
}

/// Reputation lookup over the peer map, borrowable disjointly from the
/// rest of the engine's fields.
fn rep_of(peers: &HashMap<PeerId, PeerRecord>) -> impl Fn(&PeerId) -> u8 + Copy + '_ {
    move |peer: &PeerId| {
        peers
            .get(peer)
            .map(|p| p.reputation)
            .unwrap_or(weft_types::peer::REPUTATION_INITIAL)
    }
}

/// Deterministic 1:1 conversation ID: hash of the sorted peer-id pair.
pub(crate) fn conversation_id(a: &PeerId, b: &PeerId) -> [u8; 32] {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let mut joined = Vec::with_capacity(64);
    joined.extend_from_slice(lo.as_bytes());
    joined.extend_from_slice(hi.as_bytes());
    hash::sha256(&joined)
}

fn next_jittered(interval_ms: u64) -> tokio::time::Instant {
    let jitter = rand::thread_rng().gen_range(0..=interval_ms / 4);
    tokio::time::Instant::now() + std::time::Duration::from_millis(interval_ms + jitter)
}
