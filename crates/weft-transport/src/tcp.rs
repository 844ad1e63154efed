//! Length-prefixed TCP transport for local networks.
//!
//! Frames are `u32` big-endian length followed by payload. The first frame
//! in each direction is a hello (`"WEFT"` magic, version byte, 32-byte
//! peer ID) so each side learns which mesh peer is on the socket before
//! any traffic flows. Peer authentication is not the transport's job; the
//! engine verifies packet signatures regardless of which socket delivered
//! them.
//!
//! `connect` takes a signaling blob containing the UTF-8 `host:port` of
//! the remote listener, matching how bootstrap hints are stored.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use weft_types::PeerId;

use crate::{ConnectionState, PeerInfo, Result, Transport, TransportError, TransportEvent};

/// Hello-frame magic.
const HELLO_MAGIC: &[u8; 4] = b"WEFT";

/// Hello-frame protocol version.
const HELLO_VERSION: u8 = 1;

/// Configuration for a [`TcpTransport`].
#[derive(Clone, Debug)]
pub struct TcpConfig {
    /// Local address to listen on. Port 0 binds an ephemeral port.
    pub bind_addr: SocketAddr,
    /// Timeout for outbound connection attempts.
    pub connect_timeout: Duration,
    /// Maximum accepted frame size.
    pub max_frame_bytes: usize,
    /// Outbound queue depth per link, in frames.
    pub send_queue_frames: usize,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            connect_timeout: Duration::from_secs(30),
            max_frame_bytes: 64 * 1024 + 256,
            send_queue_frames: 256,
        }
    }
}

struct Link {
    tx: mpsc::Sender<Vec<u8>>,
    state: ConnectionState,
    endpoint: String,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

struct Inner {
    local_peer: PeerId,
    config: TcpConfig,
    links: Mutex<HashMap<PeerId, Link>>,
    events: Mutex<Option<mpsc::Sender<TransportEvent>>>,
    buffered: AtomicUsize,
    listener: Mutex<Option<JoinHandle<()>>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

/// TCP transport driver.
pub struct TcpTransport {
    inner: Arc<Inner>,
}

impl TcpTransport {
    /// Create a driver for `local_peer` with the given configuration.
    pub fn new(local_peer: PeerId, config: TcpConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                local_peer,
                config,
                links: Mutex::new(HashMap::new()),
                events: Mutex::new(None),
                buffered: AtomicUsize::new(0),
                listener: Mutex::new(None),
                local_addr: Mutex::new(None),
            }),
        }
    }

    /// The bound listen address, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.inner.local_addr.lock().expect("addr lock")
    }
}

fn hello_frame(peer: &PeerId) -> Vec<u8> {
    let mut frame = Vec::with_capacity(4 + 1 + 32);
    frame.extend_from_slice(HELLO_MAGIC);
    frame.push(HELLO_VERSION);
    frame.extend_from_slice(peer.as_bytes());
    frame
}

fn parse_hello(frame: &[u8]) -> Result<PeerId> {
    if frame.len() != 37 || &frame[..4] != HELLO_MAGIC {
        return Err(TransportError::Signaling("bad hello frame".into()));
    }
    if frame[4] != HELLO_VERSION {
        return Err(TransportError::Signaling(format!(
            "hello version {} unsupported",
            frame[4]
        )));
    }
    let mut id = [0u8; 32];
    id.copy_from_slice(&frame[5..37]);
    Ok(PeerId::from_bytes(id))
}

async fn write_frame(writer: &mut OwnedWriteHalf, bytes: &[u8]) -> std::io::Result<()> {
    writer.write_all(&(bytes.len() as u32).to_be_bytes()).await?;
    writer.write_all(bytes).await?;
    writer.flush().await
}

async fn read_frame(
    reader: &mut OwnedReadHalf,
    max_frame_bytes: usize,
) -> std::io::Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max_frame_bytes {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame of {len} bytes exceeds limit {max_frame_bytes}"),
        ));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

impl Inner {
    fn events_sender(&self) -> Option<mpsc::Sender<TransportEvent>> {
        self.events.lock().expect("events lock").clone()
    }
}

/// Wire a freshly handshaken stream into the link table and spawn its
/// reader/writer tasks.
async fn install_link(inner: &Arc<Inner>, peer: PeerId, stream: TcpStream) {
    let endpoint = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".into());
    let (mut read_half, mut write_half) = stream.into_split();

    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(inner.config.send_queue_frames);

    let writer_inner = Arc::clone(inner);
    let writer = tokio::spawn(async move {
        while let Some(bytes) = rx.recv().await {
            let len = bytes.len();
            if let Err(e) = write_frame(&mut write_half, &bytes).await {
                tracing::debug!(peer = %peer.short(), error = %e, "tcp write failed");
                writer_inner.buffered.fetch_sub(len, Ordering::Relaxed);
                break;
            }
            writer_inner.buffered.fetch_sub(len, Ordering::Relaxed);
        }
    });

    let reader_inner = Arc::clone(inner);
    let max_frame = inner.config.max_frame_bytes;
    let reader = tokio::spawn(async move {
        loop {
            match read_frame(&mut read_half, max_frame).await {
                Ok(Some(bytes)) => {
                    if let Some(events) = reader_inner.events_sender() {
                        let _ = events
                            .send(TransportEvent::Message { from: peer, bytes })
                            .await;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(peer = %peer.short(), error = %e, "tcp read failed");
                    break;
                }
            }
        }
        drop_link(&reader_inner, peer, ConnectionState::Disconnected).await;
    });

    let replaced = inner.links.lock().expect("links lock").insert(
        peer,
        Link {
            tx,
            state: ConnectionState::Connected,
            endpoint: endpoint.clone(),
            writer,
            reader,
        },
    );
    if let Some(old) = replaced {
        old.writer.abort();
        old.reader.abort();
    }

    if let Some(events) = inner.events_sender() {
        let _ = events
            .send(TransportEvent::StateChange {
                peer,
                state: ConnectionState::Connected,
            })
            .await;
        let _ = events.send(TransportEvent::PeerConnected { peer }).await;
    }
    tracing::info!(peer = %peer.short(), %endpoint, "tcp link up");
}

async fn drop_link(inner: &Arc<Inner>, peer: PeerId, state: ConnectionState) {
    let removed = inner.links.lock().expect("links lock").remove(&peer);
    let Some(link) = removed else { return };
    link.writer.abort();
    if let Some(events) = inner.events_sender() {
        let _ = events
            .send(TransportEvent::StateChange { peer, state })
            .await;
        let _ = events.send(TransportEvent::PeerDisconnected { peer }).await;
    }
    tracing::info!(peer = %peer.short(), "tcp link down");
}

#[async_trait]
impl Transport for TcpTransport {
    fn name(&self) -> &'static str {
        "tcp"
    }

    async fn start(&self, events: mpsc::Sender<TransportEvent>) -> Result<()> {
        {
            let mut guard = self.inner.events.lock().expect("events lock");
            if guard.is_some() {
                return Ok(());
            }
            *guard = Some(events);
        }

        let listener = TcpListener::bind(self.inner.config.bind_addr)
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| TransportError::Io(e.to_string()))?;
        *self.inner.local_addr.lock().expect("addr lock") = Some(local_addr);

        let inner = Arc::clone(&self.inner);
        let accept_loop = tokio::spawn(async move {
            loop {
                let Ok((stream, remote)) = listener.accept().await else {
                    break;
                };
                let inner = Arc::clone(&inner);
                tokio::spawn(async move {
                    match accept_handshake(&inner, stream).await {
                        Ok((peer, stream)) => install_link(&inner, peer, stream).await,
                        Err(e) => {
                            tracing::debug!(%remote, error = %e, "tcp handshake rejected")
                        }
                    }
                });
            }
        });
        *self.inner.listener.lock().expect("listener lock") = Some(accept_loop);

        tracing::info!(%local_addr, "tcp transport listening");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if let Some(task) = self.inner.listener.lock().expect("listener lock").take() {
            task.abort();
        }
        let links: Vec<PeerId> = {
            let guard = self.inner.links.lock().expect("links lock");
            guard.keys().copied().collect()
        };
        for peer in links {
            drop_link(&self.inner, peer, ConnectionState::Closed).await;
        }
        *self.inner.events.lock().expect("events lock") = None;
        *self.inner.local_addr.lock().expect("addr lock") = None;
        Ok(())
    }

    async fn connect(&self, peer: PeerId, signaling: Option<Vec<u8>>) -> Result<()> {
        if self
            .inner
            .links
            .lock()
            .expect("links lock")
            .contains_key(&peer)
        {
            return Ok(());
        }
        let blob = signaling.ok_or_else(|| {
            TransportError::Signaling("tcp connect requires a host:port blob".into())
        })?;
        let addr: SocketAddr = std::str::from_utf8(&blob)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| TransportError::Signaling("blob is not host:port".into()))?;

        let stream = tokio::time::timeout(
            self.inner.config.connect_timeout,
            TcpStream::connect(addr),
        )
        .await
        .map_err(|_| TransportError::Timeout)?
        .map_err(|e| TransportError::Io(e.to_string()))?;

        let (mut read_half, mut write_half) = stream.into_split();
        write_frame(&mut write_half, &hello_frame(&self.inner.local_peer))
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;
        let frame = read_frame(&mut read_half, self.inner.config.max_frame_bytes)
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?
            .ok_or_else(|| TransportError::Io("connection closed during hello".into()))?;
        let remote_peer = parse_hello(&frame)?;
        if remote_peer != peer {
            return Err(TransportError::Signaling(format!(
                "expected peer {peer}, socket answered as {remote_peer}"
            )));
        }

        let stream = read_half
            .reunite(write_half)
            .map_err(|e| TransportError::Io(e.to_string()))?;
        install_link(&self.inner, peer, stream).await;
        Ok(())
    }

    async fn disconnect(&self, peer: PeerId) -> Result<()> {
        drop_link(&self.inner, peer, ConnectionState::Closed).await;
        Ok(())
    }

    async fn send(&self, peer: PeerId, bytes: Vec<u8>) -> Result<()> {
        let len = bytes.len();
        let tx = {
            let guard = self.inner.links.lock().expect("links lock");
            let link = guard.get(&peer).ok_or(TransportError::Disconnected(peer))?;
            link.tx.clone()
        };
        self.inner.buffered.fetch_add(len, Ordering::Relaxed);
        tx.try_send(bytes).map_err(|e| {
            self.inner.buffered.fetch_sub(len, Ordering::Relaxed);
            match e {
                mpsc::error::TrySendError::Full(_) => TransportError::SendBufferFull(peer),
                mpsc::error::TrySendError::Closed(_) => TransportError::Disconnected(peer),
            }
        })
    }

    async fn broadcast(&self, bytes: Vec<u8>, except: Option<PeerId>) -> Result<()> {
        let peers = self.connected_peers();
        for peer in peers {
            if Some(peer) == except {
                continue;
            }
            if let Err(e) = self.send(peer, bytes.clone()).await {
                tracing::debug!(peer = %peer.short(), error = %e, "broadcast skip");
            }
        }
        Ok(())
    }

    fn connected_peers(&self) -> Vec<PeerId> {
        self.inner
            .links
            .lock()
            .expect("links lock")
            .iter()
            .filter(|(_, link)| link.state == ConnectionState::Connected)
            .map(|(peer, _)| *peer)
            .collect()
    }

    fn peer_info(&self, peer: &PeerId) -> Option<PeerInfo> {
        self.inner
            .links
            .lock()
            .expect("links lock")
            .get(peer)
            .map(|link| PeerInfo {
                peer_id: *peer,
                state: link.state,
                endpoint: Some(link.endpoint.clone()),
            })
    }

    fn connection_state(&self, peer: &PeerId) -> ConnectionState {
        self.inner
            .links
            .lock()
            .expect("links lock")
            .get(peer)
            .map(|link| link.state)
            .unwrap_or(ConnectionState::New)
    }

    fn buffered_bytes(&self) -> usize {
        self.inner.buffered.load(Ordering::Relaxed)
    }
}

/// Server side of the hello exchange: read the remote hello, answer with
/// ours, return the identified stream.
async fn accept_handshake(
    inner: &Arc<Inner>,
    stream: TcpStream,
) -> Result<(PeerId, TcpStream)> {
    let (mut read_half, mut write_half) = stream.into_split();
    let frame = read_frame(&mut read_half, inner.config.max_frame_bytes)
        .await
        .map_err(|e| TransportError::Io(e.to_string()))?
        .ok_or_else(|| TransportError::Io("connection closed during hello".into()))?;
    let peer = parse_hello(&frame)?;
    write_frame(&mut write_half, &hello_frame(&inner.local_peer))
        .await
        .map_err(|e| TransportError::Io(e.to_string()))?;
    let stream = read_half
        .reunite(write_half)
        .map_err(|e| TransportError::Io(e.to_string()))?;
    Ok((peer, stream))
}
