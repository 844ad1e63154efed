//! In-process rendezvous for tests and simulations.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use weft_types::PeerId;

use crate::{Result, SignalingChannel, SignalingError, SignalingMessage};

/// Mailbox capacity per registered peer.
const MAILBOX_CAPACITY: usize = 64;

/// A shared in-memory rendezvous.
#[derive(Clone, Default)]
pub struct MemSignaling {
    mailboxes: Arc<Mutex<HashMap<PeerId, mpsc::Sender<SignalingMessage>>>>,
}

impl MemSignaling {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SignalingChannel for MemSignaling {
    async fn open(&self, local: PeerId) -> Result<mpsc::Receiver<SignalingMessage>> {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        self.mailboxes
            .lock()
            .expect("mailbox lock")
            .insert(local, tx);
        Ok(rx)
    }

    async fn post(&self, from: PeerId, to: PeerId, blob: Vec<u8>) -> Result<()> {
        let sender = {
            let guard = self.mailboxes.lock().expect("mailbox lock");
            guard.get(&to).cloned()
        };
        let sender = sender
            .ok_or_else(|| SignalingError::Unavailable(format!("{to} is not registered")))?;
        sender
            .send(SignalingMessage { from, blob })
            .await
            .map_err(|_| SignalingError::Unavailable(format!("{to} mailbox closed")))
    }

    async fn close(&self, local: PeerId) -> Result<()> {
        self.mailboxes
            .lock()
            .expect("mailbox lock")
            .remove(&local);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(byte: u8) -> PeerId {
        PeerId::from_bytes([byte; 32])
    }

    #[tokio::test]
    async fn test_post_and_receive() {
        let hub = MemSignaling::new();
        let mut inbox = hub.open(pid(2)).await.expect("open");
        hub.post(pid(1), pid(2), vec![1, 2, 3]).await.expect("post");

        let message = inbox.recv().await.expect("message");
        assert_eq!(message.from, pid(1));
        assert_eq!(message.blob, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_close_unregisters() {
        let hub = MemSignaling::new();
        let _inbox = hub.open(pid(2)).await.expect("open");
        hub.close(pid(2)).await.expect("close");
        assert!(hub.post(pid(1), pid(2), vec![]).await.is_err());
    }
}
