//! Session registry: every currently open connection and its identity.
//!
//! The only shared mutable state in the server. One mutex serializes
//! registration, identity changes, and snapshotting; broadcast sends
//! happen outside the lock against the snapshot.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use tokio::sync::{Mutex, mpsc, watch};

/// Connection handle. Monotonic, so `BTreeMap` iteration over ids is
/// insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnId(u64);

impl std::fmt::Display for ConnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "c{}", self.0)
    }
}

#[derive(Debug)]
struct ConnRec {
    /// Unset until the login handshake succeeds; immutable afterwards.
    identity: Option<String>,
    #[allow(dead_code)] // diagnostic only
    addr: SocketAddr,
    write_tx: mpsc::Sender<Bytes>,
    disconnect_tx: watch::Sender<bool>,
}

/// The connection already completed its handshake; identity cannot change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlreadyLoggedIn;

impl std::fmt::Display for AlreadyLoggedIn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "connection already logged in")
    }
}

impl std::error::Error for AlreadyLoggedIn {}

#[derive(Debug, Default)]
pub struct Registry {
    next_id: AtomicU64,
    conns: Mutex<BTreeMap<ConnId, ConnRec>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(
        &self,
        addr: SocketAddr,
        write_tx: mpsc::Sender<Bytes>,
        disconnect_tx: watch::Sender<bool>,
    ) -> ConnId {
        let id = ConnId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let rec = ConnRec {
            identity: None,
            addr,
            write_tx,
            disconnect_tx,
        };
        self.conns.lock().await.insert(id, rec);
        id
    }

    /// Set the identity established by the handshake, exactly once.
    pub async fn set_identity(&self, id: ConnId, name: &str) -> Result<(), AlreadyLoggedIn> {
        let mut conns = self.conns.lock().await;
        let Some(rec) = conns.get_mut(&id) else {
            // Connection raced a close; nothing to do, the caller is
            // about to tear down anyway.
            return Ok(());
        };
        if rec.identity.is_some() {
            return Err(AlreadyLoggedIn);
        }
        rec.identity = Some(name.to_string());
        Ok(())
    }

    pub async fn identity_of(&self, id: ConnId) -> Option<String> {
        self.conns.lock().await.get(&id).and_then(|r| r.identity.clone())
    }

    /// Idempotent.
    pub async fn unregister(&self, id: ConnId) {
        self.conns.lock().await.remove(&id);
    }

    pub async fn len(&self) -> usize {
        self.conns.lock().await.len()
    }

    /// Identities of all logged-in connections, insertion order.
    pub async fn identities(&self) -> Vec<String> {
        self.conns
            .lock()
            .await
            .values()
            .filter_map(|r| r.identity.clone())
            .collect()
    }

    /// Fan one line out to every registered connection, the sender
    /// included. Senders are snapshotted under the lock; the actual
    /// sends happen after it is released.
    pub async fn broadcast(&self, line: &str) {
        let txs = {
            let conns = self.conns.lock().await;
            conns.values().map(|r| r.write_tx.clone()).collect::<Vec<_>>()
        };
        let payload = partyio::encode_line(line);
        for tx in txs {
            let _ = tx.send(payload.clone()).await;
        }
    }

    /// Drain the registry, tripping every connection's disconnect watch.
    /// Used by `#close`; announcements go out before this is called.
    pub async fn close_all(&self) {
        let drained = {
            let mut conns = self.conns.lock().await;
            std::mem::take(&mut *conns)
        };
        for rec in drained.values() {
            let _ = rec.disconnect_tx.send(true);
        }
    }
}
