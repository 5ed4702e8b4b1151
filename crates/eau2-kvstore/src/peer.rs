// Copyright 2024 The eau2 Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The peer node: registers with the [`crate::registry::Registry`], accepts
//! connections from other peers, and dispatches `Get`/`GetAndWait`/`Put`/
//! `Message` requests to the node-local [`crate::map::LocalMap`].
//!
//! The original design pairs a listening thread with a fixed-size worker
//! pool and an `in_use_` spin-probe to find an idle slot. Here a bounded
//! [`tokio::sync::Semaphore`] of `CLIENT_NUM` permits expresses the same
//! "handle up to N concurrent connections" contract without the probe: a
//! connection task acquires a permit before it is spawned and releases it
//! on completion.
//!
//! The peer's directory — the full endpoint list the registry broadcasts
//! once quorum is reached — is cached behind a mutex and a
//! [`tokio::sync::Notify`], the async-native analogue of the design's
//! mutex+condition-variable startup gate.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use eau2_common::bytes::{BufMutExt, Reader};
use eau2_common::{Config, NodeIndex};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, Notify, Semaphore};
use tracing::{debug, info, warn};

use crate::key::Key;
use crate::map::LocalMap;
use crate::value::Value;
use crate::wire::{self, Kind};

struct DirectoryCache {
    directory: Mutex<Option<Vec<SocketAddr>>>,
    notify: Notify,
}

impl DirectoryCache {
    fn new() -> Self {
        DirectoryCache {
            directory: Mutex::new(None),
            notify: Notify::new(),
        }
    }

    fn install(&self, directory: Vec<SocketAddr>) {
        *self.directory.lock() = Some(directory);
        self.notify.notify_waiters();
    }

    fn snapshot(&self) -> Option<Vec<SocketAddr>> {
        self.directory.lock().clone()
    }

    /// Blocks (async) until the registry's quorum broadcast has populated
    /// the directory — "directory not yet initialized", per the design.
    async fn wait(&self) -> Vec<SocketAddr> {
        loop {
            let notified = self.notify.notified();
            if let Some(dir) = self.snapshot() {
                return dir;
            }
            notified.await;
        }
    }
}

/// A peer node's transport and dispatch layer: the listening socket, the
/// directory cache, and routing of outbound requests by `Key.owner`.
pub struct Peer {
    config: Config,
    listen_addr: SocketAddr,
    directory: DirectoryCache,
    local: Arc<LocalMap>,
    quitting: AtomicBool,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl Peer {
    /// Binds the peer's listening socket and spawns the accept loop.
    /// Returns the peer handle and the accept loop's join handle; callers
    /// register with the registry separately via [`Peer::register`] once
    /// they're ready to join the cluster (binding and registering are
    /// distinct lifecycle steps, not bundled, so tests can exercise the
    /// local-dispatch path without a live registry).
    pub async fn start(
        config: Config,
        local: Arc<LocalMap>,
    ) -> std::io::Result<(Arc<Peer>, tokio::task::JoinHandle<()>)> {
        let bind_addr = SocketAddr::new(config.client_ip, 0);
        let listener = TcpListener::bind(bind_addr).await?;
        let listen_addr = listener.local_addr()?;
        info!(%listen_addr, "peer listening");

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let peer = Arc::new(Peer {
            config: config.clone(),
            listen_addr,
            directory: DirectoryCache::new(),
            local,
            quitting: AtomicBool::new(false),
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
        });

        let handle = {
            let peer = peer.clone();
            tokio::spawn(async move { peer.accept_loop(listener, shutdown_rx).await })
        };

        Ok((peer, handle))
    }

    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    /// This node's position in the directory, once the registry has
    /// broadcast it. Resolved lazily from the peer's own listening address
    /// rather than cached at registration time, since the directory is the
    /// only place the cluster's canonical ordering lives.
    pub async fn node_index(&self) -> NodeIndex {
        let directory = self.directory.wait().await;
        directory
            .iter()
            .position(|addr| *addr == self.listen_addr)
            .expect("fatal: this peer's own address is missing from the broadcast directory")
    }

    /// Registers this peer's listening address with the registry.
    pub async fn register(&self) -> std::io::Result<()> {
        let registry_addr = SocketAddr::new(self.config.server_ip, self.config.server_listen_port);
        let mut stream = TcpStream::connect(registry_addr).await?;
        wire::send_message(
            &mut stream,
            Kind::Register,
            self.listen_addr,
            &wire::encode_endpoint(self.listen_addr),
            self.config.max_packet_length,
        )
        .await?;
        wire::recv_reply(&mut stream, self.listen_addr).await?;
        Ok(())
    }

    /// Deregisters from the registry. The design notes that a subsequent
    /// re-registration would reindex the directory out from under any key
    /// that already encodes the old owner index; this implementation does
    /// not support that sequence (see `DESIGN.md`).
    pub async fn deregister(&self) -> std::io::Result<()> {
        let registry_addr = SocketAddr::new(self.config.server_ip, self.config.server_listen_port);
        let mut stream = TcpStream::connect(registry_addr).await?;
        wire::send_message(
            &mut stream,
            Kind::Deregister,
            self.listen_addr,
            &wire::encode_endpoint(self.listen_addr),
            self.config.max_packet_length,
        )
        .await?;
        wire::recv_reply(&mut stream, self.listen_addr).await?;
        Ok(())
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener, mut shutdown_rx: oneshot::Receiver<()>) {
        let permits = Arc::new(Semaphore::new(self.config.client_num.max(1)));
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, _)) => {
                            let peer = self.clone();
                            let permits = permits.clone();
                            tokio::spawn(async move {
                                let _permit = permits.acquire().await.expect("semaphore never closed");
                                if let Err(err) = peer.handle_connection(stream).await {
                                    warn!(%err, "peer connection failed");
                                }
                            });
                        }
                        Err(err) => warn!(%err, "peer accept failed"),
                    }
                }
                _ = &mut shutdown_rx => break,
            }
            if self.quitting.load(Ordering::Acquire) {
                break;
            }
        }
        info!(addr = %self.listen_addr, "peer accept loop exiting");
    }

    async fn handle_connection(&self, mut stream: TcpStream) -> std::io::Result<()> {
        let my_addr = self.listen_addr;
        let (kind, payload) = wire::recv_message(&mut stream, my_addr).await?;
        match kind {
            Kind::Directory => {
                let directory = wire::decode_directory(&payload);
                info!(n = directory.len(), "directory received");
                self.directory.install(directory);
                wire::send_ack(&mut stream, my_addr).await?;
            }
            Kind::Shutdown => {
                info!("shutdown received");
                self.quitting.store(true, Ordering::Release);
                wire::send_ack(&mut stream, my_addr).await?;
                if let Some(tx) = self.shutdown_tx.lock().take() {
                    let _ = tx.send(());
                }
            }
            Kind::Get => {
                let key = Key::deserialize(&payload);
                debug!(?key, "dispatching Get");
                let value = self.local.get(&key);
                wire::send_response(&mut stream, my_addr, &encode_get_reply(value.as_ref()), self.config.max_packet_length).await?;
            }
            Kind::GetAndWait => {
                let key = Key::deserialize(&payload);
                debug!(?key, "dispatching GetAndWait");
                let value = self.local.get_and_wait(&key).await;
                wire::send_response(&mut stream, my_addr, value.as_bytes(), self.config.max_packet_length).await?;
            }
            Kind::Put => {
                let mut r = Reader::new(&payload);
                let key = Key::read_from(&mut r);
                let value_bytes = r.read_bytes(r.remaining()).to_vec();
                debug!(?key, len = value_bytes.len(), "dispatching Put");
                self.local.put(key, Value::new(value_bytes));
                wire::send_ack(&mut stream, my_addr).await?;
            }
            Kind::Message => {
                debug!(len = payload.len(), "received Message");
                wire::send_ack(&mut stream, my_addr).await?;
            }
            other => panic!("fatal: peer received unexpected message kind {other:?}"),
        }
        Ok(())
    }

    /// Sends `kind`/`payload` to the node that owns `key` and returns the
    /// response payload, if any. Used by [`crate::store::KVStore`] for the
    /// remote path of `get`/`get_and_wait`/`put`.
    pub async fn send_to_owner(
        &self,
        owner: NodeIndex,
        kind: Kind,
        payload: &[u8],
    ) -> std::io::Result<Option<Vec<u8>>> {
        let directory = self.directory.wait().await;
        let addr = *directory
            .get(owner)
            .unwrap_or_else(|| panic!("fatal: no peer at directory index {owner}"));
        let mut stream = TcpStream::connect(addr).await?;
        wire::send_message(&mut stream, kind, self.listen_addr, payload, self.config.max_packet_length).await?;
        wire::recv_reply(&mut stream, self.listen_addr).await
    }
}

/// `Get`'s response distinguishes "absent" from a present-but-empty value
/// with a leading presence byte, since the wire payload alone can't tell
/// the two apart otherwise.
pub fn encode_get_reply(value: Option<&Value>) -> Vec<u8> {
    let mut buf = Vec::new();
    match value {
        Some(v) => {
            buf.put_bool(true);
            buf.extend_from_slice(v.as_bytes());
        }
        None => buf.put_bool(false),
    }
    buf
}

pub fn decode_get_reply(bytes: &[u8]) -> Option<Value> {
    let mut r = Reader::new(bytes);
    if r.read_bool() {
        Some(Value::new(r.read_bytes(r.remaining()).to_vec()))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_reply_round_trips_absent_and_present() {
        assert_eq!(decode_get_reply(&encode_get_reply(None)), None);
        let v = Value::new(vec![1, 2, 3]);
        assert_eq!(decode_get_reply(&encode_get_reply(Some(&v))), Some(v));
    }

    #[test]
    fn get_reply_distinguishes_empty_present_from_absent() {
        let empty = Value::new(Vec::new());
        assert_eq!(decode_get_reply(&encode_get_reply(Some(&empty))), Some(empty));
        assert_eq!(decode_get_reply(&encode_get_reply(None)), None);
    }
}
