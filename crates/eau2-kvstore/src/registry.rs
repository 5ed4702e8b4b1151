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

//! The registry: the one cluster-wide node that tracks membership.
//!
//! Peers `Register` with it as they start; once the configured quorum
//! (`CLIENT_NUM` peers) has registered, it broadcasts the full directory to
//! every peer and the directory is immutable from then on (barring a
//! `Deregister`, which the design notes as an unreconciled edge case — see
//! `DESIGN.md`). The registry never proxies `Get`/`Put` traffic; peers talk
//! to each other directly once they hold the directory.

use std::net::SocketAddr;
use std::sync::Arc;

use eau2_common::Config;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::wire::{self, Kind};

struct RegistryState {
    directory: Vec<SocketAddr>,
}

/// The registry process's shared state. Registration and broadcast happen
/// under the same lock so that peers never observe a partially-updated
/// directory (the design's ordering guarantee: "the registry's `Directory`
/// broadcast happens-before any peer observes the full membership list").
pub struct Registry {
    config: Config,
    state: Mutex<RegistryState>,
}

impl Registry {
    pub fn new(config: Config) -> Self {
        Registry {
            config,
            state: Mutex::new(RegistryState {
                directory: Vec::new(),
            }),
        }
    }

    /// Binds the registry's listening socket and serves forever (or until
    /// `server_up_time` elapses, if configured). Returns the accept loop's
    /// join handle and a sender that triggers teardown early.
    pub async fn serve(self: Arc<Self>) -> std::io::Result<(JoinHandle<()>, oneshot::Sender<()>)> {
        let listen_addr = SocketAddr::new(self.config.server_ip, self.config.server_listen_port);
        let listener = TcpListener::bind(listen_addr).await?;
        info!(%listen_addr, "registry listening");

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let up_time = self.config.server_up_time;
        let registry = self.clone();

        let handle = tokio::spawn(async move {
            let mut timer = up_time.map(|secs| {
                Box::pin(tokio::time::sleep(std::time::Duration::from_secs(secs)))
            });

            loop {
                let accept = listener.accept();
                tokio::select! {
                    result = accept => {
                        match result {
                            Ok((stream, _)) => {
                                let registry = registry.clone();
                                tokio::spawn(async move {
                                    if let Err(err) = registry.handle_connection(stream).await {
                                        warn!(%err, "registry connection failed");
                                    }
                                });
                            }
                            Err(err) => warn!(%err, "registry accept failed"),
                        }
                    }
                    _ = &mut shutdown_rx => break,
                    _ = async { if let Some(t) = timer.as_mut() { t.as_mut().await } else { std::future::pending().await } }, if timer.is_some() => break,
                }
            }
            registry.teardown().await;
        });

        Ok((handle, shutdown_tx))
    }

    async fn handle_connection(&self, mut stream: TcpStream) -> std::io::Result<()> {
        let my_addr = stream.local_addr()?;
        let (kind, payload) = wire::recv_message(&mut stream, my_addr).await?;
        match kind {
            Kind::Register => {
                let endpoint = wire::decode_endpoint(&payload);
                self.register(endpoint).await;
                wire::send_ack(&mut stream, my_addr).await?;
            }
            Kind::Deregister => {
                let endpoint = wire::decode_endpoint(&payload);
                self.deregister(endpoint).await;
                wire::send_ack(&mut stream, my_addr).await?;
            }
            other => panic!("fatal: registry received unexpected message kind {other:?}"),
        }
        Ok(())
    }

    async fn register(&self, endpoint: SocketAddr) {
        let directory = {
            let mut state = self.state.lock().await;
            if state.directory.contains(&endpoint) {
                return;
            }
            state.directory.push(endpoint);
            assert!(
                state.directory.len() <= self.config.client_num,
                "fatal: registry over quorum: {} peers registered, expected {}",
                state.directory.len(),
                self.config.client_num
            );
            if state.directory.len() == self.config.client_num {
                Some(state.directory.clone())
            } else {
                None
            }
        };
        if let Some(directory) = directory {
            info!(n = directory.len(), "quorum reached, broadcasting directory");
            self.broadcast_directory(&directory).await;
        }
    }

    async fn deregister(&self, endpoint: SocketAddr) {
        let directory = {
            let mut state = self.state.lock().await;
            let Some(idx) = state.directory.iter().position(|e| *e == endpoint) else {
                return;
            };
            state.directory.remove(idx);
            state.directory.clone()
        };
        info!(%endpoint, "peer deregistered, rebroadcasting directory");
        self.broadcast_directory(&directory).await;
    }

    async fn broadcast_directory(&self, directory: &[SocketAddr]) {
        let payload = wire::encode_directory(directory);
        for peer in directory {
            if let Err(err) = self.send_to(*peer, Kind::Directory, &payload).await {
                warn!(%peer, %err, "failed to deliver directory broadcast");
            }
        }
    }

    async fn teardown(&self) {
        let directory = self.state.lock().await.directory.clone();
        info!(n = directory.len(), "tearing down cluster");
        for peer in directory {
            if let Err(err) = self.send_to(peer, Kind::Shutdown, &[]).await {
                warn!(%peer, %err, "failed to deliver shutdown");
            }
        }
    }

    async fn send_to(&self, peer: SocketAddr, kind: Kind, payload: &[u8]) -> std::io::Result<()> {
        let mut stream = TcpStream::connect(peer).await?;
        let my_addr = stream.local_addr()?;
        wire::send_message(&mut stream, kind, my_addr, payload, self.config.max_packet_length)
            .await?;
        wire::recv_reply(&mut stream, my_addr).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eau2_common::config::{DEFAULT_CHUNK_SIZE, DEFAULT_MAX_PACKET_LENGTH};
    use std::net::{IpAddr, Ipv4Addr};

    fn test_config(client_num: usize) -> Config {
        Config {
            client_num,
            client_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            server_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            chunk_size: DEFAULT_CHUNK_SIZE,
            server_up_time: None,
            server_listen_port: 0,
            max_packet_length: DEFAULT_MAX_PACKET_LENGTH,
        }
    }

    #[tokio::test]
    async fn broadcasts_only_once_quorum_is_reached() {
        let registry = Registry::new(test_config(3));
        registry.register("127.0.0.1:1".parse().unwrap()).await;
        assert_eq!(registry.state.lock().await.directory.len(), 1);
        registry.register("127.0.0.1:2".parse().unwrap()).await;
        registry.register("127.0.0.1:3".parse().unwrap()).await;
        assert_eq!(registry.state.lock().await.directory.len(), 3);
    }

    #[tokio::test]
    #[should_panic(expected = "over quorum")]
    async fn over_quorum_registration_is_fatal() {
        let registry = Registry::new(test_config(1));
        registry.register("127.0.0.1:1".parse().unwrap()).await;
        registry.register("127.0.0.1:2".parse().unwrap()).await;
    }

    #[tokio::test]
    async fn deregister_shifts_the_directory_left() {
        let registry = Registry::new(test_config(3));
        registry.register("127.0.0.1:1".parse().unwrap()).await;
        registry.register("127.0.0.1:2".parse().unwrap()).await;
        registry.register("127.0.0.1:3".parse().unwrap()).await;
        registry.deregister("127.0.0.1:2".parse().unwrap()).await;
        let directory = registry.state.lock().await.directory.clone();
        assert_eq!(
            directory,
            vec![
                "127.0.0.1:1".parse::<SocketAddr>().unwrap(),
                "127.0.0.1:3".parse::<SocketAddr>().unwrap(),
            ]
        );
    }
}
