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

//! A local, in-process cluster for tests and demos: a registry plus
//! `CLIENT_NUM` peers, all on loopback, wired together the same way the
//! `registry`/`peer` binaries wire themselves up from a config file.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use eau2_common::Config;
use eau2_kvstore::{KVStore, LocalMap, Peer, Registry};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Binds an ephemeral listener just long enough to learn a free port, then
/// drops it — the registry's real listener binds the same port moments
/// later. A real deployment pins `SERVER_LISTEN_PORT` in its config file
/// instead; this shortcut only serves a same-process test harness.
async fn free_port() -> u16 {
    let listener = tokio::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.expect("fatal: failed to probe a free port");
    listener.local_addr().expect("fatal: bound listener has no local address").port()
}

/// A running registry and `client_num` peers, each with a ready `KVStore`
/// indexed by its resolved position in the broadcast directory.
pub struct TestCluster {
    pub stores: Vec<KVStore>,
    registry_shutdown: Option<oneshot::Sender<()>>,
    registry_handle: JoinHandle<()>,
    peer_handles: Vec<JoinHandle<()>>,
}

impl TestCluster {
    /// Tears the cluster down: signals the registry to shut down (which in
    /// turn notifies every peer), then waits for every task to exit.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.registry_shutdown.take() {
            let _ = tx.send(());
        }
        let _ = self.registry_handle.await;
        for handle in self.peer_handles {
            let _ = handle.await;
        }
    }
}

/// Starts a registry and `client_num` peers on loopback, waits for the
/// quorum directory broadcast to reach every peer, and returns one
/// `KVStore` per peer, ordered by each peer's resolved node index.
pub async fn start_test_cluster(client_num: usize, chunk_size: usize) -> TestCluster {
    let port = free_port().await;
    let config = Config {
        client_num,
        client_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
        server_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
        chunk_size,
        server_up_time: None,
        server_listen_port: port,
        max_packet_length: 64 * 1024,
    };

    let registry = Arc::new(Registry::new(config.clone()));
    let (registry_handle, registry_shutdown) = registry.serve().await.expect("fatal: registry failed to bind");

    let mut started = Vec::with_capacity(client_num);
    for _ in 0..client_num {
        let local = Arc::new(LocalMap::new());
        let (peer, handle) = Peer::start(config.clone(), local.clone()).await.expect("fatal: peer failed to bind");
        peer.register().await.expect("fatal: peer failed to register");
        started.push((peer, handle, local));
    }

    let mut indexed = Vec::with_capacity(client_num);
    let mut peer_handles = Vec::with_capacity(client_num);
    for (peer, handle, local) in started {
        let node_index = peer.node_index().await;
        indexed.push((node_index, KVStore::new(node_index, local, peer)));
        peer_handles.push(handle);
    }
    indexed.sort_by_key(|(idx, _)| *idx);

    TestCluster {
        stores: indexed.into_iter().map(|(_, store)| store).collect(),
        registry_shutdown: Some(registry_shutdown),
        registry_handle,
        peer_handles,
    }
}
