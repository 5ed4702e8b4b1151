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

//! The uniform facade every other component programs against: `get`,
//! `get_and_wait`, `put`, each routing to the local map or a remote peer
//! by `Key.owner`, with the caller never needing to know which.

use std::sync::Arc;

use eau2_common::NodeIndex;

use crate::key::Key;
use crate::map::LocalMap;
use crate::peer::{self, Peer};
use crate::value::Value;
use crate::wire::Kind;

/// A handle any component — a `Column`, a `DataFrame`, an application —
/// uses to read or write a key anywhere in the cluster.
#[derive(Clone)]
pub struct KVStore {
    node_index: NodeIndex,
    local: Arc<LocalMap>,
    peer: Arc<Peer>,
}

impl KVStore {
    pub fn new(node_index: NodeIndex, local: Arc<LocalMap>, peer: Arc<Peer>) -> Self {
        KVStore {
            node_index,
            local,
            peer,
        }
    }

    pub fn node_index(&self) -> NodeIndex {
        self.node_index
    }

    fn is_local(&self, key: &Key) -> bool {
        key.owner == self.node_index
    }

    /// Returns `None` if the key is absent — "not present" is not an error,
    /// per the design's error taxonomy.
    pub async fn get(&self, key: &Key) -> Option<Value> {
        if self.is_local(key) {
            return self.local.get(key);
        }
        let reply = self
            .peer
            .send_to_owner(key.owner, Kind::Get, &key.serialize())
            .await
            .expect("fatal: transport error on remote Get");
        let payload = reply.expect("fatal: remote Get closed without a Response");
        peer::decode_get_reply(&payload)
    }

    /// Blocks until `key` is present anywhere it is homed, local or remote.
    /// There is no timeout on this call; see [`KVStore::get_and_wait_timeout`]
    /// for a bounded variant.
    pub async fn get_and_wait(&self, key: &Key) -> Value {
        if self.is_local(key) {
            return self.local.get_and_wait(key).await;
        }
        let reply = self
            .peer
            .send_to_owner(key.owner, Kind::GetAndWait, &key.serialize())
            .await
            .expect("fatal: transport error on remote GetAndWait");
        let payload = reply.expect("fatal: remote GetAndWait closed without a Response");
        Value::new(payload)
    }

    /// A bounded variant of [`KVStore::get_and_wait`], exposed per the
    /// design's open question ("a correct re-implementation should expose
    /// one"). `None` on timeout.
    pub async fn get_and_wait_timeout(&self, key: &Key, timeout: std::time::Duration) -> Option<Value> {
        tokio::time::timeout(timeout, self.get_and_wait(key)).await.ok()
    }

    pub async fn put(&self, key: &Key, value: Value) {
        if self.is_local(key) {
            self.local.put(key.clone(), value);
            return;
        }
        let mut payload = Vec::with_capacity(16 + key.name.len() + value.len());
        key.write_to(&mut payload);
        payload.extend_from_slice(value.as_bytes());
        self.peer
            .send_to_owner(key.owner, Kind::Put, &payload)
            .await
            .expect("fatal: transport error on remote Put");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eau2_common::config::{DEFAULT_CHUNK_SIZE, DEFAULT_MAX_PACKET_LENGTH};
    use eau2_common::Config;
    use std::net::{IpAddr, Ipv4Addr};

    fn test_config() -> Config {
        Config {
            client_num: 1,
            client_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            server_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            chunk_size: DEFAULT_CHUNK_SIZE,
            server_up_time: None,
            server_listen_port: 0,
            max_packet_length: DEFAULT_MAX_PACKET_LENGTH,
        }
    }

    async fn local_store() -> KVStore {
        let local = Arc::new(LocalMap::new());
        // A peer bound to an ephemeral port with a directory that's never
        // populated is enough to exercise the local-routing path alone.
        let config = test_config();
        let local_map = local.clone();
        let (peer, _handle) = Peer::start(config, local_map).await.unwrap();
        KVStore::new(0, local, peer)
    }

    #[tokio::test]
    async fn local_put_then_get_round_trips() {
        let store = local_store().await;
        let key = Key::new(0, "a");
        store.put(&key, Value::new(vec![1, 2, 3])).await;
        assert_eq!(store.get(&key).await, Some(Value::new(vec![1, 2, 3])));
    }

    #[tokio::test]
    async fn local_get_of_missing_key_is_none() {
        let store = local_store().await;
        assert_eq!(store.get(&Key::new(0, "missing")).await, None);
    }

    #[tokio::test]
    async fn last_write_wins_through_the_facade() {
        let store = local_store().await;
        let key = Key::new(0, "a");
        store.put(&key, Value::new(vec![1])).await;
        store.put(&key, Value::new(vec![2])).await;
        assert_eq!(store.get(&key).await, Some(Value::new(vec![2])));
    }

    #[tokio::test]
    async fn get_and_wait_timeout_expires_when_absent() {
        let store = local_store().await;
        let got = store
            .get_and_wait_timeout(&Key::new(0, "never"), std::time::Duration::from_millis(20))
            .await;
        assert_eq!(got, None);
    }
}
