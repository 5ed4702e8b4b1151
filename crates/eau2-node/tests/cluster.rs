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

//! End-to-end scenarios spanning real loopback sockets across several
//! peers: directory quorum, cross-node dataframe reads, parallel reduction
//! over a remote column, a blocking `get_and_wait` rendezvous, and a
//! three-node producer/counter/summarizer pipeline.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use eau2_dataframe::{DataFrame, Row, Rower};
use eau2_kvstore::{Key, Value};
use eau2_node::apps::word_count;
use eau2_node::harness::start_test_cluster;

#[tokio::test]
async fn registering_three_peers_reaches_quorum_and_assigns_distinct_indices() {
    let cluster = start_test_cluster(3, 16).await;
    assert_eq!(cluster.stores.len(), 3);
    for (i, store) in cluster.stores.iter().enumerate() {
        assert_eq!(store.node_index(), i);
    }
    cluster.shutdown().await;
}

#[tokio::test]
async fn dataframe_round_trips_across_peers() {
    let cluster = start_test_cluster(2, 4).await;
    let data: Vec<i32> = (0..100).collect();
    let df = DataFrame::from_ints(Key::new(0, "shared"), cluster.stores[0].clone(), 4, &data).await;
    let bytes = df.serialize();

    // A different peer reconstructs the same dataframe from nothing but
    // its key's metadata bytes, reading every element back over the wire.
    let remote_view = DataFrame::deserialize(&bytes, cluster.stores[1].clone(), 4);
    for (i, expected) in data.iter().enumerate() {
        assert_eq!(remote_view.get_int(0, i).await, *expected);
    }
    cluster.shutdown().await;
}

#[derive(Clone)]
struct SumRower {
    total: Arc<AtomicI64>,
}

impl Rower for SumRower {
    fn accept(&mut self, row: &Row) -> bool {
        self.total.fetch_add(row.get_int(0) as i64, Ordering::Relaxed);
        true
    }

    fn clone_rower(&self) -> Box<dyn Rower> {
        Box::new(self.clone())
    }
}

#[tokio::test]
async fn parallel_sum_matches_expected_total_across_a_remote_column() {
    let cluster = start_test_cluster(2, 8).await;
    let data: Vec<i32> = (0..2000).collect();
    // Built by peer 1 but homed on node 0 by construction, so pmap's
    // concurrent row reads from peer 1's view all cross the network.
    let df = DataFrame::from_ints(Key::new(0, "pmap-remote"), cluster.stores[1].clone(), 8, &data).await;

    let total = Arc::new(AtomicI64::new(0));
    let mut rower = SumRower { total: total.clone() };
    df.pmap(&mut rower).await;

    assert_eq!(total.load(Ordering::Relaxed), 1_999_000);
    cluster.shutdown().await;
}

#[tokio::test]
async fn get_and_wait_unblocks_once_a_remote_peer_publishes() {
    let cluster = start_test_cluster(2, 4).await;
    let waiter = cluster.stores[0].clone();
    let producer = cluster.stores[1].clone();

    let wait_handle = tokio::spawn(async move { waiter.get_and_wait(&Key::new(1, "signal")).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    producer.put(&Key::new(1, "signal"), Value::new(vec![42])).await;

    let value = wait_handle.await.unwrap();
    assert_eq!(value, Value::new(vec![42]));
    cluster.shutdown().await;
}

#[tokio::test]
async fn producer_counter_summarizer_pipeline_spans_three_nodes() {
    let cluster = start_test_cluster(3, 8).await;

    // Node 0 ("producer") publishes a dataframe of words.
    let words: Vec<String> = ["a", "b", "a", "c", "b", "a"].into_iter().map(String::from).collect();
    let df = DataFrame::from_strings(Key::new(0, "words"), cluster.stores[0].clone(), 8, &words).await;

    // Node 1 ("counter") waits for the dataframe's key, tallies it, and
    // publishes the count for "a" under its own key.
    let counter_store = cluster.stores[1].clone();
    let df_key = df.key().clone();
    tokio::spawn(async move {
        let bytes = counter_store.get_and_wait(&df_key).await;
        let remote_df = DataFrame::deserialize(bytes.as_bytes(), counter_store.clone(), 8);
        let mut counts: HashMap<String, i64> = HashMap::new();
        for i in 0..remote_df.nrows() {
            *counts.entry(remote_df.get_string(0, i).await).or_insert(0) += 1;
        }
        let encoded = counts.get("a").copied().unwrap_or(0).to_string();
        counter_store.put(&Key::new(1, "a-count"), Value::new(encoded.into_bytes())).await;
    })
    .await
    .unwrap();

    // Node 2 ("summarizer") waits on the counter's published result.
    let summarizer_store = cluster.stores[2].clone();
    let result = summarizer_store.get_and_wait(&Key::new(1, "a-count")).await;
    let count: i64 = String::from_utf8(result.as_bytes().to_vec()).unwrap().parse().unwrap();
    assert_eq!(count, 3);

    cluster.shutdown().await;
}

#[tokio::test]
async fn word_count_app_tallies_every_line() {
    let cluster = start_test_cluster(1, 8).await;
    let lines: Vec<String> = ["x", "y", "x", "x", "z"].into_iter().map(String::from).collect();
    let counts = word_count(&lines, Key::new(0, "wc"), cluster.stores[0].clone(), 8).await;
    assert_eq!(counts.get("x"), Some(&3));
    assert_eq!(counts.get("y"), Some(&1));
    assert_eq!(counts.get("z"), Some(&1));
    cluster.shutdown().await;
}
