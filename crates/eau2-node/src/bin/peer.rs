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

//! Runs an eau2 peer: registers with the registry, accepts connections
//! from the rest of the cluster, and serves its `LocalMap` through a
//! `KVStore` facade.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use eau2_common::Config;
use eau2_kvstore::{KVStore, LocalMap, Peer};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "peer", about = "eau2 cluster peer")]
struct Opts {
    /// Path to the cluster's KEY=VALUE configuration file.
    #[arg(long, env = "EAU2_CONFIG")]
    config: PathBuf,

    /// Expected position in the cluster directory. A sanity check for
    /// operators launching a fixed-size cluster from a script — the peer's
    /// real index always comes from the registry's broadcast directory,
    /// never from this flag.
    #[arg(long)]
    node_index: Option<usize>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let opts = Opts::parse();
    let config = Config::from_file(&opts.config).expect("fatal: failed to load config");

    let local = Arc::new(LocalMap::new());
    let (peer, handle) = Peer::start(config, local.clone()).await.expect("fatal: peer failed to bind its listening socket");
    peer.register().await.expect("fatal: peer failed to register with the registry");

    let node_index = peer.node_index().await;
    if let Some(expected) = opts.node_index {
        assert_eq!(
            expected, node_index,
            "fatal: --node-index {expected} does not match this peer's resolved directory position {node_index}"
        );
    }
    info!(node_index, "peer ready");

    let _store = KVStore::new(node_index, local, peer);
    handle.await.expect("fatal: peer task panicked");
}
