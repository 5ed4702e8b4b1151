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

//! Runs the eau2 registry: the single cluster-wide process that tracks
//! peer membership and broadcasts the directory once quorum is reached.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use eau2_common::Config;
use eau2_kvstore::Registry;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "registry", about = "eau2 cluster registry")]
struct Opts {
    /// Path to the cluster's KEY=VALUE configuration file.
    #[arg(long, env = "EAU2_CONFIG")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let opts = Opts::parse();
    let config = Config::from_file(&opts.config).expect("fatal: failed to load config");

    let registry = Arc::new(Registry::new(config));
    let (handle, _shutdown_tx) = registry.serve().await.expect("fatal: registry failed to bind its listening socket");
    handle.await.expect("fatal: registry task panicked");
}
