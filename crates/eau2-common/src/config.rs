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

//! Cluster configuration.
//!
//! Every node in the cluster (the registry and every peer) is started from
//! the same `key=value` text file, so that `CLIENT_NUM` and friends agree
//! cluster-wide. Unlike the rest of the fabric there is no discovery for
//! this: it is handed to every process out of band (on disk, or via env in
//! a test harness), the same way a fixed peer set is handed out in the
//! design this system implements.

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Eau2Error, Eau2Result};

/// Default number of elements in a fixed-width column chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Default TCP payload chunking bound used by the wire protocol.
pub const DEFAULT_MAX_PACKET_LENGTH: usize = 64 * 1024;

/// Cluster-wide configuration, read once at process startup and then shared
/// by reference (never mutated) across every component of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Peer count; the registry broadcasts the directory once this many
    /// peers have registered.
    pub client_num: usize,
    /// IP address a peer binds its listening socket to.
    pub client_ip: IpAddr,
    /// IP address of the registry.
    pub server_ip: IpAddr,
    /// Elements per fixed-width chunk.
    pub chunk_size: usize,
    /// Seconds the registry stays up before tearing the cluster down.
    /// `None` means "run until killed".
    pub server_up_time: Option<u64>,
    /// Port the registry listens on.
    pub server_listen_port: u16,
    /// Largest payload fragment sent in one `send` call.
    pub max_packet_length: usize,
}

impl Config {
    /// Parses a `KEY=VALUE` text file, one assignment per line. Blank lines
    /// and lines starting with `#` are ignored.
    pub fn from_file(path: impl AsRef<Path>) -> Eau2Result<Self> {
        let path: PathBuf = path.as_ref().to_path_buf();
        let text = std::fs::read_to_string(&path).map_err(|source| Eau2Error::ConfigIo {
            path: path.clone(),
            source,
        })?;
        Self::from_str(&text, &path)
    }

    fn from_str(text: &str, path: &Path) -> Eau2Result<Self> {
        let mut fields = HashMap::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                fields.insert(key.trim().to_ascii_uppercase(), value.trim().to_string());
            }
        }

        let get = |key: &'static str| -> Eau2Result<&String> {
            fields
                .get(key)
                .ok_or_else(|| Eau2Error::ConfigMissingKey {
                    path: path.to_path_buf(),
                    key,
                })
        };
        let parse = |key: &'static str, value: &str| -> Eau2Result<u64> {
            value.parse::<u64>().map_err(|_| Eau2Error::ConfigInvalidValue {
                path: path.to_path_buf(),
                key,
                value: value.to_string(),
            })
        };

        let client_num = parse("CLIENT_NUM", get("CLIENT_NUM")?)? as usize;
        let client_ip = get("CLIENT_IP")?
            .parse::<IpAddr>()
            .map_err(|_| Eau2Error::ConfigInvalidValue {
                path: path.to_path_buf(),
                key: "CLIENT_IP",
                value: fields["CLIENT_IP"].clone(),
            })?;
        let server_ip = get("SERVER_IP")?
            .parse::<IpAddr>()
            .map_err(|_| Eau2Error::ConfigInvalidValue {
                path: path.to_path_buf(),
                key: "SERVER_IP",
                value: fields["SERVER_IP"].clone(),
            })?;
        let chunk_size = match fields.get("CHUNK_SIZE") {
            Some(v) => parse("CHUNK_SIZE", v)? as usize,
            None => DEFAULT_CHUNK_SIZE,
        };
        let server_up_time = match fields.get("SERVER_UP_TIME") {
            Some(v) => Some(parse("SERVER_UP_TIME", v)?),
            None => None,
        };
        let server_listen_port = parse("SERVER_LISTEN_PORT", get("SERVER_LISTEN_PORT")?)? as u16;
        let max_packet_length = match fields.get("MAX_PACKET_LENGTH") {
            Some(v) => parse("MAX_PACKET_LENGTH", v)? as usize,
            None => DEFAULT_MAX_PACKET_LENGTH,
        };

        debug!(path = %path.display(), client_num, chunk_size, server_listen_port, "parsed cluster config");
        Ok(Config {
            client_num,
            client_ip,
            server_ip,
            chunk_size,
            server_up_time,
            server_listen_port,
            max_packet_length,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_minimal_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(
            &mut file,
            b"CLIENT_NUM=3\nCLIENT_IP=127.0.0.1\nSERVER_IP=127.0.0.1\nSERVER_LISTEN_PORT=9000\n",
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.client_num, 3);
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(config.server_listen_port, 9000);
        assert_eq!(config.server_up_time, None);
    }

    #[test]
    fn rejects_missing_keys() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"CLIENT_NUM=3\n").unwrap();

        let err = Config::from_file(file.path()).unwrap_err();
        assert!(matches!(err, Eau2Error::ConfigMissingKey { .. }));
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(
            &mut file,
            b"# cluster config\n\nCLIENT_NUM=2\nCLIENT_IP=127.0.0.1\nSERVER_IP=127.0.0.1\nSERVER_LISTEN_PORT=9001\nCHUNK_SIZE=16\n",
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.client_num, 2);
        assert_eq!(config.chunk_size, 16);
    }
}
