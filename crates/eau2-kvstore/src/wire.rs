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

//! The length-prefixed wire protocol every registry/peer connection speaks.
//!
//! Every message starts with a fixed [`Header`]: a [`Kind`], a payload size,
//! and the sender's own address. Framing is a four-step handshake (see the
//! design's wire protocol section): the initiator sends a header, the peer
//! replies `Ready` (or `Ack` immediately for a zero-payload message), the
//! initiator streams the payload in `MAX_PACKET_LENGTH`-sized fragments,
//! and the peer closes with either `Ack` or a `Response` header that
//! recurses through the same Ready/Ack continuation in the other direction.
//!
//! A short read, a failed write, or a header naming an unexpected `Kind` at
//! any step is fatal to the connection — this system assumes a static,
//! homogeneous cluster and does not retry transport failures.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use eau2_common::bytes::{BufMutExt, Reader};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// The kind tag on every message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Register,
    Deregister,
    Directory,
    Message,
    Shutdown,
    Ready,
    Ack,
    Get,
    GetAndWait,
    Put,
    Response,
}

impl Kind {
    fn to_u8(self) -> u8 {
        match self {
            Kind::Register => 0,
            Kind::Deregister => 1,
            Kind::Directory => 2,
            Kind::Message => 3,
            Kind::Shutdown => 4,
            Kind::Ready => 5,
            Kind::Ack => 6,
            Kind::Get => 7,
            Kind::GetAndWait => 8,
            Kind::Put => 9,
            Kind::Response => 10,
        }
    }

    fn from_u8(tag: u8) -> Self {
        match tag {
            0 => Kind::Register,
            1 => Kind::Deregister,
            2 => Kind::Directory,
            3 => Kind::Message,
            4 => Kind::Shutdown,
            5 => Kind::Ready,
            6 => Kind::Ack,
            7 => Kind::Get,
            8 => Kind::GetAndWait,
            9 => Kind::Put,
            10 => Kind::Response,
            other => panic!("fatal: unknown message kind tag {other}"),
        }
    }
}

/// `kind | payload_size | sender`.
#[derive(Debug, Clone, Copy)]
pub struct Header {
    pub kind: Kind,
    pub payload_size: usize,
    pub sender: SocketAddr,
}

fn encode_addr(buf: &mut Vec<u8>, addr: SocketAddr) {
    match addr.ip() {
        IpAddr::V4(v4) => {
            buf.put_u8_byte(4);
            buf.extend_from_slice(&v4.octets());
        }
        IpAddr::V6(v6) => {
            buf.put_u8_byte(6);
            buf.extend_from_slice(&v6.octets());
        }
    }
    buf.put_u16(addr.port());
}

fn decode_addr(r: &mut Reader<'_>) -> SocketAddr {
    let tag = r.read_u8();
    let ip = match tag {
        4 => {
            let octets: [u8; 4] = r.read_bytes(4).try_into().unwrap();
            IpAddr::V4(Ipv4Addr::from(octets))
        }
        6 => {
            let octets: [u8; 16] = r.read_bytes(16).try_into().unwrap();
            IpAddr::V6(Ipv6Addr::from(octets))
        }
        other => panic!("fatal: unknown address family tag {other}"),
    };
    let port = r.read_u16();
    SocketAddr::new(ip, port)
}

fn encode_header(header: &Header) -> Vec<u8> {
    let mut buf = Vec::with_capacity(32);
    buf.put_u8_byte(header.kind.to_u8());
    buf.put_usize(header.payload_size);
    encode_addr(&mut buf, header.sender);
    buf
}

fn decode_header(bytes: &[u8]) -> Header {
    let mut r = Reader::new(bytes);
    let kind = Kind::from_u8(r.read_u8());
    let payload_size = r.read_usize();
    let sender = decode_addr(&mut r);
    Header {
        kind,
        payload_size,
        sender,
    }
}

/// Encodes `[endpoint; num_clients]` for the `Directory` payload.
pub fn encode_directory(peers: &[SocketAddr]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.put_usize(peers.len());
    for peer in peers {
        encode_addr(&mut buf, *peer);
    }
    buf
}

pub fn decode_directory(bytes: &[u8]) -> Vec<SocketAddr> {
    let mut r = Reader::new(bytes);
    let n = r.read_usize();
    (0..n).map(|_| decode_addr(&mut r)).collect()
}

/// Encodes a lone endpoint, the `Register`/`Deregister` payload.
pub fn encode_endpoint(addr: SocketAddr) -> Vec<u8> {
    let mut buf = Vec::new();
    encode_addr(&mut buf, addr);
    buf
}

pub fn decode_endpoint(bytes: &[u8]) -> SocketAddr {
    let mut r = Reader::new(bytes);
    decode_addr(&mut r)
}

async fn write_header(stream: &mut TcpStream, header: Header) -> std::io::Result<()> {
    let buf = encode_header(&header);
    stream.write_all(&buf).await
}

async fn read_header(stream: &mut TcpStream) -> std::io::Result<Header> {
    // The header's on-wire size is fixed by construction: 1 + 8 + (1 + 4 or 16) + 2.
    // We over-allocate for the larger (v6) address and trim after reading the
    // address-family tag, since the header carries no outer length prefix.
    let mut kind_and_size = [0u8; 9];
    stream.read_exact(&mut kind_and_size).await?;
    let mut tag = [0u8; 1];
    stream.read_exact(&mut tag).await?;
    let addr_len = match tag[0] {
        4 => 4,
        6 => 16,
        other => panic!("fatal: unknown address family tag {other}"),
    };
    let mut rest = vec![0u8; addr_len + 2];
    stream.read_exact(&mut rest).await?;

    let mut full = Vec::with_capacity(9 + 1 + rest.len());
    full.extend_from_slice(&kind_and_size);
    full.push(tag[0]);
    full.extend_from_slice(&rest);
    Ok(decode_header(&full))
}

/// Sends `payload` tagged with `kind` to `stream`, running the
/// initiator side of the handshake: header, then (if non-empty) wait for
/// `Ready` and stream the payload in `max_packet`-sized fragments.
pub async fn send_message(
    stream: &mut TcpStream,
    kind: Kind,
    sender: SocketAddr,
    payload: &[u8],
    max_packet: usize,
) -> std::io::Result<()> {
    write_header(
        stream,
        Header {
            kind,
            payload_size: payload.len(),
            sender,
        },
    )
    .await?;
    if payload.is_empty() {
        return Ok(());
    }
    let reply = read_header(stream).await?;
    assert_eq!(
        reply.kind,
        Kind::Ready,
        "fatal: peer did not ack a zero-payload message with Ready"
    );
    for chunk in payload.chunks(max_packet.max(1)) {
        stream.write_all(chunk).await?;
    }
    Ok(())
}

/// Receives one message, running the responder side of the handshake:
/// read the header, reply `Ack` immediately if it carries no payload,
/// otherwise reply `Ready` and read the payload in full.
pub async fn recv_message(stream: &mut TcpStream, my_addr: SocketAddr) -> std::io::Result<(Kind, Vec<u8>)> {
    let header = read_header(stream).await?;
    if header.payload_size == 0 {
        write_header(
            stream,
            Header {
                kind: Kind::Ack,
                payload_size: 0,
                sender: my_addr,
            },
        )
        .await?;
        return Ok((header.kind, Vec::new()));
    }
    write_header(
        stream,
        Header {
            kind: Kind::Ready,
            payload_size: 0,
            sender: my_addr,
        },
    )
    .await?;
    let mut buf = vec![0u8; header.payload_size];
    stream.read_exact(&mut buf).await?;
    Ok((header.kind, buf))
}

/// Closes out a request this process initiated: reads the peer's `Ack` or
/// `Response`. On `Response`, receives the response payload through the
/// same Ready/Ack continuation and finally sends the closing `Ack`.
pub async fn recv_reply(
    stream: &mut TcpStream,
    my_addr: SocketAddr,
) -> std::io::Result<Option<Vec<u8>>> {
    let reply = read_header(stream).await?;
    match reply.kind {
        Kind::Ack => Ok(None),
        Kind::Response => {
            let payload = if reply.payload_size == 0 {
                Vec::new()
            } else {
                write_header(
                    stream,
                    Header {
                        kind: Kind::Ready,
                        payload_size: 0,
                        sender: my_addr,
                    },
                )
                .await?;
                let mut buf = vec![0u8; reply.payload_size];
                stream.read_exact(&mut buf).await?;
                buf
            };
            write_header(
                stream,
                Header {
                    kind: Kind::Ack,
                    payload_size: 0,
                    sender: my_addr,
                },
            )
            .await?;
            Ok(Some(payload))
        }
        other => panic!("fatal: expected Ack or Response, got {other:?}"),
    }
}

/// Sends a `Response` carrying `payload` back to the request's initiator,
/// as the tail of [`recv_message`]'s handshake continuation.
pub async fn send_response(
    stream: &mut TcpStream,
    my_addr: SocketAddr,
    payload: &[u8],
    max_packet: usize,
) -> std::io::Result<()> {
    write_header(
        stream,
        Header {
            kind: Kind::Response,
            payload_size: payload.len(),
            sender: my_addr,
        },
    )
    .await?;
    if !payload.is_empty() {
        let ready = read_header(stream).await?;
        assert_eq!(ready.kind, Kind::Ready, "fatal: initiator skipped Ready");
        for chunk in payload.chunks(max_packet.max(1)) {
            stream.write_all(chunk).await?;
        }
    }
    let ack = read_header(stream).await?;
    assert_eq!(ack.kind, Kind::Ack, "fatal: initiator did not close with Ack");
    Ok(())
}

/// Sends a bare `Ack`, closing out a request with no response payload.
pub async fn send_ack(stream: &mut TcpStream, my_addr: SocketAddr) -> std::io::Result<()> {
    write_header(
        stream,
        Header {
            kind: Kind::Ack,
            payload_size: 0,
            sender: my_addr,
        },
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_round_trips() {
        let peers: Vec<SocketAddr> = vec![
            "127.0.0.1:9000".parse().unwrap(),
            "127.0.0.1:9001".parse().unwrap(),
            "[::1]:9002".parse().unwrap(),
        ];
        let encoded = encode_directory(&peers);
        assert_eq!(decode_directory(&encoded), peers);
    }

    #[test]
    fn header_round_trips_v4_and_v6() {
        for addr in ["127.0.0.1:9000", "[::1]:9000"] {
            let addr: SocketAddr = addr.parse().unwrap();
            let header = Header {
                kind: Kind::Get,
                payload_size: 42,
                sender: addr,
            };
            let encoded = encode_header(&header);
            let decoded = decode_header(&encoded);
            assert_eq!(decoded.kind, Kind::Get);
            assert_eq!(decoded.payload_size, 42);
            assert_eq!(decoded.sender, addr);
        }
    }

    #[tokio::test]
    async fn handshake_delivers_a_response_payload() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let (kind, payload) = recv_message(&mut stream, addr).await.unwrap();
            assert_eq!(kind, Kind::Get);
            assert_eq!(payload, b"key-name");
            send_response(&mut stream, addr, b"the-value", 4).await.unwrap();
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        let my_addr = client.local_addr().unwrap();
        send_message(&mut client, Kind::Get, my_addr, b"key-name", 4)
            .await
            .unwrap();
        let reply = recv_reply(&mut client, my_addr).await.unwrap();
        assert_eq!(reply, Some(b"the-value".to_vec()));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn zero_payload_message_closes_with_ack() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let (kind, payload) = recv_message(&mut stream, addr).await.unwrap();
            assert_eq!(kind, Kind::Shutdown);
            assert!(payload.is_empty());
            send_ack(&mut stream, addr).await.unwrap();
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        let my_addr = client.local_addr().unwrap();
        send_message(&mut client, Kind::Shutdown, my_addr, &[], 4)
            .await
            .unwrap();
        let reply = recv_reply(&mut client, my_addr).await.unwrap();
        assert_eq!(reply, None);
        server.await.unwrap();
    }
}
