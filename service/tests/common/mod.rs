//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Shared test support: a scripted hypervisor-side Telnet endpoint.

// Each test binary uses a different subset of these helpers
#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use vspc_telnetcodec::telnet;

/// A scripted VM-side endpoint speaking just enough Telnet for the tests.
pub struct TestVm {
    stream: TcpStream,
    inbox: Vec<u8>,
}

impl TestVm {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect");
        Self {
            stream,
            inbox: Vec::new(),
        }
    }

    /// Sends raw serial data, escaping IAC.
    pub async fn send_data(&mut self, data: &[u8]) {
        let mut wire = Vec::with_capacity(data.len());
        for &byte in data {
            if byte == telnet::IAC {
                wire.push(telnet::IAC);
            }
            wire.push(byte);
        }
        self.stream.write_all(&wire).await.expect("write data");
    }

    /// Sends a VMware extension subnegotiation with the given body.
    pub async fn send_subneg(&mut self, subopcode: u8, body: &[u8]) {
        let mut wire = vec![
            telnet::IAC,
            telnet::SB,
            telnet::option::VMWARE_EXT,
            subopcode,
        ];
        for &byte in body {
            if byte == telnet::IAC {
                wire.push(telnet::IAC);
            }
            wire.push(byte);
        }
        wire.extend([telnet::IAC, telnet::SE]);
        self.stream.write_all(&wire).await.expect("write subneg");
    }

    /// Waits for the next VMware extension subnegotiation from the server,
    /// skipping negotiation frames, and returns `(subopcode, body)` with
    /// payload escaping undone.
    pub async fn recv_subneg(&mut self) -> (u8, Vec<u8>) {
        timeout(Duration::from_secs(5), async {
            loop {
                if let Some(parsed) = self.extract_subneg() {
                    return parsed;
                }
                let mut chunk = [0u8; 1024];
                let n = self.stream.read(&mut chunk).await.expect("read");
                assert!(n > 0, "connection closed while waiting for subnegotiation");
                self.inbox.extend_from_slice(&chunk[..n]);
            }
        })
        .await
        .expect("timed out waiting for subnegotiation")
    }

    /// Returns `true` if no extension subnegotiation arrives within `wait`.
    pub async fn expect_no_subneg(&mut self, wait: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            if self.extract_subneg().is_some() {
                return false;
            }
            let mut chunk = [0u8; 1024];
            match timeout(Duration::from_millis(50), self.stream.read(&mut chunk)).await {
                Ok(Ok(0)) => return true,
                Ok(Ok(n)) => self.inbox.extend_from_slice(&chunk[..n]),
                Ok(Err(_)) => return true,
                Err(_) => {}
            }
            if tokio::time::Instant::now() >= deadline {
                return self.extract_subneg().is_none();
            }
        }
    }

    /// Reads until the unread stream contains `expected` as a substring of
    /// its data bytes (negotiation frames included verbatim, which the
    /// tests' expectations avoid colliding with).
    pub async fn read_until_contains(&mut self, expected: &[u8]) {
        timeout(Duration::from_secs(5), async {
            loop {
                if self
                    .inbox
                    .windows(expected.len().max(1))
                    .any(|window| window == expected)
                {
                    return;
                }
                let mut chunk = [0u8; 1024];
                let n = self.stream.read(&mut chunk).await.expect("read");
                assert!(n > 0, "connection closed while waiting for data");
                self.inbox.extend_from_slice(&chunk[..n]);
            }
        })
        .await
        .expect("timed out waiting for data");
    }

    /// Waits for the server to close this connection.
    pub async fn expect_eof(&mut self) {
        timeout(Duration::from_secs(5), async {
            loop {
                let mut chunk = [0u8; 1024];
                match self.stream.read(&mut chunk).await {
                    Ok(0) | Err(_) => return,
                    Ok(n) => self.inbox.extend_from_slice(&chunk[..n]),
                }
            }
        })
        .await
        .expect("timed out waiting for close");
    }

    /// Pops the first complete `IAC SB VMWARE-EXT ... IAC SE` frame out of
    /// the inbox, discarding everything before it.
    fn extract_subneg(&mut self) -> Option<(u8, Vec<u8>)> {
        let start = self.inbox.windows(3).position(|window| {
            window == [telnet::IAC, telnet::SB, telnet::option::VMWARE_EXT]
        })?;
        let mut payload = Vec::new();
        let mut cursor = start + 3;
        while cursor < self.inbox.len() {
            let byte = self.inbox[cursor];
            if byte == telnet::IAC {
                match self.inbox.get(cursor + 1) {
                    Some(&telnet::IAC) => {
                        payload.push(telnet::IAC);
                        cursor += 2;
                    }
                    Some(&telnet::SE) => {
                        self.inbox.drain(..cursor + 2);
                        let (&subopcode, body) =
                            payload.split_first().expect("non-empty payload");
                        return Some((subopcode, body.to_vec()));
                    }
                    Some(_) => panic!("malformed subnegotiation from server"),
                    None => return None,
                }
            } else {
                payload.push(byte);
                cursor += 1;
            }
        }
        None
    }
}

/// Connects an observer and subscribes to one VM.
pub async fn observer(addr: SocketAddr, subscribe: &str) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.expect("connect observer");
    stream
        .write_all(format!("{subscribe}\n").as_bytes())
        .await
        .expect("subscribe");
    stream
}

/// Reads from `stream` until the collected bytes equal `expected`.
pub async fn expect_bytes(stream: &mut TcpStream, expected: &[u8]) {
    let mut collected = Vec::new();
    let result = timeout(Duration::from_secs(5), async {
        while collected.len() < expected.len() {
            let mut chunk = [0u8; 1024];
            let n = stream.read(&mut chunk).await.expect("read");
            assert!(n > 0, "stream closed early");
            collected.extend_from_slice(&chunk[..n]);
        }
    })
    .await;
    assert!(
        result.is_ok(),
        "timed out: got {collected:?}, wanted {expected:?}"
    );
    assert_eq!(collected, expected);
}
