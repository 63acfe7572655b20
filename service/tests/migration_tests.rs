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

//! End-to-end migration tests: the full `BEGIN` / `GOAHEAD` / `PEER` /
//! `PEER-OK` / `COMPLETE` exchange over real sockets, and its failure
//! branches.

mod common;

use common::{TestVm, expect_bytes, observer};
use std::sync::Arc;
use std::time::Duration;
use vspc_service::{VspcConfig, VspcHandler, VspcServer};
use vspc_telnetcodec::telnet::vmware;

struct TestHandler;
impl VspcHandler for TestHandler {}

fn test_config() -> VspcConfig {
    VspcConfig::new("127.0.0.1:0".parse().unwrap())
        .with_observer_listen_addr(Some("127.0.0.1:0".parse().unwrap()))
}

async fn start_server(config: VspcConfig) -> VspcServer {
    let server = VspcServer::new(config).await.expect("bind");
    server.start(Arc::new(TestHandler)).await.expect("start");
    server
}

/// Identifies a source VM and walks it through `BEGIN` → `GOAHEAD`,
/// returning the rendezvous token (`id || secret`) as the wire carries it.
async fn begin_migration(source: &mut TestVm, migration_id: &[u8]) -> Vec<u8> {
    source.send_subneg(vmware::VMOTION_BEGIN, migration_id).await;
    let (subopcode, token) = source.recv_subneg().await;
    assert_eq!(subopcode, vmware::VMOTION_GOAHEAD);
    assert_eq!(&token[..migration_id.len()], migration_id);
    assert_eq!(token.len(), migration_id.len() + 8);
    token
}

#[tokio::test]
async fn successful_migration_splices_the_stream() {
    let server = start_server(test_config()).await;

    let mut source = TestVm::connect(server.bind_address()).await;
    source.send_subneg(vmware::VM_VC_UUID, b"u").await;
    source.send_data(b"one ").await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut console = observer(server.observer_address().unwrap(), "uuid u").await;
    expect_bytes(&mut console, b"one ").await;

    let token = begin_migration(&mut source, &[0x01]).await;

    // A fresh connection claims the peer slot with the token
    let mut destination = TestVm::connect(server.bind_address()).await;
    destination.send_subneg(vmware::VMOTION_PEER, &token).await;
    let (subopcode, body) = destination.recv_subneg().await;
    assert_eq!(subopcode, vmware::VMOTION_PEER_OK);
    assert_eq!(body, vec![0x01]);

    // Until COMPLETE the source still carries the serial stream
    source.send_data(b"two ").await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    destination
        .send_subneg(vmware::VMOTION_COMPLETE, &[0x01])
        .await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    destination.send_data(b"three").await;

    // The handoff closed the source
    source.expect_eof().await;

    // The spliced stream arrives with no loss, duplication, or reordering
    expect_bytes(&mut console, b"two three").await;

    assert_eq!(server.manager().session_count(), 1);
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn wrong_secret_gets_no_peer_ok_and_source_stays_active() {
    let config = test_config().with_admission_timeout(Duration::from_millis(500));
    let server = start_server(config).await;

    let mut source = TestVm::connect(server.bind_address()).await;
    source.send_subneg(vmware::VM_VC_UUID, b"u").await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    let mut console = observer(server.observer_address().unwrap(), "uuid u").await;

    let mut token = begin_migration(&mut source, &[0x01]).await;
    // Corrupt the trailing secret
    let last = token.len() - 1;
    token[last] ^= 0xA5;

    let mut imposter = TestVm::connect(server.bind_address()).await;
    imposter.send_subneg(vmware::VMOTION_PEER, &token).await;

    // No PEER-OK; the connection dies at the admission deadline
    assert!(imposter.expect_no_subneg(Duration::from_millis(300)).await);
    imposter.expect_eof().await;

    // The source remains the active serial path
    source.send_data(b"still here").await;
    expect_bytes(&mut console, b"still here").await;

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn migration_refused_by_policy_answers_notnow() {
    let config = test_config().with_accept_vmotion(false);
    let server = start_server(config).await;

    let mut source = TestVm::connect(server.bind_address()).await;
    source.send_subneg(vmware::VM_VC_UUID, b"u").await;
    source.send_subneg(vmware::VMOTION_BEGIN, &[0x02]).await;

    let (subopcode, body) = source.recv_subneg().await;
    assert_eq!(subopcode, vmware::VMOTION_NOTNOW);
    assert_eq!(body, vec![0x02]);

    // Nothing was registered: a peer with a guessed token gets nothing
    let mut guesser = TestVm::connect(server.bind_address()).await;
    let token = [0x02, 0, 0, 0, 0, 0, 0, 0, 0];
    guesser.send_subneg(vmware::VMOTION_PEER, &token).await;
    assert!(guesser.expect_no_subneg(Duration::from_millis(300)).await);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn goahead_timeout_aborts_and_source_continues() {
    let config = test_config().with_t_goahead(Duration::from_millis(300));
    let server = start_server(config).await;

    let mut source = TestVm::connect(server.bind_address()).await;
    source.send_subneg(vmware::VM_VC_UUID, b"u").await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    let mut console = observer(server.observer_address().unwrap(), "uuid u").await;

    let token = begin_migration(&mut source, &[0x03]).await;

    // No destination ever shows up; the reaper aborts the rendezvous
    let (subopcode, body) = source.recv_subneg().await;
    assert_eq!(subopcode, vmware::VMOTION_ABORT);
    assert_eq!(body, vec![0x03]);

    // The stale token no longer matches anything
    let mut late = TestVm::connect(server.bind_address()).await;
    late.send_subneg(vmware::VMOTION_PEER, &token).await;
    assert!(late.expect_no_subneg(Duration::from_millis(300)).await);

    // The source continues as the active serial path
    source.send_data(b"after timeout").await;
    expect_bytes(&mut console, b"after timeout").await;

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn dropped_peer_lets_another_destination_rendezvous() {
    let server = start_server(test_config()).await;

    let mut source = TestVm::connect(server.bind_address()).await;
    source.send_subneg(vmware::VM_VC_UUID, b"u").await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let token = begin_migration(&mut source, &[0x04]).await;

    // First destination claims and then dies
    let mut first = TestVm::connect(server.bind_address()).await;
    first.send_subneg(vmware::VMOTION_PEER, &token).await;
    let (subopcode, _) = first.recv_subneg().await;
    assert_eq!(subopcode, vmware::VMOTION_PEER_OK);
    drop(first);
    tokio::time::sleep(Duration::from_millis(100)).await;

    // The rendezvous returned to the source; a second destination wins it
    let mut second = TestVm::connect(server.bind_address()).await;
    second.send_subneg(vmware::VMOTION_PEER, &token).await;
    let (subopcode, _) = second.recv_subneg().await;
    assert_eq!(subopcode, vmware::VMOTION_PEER_OK);

    second.send_subneg(vmware::VMOTION_COMPLETE, &[0x04]).await;
    source.expect_eof().await;

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn source_abort_cancels_the_rendezvous() {
    let server = start_server(test_config()).await;

    let mut source = TestVm::connect(server.bind_address()).await;
    source.send_subneg(vmware::VM_VC_UUID, b"u").await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let token = begin_migration(&mut source, &[0x05]).await;

    // Bare abort (no id in the body) is accepted
    source.send_subneg(vmware::VMOTION_ABORT, &[]).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut late = TestVm::connect(server.bind_address()).await;
    late.send_subneg(vmware::VMOTION_PEER, &token).await;
    assert!(late.expect_no_subneg(Duration::from_millis(300)).await);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn source_drop_mid_migration_still_allows_rendezvous() {
    let server = start_server(test_config()).await;

    let mut source = TestVm::connect(server.bind_address()).await;
    source.send_subneg(vmware::VM_VC_UUID, b"u").await;
    source.send_data(b"history ").await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let token = begin_migration(&mut source, &[0x06]).await;
    drop(source);
    tokio::time::sleep(Duration::from_millis(100)).await;

    // The rendezvous outlives the source connection
    let mut destination = TestVm::connect(server.bind_address()).await;
    destination.send_subneg(vmware::VMOTION_PEER, &token).await;
    let (subopcode, _) = destination.recv_subneg().await;
    assert_eq!(subopcode, vmware::VMOTION_PEER_OK);

    destination
        .send_subneg(vmware::VMOTION_COMPLETE, &[0x06])
        .await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    destination.send_data(b"resumed").await;

    let mut console = observer(server.observer_address().unwrap(), "uuid u").await;
    expect_bytes(&mut console, b"history resumed").await;

    server.shutdown().await.unwrap();
}
