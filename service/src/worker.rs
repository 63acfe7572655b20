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

//! Connection worker
//!
//! The [`ConnectionWorker`] owns one VM connection's read half and codec.
//! It drives the opening negotiation, decodes the inbound stream in
//! batches, coalesces serial data, routes VMware extension control events
//! to the session manager, and tears the connection down on EOF, protocol
//! error, or admission timeout.
//!
//! Until the VM identifies itself (`VC-UUID`, or a successful
//! `VMOTION-PEER` claim) the connection is unbound: serial data goes to a
//! capped admission buffer and an admission deadline is armed. A rejected
//! peer claim never binds, so the same deadline disposes of it.

use crate::connection::VmConnection;
use crate::handler::VspcHandler;
use crate::manager::SessionManager;
use crate::session::Session;
use crate::types::ConnectionId;
use crate::Result;
use bytes::{Buf, BufMut, BytesMut};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tracing::{debug, info, trace, warn};
use vspc_telnetcodec::{
    TelnetArgument, TelnetCodec, TelnetEvent, TelnetOption, TelnetSide, VmwareArgument, telnet,
};
use tokio_util::codec::Decoder;

/// Worker that manages a single VM connection's lifecycle.
pub struct ConnectionWorker {
    id: ConnectionId,
    connection: VmConnection,
    reader: OwnedReadHalf,
    codec: TelnetCodec,
    manager: Arc<SessionManager>,
    handler: Arc<dyn VspcHandler>,
    session: Option<Arc<Session>>,
    admission: BytesMut,
    pending_data: BytesMut,
}

impl ConnectionWorker {
    /// Wraps an accepted socket: splits it, spawns the writer task, and
    /// prepares the worker. Call [`run`](Self::run) to drive it.
    pub fn new(
        id: ConnectionId,
        stream: TcpStream,
        manager: Arc<SessionManager>,
        handler: Arc<dyn VspcHandler>,
    ) -> Result<Self> {
        let peer_addr = stream.peer_addr()?;
        let (reader, writer) = stream.into_split();
        let connection = VmConnection::spawn(id, peer_addr, writer);
        Ok(Self {
            id,
            connection,
            reader,
            codec: TelnetCodec::new(),
            manager,
            handler,
            session: None,
            admission: BytesMut::new(),
            pending_data: BytesMut::new(),
        })
    }

    /// The write-side handle of this connection.
    pub fn connection(&self) -> &VmConnection {
        &self.connection
    }

    /// Runs the worker until the connection ends.
    pub async fn run(mut self) {
        if let Err(error) = self.start_negotiation().await {
            debug!(connection_id = %self.id, %error, "opening negotiation failed");
        }
        self.handler
            .on_connect(self.id, self.connection.peer_addr())
            .await;

        let admission_deadline =
            tokio::time::Instant::now() + self.manager.config().admission_timeout;
        let mut buffer = BytesMut::with_capacity(8192);
        loop {
            tokio::select! {
                read = self.reader.read_buf(&mut buffer) => {
                    match read {
                        Ok(0) => {
                            debug!(connection_id = %self.id, "peer closed the connection");
                            break;
                        }
                        Ok(_) => match self.process(&mut buffer).await {
                            Ok(true) => {}
                            Ok(false) => break,
                            Err(error) => {
                                warn!(connection_id = %self.id, %error, "closing on protocol error");
                                break;
                            }
                        },
                        Err(error) => {
                            debug!(connection_id = %self.id, %error, "transport error");
                            break;
                        }
                    }
                }
                () = tokio::time::sleep_until(admission_deadline), if self.session.is_none() => {
                    warn!(
                        connection_id = %self.id,
                        "connection never identified itself, dropping"
                    );
                    break;
                }
            }
        }

        self.cleanup().await;
    }

    /// Sends the opening negotiation burst, armed through the Q-method so
    /// the later acks are absorbed silently.
    async fn start_negotiation(&mut self) -> Result<()> {
        let frames: Vec<_> = [
            self.codec.enable_local(TelnetOption::Echo),
            self.codec.enable_local(TelnetOption::SuppressGoAhead),
            self.codec.enable_local(TelnetOption::TransmitBinary),
            self.codec.enable_remote(TelnetOption::TransmitBinary),
            self.codec.enable_remote(TelnetOption::VmwareExt),
        ]
        .into_iter()
        .flatten()
        .collect();
        self.connection.send_frames(frames).await
    }

    /// Decodes everything currently buffered, then flushes coalesced data
    /// and queued negotiation replies. Returns `false` when the connection
    /// must close.
    async fn process(&mut self, buffer: &mut BytesMut) -> Result<bool> {
        loop {
            match self.codec.decode(buffer) {
                Ok(Some(event)) => {
                    if !self.handle_event(event).await? {
                        self.flush_data().await;
                        self.flush_responses().await;
                        return Ok(false);
                    }
                }
                Ok(None) => break,
                Err(error) => {
                    // Framing is gone; deliver what decoded cleanly, then die
                    self.flush_data().await;
                    return Err(error.into());
                }
            }
        }
        self.flush_data().await;
        self.flush_responses().await;
        Ok(true)
    }

    /// Routes one decoded event. Serial data is coalesced; control events
    /// flush it first so ordering across the splice point is exact.
    async fn handle_event(&mut self, event: TelnetEvent) -> Result<bool> {
        match event {
            TelnetEvent::Data(byte) => {
                self.pending_data.put_u8(byte);
                Ok(true)
            }
            TelnetEvent::Subnegotiate(argument) => {
                self.flush_data().await;
                match argument {
                    TelnetArgument::Vmware(argument) => self.handle_vmware(argument).await,
                    TelnetArgument::Unknown(option, payload) => {
                        trace!(
                            connection_id = %self.id,
                            %option,
                            len = payload.len(),
                            "passing over subnegotiation for non-extension option"
                        );
                        Ok(true)
                    }
                }
            }
            TelnetEvent::OptionStatus(option, side, enabled) => {
                debug!(connection_id = %self.id, %option, %side, enabled, "option negotiated");
                // The extension handshake opens with our suboption list
                if option == TelnetOption::VmwareExt && side == TelnetSide::Remote && enabled {
                    self.connection
                        .send_subnegotiation(VmwareArgument::KnownSuboptions1(BytesMut::from(
                            telnet::vmware::KNOWN,
                        )))
                        .await?;
                }
                Ok(true)
            }
            event => {
                trace!(connection_id = %self.id, ?event, "ignoring control event");
                Ok(true)
            }
        }
    }

    /// Routes one VMware extension event. Returns `false` to close the
    /// connection.
    async fn handle_vmware(&mut self, argument: VmwareArgument) -> Result<bool> {
        match argument {
            VmwareArgument::KnownSuboptions1(_) => {
                self.connection
                    .send_subnegotiation(VmwareArgument::KnownSuboptions2(BytesMut::from(
                        telnet::vmware::KNOWN,
                    )))
                    .await?;
            }
            VmwareArgument::KnownSuboptions2(_) => {
                trace!(connection_id = %self.id, "peer acknowledged suboptions");
            }
            VmwareArgument::UnknownSuboptionRcvd1(subopcode)
            | VmwareArgument::UnknownSuboptionRcvd2(subopcode) => {
                warn!(connection_id = %self.id, subopcode, "peer did not understand a suboption");
            }
            VmwareArgument::VcUuid(vm_uuid) => return self.handle_vc_uuid(vm_uuid).await,
            VmwareArgument::VmName(vm_name) => match self.session {
                Some(ref session) => self.manager.set_vm_name(session, vm_name).await,
                None => warn!(connection_id = %self.id, "VM name before VC-UUID ignored"),
            },
            VmwareArgument::VmBiosUuid(uuid) => {
                if let Some(ref session) = self.session {
                    session.set_vm_bios_uuid(uuid).await;
                }
            }
            VmwareArgument::VmLocationUuid(uuid) => {
                if let Some(ref session) = self.session {
                    session.set_vm_location_uuid(uuid).await;
                }
            }
            VmwareArgument::GetVcUuid | VmwareArgument::GetVmName => {
                debug!(connection_id = %self.id, "metadata query from peer ignored");
            }
            VmwareArgument::DoProxy { direction, uri } => {
                info!(
                    connection_id = %self.id,
                    direction = %(direction as char),
                    %uri,
                    "accepting proxy request"
                );
                self.connection
                    .send_subnegotiation(VmwareArgument::WillProxy)
                    .await?;
            }
            VmwareArgument::WillProxy | VmwareArgument::WontProxy => {
                debug!(connection_id = %self.id, "proxy acknowledgement");
            }
            VmwareArgument::VMotionBegin(id) => return self.handle_vmotion_begin(id).await,
            VmwareArgument::VMotionPeer { id, secret } => {
                return self.handle_vmotion_peer(id, secret).await;
            }
            VmwareArgument::VMotionComplete(id) => {
                let Some(session) = self.session.clone() else {
                    warn!(connection_id = %self.id, "migration complete from unbound connection");
                    return Ok(true);
                };
                trace!(connection_id = %self.id, ?id, "migration complete received");
                if self.manager.complete_migration(&session, self.id).await {
                    self.handler.on_migration_complete(session.vm_uuid()).await;
                }
            }
            VmwareArgument::VMotionAbort(form) => {
                debug!(
                    connection_id = %self.id,
                    carried_id = form.is_some(),
                    "migration abort received"
                );
                if let Some(session) = self.session.clone() {
                    if self.manager.abort_migration(&session).await {
                        self.handler.on_migration_abort(session.vm_uuid()).await;
                    }
                }
            }
            VmwareArgument::VMotionGoahead { .. }
            | VmwareArgument::VMotionNotNow(_)
            | VmwareArgument::VMotionPeerOk(_) => {
                warn!(connection_id = %self.id, "server-side subopcode received from peer");
            }
            VmwareArgument::Unknown(subopcode, _) => {
                warn!(connection_id = %self.id, subopcode, "unknown extension subopcode");
                self.connection
                    .send_subnegotiation(VmwareArgument::UnknownSuboptionRcvd2(subopcode))
                    .await?;
            }
        }
        Ok(true)
    }

    /// `VC-UUID` binds the connection to its session; a changed identity
    /// mid-session closes the connection.
    async fn handle_vc_uuid(&mut self, vm_uuid: String) -> Result<bool> {
        if let Some(ref session) = self.session {
            if session.vm_uuid() == vm_uuid {
                return Ok(true);
            }
            warn!(
                connection_id = %self.id,
                bound = %session.vm_uuid(),
                claimed = %vm_uuid,
                "identity changed mid-session, closing"
            );
            return Ok(false);
        }
        let buffered = if self.admission.is_empty() {
            None
        } else {
            Some(self.admission.split().freeze())
        };
        let session = self
            .manager
            .bind_connection(&vm_uuid, self.connection.clone(), buffered)
            .await;
        info!(connection_id = %self.id, %vm_uuid, "connection bound to session");
        self.handler.on_session_bound(self.id, &vm_uuid).await;
        self.session = Some(session);
        Ok(true)
    }

    /// Source side of a migration: answer `GOAHEAD` or `NOTNOW`.
    async fn handle_vmotion_begin(&mut self, id: BytesMut) -> Result<bool> {
        let id = id.freeze();
        let accepted = match self.session {
            Some(ref session) if self.manager.config().accept_vmotion => self
                .manager
                .begin_migration(session, self.id, id.clone())
                .await,
            Some(_) => {
                info!(connection_id = %self.id, "migration refused by policy");
                None
            }
            None => {
                warn!(connection_id = %self.id, "migration request before VC-UUID refused");
                None
            }
        };
        match accepted {
            Some(secret) => {
                self.connection
                    .send_subnegotiation(VmwareArgument::VMotionGoahead {
                        id: BytesMut::from(&id[..]),
                        secret,
                    })
                    .await?;
                if let Some(ref session) = self.session {
                    self.handler.on_migration_begin(session.vm_uuid()).await;
                }
            }
            None => {
                self.connection
                    .send_subnegotiation(VmwareArgument::VMotionNotNow(BytesMut::from(&id[..])))
                    .await?;
            }
        }
        Ok(true)
    }

    /// Destination side of a migration: a matching `(id, secret)` attaches
    /// this connection as the pending peer and earns `PEER-OK`; anything
    /// else earns silence and the admission deadline.
    async fn handle_vmotion_peer(&mut self, id: BytesMut, secret: u64) -> Result<bool> {
        if self.session.is_some() {
            warn!(connection_id = %self.id, "peer claim on an identified connection ignored");
            return Ok(true);
        }
        let id = id.freeze();
        match self
            .manager
            .claim_peer(&id, secret, self.connection.clone())
            .await
        {
            Some(session) => {
                info!(
                    connection_id = %self.id,
                    vm_uuid = %session.vm_uuid(),
                    "migration peer accepted"
                );
                self.connection
                    .send_subnegotiation(VmwareArgument::VMotionPeerOk(BytesMut::from(&id[..])))
                    .await?;
                self.session = Some(session);
            }
            None => {
                warn!(connection_id = %self.id, "migration peer rejected");
            }
        }
        Ok(true)
    }

    /// Delivers coalesced serial data: to the session once bound, to the
    /// capped admission buffer before that.
    async fn flush_data(&mut self) {
        if self.pending_data.is_empty() {
            return;
        }
        let data = self.pending_data.split().freeze();
        self.connection.add_bytes_received(data.len() as u64);
        match self.session {
            Some(ref session) => session.deliver(self.id, data).await,
            None => {
                self.admission.extend_from_slice(&data);
                let cap = self.manager.config().admission_buffer_bytes;
                if self.admission.len() > cap {
                    let excess = self.admission.len() - cap;
                    self.admission.advance(excess);
                }
            }
        }
    }

    /// Transmits negotiation replies queued by the decoder.
    async fn flush_responses(&mut self) {
        if self.codec.has_pending_responses() {
            let responses = self.codec.take_pending_responses();
            if let Err(error) = self.connection.send_frames(responses).await {
                debug!(connection_id = %self.id, %error, "failed to flush negotiation replies");
            }
        }
    }

    async fn cleanup(self) {
        self.handler.on_disconnect(self.id).await;
        if let Some(ref session) = self.session {
            self.manager.connection_closed(session, self.id).await;
        }
        self.connection.shutdown().await;
    }
}

impl std::fmt::Debug for ConnectionWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionWorker")
            .field("id", &self.id)
            .field("bound", &self.session.is_some())
            .finish()
    }
}
