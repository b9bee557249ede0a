//! Server side of the wire protocol: accepts TCP sessions and posts
//! decoded envelopes into local mailboxes.

use crate::error::{RemoteError, WireError, PACKET_FAULT_INVALID_FORMAT};
use crate::remote::codec::WireEnvelope;
use crate::remote::tcp::{read_preamble, read_record_id, read_sized_payload};
use crate::runtime::Runtime;
use crate::wire;
use myna_api::id::AgentId;
use std::fmt;
use std::net::SocketAddr;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Handle of a running listener. Aborting it stops accepting sessions;
/// sessions already open run until their sockets close.
pub struct ServerHandle {
    addr: SocketAddr,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// The actual bound address (useful with port 0).
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn shutdown(&self) {
        self.task.abort();
    }
}

impl fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerHandle").field("addr", &self.addr).finish()
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub(crate) async fn listen(runtime: Runtime, addr: SocketAddr) -> Result<ServerHandle, RemoteError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| RemoteError::Io(e.to_string()))?;
    let local = listener
        .local_addr()
        .map_err(|e| RemoteError::Io(e.to_string()))?;
    tracing::info!(addr = %local, "wire listener started");

    let task = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    tokio::spawn(session(runtime.clone(), stream, peer));
                }
                Err(err) => tracing::warn!(%err, "accept failed"),
            }
        }
    });

    Ok(ServerHandle { addr: local, task })
}

/// One inbound session: preamble first, then envelopes decoded strictly
/// record by record. Malformed input emits a packet-fault record and
/// tears the connection down.
async fn session(runtime: Runtime, stream: TcpStream, peer: SocketAddr) {
    let _ = stream.set_nodelay(true);
    let (mut reader, mut writer) = stream.into_split();

    match read_preamble(&mut reader).await {
        Ok(preamble) => {
            tracing::debug!(%peer, via = %preamble.via, version = format_args!("{}.{}", preamble.major, preamble.minor), "session opened");
        }
        Err(err) => {
            tear_down(&mut writer, peer, &err).await;
            return;
        }
    }

    loop {
        let id = match read_record_id(&mut reader).await {
            Ok(id) => id,
            // Peer hung up between records.
            Err(_) => return,
        };
        match id {
            wire::RECORD_SIZED_ENVELOPE => {
                let payload = match read_sized_payload(&mut reader).await {
                    Ok(payload) => payload,
                    Err(err) => {
                        tear_down(&mut writer, peer, &err).await;
                        return;
                    }
                };
                match respond(&runtime, &payload).await {
                    Ok(response) => {
                        if writer.write_all(&response).await.is_err() {
                            return;
                        }
                    }
                    Err(err) => {
                        tear_down(&mut writer, peer, &err).await;
                        return;
                    }
                }
            }
            wire::RECORD_END => {
                tracing::debug!(%peer, "session closed by peer");
                return;
            }
            other => {
                let err = RemoteError::Wire(WireError::InvalidFormat(format!(
                    "unknown record id {other:#04x}"
                )));
                tear_down(&mut writer, peer, &err).await;
                return;
            }
        }
    }
}

async fn tear_down(writer: &mut OwnedWriteHalf, peer: SocketAddr, err: &RemoteError) {
    let code = match err {
        RemoteError::Wire(wire_err) => wire_err.fault_code(),
        _ => PACKET_FAULT_INVALID_FORMAT,
    };
    let _ = writer.write_all(&wire::encode_fault(code)).await;
    tracing::warn!(%peer, %err, "session torn down");
}

/// Processes one deliver envelope. `Ok` carries the response bytes (an
/// ack record, or a refusal envelope for per-message failures); `Err`
/// means a protocol violation that must kill the session.
async fn respond(runtime: &Runtime, payload: &[u8]) -> Result<Vec<u8>, RemoteError> {
    let envelope = serde_json::from_slice::<WireEnvelope>(payload).map_err(|_| {
        RemoteError::Wire(WireError::InvalidFormat("undecodable envelope payload".to_string()))
    })?;
    match envelope {
        WireEnvelope::Refused { .. } => Err(RemoteError::Wire(WireError::InvalidFormat(
            "refusal envelope from the sending side".to_string(),
        ))),
        WireEnvelope::Deliver { op, to, tag, body } => {
            match deliver(runtime, &to, &tag, &body).await {
                Ok(()) => Ok(wire::encode_ack().to_vec()),
                Err(reason) => {
                    tracing::debug!(%to, %tag, %reason, "delivery refused");
                    let refusal = WireEnvelope::Refused { op, reason };
                    let payload = serde_json::to_vec(&refusal)
                        .map_err(|e| RemoteError::Codec(e.to_string()))?;
                    Ok(wire::frame(None, &payload)?)
                }
            }
        }
    }
}

async fn deliver(runtime: &Runtime, to: &str, tag: &str, body: &str) -> Result<(), String> {
    let id: AgentId = to.parse().map_err(|_| format!("invalid agent id '{to}'"))?;
    let (tag, boxed) = runtime
        .wire_registry()
        .decode(tag, body)
        .map_err(|e| e.to_string())?;
    let agent = runtime
        .agent(&id)
        .ok_or_else(|| format!("agent {id} not found"))?;
    agent.post_boxed(tag, boxed).await.map_err(|e| e.to_string())
}
