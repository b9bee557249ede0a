//! TCP transport: the production `Connector` and the client side of a
//! wire session.
//!
//! A session writes the preamble once at connect time; every posted
//! operation then travels as one sized-envelope packet. Responses are
//! read off the same socket by a background task: a zero-length ack
//! record acknowledges the oldest unacknowledged operation (FIFO
//! correlation), a refusal envelope fails the operation it names, and a
//! packet-fault record or transport error fails everything outstanding
//! and kills the connection.

use crate::error::{RemoteError, WireError, PACKET_FAULT_UNEXPECTED_END};
use crate::remote::codec::WireEnvelope;
use crate::remote::{Connector, LinkContext, OpWindow, PendingOps, RemoteLink};
use crate::wire;
use async_trait::async_trait;
use myna_api::trace::{TraceEvent, TraceKind, TraceSink};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

// --- Async record readers (shared with the server side) ---

fn map_read_err(err: std::io::Error) -> RemoteError {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        RemoteError::Wire(WireError::UnexpectedEnd)
    } else {
        RemoteError::Io(err.to_string())
    }
}

pub(crate) async fn read_record_id<R: AsyncRead + Unpin>(r: &mut R) -> std::io::Result<u8> {
    let mut id = [0u8; 1];
    r.read_exact(&mut id).await?;
    Ok(id[0])
}

/// Reads the body of a sized-envelope record: length, extra, payload.
pub(crate) async fn read_sized_payload<R: AsyncRead + Unpin>(
    r: &mut R,
) -> Result<Vec<u8>, RemoteError> {
    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf).await.map_err(map_read_err)?;
    let len = u32::from_le_bytes(len_buf) as usize;
    let mut extra = [0u8; 2];
    r.read_exact(&mut extra).await.map_err(map_read_err)?;
    if len > wire::MAX_PAYLOAD_LEN {
        return Err(RemoteError::Wire(WireError::InvalidFormat(format!(
            "declared payload of {len} bytes exceeds the frame limit"
        ))));
    }
    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload).await.map_err(map_read_err)?;
    Ok(payload)
}

/// Reads a session preamble field by field, strictly sequentially.
pub(crate) async fn read_preamble<R: AsyncRead + Unpin>(
    r: &mut R,
) -> Result<wire::Preamble, RemoteError> {
    let mut head = [0u8; 3];
    r.read_exact(&mut head).await.map_err(map_read_err)?;
    let mode = wire::CommunicationMode::from_byte(head[2])?;
    let mut via_len = [0u8; 2];
    r.read_exact(&mut via_len).await.map_err(map_read_err)?;
    let mut via = vec![0u8; u16::from_le_bytes(via_len) as usize];
    r.read_exact(&mut via).await.map_err(map_read_err)?;
    let via = String::from_utf8(via)
        .map_err(|_| RemoteError::Wire(WireError::InvalidFormat("via URI is not valid UTF-8".to_string())))?;
    let mut tail = [0u8; 3];
    r.read_exact(&mut tail).await.map_err(map_read_err)?;
    let encoding = wire::EnvelopeEncoding::from_byte(tail[0])?;
    let structure = wire::EnvelopeStructure::from_byte(tail[1])?;
    if tail[2] != wire::RECORD_PREAMBLE_END {
        return Err(RemoteError::Wire(WireError::InvalidFormat(format!(
            "expected end-of-preamble record, found {:#04x}",
            tail[2]
        ))));
    }
    Ok(wire::Preamble {
        major: head[0],
        minor: head[1],
        mode,
        via,
        encoding,
        structure,
    })
}

// --- Client link ---

/// Production connector: opens a TCP stream, writes the preamble, and
/// spawns the response reader.
#[derive(Clone, Copy, Debug, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, ctx: LinkContext) -> Result<Arc<dyn RemoteLink>, RemoteError> {
        let stream = TcpStream::connect(ctx.endpoint)
            .await
            .map_err(|e| RemoteError::ConnectFailed(ctx.endpoint, e.to_string()))?;
        let _ = stream.set_nodelay(true);
        let (read_half, mut write_half) = stream.into_split();

        let preamble = wire::Preamble::new(format!("myna://{}", ctx.endpoint));
        write_half
            .write_all(&wire::encode_preamble(&preamble)?)
            .await
            .map_err(|e| RemoteError::Io(e.to_string()))?;

        let alive = Arc::new(AtomicBool::new(true));
        let reader = tokio::spawn(read_loop(
            read_half,
            ctx.pending,
            ctx.window,
            ctx.trace,
            ctx.endpoint,
            alive.clone(),
        ));
        tracing::debug!(endpoint = %ctx.endpoint, "remote link connected");

        Ok(Arc::new(TcpLink {
            endpoint: ctx.endpoint,
            writer: tokio::sync::Mutex::new(write_half),
            alive,
            reader,
        }))
    }
}

struct TcpLink {
    endpoint: SocketAddr,
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    alive: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

#[async_trait]
impl RemoteLink for TcpLink {
    async fn send_frame(&self, frame: &[u8]) -> Result<(), RemoteError> {
        if !self.is_alive() {
            return Err(RemoteError::LinkClosed(self.endpoint));
        }
        let mut writer = self.writer.lock().await;
        if let Err(err) = writer.write_all(frame).await {
            self.alive.store(false, Ordering::SeqCst);
            return Err(RemoteError::Io(err.to_string()));
        }
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.reader.abort();
        tracing::debug!(endpoint = %self.endpoint, "remote link closed");
    }
}

/// Reads acknowledgements and refusals until the connection dies, then
/// fails every still-outstanding operation on it.
async fn read_loop(
    mut reader: OwnedReadHalf,
    pending: Arc<PendingOps>,
    window: Arc<OpWindow>,
    trace: Arc<dyn TraceSink>,
    endpoint: SocketAddr,
    alive: Arc<AtomicBool>,
) {
    let failure = loop {
        let id = match read_record_id(&mut reader).await {
            Ok(id) => id,
            Err(_) => break RemoteError::LinkClosed(endpoint),
        };
        match id {
            wire::RECORD_ACK => {
                // FIFO correlation: the ack names no id, so it resolves
                // the oldest unacknowledged operation.
                if let Some(op) = window.pop_oldest() {
                    pending.ack(op);
                    trace.trace(&TraceEvent::new(
                        TraceKind::RemoteAck,
                        None,
                        format!("op {op} acknowledged by {endpoint}"),
                    ));
                }
            }
            wire::RECORD_SIZED_ENVELOPE => match read_sized_payload(&mut reader).await {
                Ok(payload) => match serde_json::from_slice::<WireEnvelope>(&payload) {
                    Ok(WireEnvelope::Refused { op, reason }) => {
                        window.forget(op);
                        pending.fail(op, RemoteError::Refused(reason));
                    }
                    Ok(WireEnvelope::Deliver { .. }) | Err(_) => {
                        break RemoteError::Wire(WireError::InvalidFormat(
                            "unexpected envelope from server".to_string(),
                        ));
                    }
                },
                Err(err) => break err,
            },
            wire::RECORD_FAULT => {
                let mut code = [0u8; 1];
                let _ = reader.read_exact(&mut code).await;
                break RemoteError::Wire(if code[0] == PACKET_FAULT_UNEXPECTED_END {
                    WireError::UnexpectedEnd
                } else {
                    WireError::InvalidFormat(format!(
                        "peer reported packet fault {:#04x}",
                        code[0]
                    ))
                });
            }
            wire::RECORD_END => break RemoteError::LinkClosed(endpoint),
            other => {
                break RemoteError::Wire(WireError::InvalidFormat(format!(
                    "unknown record id {other:#04x}"
                )));
            }
        }
    };

    alive.store(false, Ordering::SeqCst);
    tracing::debug!(%endpoint, %failure, "remote link read side ended");
    for op in window.drain() {
        pending.fail(op, failure.clone());
    }
}
