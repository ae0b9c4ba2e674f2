//! Per-connection tasks.
//!
//! Each connection runs a reader loop and a separate writer task. The reader
//! forwards reads as [`NetEvent::Data`]; the writer drains the outbound queue.
//! A close request wins over queued data: the writer gets [`CLOSE_GRACE`] to
//! flush, then the socket is dropped. When the connection ends it emits a
//! single [`NetEvent::Disconnected`] and tells the router to forget it.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{accept_async, tungstenite::Message, WebSocketStream};
use tracing::debug;

use crate::error::NetError;
use crate::server::NetEvent;
use crate::ConnectionId;

const READ_BUF_SIZE: usize = 4096;
/// A peer that accepts none of a write for this long is dropped.
pub(crate) const WRITE_TIMEOUT: Duration = Duration::from_secs(10);
/// Time the writer gets to flush queued data after a close request.
pub(crate) const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Work queued for a writer task.
#[derive(Debug)]
enum Outbound {
    Data(String),
    Close,
}

/// Router side of a connection.
pub(crate) struct Link {
    outbound: mpsc::UnboundedSender<Outbound>,
    close: Arc<Notify>,
}

/// Task side of a connection.
pub(crate) struct Endpoint {
    outbound: mpsc::UnboundedReceiver<Outbound>,
    close: Arc<Notify>,
}

impl Link {
    pub(crate) fn new() -> (Self, Endpoint) {
        let (tx, rx) = mpsc::unbounded_channel();
        let close = Arc::new(Notify::new());
        (
            Self {
                outbound: tx,
                close: Arc::clone(&close),
            },
            Endpoint {
                outbound: rx,
                close,
            },
        )
    }

    pub(crate) fn send(&self, data: String) {
        let _ = self.outbound.send(Outbound::Data(data));
    }

    /// Ask the connection to flush what it can and close.
    pub(crate) fn close(&self) {
        let _ = self.outbound.send(Outbound::Close);
        self.close.notify_one();
    }
}

pub(crate) async fn run_tcp(
    stream: TcpStream,
    addr: SocketAddr,
    id: ConnectionId,
    events: mpsc::Sender<NetEvent>,
    endpoint: Endpoint,
    closed: mpsc::UnboundedSender<ConnectionId>,
) {
    let _ = stream.set_nodelay(true);
    if events.send(NetEvent::Connected { id, addr }).await.is_err() {
        let _ = closed.send(id);
        return;
    }

    let Endpoint { outbound, close } = endpoint;
    let (mut reader, writer) = stream.into_split();
    let mut writer_task = tokio::spawn(write_tcp(writer, outbound));
    let mut buf = BytesMut::with_capacity(READ_BUF_SIZE);
    loop {
        tokio::select! {
            read = reader.read_buf(&mut buf) => match read {
                Ok(0) => break,
                Ok(_) => {
                    let payload = buf.split().freeze();
                    if events.send(NetEvent::Data { id, payload }).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!("{id} read error: {e}");
                    break;
                }
            },
            written = &mut writer_task => {
                log_writer_exit(id, written);
                break;
            }
            _ = close.notified() => {
                drain(id, &mut writer_task).await;
                break;
            }
        }
    }
    writer_task.abort();

    finish(id, &events, &closed).await;
}

async fn write_tcp(
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) -> Result<(), NetError> {
    while let Some(Outbound::Data(text)) = outbound.recv().await {
        timeout(WRITE_TIMEOUT, writer.write_all(text.as_bytes()))
            .await
            .map_err(|_| NetError::WriteTimeout)??;
    }
    let _ = timeout(WRITE_TIMEOUT, writer.shutdown()).await;
    Ok(())
}

pub(crate) async fn run_ws(
    stream: TcpStream,
    addr: SocketAddr,
    id: ConnectionId,
    events: mpsc::Sender<NetEvent>,
    endpoint: Endpoint,
    closed: mpsc::UnboundedSender<ConnectionId>,
) {
    let ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            debug!("{id} websocket handshake from {addr} failed: {e}");
            let _ = closed.send(id);
            return;
        }
    };
    if events.send(NetEvent::Connected { id, addr }).await.is_err() {
        let _ = closed.send(id);
        return;
    }

    let Endpoint { outbound, close } = endpoint;
    let (sink, mut source) = ws.split();
    let mut writer_task = tokio::spawn(write_ws(sink, outbound));
    loop {
        tokio::select! {
            frame = source.next() => {
                let payload: Bytes = match frame {
                    Some(Ok(Message::Text(text))) => text.into_bytes().into(),
                    Some(Ok(Message::Binary(bytes))) => bytes.into(),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        debug!("{id} websocket error: {e}");
                        break;
                    }
                };
                if events.send(NetEvent::Data { id, payload }).await.is_err() {
                    break;
                }
            }
            written = &mut writer_task => {
                log_writer_exit(id, written);
                break;
            }
            _ = close.notified() => {
                drain(id, &mut writer_task).await;
                break;
            }
        }
    }
    writer_task.abort();

    finish(id, &events, &closed).await;
}

async fn write_ws(
    mut sink: SplitSink<WebSocketStream<TcpStream>, Message>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) -> Result<(), NetError> {
    while let Some(Outbound::Data(text)) = outbound.recv().await {
        timeout(WRITE_TIMEOUT, sink.send(Message::Text(text)))
            .await
            .map_err(|_| NetError::WriteTimeout)??;
    }
    let _ = timeout(WRITE_TIMEOUT, sink.close()).await;
    Ok(())
}

/// Give the writer [`CLOSE_GRACE`] to flush after a close request.
async fn drain(id: ConnectionId, writer_task: &mut JoinHandle<Result<(), NetError>>) {
    match timeout(CLOSE_GRACE, writer_task).await {
        Ok(written) => log_writer_exit(id, written),
        Err(_) => debug!("{id} closed with writes still pending"),
    }
}

fn log_writer_exit(
    id: ConnectionId,
    written: Result<Result<(), NetError>, tokio::task::JoinError>,
) {
    match written {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("{id} write failed: {e}"),
        Err(e) => debug!("{id} writer task ended: {e}"),
    }
}

async fn finish(
    id: ConnectionId,
    events: &mpsc::Sender<NetEvent>,
    closed: &mpsc::UnboundedSender<ConnectionId>,
) {
    let _ = closed.send(id);
    let _ = events.send(NetEvent::Disconnected { id }).await;
}
