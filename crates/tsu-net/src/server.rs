use std::collections::HashMap;
use std::net::SocketAddr;

use bytes::Bytes;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::connection::{self, Endpoint, Link};
use crate::error::NetError;
use crate::ConnectionId;

/// Capacity of the inbound event channel.
const EVENT_CHANNEL_SIZE: usize = 256;

/// Events emitted by the transport to the consumer.
#[derive(Debug)]
pub enum NetEvent {
    /// A socket was accepted (TCP) or upgraded (websocket).
    Connected { id: ConnectionId, addr: SocketAddr },
    /// Raw bytes read from a connection, in arrival order.
    Data { id: ConnectionId, payload: Bytes },
    /// The connection is gone. Emitted exactly once per `Connected`.
    Disconnected { id: ConnectionId },
}

/// Commands that can be sent to the transport from another task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerCommand {
    /// Write text to a connection.
    Send { id: ConnectionId, data: String },
    /// Close a connection, giving pending writes a short grace period.
    Disconnect { id: ConnectionId },
}

/// A cloneable handle for writing to connections from any task.
///
/// Both operations only enqueue and never wait, so they can be called from
/// synchronous code.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    command_tx: mpsc::UnboundedSender<ServerCommand>,
}

impl ServerHandle {
    /// Create a handle and the receiving end of its command queue.
    ///
    /// [`NetServer::bind`] uses this internally; tests use it to inspect what
    /// a consumer would have written.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ServerCommand>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        (Self { command_tx }, command_rx)
    }

    /// Queue text for a connection. Silently dropped if the transport is gone.
    pub fn send(&self, id: ConnectionId, data: impl Into<String>) {
        let _ = self.command_tx.send(ServerCommand::Send {
            id,
            data: data.into(),
        });
    }

    /// Queue a disconnect for a connection.
    pub fn disconnect(&self, id: ConnectionId) {
        let _ = self.command_tx.send(ServerCommand::Disconnect { id });
    }
}

/// Listener configuration.
#[derive(Debug, Clone)]
pub struct NetConfig {
    pub tcp_addr: SocketAddr,
    /// Websocket listener, if enabled.
    pub ws_addr: Option<SocketAddr>,
}

/// The transport: owns the listeners and routes writes to connection tasks.
pub struct NetServer {
    tcp: TcpListener,
    ws: Option<TcpListener>,
    event_tx: mpsc::Sender<NetEvent>,
    command_rx: mpsc::UnboundedReceiver<ServerCommand>,
    closed_tx: mpsc::UnboundedSender<ConnectionId>,
    closed_rx: mpsc::UnboundedReceiver<ConnectionId>,
    connections: HashMap<ConnectionId, Link>,
    next_id: u64,
}

impl NetServer {
    /// Bind the listeners and create the server. Returns the server, an event
    /// receiver for the consumer, and a handle for sending commands.
    pub async fn bind(
        config: NetConfig,
    ) -> Result<(Self, mpsc::Receiver<NetEvent>, ServerHandle), NetError> {
        let tcp = TcpListener::bind(config.tcp_addr).await?;
        info!("TCP listener bound on {}", tcp.local_addr()?);

        let ws = match config.ws_addr {
            Some(addr) => {
                let listener = TcpListener::bind(addr).await?;
                info!("Websocket listener bound on {}", listener.local_addr()?);
                Some(listener)
            }
            None => None,
        };

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        let (handle, command_rx) = ServerHandle::channel();
        let (closed_tx, closed_rx) = mpsc::unbounded_channel();

        Ok((
            Self {
                tcp,
                ws,
                event_tx,
                command_rx,
                closed_tx,
                closed_rx,
                connections: HashMap::new(),
                next_id: 0,
            },
            event_rx,
            handle,
        ))
    }

    /// Bound TCP address (useful when binding port 0).
    pub fn tcp_addr(&self) -> Result<SocketAddr, NetError> {
        Ok(self.tcp.local_addr()?)
    }

    /// Bound websocket address, if the websocket listener is enabled.
    pub fn ws_addr(&self) -> Option<SocketAddr> {
        self.ws.as_ref().and_then(|l| l.local_addr().ok())
    }

    /// Run the accept and routing loop until the shutdown signal is received.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                result = self.tcp.accept() => match result {
                    Ok((stream, addr)) => {
                        let (id, endpoint) = self.register();
                        debug!("TCP connection {id} from {addr}");
                        tokio::spawn(connection::run_tcp(
                            stream,
                            addr,
                            id,
                            self.event_tx.clone(),
                            endpoint,
                            self.closed_tx.clone(),
                        ));
                    }
                    Err(e) => warn!("TCP accept error: {e}"),
                },
                result = accept_optional(self.ws.as_ref()) => match result {
                    Ok((stream, addr)) => {
                        let (id, endpoint) = self.register();
                        debug!("Websocket connection {id} from {addr}");
                        tokio::spawn(connection::run_ws(
                            stream,
                            addr,
                            id,
                            self.event_tx.clone(),
                            endpoint,
                            self.closed_tx.clone(),
                        ));
                    }
                    Err(e) => warn!("Websocket accept error: {e}"),
                },
                Some(cmd) = self.command_rx.recv() => self.route(cmd),
                Some(id) = self.closed_rx.recv() => {
                    self.connections.remove(&id);
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Transport shutting down");
                        for link in self.connections.values() {
                            link.close();
                        }
                        self.connections.clear();
                        break;
                    }
                }
            }
        }
    }

    fn register(&mut self) -> (ConnectionId, Endpoint) {
        let id = ConnectionId(self.next_id);
        self.next_id += 1;
        let (link, endpoint) = Link::new();
        self.connections.insert(id, link);
        (id, endpoint)
    }

    fn route(&mut self, cmd: ServerCommand) {
        match cmd {
            ServerCommand::Send { id, data } => {
                if let Some(link) = self.connections.get(&id) {
                    link.send(data);
                }
            }
            ServerCommand::Disconnect { id } => {
                // The entry stays until the task reports back. Writes queued
                // before the disconnect get a short grace period to go out.
                if let Some(link) = self.connections.get(&id) {
                    link.close();
                }
            }
        }
    }
}

async fn accept_optional(
    listener: Option<&TcpListener>,
) -> std::io::Result<(tokio::net::TcpStream, SocketAddr)> {
    match listener {
        Some(l) => l.accept().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures_util::{SinkExt, StreamExt};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::time::timeout;
    use tokio_tungstenite::tungstenite::Message;

    use super::*;

    const WAIT: Duration = Duration::from_secs(5);

    async fn start(
        ws: bool,
    ) -> (
        NetServer,
        mpsc::Receiver<NetEvent>,
        ServerHandle,
        watch::Sender<bool>,
    ) {
        let loopback: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let config = NetConfig {
            tcp_addr: loopback,
            ws_addr: ws.then_some(loopback),
        };
        let (server, events, handle) = NetServer::bind(config).await.unwrap();
        let (shutdown_tx, _) = watch::channel(false);
        (server, events, handle, shutdown_tx)
    }

    async fn next_event(events: &mut mpsc::Receiver<NetEvent>) -> NetEvent {
        timeout(WAIT, events.recv()).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn tcp_roundtrip_and_disconnect() {
        let (mut server, mut events, handle, shutdown_tx) = start(false).await;
        let addr = server.tcp_addr().unwrap();
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move { server.run(shutdown_rx).await });

        let mut client = TcpStream::connect(addr).await.unwrap();
        let NetEvent::Connected { id, .. } = next_event(&mut events).await else {
            panic!("expected Connected");
        };

        client.write_all(b"HI#abc#%").await.unwrap();
        let mut received = Vec::new();
        while received.len() < 8 {
            match next_event(&mut events).await {
                NetEvent::Data { id: from, payload } => {
                    assert_eq!(from, id);
                    received.extend_from_slice(&payload);
                }
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert_eq!(received, b"HI#abc#%");

        handle.send(id, "ID#0#tsu#%");
        handle.disconnect(id);

        let mut reply = String::new();
        timeout(WAIT, client.read_to_string(&mut reply))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply, "ID#0#tsu#%");

        assert!(matches!(
            next_event(&mut events).await,
            NetEvent::Disconnected { id: gone } if gone == id
        ));
        let _ = shutdown_tx.send(true);
    }

    #[tokio::test]
    async fn stalled_reader_is_still_read_and_closed() {
        let (mut server, mut events, handle, shutdown_tx) = start(false).await;
        let addr = server.tcp_addr().unwrap();
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move { server.run(shutdown_rx).await });

        // the client never reads, so the socket buffers fill up
        let mut client = TcpStream::connect(addr).await.unwrap();
        let NetEvent::Connected { id, .. } = next_event(&mut events).await else {
            panic!("expected Connected");
        };
        let chunk = "x".repeat(1 << 20);
        for _ in 0..64 {
            handle.send(id, chunk.clone());
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        client.write_all(b"CH#%").await.unwrap();
        match next_event(&mut events).await {
            NetEvent::Data { id: from, payload } => {
                assert_eq!(from, id);
                assert_eq!(&payload[..], b"CH#%");
            }
            other => panic!("unexpected event {other:?}"),
        }

        handle.disconnect(id);
        assert!(matches!(
            next_event(&mut events).await,
            NetEvent::Disconnected { id: gone } if gone == id
        ));
        let _ = shutdown_tx.send(true);
    }

    #[tokio::test]
    async fn peer_close_reports_disconnect_once() {
        let (mut server, mut events, _handle, shutdown_tx) = start(false).await;
        let addr = server.tcp_addr().unwrap();
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move { server.run(shutdown_rx).await });

        let client = TcpStream::connect(addr).await.unwrap();
        let NetEvent::Connected { id, .. } = next_event(&mut events).await else {
            panic!("expected Connected");
        };
        drop(client);

        assert!(matches!(
            next_event(&mut events).await,
            NetEvent::Disconnected { id: gone } if gone == id
        ));
        assert!(timeout(Duration::from_millis(200), events.recv())
            .await
            .is_err());
        let _ = shutdown_tx.send(true);
    }

    #[tokio::test]
    async fn connection_ids_are_not_reused() {
        let (mut server, mut events, _handle, shutdown_tx) = start(false).await;
        let addr = server.tcp_addr().unwrap();
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move { server.run(shutdown_rx).await });

        let first = TcpStream::connect(addr).await.unwrap();
        let NetEvent::Connected { id: a, .. } = next_event(&mut events).await else {
            panic!("expected Connected");
        };
        drop(first);
        let _ = next_event(&mut events).await;

        let _second = TcpStream::connect(addr).await.unwrap();
        let NetEvent::Connected { id: b, .. } = next_event(&mut events).await else {
            panic!("expected Connected");
        };
        assert_ne!(a, b);
        let _ = shutdown_tx.send(true);
    }

    #[tokio::test]
    async fn websocket_text_frames() {
        let (mut server, mut events, handle, shutdown_tx) = start(true).await;
        let ws_addr = server.ws_addr().unwrap();
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move { server.run(shutdown_rx).await });

        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{ws_addr}"))
            .await
            .unwrap();
        let NetEvent::Connected { id, .. } = next_event(&mut events).await else {
            panic!("expected Connected");
        };

        ws.send(Message::Text("CH#%".into())).await.unwrap();
        match next_event(&mut events).await {
            NetEvent::Data { payload, .. } => assert_eq!(&payload[..], b"CH#%"),
            other => panic!("unexpected event {other:?}"),
        }

        handle.send(id, "CHECK#%");
        let frame = timeout(WAIT, ws.next()).await.unwrap().unwrap().unwrap();
        assert_eq!(frame, Message::Text("CHECK#%".into()));
        let _ = shutdown_tx.send(true);
    }

    #[test]
    fn handle_enqueues_commands_in_order() {
        let (handle, mut rx) = ServerHandle::channel();
        handle.send(ConnectionId(3), "CHECK#%");
        handle.disconnect(ConnectionId(3));
        assert_eq!(
            rx.try_recv().unwrap(),
            ServerCommand::Send {
                id: ConnectionId(3),
                data: "CHECK#%".into()
            }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            ServerCommand::Disconnect {
                id: ConnectionId(3)
            }
        );
    }
}
