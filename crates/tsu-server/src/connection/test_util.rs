//! Drives a `ConnectionHandler` through transport events with a fake clock.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc::UnboundedReceiver;
use tsu_net::{ConnectionId, NetEvent, ServerCommand, ServerHandle};

use super::ConnectionHandler;
use crate::bans::BanStore;
use crate::config::ServerConfig;

pub const TEST_CONFIG: &str = r#"
    characters = ["Phoenix", "Edgeworth", "Maya"]

    [server]
    port = 27016
    hostname = "<dollar>H"
    playerlimit = 4
    timeout = 60
    motd = "Welcome"
    modpass = "secret"

    [[areas]]
    name = "Lobby"
    background = "lobby"

    [[areas]]
    name = "Courtroom"
    background = "gs4"

    [[music]]
    category = "==Trial=="
    songs = [{ name = "Objection.mp3", length = 90 }]
"#;

pub struct Harness {
    pub handler: ConnectionHandler,
    commands: UnboundedReceiver<ServerCommand>,
    now: Instant,
}

impl Harness {
    pub fn new() -> Self {
        let config = Arc::new(ServerConfig::parse(TEST_CONFIG).unwrap());
        let (handle, commands) = ServerHandle::channel();
        Self {
            handler: ConnectionHandler::new(handle, config, BanStore::in_memory()),
            commands,
            now: Instant::now(),
        }
    }

    pub fn event(&mut self, event: NetEvent) {
        self.handler.handle_event(event, self.now);
    }

    pub fn connect(&mut self, conn: u64, ip: &str) -> ConnectionId {
        let id = ConnectionId(conn);
        let addr: SocketAddr = format!("{ip}:50000").parse().unwrap();
        self.event(NetEvent::Connected { id, addr });
        id
    }

    /// Connect, handshake and pick a character.
    pub fn join(&mut self, conn: u64, ip: &str, char_id: i32) -> ConnectionId {
        let id = self.connect(conn, ip);
        self.feed(id, &format!("HI#hdid{conn}#%"));
        self.feed(id, &format!("CC#0#{char_id}#hdid{conn}#%"));
        id
    }

    pub fn feed(&mut self, id: ConnectionId, data: &str) {
        self.feed_bytes(id, data.as_bytes());
    }

    pub fn feed_bytes(&mut self, id: ConnectionId, data: &[u8]) {
        self.event(NetEvent::Data {
            id,
            payload: data.to_vec().into(),
        });
    }

    pub fn advance(&mut self, by: Duration) {
        self.now += by;
    }

    pub fn tick(&mut self) {
        self.handler.tick(self.now);
    }

    pub fn client_id(&self, conn: ConnectionId) -> Option<u32> {
        self.handler.by_conn.get(&conn).copied()
    }

    /// Everything the handler asked the transport to do since the last drain.
    pub fn drain(&mut self) -> Vec<ServerCommand> {
        std::iter::from_fn(|| self.commands.try_recv().ok()).collect()
    }
}

/// Lines sent to one connection, in order.
pub fn sends(out: &[ServerCommand], conn: ConnectionId) -> Vec<&str> {
    out.iter()
        .filter_map(|cmd| match cmd {
            ServerCommand::Send { id, data } if *id == conn => Some(data.as_str()),
            _ => None,
        })
        .collect()
}

pub fn disconnects(out: &[ServerCommand], conn: ConnectionId) -> usize {
    out.iter()
        .filter(|cmd| matches!(cmd, ServerCommand::Disconnect { id } if *id == conn))
        .count()
}

/// A valid `MS` line for `char_id`.
pub fn ic_line(char_id: i32, text: &str, anim_type: i64, color: i64) -> String {
    format!("MS#chat##Phoenix#normal#{text}#def#0#{anim_type}#{char_id}#0#0#0#0#0#{color}#%")
}
