//! Per-client session state and the handler that drives the protocol.

mod ooc_commands;
mod protocol;
#[cfg(test)]
mod test_util;

use std::collections::{BTreeMap, HashMap};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use rand::seq::IteratorRandom;
use tracing::{debug, info, warn};

use tsu_command::{CommandError, CommandRegistry, CommandSender};
use tsu_net::{ConnectionId, NetEvent, ServerHandle};
use tsu_proto::cipher::DECRYPTOR_KEY;
use tsu_proto::packets::{id, AreaUpdate, AreaUpdateKind, POSITIONS};
use tsu_proto::{Framer, Packet};

use crate::area::AreaManager;
use crate::bans::BanStore;
use crate::catalog::Catalog;
use crate::config::ServerConfig;

/// Character id of a client that has not picked a character.
pub const NO_CHARACTER: i32 = -1;

/// Per-client protocol state.
pub struct Session {
    /// Protocol-level client id, recycled after disconnect.
    pub id: u32,
    pub conn: ConnectionId,
    pub ip: IpAddr,
    /// Device token from the handshake.
    pub hdid: String,
    pub char_id: i32,
    /// OOC name, fixed by the first OOC message.
    pub name: String,
    pub is_mod: bool,
    pub is_muted: bool,
    /// Position forced by `/pos`.
    pub pos: Option<String>,
    pub area: usize,
    framer: Framer,
    /// Liveness deadline, pushed back by every keepalive.
    deadline: Option<Instant>,
}

impl Session {
    fn new(id: u32, conn: ConnectionId, ip: IpAddr, area: usize) -> Self {
        Self {
            id,
            conn,
            ip,
            hdid: String::new(),
            char_id: NO_CHARACTER,
            name: String::new(),
            is_mod: false,
            is_muted: false,
            pos: None,
            area,
            framer: Framer::new(),
            deadline: None,
        }
    }

    pub fn has_character(&self) -> bool {
        self.char_id != NO_CHARACTER
    }

    /// Replace the liveness deadline with `now + timeout`.
    pub fn rearm(&mut self, now: Instant, timeout: Duration) {
        self.deadline = Some(now + timeout);
    }

    /// Clear the liveness deadline. Calling it twice is harmless.
    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|at| now >= at)
    }
}

/// Owns every session and area. All protocol handling happens here, on one
/// task, without awaiting.
pub struct ConnectionHandler {
    server_handle: ServerHandle,
    config: Arc<ServerConfig>,
    /// Sessions keyed by client id.
    sessions: BTreeMap<u32, Session>,
    by_conn: HashMap<ConnectionId, u32>,
    areas: AreaManager,
    catalog: Catalog,
    bans: BanStore,
    commands: Arc<CommandRegistry<ConnectionHandler>>,
}

impl ConnectionHandler {
    pub fn new(server_handle: ServerHandle, config: Arc<ServerConfig>, bans: BanStore) -> Self {
        let areas = AreaManager::new(&config.areas);
        let catalog = Catalog::new(
            config.characters.clone(),
            config.music.clone(),
            &areas.names(),
        );
        Self {
            server_handle,
            config,
            sessions: BTreeMap::new(),
            by_conn: HashMap::new(),
            areas,
            catalog,
            bans,
            commands: Arc::new(ooc_commands::build_registry()),
        }
    }

    pub fn player_count(&self) -> usize {
        self.sessions.len()
    }

    /// Process one transport event.
    pub fn handle_event(&mut self, event: NetEvent, now: Instant) {
        match event {
            NetEvent::Connected { id, addr } => self.handle_connected(id, addr, now),
            NetEvent::Data { id, payload } => self.handle_data(id, payload, now),
            NetEvent::Disconnected { id } => self.handle_disconnected(id),
        }
    }

    /// Periodic work: liveness sweep and music loops.
    pub fn tick(&mut self, now: Instant) {
        let expired: Vec<u32> = self
            .sessions
            .values()
            .filter(|s| s.is_expired(now))
            .map(|s| s.id)
            .collect();
        for client_id in expired {
            info!("Client {client_id} timed out");
            self.disconnect(client_id);
        }

        let mut loops = Vec::new();
        for area in self.areas.iter_mut() {
            if let Some(song) = area.due_music_loop(now) {
                loops.push((area.id, song));
            }
        }
        for (area_id, song) in loops {
            self.send_area(area_id, &Packet::new(id::MUSIC).arg(song).arg(NO_CHARACTER));
        }
    }

    // -----------------------------------------------------------------------
    // Connection lifecycle
    // -----------------------------------------------------------------------

    fn handle_connected(&mut self, conn: ConnectionId, addr: SocketAddr, now: Instant) {
        let Some(client_id) = (0..self.config.server.playerlimit)
            .find(|candidate| !self.sessions.contains_key(candidate))
        else {
            warn!("Server full, refusing {conn} from {addr}");
            self.server_handle.disconnect(conn);
            return;
        };

        let area = self.areas.default_area();
        let mut session = Session::new(client_id, conn, addr.ip(), area);
        session.rearm(now, self.config.server.timeout());
        self.sessions.insert(client_id, session);
        self.by_conn.insert(conn, client_id);
        if let Some(a) = self.areas.get_mut(area) {
            a.add_client(client_id);
        }
        info!("Client {client_id} connected from {}", addr.ip());

        self.send(client_id, &Packet::new(id::DECRYPTOR).arg(DECRYPTOR_KEY));
        self.send_arup_players();
    }

    fn handle_data(&mut self, conn: ConnectionId, payload: Bytes, now: Instant) {
        let Some(&client_id) = self.by_conn.get(&conn) else {
            return;
        };
        let fed = match self.sessions.get_mut(&client_id) {
            Some(session) => session.framer.feed(&payload),
            None => return,
        };
        if let Err(e) = fed {
            debug!("Client {client_id}: {e}");
            self.disconnect(client_id);
            return;
        }

        loop {
            // The session may be gone after any message (kick, ban, ...).
            let next = match self.sessions.get_mut(&client_id) {
                Some(session) => session.framer.next_message(),
                None => return,
            };
            match next {
                None => return,
                Some(Ok(msg)) => self.handle_message(client_id, &msg, now),
                Some(Err(e)) => {
                    debug!("Client {client_id}: {e}");
                    self.disconnect(client_id);
                    return;
                }
            }
        }
    }

    fn handle_disconnected(&mut self, conn: ConnectionId) {
        let Some(&client_id) = self.by_conn.get(&conn) else {
            return;
        };
        if self.teardown(client_id).is_some() {
            info!("Client {client_id} disconnected");
        }
    }

    /// Drop a client and close its connection.
    pub(super) fn disconnect(&mut self, client_id: u32) {
        if let Some(session) = self.teardown(client_id) {
            self.server_handle.disconnect(session.conn);
        }
    }

    /// Remove every trace of a client, then resync area occupancy.
    fn teardown(&mut self, client_id: u32) -> Option<Session> {
        let session = self.sessions.get_mut(&client_id)?;
        session.cancel();
        let area = session.area;
        if let Some(a) = self.areas.get_mut(area) {
            a.remove_client(client_id);
        }
        let session = self.sessions.remove(&client_id)?;
        self.by_conn.remove(&session.conn);
        self.send_arup_all();
        Some(session)
    }

    // -----------------------------------------------------------------------
    // Session operations
    // -----------------------------------------------------------------------

    pub(super) fn session(&self, client_id: u32) -> Option<&Session> {
        self.sessions.get(&client_id)
    }

    pub(super) fn session_mut(&mut self, client_id: u32) -> Option<&mut Session> {
        self.sessions.get_mut(&client_id)
    }

    /// Character name of a client, `CHAR_SELECT` for spectators.
    pub(super) fn char_name(&self, client_id: u32) -> &str {
        let char_id = self.session(client_id).map_or(NO_CHARACTER, |s| s.char_id);
        self.catalog.char_name(char_id)
    }

    /// Whether `char_id` is free in `area`, ignoring `except`.
    fn is_char_available(&self, area: usize, char_id: i32, except: u32) -> bool {
        char_id == NO_CHARACTER
            || !self
                .sessions
                .values()
                .any(|s| s.area == area && s.id != except && s.char_id == char_id)
    }

    pub(super) fn change_character(
        &mut self,
        client_id: u32,
        char_id: i32,
    ) -> Result<(), CommandError> {
        if !self.catalog.is_valid_char_id(char_id) {
            return Err(CommandError::Client("Invalid character ID.".into()));
        }
        let area = self
            .session(client_id)
            .map(|s| s.area)
            .ok_or_else(|| CommandError::Server("No such client.".into()))?;
        if !self.is_char_available(area, char_id, client_id) {
            return Err(CommandError::Client("Character not available.".into()));
        }
        let old = self.char_name(client_id).to_string();
        self.assign_character(client_id, char_id);
        info!(
            "[{area}]Client {client_id} changed character from {old} to {}",
            self.char_name(client_id)
        );
        Ok(())
    }

    fn assign_character(&mut self, client_id: u32, char_id: i32) {
        if let Some(session) = self.session_mut(client_id) {
            session.char_id = char_id;
            session.pos = None;
        }
        self.send(
            client_id,
            &Packet::new(id::PLAYER_VALUE)
                .arg(client_id)
                .arg("CID")
                .arg(char_id),
        );
    }

    pub(super) fn change_area(&mut self, client_id: u32, target: usize) -> Result<(), CommandError> {
        let Some(session) = self.session(client_id) else {
            return Err(CommandError::Server("No such client.".into()));
        };
        let (from, char_id) = (session.area, session.char_id);
        if from == target {
            return Err(CommandError::Client("User already in specified area.".into()));
        }
        if self.areas.get(target).is_none() {
            return Err(CommandError::Area("Area not found.".into()));
        }

        if !self.is_char_available(target, char_id, client_id) {
            let free = (0..self.catalog.char_count())
                .filter_map(|id| i32::try_from(id).ok())
                .filter(|id| self.is_char_available(target, *id, client_id))
                .choose(&mut rand::thread_rng())
                .ok_or_else(|| {
                    CommandError::Client("No available characters in that area.".into())
                })?;
            self.assign_character(client_id, free);
            let msg = format!("Character taken, switched to {}.", self.char_name(client_id));
            self.send_host_message(client_id, &msg);
        }

        if let Some(a) = self.areas.get_mut(from) {
            a.remove_client(client_id);
        }
        if let Some(session) = self.session_mut(client_id) {
            session.area = target;
        }
        let Some(area) = self.areas.get_mut(target) else {
            return Err(CommandError::Area("Area not found.".into()));
        };
        area.add_client(client_id);
        let changed = format!("Changed area to {}.[{}]", area.name, area.status);
        let (hp_def, hp_pro) = (area.hp_def, area.hp_pro);
        let background = area.background.clone();
        info!("Client {client_id} moved from area {from} to {target}");

        self.send_host_message(client_id, &changed);
        self.send(client_id, &Packet::new(id::PENALTY).arg(1).arg(hp_def));
        self.send(client_id, &Packet::new(id::PENALTY).arg(2).arg(hp_pro));
        self.send(client_id, &Packet::new(id::BACKGROUND).arg(background));
        self.send_arup_all();
        Ok(())
    }

    /// Set or clear the forced stage position.
    pub(super) fn change_position(
        &mut self,
        client_id: u32,
        pos: Option<&str>,
    ) -> Result<(), CommandError> {
        if let Some(pos) = pos {
            if !POSITIONS.contains(&pos) {
                return Err(CommandError::Client(format!(
                    "Invalid position. Possible values: {}.",
                    POSITIONS.join(", ")
                )));
            }
        }
        if let Some(session) = self.session_mut(client_id) {
            session.pos = pos.map(str::to_string);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Sending
    // -----------------------------------------------------------------------

    pub(super) fn send(&self, client_id: u32, packet: &Packet) {
        if let Some(session) = self.sessions.get(&client_id) {
            self.server_handle.send(session.conn, packet.encode());
        }
    }

    /// OOC line from the server itself.
    pub(super) fn send_host_message(&self, client_id: u32, msg: &str) {
        self.send(client_id, &self.host_message(msg));
    }

    fn host_message(&self, msg: &str) -> Packet {
        Packet::new(id::OOC_MESSAGE)
            .arg(&self.config.server.hostname)
            .arg(msg)
    }

    pub(super) fn send_area(&self, area: usize, packet: &Packet) {
        self.send_all_pred(packet, |s| s.area == area);
    }

    pub(super) fn send_all_pred(&self, packet: &Packet, pred: impl Fn(&Session) -> bool) {
        let encoded = packet.encode();
        for session in self.sessions.values().filter(|s| pred(s)) {
            self.server_handle.send(session.conn, encoded.clone());
        }
    }

    pub(super) fn send_arup_players(&self) {
        let counts = self.areas.iter().map(|a| a.player_count());
        let update = AreaUpdate::new(AreaUpdateKind::Players, counts);
        self.send_all_pred(&update.to_packet(), |_| true);
    }

    pub(super) fn send_arup_status(&self) {
        let statuses = self.areas.iter().map(|a| a.status.clone());
        let update = AreaUpdate::new(AreaUpdateKind::Status, statuses);
        self.send_all_pred(&update.to_packet(), |_| true);
    }

    pub(super) fn send_arup_cm(&self) {
        let masters = self.areas.iter().map(|a| a.case_master.clone());
        let update = AreaUpdate::new(AreaUpdateKind::CaseMaster, masters);
        self.send_all_pred(&update.to_packet(), |_| true);
    }

    pub(super) fn send_arup_all(&self) {
        self.send_arup_players();
        self.send_arup_status();
        self.send_arup_cm();
    }

    pub(super) fn send_motd(&self, client_id: u32) {
        let motd = format!(
            "=== MOTD ===\r\n{}\r\n=============",
            self.config.server.motd
        );
        self.send_host_message(client_id, &motd);
    }

    /// OOC broadcast to every client, tagged with the sender's area and character.
    pub(super) fn broadcast_global(&self, client_id: u32, msg: &str, as_mod: bool) {
        let Some(session) = self.session(client_id) else {
            return;
        };
        let mut name = format!(
            "{}[{}][{}]",
            self.config.server.globalname,
            session.area,
            self.char_name(client_id)
        );
        if as_mod {
            name.push_str("[M]");
        }
        self.send_all_pred(&Packet::new(id::OOC_MESSAGE).arg(name).arg(msg), |_| true);
    }
}

impl CommandSender for ConnectionHandler {
    fn reply(&mut self, client: u32, message: &str) {
        self.send_host_message(client, message);
    }
}
