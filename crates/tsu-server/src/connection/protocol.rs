use super::*;

use tracing::trace;

use tsu_proto::packets::{IcMessage, IcSender};
use tsu_proto::{validate, Arg, NetCommand};

/// OOC name prefix reserved for global broadcasts.
const RESERVED_GLOBAL_PREFIX: &str = "<dollar>G";
/// Longest slash-command argument passed on to a command.
const MAX_COMMAND_ARG_LEN: usize = 256;
/// Features advertised to AO2 clients.
const AO2_FEATURES: [&str; 7] = [
    "yellowtext",
    "customobjections",
    "flipping",
    "fastloading",
    "noencryption",
    "deskmod",
    "evidence",
];
/// Animation cues accepted by `RT`.
const TESTIMONY_ANIMATIONS: [&str; 2] = ["testimony1", "testimony2"];

impl ConnectionHandler {
    /// Validate and dispatch one decoded message.
    pub(super) fn handle_message(&mut self, client_id: u32, msg: &str, now: Instant) {
        let Packet { name, fields } = Packet::parse(msg);
        let Some(cmd) = NetCommand::from_name(&name) else {
            trace!("Client {client_id} sent unknown command {name}");
            return;
        };
        let Some(session) = self.session(client_id) else {
            return;
        };

        // Mute and the IC gate are checked before the arguments are looked at.
        if cmd == NetCommand::IcMessage {
            if session.is_muted {
                self.send_host_message(client_id, "You have been muted by a moderator");
                return;
            }
            if !self
                .areas
                .get(session.area)
                .is_some_and(|a| a.can_send_message(now))
            {
                return;
            }
        }

        let args = match cmd.schema() {
            Some(schema) => match validate(fields, schema, session.has_character()) {
                Ok(args) => args,
                Err(e) => {
                    debug!("Client {client_id} sent invalid {}: {e}", cmd.name());
                    if cmd == NetCommand::ClientVersion {
                        self.disconnect(client_id);
                    }
                    return;
                }
            },
            None => Vec::new(),
        };

        match cmd {
            NetCommand::Handshake => self.net_cmd_hi(client_id, &args),
            NetCommand::KeepAlive => self.net_cmd_ch(client_id, now),
            NetCommand::ClientVersion => self.net_cmd_id(client_id, &args),
            NetCommand::AskCounts => self.net_cmd_askchaa(client_id),
            NetCommand::CharacterList => self.net_cmd_rc(client_id),
            NetCommand::MusicList => self.net_cmd_rm(client_id),
            NetCommand::Ready => self.net_cmd_rd(client_id),
            NetCommand::ChangeCharacter => self.net_cmd_cc(client_id, &args),
            NetCommand::IcMessage => self.net_cmd_ms(client_id, args, now),
            NetCommand::OocMessage => self.net_cmd_ct(client_id, &args),
            NetCommand::MusicChange => self.net_cmd_mc(client_id, &args, now),
            NetCommand::Testimony => self.net_cmd_rt(client_id, &args),
            NetCommand::Penalty => self.net_cmd_hp(client_id, &args),
            NetCommand::ModCall => self.net_cmd_zz(client_id),
            NetCommand::OpKick => self.net_cmd_op(client_id, &args, "opkick", "kick"),
            NetCommand::OpBan => self.net_cmd_op(client_id, &args, "opban", "ban"),
        }
    }

    // -----------------------------------------------------------------------
    // Handshake and negotiation
    // -----------------------------------------------------------------------

    /// `HI#<hdid>`
    fn net_cmd_hi(&mut self, client_id: u32, args: &[Arg]) {
        let [Arg::Str(hdid)] = args else {
            return;
        };
        let Some(session) = self.session_mut(client_id) else {
            return;
        };
        session.hdid = hdid.clone();
        let ip = session.ip.to_string();

        if self.bans.is_banned(&ip, hdid) {
            info!("Refused banned client {client_id} ({ip}, {hdid})");
            self.send(client_id, &Packet::new(id::BANNED));
            self.disconnect(client_id);
            return;
        }

        self.send(
            client_id,
            &Packet::new(id::SERVER_ID)
                .arg(client_id)
                .arg(env!("CARGO_PKG_NAME"))
                .arg(env!("CARGO_PKG_VERSION")),
        );
        self.send(
            client_id,
            &Packet::new(id::PLAYER_COUNT)
                .arg(self.player_count().saturating_sub(1))
                .arg(self.config.server.playerlimit),
        );
    }

    /// `CH`
    fn net_cmd_ch(&mut self, client_id: u32, now: Instant) {
        self.send(client_id, &Packet::new(id::KEEPALIVE_ACK));
        let timeout = self.config.server.timeout();
        if let Some(session) = self.session_mut(client_id) {
            session.rearm(now, timeout);
        }
    }

    /// `ID#<software>#<version>`
    fn net_cmd_id(&mut self, client_id: u32, args: &[Arg]) {
        let [Arg::Str(software), Arg::Str(version)] = args else {
            return;
        };
        debug!("Client {client_id} runs {software} {version}");
        if software == "AO2" {
            self.send(
                client_id,
                &Packet::new(id::FEATURE_LIST).args(AO2_FEATURES),
            );
        }
    }

    /// `askchaa`
    fn net_cmd_askchaa(&mut self, client_id: u32) {
        // evidence and music counts are always reported as 0
        self.send(
            client_id,
            &Packet::new(id::SIZE_INFO)
                .arg(self.catalog.char_count())
                .arg(0)
                .arg(0),
        );
    }

    /// `RC`
    fn net_cmd_rc(&mut self, client_id: u32) {
        self.send(
            client_id,
            &Packet::new(id::CHARACTER_LIST).args(self.catalog.characters()),
        );
    }

    /// `RM`
    fn net_cmd_rm(&mut self, client_id: u32) {
        self.send(
            client_id,
            &Packet::new(id::MUSIC_LIST).args(self.catalog.music_list_network()),
        );
    }

    /// `RD`
    fn net_cmd_rd(&mut self, client_id: u32) {
        self.send_done(client_id);
        self.send(
            client_id,
            &Packet::new(id::AREA_LIST).args(self.areas.iter().map(|a| &a.name)),
        );
        self.send_motd(client_id);
    }

    /// Character availability and area state that end the loading screen.
    fn send_done(&self, client_id: u32) {
        let Some(session) = self.session(client_id) else {
            return;
        };
        let Some(area) = self.areas.get(session.area) else {
            return;
        };
        let taken: Vec<i32> = (0..self.catalog.char_count())
            .filter_map(|id| i32::try_from(id).ok())
            .map(|id| {
                if self.is_char_available(area.id, id, client_id) {
                    0
                } else {
                    -1
                }
            })
            .collect();

        self.send(client_id, &Packet::new(id::CHARS_CHECK).args(taken));
        self.send(client_id, &Packet::new(id::PENALTY).arg(1).arg(area.hp_def));
        self.send(client_id, &Packet::new(id::PENALTY).arg(2).arg(area.hp_pro));
        self.send(client_id, &Packet::new(id::BACKGROUND).arg(&area.background));
        self.send(client_id, &Packet::new(id::EVIDENCE_LIST));
        self.send(client_id, &Packet::new(id::MUSIC_MODE).arg(1));
        self.send(client_id, &Packet::new(id::DONE));
    }

    /// `CC#<client id>#<char id>#<hdid>`
    fn net_cmd_cc(&mut self, client_id: u32, args: &[Arg]) {
        let [Arg::Int(_), Arg::Int(char_id), Arg::Str(_)] = args else {
            return;
        };
        let Ok(char_id) = i32::try_from(*char_id) else {
            return;
        };
        if let Err(e) = self.change_character(client_id, char_id) {
            debug!("Client {client_id} character change refused: {e}");
        }
    }

    // -----------------------------------------------------------------------
    // Area broadcasts
    // -----------------------------------------------------------------------

    /// `MS#...` (15 fields)
    fn net_cmd_ms(&mut self, client_id: u32, args: Vec<Arg>, now: Instant) {
        let Some(session) = self.session(client_id) else {
            return;
        };
        let sender = IcSender {
            char_id: session.char_id,
            is_mod: session.is_mod,
            fixed_pos: session.pos.as_deref(),
        };
        let area_id = session.area;
        let msg = match IcMessage::from_args(args).map(|m| m.sanitize(&sender)) {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                debug!("Client {client_id} sent invalid MS: {e}");
                return;
            }
            None => return,
        };

        self.send_area(area_id, &msg.to_packet());
        if let Some(area) = self.areas.get_mut(area_id) {
            area.set_next_msg_delay(now, msg.text.chars().count());
        }
        info!(
            "[IC][{area_id}][{}]{}",
            self.char_name(client_id),
            msg.text
        );
    }

    /// `CT#<name>#<text>`
    fn net_cmd_ct(&mut self, client_id: u32, args: &[Arg]) {
        let [Arg::Str(name), Arg::Str(text)] = args else {
            return;
        };
        self.ooc_message(client_id, name, text);
    }

    /// `opKICK#<target>` / `opBAN#<target>`: re-enter OOC as a slash command.
    fn net_cmd_op(&mut self, client_id: u32, args: &[Arg], name: &str, command: &str) {
        let [Arg::Str(target)] = args else {
            return;
        };
        self.ooc_message(client_id, name, &format!("/{command} {target}"));
    }

    pub(super) fn ooc_message(&mut self, client_id: u32, name: &str, text: &str) {
        let hostname = self.config.server.hostname.clone();
        let Some(session) = self.session_mut(client_id) else {
            return;
        };
        if session.name.is_empty() {
            session.name = name.to_string();
        }
        let name = session.name.clone();
        let area_id = session.area;

        if (!hostname.is_empty() && name.starts_with(&hostname))
            || name.starts_with(RESERVED_GLOBAL_PREFIX)
        {
            self.send_host_message(client_id, "That name is reserved!");
            return;
        }

        if let Some(line) = text.strip_prefix('/') {
            let (command, arg) = match line.split_once(' ') {
                Some((command, arg)) => (command, truncate(arg, MAX_COMMAND_ARG_LEN)),
                None => (line, ""),
            };
            self.run_command(client_id, command, arg);
            return;
        }

        self.send_area(
            area_id,
            &Packet::new(id::OOC_MESSAGE).arg(&name).arg(text),
        );
        info!(
            "[OOC][{area_id}][{}][{name}]{text}",
            self.char_name(client_id)
        );
    }

    fn run_command(&mut self, client_id: u32, command: &str, arg: &str) {
        let registry = Arc::clone(&self.commands);
        let outcome = registry.dispatch(self, client_id, command, arg);
        debug!("Client {client_id} ran /{command}: {outcome:?}");
    }

    /// `MC#<area or song>#<char id>`
    fn net_cmd_mc(&mut self, client_id: u32, args: &[Arg], now: Instant) {
        let [Arg::Str(target), Arg::Int(char_id)] = args else {
            return;
        };
        let Some(session) = self.session(client_id) else {
            return;
        };
        if *char_id != i64::from(session.char_id) {
            return;
        }
        let (area_id, own_char) = (session.area, session.char_id);

        if let Ok(target_area) = self.areas.by_name(target) {
            if let Err(e) = self.change_area(client_id, target_area) {
                self.send_host_message(client_id, &e.to_string());
            }
            return;
        }

        let Ok((song, length)) = self.catalog.song_data(target) else {
            return;
        };
        let player = self.char_name(client_id).to_string();
        if let Some(area) = self.areas.get_mut(area_id) {
            area.play_music(&song, &player, length, now);
        }
        self.send_area(area_id, &Packet::new(id::MUSIC).arg(&song).arg(own_char));
        info!("[{area_id}][{player}]Changed music to {song}.");
    }

    /// `RT#<animation>`
    fn net_cmd_rt(&mut self, client_id: u32, args: &[Arg]) {
        let [Arg::Str(animation)] = args else {
            return;
        };
        if !TESTIMONY_ANIMATIONS.contains(&animation.as_str()) {
            return;
        }
        let Some(area_id) = self.session(client_id).map(|s| s.area) else {
            return;
        };
        self.send_area(area_id, &Packet::new(id::TESTIMONY).arg(animation));
        self.add_to_judgelog(client_id, "used WT/CE");
        info!("[{area_id}]{} Used WT/CE", self.char_name(client_id));
    }

    /// `HP#<side>#<value>`
    fn net_cmd_hp(&mut self, client_id: u32, args: &[Arg]) {
        let [Arg::Int(side), Arg::Int(value)] = args else {
            return;
        };
        let Some(area_id) = self.session(client_id).map(|s| s.area) else {
            return;
        };
        let Some(area) = self.areas.get_mut(area_id) else {
            return;
        };
        if let Err(e) = area.change_hp(*side, *value) {
            debug!("Client {client_id} penalty change refused: {e}");
            return;
        }
        self.send_area(area_id, &Packet::new(id::PENALTY).arg(side).arg(value));
        self.add_to_judgelog(client_id, "changed the penalties");
        info!(
            "[{area_id}]{} changed HP ({side}) to {value}",
            self.char_name(client_id)
        );
    }

    /// `ZZ`: notify every moderator.
    fn net_cmd_zz(&mut self, client_id: u32) {
        let Some(session) = self.session(client_id) else {
            return;
        };
        if !session.has_character() {
            return;
        }
        let Some(area) = self.areas.get(session.area) else {
            return;
        };
        let summary = format!(
            "{} ({}) in {} ({})",
            self.char_name(client_id),
            session.ip,
            area.name,
            area.id
        );
        self.send_all_pred(&Packet::new(id::MOD_CALL).arg(&summary), |s| s.is_mod);
        info!("[{}]{} called a moderator.", area.id, self.char_name(client_id));
    }

    fn add_to_judgelog(&mut self, client_id: u32, action: &str) {
        let Some(session) = self.session(client_id) else {
            return;
        };
        let entry = format!("{} ({}) {action}.", self.char_name(client_id), session.ip);
        let area_id = session.area;
        if let Some(area) = self.areas.get_mut(area_id) {
            area.add_to_judgelog(entry);
        }
    }
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
