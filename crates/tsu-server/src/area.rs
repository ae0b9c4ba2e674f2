//! Areas: rooms that share IC/OOC broadcast scope and scene state.

use std::collections::{BTreeSet, VecDeque};
use std::time::{Duration, Instant};

use tsu_command::CommandError;

use crate::config::AreaConfig;

/// Entries kept in an area's judge log.
const JUDGELOG_LEN: usize = 10;
/// Upper bound on the IC cooldown.
const MAX_MESSAGE_DELAY_MS: u64 = 3000;
const HP_MAX: i64 = 10;

pub struct Area {
    pub id: usize,
    pub name: String,
    pub background: String,
    pub status: String,
    pub case_master: String,
    pub hp_def: i64,
    pub hp_pro: i64,
    /// Client ids of the members.
    clients: BTreeSet<u32>,
    next_message_at: Option<Instant>,
    pub current_music: String,
    pub current_music_player: String,
    music_loop: Option<MusicLoop>,
    judgelog: VecDeque<String>,
}

struct MusicLoop {
    song: String,
    length: Duration,
    next_at: Instant,
}

impl Area {
    pub fn new(id: usize, name: String, background: String) -> Self {
        Self {
            id,
            name,
            background,
            status: "IDLE".into(),
            case_master: String::new(),
            hp_def: HP_MAX,
            hp_pro: HP_MAX,
            clients: BTreeSet::new(),
            next_message_at: None,
            current_music: String::new(),
            current_music_player: String::new(),
            music_loop: None,
            judgelog: VecDeque::new(),
        }
    }

    pub fn add_client(&mut self, client_id: u32) {
        self.clients.insert(client_id);
    }

    /// Remove a client. An empty area stops looping its music.
    pub fn remove_client(&mut self, client_id: u32) {
        self.clients.remove(&client_id);
        if self.clients.is_empty() {
            self.music_loop = None;
        }
    }

    pub fn clients(&self) -> impl Iterator<Item = u32> + '_ {
        self.clients.iter().copied()
    }

    pub fn player_count(&self) -> usize {
        self.clients.len()
    }

    pub fn can_send_message(&self, now: Instant) -> bool {
        self.next_message_at.is_none_or(|at| now >= at)
    }

    /// Close the IC gate for a time proportional to the length of the last
    /// message.
    pub fn set_next_msg_delay(&mut self, now: Instant, msg_len: usize) {
        let delay = (100 + 60 * msg_len as u64).min(MAX_MESSAGE_DELAY_MS);
        self.next_message_at = Some(now + Duration::from_millis(delay));
    }

    /// Set one of the penalty bars. `side` 1 is defense, 2 is prosecution.
    pub fn change_hp(&mut self, side: i64, value: i64) -> Result<(), CommandError> {
        if !(0..=HP_MAX).contains(&value) {
            return Err(CommandError::Area("Invalid penalty value.".into()));
        }
        match side {
            1 => self.hp_def = value,
            2 => self.hp_pro = value,
            _ => return Err(CommandError::Area("Invalid penalty side.".into())),
        }
        Ok(())
    }

    /// Record the now-playing song. A positive `length` (seconds) loops it.
    pub fn play_music(&mut self, song: &str, player: &str, length: i64, now: Instant) {
        self.current_music = song.to_string();
        self.current_music_player = player.to_string();
        self.music_loop = u64::try_from(length)
            .ok()
            .filter(|secs| *secs > 0)
            .map(|secs| {
                let length = Duration::from_secs(secs);
                MusicLoop {
                    song: song.to_string(),
                    length,
                    next_at: now + length,
                }
            });
    }

    /// If the looping song has run out, rearm the loop and return its name
    /// for rebroadcast.
    pub fn due_music_loop(&mut self, now: Instant) -> Option<String> {
        let music_loop = self.music_loop.as_mut()?;
        if now < music_loop.next_at {
            return None;
        }
        music_loop.next_at = now + music_loop.length;
        Some(music_loop.song.clone())
    }

    pub fn add_to_judgelog(&mut self, entry: String) {
        if self.judgelog.len() == JUDGELOG_LEN {
            self.judgelog.pop_front();
        }
        self.judgelog.push_back(entry);
    }

    pub fn judgelog(&self) -> impl Iterator<Item = &str> {
        self.judgelog.iter().map(String::as_str)
    }
}

/// All areas, in configuration order. Area 0 is the default.
pub struct AreaManager {
    areas: Vec<Area>,
}

impl AreaManager {
    pub fn new(configs: &[AreaConfig]) -> Self {
        Self {
            areas: configs
                .iter()
                .enumerate()
                .map(|(id, c)| Area::new(id, c.name.clone(), c.background.clone()))
                .collect(),
        }
    }

    pub fn default_area(&self) -> usize {
        0
    }

    pub fn get(&self, id: usize) -> Option<&Area> {
        self.areas.get(id)
    }

    pub fn get_mut(&mut self, id: usize) -> Option<&mut Area> {
        self.areas.get_mut(id)
    }

    pub fn by_name(&self, name: &str) -> Result<usize, CommandError> {
        self.areas
            .iter()
            .position(|a| a.name == name)
            .ok_or_else(|| CommandError::Area("Area not found.".into()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Area> {
        self.areas.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Area> {
        self.areas.iter_mut()
    }

    pub fn names(&self) -> Vec<String> {
        self.areas.iter().map(|a| a.name.clone()).collect()
    }
}
