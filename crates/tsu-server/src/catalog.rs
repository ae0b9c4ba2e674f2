//! Character and music catalogs loaded from configuration.

use tsu_command::CommandError;

use crate::config::MusicCategory;

pub struct Catalog {
    characters: Vec<String>,
    music: Vec<MusicCategory>,
    /// Area names, then each category followed by its songs.
    music_list_network: Vec<String>,
}

impl Catalog {
    pub fn new(characters: Vec<String>, music: Vec<MusicCategory>, area_names: &[String]) -> Self {
        let mut music_list_network = area_names.to_vec();
        for category in &music {
            music_list_network.push(category.category.clone());
            music_list_network.extend(category.songs.iter().map(|s| s.name.clone()));
        }
        Self {
            characters,
            music,
            music_list_network,
        }
    }

    pub fn characters(&self) -> &[String] {
        &self.characters
    }

    pub fn char_count(&self) -> usize {
        self.characters.len()
    }

    pub fn is_valid_char_id(&self, char_id: i32) -> bool {
        usize::try_from(char_id).is_ok_and(|id| id < self.characters.len())
    }

    /// Display name for a character id; spectators show as `CHAR_SELECT`.
    pub fn char_name(&self, char_id: i32) -> &str {
        usize::try_from(char_id)
            .ok()
            .and_then(|id| self.characters.get(id))
            .map_or("CHAR_SELECT", String::as_str)
    }

    pub fn music_list_network(&self) -> &[String] {
        &self.music_list_network
    }

    /// Resolve a song or category name to `(name, length)`. Categories and
    /// songs without a length report -1.
    pub fn song_data(&self, name: &str) -> Result<(String, i64), CommandError> {
        for category in &self.music {
            if category.category == name {
                return Ok((category.category.clone(), -1));
            }
            if let Some(song) = category.songs.iter().find(|s| s.name == name) {
                return Ok((song.name.clone(), song.length.unwrap_or(-1)));
            }
        }
        Err(CommandError::Server("Music not found.".into()))
    }
}
