use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub server: ServerSection,
    #[serde(default)]
    pub websocket: WebsocketSection,
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default)]
    pub bans: BansSection,
    /// Character folder names, addressed by index.
    #[serde(default)]
    pub characters: Vec<String>,
    #[serde(default = "default_areas")]
    pub areas: Vec<AreaConfig>,
    #[serde(default)]
    pub music: Vec<MusicCategory>,
}

#[derive(Debug, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_address")]
    pub address: String,
    pub port: u16,
    /// Bind to loopback only.
    #[serde(default)]
    pub local: bool,
    /// Name used for server messages in OOC. Players may not use it.
    pub hostname: String,
    pub playerlimit: u32,
    /// Keepalive timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default)]
    pub motd: String,
    /// Password for `/login`. Empty disables moderator login.
    #[serde(default)]
    pub modpass: String,
    /// Prefix for `/g` broadcasts.
    #[serde(default = "default_globalname")]
    pub globalname: String,
}

fn default_address() -> String {
    "0.0.0.0".into()
}

fn default_timeout() -> u64 {
    250
}

fn default_globalname() -> String {
    "$G".into()
}

impl ServerSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn bind_ip(&self) -> &str {
        if self.local {
            "127.0.0.1"
        } else {
            &self.address
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct WebsocketSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_websocket_port")]
    pub port: u16,
}

fn default_websocket_port() -> u16 {
    50001
}

impl Default for WebsocketSection {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_websocket_port(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BansSection {
    #[serde(default = "default_ban_file")]
    pub file: String,
}

fn default_ban_file() -> String {
    "banlist.json".into()
}

impl Default for BansSection {
    fn default() -> Self {
        Self {
            file: default_ban_file(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AreaConfig {
    pub name: String,
    #[serde(default = "default_background")]
    pub background: String,
}

fn default_background() -> String {
    "gs4".into()
}

fn default_areas() -> Vec<AreaConfig> {
    vec![AreaConfig {
        name: "Basement".into(),
        background: default_background(),
    }]
}

#[derive(Debug, Clone, Deserialize)]
pub struct MusicCategory {
    pub category: String,
    #[serde(default)]
    pub songs: Vec<SongConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SongConfig {
    pub name: String,
    /// Length in seconds. Songs with a positive length loop.
    #[serde(default)]
    pub length: Option<i64>,
}

impl ServerConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let config: Self = toml::from_str(contents)?;
        if config.areas.is_empty() {
            return Err("at least one [[areas]] entry is required".into());
        }
        if config.server.playerlimit == 0 {
            return Err("server.playerlimit must be at least 1".into());
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [server]
        port = 27016
        hostname = "<dollar>H"
        playerlimit = 100
    "#;

    #[test]
    fn parse_minimal_config() {
        let config = ServerConfig::parse(MINIMAL).unwrap();
        assert_eq!(config.server.port, 27016);
        assert_eq!(config.server.address, "0.0.0.0");
        assert_eq!(config.server.timeout(), Duration::from_secs(250));
        assert_eq!(config.server.globalname, "$G");
        assert!(config.server.modpass.is_empty());
        // optional sections default when absent
        assert!(!config.websocket.enabled);
        assert_eq!(config.websocket.port, 50001);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.bans.file, "banlist.json");
        assert!(config.characters.is_empty());
        assert_eq!(config.areas.len(), 1);
        assert_eq!(config.areas[0].name, "Basement");
        assert!(config.music.is_empty());
    }

    #[test]
    fn parse_full_config() {
        let toml_str = r#"
            characters = ["Phoenix", "Edgeworth", "Maya"]

            [server]
            address = "10.0.0.2"
            port = 27016
            local = true
            hostname = "<dollar>H"
            playerlimit = 50
            timeout = 60
            motd = "Welcome!"
            modpass = "hunter2"
            globalname = "$GLOBAL"

            [websocket]
            enabled = true
            port = 27017

            [logging]
            level = "debug"

            [[areas]]
            name = "Courtroom 1"
            background = "gs4"

            [[areas]]
            name = "Lobby"
            background = "lobby"

            [[music]]
            category = "==Trial=="
            songs = [
                { name = "Objection.mp3", length = 90 },
                { name = "Pursuit.mp3" },
            ]
        "#;
        let config = ServerConfig::parse(toml_str).unwrap();
        assert_eq!(config.server.bind_ip(), "127.0.0.1");
        assert_eq!(config.server.timeout(), Duration::from_secs(60));
        assert!(config.websocket.enabled);
        assert_eq!(config.websocket.port, 27017);
        assert_eq!(config.characters.len(), 3);
        assert_eq!(config.areas[1].background, "lobby");
        assert_eq!(config.music[0].songs[0].length, Some(90));
        assert_eq!(config.music[0].songs[1].length, None);
    }

    #[test]
    fn empty_area_list_rejected() {
        let toml_str = format!("areas = []\n{MINIMAL}");
        assert!(ServerConfig::parse(&toml_str).is_err());
    }

    #[test]
    fn zero_playerlimit_rejected() {
        let toml_str = MINIMAL.replace("playerlimit = 100", "playerlimit = 0");
        assert!(ServerConfig::parse(&toml_str).is_err());
    }
}
